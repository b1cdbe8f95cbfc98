use log::{info, warn};
use std::path::PathBuf;

use crate::{
    console::{Channel, Console},
    errors::{Error, Result},
    models::{BuildEvent, BuildOutcome, Container, ContainerId, ImageReference, PushEvent, RunSpec},
    services::{Confirm, ContainerBackend, ManifestFrontend},
};

/// How a run reacts to a container that is already up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Ask before stopping it.
    Manual,
    /// Stop and rebuild without asking. Used by the watcher.
    Autorun,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Started(ContainerId),
    /// The user chose to keep the running container.
    Declined,
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub mode: RunMode,
    pub quiet: bool,
    pub detach: bool,
}

/// Sequences daemon calls for one workspace. Every step waits for the
/// previous one; nothing here runs concurrently.
pub struct Controller {
    backend: Box<dyn ContainerBackend>,
    manifest: Box<dyn ManifestFrontend>,
    confirm: Box<dyn Confirm>,
    console: Console,
    workspace: PathBuf,
    dockerfile: String,
    shell: String,
}

impl Controller {
    pub fn init<B, M, C>(
        workspace: impl Into<PathBuf>,
        backend: B,
        manifest: M,
        confirm: C,
        console: Console,
    ) -> Controller
    where
        B: 'static + ContainerBackend,
        M: 'static + ManifestFrontend,
        C: 'static + Confirm,
    {
        Controller {
            backend: Box::new(backend),
            manifest: Box::new(manifest),
            confirm: Box::new(confirm),
            console,
            workspace: workspace.into(),
            dockerfile: "Dockerfile".into(),
            shell: "/bin/sh".into(),
        }
    }

    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Controller {
        self.dockerfile = dockerfile.into();
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Controller {
        self.shell = shell.into();
        self
    }

    pub fn console(&mut self) -> &mut Console {
        &mut self.console
    }

    pub fn shutdown(mut self) -> Result<()> {
        self.console.flush()?;
        self.backend.close();
        Ok(())
    }

    /// Builds the workspace image. A failing build is reported in the
    /// outcome, only transport problems are errors.
    pub fn build(&mut self, reference: &ImageReference, quiet: bool) -> Result<BuildOutcome> {
        self.console
            .info(&format!("Starting to build {}", reference))?;

        let mut outcome = BuildOutcome::default();
        let mut output_error = None;
        let console = &mut self.console;

        self.backend.build_image(
            &self.workspace,
            &self.dockerfile,
            &reference.to_string(),
            &mut |event| {
                outcome.record(&event);
                let line = match &event {
                    BuildEvent::Log(line) if !quiet => line,
                    BuildEvent::Error(message) => message,
                    BuildEvent::Log(_) => return,
                };
                if let Err(err) = console.line(Channel::Build, line) {
                    output_error.get_or_insert(err);
                }
            },
        )?;

        if let Some(err) = output_error {
            return Err(err);
        }

        if outcome.succeeded {
            self.console.info("Build succeeded")?;
        } else {
            warn!("build of {} failed: {:?}", reference, outcome.detail);
        }

        Ok(outcome)
    }

    fn build_or_fail(&mut self, reference: &ImageReference, quiet: bool) -> Result<()> {
        let outcome = self.build(reference, quiet)?;
        if !outcome.succeeded {
            let detail = outcome
                .detail
                .unwrap_or_else(|| "unknown build error".into());
            return Err(Error::BuildFailed(detail));
        }
        Ok(())
    }

    /// First container whose image is exactly `reference`.
    pub fn find_container(&mut self, reference: &ImageReference) -> Result<Option<Container>> {
        self.find_matching(reference, None)
    }

    /// Like `find_container`, but also matches containers still running the
    /// image `previous_image` identifies.
    fn find_matching(
        &mut self,
        reference: &ImageReference,
        previous_image: Option<&str>,
    ) -> Result<Option<Container>> {
        let image = reference.to_string();
        let container = self.backend.list_containers()?.into_iter().find(|container| {
            container.image == image || previous_image == Some(container.image_id.as_str())
        });

        info!("container for {}: {:?}", image, container);
        Ok(container)
    }

    fn require_container(&mut self, reference: &ImageReference) -> Result<Container> {
        self.find_container(reference)?
            .ok_or_else(|| Error::ContainerNotFound(reference.to_string()))
    }

    /// Creates and starts a container publishing every exposed TCP port on
    /// the same host port.
    pub fn start(&mut self, reference: &ImageReference) -> Result<ContainerId> {
        let manifest_path = self.workspace.join(&self.dockerfile);
        let ports = self.manifest.exposed_ports(&manifest_path)?;

        let id = self.backend.create_container(RunSpec {
            image: reference.to_string(),
            ports,
        })?;
        self.backend.start_container(&id)?;
        self.console.info(&format!("Container running: {}", id.0))?;

        Ok(id)
    }

    /// Build, replace whatever runs the same image, start, then follow logs
    /// unless detached.
    pub fn run(&mut self, reference: &ImageReference, options: &RunOptions) -> Result<RunOutcome> {
        // The build moves the tag. Containers of the old image are then only
        // listed by its ID.
        let previous_image = self.backend.image_id(&reference.to_string())?;
        let mut restarted = false;

        let id = loop {
            self.build_or_fail(reference, options.quiet)?;

            let existing = match self.find_matching(reference, previous_image.as_deref())? {
                Some(existing) => existing,
                None => break self.start(reference)?,
            };

            if restarted {
                return Err(Error::StillRunning(existing.id.0));
            }

            if options.mode == RunMode::Manual {
                let question = format!(
                    "Container {} is already running {}. Stop it and start a new one?",
                    existing.id.0, reference
                );
                if !self.confirm.confirm(&question)? {
                    self.console.info("Keeping the running container.")?;
                    return Ok(RunOutcome::Declined);
                }
            }

            self.backend.stop_container(&existing.id)?;
            self.console
                .info(&format!("Stopped container {}", existing.id.0))?;
            restarted = true;
        };

        if !options.detach {
            self.attach_logs(&id)?;
        }

        Ok(RunOutcome::Started(id))
    }

    pub fn kill(&mut self, reference: &ImageReference) -> Result<ContainerId> {
        let container = self.require_container(reference)?;
        self.backend.stop_container(&container.id)?;
        self.console.info("Container stopped.")?;

        Ok(container.id)
    }

    pub fn logs(&mut self, reference: &ImageReference) -> Result<()> {
        let container = self.require_container(reference)?;
        self.attach_logs(&container.id)
    }

    fn attach_logs(&mut self, id: &ContainerId) -> Result<()> {
        let mut output_error = None;
        let console = &mut self.console;

        self.backend.follow_logs(id, &mut |chunk| {
            if output_error.is_none() {
                if let Err(err) = console.bytes(Channel::Logs, chunk) {
                    output_error = Some(err);
                }
            }
        })?;

        match output_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn push(&mut self, reference: &ImageReference) -> Result<()> {
        self.console.info(&format!("Pushing {}", reference))?;

        let mut failure = None;
        let mut output_error = None;
        let console = &mut self.console;

        self.backend.push_image(reference, &mut |event| {
            let line = match event {
                PushEvent::Status(line) => line,
                PushEvent::Error(message) => {
                    failure.get_or_insert_with(|| message.clone());
                    message
                }
            };
            if let Err(err) = console.line(Channel::Push, &line) {
                output_error.get_or_insert(err);
            }
        })?;

        if let Some(message) = failure {
            return Err(Error::Stream(message));
        }
        if let Some(err) = output_error {
            return Err(err);
        }

        self.console.info(&format!("Pushed {}", reference))?;
        Ok(())
    }

    /// Returns the running container, offering to start one when nothing
    /// runs yet. `None` means the user declined.
    pub fn ensure_running(
        &mut self,
        reference: &ImageReference,
        quiet: bool,
    ) -> Result<Option<ContainerId>> {
        if let Some(container) = self.find_container(reference)? {
            return Ok(Some(container.id));
        }

        let question = format!("No container is running {}. Start one?", reference);
        if !self.confirm.confirm(&question)? {
            return Ok(None);
        }

        let options = RunOptions {
            mode: RunMode::Manual,
            quiet,
            detach: true,
        };
        match self.run(reference, &options)? {
            RunOutcome::Started(id) => Ok(Some(id)),
            RunOutcome::Declined => Ok(None),
        }
    }

    pub fn exec(&mut self, id: &ContainerId) -> Result<()> {
        self.backend.exec_shell(id, &self.shell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        console::tests::SharedBuffer,
        models::{PortSpec, Protocol},
    };
    use std::{cell::RefCell, path::Path, rc::Rc};

    #[derive(Default)]
    struct Daemon {
        containers: Vec<Container>,
        build_events: Vec<BuildEvent>,
        push_events: Vec<PushEvent>,
        log_chunks: Vec<Vec<u8>>,
        created: Vec<RunSpec>,
        calls: Vec<String>,
        next_id: usize,
        image_id: Option<String>,
        /// Stopped containers stay listed.
        sticky_stop: bool,
    }

    #[derive(Clone, Default)]
    struct FakeBackend(Rc<RefCell<Daemon>>);

    impl ContainerBackend for FakeBackend {
        fn build_image(
            &mut self,
            _context: &Path,
            dockerfile: &str,
            tag: &str,
            on_event: &mut dyn FnMut(BuildEvent),
        ) -> Result<()> {
            let events = {
                let mut daemon = self.0.borrow_mut();
                daemon.calls.push(format!("build {} {}", dockerfile, tag));
                daemon.build_events.clone()
            };
            events.into_iter().for_each(on_event);
            Ok(())
        }

        fn image_id(&mut self, tag: &str) -> Result<Option<String>> {
            let mut daemon = self.0.borrow_mut();
            daemon.calls.push(format!("inspect {}", tag));
            Ok(daemon.image_id.clone())
        }

        fn list_containers(&mut self) -> Result<Vec<Container>> {
            let mut daemon = self.0.borrow_mut();
            daemon.calls.push("list".into());
            Ok(daemon.containers.clone())
        }

        fn create_container(&mut self, spec: RunSpec) -> Result<ContainerId> {
            let mut daemon = self.0.borrow_mut();
            daemon.next_id += 1;
            let id = ContainerId(format!("new{}", daemon.next_id));
            daemon.calls.push(format!("create {}", id.0));
            daemon.created.push(spec);
            Ok(id)
        }

        fn start_container(&mut self, id: &ContainerId) -> Result<()> {
            let mut daemon = self.0.borrow_mut();
            daemon.calls.push(format!("start {}", id.0));
            let image = daemon.created.last().map(|spec| spec.image.clone());
            daemon.containers.push(Container {
                id: id.clone(),
                image: image.unwrap_or_default(),
                image_id: "sha256:new".into(),
                state: "running".into(),
            });
            Ok(())
        }

        fn stop_container(&mut self, id: &ContainerId) -> Result<()> {
            let mut daemon = self.0.borrow_mut();
            daemon.calls.push(format!("stop {}", id.0));
            if !daemon.sticky_stop {
                daemon.containers.retain(|container| container.id != *id);
            }
            Ok(())
        }

        fn follow_logs(
            &mut self,
            id: &ContainerId,
            on_chunk: &mut dyn FnMut(&[u8]),
        ) -> Result<()> {
            let chunks = {
                let mut daemon = self.0.borrow_mut();
                daemon.calls.push(format!("logs {}", id.0));
                daemon.log_chunks.clone()
            };
            chunks.iter().for_each(|chunk| on_chunk(chunk));
            Ok(())
        }

        fn push_image(
            &mut self,
            reference: &ImageReference,
            on_event: &mut dyn FnMut(PushEvent),
        ) -> Result<()> {
            let events = {
                let mut daemon = self.0.borrow_mut();
                daemon.calls.push(format!("push {}", reference));
                daemon.push_events.clone()
            };
            events.into_iter().for_each(on_event);
            Ok(())
        }

        fn exec_shell(&mut self, id: &ContainerId, shell: &str) -> Result<()> {
            self.0
                .borrow_mut()
                .calls
                .push(format!("exec {} {}", id.0, shell));
            Ok(())
        }

        fn close(self: Box<Self>) {
            self.0.borrow_mut().calls.push("close".into());
        }
    }

    struct FixedPorts(Vec<PortSpec>);

    impl ManifestFrontend for FixedPorts {
        fn exposed_ports(&mut self, _manifest_path: &Path) -> Result<Vec<PortSpec>> {
            Ok(self.0.clone())
        }
    }

    struct Answer(Option<bool>);

    impl Confirm for Answer {
        fn confirm(&mut self, question: &str) -> Result<bool> {
            match self.0 {
                Some(answer) => Ok(answer),
                None => panic!("unexpected question: {}", question),
            }
        }
    }

    fn reference() -> ImageReference {
        ImageReference::new(None, None, "my-app", None).unwrap()
    }

    fn setup(daemon: Daemon, answer: Option<bool>) -> (Controller, FakeBackend, SharedBuffer) {
        let backend = FakeBackend(Rc::new(RefCell::new(daemon)));
        let buffer = SharedBuffer::default();
        let ports = vec![PortSpec {
            port: 8080,
            protocol: Protocol::Tcp,
        }];

        let controller = Controller::init(
            "/work/my-app",
            backend.clone(),
            FixedPorts(ports),
            Answer(answer),
            Console::new(Box::new(buffer.clone())),
        );

        (controller, backend, buffer)
    }

    fn calls(backend: &FakeBackend) -> Vec<String> {
        backend.0.borrow().calls.clone()
    }

    fn running(id: &str) -> Container {
        Container {
            id: ContainerId(id.into()),
            image: "my-app:latest".into(),
            image_id: "sha256:current".into(),
            state: "running".into(),
        }
    }

    fn manual() -> RunOptions {
        RunOptions {
            mode: RunMode::Manual,
            quiet: false,
            detach: false,
        }
    }

    #[test]
    fn fresh_run_builds_starts_and_follows_logs() {
        let daemon = Daemon {
            build_events: vec![BuildEvent::Log("Step 1/2 : FROM node".into())],
            log_chunks: vec![b"listening on 8080\n".to_vec()],
            ..Default::default()
        };
        let (mut controller, backend, buffer) = setup(daemon, None);

        let outcome = controller.run(&reference(), &manual()).unwrap();

        assert_eq!(outcome, RunOutcome::Started(ContainerId("new1".into())));
        assert_eq!(
            calls(&backend),
            vec![
                "inspect my-app:latest",
                "build Dockerfile my-app:latest",
                "list",
                "create new1",
                "start new1",
                "logs new1",
            ]
        );

        let created = backend.0.borrow().created[0].clone();
        assert_eq!(created.image, "my-app:latest");
        assert_eq!(created.ports[0].to_string(), "8080/tcp");

        let output = buffer.contents();
        assert!(output.contains("Container Build"));
        assert!(output.contains("Step 1/2 : FROM node"));
        assert!(output.contains("listening on 8080"));
    }

    #[test]
    fn failed_build_stops_the_run() {
        let daemon = Daemon {
            build_events: vec![
                BuildEvent::Log("Step 1/2".into()),
                BuildEvent::Error("COPY failed".into()),
                BuildEvent::Log("Step 2/2".into()),
            ],
            ..Default::default()
        };
        let (mut controller, backend, _) = setup(daemon, None);

        let err = controller.run(&reference(), &manual()).unwrap_err();

        assert!(matches!(err, Error::BuildFailed(detail) if detail == "COPY failed"));
        assert_eq!(
            calls(&backend),
            vec!["inspect my-app:latest", "build Dockerfile my-app:latest"]
        );
    }

    #[test]
    fn quiet_build_hides_log_lines_but_not_errors() {
        let daemon = Daemon {
            build_events: vec![
                BuildEvent::Log("Step 1/2".into()),
                BuildEvent::Error("COPY failed".into()),
            ],
            ..Default::default()
        };
        let (mut controller, _, buffer) = setup(daemon, None);

        let outcome = controller.build(&reference(), true).unwrap();

        assert!(!outcome.succeeded);
        let output = buffer.contents();
        assert!(!output.contains("Step 1/2"));
        assert!(output.contains("COPY failed"));
    }

    #[test]
    fn autorun_replaces_running_container_without_asking() {
        let daemon = Daemon {
            containers: vec![running("old")],
            ..Default::default()
        };
        let (mut controller, backend, _) = setup(daemon, None);
        let options = RunOptions {
            mode: RunMode::Autorun,
            quiet: true,
            detach: true,
        };

        let outcome = controller.run(&reference(), &options).unwrap();

        assert_eq!(outcome, RunOutcome::Started(ContainerId("new1".into())));
        assert_eq!(
            calls(&backend),
            vec![
                "inspect my-app:latest",
                "build Dockerfile my-app:latest",
                "list",
                "stop old",
                "build Dockerfile my-app:latest",
                "list",
                "create new1",
                "start new1",
            ]
        );
    }

    #[test]
    fn manual_run_replaces_container_when_confirmed() {
        let daemon = Daemon {
            containers: vec![running("old")],
            log_chunks: vec![b"ready\n".to_vec()],
            ..Default::default()
        };
        let (mut controller, backend, buffer) = setup(daemon, Some(true));

        let outcome = controller.run(&reference(), &manual()).unwrap();

        assert_eq!(outcome, RunOutcome::Started(ContainerId("new1".into())));
        assert_eq!(
            calls(&backend),
            vec![
                "inspect my-app:latest",
                "build Dockerfile my-app:latest",
                "list",
                "stop old",
                "build Dockerfile my-app:latest",
                "list",
                "create new1",
                "start new1",
                "logs new1",
            ]
        );

        let output = buffer.contents();
        assert!(output.contains("Stopped container old"));
        assert!(output.contains("ready"));
    }

    #[test]
    fn container_surviving_stop_fails_the_run() {
        let daemon = Daemon {
            containers: vec![running("old")],
            sticky_stop: true,
            ..Default::default()
        };
        let (mut controller, backend, _) = setup(daemon, None);
        let options = RunOptions {
            mode: RunMode::Autorun,
            quiet: true,
            detach: true,
        };

        let err = controller.run(&reference(), &options).unwrap_err();

        assert!(matches!(err, Error::StillRunning(id) if id == "old"));
        let calls = calls(&backend);
        assert_eq!(calls.iter().filter(|call| *call == "stop old").count(), 1);
        assert!(!calls.iter().any(|call| call.starts_with("create")));
    }

    #[test]
    fn run_replaces_container_listed_by_previous_image_id() {
        let retagged = Container {
            id: ContainerId("old".into()),
            image: "sha256:aaa".into(),
            image_id: "sha256:aaa".into(),
            state: "running".into(),
        };
        let unrelated = Container {
            id: ContainerId("db".into()),
            image: "sha256:bbb".into(),
            image_id: "sha256:bbb".into(),
            state: "running".into(),
        };
        let daemon = Daemon {
            containers: vec![unrelated, retagged],
            image_id: Some("sha256:aaa".into()),
            ..Default::default()
        };
        let (mut controller, backend, _) = setup(daemon, None);
        let options = RunOptions {
            mode: RunMode::Autorun,
            quiet: true,
            detach: true,
        };

        let outcome = controller.run(&reference(), &options).unwrap();

        assert_eq!(outcome, RunOutcome::Started(ContainerId("new1".into())));
        let calls = calls(&backend);
        assert!(calls.contains(&"stop old".to_string()));
        assert!(!calls.contains(&"stop db".to_string()));
    }

    #[test]
    fn manual_run_keeps_container_when_declined() {
        let daemon = Daemon {
            containers: vec![running("old")],
            ..Default::default()
        };
        let (mut controller, backend, _) = setup(daemon, Some(false));

        let outcome = controller.run(&reference(), &manual()).unwrap();

        assert_eq!(outcome, RunOutcome::Declined);
        assert!(!calls(&backend).iter().any(|call| call.starts_with("stop")));
    }

    #[test]
    fn find_matches_exact_image_and_is_idempotent() {
        let other = Container {
            id: ContainerId("other".into()),
            image: "my-app:v2".into(),
            image_id: "sha256:v2".into(),
            state: "running".into(),
        };
        let daemon = Daemon {
            containers: vec![other, running("first"), running("second")],
            ..Default::default()
        };
        let (mut controller, _, _) = setup(daemon, None);

        let first = controller.find_container(&reference()).unwrap();
        let second = controller.find_container(&reference()).unwrap();

        assert_eq!(first.as_ref().map(|c| c.id.0.as_str()), Some("first"));
        assert_eq!(first, second);
    }

    #[test]
    fn kill_without_container_is_not_found() {
        let (mut controller, _, _) = setup(Daemon::default(), None);

        let err = controller.kill(&reference()).unwrap_err();
        assert!(matches!(err, Error::ContainerNotFound(image) if image == "my-app:latest"));
    }

    #[test]
    fn kill_stops_found_container() {
        let daemon = Daemon {
            containers: vec![running("abc")],
            ..Default::default()
        };
        let (mut controller, backend, _) = setup(daemon, None);

        assert_eq!(controller.kill(&reference()).unwrap().0, "abc");
        assert_eq!(calls(&backend), vec!["list", "stop abc"]);
    }

    #[test]
    fn logs_follows_found_container() {
        let daemon = Daemon {
            containers: vec![running("abc")],
            log_chunks: vec![b"GET / 200\n".to_vec()],
            ..Default::default()
        };
        let (mut controller, backend, buffer) = setup(daemon, None);

        controller.logs(&reference()).unwrap();

        assert_eq!(calls(&backend), vec!["list", "logs abc"]);
        let output = buffer.contents();
        assert!(output.contains("Container Logs"));
        assert!(output.contains("GET / 200"));
    }

    #[test]
    fn logs_without_container_is_not_found() {
        let (mut controller, backend, buffer) = setup(Daemon::default(), None);

        let err = controller.logs(&reference()).unwrap_err();

        assert!(matches!(err, Error::ContainerNotFound(image) if image == "my-app:latest"));
        assert_eq!(calls(&backend), vec!["list"]);
        assert!(!buffer.contents().contains("Container Logs"));
    }

    #[test]
    fn push_error_event_fails_the_push() {
        let daemon = Daemon {
            push_events: vec![
                PushEvent::Status("Preparing".into()),
                PushEvent::Error("denied: requested access".into()),
                PushEvent::Status("Pushed".into()),
            ],
            ..Default::default()
        };
        let (mut controller, _, buffer) = setup(daemon, None);

        let err = controller.push(&reference()).unwrap_err();

        assert!(matches!(err, Error::Stream(message) if message.starts_with("denied")));
        assert!(buffer.contents().contains("Container Push"));
    }

    #[test]
    fn exec_offers_to_start_a_container() {
        let (mut controller, backend, _) = setup(Daemon::default(), Some(true));

        let id = controller.ensure_running(&reference(), true).unwrap().unwrap();
        controller.exec(&id).unwrap();

        let calls = calls(&backend);
        assert!(calls.contains(&"start new1".to_string()));
        assert!(!calls.iter().any(|call| call.starts_with("logs")));
        assert_eq!(calls.last().map(String::as_str), Some("exec new1 /bin/sh"));
    }

    #[test]
    fn exec_reuses_running_container() {
        let daemon = Daemon {
            containers: vec![running("abc")],
            ..Default::default()
        };
        let (mut controller, backend, _) = setup(daemon, None);

        let id = controller.ensure_running(&reference(), false).unwrap().unwrap();
        controller.exec(&id).unwrap();

        assert_eq!(calls(&backend), vec!["list", "exec abc /bin/sh"]);
    }

    #[test]
    fn exec_declined_does_nothing() {
        let (mut controller, backend, _) = setup(Daemon::default(), Some(false));

        assert_eq!(controller.ensure_running(&reference(), false).unwrap(), None);
        assert_eq!(calls(&backend), vec!["list"]);
    }

    #[test]
    fn shutdown_closes_backend() {
        let (controller, backend, _) = setup(Daemon::default(), None);

        controller
            .with_shell("/bin/bash")
            .with_dockerfile("docker/Dockerfile")
            .shutdown()
            .unwrap();
        assert_eq!(calls(&backend), vec!["close"]);
    }
}
