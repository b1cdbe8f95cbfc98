use bollard::{
    auth::DockerCredentials,
    container::{
        Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, LogsOptions,
        StartContainerOptions,
    },
    errors::Error as BollardError,
    image::{BuildImageOptions, PushImageOptions},
    models::{HostConfig, PortBinding},
    Docker,
};
use futures_util::{pin_mut, StreamExt};
use ignore::WalkBuilder;
use log::{debug, info};
use number_prefix::NumberPrefix;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Command,
};
use tar::Builder as TarBuilder;
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};

use crate::{
    config::AuthConfig,
    errors::{Error, Result},
    models::{
        BuildEvent, Container, ContainerId, ImageReference, Protocol, PushEvent, RunSpec,
    },
    services::ContainerBackend,
};

/// Docker daemon client. Owns a single threaded runtime and blocks on every
/// request, so at most one daemon call is in flight.
pub struct DockerBackend {
    runtime: Runtime,
    client: Docker,
    auth_config_path: Option<PathBuf>,
}

impl DockerBackend {
    /// The auth file is only read by `push_image`, so a broken one never
    /// gets in the way of the other commands.
    pub fn connect(auth_config_path: Option<&Path>) -> Result<DockerBackend> {
        let runtime = RuntimeBuilder::new_current_thread().enable_all().build()?;

        let client = {
            let _guard = runtime.enter();
            Docker::connect_with_local_defaults()?
        };

        Ok(DockerBackend {
            runtime,
            client,
            auth_config_path: auth_config_path.map(Path::to_path_buf),
        })
    }
}

/// Registry credentials from the auth file, if one is configured.
pub fn credentials(auth_config_path: Option<&Path>) -> Result<Option<DockerCredentials>> {
    let auth = match auth_config_path {
        Some(path) => AuthConfig::load(path)?,
        None => return Ok(None),
    };
    debug!("loaded registry credentials for {:?}", auth.serveraddress);

    Ok(Some(DockerCredentials {
        username: auth.username,
        password: auth.password,
        auth: auth.auth,
        email: auth.email,
        serveraddress: auth.serveraddress,
        ..Default::default()
    }))
}

/// Packs `context` into an in-memory tarball, skipping whatever
/// `.dockerignore` lists.
pub fn archive_context(context: &Path) -> Result<Vec<u8>> {
    let mut tar = TarBuilder::new(Vec::new());
    let walk = WalkBuilder::new(context)
        .add_custom_ignore_filename(".dockerignore")
        .ignore(false)
        .git_global(false)
        .git_ignore(false)
        .git_exclude(false)
        .hidden(false)
        .build();

    let mut context_size = 0;
    for result in walk {
        let entry = result.map_err(|err| Error::Io(std::io::Error::other(err)))?;
        let relative = match entry.path().strip_prefix(context) {
            Ok(relative) if relative.as_os_str().is_empty() => continue,
            Ok(relative) => relative.to_path_buf(),
            Err(_) => PathBuf::from(entry.path()),
        };

        tar.append_path_with_name(entry.path(), &relative)?;
        context_size += entry
            .metadata()
            .map_err(|err| Error::Io(std::io::Error::other(err)))?
            .len();
    }

    match NumberPrefix::binary(context_size as f32) {
        NumberPrefix::Standalone(bytes) => info!("archived build context ({} bytes)", bytes),
        NumberPrefix::Prefixed(prefix, n) => {
            info!("archived build context ({:.1} {}B)", n, prefix)
        }
    };

    Ok(tar.into_inner()?)
}

/// Exposes every TCP port and binds it to the same port on the host.
pub fn container_config(spec: RunSpec) -> ContainerConfig<String> {
    let tcp_ports = spec
        .ports
        .iter()
        .filter(|port| port.protocol == Protocol::Tcp)
        .collect::<Vec<_>>();

    let exposed_ports = tcp_ports
        .iter()
        .map(|port| (port.to_string(), HashMap::new()))
        .collect::<HashMap<_, _>>();

    let port_bindings = tcp_ports
        .iter()
        .map(|port| {
            let binding = PortBinding {
                host_ip: None,
                host_port: Some(port.port.to_string()),
            };
            (port.to_string(), Some(vec![binding]))
        })
        .collect::<HashMap<_, _>>();

    ContainerConfig {
        image: Some(spec.image),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl ContainerBackend for DockerBackend {
    fn build_image(
        &mut self,
        context: &Path,
        dockerfile: &str,
        tag: &str,
        on_event: &mut dyn FnMut(BuildEvent),
    ) -> Result<()> {
        let archive = archive_context(context)?;
        let options = BuildImageOptions {
            dockerfile: dockerfile.to_owned(),
            t: tag.to_owned(),
            rm: true,
            ..Default::default()
        };

        let client = &self.client;
        self.runtime.block_on(async {
            let stream = client.build_image(options, None, Some(archive.into()));
            pin_mut!(stream);

            while let Some(info) = stream.next().await {
                match info {
                    Ok(info) => {
                        let detail = info
                            .error_detail
                            .and_then(|detail| detail.message)
                            .or(info.error);
                        if let Some(message) = detail {
                            on_event(BuildEvent::Error(message));
                        } else if let Some(line) = info.stream.or(info.status) {
                            on_event(BuildEvent::Log(line));
                        }
                    }
                    Err(BollardError::DockerStreamError { error }) => {
                        on_event(BuildEvent::Error(error));
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            Ok(())
        })
    }

    fn image_id(&mut self, tag: &str) -> Result<Option<String>> {
        let client = &self.client;
        match self
            .runtime
            .block_on(async { client.inspect_image(tag).await })
        {
            Ok(inspect) => Ok(inspect.id),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn list_containers(&mut self) -> Result<Vec<Container>> {
        let options = ListContainersOptions::<String>::default();

        let client = &self.client;
        let summaries = self
            .runtime
            .block_on(async { client.list_containers(Some(options)).await })?;

        let containers = summaries
            .into_iter()
            .filter_map(|summary| {
                Some(Container {
                    id: ContainerId(summary.id?),
                    image: summary.image.unwrap_or_default(),
                    image_id: summary.image_id.unwrap_or_default(),
                    state: summary
                        .state
                        .map(|state| state.to_string())
                        .unwrap_or_default(),
                })
            })
            .collect();

        Ok(containers)
    }

    fn create_container(&mut self, spec: RunSpec) -> Result<ContainerId> {
        let config = container_config(spec);

        let client = &self.client;
        let response = self.runtime.block_on(async {
            client
                .create_container(None::<CreateContainerOptions<String>>, config)
                .await
        })?;

        for warning in response.warnings {
            info!("daemon warning: {}", warning);
        }

        Ok(ContainerId(response.id))
    }

    fn start_container(&mut self, id: &ContainerId) -> Result<()> {
        let client = &self.client;
        self.runtime.block_on(async {
            client
                .start_container(&id.0, None::<StartContainerOptions<String>>)
                .await
        })?;

        Ok(())
    }

    fn stop_container(&mut self, id: &ContainerId) -> Result<()> {
        let client = &self.client;
        self.runtime
            .block_on(async { client.stop_container(&id.0, None).await })?;

        Ok(())
    }

    fn follow_logs(&mut self, id: &ContainerId, on_chunk: &mut dyn FnMut(&[u8])) -> Result<()> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let client = &self.client;
        self.runtime.block_on(async {
            let stream = client.logs(&id.0, Some(options));
            pin_mut!(stream);

            while let Some(output) = stream.next().await {
                match output {
                    Ok(output) => on_chunk(&output.into_bytes()),
                    Err(BollardError::DockerStreamError { error }) => {
                        return Err(Error::Stream(error))
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            Ok(())
        })
    }

    fn push_image(
        &mut self,
        reference: &ImageReference,
        on_event: &mut dyn FnMut(PushEvent),
    ) -> Result<()> {
        let repository = reference.repository();
        let options = PushImageOptions {
            tag: reference.version().to_owned(),
        };
        let credentials = credentials(self.auth_config_path.as_deref())?;

        let client = &self.client;
        self.runtime.block_on(async {
            let stream = client.push_image(&repository, Some(options), credentials);
            pin_mut!(stream);

            while let Some(info) = stream.next().await {
                match info {
                    Ok(info) => {
                        if let Some(error) = info.error {
                            on_event(PushEvent::Error(error));
                        } else if let Some(status) = info.status {
                            let line = match info.progress {
                                Some(progress) => format!("{} {}", status, progress),
                                None => status,
                            };
                            on_event(PushEvent::Status(line));
                        }
                    }
                    Err(BollardError::DockerStreamError { error }) => {
                        on_event(PushEvent::Error(error));
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            Ok(())
        })
    }

    fn exec_shell(&mut self, id: &ContainerId, shell: &str) -> Result<()> {
        info!("opening {} in container {}", shell, id.0);

        let status = Command::new("docker")
            .args(["exec", "-it", id.0.as_str(), shell])
            .status()?;

        if !status.success() {
            return Err(Error::Stream(format!("shell exited with {}", status)));
        }

        Ok(())
    }

    fn close(self: Box<Self>) {
        debug!("closing docker connection");
        self.runtime.shutdown_background();
    }
}
