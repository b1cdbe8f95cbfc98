use std::path::Path;

use crate::{
    errors::Result,
    models::{BuildEvent, Container, ContainerId, ImageReference, PortSpec, PushEvent, RunSpec},
};

pub trait ManifestFrontend {
    fn exposed_ports(&mut self, manifest_path: &Path) -> Result<Vec<PortSpec>>;
}

/// Everything the orchestrator asks of the container daemon. Each call is a
/// single round trip; streaming calls hand events to `on_event` as they
/// arrive and return once the daemon closes the stream.
pub trait ContainerBackend {
    fn build_image(
        &mut self,
        context: &Path,
        dockerfile: &str,
        tag: &str,
        on_event: &mut dyn FnMut(BuildEvent),
    ) -> Result<()>;

    /// ID of the image `tag` currently points to, `None` if there is none.
    fn image_id(&mut self, tag: &str) -> Result<Option<String>>;

    fn list_containers(&mut self) -> Result<Vec<Container>>;

    fn create_container(&mut self, spec: RunSpec) -> Result<ContainerId>;

    fn start_container(&mut self, id: &ContainerId) -> Result<()>;

    fn stop_container(&mut self, id: &ContainerId) -> Result<()>;

    fn follow_logs(&mut self, id: &ContainerId, on_chunk: &mut dyn FnMut(&[u8])) -> Result<()>;

    fn push_image(
        &mut self,
        reference: &ImageReference,
        on_event: &mut dyn FnMut(PushEvent),
    ) -> Result<()>;

    fn exec_shell(&mut self, id: &ContainerId, shell: &str) -> Result<()>;

    /// Tears down the connection. The backend is unusable afterwards.
    fn close(self: Box<Self>);
}

pub trait VersionControl {
    /// Whether the workspace is tracked by this tool at all.
    fn is_repository(&self, workspace: &Path) -> bool;

    fn short_revision(&mut self, workspace: &Path) -> Result<String>;

    fn is_dirty(&mut self, workspace: &Path) -> Result<bool>;
}

pub trait Confirm {
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

impl<C: Confirm + ?Sized> Confirm for Box<C> {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        (**self).confirm(question)
    }
}
