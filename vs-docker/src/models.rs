use std::fmt;

use crate::errors::{Error, Result};

pub const DEFAULT_VERSION: &str = "latest";

/// A fully resolved `[registry/][user/]name:version` image reference.
#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ImageReference {
    registry: Option<String>,
    user: Option<String>,
    name: String,
    version: String,
}

impl ImageReference {
    pub fn new(
        registry: Option<String>,
        user: Option<String>,
        name: impl Into<String>,
        version: Option<String>,
    ) -> Result<ImageReference> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config("image name must not be empty".into()));
        }

        Ok(ImageReference {
            registry: registry.filter(|r| !r.is_empty()),
            user: user.filter(|u| !u.is_empty()),
            name,
            version: version
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_VERSION.into()),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Everything before the `:version` part.
    pub fn repository(&self) -> String {
        let mut repository = String::new();
        if let Some(registry) = &self.registry {
            repository.push_str(registry);
            repository.push('/');
        }
        if let Some(user) = &self.user {
            repository.push_str(user);
            repository.push('/');
        }
        repository.push_str(&self.name);
        repository
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository(), self.version)
    }
}

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ContainerId(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    pub id: ContainerId,
    /// The image as the daemon reports it. Once the tag moves to a newer
    /// build this becomes the bare image ID.
    pub image: String,
    pub image_id: String,
    pub state: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildEvent {
    Log(String),
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushEvent {
    Status(String),
    Error(String),
}

/// Result of one image build. Any error event fails the build, no matter
/// what follows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOutcome {
    pub succeeded: bool,
    pub detail: Option<String>,
}

impl Default for BuildOutcome {
    fn default() -> Self {
        BuildOutcome {
            succeeded: true,
            detail: None,
        }
    }
}

impl BuildOutcome {
    pub fn record(&mut self, event: &BuildEvent) {
        if let BuildEvent::Error(message) = event {
            self.succeeded = false;
            if self.detail.is_none() {
                self.detail = Some(message.clone());
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct PortSpec {
    pub port: u16,
    pub protocol: Protocol,
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// What the daemon needs to create a container from the workspace image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub ports: Vec<PortSpec>,
}
