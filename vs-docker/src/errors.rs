use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("docker daemon request failed: {0}")]
    Daemon(#[from] bollard::errors::Error),

    #[error("build failed: {0}")]
    BuildFailed(String),

    /// The version control tool exited with a non-zero code. Kept apart from
    /// any tag value so a failed lookup never turns into an image named `error`.
    #[error("`{command}` exited with code {code:?}: {stderr}")]
    VersionControl {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("no running container found for image {0}")]
    ContainerNotFound(String),

    #[error("container {0} is still running after being stopped")]
    StillRunning(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("Dockerfile line {line}: {message}")]
    Manifest { line: usize, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("another command is already working on {0}")]
    Busy(String),

    #[error("terminal output failed: {0}")]
    Terminal(#[from] crossterm::ErrorKind),

    #[error("confirmation prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
