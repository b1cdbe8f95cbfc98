mod docker;
mod git;

pub use docker::DockerBackend;
pub use git::GitCli;
