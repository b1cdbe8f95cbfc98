use log::debug;
use std::{
    path::Path,
    process::{Command, Output},
};

use crate::{
    errors::{Error, Result},
    services::VersionControl,
};

/// Talks to the `git` executable with blocking calls.
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new() -> GitCli {
        GitCli {
            program: "git".into(),
        }
    }

    fn run(&self, workspace: &Path, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("running {:?} in {:?}", command, workspace);

        let Output {
            status,
            stdout,
            stderr,
        } = Command::new(&self.program)
            .args(args)
            .current_dir(workspace)
            .output()?;

        if !status.success() {
            return Err(Error::VersionControl {
                command,
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

impl VersionControl for GitCli {
    fn is_repository(&self, workspace: &Path) -> bool {
        workspace.join(".git").exists()
    }

    fn short_revision(&mut self, workspace: &Path) -> Result<String> {
        let revision = self.run(workspace, &["log", "-1", "--pretty=format:%h"])?;
        Ok(revision.trim().to_owned())
    }

    fn is_dirty(&mut self, workspace: &Path) -> Result<bool> {
        let status = self.run(workspace, &["status", "--porcelain"])?;
        Ok(!status.trim().is_empty())
    }
}
