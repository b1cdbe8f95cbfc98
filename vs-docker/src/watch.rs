use ignore::WalkBuilder;
use log::{debug, info};
use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crate::{errors::Result, hasher::DigestHasher};

/// Digest over the path, size and modification time of every file that
/// would end up in the build context. Directories are skipped since their
/// mtime moves whenever an ignored file is written.
pub fn workspace_digest(workspace: &Path) -> Result<blake3::Hash> {
    let walk = WalkBuilder::new(workspace)
        .add_custom_ignore_filename(".dockerignore")
        .ignore(false)
        .git_global(false)
        .git_ignore(false)
        .git_exclude(false)
        .hidden(false)
        .filter_entry(|entry| entry.file_name() != OsStr::new(".git"))
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut hasher = blake3::Hasher::new();
    for result in walk {
        let entry = result.map_err(io::Error::other)?;
        let metadata = entry.metadata().map_err(io::Error::other)?;
        if !metadata.is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(workspace).unwrap_or(entry.path());

        hasher.input((relative, metadata.len(), metadata.modified().ok()));
    }

    Ok(hasher.finalize())
}

/// Polls the workspace and reports when it changed. Saves made while the
/// caller is busy are coalesced into a single change.
pub struct Watcher {
    workspace: PathBuf,
    interval: Duration,
    last: blake3::Hash,
}

impl Watcher {
    pub fn new(workspace: impl Into<PathBuf>, interval: Duration) -> Result<Watcher> {
        let workspace = workspace.into();
        let last = workspace_digest(&workspace)?;

        Ok(Watcher {
            workspace,
            interval,
            last,
        })
    }

    pub fn poll(&mut self) -> Result<bool> {
        let digest = workspace_digest(&self.workspace)?;
        if digest == self.last {
            return Ok(false);
        }

        debug!("workspace digest changed to {}", digest.to_hex());
        self.last = digest;
        Ok(true)
    }

    pub fn wait_for_change(&mut self) -> Result<()> {
        loop {
            thread::sleep(self.interval);
            if self.poll()? {
                info!("change detected in {:?}", self.workspace);
                return Ok(());
            }
        }
    }
}
