use fs2::FileExt;
use log::{debug, info};
use std::{
    env,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use crate::{
    errors::{Error, Result},
    models::ImageReference,
};

/// Exclusive per-image lock held for the lifetime of one command. Only the
/// lock is released on drop. The file stays, so every process contends on the
/// same inode.
#[derive(Debug)]
pub struct ImageLock {
    file: File,
    path: PathBuf,
}

impl Drop for ImageLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!("released lock {:?}", self.path);
    }
}

pub fn default_lock_dir() -> PathBuf {
    env::temp_dir().join("vs-docker")
}

fn lock_path(lock_dir: &Path, reference: &ImageReference) -> PathBuf {
    let key = blake3::hash(reference.to_string().as_bytes());
    lock_dir.join(format!("{}.lock", key.to_hex()))
}

/// Takes the lock for `reference` without blocking. A second invocation
/// against the same image gets [`Error::Busy`].
pub fn acquire(lock_dir: &Path, reference: &ImageReference) -> Result<ImageLock> {
    fs::create_dir_all(lock_dir)?;

    let path = lock_path(lock_dir, reference);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            info!("locked {} at {:?}", reference, path);
            Ok(ImageLock { file, path })
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            Err(Error::Busy(reference.to_string()))
        }
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            Err(Error::Busy(reference.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}
