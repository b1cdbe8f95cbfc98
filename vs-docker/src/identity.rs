use log::info;
use std::path::Path;

use crate::{
    config::{non_empty, Config},
    errors::{Error, Result},
    models::{ImageReference, DEFAULT_VERSION},
    services::VersionControl,
};

const DIRTY_SUFFIX: &str = "-dirty";

/// Computes the image reference for `workspace`. Called once per command,
/// never cached.
pub fn resolve(
    workspace: &Path,
    config: &Config,
    vcs: &mut dyn VersionControl,
) -> Result<ImageReference> {
    let name = match non_empty(&config.image_name) {
        Some(name) => name.to_owned(),
        None => workspace
            .file_name()
            .and_then(|name| name.to_str())
            .map(String::from)
            .ok_or_else(|| {
                Error::Config(format!(
                    "couldn't derive an image name from {:?}",
                    workspace
                ))
            })?,
    };

    let version = match non_empty(&config.image_version) {
        Some(version) => version.to_owned(),
        None if !vcs.is_repository(workspace) => DEFAULT_VERSION.to_owned(),
        None => {
            let mut version = vcs.short_revision(workspace)?;
            if vcs.is_dirty(workspace)? {
                version.push_str(DIRTY_SUFFIX);
            }
            version
        }
    };

    let reference = ImageReference::new(
        config.registry.clone(),
        config.image_user.clone(),
        name,
        Some(version),
    )?;
    info!("resolved image reference {}", reference);

    Ok(reference)
}
