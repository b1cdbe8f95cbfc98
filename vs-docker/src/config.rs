use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::errors::{Error, Result};

pub const CONFIG_FILE_NAMES: &[&str] = &[".vs-docker.yml", ".vs-docker.yaml"];

const DEFAULT_DOCKERFILE: &str = "Dockerfile";
const DEFAULT_SHELL: &str = "/bin/sh";
const DEFAULT_WATCH_INTERVAL_MS: u64 = 1000;

/// Settings read from `.vs-docker.yml`. Every field is optional; command line
/// flags are merged on top with [`Config::merge`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub image_name: Option<String>,
    pub image_user: Option<String>,
    pub image_version: Option<String>,
    pub registry: Option<String>,
    pub auth_config_path: Option<PathBuf>,
    #[serde(default)]
    pub autorun: bool,
    pub dockerfile: Option<String>,
    pub shell: Option<String>,
    pub watch_interval: Option<u64>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;
        info!("loaded config from {:?}", path);

        Ok(config)
    }

    /// Values set in `overrides` win; unset ones fall back to `self`.
    pub fn merge(self, overrides: Config) -> Config {
        Config {
            image_name: overrides.image_name.or(self.image_name),
            image_user: overrides.image_user.or(self.image_user),
            image_version: overrides.image_version.or(self.image_version),
            registry: overrides.registry.or(self.registry),
            auth_config_path: overrides.auth_config_path.or(self.auth_config_path),
            autorun: overrides.autorun || self.autorun,
            dockerfile: overrides.dockerfile.or(self.dockerfile),
            shell: overrides.shell.or(self.shell),
            watch_interval: overrides.watch_interval.or(self.watch_interval),
        }
    }

    pub fn dockerfile(&self) -> &str {
        non_empty(&self.dockerfile).unwrap_or(DEFAULT_DOCKERFILE)
    }

    pub fn shell(&self) -> &str {
        non_empty(&self.shell).unwrap_or(DEFAULT_SHELL)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval.unwrap_or(DEFAULT_WATCH_INTERVAL_MS))
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

/// Looks for a config file in `path` and its ancestors.
pub fn find_config_file<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    for path in path.as_ref().ancestors() {
        for name in CONFIG_FILE_NAMES {
            let config_path = path.join(name);
            if config_path.exists() {
                return Some(config_path);
            }
        }
    }

    None
}

/// Registry credentials as stored in the file `authConfigPath` points to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub serveraddress: Option<String>,
    pub auth: Option<String>,
}

impl AuthConfig {
    pub fn load(path: &Path) -> Result<AuthConfig> {
        let file = File::open(path)?;
        serde_json::from_reader(file)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))
    }
}
