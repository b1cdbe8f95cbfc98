use anyhow::{anyhow, Context, Result};
use log::info;
use std::{
    env,
    path::{Path, PathBuf},
};
use structopt::StructOpt;

use backends::{DockerBackend, GitCli};
use config::{find_config_file, Config};
use console::Console;
use controller::{Controller, RunMode, RunOptions};
use frontends::DockerfileFrontend;
use models::ImageReference;
use prompt::{AssumeYes, TerminalConfirm};
use services::Confirm;
use watch::Watcher;

mod backends;
mod config;
mod console;
mod controller;
mod errors;
mod frontends;
mod hasher;
mod identity;
mod lock;
mod models;
mod prompt;
mod services;
mod watch;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "vs-docker",
    about = "Build, run and inspect the Docker container of the current workspace."
)]
struct Opt {
    #[structopt(flatten)]
    overrides: Overrides,

    #[structopt(short, long, global = true)]
    /// Answer yes to every confirmation.
    yes: bool,

    #[structopt(subcommand)]
    command: Command,
}

/// Flags that take precedence over `.vs-docker.yml`.
#[derive(Debug, StructOpt)]
struct Overrides {
    #[structopt(long, global = true)]
    /// Image name, defaults to the workspace directory name.
    image_name: Option<String>,

    #[structopt(long, global = true)]
    image_user: Option<String>,

    #[structopt(long, global = true)]
    /// Image tag, defaults to the git revision or `latest`.
    image_version: Option<String>,

    #[structopt(long, global = true)]
    registry: Option<String>,

    #[structopt(long, global = true, parse(from_os_str))]
    /// JSON file with registry credentials, used by push.
    auth_config: Option<PathBuf>,

    #[structopt(long, global = true)]
    dockerfile: Option<String>,

    #[structopt(long, global = true)]
    /// Shell started by exec.
    shell: Option<String>,
}

impl Overrides {
    fn into_config(self) -> Config {
        Config {
            image_name: self.image_name,
            image_user: self.image_user,
            image_version: self.image_version,
            registry: self.registry,
            auth_config_path: self.auth_config,
            autorun: false,
            dockerfile: self.dockerfile,
            shell: self.shell,
            watch_interval: None,
        }
    }
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Builds the workspace image.
    Build {
        #[structopt(short, long)]
        /// Don't print build output.
        quiet: bool,
    },
    /// Builds the image and starts a container, replacing a running one.
    Run {
        #[structopt(short, long)]
        quiet: bool,

        #[structopt(short, long)]
        /// Don't follow the container logs.
        detach: bool,

        #[structopt(long)]
        /// Replace a running container without asking.
        autorun: bool,
    },
    /// Shows the running container of the workspace image.
    Find,
    /// Stops the running container of the workspace image.
    Kill,
    /// Pushes the workspace image to its registry.
    Push,
    /// Follows the logs of the running container.
    Logs,
    /// Opens a shell in the running container.
    Exec {
        #[structopt(short, long)]
        quiet: bool,
    },
    /// Rebuilds and restarts the container whenever the workspace changes.
    Watch {
        #[structopt(long)]
        /// Watch even if autorun is disabled in the config.
        force: bool,

        #[structopt(long)]
        /// Poll interval in milliseconds.
        interval: Option<u64>,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init_custom_env("LOG");

    let opt = Opt::from_args();

    let current_dir = env::current_dir()?;
    let (workspace, file_config) = match find_config_file(&current_dir) {
        Some(config_path) => {
            info!("found config file {:?}", config_path);
            let workspace = config_path
                .parent()
                .ok_or_else(|| anyhow!("Config file has no parent."))?
                .to_path_buf();
            (workspace, Config::load(&config_path)?)
        }
        None => (current_dir, Config::default()),
    };
    info!("found workspace {:?}", workspace);

    let mut overrides = opt.overrides.into_config();
    if let Command::Watch { interval, .. } = &opt.command {
        overrides.watch_interval = *interval;
    }
    let config = file_config.merge(overrides);

    let auth_config_path = config
        .auth_config_path
        .as_ref()
        .map(|path| workspace.join(path));
    let backend = DockerBackend::connect(auth_config_path.as_deref())
        .context("couldn't connect to the docker daemon")?;
    info!("connected to docker");

    let confirm: Box<dyn Confirm> = if opt.yes {
        Box::new(AssumeYes)
    } else {
        Box::new(TerminalConfirm)
    };

    let mut controller = Controller::init(
        workspace.clone(),
        backend,
        DockerfileFrontend::new(),
        confirm,
        Console::stdout(),
    )
    .with_dockerfile(config.dockerfile())
    .with_shell(config.shell());

    let result = execute(&mut controller, &workspace, &config, opt.command);
    controller.shutdown()?;

    result
}

fn resolve(workspace: &Path, config: &Config) -> Result<ImageReference> {
    let reference = identity::resolve(workspace, config, &mut GitCli::new())
        .context("couldn't resolve the image name")?;
    Ok(reference)
}

fn execute(
    controller: &mut Controller,
    workspace: &Path,
    config: &Config,
    command: Command,
) -> Result<()> {
    let lock_dir = lock::default_lock_dir();

    match command {
        Command::Build { quiet } => {
            let reference = resolve(workspace, config)?;
            let _lock = lock::acquire(&lock_dir, &reference)?;

            let outcome = controller.build(&reference, quiet)?;
            if !outcome.succeeded {
                let detail = outcome.detail.unwrap_or_default();
                return Err(anyhow!("Build failed: {}", detail));
            }
        }
        Command::Run {
            quiet,
            detach,
            autorun,
        } => {
            let reference = resolve(workspace, config)?;
            let _lock = lock::acquire(&lock_dir, &reference)?;

            let mode = if autorun {
                RunMode::Autorun
            } else {
                RunMode::Manual
            };
            controller.run(
                &reference,
                &RunOptions {
                    mode,
                    quiet,
                    detach,
                },
            )?;
        }
        Command::Find => {
            let reference = resolve(workspace, config)?;
            match controller.find_container(&reference)? {
                Some(container) => controller
                    .console()
                    .info(&format!("Found container: {}", container.id.0))?,
                None => controller
                    .console()
                    .info(&format!("No container is running {}", reference))?,
            }
        }
        Command::Kill => {
            let reference = resolve(workspace, config)?;
            let _lock = lock::acquire(&lock_dir, &reference)?;
            controller.kill(&reference)?;
        }
        Command::Push => {
            let reference = resolve(workspace, config)?;
            let _lock = lock::acquire(&lock_dir, &reference)?;
            controller.push(&reference)?;
        }
        Command::Logs => {
            let reference = resolve(workspace, config)?;
            controller.logs(&reference)?;
        }
        Command::Exec { quiet } => {
            let reference = resolve(workspace, config)?;
            let lock = lock::acquire(&lock_dir, &reference)?;
            // The shell can stay open for hours, only starting needs the lock.
            let id = controller.ensure_running(&reference, quiet)?;
            drop(lock);

            if let Some(id) = id {
                controller.exec(&id)?;
            }
        }
        Command::Watch { force, .. } => {
            if !config.autorun && !force {
                return Err(anyhow!(
                    "autorun is disabled, set `autorun: true` in .vs-docker.yml or pass --force"
                ));
            }
            watch(controller, workspace, config)?;
        }
    }

    Ok(())
}

/// Runs in autorun mode after every change. Failures are reported and the
/// watcher keeps going.
fn watch(controller: &mut Controller, workspace: &Path, config: &Config) -> Result<()> {
    let lock_dir = lock::default_lock_dir();
    let mut watcher = Watcher::new(workspace, config.watch_interval())?;
    controller
        .console()
        .info(&format!("Watching {} for changes", workspace.display()))?;

    let options = RunOptions {
        mode: RunMode::Autorun,
        quiet: true,
        detach: true,
    };

    loop {
        watcher.wait_for_change()?;

        let result = resolve(workspace, config).and_then(|reference| {
            let _lock = lock::acquire(&lock_dir, &reference)?;
            controller.run(&reference, &options)?;
            Ok(())
        });

        if let Err(err) = result {
            controller.console().error(&format!("{:#}", err))?;
        }
    }
}
