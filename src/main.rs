// main.rs
//
// CLI entry point: flags, logging, signal handling, exit codes

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use drydock::config::RunConfig;
use drydock::deployment::{DirectorDeploymentManager, HttpDirectorClient};
use drydock::artifact::ArtifactStore;
use drydock::logging;
use drydock::orchestrator::{Backuper, Error, Restorer};
use drydock::ssh::Ssh2Dialer;

#[derive(Parser)]
#[command(
    name = "drydock",
    about = "Backup and restore orchestrator for script-based deployment lifecycles"
)]
struct Cli {
    /// Director API base URL, e.g. https://192.168.50.4:25555
    #[arg(long)]
    target: String,

    /// Director API username
    #[arg(long)]
    username: String,

    /// Director API password
    #[arg(long)]
    password: String,

    /// Private key for SSH access to instances
    #[arg(long)]
    private_key_path: PathBuf,

    /// Accept self-signed director certificates
    #[arg(long)]
    allow_insecure: bool,

    /// Log every remote command and its output
    #[arg(long)]
    debug: bool,

    /// Optional JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Back up a deployment into a local artifact directory
    Backup {
        #[arg(long)]
        deployment: String,

        /// Only run the pre-checks, then clean up
        #[arg(long)]
        check: bool,
    },
    /// Restore a deployment from a local artifact directory
    Restore {
        #[arg(long)]
        deployment: String,

        /// Directory holding the artifact (defaults to ./<deployment>)
        #[arg(long)]
        artifact_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);

    match run(cli).await {
        Ok(errors) => {
            if !errors.is_empty() {
                eprintln!("{}", errors);
            }
            std::process::exit(errors.exit_code());
        }
        Err(err) => {
            let message = format!("Error: {:#}", err);
            eprintln!("{}", message.as_str().red());
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Error> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RunConfig::default(),
    };
    config.ssh_private_key = cli.private_key_path.clone();

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let director = Arc::new(
        HttpDirectorClient::new(
            &cli.target,
            &cli.username,
            &cli.password,
            cli.allow_insecure,
        )
        .context("building director client")?,
    );
    let dialer = Arc::new(Ssh2Dialer::new(
        config.ssh_username.clone(),
        config.ssh_private_key.clone(),
        config.ssh_port,
        config.command_timeout(),
        cancel.clone(),
    ));
    let manager = Arc::new(DirectorDeploymentManager::new(
        director,
        dialer,
        config.parallelism,
        config.external_blob_names.clone(),
    ));

    let errors = match cli.command {
        Command::Backup { deployment, check } => {
            let action = if check { "pre-check" } else { "backup" };
            logging::print_run_banner(action, &deployment);
            let store = ArtifactStore::new(&config.artifact_root);
            let backuper = Backuper::new(manager, store);
            if check {
                backuper.check(&deployment).await
            } else {
                backuper.backup(&deployment).await
            }
        }
        Command::Restore {
            deployment,
            artifact_path,
        } => {
            logging::print_run_banner("restore", &deployment);
            let store = match artifact_path {
                Some(path) => {
                    let dir_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    if dir_name != deployment {
                        warn!(
                            "Artifact directory {} is not named after deployment {}",
                            path.display(),
                            deployment
                        );
                    }
                    let root = path.parent().map(PathBuf::from).unwrap_or_default();
                    ArtifactStore::new(root)
                }
                None => ArtifactStore::new(&config.artifact_root),
            };
            let restorer = Restorer::new(manager, store);
            restorer.restore(&deployment).await
        }
    };

    Ok(errors)
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received; canceling in-flight commands");
            cancel.cancel();
        }
    });
}
