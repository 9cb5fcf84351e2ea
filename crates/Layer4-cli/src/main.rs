//! Harbor - container and VM lifecycle controller
//!
//! Usage:
//!   harbor run create name=web memory=512 cpu=1   One command, JSON result on stdout
//!   harbor shell                                   Line mode on stdin, one result per line
//!   harbor poll execute_script name=web file=x.sh progress async
//!                                                  Submit and follow a task to completion
//!   harbor policy                                  Print the active security policy

mod cli;

use clap::{Parser, Subcommand};
use harbor_foundation::{HarborConfig, SecurityMode};
use harbor_runtime::{Dispatcher, LifecycleController};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "harbor")]
#[command(author, version, about = "Harbor - container and VM lifecycle controller", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Load configuration from this file only (skips global/project merge)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Security mode override (permissive, moderate, strict)
    #[arg(short, long, global = true)]
    mode: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single operation, e.g. `harbor run start name=web`
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// Read operations from stdin, one per line
    Shell {
        /// Do not run the health monitor
        #[arg(long)]
        no_health: bool,
    },
    /// Run an operation that yields a task id and poll it until done
    Poll {
        /// Poll interval in milliseconds
        #[arg(short, long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// Print the active security policy
    Policy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => HarborConfig::load_from(path)?,
        None => HarborConfig::load()?,
    };
    if let Some(mode) = &args.mode {
        config = config.with_mode(mode.parse::<SecurityMode>()?);
    }
    tracing::debug!(mode = config.security.mode.as_str(), "Configuration loaded");

    let controller = LifecycleController::new(config)?;
    let dispatcher = Dispatcher::new(controller);

    let success = match args.command {
        Command::Run { words } => cli::run_once(&dispatcher, &words).await?,
        Command::Shell { no_health } => {
            let health = dispatcher.controller().config().health.enabled && !no_health;
            cli::run_shell(&dispatcher, health).await?;
            true
        }
        Command::Poll { interval, words } => {
            cli::run_and_wait(&dispatcher, &words, Duration::from_millis(interval)).await?
        }
        Command::Policy => {
            cli::print_json(dispatcher.controller().policy().policy())?;
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
