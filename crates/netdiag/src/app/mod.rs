#![expect(clippy::print_stderr, reason = "CLI errors are emitted here")]

//! CLI application layer and composition root wiring.

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;

pub mod commands;
pub mod server;

use crate::app::commands::Cli;
use crate::app::commands::Commands;
use crate::app::commands::ServeArgs;
use crate::app::server::ServerError;
use crate::infra::LogSettings;
use crate::infra::ServerConfig;
use crate::infra::SignalHandler;
use crate::infra::init_tracing;

const PROGRAM_NAME: &str = "netdiag";

/// Process exit codes.
mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
}

pub struct Application;

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self) -> Result<i32> {
        let exit_code = match self.execute() {
            Ok(()) => exit_codes::SUCCESS,
            Err(e) => self.handle_error(e),
        };
        Ok(exit_code)
    }

    fn execute(&self) -> Result<()> {
        let cli = Cli::parse();
        let _telemetry = init_tracing(&LogSettings::from_env().with_verbose(cli.verbose));
        debug!(command = ?cli.command, "CLI command parsed");

        match cli.command {
            Commands::Serve(args) => serve(args),
        }
    }

    fn handle_error(&self, e: anyhow::Error) -> i32 {
        eprintln!("{PROGRAM_NAME}: Error: {e:#}");
        if let Some(server_error) = e.downcast_ref::<ServerError>() {
            eprintln!("Suggestion: {}", server_error.suggestion());
        }
        exit_codes::GENERAL_ERROR
    }
}

fn config_for(args: ServeArgs) -> ServerConfig {
    let mut config = ServerConfig::from_env();
    if let Some(listen) = args.listen {
        config = config.with_listen(listen);
    }
    if args.allow_remote {
        config = config.with_allow_remote(true);
    }
    if let Some(max) = args.max_connections {
        config = config.with_max_connections(max);
    }
    config
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = config_for(args);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let _signals = SignalHandler::setup(shutdown_tx.clone())
            .context("Failed to install signal handler")?;

        let handle = server::start_server(config, shutdown_rx).await?;
        info!(addr = %handle.local_addr(), "Press Ctrl+C to stop");
        handle.wait().await?;
        drop(shutdown_tx);
        Ok::<(), anyhow::Error>(())
    })
}
