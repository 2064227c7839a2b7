//! # genrelay CLI entry point
//!
//! Parses command-line arguments, initializes tracing, loads the session,
//! and dispatches to subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use genrelay_cli::pool::{run_pool, PoolArgs};
use genrelay_cli::profile::{run_profile, ProfileArgs};
use genrelay_cli::select_server::{run_select_server, SelectServerArgs};
use genrelay_cli::send::{run_send, SendArgs};
use genrelay_cli::servers::{run_servers, ServersArgs};
use genrelay_cli::Session;

/// genrelay: send requests through a fleet of proxy servers, rotating
/// across candidate tokens until one combination succeeds.
#[derive(Parser, Debug)]
#[command(name = "genrelay", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to a YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the state file holding the profile, selection, and pool.
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch one request through the proxy fleet.
    Send(SendArgs),

    /// Show the candidate servers a request would use.
    Servers(ServersArgs),

    /// Remember or forget a preferred server.
    SelectServer(SelectServerArgs),

    /// Manage the cached user profile.
    Profile(ProfileArgs),

    /// Manage the shared token pool.
    Pool(PoolArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    // stdout carries command output; logs go to stderr.
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::debug!("genrelay CLI v{} starting", env!("CARGO_PKG_VERSION"));

    let session = match Session::load(cli.config.as_deref(), cli.state_file.as_deref()) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let result = match &cli.command {
        Commands::Send(args) => run_send(args, &session).await,
        Commands::Servers(args) => run_servers(args, &session),
        Commands::SelectServer(args) => run_select_server(args, &session),
        Commands::Profile(args) => run_profile(args, &session),
        Commands::Pool(args) => run_pool(args, &session).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
