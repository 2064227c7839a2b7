//! # Select-Server Subcommand
//!
//! Remembers the server the user prefers. The server resolver moves it to
//! the front of the candidate list when it survives device filtering.

use anyhow::{bail, Result};
use clap::Args;
use genrelay_core::CandidateServer;
use genrelay_dispatch::ServerRegistry;

use crate::Session;

/// Arguments for the `genrelay select-server` subcommand.
#[derive(Args, Debug)]
pub struct SelectServerArgs {
    /// Server base URL to prefer.
    #[arg(value_name = "URL", required_unless_present = "clear")]
    pub server: Option<String>,

    /// Forget the current selection.
    #[arg(long, conflicts_with = "server")]
    pub clear: bool,
}

/// Execute the select-server subcommand.
pub fn run_select_server(args: &SelectServerArgs, session: &Session) -> Result<u8> {
    if args.clear {
        session.cache.clear_selected_server()?;
        println!("OK: server selection cleared");
        return Ok(0);
    }

    let Some(raw) = args.server.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        bail!("a server URL is required");
    };
    let server = CandidateServer::new(raw);
    let registry = ServerRegistry::from_config(&session.config);
    if !registry.servers().contains(&server) {
        tracing::warn!(server = %server, "selected server is not in the configured registry");
    }
    session.cache.set_selected_server(server.base_url())?;
    println!("OK: selected {server}");
    Ok(0)
}
