//! # Servers Subcommand
//!
//! Prints the candidate servers a request would be sent to, before
//! shuffling. Useful to check device filtering, the user-selected server,
//! and local development detection.

use anyhow::Result;
use clap::Args;
use genrelay_core::{DispatchRequest, ServiceType};
use genrelay_dispatch::ServerPlan;

use crate::Session;

/// Arguments for the `genrelay servers` subcommand.
#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Service the request would target.
    #[arg(long, default_value = "secondary")]
    pub service: ServiceType,

    /// Resolve as if the request carried this override server.
    #[arg(long)]
    pub server: Option<String>,
}

/// Execute the servers subcommand.
pub fn run_servers(args: &ServersArgs, session: &Session) -> Result<u8> {
    let plan = resolve(args, session)?;
    for line in render(&plan) {
        println!("{line}");
    }
    Ok(0)
}

fn resolve(args: &ServersArgs, session: &Session) -> Result<ServerPlan> {
    let dispatcher = session.dispatcher()?;
    let user = session.cache.current_user()?;
    let mut request = DispatchRequest::new(args.service, "/", serde_json::Value::Null, "inspect");
    if let Some(server) = &args.server {
        request = request.with_override_server(server);
    }
    Ok(dispatcher.server_resolver().resolve(&request, user.as_ref()))
}

fn render(plan: &ServerPlan) -> Vec<String> {
    plan.servers
        .iter()
        .enumerate()
        .map(|(i, server)| {
            let note = if plan.local_override {
                "  (local development)"
            } else if plan.promoted && i == 0 {
                "  (selected)"
            } else {
                ""
            };
            format!("{}. {}{}", i + 1, server, note)
        })
        .collect()
}
