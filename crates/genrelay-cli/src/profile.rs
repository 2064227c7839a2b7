//! # Profile Subcommand
//!
//! Manages the cached current-user record the token and server resolvers
//! read: id, username, personal token, and an optional scoped server list.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use genrelay_core::{CandidateToken, Provenance, UserProfile};
use serde_json::json;

use crate::Session;

/// Arguments for the `genrelay profile` subcommand.
#[derive(Args, Debug)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommand,
}

/// Profile subcommands.
#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Create or update the cached profile.
    Set {
        /// User id in the remote directory.
        #[arg(long)]
        id: Option<String>,
        /// Username sent with every request.
        #[arg(long)]
        username: Option<String>,
        /// Personal bearer token.
        #[arg(long)]
        token: Option<String>,
        /// Restrict this user to these servers. Repeatable.
        #[arg(long = "server", value_name = "URL")]
        servers: Vec<String>,
        /// Remove the personal token.
        #[arg(long, conflicts_with = "token")]
        clear_token: bool,
    },

    /// Print the cached profile with the token redacted.
    Show,

    /// Forget the cached profile.
    Clear,
}

/// Execute the profile subcommand.
pub fn run_profile(args: &ProfileArgs, session: &Session) -> Result<u8> {
    match &args.command {
        ProfileCommand::Set {
            id,
            username,
            token,
            servers,
            clear_token,
        } => {
            let existing = session.cache.current_user()?;
            let Some(mut user) = existing.or_else(|| new_profile(id.as_deref(), username.as_deref()))
            else {
                bail!("no cached profile; pass --id and --username to create one");
            };
            if let Some(id) = id {
                user.id = id.trim().to_string();
            }
            if let Some(username) = username {
                user.username = username.trim().to_string();
            }
            if let Some(token) = token {
                user.personal_token = Some(token.trim().to_string());
            }
            if *clear_token {
                user.personal_token = None;
            }
            if !servers.is_empty() {
                user.servers = servers.clone();
            }
            session.cache.set_current_user(&user)?;
            println!("OK: profile saved for {}", user.username);
            Ok(0)
        }
        ProfileCommand::Show => match session.cache.current_user()? {
            Some(user) => {
                println!("{}", serde_json::to_string_pretty(&redacted(&user))?);
                Ok(0)
            }
            None => {
                println!("NOT FOUND: no cached profile");
                Ok(1)
            }
        },
        ProfileCommand::Clear => {
            session.cache.clear_current_user()?;
            println!("OK: profile cleared");
            Ok(0)
        }
    }
}

fn new_profile(id: Option<&str>, username: Option<&str>) -> Option<UserProfile> {
    match (id, username) {
        (Some(id), Some(username)) => Some(UserProfile::new(id.trim(), username.trim())),
        _ => None,
    }
}

fn redacted(user: &UserProfile) -> serde_json::Value {
    let token = user
        .personal_token()
        .map(|t| CandidateToken::new(t, Provenance::Personal).fingerprint());
    json!({
        "id": user.id,
        "username": user.username,
        "personal_token_fingerprint": token,
        "servers": user.servers,
    })
}
