//! # Pool Subcommand
//!
//! Refreshes the cached shared token pool from the remote directory, or
//! lists the cached pool by fingerprint.

use anyhow::Result;
use clap::{Args, Subcommand};
use genrelay_core::{CandidateToken, Provenance};

use crate::Session;

/// Arguments for the `genrelay pool` subcommand.
#[derive(Args, Debug)]
pub struct PoolArgs {
    #[command(subcommand)]
    pub command: PoolCommand,
}

/// Pool subcommands.
#[derive(Subcommand, Debug)]
pub enum PoolCommand {
    /// Replace the cached pool with the most recent shared tokens.
    Refresh {
        /// How many tokens to fetch. Defaults to the configured pool size.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List cached pool tokens by fingerprint.
    Show,
}

/// Execute the pool subcommand.
pub async fn run_pool(args: &PoolArgs, session: &Session) -> Result<u8> {
    match &args.command {
        PoolCommand::Refresh { limit } => {
            let limit = limit.unwrap_or(session.config.pool_size);
            let dispatcher = session.dispatcher()?;
            let tokens = dispatcher.token_resolver().refresh_pool(limit).await?;
            println!("OK: cached {} shared tokens", tokens.len());
            Ok(0)
        }
        PoolCommand::Show => {
            let tokens = session.cache.token_pool()?;
            if tokens.is_empty() {
                println!("pool is empty");
            }
            for line in fingerprints(&tokens) {
                println!("{line}");
            }
            Ok(0)
        }
    }
}

fn fingerprints(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let fp = CandidateToken::new(t.as_str(), Provenance::PoolRandom).fingerprint();
            format!("{}. {fp}", i + 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::session;

    #[test]
    fn fingerprints_never_print_tokens() {
        let lines = fingerprints(&["abc".to_string()]);
        assert_eq!(lines, vec!["1. ba7816bf8f01"]);
    }

    #[tokio::test]
    async fn refresh_without_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = PoolArgs {
            command: PoolCommand::Refresh { limit: Some(5) },
        };
        let err = run_pool(&args, &session(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn show_reads_cached_pool() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        session.cache.set_token_pool(&["abc".to_string()]).unwrap();
        let args = PoolArgs {
            command: PoolCommand::Show,
        };
        assert_eq!(run_pool(&args, &session).await.unwrap(), 0);
    }
}
