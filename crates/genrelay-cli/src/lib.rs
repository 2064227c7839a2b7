//! # genrelay-cli -- Command-line front end for genrelay
//!
//! Provides the `genrelay` binary. State that a browser session would hold
//! (current user, selected server, token pool) lives in a JSON state file.
//!
//! ## Subcommands
//!
//! - `genrelay send`: Dispatch one request and print the result.
//! - `genrelay servers`: Show the candidate servers a request would use.
//! - `genrelay select-server`: Remember or forget a preferred server.
//! - `genrelay profile`: Set, show, or clear the cached user profile.
//! - `genrelay pool`: Refresh or show the shared token pool.
//!
//! ```bash
//! genrelay profile set --id u-1 --username ana --token "$TOKEN"
//! genrelay send --service secondary --path /generate --context "recipe generation" \
//!     --body '{"prompt": "a lighthouse at dusk"}'
//! ```

pub mod pool;
pub mod profile;
pub mod select_server;
pub mod send;
pub mod servers;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use genrelay_core::{FileStore, RelayCache};
use genrelay_dispatch::{Dispatcher, RelayConfig};

/// Environment variable naming the state file.
pub const STATE_FILE_ENV: &str = "GENRELAY_STATE_FILE";

/// Exit code for a request that could not be authenticated.
pub const EXIT_AUTH: u8 = 2;
/// Exit code for a request rejected upstream.
pub const EXIT_REJECTED: u8 = 3;
/// Exit code for a request whose combinations were all exhausted.
pub const EXIT_EXHAUSTED: u8 = 4;

/// Loaded configuration plus the state-file cache.
#[derive(Debug, Clone)]
pub struct Session {
    /// Effective configuration.
    pub config: RelayConfig,
    /// Cache backed by the state file.
    pub cache: RelayCache,
    /// Location of the state file.
    pub state_file: PathBuf,
}

impl Session {
    /// Load configuration from `config_path` (if any) and the environment,
    /// and open the state file.
    pub fn load(config_path: Option<&Path>, state_file: Option<&Path>) -> Result<Self> {
        let config = RelayConfig::load(config_path).context("failed to load configuration")?;
        let state_file = state_file
            .map(Path::to_path_buf)
            .unwrap_or_else(default_state_file);
        tracing::debug!(state_file = %state_file.display(), "using state file");
        Ok(Self::with_config(config, state_file))
    }

    /// Session over an explicit configuration.
    pub fn with_config(config: RelayConfig, state_file: PathBuf) -> Self {
        let cache = RelayCache::new(Arc::new(FileStore::new(&state_file)));
        Self {
            config,
            cache,
            state_file,
        }
    }

    /// Build a dispatcher sharing this session's cache.
    pub fn dispatcher(&self) -> Result<Dispatcher> {
        Dispatcher::builder(self.config.clone())
            .with_cache(self.cache.clone())
            .build()
            .context("failed to build dispatcher")
    }
}

/// `$GENRELAY_STATE_FILE`, else `~/.genrelay/state.json`, else
/// `.genrelay-state.json` in the current directory.
pub fn default_state_file() -> PathBuf {
    if let Some(path) = std::env::var_os(STATE_FILE_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    match std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        Some(home) => PathBuf::from(home).join(".genrelay").join("state.json"),
        None => PathBuf::from(".genrelay-state.json"),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Session over a fresh state file in `dir` with no remote store.
    pub fn session(dir: &Path) -> Session {
        Session::with_config(RelayConfig::default(), dir.join("state.json"))
    }
}
