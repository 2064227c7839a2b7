//! # Server Resolver
//!
//! Produces the ordered candidate server list for a request. Steps, each
//! overriding the ones below it:
//!
//! 1. A local development runtime collapses the list to the fixed local
//!    endpoint.
//! 2. An override server on the request is used as-is.
//! 3. Otherwise the user-scoped list (or the static registry) is filtered by
//!    device class: the designated class keeps only the designated subset,
//!    every other class keeps its complement. An empty result falls back to
//!    the unfiltered list.
//! 4. A cached user-selected server still present after filtering is copied
//!    to the front. The original entry stays where it was.

use std::collections::HashSet;
use std::sync::Arc;

use genrelay_core::{CandidateServer, DispatchRequest, RelayCache, UserProfile};

use crate::config::{RelayConfig, DEFAULT_SERVERS};
use crate::environment::{DeviceClassifier, RuntimeEnvironment};

/// Static server list partitioned into a designated subset and the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRegistry {
    servers: Vec<CandidateServer>,
    designated: HashSet<CandidateServer>,
}

impl ServerRegistry {
    /// Build a registry. `designated` entries need not appear in `servers`.
    pub fn new<S, D>(servers: S, designated: D) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Self {
            servers: servers.into_iter().map(CandidateServer::new).collect(),
            designated: designated.into_iter().map(CandidateServer::new).collect(),
        }
    }

    /// Registry from configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(&config.servers, &config.designated_servers)
    }

    /// All servers, in registry order.
    pub fn servers(&self) -> &[CandidateServer] {
        &self.servers
    }

    /// Whether `server` belongs to the designated subset.
    pub fn is_designated(&self, server: &CandidateServer) -> bool {
        self.designated.contains(server)
    }
}

/// Ordered servers for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPlan {
    /// Candidates in resolution order.
    pub servers: Vec<CandidateServer>,
    /// Whether a user-selected server was copied to the front.
    pub promoted: bool,
    /// Whether the local development endpoint replaced everything else.
    pub local_override: bool,
}

impl ServerPlan {
    fn plain(servers: Vec<CandidateServer>) -> Self {
        Self {
            servers,
            promoted: false,
            local_override: false,
        }
    }
}

/// Resolves candidate servers for requests.
#[derive(Clone)]
pub struct ServerResolver {
    registry: ServerRegistry,
    device: Arc<dyn DeviceClassifier>,
    cache: RelayCache,
    environment: RuntimeEnvironment,
    local_endpoint: CandidateServer,
    dev_hostnames: Vec<String>,
    dev_ports: Vec<u16>,
}

impl std::fmt::Debug for ServerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerResolver")
            .field("registry", &self.registry)
            .field("designated_device", &self.device.is_designated())
            .field("environment", &self.environment)
            .field("local_endpoint", &self.local_endpoint)
            .finish()
    }
}

impl ServerResolver {
    /// Resolver with the local-development settings from `config`.
    pub fn new(
        config: &RelayConfig,
        registry: ServerRegistry,
        device: Arc<dyn DeviceClassifier>,
        cache: RelayCache,
        environment: RuntimeEnvironment,
    ) -> Self {
        Self {
            registry,
            device,
            cache,
            environment,
            local_endpoint: CandidateServer::new(&config.local_endpoint),
            dev_hostnames: config.dev_hostnames.clone(),
            dev_ports: config.dev_ports.clone(),
        }
    }

    /// The registry in use.
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Ordered candidate servers for `request`.
    pub fn resolve(&self, request: &DispatchRequest, current_user: Option<&UserProfile>) -> ServerPlan {
        if self
            .environment
            .is_local_development(&self.dev_hostnames, &self.dev_ports)
        {
            tracing::debug!(endpoint = %self.local_endpoint, "local development runtime, using local endpoint");
            return ServerPlan {
                servers: vec![self.local_endpoint.clone()],
                promoted: false,
                local_override: true,
            };
        }

        if let Some(server) = request.override_server() {
            return ServerPlan::plain(vec![CandidateServer::new(server)]);
        }

        let scoped = self.scoped(current_user);
        let mut servers = self.filter_by_device(&scoped);
        if servers.is_empty() {
            tracing::debug!("device filter left no servers, using unfiltered list");
            servers = scoped;
        }
        if servers.is_empty() {
            servers = DEFAULT_SERVERS.iter().map(CandidateServer::new).collect();
        }

        let promoted = match self.selected_server() {
            Some(selected) if servers.contains(&selected) => {
                tracing::debug!(server = %selected, "promoting user-selected server");
                servers.insert(0, selected);
                true
            }
            _ => false,
        };

        ServerPlan {
            servers,
            promoted,
            local_override: false,
        }
    }

    /// Registry servers, or the user-scoped list when the user carries one.
    fn scoped(&self, current_user: Option<&UserProfile>) -> Vec<CandidateServer> {
        let user_servers: Vec<CandidateServer> = current_user
            .map(|u| {
                u.servers
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(CandidateServer::new)
                    .collect()
            })
            .unwrap_or_default();
        if user_servers.is_empty() {
            self.registry.servers().to_vec()
        } else {
            user_servers
        }
    }

    fn filter_by_device(&self, servers: &[CandidateServer]) -> Vec<CandidateServer> {
        let designated_device = self.device.is_designated();
        servers
            .iter()
            .filter(|s| self.registry.is_designated(s) == designated_device)
            .cloned()
            .collect()
    }

    fn selected_server(&self) -> Option<CandidateServer> {
        match self.cache.selected_server() {
            Ok(selected) => selected.map(CandidateServer::new),
            Err(e) => {
                tracing::warn!("ignoring unreadable selected server: {e}");
                None
            }
        }
    }
}
