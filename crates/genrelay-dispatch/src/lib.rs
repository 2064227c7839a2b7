//! # genrelay-dispatch -- Proxied request dispatcher
//!
//! Delivers JSON requests to an upstream service through a fleet of proxy
//! servers, rotating across candidate bearer tokens:
//! - **Token Resolver** ranks tokens: explicit, then personal, then the shared pool.
//! - **Server Resolver** ranks proxies, filtered by device class and local development.
//! - **Dispatcher** walks the server×token cross-product within a retry budget.
//!
//! Plus the remote store collaborators: token directory, slot reservation,
//! and the failure table.
//!
//! ## Request Path Convention
//!
//! Every attempt is `POST {server}/api/{service_type}{relative_path}` with a
//! bearer token and the `x-user-username` header. The body is the caller's
//! JSON, sent verbatim.
//!
//! ## Error Classification
//!
//! HTTP 400 and content-safety markers are fatal and end the dispatch.
//! Transport failures, other non-2xx responses, and non-JSON bodies move on to
//! the next combination. See [`classify`].

pub mod classify;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod failure_log;
pub mod rest;
pub(crate) mod retry;
pub mod servers;
pub mod shuffle;
pub mod slots;
pub mod tokens;

pub use config::{LookupPolicy, RelayConfig, RetryPolicy, ShuffleMode};
pub use directory::{RestTokenDirectory, TokenDirectory};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherBuilder};
pub use environment::{DeviceClassifier, RuntimeEnvironment, StaticDeviceClass, UserAgentClassifier};
pub use error::{AttemptError, DispatchError, RemoteError, SlotError};
pub use failure_log::{
    FailureKind, FailureLog, FailureRecord, MemoryFailureLog, RestFailureLog, TracingFailureLog,
};
pub use rest::RestStore;
pub use servers::{ServerPlan, ServerRegistry, ServerResolver};
pub use shuffle::{IdentityShuffle, RandomShuffle, ShuffleSource};
pub use slots::{LocalSlotReservation, RestSlotReservation, SlotReservation};
pub use tokens::TokenResolver;
