#![deny(missing_docs)]

//! # genrelay-core -- Foundational Types for genrelay
//!
//! This crate defines the types every other genrelay crate depends on. It has
//! no internal crate dependencies and no I/O beyond the file-backed cache.
//!
//! ## Design Principles
//!
//! 1. **A request is immutable once submitted.** [`DispatchRequest`] is built
//!    up front and passed by reference into the dispatcher.
//!
//! 2. **Tokens never leak through `Debug` or logs.** [`CandidateToken`] keeps
//!    its value in a zeroizing buffer and exposes a short SHA-256
//!    [`fingerprint`](CandidateToken::fingerprint) for diagnostics.
//!
//! 3. **State lives behind an injected cache.** The current user, the
//!    user-selected server and the token pool are read and written through
//!    [`KeyValueStore`], so resolvers are testable without any ambient storage.
//!
//! 4. **[`CoreError`] hierarchy.** Structured errors with `thiserror`, no
//!    `.unwrap()` outside tests.

pub mod attempt;
pub mod error;
pub mod profile;
pub mod request;
pub mod server;
pub mod store;
pub mod token;

pub use attempt::{Attempt, AttemptStatus};
pub use error::{CoreError, StateTransitionError};
pub use profile::UserProfile;
pub use request::{DispatchRequest, ServiceType};
pub use server::CandidateServer;
pub use store::{FileStore, KeyValueStore, MemoryStore, RelayCache};
pub use token::{CandidateToken, Provenance};
