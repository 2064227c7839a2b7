//! # Attempt State Machine
//!
//! One (server, token) pairing tried during a dispatch.
//!
//! ```text
//! Pending ──► Success            (terminal for the dispatch)
//!    │
//!    ├──────► FatalFailure       (terminal for the dispatch)
//!    │
//!    └──────► RetriableFailure   (terminal for this attempt only)
//! ```
//!
//! Every state other than `Pending` is final for the attempt; any further
//! transition is rejected with [`StateTransitionError::InvalidTransition`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;
use crate::server::CandidateServer;
use crate::token::{CandidateToken, Provenance};

/// Status of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptStatus {
    /// Request not yet classified.
    Pending,
    /// 2xx with a usable body.
    Success,
    /// Failed in a way another combination may fix.
    RetriableFailure,
    /// Content rejected; no other combination will be tried.
    FatalFailure,
}

impl AttemptStatus {
    /// Whether this status ends the whole dispatch.
    pub fn ends_dispatch(&self) -> bool {
        matches!(self, Self::Success | Self::FatalFailure)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Success => write!(f, "Success"),
            Self::RetriableFailure => write!(f, "RetriableFailure"),
            Self::FatalFailure => write!(f, "FatalFailure"),
        }
    }
}

/// Record of one attempt. Holds the token fingerprint, never the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based attempt counter within the dispatch.
    pub number: u32,
    /// Server the attempt was sent to.
    pub server: CandidateServer,
    /// Provenance of the token used.
    pub provenance: Provenance,
    /// Fingerprint of the token used.
    pub token_fingerprint: String,
    /// Current status.
    pub status: AttemptStatus,
    /// HTTP status observed, if a response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl Attempt {
    /// Start a pending attempt.
    pub fn start(number: u32, server: &CandidateServer, token: &CandidateToken) -> Self {
        Self {
            number,
            server: server.clone(),
            provenance: token.provenance(),
            token_fingerprint: token.fingerprint(),
            status: AttemptStatus::Pending,
            http_status: None,
        }
    }

    /// Move a pending attempt to its final status.
    pub fn finish(
        &mut self,
        status: AttemptStatus,
        http_status: Option<u16>,
    ) -> Result<(), StateTransitionError> {
        if self.status != AttemptStatus::Pending || status == AttemptStatus::Pending {
            return Err(StateTransitionError::InvalidTransition {
                attempt: self.number,
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.http_status = http_status;
        Ok(())
    }
}
