//! Advisory slot reservation against a proxy server.
//!
//! The dispatcher asks for a slot once per generation dispatch, before the
//! first attempt. A failed reservation is logged and ignored; it never blocks
//! the request.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use genrelay_core::CandidateServer;
use serde::Serialize;

use crate::error::SlotError;
use crate::rest::RestStore;

/// Remote procedure that records a reservation.
const RESERVE_PROCEDURE: &str = "reserve_server_slot";

/// Reserves a slot on a server for the given cooldown.
#[async_trait]
pub trait SlotReservation: Send + Sync {
    /// Reserve a slot on `server`, blocking others for `cooldown`.
    async fn reserve(&self, server: &CandidateServer, cooldown: Duration) -> Result<(), SlotError>;
}

#[derive(Serialize)]
struct ReserveArgs<'a> {
    p_server_url: &'a str,
    p_cooldown_seconds: u64,
}

/// Reservation via a remote procedure on the store.
///
/// The procedure may return nothing (accepted) or a boolean; `false` means
/// the slot was declined.
#[derive(Debug, Clone)]
pub struct RestSlotReservation {
    store: RestStore,
}

impl RestSlotReservation {
    /// Wrap a store client.
    pub fn new(store: RestStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SlotReservation for RestSlotReservation {
    async fn reserve(&self, server: &CandidateServer, cooldown: Duration) -> Result<(), SlotError> {
        let args = ReserveArgs {
            p_server_url: server.base_url(),
            p_cooldown_seconds: cooldown.as_secs(),
        };
        let result = self.store.rpc(RESERVE_PROCEDURE, &args).await?;
        if result == serde_json::Value::Bool(false) {
            return Err(SlotError::Declined {
                server: server.base_url().to_string(),
            });
        }
        Ok(())
    }
}

/// In-process cooldown map. A server reserved within its cooldown is refused.
#[derive(Debug, Default)]
pub struct LocalSlotReservation {
    reserved_until: DashMap<String, Instant>,
}

impl LocalSlotReservation {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotReservation for LocalSlotReservation {
    async fn reserve(&self, server: &CandidateServer, cooldown: Duration) -> Result<(), SlotError> {
        let now = Instant::now();
        let mut entry = self
            .reserved_until
            .entry(server.base_url().to_string())
            .or_insert(now);
        if *entry > now {
            let remaining = *entry - now;
            return Err(SlotError::Cooldown {
                server: server.base_url().to_string(),
                remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
            });
        }
        *entry = now + cooldown;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_reservation_enforces_cooldown() {
        let slots = LocalSlotReservation::new();
        let s1 = CandidateServer::new("https://s1.example.com");
        let s2 = CandidateServer::new("https://s2.example.com");

        slots.reserve(&s1, Duration::from_secs(10)).await.unwrap();
        let err = slots.reserve(&s1, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, SlotError::Cooldown { ref server, .. } if server == "https://s1.example.com"));
        slots.reserve(&s2, Duration::from_secs(10)).await.unwrap();
    }

    #[tokio::test]
    async fn zero_cooldown_never_blocks() {
        let slots = LocalSlotReservation::new();
        let s1 = CandidateServer::new("https://s1.example.com");
        slots.reserve(&s1, Duration::ZERO).await.unwrap();
        slots.reserve(&s1, Duration::ZERO).await.unwrap();
    }

    #[test]
    fn reserve_args_shape() {
        let args = ReserveArgs {
            p_server_url: "https://s1.example.com",
            p_cooldown_seconds: 10,
        };
        assert_eq!(
            serde_json::to_value(&args).unwrap(),
            serde_json::json!({"p_server_url": "https://s1.example.com", "p_cooldown_seconds": 10})
        );
    }
}
