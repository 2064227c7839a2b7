//! Bounded retry for remote token lookups.
//!
//! A lookup round that comes back empty is retried after `base_delay` plus a
//! random jitter in `[0, jitter]`, up to `attempts` rounds in total. With the
//! default policy that is 3 rounds spaced 1–1.5s apart.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::LookupPolicy;

/// Run `f` until it yields `Some`, or the policy's rounds are used up.
///
/// `f` receives the 1-based round number.
pub(crate) async fn retry_lookup<F, Fut, T>(policy: &LookupPolicy, what: &str, f: F) -> Option<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let rounds = policy.attempts.max(1);
    for round in 1..=rounds {
        if let Some(found) = f(round).await {
            return Some(found);
        }
        if round < rounds {
            let delay = delay_for(policy);
            tracing::debug!(
                round,
                max_rounds = rounds,
                "{what} lookup came back empty, retrying in {delay:?}"
            );
            tokio::time::sleep(delay).await;
        }
    }
    tracing::debug!(rounds, "{what} lookup found nothing");
    None
}

fn delay_for(policy: &LookupPolicy) -> Duration {
    let jitter_ms = u64::try_from(policy.jitter.as_millis()).unwrap_or(u64::MAX);
    if jitter_ms == 0 {
        return policy.base_delay;
    }
    policy.base_delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}
