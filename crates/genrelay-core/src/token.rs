//! # Candidate Tokens
//!
//! A bearer token together with where it came from. The value is held in a
//! [`Zeroizing`] buffer and is redacted from `Debug` output. Diagnostics use
//! [`CandidateToken::fingerprint`], the first 12 hex digits of the token's
//! SHA-256 digest.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Origin classification of a token.
///
/// Variants are declared in preference order, so `Ord` ranks
/// `Explicit < Personal < PoolRandom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Supplied by the caller on the request itself.
    Explicit,
    /// Owned by the current user.
    Personal,
    /// Drawn from the shared token pool.
    PoolRandom,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Personal => write!(f, "personal"),
            Self::PoolRandom => write!(f, "pool"),
        }
    }
}

/// A bearer token and its provenance.
#[derive(Clone, PartialEq, Eq)]
pub struct CandidateToken {
    value: Zeroizing<String>,
    provenance: Provenance,
}

impl CandidateToken {
    /// Wrap a token value. Surrounding whitespace is trimmed.
    pub fn new(value: impl Into<String>, provenance: Provenance) -> Self {
        let raw: String = value.into();
        let trimmed = raw.trim();
        let value = if trimmed.len() == raw.len() {
            Zeroizing::new(raw)
        } else {
            Zeroizing::new(trimmed.to_string())
        };
        Self { value, provenance }
    }

    /// The raw bearer value.
    pub fn value(&self) -> &str {
        self.value.as_str()
    }

    /// Where the token came from.
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Short, non-reversible identifier safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.value.as_bytes());
        digest
            .iter()
            .take(6)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Debug for CandidateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateToken")
            .field("value", &"[REDACTED]")
            .field("provenance", &self.provenance)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_orders_by_preference() {
        let mut all = vec![Provenance::PoolRandom, Provenance::Explicit, Provenance::Personal];
        all.sort();
        assert_eq!(
            all,
            vec![Provenance::Explicit, Provenance::Personal, Provenance::PoolRandom]
        );
    }

    #[test]
    fn provenance_display() {
        assert_eq!(Provenance::Explicit.to_string(), "explicit");
        assert_eq!(Provenance::Personal.to_string(), "personal");
        assert_eq!(Provenance::PoolRandom.to_string(), "pool");
    }

    #[test]
    fn debug_redacts_value() {
        let token = CandidateToken::new("super-secret-bearer", Provenance::Personal);
        let dbg = format!("{token:?}");
        assert!(!dbg.contains("super-secret-bearer"));
        assert!(dbg.contains("[REDACTED]"));
        assert!(dbg.contains("Personal"));
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = CandidateToken::new("abc", Provenance::Explicit);
        let b = CandidateToken::new("abc", Provenance::PoolRandom);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 12);
        // SHA-256("abc") = ba7816bf8f01...
        assert_eq!(a.fingerprint(), "ba7816bf8f01");
    }

    #[test]
    fn value_is_trimmed() {
        let token = CandidateToken::new("  tok \n", Provenance::Personal);
        assert_eq!(token.value(), "tok");
    }

    #[test]
    fn provenance_serde_names() {
        assert_eq!(serde_json::to_string(&Provenance::PoolRandom).unwrap(), "\"pool_random\"");
    }

    use proptest::prelude::*;

    proptest! {
        /// Fingerprints are always 12 lowercase hex digits.
        #[test]
        fn fingerprint_shape(value in "[A-Za-z0-9._-]{1,64}") {
            let fp = CandidateToken::new(value, Provenance::Personal).fingerprint();
            prop_assert_eq!(fp.len(), 12);
            prop_assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }

        /// Debug output never contains the token value.
        #[test]
        fn debug_never_leaks(value in "[A-Za-z0-9]{16,48}") {
            let token = CandidateToken::new(value.clone(), Provenance::PoolRandom);
            let dbg = format!("{token:?}");
            prop_assert!(!dbg.contains(&value));
        }
    }
}
