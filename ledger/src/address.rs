//! # Address Derivation
//!
//! Records are located without an index: their address is a pure function
//! of a namespace tag and, for per-user records, the owner identity.
//!
//! ```text
//! address = BLAKE3( domain
//!                || len(namespace) || namespace
//!                || [owner bytes, if any] )
//! ```
//!
//! The namespace is length-prefixed so that `("ab", owner)` and
//! `("a", "b" || owner)` can never collide. The domain separates
//! deployments that happen to share a store.

use crate::config::{DEFAULT_DOMAIN, DEPOSIT_NAMESPACE, VAULT_NAMESPACE};
use crate::identity::{Address, Identity};

/// Deterministically computes a storage location from a namespace tag and
/// an optional owner identity. Implementations must be pure.
pub trait AddressDeriver: Send + Sync {
    /// Derives the address for `namespace` (and `owner`, when present).
    fn derive(&self, namespace: &[u8], owner: Option<&Identity>) -> Address;

    /// Address of the singleton vault record.
    fn vault_address(&self) -> Address {
        self.derive(VAULT_NAMESPACE, None)
    }

    /// Address of the deposit record belonging to `owner`.
    fn deposit_address(&self, owner: &Identity) -> Address {
        self.derive(DEPOSIT_NAMESPACE, Some(owner))
    }
}

/// BLAKE3-based deriver keyed by a deployment domain.
#[derive(Debug, Clone)]
pub struct Blake3Deriver {
    domain: [u8; 32],
}

impl Blake3Deriver {
    /// Creates a deriver for the given deployment domain.
    pub fn new(domain: &str) -> Self {
        Self {
            domain: *blake3::hash(domain.as_bytes()).as_bytes(),
        }
    }
}

impl Default for Blake3Deriver {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN)
    }
}

impl AddressDeriver for Blake3Deriver {
    fn derive(&self, namespace: &[u8], owner: Option<&Identity>) -> Address {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.domain);
        hasher.update(&(namespace.len() as u32).to_le_bytes());
        hasher.update(namespace);
        if let Some(owner) = owner {
            hasher.update(owner.as_bytes());
        }
        Address::new(*hasher.finalize().as_bytes())
    }
}
