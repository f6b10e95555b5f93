//! # Ledger Records
//!
//! The store holds exactly two record kinds:
//!
//! | Kind          | Address                        | Fields                      |
//! |---------------|--------------------------------|-----------------------------|
//! | `Vault`       | `derive("vault")`              | `authority`, `total_balance`|
//! | `UserDeposit` | `derive("deposit", owner)`     | `owner`, `balance`          |
//!
//! ## On-disk layout
//!
//! ```text
//! [ discriminator: 8 bytes ][ bincode(body) ]
//! ```
//!
//! The discriminator is the first eight bytes of `SHA-256("account:<Name>")`.
//! Decoding checks it before touching the body, so a deposit record can never
//! be read back as a vault (or the reverse) even though both bodies happen to
//! be a 32-byte identity followed by a `u64`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::DISCRIMINATOR_LENGTH;
use crate::identity::Identity;
use crate::storage::DbError;

// ---------------------------------------------------------------------------
// RecordKind
// ---------------------------------------------------------------------------

/// The fixed enumeration of record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// The singleton pool record.
    Vault,
    /// A per-depositor ledger entry.
    UserDeposit,
}

impl RecordKind {
    /// Type name hashed into the discriminator.
    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Vault => "Vault",
            RecordKind::UserDeposit => "UserDeposit",
        }
    }

    /// The 8-byte tag written in front of every record of this kind.
    pub fn discriminator(self) -> [u8; DISCRIMINATOR_LENGTH] {
        let digest = Sha256::digest(format!("account:{}", self.name()).as_bytes());
        let mut out = [0u8; DISCRIMINATOR_LENGTH];
        out.copy_from_slice(&digest[..DISCRIMINATOR_LENGTH]);
        out
    }

    /// Identifies the kind of an encoded record from its prefix.
    pub fn of(bytes: &[u8]) -> Option<RecordKind> {
        let prefix = bytes.get(..DISCRIMINATOR_LENGTH)?;
        [RecordKind::Vault, RecordKind::UserDeposit]
            .into_iter()
            .find(|kind| kind.discriminator() == prefix)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Record trait
// ---------------------------------------------------------------------------

/// A typed ledger record with a tagged binary encoding.
pub trait Record: Serialize + DeserializeOwned {
    /// The kind tag for this record type.
    const KIND: RecordKind;

    /// Encodes as `discriminator || bincode(self)`.
    fn encode(&self) -> Result<Vec<u8>, DbError> {
        let body = bincode::serialize(self).map_err(|e| DbError::Serialization(e.to_string()))?;
        let mut out = Vec::with_capacity(DISCRIMINATOR_LENGTH + body.len());
        out.extend_from_slice(&Self::KIND.discriminator());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes a tagged record, rejecting any other kind.
    fn decode(bytes: &[u8]) -> Result<Self, DbError> {
        match RecordKind::of(bytes) {
            Some(kind) if kind == Self::KIND => {}
            found => {
                return Err(DbError::KindMismatch {
                    expected: Self::KIND,
                    found,
                })
            }
        }
        bincode::deserialize(&bytes[DISCRIMINATOR_LENGTH..])
            .map_err(|e| DbError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// The singleton pool record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Identity that initialized the vault. Never changes.
    pub authority: Identity,
    /// Sum of every depositor's balance, in smallest units.
    pub total_balance: u64,
}

impl Vault {
    /// A freshly initialized, empty vault.
    pub fn new(authority: Identity) -> Self {
        Self {
            authority,
            total_balance: 0,
        }
    }
}

impl Record for Vault {
    const KIND: RecordKind = RecordKind::Vault;
}

// ---------------------------------------------------------------------------
// UserDeposit
// ---------------------------------------------------------------------------

/// One depositor's claim on the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDeposit {
    /// The depositor. Never changes; the only identity allowed to move
    /// funds against this record.
    pub owner: Identity,
    /// The depositor's balance, in smallest units.
    pub balance: u64,
}

impl UserDeposit {
    /// A freshly initialized, empty deposit record.
    pub fn new(owner: Identity) -> Self {
        Self { owner, balance: 0 }
    }
}

impl Record for UserDeposit {
    const KIND: RecordKind = RecordKind::UserDeposit;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
