//! # Identities and Addresses
//!
//! Two 32-byte newtypes that never mix:
//!
//! - [`Identity`] — who is acting. The caller of an operation, the vault
//!   authority, the owner of a deposit record.
//! - [`Address`] — where something is stored. Record locations come out of
//!   an [`AddressDeriver`](crate::address::AddressDeriver); the native
//!   currency account of an identity sits at the address with the same bytes.
//!
//! Both render as base58 in text and JSON, and as raw bytes in binary codecs
//! so record layouts stay fixed-size.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::config::IDENTITY_LENGTH;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced when parsing identities or addresses from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The input is not valid base58.
    #[error("invalid base58: {0}")]
    Base58(String),

    /// The decoded bytes are not exactly 32 bytes long.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Required byte length.
        expected: usize,
        /// Length actually decoded.
        got: usize,
    },
}

fn decode_base58(s: &str) -> Result<[u8; IDENTITY_LENGTH], IdentityError> {
    let bytes = bs58::decode(s)
        .into_vec()
        .map_err(|e| IdentityError::Base58(e.to_string()))?;
    let got = bytes.len();
    bytes.try_into().map_err(|_| IdentityError::InvalidLength {
        expected: IDENTITY_LENGTH,
        got,
    })
}

// ---------------------------------------------------------------------------
// Shared newtype plumbing
// ---------------------------------------------------------------------------

macro_rules! bytes32_newtype {
    ($name:ident) => {
        impl $name {
            /// Wraps raw bytes.
            pub const fn new(bytes: [u8; IDENTITY_LENGTH]) -> Self {
                Self(bytes)
            }

            /// Returns the raw bytes.
            pub fn as_bytes(&self) -> &[u8; IDENTITY_LENGTH] {
                &self.0
            }

            /// Returns the base58 text form.
            pub fn to_base58(&self) -> String {
                bs58::encode(self.0).into_string()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_base58())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_base58())
            }
        }

        impl FromStr for $name {
            type Err = IdentityError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_base58(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_base58())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(D::Error::custom)
                } else {
                    <[u8; IDENTITY_LENGTH]>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// An opaque participant identity.
///
/// The ledger does not care how identities are minted or proven; it only
/// compares them. Key management lives outside this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identity([u8; IDENTITY_LENGTH]);

bytes32_newtype!(Identity);

impl Identity {
    /// A fresh random identity. Collisions are as likely as guessing a
    /// 256-bit key, so tests treat these as unique.
    pub fn new_unique() -> Self {
        Self(rand::random())
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A storage location in the ledger store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; IDENTITY_LENGTH]);

bytes32_newtype!(Address);

/// The native currency account of an identity.
impl From<&Identity> for Address {
    fn from(identity: &Identity) -> Self {
        Self(identity.0)
    }
}

impl From<Identity> for Address {
    fn from(identity: Identity) -> Self {
        Self(identity.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
