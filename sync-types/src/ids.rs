//! Identifier types for splitsync.
//!
//! Every identifier is 16 random bytes minted by the authoring replica,
//! displayed as URL-safe base64. Byte order doubles as the deterministic
//! tie-break order used by registers and sequences.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CodecError;

/// Number of random bytes in every identifier.
pub const ID_LEN: usize = 16;

/// Identifiers that can be sampled from a random source.
///
/// Implemented by every id newtype so the issuer in `sync-core` can mint
/// any of them.
pub trait RandomId: Copy + Eq {
    /// Sample a fresh identifier from `rng`.
    fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self;
}

macro_rules! random_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; ID_LEN]);

        impl $name {
            /// Create an identifier from a fixed byte array.
            pub const fn from_array(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            /// Create an identifier from raw bytes.
            ///
            /// Returns `None` unless exactly [`ID_LEN`] bytes are given.
            pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
                <[u8; ID_LEN]>::try_from(bytes).ok().map(Self)
            }

            /// Get the raw bytes of this identifier.
            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }
        }

        impl RandomId for $name {
            fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self {
                let mut bytes = [0u8; ID_LEN];
                rng.fill_bytes(&mut bytes);
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_string()[..8])
            }
        }

        impl FromStr for $name {
            type Err = CodecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = URL_SAFE_NO_PAD
                    .decode(s)
                    .map_err(|e| CodecError::InvalidData(format!("{}: {}", stringify!($name), e)))?;
                Self::from_bytes(&bytes).ok_or_else(|| {
                    CodecError::InvalidData(format!(
                        "{}: expected {} bytes, got {}",
                        stringify!($name),
                        ID_LEN,
                        bytes.len()
                    ))
                })
            }
        }
    };
}

random_id!(
    /// Identifies one operation in the log. Unique across all replicas.
    OperationId
);

random_id!(
    /// Identifies a user. Also used as the author of operations.
    UserId
);

random_id!(
    /// Identifies a spending group.
    GroupId
);

random_id!(
    /// Identifies a spending inside a group.
    SpendingId
);

random_id!(
    /// Identifies an uploaded image.
    ImageId
);
