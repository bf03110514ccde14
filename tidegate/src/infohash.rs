//! Torrent infohash identifier.
//!
//! An [`InfoHash`] is the 20-byte content hash that names a session. It is
//! the sole key across the registry, the engine session table, and the
//! descriptor store. Requests supply it as 40 hex characters; anything
//! else is a client error and must be rejected before any state is
//! touched.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Length of an infohash in bytes.
pub const INFOHASH_LEN: usize = 20;

/// Errors produced while parsing an infohash from its hex form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InfoHashError {
    /// Input was not exactly 40 hex characters.
    #[error("infohash must be {expected} hex characters, got {got}")]
    BadLength { expected: usize, got: usize },

    /// Input contained non-hex characters.
    #[error("infohash is not valid hex: {0}")]
    BadHex(String),
}

/// 20-byte identifier naming one torrent session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; INFOHASH_LEN]);

impl InfoHash {
    /// Wrap raw hash bytes.
    pub const fn from_bytes(bytes: [u8; INFOHASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; INFOHASH_LEN] {
        &self.0
    }

    /// Lowercase hex rendering, the form used in URLs and file names.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for InfoHash {
    type Err = InfoHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != INFOHASH_LEN * 2 {
            return Err(InfoHashError::BadLength {
                expected: INFOHASH_LEN * 2,
                got: s.len(),
            });
        }
        let mut bytes = [0u8; INFOHASH_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| InfoHashError::BadHex(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_parse_roundtrip() {
        let hash: InfoHash = SAMPLE.parse().unwrap();
        assert_eq!(hash.hex(), SAMPLE);
        assert_eq!(hash.to_string(), SAMPLE);
    }

    #[test]
    fn test_parse_accepts_uppercase() {
        let hash: InfoHash = SAMPLE.to_uppercase().parse().unwrap();
        assert_eq!(hash.hex(), SAMPLE);
    }

    #[test]
    fn test_parse_rejects_short_input() {
        let err = "abcd".parse::<InfoHash>().unwrap_err();
        assert_eq!(
            err,
            InfoHashError::BadLength {
                expected: 40,
                got: 4
            }
        );
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let bad = "z".repeat(40);
        assert!(matches!(
            bad.parse::<InfoHash>(),
            Err(InfoHashError::BadHex(_))
        ));
    }

    #[test]
    fn test_from_bytes_matches_parsed() {
        let hash: InfoHash = SAMPLE.parse().unwrap();
        assert_eq!(InfoHash::from_bytes(*hash.as_bytes()), hash);
    }
}
