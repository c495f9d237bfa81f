//! Content checksums for finalized artifacts.
//!
//! A checksum is the lowercase hex SHA-256 of the artifact bytes handed in by
//! the caller. The engine never reads artifacts itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
  /// Hash `content`.
  pub fn of(content: &[u8]) -> Self {
    let digest = Sha256::digest(content);
    Self(hex::encode(digest))
  }

  /// Wrap a previously stored hex digest without re-validating it.
  pub fn from_stored(hex: impl Into<String>) -> Self { Self(hex.into()) }

  pub fn as_str(&self) -> &str { &self.0 }

  pub fn matches(&self, content: &[u8]) -> bool { *self == Self::of(content) }
}

impl fmt::Display for Checksum {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}
