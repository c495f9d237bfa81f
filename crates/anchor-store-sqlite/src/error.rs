//! Error type for `anchor-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// An expected domain outcome: `NotFound`, `NameCollision`, ...
  #[error(transparent)]
  Core(#[from] anchor_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored column held a value no domain type maps to.
  #[error("decode error: {0}")]
  Decode(String),
}

impl Error {
  /// The domain outcome, when this is one.
  pub fn as_core(&self) -> Option<&anchor_core::Error> {
    match self {
      Self::Core(e) => Some(e),
      _ => None,
    }
  }

  /// `true` when durability itself is in question: the only class callers
  /// should treat as a hard failure.
  pub fn is_storage_failure(&self) -> bool {
    !matches!(self, Self::Core(e) if e.is_expected())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
