//! Error types for `anchor-core`.
//!
//! Every variant except [`Error::Serialization`] is an expected outcome that
//! callers branch on. Storage backends wrap this type and add their own
//! hard-failure variants.

use thiserror::Error;

use crate::entity::{EntityId, EntityKind};

#[derive(Debug, Error)]
pub enum Error {
  #[error("entity not found: {0}")]
  NotFound(EntityId),

  #[error(
    "name collision: {kind} {name:?} under {parent} is already taken by {existing}",
    parent = display_parent(.parent_ref)
  )]
  NameCollision {
    kind:       EntityKind,
    name:       String,
    parent_ref: Option<EntityId>,
    existing:   EntityId,
  },

  #[error("entity {0} is already finalized")]
  AlreadyFinalized(EntityId),

  #[error("invalid transition for entity {id}: {reason}")]
  InvalidTransition { id: EntityId, reason: String },

  #[error("invalid parent for {kind}: {reason}")]
  InvalidParent { kind: EntityKind, reason: String },

  #[error("entity {id} is a {found}, expected a {expected}")]
  WrongKind {
    id:       EntityId,
    expected: EntityKind,
    found:    EntityKind,
  },

  #[error("operation cancelled")]
  Cancelled,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// `true` for control-flow outcomes (collisions, missing ids, rejected
  /// transitions, cancellation) as opposed to hard failures.
  pub fn is_expected(&self) -> bool { !matches!(self, Self::Serialization(_)) }

  pub fn invalid_transition(id: EntityId, reason: impl Into<String>) -> Self {
    Self::InvalidTransition { id, reason: reason.into() }
  }
}

fn display_parent(parent_ref: &Option<EntityId>) -> String {
  match parent_ref {
    Some(id) => format!("parent {id}"),
    None => "the root".to_owned(),
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
