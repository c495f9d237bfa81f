//! Entities, the nodes of the project metadata graph.
//!
//! Code entities (files, functions, types) and planning entities (milestones,
//! tasks, items, subtasks) share one shape. The `kind` discriminant decides
//! which parent an entity must hang under and whether it carries a work
//! status.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::checksum::Checksum;

// ─── Identity ────────────────────────────────────────────────────────────────

/// Numeric entity identifier. Assigned at reservation, never reused.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
  pub fn get(self) -> i64 { self.0 }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

impl FromStr for EntityId {
  type Err = std::num::ParseIntError;

  /// Accepts both `42` and `#42`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.trim_start_matches('#').parse().map(Self)
  }
}

impl From<i64> for EntityId {
  fn from(value: i64) -> Self { Self(value) }
}

// ─── Kinds ───────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
  File,
  Function,
  Type,
  Milestone,
  Task,
  Item,
  Subtask,
}

/// Which entity kind a `parent_ref` must point at, and whether it may be null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRule {
  pub kind:     EntityKind,
  pub nullable: bool,
}

impl EntityKind {
  pub fn as_str(self) -> &'static str { self.into() }

  pub fn parent_rule(self) -> ParentRule {
    let (kind, nullable) = match self {
      Self::File => (Self::File, true),
      Self::Function | Self::Type => (Self::File, false),
      Self::Milestone => (Self::Milestone, true),
      Self::Task => (Self::Milestone, false),
      Self::Item | Self::Subtask => (Self::Task, false),
    };
    ParentRule { kind, nullable }
  }

  /// Planning kinds carry a [`WorkStatus`]; code kinds do not.
  pub fn is_work(self) -> bool {
    matches!(self, Self::Milestone | Self::Task | Self::Item | Self::Subtask)
  }

  /// Files keep their extension last when an id is embedded in the name.
  pub fn has_extension(self) -> bool { matches!(self, Self::File) }
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleState {
  /// Provisional: the artifact has not been written yet. Excluded from graph
  /// queries and never treated as an orphan.
  Reserved,
  /// Permanent until explicitly deleted.
  Finalized,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkStatus {
  #[default]
  Pending,
  Completed,
}

// ─── Entity ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
  pub id:               EntityId,
  pub kind:             EntityKind,
  /// Current name. Once finalized this is the canonical form with the id
  /// embedded (see [`crate::lifecycle::canonical_name`]).
  pub name:             String,
  /// The name as requested by the caller; the uniqueness key together with
  /// `kind` and `parent_ref`.
  pub base_name:        String,
  pub parent_ref:       Option<EntityId>,
  pub state:            LifecycleState,
  pub content_checksum: Option<Checksum>,
  pub status:           WorkStatus,
  pub metadata:         serde_json::Value,
  pub created_at:       DateTime<Utc>,
  pub updated_at:       DateTime<Utc>,
}

impl Entity {
  pub fn is_finalized(&self) -> bool { self.state == LifecycleState::Finalized }

  pub fn is_completed(&self) -> bool { self.status == WorkStatus::Completed }
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Input to [`crate::store::GraphStore::reserve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReservation {
  pub kind:       EntityKind,
  pub name:       String,
  pub parent_ref: Option<EntityId>,
  #[serde(default = "empty_metadata")]
  pub metadata:   serde_json::Value,
}

impl NewReservation {
  pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
      parent_ref: None,
      metadata: empty_metadata(),
    }
  }

  pub fn under(mut self, parent: EntityId) -> Self {
    self.parent_ref = Some(parent);
    self
  }

  pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
    self.metadata = metadata;
    self
  }
}

/// One already-finalized entity in a bulk import.
///
/// Imports bypass the uniqueness and parent checks, so they are the path by
/// which duplicates and dangling references can enter the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
  pub kind:             EntityKind,
  pub name:             String,
  pub parent_ref:       Option<EntityId>,
  pub content_checksum: Option<Checksum>,
  #[serde(default = "empty_metadata")]
  pub metadata:         serde_json::Value,
}

impl ImportRecord {
  pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
      parent_ref: None,
      content_checksum: None,
      metadata: empty_metadata(),
    }
  }

  pub fn under(mut self, parent: EntityId) -> Self {
    self.parent_ref = Some(parent);
    self
  }
}

fn empty_metadata() -> serde_json::Value { serde_json::Value::Object(Default::default()) }
