//! The append-only audit log.
//!
//! Every mutation and every integrity run is described by an [`AuditEvent`].
//! Backends assign the sequence number under the same transaction as the
//! mutation, so replaying records in `seq` order reconstructs the store's
//! history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  callgraph::CallEdge,
  checksum::Checksum,
  entity::{Entity, EntityId, EntityKind, WorkStatus},
  integrity::{CheckKind, Examined, Finding, RunSummary},
};

/// Audit settings, fixed when the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
  /// Record ordinary mutations. Integrity runs and their auto-fixes are
  /// recorded regardless.
  pub tracking: bool,
}

impl Default for AuditConfig {
  fn default() -> Self { Self { tracking: true } }
}

impl AuditConfig {
  pub fn records(&self, event: &AuditEvent) -> bool { self.tracking || event.is_integrity() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
  Reserved {
    id:         EntityId,
    kind:       EntityKind,
    name:       String,
    parent_ref: Option<EntityId>,
    metadata:   serde_json::Value,
  },
  Renamed { id: EntityId, from: String, to: String },
  Finalized {
    id:       EntityId,
    from:     String,
    to:       String,
    checksum: Checksum,
  },
  Abandoned { removed: Vec<Entity>, edges: Vec<CallEdge> },
  Deleted { removed: Vec<Entity>, edges: Vec<CallEdge> },
  /// The rows as inserted, so a replay can recreate them.
  Imported { entities: Vec<Entity> },
  StatusChanged {
    id:   EntityId,
    from: WorkStatus,
    to:   WorkStatus,
    /// Set when the change followed from a child completing.
    auto: bool,
  },
  EdgeAdded { edge: CallEdge },
  EdgeRemoved { removed: Vec<CallEdge> },
  /// Before-image of everything an integrity run deleted for one finding.
  AutoFixed {
    run_id:  Uuid,
    finding: Finding,
    removed: Vec<Entity>,
    edges:   Vec<CallEdge>,
  },
  IntegrityRun {
    run_id:      Uuid,
    scope:       Vec<CheckKind>,
    report_only: bool,
    examined:    Examined,
    outcome:     RunSummary,
  },
}

impl AuditEvent {
  pub fn is_integrity(&self) -> bool {
    matches!(self, Self::AutoFixed { .. } | Self::IntegrityRun { .. })
  }

  /// Short discriminant stored next to the JSON payload for filtering.
  pub fn name(&self) -> &'static str {
    match self {
      Self::Reserved { .. } => "reserved",
      Self::Renamed { .. } => "renamed",
      Self::Finalized { .. } => "finalized",
      Self::Abandoned { .. } => "abandoned",
      Self::Deleted { .. } => "deleted",
      Self::Imported { .. } => "imported",
      Self::StatusChanged { .. } => "status_changed",
      Self::EdgeAdded { .. } => "edge_added",
      Self::EdgeRemoved { .. } => "edge_removed",
      Self::AutoFixed { .. } => "auto_fixed",
      Self::IntegrityRun { .. } => "integrity_run",
    }
  }

  /// The entity an event is primarily about, for indexed lookups.
  pub fn subject(&self) -> Option<EntityId> {
    match self {
      Self::Reserved { id, .. }
      | Self::Renamed { id, .. }
      | Self::Finalized { id, .. }
      | Self::StatusChanged { id, .. } => Some(*id),
      Self::Abandoned { removed: rows, .. }
      | Self::Deleted { removed: rows, .. }
      | Self::Imported { entities: rows } => rows.first().map(|e| e.id),
      Self::EdgeAdded { edge } => Some(edge.caller),
      Self::AutoFixed { finding, .. } => finding.violation.entity().map(|e| e.id),
      Self::EdgeRemoved { .. } | Self::IntegrityRun { .. } => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
  pub seq:         i64,
  pub recorded_at: DateTime<Utc>,
  pub event:       AuditEvent,
}

/// Parameters for [`crate::store::GraphStore::audit_log`].
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
  /// Only records with `seq` strictly greater than this.
  pub after:  Option<i64>,
  pub entity: Option<EntityId>,
  pub limit:  Option<usize>,
}
