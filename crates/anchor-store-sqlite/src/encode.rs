//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Enum discriminants are their lowercase
//! names. Metadata and audit payloads are compact JSON.

use std::str::FromStr;

use anchor_core::{
  audit::{AuditEvent, AuditRecord},
  callgraph::CallEdge,
  checksum::Checksum,
  entity::{Entity, EntityId, EntityKind, LifecycleState, WorkStatus},
};
use chrono::{DateTime, Utc};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

fn decode_enum<T: FromStr>(what: &str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown {what}: {s:?}")))
}

pub fn decode_kind(s: &str) -> Result<EntityKind> { decode_enum("entity kind", s) }

pub fn decode_state(s: &str) -> Result<LifecycleState> { decode_enum("lifecycle state", s) }

pub fn decode_status(s: &str) -> Result<WorkStatus> { decode_enum("work status", s) }

// ─── Ids ─────────────────────────────────────────────────────────────────────

pub fn encode_opt_id(id: Option<EntityId>) -> Option<i64> { id.map(EntityId::get) }

pub fn decode_opt_id(raw: Option<i64>) -> Option<EntityId> { raw.map(EntityId) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawEntity::from_row`].
pub const ENTITY_COLUMNS: &str = "id, kind, name, base_name, parent_ref, lifecycle_state, \
                                  content_checksum, status, metadata, created_at, updated_at";

/// Raw values read directly from an `entities` row.
pub struct RawEntity {
  pub id:               i64,
  pub kind:             String,
  pub name:             String,
  pub base_name:        String,
  pub parent_ref:       Option<i64>,
  pub lifecycle_state:  String,
  pub content_checksum: Option<String>,
  pub status:           String,
  pub metadata:         String,
  pub created_at:       String,
  pub updated_at:       String,
}

impl RawEntity {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      kind:             row.get(1)?,
      name:             row.get(2)?,
      base_name:        row.get(3)?,
      parent_ref:       row.get(4)?,
      lifecycle_state:  row.get(5)?,
      content_checksum: row.get(6)?,
      status:           row.get(7)?,
      metadata:         row.get(8)?,
      created_at:       row.get(9)?,
      updated_at:       row.get(10)?,
    })
  }

  pub fn into_entity(self) -> Result<Entity> {
    Ok(Entity {
      id:               EntityId(self.id),
      kind:             decode_kind(&self.kind)?,
      name:             self.name,
      base_name:        self.base_name,
      parent_ref:       decode_opt_id(self.parent_ref),
      state:            decode_state(&self.lifecycle_state)?,
      content_checksum: self.content_checksum.map(Checksum::from_stored),
      status:           decode_status(&self.status)?,
      metadata:         serde_json::from_str(&self.metadata)?,
      created_at:       decode_dt(&self.created_at)?,
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}

/// Column list matching the fields of [`RawEdge`].
pub const EDGE_COLUMNS: &str = "caller_id, callee_id, occurrence_count, site_file_id, site_line";

/// Raw values read directly from an `edges` row.
pub struct RawEdge {
  pub caller_id:        i64,
  pub callee_id:        i64,
  pub occurrence_count: i64,
  pub site_file_id:     Option<i64>,
  pub site_line:        Option<i64>,
}

impl RawEdge {
  pub fn into_edge(self) -> Result<CallEdge> {
    let count = |what: &str, v: i64| {
      u32::try_from(v).map_err(|_| Error::Decode(format!("{what} out of range: {v}")))
    };
    Ok(CallEdge {
      caller:           EntityId(self.caller_id),
      callee:           EntityId(self.callee_id),
      occurrence_count: count("occurrence_count", self.occurrence_count)?,
      site_file_id:     decode_opt_id(self.site_file_id),
      site_line:        self.site_line.map(|l| count("site_line", l)).transpose()?,
    })
  }
}

/// Raw values read directly from an `audit_log` row.
pub struct RawAudit {
  pub seq:         i64,
  pub recorded_at: String,
  pub payload:     String,
}

impl RawAudit {
  pub fn into_record(self) -> Result<AuditRecord> {
    let event: AuditEvent = serde_json::from_str(&self.payload)?;
    Ok(AuditRecord {
      seq: self.seq,
      recorded_at: decode_dt(&self.recorded_at)?,
      event,
    })
  }
}
