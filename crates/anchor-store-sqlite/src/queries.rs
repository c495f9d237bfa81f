//! Synchronous row-level helpers run on the database thread.
//!
//! Every function takes a plain `&Connection`; callers pass a
//! `rusqlite::Transaction` (which derefs to one) so that reads and writes
//! belonging to one operation commit or roll back together.

use std::collections::{BTreeMap, BTreeSet};

use anchor_core::{
  Error as CoreError,
  audit::{AuditConfig, AuditEvent, AuditQuery, AuditRecord},
  callgraph::{CallEdge, CallGraph},
  checksum::Checksum,
  entity::{Entity, EntityId, EntityKind, LifecycleState, WorkStatus},
  integrity::Snapshot,
  lifecycle::DeletionReport,
  store::EntityFilter,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::{
  Result,
  encode::{
    EDGE_COLUMNS, ENTITY_COLUMNS, RawAudit, RawEdge, RawEntity, encode_dt, encode_opt_id,
  },
};

// ─── Entities ────────────────────────────────────────────────────────────────

pub fn fetch_entity(conn: &Connection, id: EntityId) -> Result<Option<Entity>> {
  let raw = conn
    .query_row(
      &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
      params![id.get()],
      RawEntity::from_row,
    )
    .optional()?;
  raw.map(RawEntity::into_entity).transpose()
}

pub fn require_entity(conn: &Connection, id: EntityId) -> Result<Entity> {
  fetch_entity(conn, id)?.ok_or_else(|| CoreError::NotFound(id).into())
}

pub fn fetch_optional_parent(
  conn: &Connection,
  parent_ref: Option<EntityId>,
) -> Result<Option<Entity>> {
  match parent_ref {
    Some(id) => fetch_entity(conn, id),
    None => Ok(None),
  }
}

/// The finalized entity already holding `(kind, parent_ref, name)`, if any.
///
/// `name` is matched against both the requested and the canonical name, so a
/// caller cannot reserve a name that looks like another entity's embedded-id
/// form.
pub fn find_finalized_holder(
  conn: &Connection,
  kind: EntityKind,
  parent_ref: Option<EntityId>,
  name: &str,
  exclude: Option<EntityId>,
) -> Result<Option<EntityId>> {
  let id: Option<i64> = conn
    .query_row(
      "SELECT id FROM entities
       WHERE kind = ?1
         AND parent_ref IS ?2
         AND (base_name = ?3 OR name = ?3)
         AND lifecycle_state = 'finalized'
         AND id IS NOT ?4
       ORDER BY id
       LIMIT 1",
      params![kind.as_str(), encode_opt_id(parent_ref), name, encode_opt_id(exclude)],
      |r| r.get(0),
    )
    .optional()?;
  Ok(id.map(EntityId))
}

/// Collision error for `name`, when a finalized entity already holds it.
pub fn ensure_name_free(
  conn: &Connection,
  kind: EntityKind,
  parent_ref: Option<EntityId>,
  name: &str,
  exclude: Option<EntityId>,
) -> Result<()> {
  match find_finalized_holder(conn, kind, parent_ref, name, exclude)? {
    Some(existing) => {
      tracing::warn!(%kind, name, %existing, "name collision");
      Err(
        CoreError::NameCollision {
          kind,
          name: name.to_owned(),
          parent_ref,
          existing,
        }
        .into(),
      )
    }
    None => Ok(()),
  }
}

pub fn children(conn: &Connection, parent: EntityId) -> Result<Vec<Entity>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {ENTITY_COLUMNS} FROM entities WHERE parent_ref = ?1 ORDER BY id"
  ))?;
  let raws = stmt
    .query_map(params![parent.get()], RawEntity::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawEntity::into_entity).collect()
}

pub fn list_entities(conn: &Connection, filter: &EntityFilter) -> Result<Vec<Entity>> {
  let limit = filter.limit.map_or(-1, |l| l as i64);
  let mut stmt = conn.prepare(&format!(
    "SELECT {ENTITY_COLUMNS} FROM entities
     WHERE (?1 IS NULL OR kind = ?1)
       AND (?2 IS NULL OR lifecycle_state = ?2)
       AND (?3 IS NULL OR parent_ref = ?3)
     ORDER BY id
     LIMIT ?4"
  ))?;
  let raws = stmt
    .query_map(
      params![
        filter.kind.map(EntityKind::as_str),
        filter.state.map(<&'static str>::from),
        encode_opt_id(filter.parent_ref),
        limit,
      ],
      RawEntity::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawEntity::into_entity).collect()
}

/// Values for one new `entities` row.
pub struct NewRow<'a> {
  pub kind:       EntityKind,
  pub name:       &'a str,
  pub base_name:  &'a str,
  pub parent_ref: Option<EntityId>,
  pub state:      LifecycleState,
  pub checksum:   Option<&'a Checksum>,
  pub metadata:   &'a serde_json::Value,
}

pub fn insert_entity(conn: &Connection, row: NewRow<'_>, now: DateTime<Utc>) -> Result<Entity> {
  let at = encode_dt(now);
  conn.execute(
    "INSERT INTO entities (
       kind, name, base_name, parent_ref, lifecycle_state,
       content_checksum, status, metadata, created_at, updated_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?8)",
    params![
      row.kind.as_str(),
      row.name,
      row.base_name,
      encode_opt_id(row.parent_ref),
      <&'static str>::from(row.state),
      row.checksum.map(Checksum::as_str),
      serde_json::to_string(row.metadata)?,
      at,
    ],
  )?;
  Ok(Entity {
    id:               EntityId(conn.last_insert_rowid()),
    kind:             row.kind,
    name:             row.name.to_owned(),
    base_name:        row.base_name.to_owned(),
    parent_ref:       row.parent_ref,
    state:            row.state,
    content_checksum: row.checksum.cloned(),
    status:           WorkStatus::Pending,
    metadata:         row.metadata.clone(),
    created_at:       now,
    updated_at:       now,
  })
}

pub fn set_status(
  conn: &Connection,
  id: EntityId,
  status: WorkStatus,
  now: DateTime<Utc>,
) -> Result<()> {
  conn.execute(
    "UPDATE entities SET status = ?2, updated_at = ?3 WHERE id = ?1",
    params![id.get(), <&'static str>::from(status), encode_dt(now)],
  )?;
  Ok(())
}

/// Delete `root`, every entity whose `parent_ref` chain leads to it, and every
/// call edge touching any of them.
pub fn delete_cascade(conn: &Connection, root: &Entity) -> Result<DeletionReport> {
  let mut seen: BTreeSet<EntityId> = BTreeSet::from([root.id]);
  let mut frontier = vec![root.id];
  let mut descendants = Vec::new();
  while let Some(id) = frontier.pop() {
    for child in children(conn, id)? {
      if seen.insert(child.id) {
        frontier.push(child.id);
        descendants.push(child);
      }
    }
  }
  descendants.sort_by_key(|e| e.id);

  let mut entities = Vec::with_capacity(descendants.len() + 1);
  entities.push(root.clone());
  entities.extend(descendants);

  let mut edges: BTreeMap<i64, CallEdge> = BTreeMap::new();
  for entity in &entities {
    edges.extend(edges_touching(conn, entity.id)?);
  }

  for entity in &entities {
    conn.execute(
      "DELETE FROM edges WHERE caller_id = ?1 OR callee_id = ?1",
      params![entity.id.get()],
    )?;
    conn.execute("DELETE FROM entities WHERE id = ?1", params![entity.id.get()])?;
  }

  Ok(DeletionReport { entities, edges: edges.into_values().collect() })
}

// ─── Edges ───────────────────────────────────────────────────────────────────

fn query_edges(
  conn: &Connection,
  where_clause: &str,
  params: impl rusqlite::Params,
) -> Result<Vec<(i64, CallEdge)>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT edge_id, {EDGE_COLUMNS} FROM edges {where_clause} ORDER BY edge_id"
  ))?;
  let raws = stmt
    .query_map(params, |row| {
      let edge_id: i64 = row.get(0)?;
      Ok((edge_id, RawEdge {
        caller_id:        row.get(1)?,
        callee_id:        row.get(2)?,
        occurrence_count: row.get(3)?,
        site_file_id:     row.get(4)?,
        site_line:        row.get(5)?,
      }))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws
    .into_iter()
    .map(|(edge_id, raw)| Ok((edge_id, raw.into_edge()?)))
    .collect()
}

fn edges_touching(conn: &Connection, id: EntityId) -> Result<Vec<(i64, CallEdge)>> {
  query_edges(conn, "WHERE caller_id = ?1 OR callee_id = ?1", params![id.get()])
}

pub fn edges_from(conn: &Connection, caller: EntityId) -> Result<Vec<CallEdge>> {
  let rows = query_edges(conn, "WHERE caller_id = ?1", params![caller.get()])?;
  Ok(rows.into_iter().map(|(_, e)| e).collect())
}

pub fn edges_to(conn: &Connection, callee: EntityId) -> Result<Vec<CallEdge>> {
  let rows = query_edges(conn, "WHERE callee_id = ?1", params![callee.get()])?;
  Ok(rows.into_iter().map(|(_, e)| e).collect())
}

pub fn edges_between(
  conn: &Connection,
  caller: EntityId,
  callee: EntityId,
) -> Result<Vec<CallEdge>> {
  let rows = query_edges(
    conn,
    "WHERE caller_id = ?1 AND callee_id = ?2",
    params![caller.get(), callee.get()],
  )?;
  Ok(rows.into_iter().map(|(_, e)| e).collect())
}

pub fn all_edges(conn: &Connection) -> Result<Vec<CallEdge>> {
  let rows = query_edges(conn, "", [])?;
  Ok(rows.into_iter().map(|(_, e)| e).collect())
}

/// The stored row for exactly this call site, as `(edge_id, edge)`.
pub fn find_call_site(
  conn: &Connection,
  caller: EntityId,
  callee: EntityId,
  site_file_id: Option<EntityId>,
  site_line: Option<u32>,
) -> Result<Option<(i64, CallEdge)>> {
  let mut rows = query_edges(
    conn,
    "WHERE caller_id = ?1 AND callee_id = ?2 AND site_file_id IS ?3 AND site_line IS ?4",
    params![caller.get(), callee.get(), encode_opt_id(site_file_id), site_line],
  )?;
  Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
}

/// Delete the rows matching `edge`'s call site; returns how many went.
pub fn delete_call_site(conn: &Connection, edge: &CallEdge) -> Result<usize> {
  Ok(conn.execute(
    "DELETE FROM edges
     WHERE caller_id = ?1 AND callee_id = ?2 AND site_file_id IS ?3 AND site_line IS ?4",
    params![
      edge.caller.get(),
      edge.callee.get(),
      encode_opt_id(edge.site_file_id),
      edge.site_line,
    ],
  )?)
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

pub fn load_snapshot(conn: &Connection) -> Result<Snapshot> {
  let entities = list_entities(conn, &EntityFilter::default())?;
  let edges = all_edges(conn)?;
  Ok(Snapshot { entities, edges })
}

pub fn load_call_graph(conn: &Connection) -> Result<CallGraph> {
  let mut stmt = conn.prepare(
    "SELECT id FROM entities
     WHERE kind = 'function' AND lifecycle_state = 'finalized'
     ORDER BY id",
  )?;
  let functions = stmt
    .query_map([], |r| r.get::<_, i64>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  let edges = all_edges(conn)?;
  Ok(CallGraph::build(functions.into_iter().map(EntityId), &edges))
}

// ─── Audit log ───────────────────────────────────────────────────────────────

/// Append `event` unconditionally and return its sequence number.
pub fn insert_audit(conn: &Connection, event: &AuditEvent, now: DateTime<Utc>) -> Result<i64> {
  conn.execute(
    "INSERT INTO audit_log (recorded_at, event, entity_id, payload) VALUES (?1, ?2, ?3, ?4)",
    params![
      encode_dt(now),
      event.name(),
      encode_opt_id(event.subject()),
      serde_json::to_string(event)?,
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

/// Append `event` if the audit configuration records it.
pub fn append_audit(
  conn: &Connection,
  config: AuditConfig,
  event: &AuditEvent,
  now: DateTime<Utc>,
) -> Result<Option<i64>> {
  if !config.records(event) {
    return Ok(None);
  }
  insert_audit(conn, event, now).map(Some)
}

pub fn audit_records(conn: &Connection, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
  let limit = query.limit.map_or(-1, |l| l as i64);
  let mut stmt = conn.prepare(
    "SELECT seq, recorded_at, payload FROM audit_log
     WHERE (?1 IS NULL OR seq > ?1)
       AND (?2 IS NULL OR entity_id = ?2)
     ORDER BY seq
     LIMIT ?3",
  )?;
  let raws = stmt
    .query_map(params![query.after, encode_opt_id(query.entity), limit], |row| {
      Ok(RawAudit {
        seq:         row.get(0)?,
        recorded_at: row.get(1)?,
        payload:     row.get(2)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawAudit::into_record).collect()
}
