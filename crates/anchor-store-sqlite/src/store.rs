//! The SQLite implementation of [`GraphStore`].
//!
//! Each public operation is one `call` onto the connection thread, and each
//! mutation inside it is one transaction. The closures return this crate's
//! `Result` inside `tokio_rusqlite`'s, so domain outcomes such as
//! `NameCollision` roll the transaction back without being mistaken for
//! database failures.

use std::{collections::BTreeSet, path::Path};

use anchor_core::{
  Error as CoreError,
  audit::{AuditConfig, AuditEvent, AuditQuery, AuditRecord},
  callgraph::{
    CallEdge, CallGraph, CancelToken, Cycle, ImpactOptions, ImpactRadius, NewCallEdge,
    Reachability,
  },
  checksum::Checksum,
  entity::{Entity, EntityId, EntityKind, ImportRecord, LifecycleState, NewReservation, WorkStatus},
  integrity::{
    self, Finding, IntegrityReport, PlannedFinding, RepairAction, Resolution, VerifyOptions,
  },
  lifecycle::{self, CompletionOutcome, DeletionReport, FinalizeOutcome},
  store::{EntityFilter, GraphStore},
};
use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::{
  Result,
  encode::encode_dt,
  queries::{self, NewRow},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A project metadata graph backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted and every
/// clone shares the same writer thread.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
  audit:           AuditConfig,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>, audit: AuditConfig) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, audit };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory(audit: AuditConfig) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, audit };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub fn audit_config(&self) -> AuditConfig { self.audit }

  /// Load the finalized-function call graph from one read transaction.
  async fn call_graph(&self) -> Result<CallGraph> {
    self.conn.call(|conn| Ok(call_graph_tx(conn))).await?
  }
}

// ─── Transactions ────────────────────────────────────────────────────────────
//
// Each function below runs on the connection thread and owns exactly one
// transaction. Returning early with `Err` drops the transaction, which rolls
// it back.

fn call_graph_tx(conn: &mut Connection) -> Result<CallGraph> {
  let tx = conn.transaction()?;
  let graph = queries::load_call_graph(&tx)?;
  tx.commit()?;
  Ok(graph)
}

fn reserve_tx(conn: &mut Connection, audit: AuditConfig, input: NewReservation) -> Result<Entity> {
  let tx = conn.transaction()?;
  let now = Utc::now();

  let parent = queries::fetch_optional_parent(&tx, input.parent_ref)?;
  lifecycle::check_parent(input.kind, input.parent_ref, parent.as_ref())?;
  queries::ensure_name_free(&tx, input.kind, input.parent_ref, &input.name, None)?;

  let entity = queries::insert_entity(
    &tx,
    NewRow {
      kind:       input.kind,
      name:       &input.name,
      base_name:  &input.name,
      parent_ref: input.parent_ref,
      state:      LifecycleState::Reserved,
      checksum:   None,
      metadata:   &input.metadata,
    },
    now,
  )?;

  queries::append_audit(
    &tx,
    audit,
    &AuditEvent::Reserved {
      id:         entity.id,
      kind:       entity.kind,
      name:       entity.name.clone(),
      parent_ref: entity.parent_ref,
      metadata:   entity.metadata.clone(),
    },
    now,
  )?;
  tx.commit()?;
  Ok(entity)
}

fn rename_tx(conn: &mut Connection, audit: AuditConfig, id: EntityId, name: String) -> Result<Entity> {
  let tx = conn.transaction()?;
  let now = Utc::now();

  let entity = queries::require_entity(&tx, id)?;
  if entity.is_finalized() {
    return Err(CoreError::AlreadyFinalized(id).into());
  }
  queries::ensure_name_free(&tx, entity.kind, entity.parent_ref, &name, Some(id))?;

  tx.execute(
    "UPDATE entities SET name = ?2, base_name = ?2, updated_at = ?3 WHERE id = ?1",
    params![id.get(), name, encode_dt(now)],
  )?;
  queries::append_audit(
    &tx,
    audit,
    &AuditEvent::Renamed { id, from: entity.name.clone(), to: name.clone() },
    now,
  )?;
  tx.commit()?;

  Ok(Entity { base_name: name.clone(), name, updated_at: now, ..entity })
}

fn finalize_tx(
  conn: &mut Connection,
  audit: AuditConfig,
  id: EntityId,
  content: Vec<u8>,
) -> Result<FinalizeOutcome> {
  let tx = conn.transaction()?;
  let now = Utc::now();

  let entity = queries::require_entity(&tx, id)?;
  if entity.is_finalized() {
    return Ok(FinalizeOutcome::AlreadyFinalized(entity));
  }

  let parent = queries::fetch_optional_parent(&tx, entity.parent_ref)?;
  lifecycle::check_finalizable(&entity, parent.as_ref())?;
  // Reserved entities may share a name; the first to finalize wins it.
  queries::ensure_name_free(&tx, entity.kind, entity.parent_ref, &entity.base_name, Some(id))?;

  let name = lifecycle::canonical_name(entity.kind, &entity.base_name, id);
  let checksum = Checksum::of(&content);
  tx.execute(
    "UPDATE entities
     SET name = ?2, lifecycle_state = 'finalized', content_checksum = ?3, updated_at = ?4
     WHERE id = ?1",
    params![id.get(), name, checksum.as_str(), encode_dt(now)],
  )?;
  queries::append_audit(
    &tx,
    audit,
    &AuditEvent::Finalized {
      id,
      from: entity.name.clone(),
      to: name.clone(),
      checksum: checksum.clone(),
    },
    now,
  )?;
  tx.commit()?;

  Ok(FinalizeOutcome::Finalized(Entity {
    name,
    state: LifecycleState::Finalized,
    content_checksum: Some(checksum),
    updated_at: now,
    ..entity
  }))
}

fn abandon_tx(conn: &mut Connection, audit: AuditConfig, id: EntityId) -> Result<DeletionReport> {
  let tx = conn.transaction()?;
  let now = Utc::now();

  let entity = queries::require_entity(&tx, id)?;
  if entity.is_finalized() {
    return Err(
      CoreError::invalid_transition(id, "finalized entities must be deleted, not abandoned")
        .into(),
    );
  }

  let report = queries::delete_cascade(&tx, &entity)?;
  queries::append_audit(
    &tx,
    audit,
    &AuditEvent::Abandoned { removed: report.entities.clone(), edges: report.edges.clone() },
    now,
  )?;
  tx.commit()?;
  Ok(report)
}

fn delete_tx(conn: &mut Connection, audit: AuditConfig, id: EntityId) -> Result<DeletionReport> {
  let tx = conn.transaction()?;
  let now = Utc::now();

  let entity = queries::require_entity(&tx, id)?;
  let report = queries::delete_cascade(&tx, &entity)?;
  queries::append_audit(
    &tx,
    audit,
    &AuditEvent::Deleted { removed: report.entities.clone(), edges: report.edges.clone() },
    now,
  )?;
  tx.commit()?;
  Ok(report)
}

fn import_tx(
  conn: &mut Connection,
  audit: AuditConfig,
  records: Vec<ImportRecord>,
) -> Result<Vec<Entity>> {
  let tx = conn.transaction()?;
  let now = Utc::now();

  let mut imported = Vec::with_capacity(records.len());
  for record in &records {
    imported.push(queries::insert_entity(
      &tx,
      NewRow {
        kind:       record.kind,
        name:       &record.name,
        base_name:  &record.name,
        parent_ref: record.parent_ref,
        state:      LifecycleState::Finalized,
        checksum:   record.content_checksum.as_ref(),
        metadata:   &record.metadata,
      },
      now,
    )?);
  }

  queries::append_audit(
    &tx,
    audit,
    &AuditEvent::Imported { entities: imported.clone() },
    now,
  )?;
  tx.commit()?;
  Ok(imported)
}

fn complete_tx(conn: &mut Connection, audit: AuditConfig, id: EntityId) -> Result<CompletionOutcome> {
  let tx = conn.transaction()?;
  let now = Utc::now();

  let entity = queries::require_entity(&tx, id)?;
  let children = queries::children(&tx, id)?;
  lifecycle::check_completable(&entity, &children)?;
  if entity.is_completed() {
    return Ok(CompletionOutcome { entity, auto_completed: None });
  }

  queries::set_status(&tx, id, WorkStatus::Completed, now)?;
  queries::append_audit(
    &tx,
    audit,
    &AuditEvent::StatusChanged {
      id,
      from: entity.status,
      to: WorkStatus::Completed,
      auto: false,
    },
    now,
  )?;
  let entity = Entity { status: WorkStatus::Completed, updated_at: now, ..entity };

  let mut auto_completed = None;
  if matches!(entity.kind, EntityKind::Item | EntityKind::Subtask)
    && let Some(task) = queries::fetch_optional_parent(&tx, entity.parent_ref)?
    && task.is_finalized()
  {
    let siblings = queries::children(&tx, task.id)?;
    if lifecycle::should_auto_complete(&task, &siblings) {
      queries::set_status(&tx, task.id, WorkStatus::Completed, now)?;
      queries::append_audit(
        &tx,
        audit,
        &AuditEvent::StatusChanged {
          id:   task.id,
          from: task.status,
          to:   WorkStatus::Completed,
          auto: true,
        },
        now,
      )?;
      tracing::info!(task = %task.id, "task auto-completed");
      auto_completed = Some(Entity { status: WorkStatus::Completed, updated_at: now, ..task });
    }
  }

  tx.commit()?;
  Ok(CompletionOutcome { entity, auto_completed })
}

fn require_kind(conn: &Connection, id: EntityId, expected: EntityKind) -> Result<Entity> {
  let entity = queries::require_entity(conn, id)?;
  if entity.kind != expected {
    return Err(CoreError::WrongKind { id, expected, found: entity.kind }.into());
  }
  Ok(entity)
}

fn add_edge_tx(conn: &mut Connection, audit: AuditConfig, input: NewCallEdge) -> Result<CallEdge> {
  let tx = conn.transaction()?;
  let now = Utc::now();

  require_kind(&tx, input.caller, EntityKind::Function)?;
  require_kind(&tx, input.callee, EntityKind::Function)?;
  if let Some(file) = input.site_file_id {
    require_kind(&tx, file, EntityKind::File)?;
  }

  let existing = queries::find_call_site(
    &tx,
    input.caller,
    input.callee,
    input.site_file_id,
    input.site_line,
  )?;
  let edge = match existing {
    Some((edge_id, edge)) => {
      tx.execute(
        "UPDATE edges SET occurrence_count = occurrence_count + 1 WHERE edge_id = ?1",
        params![edge_id],
      )?;
      CallEdge { occurrence_count: edge.occurrence_count + 1, ..edge }
    }
    None => {
      tx.execute(
        "INSERT INTO edges (caller_id, callee_id, occurrence_count, site_file_id, site_line)
         VALUES (?1, ?2, 1, ?3, ?4)",
        params![
          input.caller.get(),
          input.callee.get(),
          input.site_file_id.map(EntityId::get),
          input.site_line,
        ],
      )?;
      CallEdge {
        caller:           input.caller,
        callee:           input.callee,
        occurrence_count: 1,
        site_file_id:     input.site_file_id,
        site_line:        input.site_line,
      }
    }
  };

  queries::append_audit(&tx, audit, &AuditEvent::EdgeAdded { edge: edge.clone() }, now)?;
  tx.commit()?;
  Ok(edge)
}

fn remove_edge_tx(
  conn: &mut Connection,
  audit: AuditConfig,
  caller: EntityId,
  callee: EntityId,
) -> Result<Vec<CallEdge>> {
  let tx = conn.transaction()?;
  let now = Utc::now();

  let removed = queries::edges_between(&tx, caller, callee)?;
  if removed.is_empty() {
    return Ok(removed);
  }
  tx.execute(
    "DELETE FROM edges WHERE caller_id = ?1 AND callee_id = ?2",
    params![caller.get(), callee.get()],
  )?;
  queries::append_audit(&tx, audit, &AuditEvent::EdgeRemoved { removed: removed.clone() }, now)?;
  tx.commit()?;
  Ok(removed)
}

/// Apply one auto-fix, returning the before-image of what was removed.
fn apply_fix(conn: &Connection, action: &RepairAction) -> Result<DeletionReport> {
  match action {
    RepairAction::DeleteEntity { id } => match queries::fetch_entity(conn, *id)? {
      Some(entity) => queries::delete_cascade(conn, &entity),
      // Already removed by an earlier cascade in this run.
      None => Ok(DeletionReport::default()),
    },
    RepairAction::DeleteEdge { edge } => {
      let removed = queries::delete_call_site(conn, edge)?;
      let edges = if removed > 0 { vec![edge.clone()] } else { Vec::new() };
      Ok(DeletionReport { entities: Vec::new(), edges })
    }
    RepairAction::Decide => Ok(DeletionReport::default()),
  }
}

fn verify_tx(
  conn: &mut Connection,
  audit: AuditConfig,
  options: VerifyOptions,
  cancel: CancelToken,
) -> Result<IntegrityReport> {
  let run_id = Uuid::new_v4();
  let started_at = Utc::now();
  let tx = conn.transaction()?;

  let snapshot = queries::load_snapshot(&tx)?;
  let plan = integrity::plan(&snapshot, &options, &cancel)?;

  let mut auto_fixed = Vec::new();
  let mut escalated = Vec::new();
  let mut removed_entities: BTreeSet<EntityId> = BTreeSet::new();
  let mut removed_edges: Vec<CallEdge> = Vec::new();
  for PlannedFinding { finding, resolution } in plan.findings {
    match resolution {
      Resolution::Escalate => escalated.push(finding),
      Resolution::AutoFix => {
        let removed = apply_fix(&tx, &finding.action)?;
        removed_entities.extend(removed.ids());
        removed_edges.extend(removed.edges.iter().cloned());
        tracing::warn!(
          %run_id,
          check = %finding.check,
          entities = ?removed.ids(),
          edges = removed.edges.len(),
          "integrity auto-fix applied",
        );
        queries::append_audit(
          &tx,
          audit,
          &AuditEvent::AutoFixed {
            run_id,
            finding: finding.clone(),
            removed: removed.entities,
            edges: removed.edges,
          },
          Utc::now(),
        )?;
        auto_fixed.push(finding);
      }
    }
  }

  // The plan was made before any repair; drop what the repairs already took.
  let needs_decision: Vec<Finding> = escalated
    .into_iter()
    .filter_map(|f| f.without_removed(&removed_entities, &removed_edges))
    .collect();

  for drift in &plan.drift {
    tracing::warn!(%run_id, id = %drift.id, name = %drift.name, "checksum drift");
  }

  let mut report = IntegrityReport {
    run_id,
    started_at,
    scope: options.checks.iter().copied().collect(),
    report_only: options.report_only,
    examined: plan.examined,
    passed: plan.passed,
    auto_fixed,
    needs_decision,
    drift: plan.drift,
    cycles: plan.cycles,
    unmatched_artifacts: plan.unmatched_artifacts,
    audit_seq: 0,
  };

  report.audit_seq = queries::insert_audit(
    &tx,
    &AuditEvent::IntegrityRun {
      run_id,
      scope: report.scope.clone(),
      report_only: report.report_only,
      examined: report.examined,
      outcome: report.summary(),
    },
    Utc::now(),
  )?;
  tx.commit()?;
  Ok(report)
}

// ─── GraphStore impl ─────────────────────────────────────────────────────────

impl GraphStore for SqliteStore {
  type Error = crate::Error;

  // ── Reservation lifecycle ─────────────────────────────────────────────────

  async fn reserve(&self, input: NewReservation) -> Result<Entity> {
    let audit = self.audit;
    let entity = self
      .conn
      .call(move |conn| Ok(reserve_tx(conn, audit, input)))
      .await??;
    tracing::info!(id = %entity.id, kind = %entity.kind, name = %entity.name, "reserved");
    Ok(entity)
  }

  async fn rename(&self, id: EntityId, name: String) -> Result<Entity> {
    let audit = self.audit;
    let entity = self
      .conn
      .call(move |conn| Ok(rename_tx(conn, audit, id, name)))
      .await??;
    tracing::info!(%id, name = %entity.name, "renamed");
    Ok(entity)
  }

  async fn finalize(&self, id: EntityId, content: Vec<u8>) -> Result<FinalizeOutcome> {
    let audit = self.audit;
    let outcome = self
      .conn
      .call(move |conn| Ok(finalize_tx(conn, audit, id, content)))
      .await??;
    match &outcome {
      FinalizeOutcome::Finalized(e) => {
        tracing::info!(%id, name = %e.name, "finalized");
      }
      FinalizeOutcome::AlreadyFinalized(_) => {
        tracing::debug!(%id, "finalize on an already finalized entity");
      }
    }
    Ok(outcome)
  }

  async fn abandon(&self, id: EntityId) -> Result<DeletionReport> {
    let audit = self.audit;
    let report = self
      .conn
      .call(move |conn| Ok(abandon_tx(conn, audit, id)))
      .await??;
    tracing::info!(%id, removed = report.entities.len(), "abandoned");
    Ok(report)
  }

  async fn delete(&self, id: EntityId) -> Result<DeletionReport> {
    let audit = self.audit;
    let report = self
      .conn
      .call(move |conn| Ok(delete_tx(conn, audit, id)))
      .await??;
    tracing::info!(
      %id,
      removed = report.entities.len(),
      edges = report.edges.len(),
      "deleted",
    );
    Ok(report)
  }

  async fn import(&self, records: Vec<ImportRecord>) -> Result<Vec<Entity>> {
    let audit = self.audit;
    let imported = self
      .conn
      .call(move |conn| Ok(import_tx(conn, audit, records)))
      .await??;
    tracing::info!(count = imported.len(), "imported");
    Ok(imported)
  }

  async fn complete(&self, id: EntityId) -> Result<CompletionOutcome> {
    let audit = self.audit;
    let outcome = self
      .conn
      .call(move |conn| Ok(complete_tx(conn, audit, id)))
      .await??;
    tracing::info!(%id, "completed");
    Ok(outcome)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get(&self, id: EntityId) -> Result<Option<Entity>> {
    self
      .conn
      .call(move |conn| Ok(queries::fetch_entity(conn, id)))
      .await?
  }

  async fn list(&self, filter: EntityFilter) -> Result<Vec<Entity>> {
    self
      .conn
      .call(move |conn| Ok(queries::list_entities(conn, &filter)))
      .await?
  }

  // ── Call edges ────────────────────────────────────────────────────────────

  async fn add_edge(&self, input: NewCallEdge) -> Result<CallEdge> {
    let audit = self.audit;
    let edge = self
      .conn
      .call(move |conn| Ok(add_edge_tx(conn, audit, input)))
      .await??;
    tracing::debug!(
      caller = %edge.caller,
      callee = %edge.callee,
      occurrences = edge.occurrence_count,
      "edge recorded",
    );
    Ok(edge)
  }

  async fn remove_edge(&self, caller: EntityId, callee: EntityId) -> Result<Vec<CallEdge>> {
    let audit = self.audit;
    let removed = self
      .conn
      .call(move |conn| Ok(remove_edge_tx(conn, audit, caller, callee)))
      .await??;
    tracing::debug!(%caller, %callee, removed = removed.len(), "edges removed");
    Ok(removed)
  }

  async fn callees(&self, id: EntityId) -> Result<Vec<CallEdge>> {
    self
      .conn
      .call(move |conn| Ok(queries::edges_from(conn, id)))
      .await?
  }

  async fn callers(&self, id: EntityId) -> Result<Vec<CallEdge>> {
    self
      .conn
      .call(move |conn| Ok(queries::edges_to(conn, id)))
      .await?
  }

  // ── Graph queries ─────────────────────────────────────────────────────────

  async fn find_cycles(&self, cancel: CancelToken) -> Result<Vec<Cycle>> {
    let graph = self.call_graph().await?;
    let cycles = graph.cycles(&cancel)?;
    tracing::debug!(nodes = graph.node_count(), cycles = cycles.len(), "cycle scan");
    Ok(cycles)
  }

  async fn unreachable(
    &self,
    entry_points: Vec<EntityId>,
    cancel: CancelToken,
  ) -> Result<Reachability> {
    let graph = self.call_graph().await?;
    let reach = graph.reachability(&entry_points, &cancel)?;
    if !reach.missing.is_empty() {
      tracing::warn!(missing = ?reach.missing, "unknown entry points");
    }
    tracing::debug!(unreachable = reach.unreachable.len(), "reachability scan");
    Ok(reach)
  }

  async fn impact_radius(
    &self,
    target: EntityId,
    options: ImpactOptions,
    cancel: CancelToken,
  ) -> Result<ImpactRadius> {
    let graph = self.call_graph().await?;
    let impact = graph.impact_radius(target, options, &cancel)?;
    tracing::debug!(%target, affected = impact.affected.len(), "impact radius");
    Ok(impact)
  }

  // ── Integrity ─────────────────────────────────────────────────────────────

  async fn verify(&self, options: VerifyOptions, cancel: CancelToken) -> Result<IntegrityReport> {
    let audit = self.audit;
    let report = self
      .conn
      .call(move |conn| Ok(verify_tx(conn, audit, options, cancel)))
      .await??;
    tracing::info!(
      run_id = %report.run_id,
      passed = report.passed.len(),
      auto_fixed = report.auto_fixed.len(),
      needs_decision = report.needs_decision.len(),
      drift = report.drift.len(),
      cycles = report.cycles.len(),
      "integrity run complete",
    );
    Ok(report)
  }

  async fn audit_log(&self, query: AuditQuery) -> Result<Vec<AuditRecord>> {
    self
      .conn
      .call(move |conn| Ok(queries::audit_records(conn, &query)))
      .await?
  }
}
