//! Integration tests for `SqliteStore` against an in-memory database.

use anchor_core::{
  Error as CoreError,
  audit::{AuditConfig, AuditEvent, AuditQuery},
  callgraph::{CancelToken, Cycle, ImpactOptions, NewCallEdge},
  checksum::Checksum,
  entity::{Entity, EntityId, EntityKind, ImportRecord, LifecycleState, NewReservation, WorkStatus},
  integrity::{CheckKind, Violation, VerifyOptions},
  lifecycle::FinalizeOutcome,
  store::{EntityFilter, GraphStore},
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory(AuditConfig::default())
    .await
    .expect("in-memory store")
}

fn core(err: &Error) -> &CoreError { err.as_core().expect("expected a domain error") }

/// Reserve and immediately finalize.
async fn create(s: &SqliteStore, input: NewReservation) -> Entity {
  let reserved = s.reserve(input).await.unwrap();
  s.finalize(reserved.id, b"content".to_vec())
    .await
    .unwrap()
    .into_entity()
}

async fn file(s: &SqliteStore, name: &str) -> Entity {
  create(s, NewReservation::new(EntityKind::File, name)).await
}

async fn function(s: &SqliteStore, file: EntityId, name: &str) -> Entity {
  create(s, NewReservation::new(EntityKind::Function, name).under(file)).await
}

/// Delete a row directly, skipping the cascade, to simulate corruption.
async fn raw_delete(s: &SqliteStore, id: EntityId) {
  s.conn
    .call(move |conn| {
      conn.execute("DELETE FROM entities WHERE id = ?1", [id.get()])?;
      Ok(())
    })
    .await
    .unwrap();
}

// ─── Reservation lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn reserve_then_finalize_embeds_id() {
  let s = store().await;

  let reserved = s
    .reserve(NewReservation::new(EntityKind::File, "utils.rs"))
    .await
    .unwrap();
  assert_eq!(reserved.state, LifecycleState::Reserved);
  assert_eq!(reserved.name, "utils.rs");
  assert!(reserved.content_checksum.is_none());

  let outcome = s.finalize(reserved.id, b"fn main() {}".to_vec()).await.unwrap();
  assert!(outcome.is_fresh());
  let entity = outcome.into_entity();
  assert_eq!(entity.name, format!("utils_{}.rs", reserved.id.get()));
  assert_eq!(entity.base_name, "utils.rs");
  assert_eq!(entity.state, LifecycleState::Finalized);
  assert_eq!(entity.content_checksum, Some(Checksum::of(b"fn main() {}")));

  let fetched = s.get(reserved.id).await.unwrap().unwrap();
  assert_eq!(fetched, entity);
}

#[tokio::test]
async fn reserve_collides_with_finalized_name() {
  let s = store().await;
  let existing = file(&s, "utils.rs").await;

  let err = s
    .reserve(NewReservation::new(EntityKind::File, "utils.rs"))
    .await
    .unwrap_err();
  assert!(matches!(
    core(&err),
    CoreError::NameCollision { existing: id, .. } if *id == existing.id
  ));
  assert!(!err.is_storage_failure());

  // Same name, different kind or parent: no collision.
  s.reserve(NewReservation::new(EntityKind::Milestone, "utils.rs"))
    .await
    .unwrap();
  let other = file(&s, "lib.rs").await;
  let f = function(&s, existing.id, "parse").await;
  let g = s
    .reserve(NewReservation::new(EntityKind::Function, "parse").under(other.id))
    .await
    .unwrap();
  assert_ne!(f.id, g.id);
}

#[tokio::test]
async fn reserved_names_may_overlap_until_finalized() {
  let s = store().await;
  let first = s
    .reserve(NewReservation::new(EntityKind::File, "main.rs"))
    .await
    .unwrap();
  let second = s
    .reserve(NewReservation::new(EntityKind::File, "main.rs"))
    .await
    .unwrap();

  s.finalize(first.id, Vec::new()).await.unwrap();
  let err = s.finalize(second.id, Vec::new()).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::NameCollision { .. }));

  let still = s.get(second.id).await.unwrap().unwrap();
  assert_eq!(still.state, LifecycleState::Reserved);
}

#[tokio::test]
async fn finalize_is_idempotent() {
  let s = store().await;
  let reserved = s
    .reserve(NewReservation::new(EntityKind::Milestone, "v1"))
    .await
    .unwrap();

  let first = s.finalize(reserved.id, b"one".to_vec()).await.unwrap();
  let second = s.finalize(reserved.id, b"two".to_vec()).await.unwrap();

  assert!(first.is_fresh());
  assert!(matches!(second, FinalizeOutcome::AlreadyFinalized(_)));
  assert_eq!(first.entity(), second.entity());
  assert_eq!(
    second.entity().content_checksum,
    Some(Checksum::of(b"one"))
  );
}

#[tokio::test]
async fn finalize_requires_finalized_parent() {
  let s = store().await;
  let parent = s
    .reserve(NewReservation::new(EntityKind::File, "a.rs"))
    .await
    .unwrap();
  let child = s
    .reserve(NewReservation::new(EntityKind::Function, "f").under(parent.id))
    .await
    .unwrap();

  let err = s.finalize(child.id, Vec::new()).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::InvalidParent { .. }));

  s.finalize(parent.id, Vec::new()).await.unwrap();
  assert!(s.finalize(child.id, Vec::new()).await.unwrap().is_fresh());
}

#[tokio::test]
async fn reserve_rejects_bad_parents() {
  let s = store().await;
  let milestone = create(&s, NewReservation::new(EntityKind::Milestone, "m")).await;

  let orphan = s
    .reserve(NewReservation::new(EntityKind::Function, "f"))
    .await
    .unwrap_err();
  assert!(matches!(core(&orphan), CoreError::InvalidParent { .. }));

  let wrong = s
    .reserve(NewReservation::new(EntityKind::Function, "f").under(milestone.id))
    .await
    .unwrap_err();
  assert!(matches!(core(&wrong), CoreError::InvalidParent { .. }));

  let missing = s
    .reserve(NewReservation::new(EntityKind::Task, "t").under(EntityId(999)))
    .await
    .unwrap_err();
  assert!(matches!(core(&missing), CoreError::InvalidParent { .. }));
}

#[tokio::test]
async fn rename_only_while_reserved() {
  let s = store().await;
  let reserved = s
    .reserve(NewReservation::new(EntityKind::File, "draft.rs"))
    .await
    .unwrap();

  let renamed = s.rename(reserved.id, "final.rs".into()).await.unwrap();
  assert_eq!(renamed.name, "final.rs");
  assert_eq!(renamed.base_name, "final.rs");

  s.finalize(reserved.id, Vec::new()).await.unwrap();
  let err = s.rename(reserved.id, "again.rs".into()).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::AlreadyFinalized(id) if *id == reserved.id));
}

#[tokio::test]
async fn abandon_removes_reservation_and_rejects_finalized() {
  let s = store().await;
  let reserved = s
    .reserve(NewReservation::new(EntityKind::File, "tmp.rs"))
    .await
    .unwrap();
  let report = s.abandon(reserved.id).await.unwrap();
  assert_eq!(report.ids(), vec![reserved.id]);
  assert!(s.get(reserved.id).await.unwrap().is_none());

  let kept = file(&s, "kept.rs").await;
  let err = s.abandon(kept.id).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::InvalidTransition { .. }));
  assert!(s.get(kept.id).await.unwrap().is_some());

  let err = s.abandon(EntityId(999)).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::NotFound(_)));
}

#[tokio::test]
async fn ids_are_never_reused() {
  let s = store().await;
  let first = file(&s, "a.rs").await;
  let second = file(&s, "b.rs").await;
  s.delete(second.id).await.unwrap();

  let third = file(&s, "b.rs").await;
  assert!(third.id > second.id);
  assert!(third.id > first.id);

  let reserved = s
    .reserve(NewReservation::new(EntityKind::File, "c.rs"))
    .await
    .unwrap();
  s.abandon(reserved.id).await.unwrap();
  let fourth = s
    .reserve(NewReservation::new(EntityKind::File, "c.rs"))
    .await
    .unwrap();
  assert!(fourth.id > reserved.id);
}

#[tokio::test]
async fn delete_cascades_to_descendants_and_edges() {
  let s = store().await;
  let a = file(&s, "a.rs").await;
  let b = file(&s, "b.rs").await;
  let f = function(&s, a.id, "f").await;
  let g = function(&s, a.id, "g").await;
  let h = function(&s, b.id, "h").await;
  s.add_edge(NewCallEdge::new(h.id, f.id)).await.unwrap();
  s.add_edge(NewCallEdge::new(f.id, g.id)).await.unwrap();

  let report = s.delete(a.id).await.unwrap();
  assert_eq!(report.ids(), vec![a.id, f.id, g.id]);
  assert_eq!(report.edges.len(), 2);

  assert!(s.get(f.id).await.unwrap().is_none());
  assert!(s.callees(h.id).await.unwrap().is_empty());
  assert!(s.get(h.id).await.unwrap().is_some());
}

#[tokio::test]
async fn list_filters_by_kind_and_parent() {
  let s = store().await;
  let a = file(&s, "a.rs").await;
  function(&s, a.id, "f").await;
  function(&s, a.id, "g").await;
  s.reserve(NewReservation::new(EntityKind::Function, "h").under(a.id))
    .await
    .unwrap();

  let functions = s.list(EntityFilter::kind(EntityKind::Function)).await.unwrap();
  assert_eq!(functions.len(), 3);

  let finalized = s
    .list(EntityFilter::children_of(a.id).finalized())
    .await
    .unwrap();
  assert_eq!(finalized.len(), 2);
  assert!(finalized.iter().all(Entity::is_finalized));
}

// ─── Work status ─────────────────────────────────────────────────────────────

async fn task_with(s: &SqliteStore, items: usize, subtasks: usize) -> (Entity, Vec<Entity>) {
  let milestone = create(s, NewReservation::new(EntityKind::Milestone, "m")).await;
  let task = create(s, NewReservation::new(EntityKind::Task, "t").under(milestone.id)).await;
  let mut children = Vec::new();
  for i in 0..items {
    let input = NewReservation::new(EntityKind::Item, format!("item-{i}")).under(task.id);
    children.push(create(s, input).await);
  }
  for i in 0..subtasks {
    let input = NewReservation::new(EntityKind::Subtask, format!("sub-{i}")).under(task.id);
    children.push(create(s, input).await);
  }
  (task, children)
}

#[tokio::test]
async fn completing_last_item_completes_task() {
  let s = store().await;
  let (task, items) = task_with(&s, 2, 0).await;

  let first = s.complete(items[0].id).await.unwrap();
  assert_eq!(first.entity.status, WorkStatus::Completed);
  assert!(first.auto_completed.is_none());

  let second = s.complete(items[1].id).await.unwrap();
  let auto = second.auto_completed.expect("task auto-completes");
  assert_eq!(auto.id, task.id);

  let stored = s.get(task.id).await.unwrap().unwrap();
  assert_eq!(stored.status, WorkStatus::Completed);
}

#[tokio::test]
async fn pending_subtask_blocks_task() {
  let s = store().await;
  let (task, children) = task_with(&s, 0, 1).await;

  let err = s.complete(task.id).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::InvalidTransition { .. }));

  s.complete(children[0].id).await.unwrap();
  let stored = s.get(task.id).await.unwrap().unwrap();
  assert!(stored.is_completed());
}

#[tokio::test]
async fn code_entities_have_no_completion() {
  let s = store().await;
  let a = file(&s, "a.rs").await;
  let err = s.complete(a.id).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::InvalidTransition { .. }));
}

// ─── Call edges and graph queries ────────────────────────────────────────────

#[tokio::test]
async fn repeated_call_site_bumps_count() {
  let s = store().await;
  let a = file(&s, "a.rs").await;
  let f = function(&s, a.id, "f").await;
  let g = function(&s, a.id, "g").await;

  s.add_edge(NewCallEdge::new(f.id, g.id).at(a.id, 10)).await.unwrap();
  let again = s.add_edge(NewCallEdge::new(f.id, g.id).at(a.id, 10)).await.unwrap();
  assert_eq!(again.occurrence_count, 2);

  s.add_edge(NewCallEdge::new(f.id, g.id).at(a.id, 20)).await.unwrap();
  assert_eq!(s.callees(f.id).await.unwrap().len(), 2);
  assert_eq!(s.callers(g.id).await.unwrap().len(), 2);

  let removed = s.remove_edge(f.id, g.id).await.unwrap();
  assert_eq!(removed.len(), 2);
  assert!(s.callees(f.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn edges_require_function_endpoints() {
  let s = store().await;
  let a = file(&s, "a.rs").await;
  let f = function(&s, a.id, "f").await;

  let err = s.add_edge(NewCallEdge::new(f.id, a.id)).await.unwrap_err();
  assert!(matches!(
    core(&err),
    CoreError::WrongKind { expected: EntityKind::Function, found: EntityKind::File, .. }
  ));

  let err = s
    .add_edge(NewCallEdge::new(f.id, EntityId(999)))
    .await
    .unwrap_err();
  assert!(matches!(core(&err), CoreError::NotFound(_)));
}

#[tokio::test]
async fn finds_three_function_cycle() {
  let s = store().await;
  let src = file(&s, "a.rs").await;
  let a = function(&s, src.id, "a").await;
  let b = function(&s, src.id, "b").await;
  let c = function(&s, src.id, "c").await;
  s.add_edge(NewCallEdge::new(a.id, b.id)).await.unwrap();
  s.add_edge(NewCallEdge::new(b.id, c.id)).await.unwrap();
  s.add_edge(NewCallEdge::new(c.id, a.id)).await.unwrap();

  let cycles = s.find_cycles(CancelToken::new()).await.unwrap();
  assert_eq!(cycles, vec![Cycle(vec![a.id, b.id, c.id])]);

  s.remove_edge(c.id, a.id).await.unwrap();
  assert!(s.find_cycles(CancelToken::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn impact_radius_follows_callers() {
  let s = store().await;
  let src = file(&s, "a.rs").await;
  let a = function(&s, src.id, "a").await;
  let b = function(&s, src.id, "b").await;
  let c = function(&s, src.id, "c").await;
  s.add_edge(NewCallEdge::new(a.id, b.id)).await.unwrap();
  s.add_edge(NewCallEdge::new(b.id, c.id)).await.unwrap();

  let impact = s
    .impact_radius(c.id, ImpactOptions::default(), CancelToken::new())
    .await
    .unwrap();
  assert_eq!(impact.distance(b.id), Some(1));
  assert_eq!(impact.distance(a.id), Some(2));
  assert_eq!(impact.affected.len(), 2);

  let err = s
    .impact_radius(EntityId(999), ImpactOptions::default(), CancelToken::new())
    .await
    .unwrap_err();
  assert!(matches!(core(&err), CoreError::NotFound(_)));
}

#[tokio::test]
async fn unreachable_functions_are_reported() {
  let s = store().await;
  let src = file(&s, "main.rs").await;
  let main = function(&s, src.id, "main").await;
  let used = function(&s, src.id, "used").await;
  let dead = function(&s, src.id, "dead").await;
  s.add_edge(NewCallEdge::new(main.id, used.id)).await.unwrap();

  let reach = s
    .unreachable(vec![main.id, EntityId(999)], CancelToken::new())
    .await
    .unwrap();
  assert_eq!(reach.found, vec![main.id]);
  assert_eq!(reach.missing, vec![EntityId(999)]);
  assert_eq!(reach.unreachable, vec![dead.id]);
}

#[tokio::test]
async fn cancelled_query_stops() {
  let s = store().await;
  let src = file(&s, "a.rs").await;
  let a = function(&s, src.id, "a").await;

  let cancel = CancelToken::new();
  cancel.cancel();
  let err = s.unreachable(vec![a.id], cancel).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::Cancelled));
}

// ─── Integrity ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn clean_store_passes_every_check() {
  let s = store().await;
  let src = file(&s, "a.rs").await;
  function(&s, src.id, "f").await;

  let report = s
    .verify(VerifyOptions::default(), CancelToken::new())
    .await
    .unwrap();
  assert!(report.is_clean());
  assert_eq!(report.passed.len(), CheckKind::all().len());
  assert_eq!(report.examined.entities, 2);

  let log = s
    .audit_log(AuditQuery { after: Some(report.audit_seq - 1), ..AuditQuery::default() })
    .await
    .unwrap();
  assert_eq!(log.len(), 1);
  assert!(matches!(
    &log[0].event,
    AuditEvent::IntegrityRun { run_id, .. } if *run_id == report.run_id
  ));
}

#[tokio::test]
async fn orphaned_items_are_auto_fixed() {
  let s = store().await;
  let (task, items) = task_with(&s, 3, 0).await;
  raw_delete(&s, task.id).await;

  let report = s
    .verify(VerifyOptions::default(), CancelToken::new())
    .await
    .unwrap();
  assert_eq!(report.auto_fixed.len(), 3);
  assert!(report.needs_decision.is_empty());
  assert!(!report.passed.contains(&CheckKind::Orphans));

  for item in &items {
    assert!(s.get(item.id).await.unwrap().is_none());
  }

  let log = s.audit_log(AuditQuery::default()).await.unwrap();
  let fixes = log
    .iter()
    .filter(|r| matches!(r.event, AuditEvent::AutoFixed { .. }))
    .count();
  assert_eq!(fixes, 3);
}

#[tokio::test]
async fn orphaned_functions_escalate() {
  let s = store().await;
  let src = file(&s, "a.rs").await;
  let f = function(&s, src.id, "f").await;
  raw_delete(&s, src.id).await;

  let report = s
    .verify(VerifyOptions::default(), CancelToken::new())
    .await
    .unwrap();
  assert!(report.auto_fixed.is_empty());
  assert_eq!(report.needs_decision.len(), 1);
  assert!(matches!(
    &report.needs_decision[0].violation,
    Violation::Orphan { entity, .. } if entity.id == f.id
  ));
  assert!(s.get(f.id).await.unwrap().is_some());
}

#[tokio::test]
async fn report_only_repairs_nothing() {
  let s = store().await;
  let (task, items) = task_with(&s, 3, 0).await;
  raw_delete(&s, task.id).await;

  let report = s
    .verify(VerifyOptions::default().report_only(), CancelToken::new())
    .await
    .unwrap();
  assert!(report.auto_fixed.is_empty());
  assert_eq!(report.needs_decision.len(), 3);
  for item in &items {
    assert!(s.get(item.id).await.unwrap().is_some());
  }
}

#[tokio::test]
async fn imported_duplicates_escalate() {
  let s = store().await;
  let src = file(&s, "lib.rs").await;
  let imported = s
    .import(vec![
      ImportRecord::new(EntityKind::Function, "parse").under(src.id),
      ImportRecord::new(EntityKind::Function, "parse").under(src.id),
    ])
    .await
    .unwrap();
  assert_eq!(imported.len(), 2);

  let report = s
    .verify(VerifyOptions::default(), CancelToken::new())
    .await
    .unwrap();
  assert!(report.auto_fixed.is_empty());
  assert_eq!(report.needs_decision.len(), 1);
  match &report.needs_decision[0].violation {
    Violation::Duplicate { kind, parent_ref, members, name } => {
      assert_eq!(*kind, EntityKind::Function);
      assert_eq!(*parent_ref, Some(src.id));
      assert_eq!(name, "parse");
      let ids: Vec<EntityId> = members.iter().map(|e| e.id).collect();
      assert_eq!(ids, vec![imported[0].id, imported[1].id]);
    }
    other => panic!("unexpected violation: {other:?}"),
  }
  let functions = s.list(EntityFilter::children_of(src.id)).await.unwrap();
  assert_eq!(functions.len(), 2);
}

#[tokio::test]
async fn repaired_duplicates_leave_no_decision() {
  let s = store().await;
  let (task, _) = task_with(&s, 0, 0).await;
  let items = s
    .import(vec![
      ImportRecord::new(EntityKind::Item, "x").under(task.id),
      ImportRecord::new(EntityKind::Item, "x").under(task.id),
    ])
    .await
    .unwrap();
  raw_delete(&s, task.id).await;

  let report = s
    .verify(VerifyOptions::default(), CancelToken::new())
    .await
    .unwrap();
  assert_eq!(report.auto_fixed.len(), 2);
  assert!(report.needs_decision.is_empty());
  for item in &items {
    assert!(s.get(item.id).await.unwrap().is_none());
  }
}

#[tokio::test]
async fn foreign_key_check_alone_catches_missing_parent() {
  let s = store().await;
  let (task, items) = task_with(&s, 2, 0).await;
  raw_delete(&s, task.id).await;

  let report = s
    .verify(VerifyOptions::only([CheckKind::ForeignKeys]), CancelToken::new())
    .await
    .unwrap();
  assert!(report.passed.is_empty());
  assert_eq!(report.auto_fixed.len(), 2);
  assert!(
    report
      .auto_fixed
      .iter()
      .all(|f| f.check == CheckKind::ForeignKeys)
  );
  for item in &items {
    assert!(s.get(item.id).await.unwrap().is_none());
  }
}

#[tokio::test]
async fn checksum_drift_is_reported() {
  let s = store().await;
  let reserved = s
    .reserve(NewReservation::new(EntityKind::File, "a.rs"))
    .await
    .unwrap();
  s.finalize(reserved.id, b"v1".to_vec()).await.unwrap();

  let options = VerifyOptions::only([CheckKind::Checksums])
    .with_artifact(reserved.id, b"v2".to_vec())
    .with_artifact(EntityId(999), b"?".to_vec());
  let report = s.verify(options, CancelToken::new()).await.unwrap();

  assert_eq!(report.drift.len(), 1);
  assert_eq!(report.drift[0].recorded, Some(Checksum::of(b"v1")));
  assert_eq!(report.drift[0].current, Checksum::of(b"v2"));
  assert_eq!(report.unmatched_artifacts, vec![EntityId(999)]);
  assert!(report.passed.is_empty());

  let unchanged = s.get(reserved.id).await.unwrap().unwrap();
  assert_eq!(unchanged.content_checksum, Some(Checksum::of(b"v1")));
}

#[tokio::test]
async fn dangling_edges_are_removed() {
  let s = store().await;
  let src = file(&s, "a.rs").await;
  let f = function(&s, src.id, "f").await;
  let g = function(&s, src.id, "g").await;
  s.add_edge(NewCallEdge::new(f.id, g.id)).await.unwrap();
  raw_delete(&s, g.id).await;

  let report = s
    .verify(VerifyOptions::only([CheckKind::DanglingEdges]), CancelToken::new())
    .await
    .unwrap();
  assert_eq!(report.auto_fixed.len(), 1);
  assert!(s.callees(f.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn verify_reports_cycles_without_fixing() {
  let s = store().await;
  let src = file(&s, "a.rs").await;
  let a = function(&s, src.id, "a").await;
  let b = function(&s, src.id, "b").await;
  s.add_edge(NewCallEdge::new(a.id, b.id)).await.unwrap();
  s.add_edge(NewCallEdge::new(b.id, a.id)).await.unwrap();

  let report = s
    .verify(VerifyOptions::only([CheckKind::Cycles]), CancelToken::new())
    .await
    .unwrap();
  assert_eq!(report.cycles, vec![Cycle(vec![a.id, b.id])]);
  assert!(report.auto_fixed.is_empty());
  assert_eq!(s.callees(a.id).await.unwrap().len(), 1);
}

// ─── Audit log ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn mutations_are_audited_in_order() {
  let s = store().await;
  let reserved = s
    .reserve(NewReservation::new(EntityKind::File, "a.rs"))
    .await
    .unwrap();
  s.finalize(reserved.id, Vec::new()).await.unwrap();
  // A repeated finalize changes nothing and records nothing.
  s.finalize(reserved.id, Vec::new()).await.unwrap();

  let log = s
    .audit_log(AuditQuery { entity: Some(reserved.id), ..AuditQuery::default() })
    .await
    .unwrap();
  let names: Vec<&str> = log.iter().map(|r| r.event.name()).collect();
  assert_eq!(names, vec!["reserved", "finalized"]);
  assert!(log[0].seq < log[1].seq);
}

#[tokio::test]
async fn audit_records_are_enough_to_rebuild_rows() {
  let s = store().await;
  let reserved = s
    .reserve(
      NewReservation::new(EntityKind::Milestone, "m")
        .with_metadata(serde_json::json!({ "owner": "ops" })),
    )
    .await
    .unwrap();
  let mut record = ImportRecord::new(EntityKind::File, "vendored.rs");
  record.content_checksum = Some(Checksum::of(b"vendored"));
  let imported = s.import(vec![record]).await.unwrap();

  let log = s.audit_log(AuditQuery::default()).await.unwrap();
  assert!(matches!(
    &log[0].event,
    AuditEvent::Reserved { id, metadata, .. }
      if *id == reserved.id && metadata["owner"] == "ops"
  ));
  match &log[1].event {
    AuditEvent::Imported { entities } => assert_eq!(entities, &imported),
    other => panic!("unexpected event: {other:?}"),
  }
}

#[tokio::test]
async fn disabled_tracking_still_logs_integrity_runs() {
  let s = SqliteStore::open_in_memory(AuditConfig { tracking: false })
    .await
    .unwrap();
  file(&s, "a.rs").await;
  s.verify(VerifyOptions::default(), CancelToken::new())
    .await
    .unwrap();

  let log = s.audit_log(AuditQuery::default()).await.unwrap();
  assert_eq!(log.len(), 1);
  assert!(matches!(log[0].event, AuditEvent::IntegrityRun { .. }));
}

// ─── Properties ──────────────────────────────────────────────────────────────

mod props {
  use std::collections::BTreeSet;

  use proptest::prelude::*;

  use super::*;

  async fn assert_unique(s: &SqliteStore) {
    let finalized = s
      .list(EntityFilter::kind(EntityKind::File).finalized())
      .await
      .unwrap();
    let unique: BTreeSet<&str> = finalized.iter().map(|e| e.base_name.as_str()).collect();
    assert_eq!(unique.len(), finalized.len());
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// However reservations and finalizations interleave, no two finalized
    /// entities of one kind share a parent and name after any step.
    #[test]
    fn finalized_names_stay_unique(
      ops in prop::collection::vec((0usize..3, any::<bool>()), 1..24),
    ) {
      let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
      rt.block_on(async {
        let s = store().await;
        let names = ["a.rs", "b.rs", "c.rs"];
        let mut reserved = Vec::new();
        for (name, finalize_now) in ops {
          if let Ok(e) = s.reserve(NewReservation::new(EntityKind::File, names[name])).await {
            reserved.push(e.id);
          }
          assert_unique(&s).await;
          if finalize_now && let Some(id) = reserved.pop() {
            let _ = s.finalize(id, Vec::new()).await;
            assert_unique(&s).await;
          }
        }
        for id in reserved {
          let _ = s.finalize(id, Vec::new()).await;
          assert_unique(&s).await;
        }
      });
    }
  }
}
