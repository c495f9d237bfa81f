//! The `GraphStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `anchor-store-sqlite`).
//! Generation workflows and the CLI depend on this abstraction, not on any
//! concrete backend.

use std::future::Future;

use crate::{
  audit::{AuditQuery, AuditRecord},
  callgraph::{CallEdge, CancelToken, Cycle, ImpactOptions, ImpactRadius, NewCallEdge, Reachability},
  entity::{Entity, EntityId, EntityKind, ImportRecord, LifecycleState, NewReservation},
  integrity::{IntegrityReport, VerifyOptions},
  lifecycle::{CompletionOutcome, DeletionReport, FinalizeOutcome},
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`GraphStore::list`]. Results are ordered by id.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
  pub kind:       Option<EntityKind>,
  pub state:      Option<LifecycleState>,
  pub parent_ref: Option<EntityId>,
  pub limit:      Option<usize>,
}

impl EntityFilter {
  pub fn kind(kind: EntityKind) -> Self { Self { kind: Some(kind), ..Self::default() } }

  pub fn children_of(parent: EntityId) -> Self {
    Self { parent_ref: Some(parent), ..Self::default() }
  }

  pub fn finalized(mut self) -> Self {
    self.state = Some(LifecycleState::Finalized);
    self
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a project metadata graph backend.
///
/// Mutations are serialized by the backend and each runs in its own
/// transaction. Expected outcomes (`NotFound`, `NameCollision`,
/// `InvalidTransition`, ...) surface as [`crate::Error`] values wrapped in
/// `Self::Error`; anything else is a storage failure.
pub trait GraphStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Reservation lifecycle ─────────────────────────────────────────────

  /// Allocate an id for an entity whose artifact does not exist yet.
  ///
  /// Fails with `NameCollision` if a finalized entity of the same kind
  /// already holds `(parent_ref, name)`. Reserved entities may share names.
  fn reserve(
    &self,
    input: NewReservation,
  ) -> impl Future<Output = Result<Entity, Self::Error>> + Send + '_;

  /// Change the requested name of a reserved entity.
  fn rename(
    &self,
    id: EntityId,
    name: String,
  ) -> impl Future<Output = Result<Entity, Self::Error>> + Send + '_;

  /// Commit a reservation: embed the id in the name, record the checksum of
  /// `content`, and flip the state. Re-finalizing reports
  /// [`FinalizeOutcome::AlreadyFinalized`] and changes nothing.
  fn finalize(
    &self,
    id: EntityId,
    content: Vec<u8>,
  ) -> impl Future<Output = Result<FinalizeOutcome, Self::Error>> + Send + '_;

  /// Drop a reservation whose artifact was never produced. Rejects finalized
  /// entities with `InvalidTransition`.
  fn abandon(
    &self,
    id: EntityId,
  ) -> impl Future<Output = Result<DeletionReport, Self::Error>> + Send + '_;

  /// Explicitly delete an entity, its descendants, and every call edge
  /// touching them.
  fn delete(
    &self,
    id: EntityId,
  ) -> impl Future<Output = Result<DeletionReport, Self::Error>> + Send + '_;

  /// Bulk-insert finalized entities without uniqueness or parent checks.
  fn import(
    &self,
    records: Vec<ImportRecord>,
  ) -> impl Future<Output = Result<Vec<Entity>, Self::Error>> + Send + '_;

  /// Mark an item, subtask or task completed. Completing the last open child
  /// of a task completes the task too.
  fn complete(
    &self,
    id: EntityId,
  ) -> impl Future<Output = Result<CompletionOutcome, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get(
    &self,
    id: EntityId,
  ) -> impl Future<Output = Result<Option<Entity>, Self::Error>> + Send + '_;

  fn list(
    &self,
    filter: EntityFilter,
  ) -> impl Future<Output = Result<Vec<Entity>, Self::Error>> + Send + '_;

  // ── Call edges ────────────────────────────────────────────────────────

  /// Record a call. Both endpoints must be existing functions; recording the
  /// same call site again bumps its occurrence count.
  fn add_edge(
    &self,
    input: NewCallEdge,
  ) -> impl Future<Output = Result<CallEdge, Self::Error>> + Send + '_;

  /// Remove every edge from `caller` to `callee`, returning what was removed.
  fn remove_edge(
    &self,
    caller: EntityId,
    callee: EntityId,
  ) -> impl Future<Output = Result<Vec<CallEdge>, Self::Error>> + Send + '_;

  /// Stored edges out of `id`, regardless of lifecycle state.
  fn callees(
    &self,
    id: EntityId,
  ) -> impl Future<Output = Result<Vec<CallEdge>, Self::Error>> + Send + '_;

  /// Stored edges into `id`, regardless of lifecycle state.
  fn callers(
    &self,
    id: EntityId,
  ) -> impl Future<Output = Result<Vec<CallEdge>, Self::Error>> + Send + '_;

  // ── Graph queries ─────────────────────────────────────────────────────

  fn find_cycles(
    &self,
    cancel: CancelToken,
  ) -> impl Future<Output = Result<Vec<Cycle>, Self::Error>> + Send + '_;

  fn unreachable(
    &self,
    entry_points: Vec<EntityId>,
    cancel: CancelToken,
  ) -> impl Future<Output = Result<Reachability, Self::Error>> + Send + '_;

  fn impact_radius(
    &self,
    target: EntityId,
    options: ImpactOptions,
    cancel: CancelToken,
  ) -> impl Future<Output = Result<ImpactRadius, Self::Error>> + Send + '_;

  // ── Integrity ─────────────────────────────────────────────────────────

  /// Run the selected checks, apply permitted auto-fixes, and append the
  /// run's audit record.
  fn verify(
    &self,
    options: VerifyOptions,
    cancel: CancelToken,
  ) -> impl Future<Output = Result<IntegrityReport, Self::Error>> + Send + '_;

  fn audit_log(
    &self,
    query: AuditQuery,
  ) -> impl Future<Output = Result<Vec<AuditRecord>, Self::Error>> + Send + '_;
}
