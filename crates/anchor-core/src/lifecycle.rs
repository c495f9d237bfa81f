//! The reservation lifecycle: `reserved` → `finalized` → (explicit) deletion.
//!
//! The rules here are pure. Backends load the entities involved, ask these
//! functions whether a transition is allowed, and persist the result inside
//! one write transaction.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  callgraph::CallEdge,
  entity::{Entity, EntityId, EntityKind, WorkStatus},
};

// ─── Canonical names ─────────────────────────────────────────────────────────

/// The finalized form of `name`: the id appended as `_<id>`, ahead of the
/// extension for files (`utils.rs` → `utils_42.rs`).
///
/// Idempotent: a name already carrying this id's suffix is left alone.
pub fn canonical_name(kind: EntityKind, name: &str, id: EntityId) -> String {
  let suffix = format!("_{}", id.get());
  let (stem, extension) = if kind.has_extension() {
    split_extension(name)
  } else {
    (name, None)
  };
  let stem = stem.strip_suffix(suffix.as_str()).unwrap_or(stem);
  match extension {
    Some(ext) => format!("{stem}{suffix}.{ext}"),
    None => format!("{stem}{suffix}"),
  }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
  match name.rfind('.') {
    // A leading dot is a hidden file, not an extension.
    Some(i) if i > 0 && i + 1 < name.len() => (&name[..i], Some(&name[i + 1..])),
    _ => (name, None),
  }
}

// ─── Parent validation ───────────────────────────────────────────────────────

/// Check a prospective `parent_ref` for an entity of `kind`.
///
/// `parent` is the resolved parent row, `None` when `parent_ref` is `None` or
/// does not resolve. Reserved parents are accepted here; finalization asks
/// for more (see [`check_finalizable`]).
pub fn check_parent(
  kind: EntityKind,
  parent_ref: Option<EntityId>,
  parent: Option<&Entity>,
) -> Result<()> {
  let rule = kind.parent_rule();
  match (parent_ref, parent) {
    (None, _) if rule.nullable => Ok(()),
    (None, _) => Err(Error::InvalidParent {
      kind,
      reason: format!("a {kind} must have a {} parent", rule.kind),
    }),
    (Some(id), None) => Err(Error::InvalidParent {
      kind,
      reason: format!("parent {id} does not exist"),
    }),
    (Some(id), Some(p)) if p.kind != rule.kind => Err(Error::InvalidParent {
      kind,
      reason: format!("parent {id} is a {}, expected a {}", p.kind, rule.kind),
    }),
    (Some(_), Some(_)) => Ok(()),
  }
}

/// Check that a reserved `entity` may be finalized under `parent`.
///
/// Finalized entities may only hang under finalized parents, so a child
/// cannot be finalized before its container.
pub fn check_finalizable(entity: &Entity, parent: Option<&Entity>) -> Result<()> {
  check_parent(entity.kind, entity.parent_ref, parent)?;
  match parent {
    Some(p) if !p.is_finalized() => Err(Error::InvalidParent {
      kind:   entity.kind,
      reason: format!("parent {} must be finalized first", p.id),
    }),
    _ => Ok(()),
  }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of [`crate::store::GraphStore::finalize`].
///
/// Re-finalizing is a benign race in multi-step workflows, so it is reported
/// as a successful outcome rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "entity", rename_all = "snake_case")]
pub enum FinalizeOutcome {
  Finalized(Entity),
  AlreadyFinalized(Entity),
}

impl FinalizeOutcome {
  pub fn entity(&self) -> &Entity {
    match self {
      Self::Finalized(e) | Self::AlreadyFinalized(e) => e,
    }
  }

  pub fn into_entity(self) -> Entity {
    match self {
      Self::Finalized(e) | Self::AlreadyFinalized(e) => e,
    }
  }

  pub fn is_fresh(&self) -> bool { matches!(self, Self::Finalized(_)) }
}

/// Everything removed by an explicit deletion or an abandon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionReport {
  /// Removed entities, the requested one first, then descendants by id.
  pub entities: Vec<Entity>,
  pub edges:    Vec<CallEdge>,
}

impl DeletionReport {
  pub fn ids(&self) -> Vec<EntityId> { self.entities.iter().map(|e| e.id).collect() }

  pub fn is_empty(&self) -> bool { self.entities.is_empty() && self.edges.is_empty() }
}

// ─── Work completion ─────────────────────────────────────────────────────────

/// Result of [`crate::store::GraphStore::complete`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
  pub entity:         Entity,
  /// The parent task, when completing this entity finished its last
  /// outstanding item or subtask.
  pub auto_completed: Option<Entity>,
}

/// Check that `entity` may be marked completed given its finalized children.
///
/// Items and subtasks complete independently. A task is blocked while any of
/// its subtasks is pending; pending items do not block it.
pub fn check_completable(entity: &Entity, children: &[Entity]) -> Result<()> {
  if !entity.is_finalized() {
    return Err(Error::invalid_transition(
      entity.id,
      "only finalized entities can be completed",
    ));
  }
  match entity.kind {
    EntityKind::Item | EntityKind::Subtask => Ok(()),
    EntityKind::Task => {
      let blocking: Vec<String> = children
        .iter()
        .filter(|c| c.kind == EntityKind::Subtask && !c.is_completed())
        .map(|c| c.id.to_string())
        .collect();
      if blocking.is_empty() {
        Ok(())
      } else {
        Err(Error::invalid_transition(
          entity.id,
          format!("blocked by pending subtasks {}", blocking.join(", ")),
        ))
      }
    }
    other => Err(Error::invalid_transition(
      entity.id,
      format!("a {other} has no completion state"),
    )),
  }
}

/// Whether a pending task whose children are `children` should complete on
/// its own: every finalized item and subtask is done.
pub fn should_auto_complete(task: &Entity, children: &[Entity]) -> bool {
  task.kind == EntityKind::Task
    && task.status == WorkStatus::Pending
    && children
      .iter()
      .filter(|c| c.is_finalized())
      .filter(|c| matches!(c.kind, EntityKind::Item | EntityKind::Subtask))
      .all(Entity::is_completed)
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::entity::LifecycleState;

  fn entity(id: i64, kind: EntityKind, state: LifecycleState) -> Entity {
    let now = Utc::now();
    Entity {
      id: EntityId(id),
      kind,
      name: format!("e{id}"),
      base_name: format!("e{id}"),
      parent_ref: None,
      state,
      content_checksum: None,
      status: WorkStatus::Pending,
      metadata: serde_json::json!({}),
      created_at: now,
      updated_at: now,
    }
  }

  #[test]
  fn canonical_name_appends_id() {
    assert_eq!(
      canonical_name(EntityKind::Function, "parse_config", EntityId(7)),
      "parse_config_7"
    );
  }

  #[test]
  fn canonical_name_keeps_file_extension_last() {
    assert_eq!(
      canonical_name(EntityKind::File, "utils.rs", EntityId(42)),
      "utils_42.rs"
    );
    assert_eq!(
      canonical_name(EntityKind::File, ".gitignore", EntityId(3)),
      ".gitignore_3"
    );
  }

  #[test]
  fn canonical_name_is_idempotent() {
    let once = canonical_name(EntityKind::File, "lib.rs", EntityId(9));
    let twice = canonical_name(EntityKind::File, &once, EntityId(9));
    assert_eq!(once, twice);
  }

  #[test]
  fn functions_must_live_in_files() {
    let err = check_parent(EntityKind::Function, None, None).unwrap_err();
    assert!(matches!(err, Error::InvalidParent { kind: EntityKind::Function, .. }));

    let milestone = entity(1, EntityKind::Milestone, LifecycleState::Finalized);
    let err =
      check_parent(EntityKind::Function, Some(milestone.id), Some(&milestone)).unwrap_err();
    assert!(matches!(err, Error::InvalidParent { .. }));

    let file = entity(2, EntityKind::File, LifecycleState::Reserved);
    assert!(check_parent(EntityKind::Function, Some(file.id), Some(&file)).is_ok());
  }

  #[test]
  fn finalization_requires_finalized_parent() {
    let file = entity(1, EntityKind::File, LifecycleState::Reserved);
    let mut func = entity(2, EntityKind::Function, LifecycleState::Reserved);
    func.parent_ref = Some(file.id);
    assert!(check_finalizable(&func, Some(&file)).is_err());

    let file = Entity { state: LifecycleState::Finalized, ..file };
    assert!(check_finalizable(&func, Some(&file)).is_ok());
  }

  #[test]
  fn pending_subtask_blocks_task() {
    let task = entity(1, EntityKind::Task, LifecycleState::Finalized);
    let sub = entity(2, EntityKind::Subtask, LifecycleState::Finalized);
    let item = entity(3, EntityKind::Item, LifecycleState::Finalized);

    assert!(check_completable(&task, &[sub.clone(), item.clone()]).is_err());

    let done = Entity { status: WorkStatus::Completed, ..sub };
    assert!(check_completable(&task, &[done, item]).is_ok());
  }

  #[test]
  fn reserved_children_do_not_hold_back_auto_completion() {
    let task = entity(1, EntityKind::Task, LifecycleState::Finalized);
    let done = Entity {
      status: WorkStatus::Completed,
      ..entity(2, EntityKind::Item, LifecycleState::Finalized)
    };
    let provisional = entity(3, EntityKind::Item, LifecycleState::Reserved);
    assert!(should_auto_complete(&task, &[done.clone(), provisional]));

    let pending = entity(4, EntityKind::Item, LifecycleState::Finalized);
    assert!(!should_auto_complete(&task, &[done, pending]));
  }

  proptest::proptest! {
    #[test]
    fn canonical_name_embeds_id_once(
      name in "[a-z_]{1,12}(\\.[a-z]{1,3})?",
      id in 1i64..100_000,
    ) {
      let kind = EntityKind::File;
      let once = canonical_name(kind, &name, EntityId(id));
      proptest::prop_assert_eq!(&canonical_name(kind, &once, EntityId(id)), &once);
      let suffix = format!("_{id}");
      proptest::prop_assert!(once.contains(&suffix));
    }
  }
}
