//! Integrity verification: detect structural corruption and decide, per the
//! repair policy, what may be fixed automatically.
//!
//! [`plan`] is pure. It inspects a [`Snapshot`] and returns findings paired
//! with resolutions; the store applies the auto-fixes inside the same write
//! transaction it took the snapshot in, and assembles the
//! [`IntegrityReport`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator as _};
use uuid::Uuid;

use crate::{
  Result,
  callgraph::{CallEdge, CallGraph, CancelToken, Cycle},
  checksum::Checksum,
  entity::{Entity, EntityId, EntityKind},
};

// ─── Checks ──────────────────────────────────────────────────────────────────

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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckKind {
  /// `parent_ref` null where required, pointing at the wrong kind, or at a
  /// parent that was never finalized. Also claims unresolved parents when
  /// [`CheckKind::Orphans`] is not selected.
  ForeignKeys,
  /// `parent_ref` pointing at an entity that no longer exists.
  Orphans,
  /// Recorded checksum differs from the caller-supplied current content.
  Checksums,
  /// Two finalized entities of one kind sharing `(parent_ref, name)`.
  Duplicates,
  /// Call cycles between finalized functions. Always report-only.
  Cycles,
  /// Call edges whose caller or callee no longer exists.
  DanglingEdges,
}

impl CheckKind {
  pub fn all() -> BTreeSet<CheckKind> { Self::iter().collect() }
}

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Resolution {
  /// Delete without asking.
  AutoFix,
  /// Leave in place and report under `needs_decision`.
  Escalate,
}

/// Severity map deciding which violations are repaired automatically.
///
/// Only leaf-like kinds whose loss erases no tracked work default to
/// [`Resolution::AutoFix`]: items, subtasks and dangling call edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairPolicy {
  pub entities:       BTreeMap<EntityKind, Resolution>,
  pub dangling_edges: Resolution,
}

impl Default for RepairPolicy {
  fn default() -> Self {
    Self {
      entities:       BTreeMap::from([
        (EntityKind::Item, Resolution::AutoFix),
        (EntityKind::Subtask, Resolution::AutoFix),
      ]),
      dangling_edges: Resolution::AutoFix,
    }
  }
}

impl RepairPolicy {
  /// Kinds missing from the map escalate.
  pub fn for_kind(&self, kind: EntityKind) -> Resolution {
    self.entities.get(&kind).copied().unwrap_or(Resolution::Escalate)
  }
}

/// Defaults for integrity runs, loadable from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
  pub checks: BTreeSet<CheckKind>,
  pub policy: RepairPolicy,
}

impl Default for IntegrityConfig {
  fn default() -> Self { Self { checks: CheckKind::all(), policy: RepairPolicy::default() } }
}

/// Parameters for one verification run.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
  pub checks:      BTreeSet<CheckKind>,
  pub policy:      RepairPolicy,
  /// Report every finding under `needs_decision`, repairing nothing.
  pub report_only: bool,
  /// Current artifact content for the checksum check, keyed by entity.
  pub artifacts:   BTreeMap<EntityId, Vec<u8>>,
}

impl Default for VerifyOptions {
  fn default() -> Self { Self::from(&IntegrityConfig::default()) }
}

impl From<&IntegrityConfig> for VerifyOptions {
  fn from(config: &IntegrityConfig) -> Self {
    Self {
      checks:      config.checks.clone(),
      policy:      config.policy.clone(),
      report_only: false,
      artifacts:   BTreeMap::new(),
    }
  }
}

impl VerifyOptions {
  pub fn only(checks: impl IntoIterator<Item = CheckKind>) -> Self {
    Self { checks: checks.into_iter().collect(), ..Self::default() }
  }

  pub fn report_only(mut self) -> Self {
    self.report_only = true;
    self
  }

  pub fn with_artifact(mut self, id: EntityId, content: impl Into<Vec<u8>>) -> Self {
    self.artifacts.insert(id, content.into());
    self
  }
}

// ─── Findings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
  /// Null `parent_ref` on a kind that requires one.
  MissingParent { entity: Entity, expected: EntityKind },
  /// `parent_ref` resolves to an entity of the wrong kind.
  WrongParentKind {
    entity:   Entity,
    parent:   EntityId,
    expected: EntityKind,
    found:    EntityKind,
  },
  /// Finalized entity under a parent that is still only reserved.
  UnfinalizedParent { entity: Entity, parent: EntityId },
  /// `parent_ref` resolves to nothing.
  Orphan {
    entity:   Entity,
    parent:   EntityId,
    expected: EntityKind,
  },
  Duplicate {
    kind:       EntityKind,
    parent_ref: Option<EntityId>,
    name:       String,
    members:    Vec<Entity>,
  },
  DanglingEdge { edge: CallEdge, missing: Vec<EntityId> },
}

impl Violation {
  /// The single entity this violation is about, if any.
  pub fn entity(&self) -> Option<&Entity> {
    match self {
      Self::MissingParent { entity, .. }
      | Self::WrongParentKind { entity, .. }
      | Self::UnfinalizedParent { entity, .. }
      | Self::Orphan { entity, .. } => Some(entity),
      Self::Duplicate { .. } | Self::DanglingEdge { .. } => None,
    }
  }
}

/// The repair that resolves a finding, whether or not it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
  DeleteEntity { id: EntityId },
  DeleteEdge { edge: CallEdge },
  /// Needs a human choice, e.g. which duplicate to keep.
  Decide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
  pub check:     CheckKind,
  pub violation: Violation,
  pub action:    RepairAction,
}

impl Finding {
  /// Drop whatever an earlier repair in the same run already removed.
  ///
  /// Returns `None` when nothing is left to decide: the entity or edge is
  /// gone, or fewer than two duplicates survive.
  pub fn without_removed(
    self,
    entities: &BTreeSet<EntityId>,
    edges: &[CallEdge],
  ) -> Option<Finding> {
    if let Some(entity) = self.violation.entity() {
      return (!entities.contains(&entity.id)).then_some(self);
    }
    let Finding { check, violation, action } = self;
    let violation = match violation {
      Violation::Duplicate { kind, parent_ref, name, members } => {
        let members: Vec<Entity> =
          members.into_iter().filter(|m| !entities.contains(&m.id)).collect();
        if members.len() < 2 {
          return None;
        }
        Violation::Duplicate { kind, parent_ref, name, members }
      }
      Violation::DanglingEdge { edge, .. } if edges.contains(&edge) => return None,
      other => other,
    };
    Some(Finding { check, violation, action })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumDrift {
  pub id:       EntityId,
  pub name:     String,
  pub recorded: Option<Checksum>,
  pub current:  Checksum,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Examined {
  pub entities:  usize,
  pub finalized: usize,
  pub functions: usize,
  pub edges:     usize,
  pub artifacts: usize,
}

// ─── Snapshot & plan ─────────────────────────────────────────────────────────

/// Everything the verifier reads, taken inside one transaction.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
  pub entities: Vec<Entity>,
  pub edges:    Vec<CallEdge>,
}

#[derive(Debug, Clone)]
pub struct PlannedFinding {
  pub finding:    Finding,
  pub resolution: Resolution,
}

#[derive(Debug, Clone, Default)]
pub struct IntegrityPlan {
  pub findings:            Vec<PlannedFinding>,
  pub drift:               Vec<ChecksumDrift>,
  pub cycles:              Vec<Cycle>,
  /// Artifact ids that name no finalized entity.
  pub unmatched_artifacts: Vec<EntityId>,
  pub passed:              Vec<CheckKind>,
  pub examined:            Examined,
}

/// Run the selected checks over `snapshot`.
///
/// Reserved entities are never inspected and never count as missing parents
/// for one another. Findings come out in check order, then by entity id;
/// orphans are grouped by kind first.
pub fn plan(
  snapshot: &Snapshot,
  options: &VerifyOptions,
  cancel: &CancelToken,
) -> Result<IntegrityPlan> {
  let by_id: BTreeMap<EntityId, &Entity> =
    snapshot.entities.iter().map(|e| (e.id, e)).collect();
  let mut finalized: Vec<&Entity> =
    snapshot.entities.iter().filter(|e| e.is_finalized()).collect();
  finalized.sort_by_key(|e| e.id);

  let mut out = IntegrityPlan {
    examined: Examined {
      entities:  snapshot.entities.len(),
      finalized: finalized.len(),
      functions: finalized.iter().filter(|e| e.kind == EntityKind::Function).count(),
      edges:     snapshot.edges.len(),
      artifacts: options.artifacts.len(),
    },
    ..IntegrityPlan::default()
  };

  let policy = &options.policy;
  let push = |out: &mut IntegrityPlan, finding: Finding, resolution: Resolution| {
    let resolution = if options.report_only { Resolution::Escalate } else { resolution };
    out.findings.push(PlannedFinding { finding, resolution });
  };

  let wants = |check: CheckKind| options.checks.contains(&check);

  // Parent references: foreign keys and orphans share one pass. A parent that
  // does not resolve is an orphan when that check runs, and a foreign-key
  // violation otherwise, so each entity gets at most one finding.
  if wants(CheckKind::ForeignKeys) || wants(CheckKind::Orphans) {
    let mut fk = Vec::new();
    let mut orphans = Vec::new();
    for entity in &finalized {
      cancel.check()?;
      if let Some(violation) = parent_violation(entity, &by_id) {
        match violation {
          Violation::Orphan { .. } if wants(CheckKind::Orphans) => orphans.push(violation),
          _ => fk.push(violation),
        }
      }
    }
    // Orphans are grouped by kind, then ordered by id.
    orphans.sort_by_key(|v| v.entity().map(|e| (e.kind, e.id)));
    for (check, found) in [(CheckKind::ForeignKeys, fk), (CheckKind::Orphans, orphans)] {
      if !wants(check) {
        continue;
      }
      for violation in found {
        let entity = violation.entity().map(|e| (e.id, e.kind));
        let Some((id, kind)) = entity else { continue };
        push(
          &mut out,
          Finding { check, violation, action: RepairAction::DeleteEntity { id } },
          policy.for_kind(kind),
        );
      }
    }
  }

  if wants(CheckKind::Checksums) {
    for (id, content) in &options.artifacts {
      cancel.check()?;
      match by_id.get(id).filter(|e| e.is_finalized()) {
        Some(entity) => {
          let current = Checksum::of(content);
          if entity.content_checksum.as_ref() != Some(&current) {
            out.drift.push(ChecksumDrift {
              id: entity.id,
              name: entity.name.clone(),
              recorded: entity.content_checksum.clone(),
              current,
            });
          }
        }
        None => out.unmatched_artifacts.push(*id),
      }
    }
  }

  if wants(CheckKind::Duplicates) {
    let mut groups: BTreeMap<(EntityKind, Option<EntityId>, &str), Vec<Entity>> =
      BTreeMap::new();
    for entity in &finalized {
      groups
        .entry((entity.kind, entity.parent_ref, entity.base_name.as_str()))
        .or_default()
        .push((*entity).clone());
    }
    for ((kind, parent_ref, name), members) in groups {
      if members.len() < 2 {
        continue;
      }
      // The verifier never picks a winner.
      push(
        &mut out,
        Finding {
          check:     CheckKind::Duplicates,
          violation: Violation::Duplicate {
            kind,
            parent_ref,
            name: name.to_owned(),
            members,
          },
          action:    RepairAction::Decide,
        },
        Resolution::Escalate,
      );
    }
  }

  if wants(CheckKind::DanglingEdges) {
    for edge in &snapshot.edges {
      cancel.check()?;
      let mut missing: Vec<EntityId> = [edge.caller, edge.callee]
        .into_iter()
        .filter(|id| !by_id.contains_key(id))
        .collect();
      missing.dedup();
      if missing.is_empty() {
        continue;
      }
      push(
        &mut out,
        Finding {
          check:     CheckKind::DanglingEdges,
          violation: Violation::DanglingEdge { edge: edge.clone(), missing },
          action:    RepairAction::DeleteEdge { edge: edge.clone() },
        },
        policy.dangling_edges,
      );
    }
  }

  if wants(CheckKind::Cycles) {
    let functions = finalized
      .iter()
      .filter(|e| e.kind == EntityKind::Function)
      .map(|e| e.id);
    let graph = CallGraph::build(functions, &snapshot.edges);
    out.cycles = graph.cycles(cancel)?;
  }

  let mut per_check: BTreeMap<CheckKind, usize> = BTreeMap::from([
    (CheckKind::Checksums, out.drift.len()),
    (CheckKind::Cycles, out.cycles.len()),
  ]);
  for planned in &out.findings {
    *per_check.entry(planned.finding.check).or_default() += 1;
  }
  out.passed = options
    .checks
    .iter()
    .copied()
    .filter(|check| per_check.get(check).copied().unwrap_or(0) == 0)
    .collect();

  Ok(out)
}

fn parent_violation(entity: &Entity, by_id: &BTreeMap<EntityId, &Entity>) -> Option<Violation> {
  let rule = entity.kind.parent_rule();
  let Some(parent_id) = entity.parent_ref else {
    return (!rule.nullable).then(|| Violation::MissingParent {
      entity:   entity.clone(),
      expected: rule.kind,
    });
  };
  match by_id.get(&parent_id) {
    None => Some(Violation::Orphan {
      entity:   entity.clone(),
      parent:   parent_id,
      expected: rule.kind,
    }),
    Some(parent) if parent.kind != rule.kind => Some(Violation::WrongParentKind {
      entity:   entity.clone(),
      parent:   parent_id,
      expected: rule.kind,
      found:    parent.kind,
    }),
    Some(parent) if !parent.is_finalized() => Some(Violation::UnfinalizedParent {
      entity: entity.clone(),
      parent: parent_id,
    }),
    Some(_) => None,
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// The structured result of a verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
  pub run_id:              Uuid,
  pub started_at:          DateTime<Utc>,
  pub scope:               Vec<CheckKind>,
  pub report_only:         bool,
  pub examined:            Examined,
  /// Checks that found nothing.
  pub passed:              Vec<CheckKind>,
  pub auto_fixed:          Vec<Finding>,
  pub needs_decision:      Vec<Finding>,
  /// Checksum mismatches for the dependency-sync collaborator to re-index.
  pub drift:               Vec<ChecksumDrift>,
  pub cycles:              Vec<Cycle>,
  pub unmatched_artifacts: Vec<EntityId>,
  /// Sequence number of this run's audit record.
  pub audit_seq:           i64,
}

impl IntegrityReport {
  pub fn is_clean(&self) -> bool {
    self.auto_fixed.is_empty()
      && self.needs_decision.is_empty()
      && self.drift.is_empty()
      && self.cycles.is_empty()
  }

  pub fn summary(&self) -> RunSummary {
    RunSummary {
      passed:         self.passed.clone(),
      auto_fixed:     self.auto_fixed.len(),
      needs_decision: self.needs_decision.len(),
      drift:          self.drift.len(),
      cycles:         self.cycles.len(),
    }
  }
}

/// Counts recorded in the audit log for every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
  pub passed:         Vec<CheckKind>,
  pub auto_fixed:     usize,
  pub needs_decision: usize,
  pub drift:          usize,
  pub cycles:         usize,
}
