//! Subcommands and their dispatch onto a [`GraphStore`].

use std::path::PathBuf;

use anchor_core::{
  audit::AuditQuery,
  callgraph::{CancelToken, ImpactOptions, NewCallEdge},
  entity::{EntityId, EntityKind, ImportRecord, LifecycleState, NewReservation},
  integrity::{CheckKind, IntegrityConfig, VerifyOptions},
  store::{EntityFilter, GraphStore},
};
use anyhow::{Context as _, bail};
use clap::Subcommand;
use serde::Serialize;
use serde_json::json;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Reserve an id for an artifact that does not exist yet.
  Reserve {
    kind:     EntityKind,
    name:     String,
    #[arg(long)]
    parent:   Option<EntityId>,
    /// Free-form JSON object stored with the entity.
    #[arg(long)]
    metadata: Option<String>,
  },
  /// Change the name of a reserved entity.
  Rename { id: EntityId, name: String },
  /// Commit a reservation, recording the checksum of `--content`.
  Finalize {
    id:      EntityId,
    #[arg(long, value_name = "PATH")]
    content: Option<PathBuf>,
  },
  /// Drop a reservation that was never finalized.
  Abandon { id: EntityId },
  /// Delete an entity, its descendants and their call edges.
  Delete { id: EntityId },
  /// Bulk-load finalized entities from a JSON array.
  Import { file: PathBuf },
  /// Mark an item, subtask or task completed.
  Complete { id: EntityId },
  /// Print one entity with its direct call edges.
  Show { id: EntityId },
  List {
    #[arg(long)]
    kind:      Option<EntityKind>,
    #[arg(long)]
    parent:    Option<EntityId>,
    #[arg(long)]
    finalized: bool,
    #[arg(long)]
    limit:     Option<usize>,
  },
  Edge {
    #[command(subcommand)]
    command: EdgeCommand,
  },
  /// List every call cycle between finalized functions.
  Cycles,
  /// Functions not reachable from any of the given entry points.
  Unreachable {
    #[arg(required = true)]
    entry: Vec<EntityId>,
  },
  /// Transitive callers of a function, by distance.
  Impact {
    id:             EntityId,
    #[arg(long)]
    include_target: bool,
  },
  /// Run integrity checks and apply permitted auto-fixes.
  Verify {
    /// Restrict the run to these checks (default: from config).
    #[arg(long = "check")]
    checks:      Vec<CheckKind>,
    /// Repair nothing; report every finding.
    #[arg(long)]
    report_only: bool,
    /// Current artifact content for the checksum check.
    #[arg(long = "artifact", value_name = "ID=PATH", value_parser = parse_artifact)]
    artifacts:   Vec<(EntityId, PathBuf)>,
  },
  /// Print audit records.
  Audit {
    #[arg(long)]
    after:  Option<i64>,
    #[arg(long)]
    entity: Option<EntityId>,
    #[arg(long)]
    limit:  Option<usize>,
  },
}

#[derive(Subcommand, Debug)]
pub enum EdgeCommand {
  /// Record one call from `caller` to `callee`.
  Add {
    caller: EntityId,
    callee: EntityId,
    /// File containing the call site.
    #[arg(long, requires = "line")]
    file:   Option<EntityId>,
    #[arg(long, requires = "file")]
    line:   Option<u32>,
  },
  /// Remove every edge from `caller` to `callee`.
  Remove { caller: EntityId, callee: EntityId },
}

fn parse_artifact(s: &str) -> Result<(EntityId, PathBuf), String> {
  let (id, path) = s
    .split_once('=')
    .ok_or_else(|| format!("expected ID=PATH, got {s:?}"))?;
  let id = id.parse().map_err(|e| format!("bad entity id {id:?}: {e}"))?;
  Ok((id, PathBuf::from(path)))
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// A token cancelled on Ctrl-C, for long graph traversals.
fn ctrl_c_token() -> CancelToken {
  let token = CancelToken::new();
  let handle = token.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupted, cancelling");
      handle.cancel();
    }
  });
  token
}

pub async fn run<S>(store: &S, integrity: &IntegrityConfig, command: Command) -> anyhow::Result<()>
where
  S: GraphStore,
{
  match command {
    Command::Reserve { kind, name, parent, metadata } => {
      let mut input = NewReservation::new(kind, name);
      if let Some(parent) = parent {
        input = input.under(parent);
      }
      if let Some(raw) = metadata {
        let value = serde_json::from_str(&raw).context("--metadata is not valid JSON")?;
        input = input.with_metadata(value);
      }
      print(&store.reserve(input).await?)
    }
    Command::Rename { id, name } => print(&store.rename(id, name).await?),
    Command::Finalize { id, content } => {
      let bytes = match content {
        Some(path) => tokio::fs::read(&path)
          .await
          .with_context(|| format!("failed to read {}", path.display()))?,
        None => Vec::new(),
      };
      print(&store.finalize(id, bytes).await?)
    }
    Command::Abandon { id } => print(&store.abandon(id).await?),
    Command::Delete { id } => print(&store.delete(id).await?),
    Command::Import { file } => {
      let raw = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
      let records: Vec<ImportRecord> =
        serde_json::from_str(&raw).context("import file is not a JSON array of records")?;
      print(&store.import(records).await?)
    }
    Command::Complete { id } => print(&store.complete(id).await?),
    Command::Show { id } => {
      let Some(entity) = store.get(id).await? else {
        bail!("entity not found: {id}");
      };
      let callers = store.callers(id).await?;
      let callees = store.callees(id).await?;
      print(&json!({ "entity": entity, "callers": callers, "callees": callees }))
    }
    Command::List { kind, parent, finalized, limit } => {
      let filter = EntityFilter {
        kind,
        state: finalized.then_some(LifecycleState::Finalized),
        parent_ref: parent,
        limit,
      };
      print(&store.list(filter).await?)
    }
    Command::Edge { command: EdgeCommand::Add { caller, callee, file, line } } => {
      let input = NewCallEdge { caller, callee, site_file_id: file, site_line: line };
      print(&store.add_edge(input).await?)
    }
    Command::Edge { command: EdgeCommand::Remove { caller, callee } } => {
      print(&store.remove_edge(caller, callee).await?)
    }
    Command::Cycles => print(&store.find_cycles(ctrl_c_token()).await?),
    Command::Unreachable { entry } => {
      let reach = store.unreachable(entry, ctrl_c_token()).await?;
      if reach.found.is_empty() {
        tracing::warn!("no entry point is a finalized function; everything is unreachable");
      }
      print(&reach)
    }
    Command::Impact { id, include_target } => {
      let options = ImpactOptions { include_target };
      print(&store.impact_radius(id, options, ctrl_c_token()).await?)
    }
    Command::Verify { checks, report_only, artifacts } => {
      let mut options = VerifyOptions::from(integrity);
      if !checks.is_empty() {
        options.checks = checks.into_iter().collect();
      }
      options.report_only = report_only;
      for (id, path) in artifacts {
        let bytes = tokio::fs::read(&path)
          .await
          .with_context(|| format!("failed to read {}", path.display()))?;
        options = options.with_artifact(id, bytes);
      }
      print(&store.verify(options, ctrl_c_token()).await?)
    }
    Command::Audit { after, entity, limit } => {
      print(&store.audit_log(AuditQuery { after, entity, limit }).await?)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn artifact_argument_splits_on_equals() {
    let (id, path) = parse_artifact("#7=src/lib.rs").unwrap();
    assert_eq!(id, EntityId(7));
    assert_eq!(path, PathBuf::from("src/lib.rs"));

    assert!(parse_artifact("src/lib.rs").is_err());
    assert!(parse_artifact("x=src/lib.rs").is_err());
  }
}
