//! Layered configuration: an optional TOML file under `ANCHOR_*` environment
//! variables.
//!
//! Nested keys use `__` in the environment, e.g.
//! `ANCHOR_AUDIT__TRACKING=false`.

use std::path::{Path, PathBuf};

use anchor_core::{audit::AuditConfig, integrity::IntegrityConfig};
use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path: PathBuf,
  pub audit:      AuditConfig,
  pub integrity:  IntegrityConfig,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("anchor.db"),
      audit:      AuditConfig::default(),
      integrity:  IntegrityConfig::default(),
    }
  }
}

impl Settings {
  /// Read `path` (if present) and the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("ANCHOR")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    let mut settings: Settings = settings
      .try_deserialize()
      .context("failed to deserialise Settings")?;
    settings.store_path = expand_tilde(&settings.store_path);
    Ok(settings)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_yields_defaults() {
    let settings = Settings::load(Path::new("does-not-exist.toml")).unwrap();
    assert!(settings.audit.tracking);
    assert_eq!(settings.integrity.checks.len(), 6);
  }

  #[test]
  fn tilde_expands_against_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    let expanded = expand_tilde(Path::new("~/graph.db"));
    assert_eq!(expanded, PathBuf::from(home).join("graph.db"));
    assert_eq!(expand_tilde(Path::new("/abs.db")), PathBuf::from("/abs.db"));
  }
}
