//! Run configuration: the TOML file the CLI loads and the in-memory shape
//! the orchestrator consumes. A `[settings]` table of defaults plus one
//! `[runs.<id>]` table per configured sync pairing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{GitSyncError, Result};

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalSettings {
  /// Default `--after` cutoff (unix seconds) applied when a run doesn't
  /// override it.
  pub default_after: Option<i64>,
  pub default_preserve_commit: Option<bool>,
}

/// The run configuration — immutable for the duration of a run.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
  pub source_dir: PathBuf,
  #[serde(default = "default_subdir")]
  pub source_subdir: String,
  pub target_dir: PathBuf,
  #[serde(default = "default_subdir")]
  pub target_subdir: String,

  #[serde(default)]
  pub include_branches: Vec<String>,
  #[serde(default)]
  pub exclude_branches: Vec<String>,
  #[serde(default)]
  pub include_tags: Vec<String>,
  #[serde(default)]
  pub exclude_tags: Vec<String>,
  pub add_tag_prefix: Option<String>,
  pub remove_tag_prefix: Option<String>,
  #[serde(default)]
  pub no_tags: bool,

  pub after: Option<i64>,
  pub max_count: Option<usize>,
  #[serde(default)]
  pub preserve_commit: bool,
  #[serde(default)]
  pub filters: Vec<String>,

  #[serde(default)]
  pub squash: bool,
  pub squash_base_branch: Option<String>,

  #[serde(default)]
  pub develop_branches: Vec<String>,
  #[serde(default)]
  pub skip_even_branch: bool,

  #[serde(default)]
  pub plugins: Vec<PathBuf>,
}

fn default_subdir() -> String {
  ".".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ConfigFile {
  #[serde(default)]
  pub settings: GlobalSettings,
  #[serde(default)]
  pub runs: HashMap<String, RunConfig>,
}

/// The default config path: `<config dir>/gitsync/config.toml`, via the
/// platform's standard `ProjectDirs` convention.
pub fn get_default_config_path() -> Result<PathBuf> {
  if let Some(proj_dirs) = ProjectDirs::from("com", "gitsync", "gitsync") {
    Ok(proj_dirs.config_dir().join("config.toml"))
  } else {
    Err(GitSyncError::Config(
      "Could not determine standard configuration directory.".to_string(),
    ))
  }
}

pub fn load_config(path_override: Option<&Path>) -> Result<ConfigFile> {
  let config_path = match path_override {
    Some(p) => p.to_path_buf(),
    None => get_default_config_path()?,
  };

  log::debug!("loading configuration from: {}", config_path.display());

  match std::fs::read_to_string(&config_path) {
    Ok(content) => Ok(toml::from_str(&content)?),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(GitSyncError::ConfigNotFound(config_path)),
    Err(e) => Err(GitSyncError::Io(e)),
  }
}

pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let toml_string = toml::to_string_pretty(config)?;
  std::fs::write(path, toml_string)?;
  Ok(())
}

pub const DEFAULT_CONFIG_CONTENT: &str = r#"# gitsync configuration file.
# Define global defaults and one [runs.<id>] table per source/target pairing.

[settings]
# default_after = 0
# default_preserve_commit = true

# [runs.my-library]
# source-dir = "/path/to/monorepo"
# source-subdir = "packages/my-library"
# target-dir = "/path/to/my-library-public"
# target-subdir = "."
# include-branches = ["main", "release/*"]
# exclude-branches = []
# add-tag-prefix = "my-library-v"
# preserve-commit = true
# squash = false
"#;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_minimal_run() {
    let toml_str = r#"
      [runs.demo]
      source-dir = "/src"
      target-dir = "/tgt"
    "#;
    let cfg: ConfigFile = toml::from_str(toml_str).unwrap();
    let run = cfg.runs.get("demo").unwrap();
    assert_eq!(run.source_subdir, ".");
    assert_eq!(run.target_subdir, ".");
    assert!(!run.squash);
    assert!(run.include_branches.is_empty());
  }
}
