//! Plugin boundary (Design Notes "Dynamic plugin dispatch").
//!
//! The original engine loads a plugin as a `require()`-able JS module
//! exporting zero or more of `prepare` / `beforeCommit`. Here the boundary
//! is a sidecar subprocess honoring a small JSON request/response protocol
//! on stdin/stdout: `gitsync` invokes `<plugin-path> --describe` once at
//! construction to discover which hooks it implements, then `<plugin-path>
//! <hook-name>` with a JSON context object on stdin for each firing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{GitSyncError, Result};

const KNOWN_HOOKS: &[&str] = &["prepare", "beforeCommit"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HookContext {
  pub source: PathBuf,
  pub target: PathBuf,
  pub options: serde_json::Value,
  /// Populated only for `beforeCommit`: the source hash currently being
  /// projected and the target hash it has been committed as. Stands in
  /// for the original `getTargetHash` accessor, which has no sidecar
  /// analog other than a precomputed value.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub current_source_hash: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub current_target_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
  hooks: Vec<String>,
}

struct LoadedPlugin {
  path: PathBuf,
  hooks: HashSet<String>,
}

/// Holds every configured plugin, each already validated at construction
/// time against the known hook names.
pub struct PluginManager {
  plugins: Vec<LoadedPlugin>,
}

impl PluginManager {
  /// Loads and validates every plugin in `paths`, in declared order.
  /// Fails immediately if any plugin exports a method outside
  /// `{prepare, beforeCommit}`.
  pub fn load(paths: &[PathBuf]) -> Result<Self> {
    let mut plugins = Vec::with_capacity(paths.len());
    for path in paths {
      plugins.push(Self::describe(path)?);
    }
    Ok(PluginManager { plugins })
  }

  fn describe(path: &Path) -> Result<LoadedPlugin> {
    debug!("describing plugin {}", path.display());
    let output = Command::new(path)
      .arg("--describe")
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .output()
      .map_err(GitSyncError::Io)?;
    if !output.status.success() {
      return Err(GitSyncError::PluginFailure {
        path: path.to_path_buf(),
        message: String::from_utf8_lossy(&output.stderr).to_string(),
      });
    }
    let parsed: DescribeResponse = serde_json::from_slice(&output.stdout).map_err(|e| GitSyncError::PluginFailure {
      path: path.to_path_buf(),
      message: format!("invalid --describe response: {e}"),
    })?;

    for hook in &parsed.hooks {
      if !KNOWN_HOOKS.contains(&hook.as_str()) {
        return Err(GitSyncError::UnsupportedPluginMethod {
          method: hook.clone(),
          path: path.to_path_buf(),
        });
      }
    }

    Ok(LoadedPlugin {
      path: path.to_path_buf(),
      hooks: parsed.hooks.into_iter().collect(),
    })
  }

  pub fn run_prepare(&self, ctx: &HookContext) -> Result<()> {
    self.run_hook("prepare", ctx)
  }

  pub fn run_before_commit(&self, ctx: &HookContext) -> Result<()> {
    self.run_hook("beforeCommit", ctx)
  }

  /// Runs every plugin implementing `hook`, in declared order, one
  /// completing before the next begins.
  fn run_hook(&self, hook: &str, ctx: &HookContext) -> Result<()> {
    for plugin in &self.plugins {
      if !plugin.hooks.contains(hook) {
        continue;
      }
      debug!("running {hook} hook of plugin {}", plugin.path.display());
      let payload = serde_json::to_vec(ctx).map_err(|e| GitSyncError::PluginFailure {
        path: plugin.path.clone(),
        message: e.to_string(),
      })?;

      let mut child = Command::new(&plugin.path)
        .arg(hook)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(GitSyncError::Io)?;

      use std::io::Write;
      child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(&payload)?;
      let output = child.wait_with_output().map_err(GitSyncError::Io)?;
      if !output.status.success() {
        return Err(GitSyncError::PluginFailure {
          path: plugin.path.clone(),
          message: String::from_utf8_lossy(&output.stderr).to_string(),
        });
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_plugin_list_loads_trivially() {
    let mgr = PluginManager::load(&[]).unwrap();
    let ctx = HookContext {
      source: PathBuf::from("/src"),
      target: PathBuf::from("/tgt"),
      options: serde_json::json!({}),
      current_source_hash: None,
      current_target_hash: None,
    };
    assert!(mgr.run_prepare(&ctx).is_ok());
    assert!(mgr.run_before_commit(&ctx).is_ok());
  }
}
