//! C3 — ref inventory: enumerates and filters a repository's branches.

use std::path::Path;

use globset::{Glob, GlobSetBuilder};

use crate::error::{GitSyncError, Result};
use crate::git::GitDriver;

pub const CONFLICT_SUFFIX: &str = "-gitsync-conflict";

/// Lists local branches, with `origin/X` remote-tracking duplicates of a
/// local `X` already collapsed away — `branches()` returns the list a
/// sync run should consider projecting.
pub struct RefInventory<'a> {
  git: &'a GitDriver,
}

impl<'a> RefInventory<'a> {
  pub fn new(git: &'a GitDriver) -> Self {
    RefInventory { git }
  }

  /// Enumerates `git branch -a`, normalizes names, and rejects the repo
  /// outright if any branch already carries the conflict suffix (I4).
  pub fn branches(&self, repo: &Path) -> Result<Vec<String>> {
    let raw = self.git.output(&["branch", "-a", "--no-color"], repo)?;
    let mut locals = Vec::new();
    let mut remotes = Vec::new();
    for line in raw.lines() {
      let trimmed = strip_status_prefix(line);
      if trimmed.is_empty() || trimmed.contains("->") {
        continue;
      }
      if let Some(rest) = trimmed.strip_prefix("remotes/origin/") {
        remotes.push(rest.to_string());
      } else {
        locals.push(trimmed.to_string());
      }
    }

    let conflicted: Vec<&String> = locals
      .iter()
      .filter(|b| b.ends_with(CONFLICT_SUFFIX))
      .collect();
    if !conflicted.is_empty() {
      let names = conflicted
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");
      return Err(GitSyncError::PreexistingConflictBranches {
        dir: repo.to_path_buf(),
        names,
      });
    }

    let mut all: Vec<String> = locals.clone();
    for remote in remotes {
      if !locals.contains(&remote) {
        all.push(format!("origin/{remote}"));
      }
    }
    all.sort();
    all.dedup();
    Ok(all)
  }

  /// Applies include/exclude glob lists (micromatch-style via `globset`).
  /// An empty include list is treated as `**` (keep everything).
  pub fn filter(names: &[String], include: &[String], exclude: &[String]) -> Result<Vec<String>> {
    let include_patterns: Vec<String> = if include.is_empty() {
      vec!["**".to_string()]
    } else {
      include.to_vec()
    };
    let include_set = build_globset(&include_patterns)?;
    let exclude_set = build_globset(exclude)?;

    Ok(
      names
        .iter()
        .filter(|name| include_set.is_match(name.as_str()) && !exclude_set.is_match(name.as_str()))
        .cloned()
        .collect(),
    )
  }
}

fn build_globset(patterns: &[String]) -> Result<globset::GlobSet> {
  let mut builder = GlobSetBuilder::new();
  for pattern in patterns {
    let glob = Glob::new(pattern)
      .map_err(|e| GitSyncError::Config(format!("invalid glob pattern '{pattern}': {e}")))?;
    builder.add(glob);
  }
  builder
    .build()
    .map_err(|e| GitSyncError::Config(format!("invalid glob set: {e}")))
}

/// `git branch -a` lines are prefixed with a two-character status column
/// (`* `, `+ `, or two spaces).
fn strip_status_prefix(line: &str) -> &str {
  line.get(2..).unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strips_two_char_prefix() {
    assert_eq!(strip_status_prefix("* main"), "main");
    assert_eq!(strip_status_prefix("  feature/x"), "feature/x");
  }

  #[test]
  fn filter_defaults_include_to_everything() {
    let names = vec!["main".to_string(), "dev".to_string()];
    let out = RefInventory::filter(&names, &[], &["dev".to_string()]).unwrap();
    assert_eq!(out, vec!["main".to_string()]);
  }

  #[test]
  fn filter_include_glob() {
    let names = vec!["main".to_string(), "release/1.0".to_string(), "dev".to_string()];
    let out = RefInventory::filter(&names, &["release/*".to_string()], &[]).unwrap();
    assert_eq!(out, vec!["release/1.0".to_string()]);
  }
}
