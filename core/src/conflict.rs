//! C7 — conflict diverter: parks diverged history on a `-gitsync-conflict`
//! branch so a human can reconcile it later.

use std::path::Path;

use log::warn;

use crate::error::Result;
use crate::git::GitDriver;
use crate::refs::CONFLICT_SUFFIX;

pub struct ConflictDiverter<'a> {
  git: &'a GitDriver,
}

impl<'a> ConflictDiverter<'a> {
  pub fn new(git: &'a GitDriver) -> Self {
    ConflictDiverter { git }
  }

  /// Diverts the current branch at `failing_source_hash` onto a conflict
  /// branch. Returns the new branch name; the caller is left checked out
  /// on it.
  pub fn divert(
    &self,
    source_repo: &Path,
    source_paths: &[String],
    target_repo: &Path,
    target_paths: &[String],
    current_branch: &str,
    failing_source_hash: &str,
  ) -> Result<String> {
    // Resolve any half-applied merge/apply state before we start moving refs.
    let _ = self.git.try_output(&["checkout", "--theirs", "."], target_repo)?;

    let located = self
      .locate_prior_counterpart(source_repo, source_paths, target_repo, target_paths, failing_source_hash)?
      .unwrap_or_else(|| "HEAD".to_string());

    self.git.output(&["reset", "--hard", "HEAD"], target_repo)?;

    let conflict_branch = format!("{current_branch}{CONFLICT_SUFFIX}");
    warn!("diverting branch \"{current_branch}\" to \"{conflict_branch}\" rooted at {located}");
    self
      .git
      .output(&["checkout", "-B", &conflict_branch, &located], target_repo)?;
    Ok(conflict_branch)
  }

  /// Finds the commit immediately before `source_hash` on the scoped
  /// subpath, then resolves its target counterpart via a date+grep search
  /// against every target ref.
  fn locate_prior_counterpart(
    &self,
    source_repo: &Path,
    source_paths: &[String],
    target_repo: &Path,
    target_paths: &[String],
    source_hash: &str,
  ) -> Result<Option<String>> {
    let mut args: Vec<&str> = vec!["log", "--skip=1", "--format=%ct %B", "-1", source_hash];
    if !(source_paths.len() == 1 && source_paths[0] == "./") {
      args.push("--");
      for p in source_paths {
        args.push(p.as_str());
      }
    }
    let stdout = self.git.output(&args, source_repo)?;
    let Some(first_line) = stdout.lines().next() else {
      return Ok(None);
    };
    let mut parts = first_line.splitn(2, ' ');
    let ct = parts.next().unwrap_or("");
    let search_key = parts.next().unwrap_or("");
    if ct.is_empty() || search_key.is_empty() {
      return Ok(None);
    }

    let after = format!("--after={ct}");
    let before = format!("--before={ct}");
    let grep = format!("--grep={search_key}");
    let mut query: Vec<&str> = vec!["log", &after, &before, &grep, "--fixed-strings", "--format=%H", "--all"];
    if !(target_paths.len() == 1 && target_paths[0] == "./") {
      query.push("--");
      for p in target_paths {
        query.push(p.as_str());
      }
    }
    let stdout = self.git.log_output_allowing_unborn_head(&query, target_repo)?;
    let lines: Vec<&str> = stdout.lines().filter(|l| !l.is_empty()).collect();
    if lines.len() == 1 {
      Ok(Some(lines[0].to_string()))
    } else {
      Ok(None)
    }
  }
}
