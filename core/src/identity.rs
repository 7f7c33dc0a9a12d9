//! C5 — identity oracle: source hash -> target hash, via content-and-time
//! correspondence rather than tree identity.

use std::collections::HashMap;
use std::path::Path;

use log::debug;

use crate::error::{GitSyncError, Result};
use crate::git::GitDriver;
use crate::scanner::match_squash_marker;
use crate::squash::SquashRecord;

/// Resolves and caches source-hash -> target-hash correspondences.
/// Invariant: once an entry is set it is never rewritten within a run
/// (grow-only map).
pub struct IdentityOracle<'a> {
  git: &'a GitDriver,
  cache: HashMap<String, String>,
}

impl<'a> IdentityOracle<'a> {
  pub fn new(git: &'a GitDriver) -> Self {
    IdentityOracle {
      git,
      cache: HashMap::new(),
    }
  }

  pub fn cached(&self, source_hash: &str) -> Option<&str> {
    self.cache.get(source_hash).map(|s| s.as_str())
  }

  /// Records a resolution produced by projection itself (C6), so later
  /// lookups for the same source hash are free.
  pub fn record(&mut self, source_hash: &str, target_hash: &str) {
    self
      .cache
      .entry(source_hash.to_string())
      .or_insert_with(|| target_hash.to_string());
  }

  /// Resolves `source_hash` to its target counterpart. `squash_record` is
  /// consulted as a second fallback (for tags/refs pointing into the
  /// middle of a squashed range); pass `None` when squash mode is off.
  pub fn resolve(
    &mut self,
    source_repo: &Path,
    target_repo: &Path,
    target_paths: &[String],
    source_hash: &str,
    squash_record: Option<&SquashRecord>,
  ) -> Result<Option<String>> {
    if let Some(hit) = self.cache.get(source_hash) {
      return Ok(Some(hit.clone()));
    }

    let meta = self
      .git
      .output(&["log", "--format=%ct %at %B", "-1", source_hash], source_repo)?;
    let Some(first_line) = meta.lines().next() else {
      return Ok(None);
    };
    let mut parts = first_line.splitn(3, ' ');
    let committer_ts = parts.next().unwrap_or("");
    let author_ts = parts.next().unwrap_or("");
    let search_key = parts.next().unwrap_or("").to_string();

    if let Some((_, end)) = match_squash_marker(&search_key) {
      debug!("{source_hash} is a squash marker; resolving to its end hash {end}");
      self.cache.insert(source_hash.to_string(), end.clone());
      return Ok(Some(end));
    }

    if let Some(hit) = self.primary_search(target_repo, target_paths, committer_ts, &search_key)? {
      self.cache.insert(source_hash.to_string(), hit.clone());
      return Ok(Some(hit));
    }

    if let Some(hit) = self.fallback_search(target_repo, target_paths, author_ts, &search_key)? {
      self.cache.insert(source_hash.to_string(), hit.clone());
      return Ok(Some(hit));
    }

    if let Some(record) = squash_record {
      if let Some(hit) = record.find_containing(source_hash) {
        self.cache.insert(source_hash.to_string(), hit.to_string());
        return Ok(Some(hit.to_string()));
      }
    }

    Ok(None)
  }

  /// `git log --after=<ct> --before=<ct> --grep=<key> --fixed-strings
  /// --format=%H --all`, scoped by target pathspecs. Returns `Some` only
  /// when exactly one commit matches.
  fn primary_search(
    &self,
    target_repo: &Path,
    target_paths: &[String],
    committer_ts: &str,
    search_key: &str,
  ) -> Result<Option<String>> {
    let after = format!("--after={committer_ts}");
    let before = format!("--before={committer_ts}");
    let grep = format!("--grep={search_key}");
    let mut args: Vec<&str> = vec!["log", &after, &before, &grep, "--fixed-strings", "--format=%H", "--all"];
    append_paths(&mut args, target_paths);
    let stdout = self.git.log_output_allowing_unborn_head(&args, target_repo)?;
    let lines: Vec<&str> = stdout.lines().filter(|l| !l.is_empty()).collect();
    if lines.len() == 1 {
      Ok(Some(lines[0].to_string()))
    } else {
      Ok(None)
    }
  }

  /// Date-unconstrained fallback: rebase rewrites committer date, and
  /// `git log` short-circuits its date search when history is out of
  /// order, so the primary search can spuriously return nothing. Here we
  /// search without a date bound and keep only rows whose author
  /// timestamp matches exactly.
  fn fallback_search(
    &self,
    target_repo: &Path,
    target_paths: &[String],
    author_ts: &str,
    search_key: &str,
  ) -> Result<Option<String>> {
    let grep = format!("--grep={search_key}");
    let mut args: Vec<&str> = vec!["log", &grep, "--fixed-strings", "--format=%H %at", "--all"];
    append_paths(&mut args, target_paths);
    let stdout = self.git.log_output_allowing_unborn_head(&args, target_repo)?;
    let matches: Vec<&str> = stdout
      .lines()
      .filter(|line| {
        line
          .split_whitespace()
          .nth(1)
          .map(|ts| ts == author_ts)
          .unwrap_or(false)
      })
      .filter_map(|line| line.split_whitespace().next())
      .collect();

    match matches.len() {
      0 => Ok(None),
      1 => Ok(Some(matches[0].to_string())),
      _ => Err(GitSyncError::AmbiguousIdentity {
        hashes: matches.join(", "),
      }),
    }
  }
}

fn append_paths<'a>(args: &mut Vec<&'a str>, paths: &'a [String]) {
  if paths.len() == 1 && paths[0] == "./" {
    return;
  }
  args.push("--");
  for p in paths {
    args.push(p.as_str());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn record_never_overwrites_existing_entry() {
    let git = GitDriver::new();
    let mut oracle = IdentityOracle::new(&git);
    oracle.record("src1", "tgt1");
    oracle.record("src1", "tgt2");
    assert_eq!(oracle.cached("src1"), Some("tgt1"));
  }
}
