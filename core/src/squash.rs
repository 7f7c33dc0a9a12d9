//! Squash-range bookkeeping for squash mode (C10).
//!
//! A [`SquashRecord`] is a grow-only map: each target hash produced by a
//! squash commit is associated with the set of source log keys it
//! represents, so a tag or identity lookup that lands in the middle of a
//! squashed range can still resolve.

use std::collections::HashMap;

use crate::scanner::{parse_log_key, CommitRecord};

#[derive(Debug, Clone, Default)]
pub struct SquashRecord {
  /// target hash -> source hashes it subsumes.
  ranges: HashMap<String, Vec<String>>,
}

impl SquashRecord {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records that `target_hash` is a squash commit representing every
  /// source commit named by `keys` (as produced by [`CommitRecord::key`]).
  pub fn record(&mut self, target_hash: &str, keys: &[String]) {
    let hashes: Vec<String> = keys
      .iter()
      .filter_map(|k| parse_log_key(k))
      .map(|(hash, _)| hash)
      .collect();
    self
      .ranges
      .entry(target_hash.to_string())
      .or_insert_with(Vec::new)
      .extend(hashes);
  }

  /// As [`record`], but takes already-scanned commit records directly.
  pub fn record_commits(&mut self, target_hash: &str, commits: &[CommitRecord]) {
    let hashes: Vec<String> = commits.iter().map(|c| c.hash.clone()).collect();
    self
      .ranges
      .entry(target_hash.to_string())
      .or_insert_with(Vec::new)
      .extend(hashes);
  }

  /// Finds the target hash of the squash commit containing `source_hash`,
  /// if any.
  pub fn find_containing(&self, source_hash: &str) -> Option<&str> {
    self
      .ranges
      .iter()
      .find(|(_, sources)| sources.iter().any(|h| h == source_hash))
      .map(|(target, _)| target.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn records_and_finds_containing_hash() {
    let mut rec = SquashRecord::new();
    rec.record("tgt1", &["#aaa def".to_string(), "#bbb aaa".to_string()]);
    assert_eq!(rec.find_containing("aaa"), Some("tgt1"));
    assert_eq!(rec.find_containing("bbb"), Some("tgt1"));
    assert_eq!(rec.find_containing("ccc"), None);
  }

  #[test]
  fn grows_without_overwriting_other_ranges() {
    let mut rec = SquashRecord::new();
    rec.record("tgt1", &["#aaa def".to_string()]);
    rec.record("tgt2", &["#bbb def".to_string()]);
    assert_eq!(rec.find_containing("aaa"), Some("tgt1"));
    assert_eq!(rec.find_containing("bbb"), Some("tgt2"));
  }
}
