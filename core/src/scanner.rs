//! C4 — log scanner: produces the ordered, path-filtered commit graph
//! listing every other component works from.

use std::path::Path;

use log::debug;
use regex::Regex;

use crate::error::Result;
use crate::git::{GitDriver, EMPTY_TREE};

/// One row of `git log --graph`, annotated with whether it sat on the
/// graph's current trunk line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
  pub hash: String,
  pub parent_hashes: Vec<String>,
  pub author_ts: i64,
  pub subject: String,
  pub on_current_line: bool,
}

impl CommitRecord {
  /// The log key: `#<hash> <space-separated parents>`. Set-difference
  /// between source and target scans happens over this string.
  pub fn key(&self) -> String {
    if self.parent_hashes.is_empty() {
      format!("#{} {EMPTY_TREE}", self.hash)
    } else {
      format!("#{} {}", self.hash, self.parent_hashes.join(" "))
    }
  }

  /// The value half of the key/value pair used for content-level (not
  /// hash-level) comparison between source and target logs.
  pub fn value(&self) -> String {
    format!("{} {}", self.author_ts, self.subject)
  }

  pub fn effective_parents(&self) -> Vec<String> {
    if self.parent_hashes.is_empty() {
      vec![EMPTY_TREE.to_string()]
    } else {
      self.parent_hashes.clone()
    }
  }
}

/// Parses a `log key` string (`#<hash> <parents...>`) back into its parts.
pub fn parse_log_key(key: &str) -> Option<(String, Vec<String>)> {
  let body = key.strip_prefix('#')?;
  let mut parts = body.split_whitespace();
  let hash = parts.next()?.to_string();
  let parents = parts.map(|s| s.to_string()).collect();
  Some((hash, parents))
}

fn squash_marker_re() -> Regex {
  Regex::new(r"^chore\(sync\): squash commits from (\S+) to (\S+)$").unwrap()
}

/// Returns `(start, end)` if `subject` is a squash marker subject.
pub fn match_squash_marker(subject: &str) -> Option<(String, String)> {
  squash_marker_re()
    .captures(subject.trim())
    .map(|c| (c[1].to_string(), c[2].to_string()))
}

pub struct LogScanner<'a> {
  git: &'a GitDriver,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions<'a> {
  pub after: Option<i64>,
  pub max_count: Option<usize>,
  pub refs: Option<&'a [String]>,
  pub all: bool,
}

impl<'a> LogScanner<'a> {
  pub fn new(git: &'a GitDriver) -> Self {
    LogScanner { git }
  }

  /// Scans `repo` scoped by `paths`, expanding any squash-marker commit
  /// found by recursively scanning `expand_from` (the other side of the
  /// sync, over the marker's `A..B` range with its own paths) in its
  /// place. Pass `None` to disable expansion (used by the identity
  /// oracle, which resolves squash markers by message instead).
  pub fn scan(
    &self,
    repo: &Path,
    paths: &[String],
    opts: &ScanOptions,
    expand_from: Option<(&Path, &[String])>,
  ) -> Result<Vec<CommitRecord>> {
    let mut args: Vec<&str> = vec![
      "log",
      "--graph",
      "--format=#%H %P-%at %s",
      "--full-history",
      "--simplify-merges",
    ];
    let after_arg;
    if let Some(after) = opts.after {
      after_arg = format!("--after={after}");
      args.push(&after_arg);
    }
    let max_count_arg;
    if let Some(n) = opts.max_count {
      max_count_arg = format!("-{n}");
      args.push(&max_count_arg);
    }
    if opts.all {
      args.push("--all");
    } else if let Some(refs) = opts.refs {
      for r in refs {
        args.push(r.as_str());
      }
    }
    let mut owned_dash = Vec::new();
    let translator_paths = paths.to_vec();
    if !(translator_paths.len() == 1 && translator_paths[0] == "./") {
      owned_dash.push("--".to_string());
      args.push(owned_dash.last().unwrap());
      for p in &translator_paths {
        args.push(p.as_str());
      }
    }

    let stdout = self.git.log_output_allowing_unborn_head(&args, repo)?;
    let mut records = Vec::new();
    for line in stdout.lines() {
      if let Some(record) = parse_graph_line(line) {
        if let Some((start, end)) = match_squash_marker(&record.subject) {
          if let Some((other_repo, other_paths)) = expand_from {
            debug!("expanding squash marker {start}..{end} from {}", other_repo.display());
            let range_ref = format!("{start}..{end}");
            let expanded = self.scan(
              other_repo,
              other_paths,
              &ScanOptions {
                after: None,
                max_count: None,
                refs: Some(std::slice::from_ref(&range_ref)),
                all: false,
              },
              None,
            )?;
            records.extend(expanded);
            continue;
          }
        }
        records.push(record);
      }
    }
    Ok(records)
  }

  /// Like [`scan`] but additionally invokes `on_first_hash` with the
  /// first-seen raw hash (used by C11 to pick the branch to commit on).
  pub fn scan_with_first_hash<F: FnMut(&str)>(
    &self,
    repo: &Path,
    paths: &[String],
    opts: &ScanOptions,
    expand_from: Option<(&Path, &[String])>,
    mut on_first_hash: F,
  ) -> Result<Vec<CommitRecord>> {
    let records = self.scan(repo, paths, opts, expand_from)?;
    if let Some(first) = records.first() {
      on_first_hash(&first.hash);
    }
    Ok(records)
  }
}

/// Parses one `--graph` output line. Returns `None` for lines that carry
/// no `*` trunk marker or that don't contain a commit record at all
/// (pure connector lines like `|/`).
fn parse_graph_line(line: &str) -> Option<CommitRecord> {
  if !line.contains('*') {
    return None;
  }
  let hash_start = line.find('#')?;
  let rest = &line[hash_start + 1..];
  let (left, right) = split_once_dash(rest)?;

  let mut left_parts = left.split_whitespace();
  let hash = left_parts.next()?.to_string();
  let parent_hashes: Vec<String> = left_parts.map(|s| s.to_string()).collect();

  let mut right_parts = right.splitn(2, ' ');
  let ts_str = right_parts.next()?;
  let author_ts: i64 = ts_str.parse().ok()?;
  let subject = right_parts.next().unwrap_or("").to_string();

  // Only a `*` in the very first column marks the trunk line a commit sits
  // on; a side-branch commit being merged in still carries a `*` further
  // right (e.g. `| * #hash ...`), which `contains` alone would conflate
  // with the real trunk marker.
  let on_current_line = line.starts_with('*');

  Some(CommitRecord {
    hash,
    parent_hashes,
    author_ts,
    subject,
    on_current_line,
  })
}

/// Splits on the *first* `-` (the format string embeds a literal `-`
/// between `%P` and `%at`).
fn split_once_dash(s: &str) -> Option<(&str, &str)> {
  let idx = s.find('-')?;
  Some((&s[..idx], &s[idx + 1..]))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_simple_trunk_line() {
    let line = "* #abc123 def456-1700000000 Add widget";
    let rec = parse_graph_line(line).unwrap();
    assert_eq!(rec.hash, "abc123");
    assert_eq!(rec.parent_hashes, vec!["def456".to_string()]);
    assert_eq!(rec.author_ts, 1700000000);
    assert_eq!(rec.subject, "Add widget");
    assert!(rec.on_current_line);
  }

  #[test]
  fn parses_merge_with_two_parents() {
    let line = "* #abc def1 def2-1700000000 Merge branch 'x'";
    let rec = parse_graph_line(line).unwrap();
    assert_eq!(rec.parent_hashes, vec!["def1".to_string(), "def2".to_string()]);
  }

  #[test]
  fn parses_root_commit_with_no_parents() {
    let line = "* #abc -1700000000 Initial commit";
    let rec = parse_graph_line(line).unwrap();
    assert!(rec.parent_hashes.is_empty());
    assert_eq!(rec.effective_parents(), vec![EMPTY_TREE.to_string()]);
  }

  #[test]
  fn non_trunk_lines_are_dropped() {
    assert!(parse_graph_line("| | #abc def-170 subject").is_none());
    assert!(parse_graph_line("|/").is_none());
  }

  #[test]
  fn side_branch_commit_is_not_on_current_line() {
    let line = "| * #a2f0b5 4295c9-1700000000 Add feature work";
    let rec = parse_graph_line(line).unwrap();
    assert!(!rec.on_current_line);
  }

  #[test]
  fn first_parent_merge_continuation_is_on_current_line() {
    let line = "* | #5d0070 4295c9-1700000000 Add trunk work";
    let rec = parse_graph_line(line).unwrap();
    assert!(rec.on_current_line);
  }

  #[test]
  fn detects_squash_marker_subject() {
    let (a, b) = match_squash_marker("chore(sync): squash commits from aaa to bbb").unwrap();
    assert_eq!(a, "aaa");
    assert_eq!(b, "bbb");
    assert!(match_squash_marker("chore: something else").is_none());
  }

  #[test]
  fn log_key_roundtrip() {
    let rec = CommitRecord {
      hash: "abc".into(),
      parent_hashes: vec!["def".into()],
      author_ts: 1,
      subject: "s".into(),
      on_current_line: true,
    };
    let key = rec.key();
    assert_eq!(key, "#abc def");
    let (h, p) = parse_log_key(&key).unwrap();
    assert_eq!(h, "abc");
    assert_eq!(p, vec!["def".to_string()]);
  }
}
