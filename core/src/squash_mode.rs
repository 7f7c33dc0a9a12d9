//! C10 — squash mode: an alternative to the per-commit patch applier that
//! collapses each source-branch range into a single target commit whose
//! subject encodes `chore(sync): squash commits from <A> to <B>`.
//!
//! The construction step builds its patch from `git diff --stat`, which
//! carries no appliable hunks, so `git apply` predictably fails and every
//! squash commit falls through to the worktree-overwrite path. This is the
//! documented behavior of Design Notes (b): the post-conflict path in
//! squash mode is a known limitation, not implemented as a diversion —
//! patch failure always resolves via worktree overwrite, never a conflict
//! branch.

use std::path::Path;

use log::info;

use crate::applier::rehome;
use crate::error::Result;
use crate::git::{GitDriver, EMPTY_TREE};
use crate::pathspec::SubDir;
use crate::scanner::CommitRecord;
use crate::squash::SquashRecord;
use crate::worktree::AuxWorktree;

pub struct SquashApplierConfig<'a> {
  pub source_repo: &'a Path,
  pub target_repo: &'a Path,
  pub source_subdir: &'a SubDir,
  pub target_subdir: &'a SubDir,
  pub source_paths: &'a [String],
  pub target_paths: &'a [String],
}

pub struct SquashApplier<'a> {
  git: &'a GitDriver,
  cfg: SquashApplierConfig<'a>,
}

impl<'a> SquashApplier<'a> {
  pub fn new(git: &'a GitDriver, cfg: SquashApplierConfig<'a>) -> Self {
    SquashApplier { git, cfg }
  }

  /// Emits one squash commit spanning `start..end` on whatever branch is
  /// currently checked out in the target repo, recording every subsumed
  /// source log key in `squash_record`.
  pub fn squash_range(
    &self,
    start: &str,
    end: &str,
    commits: &[CommitRecord],
    worktree: &mut AuxWorktree,
    squash_record: &mut SquashRecord,
  ) -> Result<String> {
    let patch = self.build_stat_patch(start, end)?;
    let depth = self.cfg.source_subdir.strip_depth();
    let mut args: Vec<String> = vec!["apply".to_string(), "-3".to_string(), "--ignore-whitespace".to_string(), format!("-p{depth}")];
    if !self.cfg.target_subdir.is_root() {
      args.push("--directory".to_string());
      args.push(self.cfg.target_subdir.path.trim_end_matches('/').to_string());
    }
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let result = self.git.with_stdin(&arg_refs, self.cfg.target_repo, patch.as_bytes())?;

    if !result.success {
      self.worktree_overwrite_range(start, end, worktree)?;
    }

    self.git.try_output(&["add", "-u"], self.cfg.target_repo)?;
    let subject = format!("chore(sync): squash commits from {start} to {end}");
    self
      .git
      .output(&["commit", "--allow-empty", "-am", &subject], self.cfg.target_repo)?;
    let target_head = self.git.output(&["rev-parse", "HEAD"], self.cfg.target_repo)?;
    squash_record.record_commits(&target_head, commits);
    info!("squashed {} commit(s) from {start} to {end} into {target_head}", commits.len());
    Ok(target_head)
  }

  /// `git diff --stat --binary --color=never <start>..<end>`, scoped by
  /// source paths. `start` may be the empty-tree sentinel for a
  /// from-scratch branch.
  fn build_stat_patch(&self, start: &str, end: &str) -> Result<String> {
    let range = format!("{start}..{end}");
    let mut args: Vec<&str> = vec!["diff", "--stat", "--binary", "--color=never", &range];
    if !(self.cfg.source_paths.len() == 1 && self.cfg.source_paths[0] == "./") {
      args.push("--");
      for p in self.cfg.source_paths {
        args.push(p.as_str());
      }
    }
    self.git.output(&args, self.cfg.source_repo)
  }

  fn worktree_overwrite_range(&self, start: &str, end: &str, worktree: &mut AuxWorktree) -> Result<()> {
    let range = format!("{start}..{end}");
    let mut args: Vec<&str> = vec!["diff", "--name-status", &range];
    if !(self.cfg.source_paths.len() == 1 && self.cfg.source_paths[0] == "./") {
      args.push("--");
      for p in self.cfg.source_paths {
        args.push(p.as_str());
      }
    }
    let stdout = self.git.output(&args, self.cfg.source_repo)?;

    let mut deletions = Vec::new();
    let mut updates = Vec::new();
    for line in stdout.lines() {
      let mut fields = line.split('\t');
      let Some(status) = fields.next() else { continue };
      let rest: Vec<&str> = fields.collect();
      let Some(path) = rest.last() else { continue };
      if status.starts_with('D') {
        deletions.push(path.to_string());
      } else {
        updates.push(path.to_string());
      }
    }

    worktree.checkout_paths(end, &updates)?;

    for path in &deletions {
      let target_path = self.cfg.target_repo.join(rehome(path, self.cfg.source_subdir, self.cfg.target_subdir));
      if target_path.exists() {
        std::fs::remove_file(&target_path)?;
      }
    }
    for path in &updates {
      let rehomed = rehome(path, self.cfg.source_subdir, self.cfg.target_subdir);
      let target_path = self.cfg.target_repo.join(&rehomed);
      if let Some(parent_dir) = target_path.parent() {
        std::fs::create_dir_all(parent_dir)?;
      }
      let src_path = worktree.path().join(path);
      if src_path.exists() {
        std::fs::rename(&src_path, &target_path)?;
      }
    }

    let mut add_args: Vec<&str> = vec!["add"];
    for p in self.cfg.target_paths {
      add_args.push(p.as_str());
    }
    self.git.try_output(&add_args, self.cfg.target_repo)?;
    Ok(())
  }
}

pub const EMPTY_TREE_SENTINEL: &str = EMPTY_TREE;
