//! C6 — the patch applier, the hot path of the engine. Projects one source
//! commit onto the target repository: as a three-way patch, as a merge, or
//! (on failure) by diverting to a conflict branch or overwriting the
//! worktree wholesale.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info, warn};

use crate::conflict::ConflictDiverter;
use crate::error::{GitSyncError, Result};
use crate::git::GitDriver;
use crate::identity::IdentityOracle;
use crate::pathspec::SubDir;
use crate::plugin::{HookContext, PluginManager};
use crate::runstate::RunState;
use crate::scanner::CommitRecord;
use crate::squash::SquashRecord;
use crate::worktree::AuxWorktree;

pub struct ApplierConfig<'a> {
  pub source_repo: &'a Path,
  pub target_repo: &'a Path,
  pub source_subdir: &'a SubDir,
  pub target_subdir: &'a SubDir,
  pub source_paths: &'a [String],
  pub target_paths: &'a [String],
  pub preserve_commit: bool,
}

pub struct Applier<'a> {
  git: &'a GitDriver,
  cfg: ApplierConfig<'a>,
}

impl<'a> Applier<'a> {
  pub fn new(git: &'a GitDriver, cfg: ApplierConfig<'a>) -> Self {
    Applier { git, cfg }
  }

  /// Projects `rec` onto the target, updating `oracle` with the resulting
  /// identity mapping before returning (invariant I1).
  pub fn apply(
    &self,
    rec: &CommitRecord,
    oracle: &mut IdentityOracle,
    squash: Option<&SquashRecord>,
    worktree: &mut AuxWorktree,
    state: &mut RunState,
    plugins: &PluginManager,
  ) -> Result<()> {
    let parents = rec.effective_parents();

    if parents.len() > 1 {
      self.apply_merge(rec, &parents, oracle, squash, worktree, state)?;
    } else {
      self.apply_patch(rec, &parents[0], oracle, squash, worktree, state)?;
    }

    self.commit(rec, plugins)?;
    let target_head = self.git.output(&["rev-parse", "HEAD"], self.cfg.target_repo)?;
    oracle.record(&rec.hash, &target_head);
    Ok(())
  }

  fn checkout_temp_branch_for_parent(
    &self,
    parent: &str,
    oracle: &mut IdentityOracle,
    squash: Option<&SquashRecord>,
    state: &mut RunState,
  ) -> Result<()> {
    let target_parent = self.resolve_or_fail(parent, oracle, squash)?;
    let branch_name = format!("sync-{parent}");
    self
      .git
      .output(&["checkout", "-B", &branch_name, &target_parent], self.cfg.target_repo)?;
    if !state.temp_branches.iter().any(|b| b == &branch_name) {
      state.temp_branches.push(branch_name.clone());
    }
    state.current_branch = branch_name;
    Ok(())
  }

  fn checkout_default_branch(&self, state: &mut RunState) -> Result<()> {
    if state.current_branch != state.default_branch {
      self
        .git
        .output(&["checkout", &state.default_branch], self.cfg.target_repo)?;
      state.current_branch = state.default_branch.clone();
    }
    Ok(())
  }

  fn resolve_or_fail(&self, source_hash: &str, oracle: &mut IdentityOracle, squash: Option<&SquashRecord>) -> Result<String> {
    oracle
      .resolve(self.cfg.source_repo, self.cfg.target_repo, self.cfg.target_paths, source_hash, squash)?
      .ok_or_else(|| GitSyncError::GitOperation(format!("no target counterpart found for source commit {source_hash}")))
  }

  fn apply_merge(
    &self,
    rec: &CommitRecord,
    parents: &[String],
    oracle: &mut IdentityOracle,
    squash: Option<&SquashRecord>,
    worktree: &mut AuxWorktree,
    state: &mut RunState,
  ) -> Result<()> {
    if rec.on_current_line {
      self.checkout_default_branch(state)?;
    } else {
      self.checkout_temp_branch_for_parent(&parents[0], oracle, squash, state)?;
    }
    let mut resolved_parents = Vec::with_capacity(parents.len());
    for p in parents {
      resolved_parents.push(self.resolve_or_fail(p, oracle, squash)?);
    }

    let mut args: Vec<&str> = vec!["merge", "--no-ff", "--no-commit"];
    for p in &resolved_parents {
      args.push(p.as_str());
    }
    let result = self.git.try_output(&args, self.cfg.target_repo)?;

    if !result.success {
      warn!("merge for {} failed, falling back to conflict shim: {}", rec.hash, result.stderr);
      if state.source_contains_target && !state.historical {
        self.worktree_overwrite(&rec.hash, parents, worktree)?;
      } else {
        self.divert(&rec.hash, state)?;
      }
    }
    Ok(())
  }

  fn apply_patch(
    &self,
    rec: &CommitRecord,
    parent: &str,
    oracle: &mut IdentityOracle,
    squash: Option<&SquashRecord>,
    worktree: &mut AuxWorktree,
    state: &mut RunState,
  ) -> Result<()> {
    if rec.on_current_line {
      self.checkout_default_branch(state)?;
    } else {
      self.checkout_temp_branch_for_parent(parent, oracle, squash, state)?;
    }

    let patch = self.build_patch(&rec.hash)?;
    let depth = self.cfg.source_subdir.strip_depth();
    let mut args: Vec<String> = vec![
      "apply".to_string(),
      "-3".to_string(),
      "--ignore-whitespace".to_string(),
      format!("-p{depth}"),
    ];
    if !self.cfg.target_subdir.is_root() {
      args.push("--directory".to_string());
      args.push(self.cfg.target_subdir.path.trim_end_matches('/').to_string());
    }
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let result = self.git.with_stdin(&arg_refs, self.cfg.target_repo, patch.as_bytes())?;

    if result.success {
      return Ok(());
    }

    debug!("git apply failed for {}: {}", rec.hash, result.stderr);
    self.resolve_patch_failure(&rec.hash, &[parent.to_string()], worktree, state)
  }

  /// §4.6.5 conflict resolution shim for the single-parent patch path.
  fn resolve_patch_failure(&self, hash: &str, parents: &[String], worktree: &mut AuxWorktree, state: &mut RunState) -> Result<()> {
    if state.source_contains_target && state.historical {
      self.divert(hash, state)?;
      return Ok(());
    }
    if state.source_contains_target {
      return self.worktree_overwrite(hash, parents, worktree);
    }
    if !state.has_retried_once {
      state.has_retried_once = true;
      self.divert(hash, state)?;
      // Retry the patch once on the new conflict branch. Bounded to a
      // single retry (Design Notes: explicit flag, not recursion).
      let patch = self.build_patch(hash)?;
      let depth = self.cfg.source_subdir.strip_depth();
      let mut args: Vec<String> = vec!["apply".to_string(), "-3".to_string(), "--ignore-whitespace".to_string(), format!("-p{depth}")];
      if !self.cfg.target_subdir.is_root() {
        args.push("--directory".to_string());
        args.push(self.cfg.target_subdir.path.trim_end_matches('/').to_string());
      }
      let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
      let retry = self.git.with_stdin(&arg_refs, self.cfg.target_repo, patch.as_bytes())?;
      if !retry.success {
        warn!("retry of {hash} on conflict branch also failed: {}", retry.stderr);
        self.worktree_overwrite(hash, parents, worktree)?;
      }
      return Ok(());
    }
    self.divert(hash, state)?;
    Ok(())
  }

  fn divert(&self, hash: &str, state: &mut RunState) -> Result<()> {
    let diverter = ConflictDiverter::new(self.git);
    let branch = diverter.divert(
      self.cfg.source_repo,
      self.cfg.source_paths,
      self.cfg.target_repo,
      self.cfg.target_paths,
      &state.current_branch,
      hash,
    )?;
    if !state.conflict_branches.iter().any(|b| b == &state.current_branch) {
      state.conflict_branches.push(state.current_branch.clone());
    }
    state.current_branch = branch;
    Ok(())
  }

  /// §4.6.7 worktree overwrite: pulls changed files for `hash` straight
  /// out of the source tree (via an auxiliary worktree) instead of
  /// applying a patch.
  fn worktree_overwrite(&self, hash: &str, parents: &[String], worktree: &mut AuxWorktree) -> Result<()> {
    let mut deletions: Vec<String> = Vec::new();
    let mut updates: Vec<String> = Vec::new();

    for parent in parents {
      let mut args: Vec<&str> = vec!["diff-tree", "--name-status", "-r", parent.as_str(), hash];
      if !(self.cfg.source_paths.len() == 1 && self.cfg.source_paths[0] == "./") {
        args.push("--");
        for p in self.cfg.source_paths {
          args.push(p.as_str());
        }
      }
      let stdout = self.git.output(&args, self.cfg.source_repo)?;
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
    }
    deletions.sort();
    deletions.dedup();
    updates.sort();
    updates.dedup();

    worktree.checkout_paths(hash, &updates)?;

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

    self.git.output(&["add", "-u"], self.cfg.target_repo)?;
    let mut add_args: Vec<&str> = vec!["add"];
    for p in self.cfg.target_paths {
      add_args.push(p.as_str());
    }
    self.git.try_output(&add_args, self.cfg.target_repo)?;
    Ok(())
  }

  /// `git log -p --reverse -m --stat --binary -1 --color=never --format=%n
  /// <hash>`, scoped by source paths, with the trailing `\n\n` git-apply
  /// needs to correctly diagnose truncated binary diffs (§4.6 step 4).
  fn build_patch(&self, hash: &str) -> Result<String> {
    let mut args: Vec<&str> = vec![
      "log", "-p", "--reverse", "-m", "--stat", "--binary", "-1", "--color=never", "--format=%n", hash,
    ];
    if !(self.cfg.source_paths.len() == 1 && self.cfg.source_paths[0] == "./") {
      args.push("--");
      for p in self.cfg.source_paths {
        args.push(p.as_str());
      }
    }
    let mut patch = self.git.output(&args, self.cfg.source_repo)?;
    patch.push_str("\n\n");
    Ok(patch)
  }

  /// §4.6.6 commit: stage tracked changes only, run the `beforeCommit`
  /// hook, then commit with the source commit's message (and, when
  /// `preserveCommit` is set, its author/committer identity).
  fn commit(&self, rec: &CommitRecord, plugins: &PluginManager) -> Result<()> {
    self.git.try_output(&["add", "-u"], self.cfg.target_repo)?;

    let ctx = HookContext {
      source: self.cfg.source_repo.to_path_buf(),
      target: self.cfg.target_repo.to_path_buf(),
      options: serde_json::json!({}),
      current_source_hash: Some(rec.hash.clone()),
      current_target_hash: None,
    };
    plugins.run_before_commit(&ctx)?;

    let meta = self.git.output(
      &["show", "-s", "--format=%an|%ae|%ai|%cn|%ce|%ci|%B", &rec.hash],
      self.cfg.source_repo,
    )?;
    let fields = parse_identity_fields(&meta);

    let mut env: HashMap<String, String> = HashMap::new();
    if self.cfg.preserve_commit {
      if let Some(f) = &fields {
        env.insert("GIT_AUTHOR_NAME".into(), f.author_name.clone());
        env.insert("GIT_AUTHOR_EMAIL".into(), f.author_email.clone());
        env.insert("GIT_AUTHOR_DATE".into(), f.author_date.clone());
        env.insert("GIT_COMMITTER_NAME".into(), f.committer_name.clone());
        env.insert("GIT_COMMITTER_EMAIL".into(), f.committer_email.clone());
        env.insert("GIT_COMMITTER_DATE".into(), f.committer_date.clone());
      }
    }
    if let Ok(update) = std::env::var("GITSYNC_UPDATE") {
      env.insert("GITSYNC_UPDATE".into(), update);
    }

    let body = fields.as_ref().map(|f| f.body.clone()).unwrap_or_else(|| rec.subject.clone());
    info!("committing projected commit for source {}", rec.hash);
    self
      .git
      .run(&["commit", "--allow-empty", "-a", "-F", "-"], self.cfg.target_repo, Some(body.as_bytes()), Some(&env), false)?;
    Ok(())
  }
}

struct IdentityFields {
  author_name: String,
  author_email: String,
  author_date: String,
  committer_name: String,
  committer_email: String,
  committer_date: String,
  body: String,
}

fn parse_identity_fields(meta: &str) -> Option<IdentityFields> {
  let mut parts = meta.splitn(7, '|');
  Some(IdentityFields {
    author_name: parts.next()?.to_string(),
    author_email: parts.next()?.to_string(),
    author_date: parts.next()?.to_string(),
    committer_name: parts.next()?.to_string(),
    committer_email: parts.next()?.to_string(),
    committer_date: parts.next()?.to_string(),
    body: parts.next().unwrap_or("").to_string(),
  })
}

/// Strips the source subdir prefix off `path` and rejoins it under the
/// target subdir (§4.6.7).
pub(crate) fn rehome(path: &str, source_subdir: &SubDir, target_subdir: &SubDir) -> String {
  let stripped = if source_subdir.is_root() {
    path
  } else {
    path.strip_prefix(source_subdir.path.as_str()).unwrap_or(path)
  };
  if target_subdir.is_root() {
    stripped.to_string()
  } else {
    format!("{}{}", target_subdir.path, stripped)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rehome_moves_between_subdirs() {
    let src = SubDir::parse("pkg");
    let tgt = SubDir::parse("./");
    assert_eq!(rehome("pkg/src/lib.rs", &src, &tgt), "src/lib.rs");
  }

  #[test]
  fn rehome_root_to_subdir() {
    let src = SubDir::parse("./");
    let tgt = SubDir::parse("out");
    assert_eq!(rehome("src/lib.rs", &src, &tgt), "out/src/lib.rs");
  }

  #[test]
  fn parses_identity_fields_with_multiline_body() {
    let meta = "Jane Doe|jane@example.com|2024-01-01|Jane Doe|jane@example.com|2024-01-01|Subject line\n\nBody text.";
    let f = parse_identity_fields(meta).unwrap();
    assert_eq!(f.author_name, "Jane Doe");
    assert_eq!(f.body, "Subject line\n\nBody text.");
  }
}
