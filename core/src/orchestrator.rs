//! C11 — the orchestrator. Wires every other component together, owns the
//! run's transient state, and drives the single sequential pass: validate,
//! scan, project, reconcile branches and tags, tear down.

use std::collections::HashSet;
use std::path::Path;

use globset::{Glob, GlobSetBuilder};
use log::info;

use crate::applier::{Applier, ApplierConfig};
use crate::branches::{BranchOutcome, BranchReconciler};
use crate::config::RunConfig;
use crate::error::{GitSyncError, Result};
use crate::git::{GitDriver, EMPTY_TREE};
use crate::identity::IdentityOracle;
use crate::pathspec::PathSpecTranslator;
use crate::plugin::{HookContext, PluginManager};
use crate::refs::RefInventory;
use crate::runstate::RunState;
use crate::scanner::{CommitRecord, LogScanner, ScanOptions};
use crate::squash::SquashRecord;
use crate::squash_mode::{SquashApplier, SquashApplierConfig};
use crate::tags::{TagOptions, TagReconciler};
use crate::worktree::AuxWorktree;

/// Verbosity threaded through the run instead of a process-global (Design
/// Notes "Global process state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
  Info,
  Verbose,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
  pub commits_new: usize,
  pub commits_exists: usize,
  pub commits_source: usize,
  pub commits_target: usize,
  pub branches: Vec<BranchOutcome>,
  pub tags_created: usize,
}

impl SyncReport {
  pub fn commits_line(&self) -> String {
    format!(
      "Commits: new: {}, exists: {}, source: {}, target: {}",
      self.commits_new, self.commits_exists, self.commits_source, self.commits_target
    )
  }

  pub fn synced_line(&self) -> String {
    if self.commits_new == 1 {
      "Synced 1 commit.".to_string()
    } else {
      format!("Synced {} commits.", self.commits_new)
    }
  }

  pub fn branches_line(&self) -> String {
    format!("Branches: {}", self.branches.len())
  }

  pub fn tags_line(&self) -> String {
    format!("Tags: {}", self.tags_created)
  }
}

/// Runs a full sync per `config`. On success returns counts and outcomes
/// for the CLI to print; on conflict, returns [`GitSyncError::Conflict`]
/// after having already printed the bit-exact recovery message.
pub fn run(config: &RunConfig, verbosity: Verbosity) -> Result<SyncReport> {
  let git = GitDriver::new();

  check_target_clean(&git, &config.target_dir)?;

  let translator = PathSpecTranslator::new(&config.source_subdir, &config.target_subdir, config.filters.clone());
  let (source_paths, target_paths) = translator.paths();

  let plugins = PluginManager::load(&config.plugins)?;
  plugins.run_prepare(&HookContext {
    source: config.source_dir.clone(),
    target: config.target_dir.clone(),
    options: serde_json::json!({}),
    current_source_hash: None,
    current_target_hash: None,
  })?;

  let ref_inv = RefInventory::new(&git);
  // Validates I4 (no pre-existing conflict branches) for both sides.
  let target_all_branches = ref_inv.branches(&config.target_dir)?;
  let source_all_branches = ref_inv.branches(&config.source_dir)?;
  let source_branches = RefInventory::filter(&source_all_branches, &config.include_branches, &config.exclude_branches)?;

  let init_out = git.try_output(&["rev-parse", "HEAD"], &config.target_dir)?;
  let init_target_hash = if init_out.success { Some(init_out.stdout) } else { None };

  let orig_branch = current_branch_name(&git, &config.target_dir)?;

  delete_develop_branches(&git, config, &target_all_branches, &orig_branch)?;

  let default_branch = orig_branch.clone();
  let mut state = RunState::new(init_target_hash.clone(), orig_branch.clone(), default_branch);
  let mut oracle = IdentityOracle::new(&git);
  let mut squash_record = SquashRecord::new();
  let mut worktree = AuxWorktree::new(&git, &config.source_dir);

  let outcome = project_and_reconcile(
    &git,
    config,
    &translator.source_subdir,
    &translator.target_subdir,
    &source_paths,
    &target_paths,
    &source_branches,
    &plugins,
    &mut oracle,
    &mut squash_record,
    &mut worktree,
    &mut state,
  );

  // Restore the original branch and tear down temp state regardless of
  // how projection went (§5 resource ownership).
  let _ = git.try_output(&["checkout", &state.orig_branch], &config.target_dir);
  for branch in &state.temp_branches {
    let _ = git.try_output(&["branch", "-D", branch], &config.target_dir);
  }
  let _ = worktree.remove();

  let mut report = match outcome {
    Ok(report) => report,
    Err(e) => {
      print_error_recovery(verbosity, &init_target_hash);
      return Err(e);
    }
  };

  if !state.conflict_branches.is_empty() {
    print_conflict_recovery(&config.target_dir, &config.target_subdir, &state.conflict_branches);
    return Err(GitSyncError::Conflict);
  }

  if !config.no_tags {
    let tag_opts = TagOptions {
      include: config.include_tags.clone(),
      exclude: config.exclude_tags.clone(),
      add_prefix: config.add_tag_prefix.clone(),
      remove_prefix: config.remove_tag_prefix.clone(),
    };
    let reconciler = TagReconciler::new(&git, &config.source_dir, &config.target_dir, &target_paths);
    let created = reconciler.reconcile(&tag_opts, &mut oracle, Some(&squash_record))?;
    report.tags_created = created.len();
  }

  Ok(report)
}

fn check_target_clean(git: &GitDriver, target_dir: &Path) -> Result<()> {
  let status = git.output(&["status", "--short"], target_dir)?;
  if !status.trim().is_empty() {
    return Err(GitSyncError::TargetDirty(target_dir.to_path_buf()));
  }
  Ok(())
}

fn current_branch_name(git: &GitDriver, repo: &Path) -> Result<String> {
  let out = git.try_output(&["rev-parse", "--abbrev-ref", "HEAD"], repo)?;
  if out.success && out.stdout != "HEAD" && !out.stdout.is_empty() {
    Ok(out.stdout)
  } else {
    // Unborn / detached HEAD: fall back to a conventional trunk name.
    Ok("master".to_string())
  }
}

/// §4.11 "Develop branches": force-deletes every target branch matching
/// `developBranches`, then resets the `origin` remote so the next sync
/// starts from scratch (the remote re-add is non-atomic — Design Notes c).
fn delete_develop_branches(git: &GitDriver, config: &RunConfig, target_branches: &[String], orig_branch: &str) -> Result<()> {
  if config.develop_branches.is_empty() {
    return Ok(());
  }
  let mut builder = GlobSetBuilder::new();
  for pattern in &config.develop_branches {
    builder.add(Glob::new(pattern).map_err(|e| GitSyncError::Config(format!("invalid develop-branches glob '{pattern}': {e}")))?);
  }
  let set = builder
    .build()
    .map_err(|e| GitSyncError::Config(format!("invalid develop-branches glob set: {e}")))?;

  let mut deleted_any = false;
  for branch in target_branches {
    if !set.is_match(branch.as_str()) {
      continue;
    }
    if branch == orig_branch {
      return Err(GitSyncError::DevelopBranchCheckedOut(branch.clone()));
    }
    info!("deleting develop branch \"{branch}\"");
    git.try_output(&["branch", "-D", branch], &config.target_dir)?;
    deleted_any = true;
  }

  if deleted_any {
    let remote_url = git.try_output(&["config", "--get", "remote.origin.url"], &config.target_dir)?;
    if remote_url.success && !remote_url.stdout.is_empty() {
      let url = remote_url.stdout;
      git.try_output(&["remote", "rm", "origin"], &config.target_dir)?;
      git.try_output(&["remote", "add", "origin", &url], &config.target_dir)?;
    }
  }
  Ok(())
}

#[allow(clippy::too_many_arguments)]
fn project_and_reconcile(
  git: &GitDriver,
  config: &RunConfig,
  source_subdir: &crate::pathspec::SubDir,
  target_subdir: &crate::pathspec::SubDir,
  source_paths: &[String],
  target_paths: &[String],
  source_branches: &[String],
  plugins: &PluginManager,
  oracle: &mut IdentityOracle,
  squash_record: &mut SquashRecord,
  worktree: &mut AuxWorktree,
  state: &mut RunState,
) -> Result<SyncReport> {
  let scanner = LogScanner::new(git);

  let scan_opts = ScanOptions {
    after: config.after,
    max_count: config.max_count,
    refs: Some(source_branches),
    all: false,
  };
  let source_commits = scanner.scan(
    &config.source_dir,
    source_paths,
    &scan_opts,
    if config.squash { None } else { Some((&config.target_dir, target_paths)) },
  )?;

  let target_commits = scanner.scan(
    &config.target_dir,
    target_paths,
    &ScanOptions::default(),
    Some((&config.source_dir, source_paths)),
  )?;

  let target_values: HashSet<String> = target_commits.iter().map(|c| c.value()).collect();
  let new_commits: Vec<CommitRecord> = source_commits.iter().filter(|c| !target_values.contains(&c.value())).cloned().collect();

  let source_count = source_commits.len();
  let target_count = target_commits.len();
  let new_count = new_commits.len();
  state.source_contains_target = new_count > 0 && source_count.saturating_sub(target_count) == new_count;

  state.historical = match (new_commits.first(), source_commits.first()) {
    (Some(newest_new), Some(newest_source)) => newest_new.hash != newest_source.hash,
    _ => false,
  };

  if config.squash {
    run_squash_mode(
      git,
      config,
      source_subdir,
      target_subdir,
      source_paths,
      target_paths,
      source_branches,
      oracle,
      squash_record,
      worktree,
      state,
    )?;
  } else {
    let applier_cfg = ApplierConfig {
      source_repo: &config.source_dir,
      target_repo: &config.target_dir,
      source_subdir,
      target_subdir,
      source_paths,
      target_paths,
      preserve_commit: config.preserve_commit,
    };
    let applier = Applier::new(git, applier_cfg);
    // Oldest-first: the log scan returns newest-first, so parents are
    // projected before children only once reversed (§4.6 step 1).
    for rec in new_commits.iter().rev() {
      applier.apply(rec, oracle, Some(&*squash_record), worktree, state, plugins)?;
    }
  }

  let reconciler = BranchReconciler::new(git, &config.source_dir, &config.target_dir, target_paths);
  let branch_outcomes = reconciler.reconcile(source_branches, oracle, Some(&*squash_record), config.skip_even_branch, state)?;

  Ok(SyncReport {
    commits_new: new_count,
    commits_exists: source_count.saturating_sub(new_count),
    commits_source: source_count,
    commits_target: target_count,
    branches: branch_outcomes,
    tags_created: 0,
  })
}

#[allow(clippy::too_many_arguments)]
fn run_squash_mode(
  git: &GitDriver,
  config: &RunConfig,
  source_subdir: &crate::pathspec::SubDir,
  target_subdir: &crate::pathspec::SubDir,
  source_paths: &[String],
  target_paths: &[String],
  source_branches: &[String],
  oracle: &mut IdentityOracle,
  squash_record: &mut SquashRecord,
  worktree: &mut AuxWorktree,
  state: &mut RunState,
) -> Result<()> {
  let base_branch = config
    .squash_base_branch
    .clone()
    .unwrap_or_else(|| state.default_branch.clone());
  if !source_branches.iter().any(|b| b == &base_branch) {
    return Err(GitSyncError::SquashBaseBranchMissing(base_branch));
  }

  let scanner = LogScanner::new(git);
  let squash_cfg = SquashApplierConfig {
    source_repo: &config.source_dir,
    target_repo: &config.target_dir,
    source_subdir,
    target_subdir,
    source_paths,
    target_paths,
  };
  let squash_applier = SquashApplier::new(git, squash_cfg);

  // Base branch first, so every other branch can squash on top of its
  // projected tip.
  let mut ordered: Vec<&String> = vec![&base_branch];
  ordered.extend(source_branches.iter().filter(|b| *b != &base_branch));

  let target_local_branches: HashSet<String> = git
    .output(&["branch", "--no-color"], &config.target_dir)?
    .lines()
    .map(|l| l.get(2..).unwrap_or("").trim().to_string())
    .filter(|s| !s.is_empty())
    .collect();

  for branch in ordered {
    let source_tip = git.output(&["rev-parse", branch], &config.source_dir)?;
    let local_name = branch.strip_prefix("origin/").unwrap_or(branch).to_string();

    if !target_local_branches.contains(&local_name) {
      if *branch == base_branch {
        // The base branch's very first squash spans from the empty tree —
        // there is no prior target commit to root it on, so start an
        // orphan branch instead of checking out a tree object (checkout
        // requires a commit-ish start point, and the empty-tree sentinel
        // is a tree, not a commit).
        start_orphan_branch(git, &config.target_dir, &local_name, &state.current_branch)?;
        state.current_branch = local_name.clone();
        let commits = scanner.scan(&config.source_dir, source_paths, &ScanOptions { refs: Some(std::slice::from_ref(branch)), ..Default::default() }, None)?;
        squash_applier.squash_range(EMPTY_TREE, &source_tip, &commits, worktree, squash_record)?;
      } else {
        let base_source_tip = git.output(&["rev-parse", &base_branch], &config.source_dir)?;
        let divergence = git.output(&["merge-base", branch, &base_source_tip], &config.source_dir)?;
        let base_target_tip = oracle
          .resolve(&config.source_dir, &config.target_dir, target_paths, &base_source_tip, Some(&*squash_record))?
          .unwrap_or_else(|| EMPTY_TREE.to_string());
        git.output(&["checkout", "-B", &local_name, &base_target_tip], &config.target_dir)?;
        state.current_branch = local_name.clone();
        let range_ref = format!("{divergence}..{branch}");
        let commits = scanner.scan(
          &config.source_dir,
          source_paths,
          &ScanOptions { refs: Some(std::slice::from_ref(&range_ref)), ..Default::default() },
          None,
        )?;
        squash_applier.squash_range(&divergence, &source_tip, &commits, worktree, squash_record)?;
      }
      continue;
    }

    git.output(&["checkout", &local_name], &config.target_dir)?;
    state.current_branch = local_name.clone();

    let target_paths_scan = scanner.scan(&config.target_dir, target_paths, &ScanOptions::default(), Some((&config.source_dir, source_paths)))?;
    let target_values: HashSet<String> = target_paths_scan.iter().map(|c| c.value()).collect();
    let source_commits = scanner.scan(&config.source_dir, source_paths, &ScanOptions { refs: Some(std::slice::from_ref(branch)), ..Default::default() }, None)?;
    let new_commits: Vec<CommitRecord> = source_commits.iter().filter(|c| !target_values.contains(&c.value())).cloned().collect();

    if new_commits.is_empty() {
      continue;
    }
    let source_start = new_commits.last().map(|c| c.hash.clone()).unwrap_or_else(|| EMPTY_TREE.to_string());
    squash_applier.squash_range(&source_start, &source_tip, &new_commits, worktree, squash_record)?;
  }

  Ok(())
}

/// Starts `name` as a fresh, history-less branch so the squash applier can
/// build its first commit on top of nothing (the empty-tree sentinel has
/// no commit to check out). A no-op when the target repo has no commits
/// at all yet and is already sitting on a same-named unborn branch.
fn start_orphan_branch(git: &GitDriver, target_dir: &Path, name: &str, current_branch: &str) -> Result<()> {
  let has_commits = git.try_output(&["rev-parse", "--verify", "HEAD"], target_dir)?.success;
  if !has_commits && current_branch == name {
    return Ok(());
  }
  git.output(&["checkout", "--orphan", name], target_dir)?;
  git.try_output(&["rm", "-rf", "--cached", "."], target_dir)?;
  clear_worktree(target_dir)
}

/// Removes every tracked-or-not entry under `target_dir` except `.git`,
/// so an orphan checkout (which otherwise carries over the previous
/// branch's working-tree content) starts from a clean slate.
fn clear_worktree(target_dir: &Path) -> Result<()> {
  for entry in std::fs::read_dir(target_dir)? {
    let entry = entry?;
    if entry.file_name() == ".git" {
      continue;
    }
    let path = entry.path();
    if path.is_dir() {
      std::fs::remove_dir_all(&path)?;
    } else {
      std::fs::remove_file(&path)?;
    }
  }
  Ok(())
}

fn print_conflict_recovery(target_dir: &Path, target_subdir: &str, conflict_branches: &[String]) {
  let mut msg = String::new();
  msg.push_str("The target repository contains conflict branch[es], which need to be resolved manually.\n\n");
  msg.push_str("The conflict branch[es]:\n\n");
  for branch in conflict_branches {
    msg.push_str(&format!("    {branch} conflict with {branch}-gitsync-conflict\n"));
  }
  msg.push_str("\nPlease follow the steps to resolve the conflicts:\n\n");
  msg.push_str(&format!(
    "    1. cd {}/{}\n",
    target_dir.display(),
    target_subdir.trim_end_matches('/').trim_start_matches("./")
  ));
  msg.push_str("    2. git checkout BRANCH-NAME // Replace BRANCH-NAME to your branch name\n");
  msg.push_str("    3. git merge BRANCH-NAME-gitsync-conflict\n");
  msg.push_str("    4. // Follow the tips to resolve the conflicts\n");
  msg.push_str("    5. git branch -d BRANCH-NAME-gitsync-conflict // Remove temp branch\n");
  msg.push_str("    6. \"gitsync ...\" to sync changes back to current repository\n");
  eprintln!("{msg}");
}

fn print_error_recovery(verbosity: Verbosity, init_target_hash: &Option<String>) {
  eprintln!("Sorry, an error occurred during sync.");
  if verbosity != Verbosity::Verbose {
    eprintln!("\nTo retry your command with verbose logs, re-run with --verbose for full diagnostic output.");
  }
  eprintln!("\nTo reset to previous HEAD:\n");
  match init_target_hash {
    Some(hash) => eprintln!("    git reset --hard {hash}"),
    None => {
      eprintln!("    git rm --cached -r *");
      eprintln!("    git update-ref -d HEAD");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn synced_line_pluralizes() {
    let mut report = SyncReport::default();
    report.commits_new = 1;
    assert_eq!(report.synced_line(), "Synced 1 commit.");
    report.commits_new = 0;
    assert_eq!(report.synced_line(), "Synced 0 commits.");
    report.commits_new = 3;
    assert_eq!(report.synced_line(), "Synced 3 commits.");
  }

  #[test]
  fn commits_line_format_matches_spec() {
    let report = SyncReport {
      commits_new: 1,
      commits_exists: 0,
      commits_source: 1,
      commits_target: 0,
      ..Default::default()
    };
    assert_eq!(report.commits_line(), "Commits: new: 1, exists: 0, source: 1, target: 0");
  }
}
