//! Auxiliary worktree of the source repository, used by the worktree
//! overwrite path (§4.6.7) to pull file contents out of a commit that a
//! three-way patch apply could not reconcile.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Result;
use crate::git::GitDriver;

const WORKTREE_SUBDIR: &str = "gitsync-worktree";

/// Lazily-created detached worktree of `source_repo` rooted at
/// `<source_repo>/.git/gitsync-worktree`. Created on first use, removed in
/// teardown whether the run succeeds or fails (§5 resource ownership).
pub struct AuxWorktree<'a> {
  git: &'a GitDriver,
  source_repo: PathBuf,
  path: PathBuf,
  created: bool,
}

impl<'a> AuxWorktree<'a> {
  pub fn new(git: &'a GitDriver, source_repo: &Path) -> Self {
    let path = source_repo.join(".git").join(WORKTREE_SUBDIR);
    AuxWorktree {
      git,
      source_repo: source_repo.to_path_buf(),
      path,
      created: false,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Ensures the worktree exists, checked out detached with no files
  /// populated (`--no-checkout`) so the caller can `checkout -f <hash> --
  /// <paths>` only the files it needs.
  fn ensure_created(&mut self) -> Result<()> {
    if self.created {
      return Ok(());
    }
    debug!("creating auxiliary worktree at {}", self.path.display());
    self.git.output(
      &[
        "worktree",
        "add",
        "-f",
        &self.path.to_string_lossy(),
        "--no-checkout",
        "--detach",
      ],
      &self.source_repo,
    )?;
    self.created = true;
    Ok(())
  }

  /// Populates `paths` (relative to the worktree root) at `hash` into the
  /// worktree, creating it first if necessary.
  pub fn checkout_paths(&mut self, hash: &str, paths: &[String]) -> Result<()> {
    if paths.is_empty() {
      return Ok(());
    }
    self.ensure_created()?;
    let mut args: Vec<&str> = vec!["checkout", "-f", hash, "--"];
    for p in paths {
      args.push(p.as_str());
    }
    self.git.output(&args, &self.path)?;
    Ok(())
  }

  /// Removes the worktree if it was created. Safe to call unconditionally
  /// during teardown.
  pub fn remove(&mut self) -> Result<()> {
    if !self.created {
      return Ok(());
    }
    self
      .git
      .try_output(&["worktree", "remove", "-f", &self.path.to_string_lossy()], &self.source_repo)?;
    self.created = false;
    Ok(())
  }
}

impl<'a> Drop for AuxWorktree<'a> {
  fn drop(&mut self) {
    if self.created {
      let _ = self.remove();
    }
  }
}
