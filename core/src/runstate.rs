//! Transient run state: everything the orchestrator and its collaborators
//! mutate over the course of a single run, as opposed to the immutable
//! [`crate::config::RunConfig`].

/// Mutable, run-scoped state threaded through C6/C7/C8/C11.
#[derive(Debug, Clone)]
pub struct RunState {
  /// Target `HEAD` at the start of the run, used to build the "reset to
  /// previous HEAD" recovery hint. `None` means the target repo had no
  /// commits on entry.
  pub init_target_hash: Option<String>,
  /// The branch currently checked out in the target repository.
  pub current_branch: String,
  /// The branch chosen for trunk projection (the first branch scanned, or
  /// the configured squash base branch in squash mode).
  pub default_branch: String,
  /// The branch to restore when the run completes (or is torn down).
  pub orig_branch: String,
  /// Whether the source's commit set (restricted to the subpath) is a
  /// strict superset of the target's (§4.6.5).
  pub source_contains_target: bool,
  /// Whether this run is prepending older commits into the target's past
  /// rather than appending newer ones (§4.6.5).
  pub historical: bool,
  /// Source branch names that were diverted to a `-gitsync-conflict`
  /// branch this run.
  pub conflict_branches: Vec<String>,
  /// `sync-<parent>` branches created for off-trunk projection, deleted in
  /// teardown.
  pub temp_branches: Vec<String>,
  /// Whether a conflict has already been diverted-and-retried once this
  /// run (§4.6 step 4: only the first failure of the run retries).
  pub has_retried_once: bool,
}

impl RunState {
  pub fn new(init_target_hash: Option<String>, orig_branch: String, default_branch: String) -> Self {
    RunState {
      init_target_hash,
      current_branch: orig_branch.clone(),
      default_branch,
      orig_branch,
      source_contains_target: false,
      historical: false,
      conflict_branches: Vec::new(),
      temp_branches: Vec::new(),
      has_retried_once: false,
    }
  }
}
