//! C8 — branch reconciler. Runs after commits are projected: walks every
//! included source branch, resolves its tip through the identity oracle,
//! and creates/fast-forwards/force-moves the matching target branch, or
//! parks divergence on a conflict branch.

use std::path::Path;

use log::{info, warn};

use crate::error::Result;
use crate::git::GitDriver;
use crate::identity::IdentityOracle;
use crate::refs::CONFLICT_SUFFIX;
use crate::runstate::RunState;
use crate::squash::SquashRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchOutcome {
  Created(String),
  FastForwarded(String),
  UpToDate(String),
  AheadOfSource(String),
  Skipped { branch: String, reason: String },
  Diverged { branch: String, conflict_branch: String },
  SkippedEven { branch: String, matches: String },
}

pub struct BranchReconciler<'a> {
  git: &'a GitDriver,
  source_repo: &'a Path,
  target_repo: &'a Path,
  target_paths: &'a [String],
}

impl<'a> BranchReconciler<'a> {
  pub fn new(git: &'a GitDriver, source_repo: &'a Path, target_repo: &'a Path, target_paths: &'a [String]) -> Self {
    BranchReconciler {
      git,
      source_repo,
      target_repo,
      target_paths,
    }
  }

  pub fn reconcile(
    &self,
    branches: &[String],
    oracle: &mut IdentityOracle,
    squash: Option<&SquashRecord>,
    skip_even_branch: bool,
    state: &mut RunState,
  ) -> Result<Vec<BranchOutcome>> {
    let existing_target_branches = self.target_branch_tips()?;
    let mut outcomes = Vec::new();

    for source_branch in branches {
      let local_name = source_branch.strip_prefix("origin/").unwrap_or(source_branch).to_string();
      let tip = self.git.output(&["rev-parse", source_branch], self.source_repo)?;
      let resolved = oracle.resolve(self.source_repo, self.target_repo, self.target_paths, &tip, squash)?;

      let Some(resolved_tip) = resolved else {
        warn!("Commit not found in target repository, branch: {local_name}");
        outcomes.push(BranchOutcome::Skipped {
          branch: local_name,
          reason: "Commit not found in target repository".to_string(),
        });
        continue;
      };

      match existing_target_branches.iter().find(|(name, _)| name == &local_name) {
        None => {
          if skip_even_branch {
            if let Some(other) = existing_target_branches
              .iter()
              .find(|(name, hash)| *name != &local_name && *hash == &resolved_tip)
            {
              info!("Skip creating branch \"{local_name}\", which is even with: {}", other.0);
              outcomes.push(BranchOutcome::SkippedEven {
                branch: local_name,
                matches: other.0.clone(),
              });
              continue;
            }
          }
          self.git.output(&["branch", "-f", &local_name, &resolved_tip], self.target_repo)?;
          outcomes.push(BranchOutcome::Created(local_name));
        }
        Some((_, current_tip)) if current_tip == &resolved_tip => {
          outcomes.push(BranchOutcome::UpToDate(local_name));
        }
        Some((_, current_tip)) => {
          let merge_base = self
            .git
            .try_output(&["merge-base", current_tip, &resolved_tip], self.target_repo)?;
          let merge_base = merge_base.stdout.trim().to_string();

          if merge_base == *current_tip {
            self.git.output(&["branch", "-f", &local_name, &resolved_tip], self.target_repo)?;
            outcomes.push(BranchOutcome::FastForwarded(local_name));
          } else if merge_base == resolved_tip {
            outcomes.push(BranchOutcome::AheadOfSource(local_name));
          } else if local_name == state.current_branch {
            outcomes.push(BranchOutcome::Skipped {
              branch: local_name,
              reason: "is the current projection branch".to_string(),
            });
          } else {
            let conflict_branch = format!("{local_name}{CONFLICT_SUFFIX}");
            self
              .git
              .output(&["branch", "-f", &conflict_branch, &resolved_tip], self.target_repo)?;
            if !state.conflict_branches.iter().any(|b| b == &local_name) {
              state.conflict_branches.push(local_name.clone());
            }
            outcomes.push(BranchOutcome::Diverged {
              branch: local_name,
              conflict_branch,
            });
          }
        }
      }
    }

    Ok(outcomes)
  }

  fn target_branch_tips(&self) -> Result<Vec<(String, String)>> {
    let raw = self.git.output(&["branch", "--no-color"], self.target_repo)?;
    let mut out = Vec::new();
    for line in raw.lines() {
      let name = line.get(2..).unwrap_or("").trim();
      if name.is_empty() {
        continue;
      }
      let hash = self.git.output(&["rev-parse", name], self.target_repo)?;
      out.push((name.to_string(), hash));
    }
    Ok(out)
  }
}
