//! C9 — tag reconciler. Same shape as the branch reconciler, with prefix
//! add/remove, include/exclude globs, and annotated-vs-lightweight
//! preservation.

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};

use crate::error::Result;
use crate::git::GitDriver;
use crate::identity::IdentityOracle;
use crate::refs::RefInventory;
use crate::squash::SquashRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTag {
  pub name: String,
  pub hash: String,
  pub annotated: bool,
}

pub struct TagReconciler<'a> {
  git: &'a GitDriver,
  source_repo: &'a Path,
  target_repo: &'a Path,
  target_paths: &'a [String],
}

#[derive(Debug, Clone, Default)]
pub struct TagOptions {
  pub include: Vec<String>,
  pub exclude: Vec<String>,
  pub add_prefix: Option<String>,
  pub remove_prefix: Option<String>,
}

impl<'a> TagReconciler<'a> {
  pub fn new(git: &'a GitDriver, source_repo: &'a Path, target_repo: &'a Path, target_paths: &'a [String]) -> Self {
    TagReconciler {
      git,
      source_repo,
      target_repo,
      target_paths,
    }
  }

  /// `git show-ref --tags -d`: the `^{}` suffix marks the dereferenced
  /// peeled tag, identifying it as annotated.
  pub fn list_tags(&self, repo: &Path) -> Result<Vec<SourceTag>> {
    let raw = self.git.try_output(&["show-ref", "--tags", "-d"], repo)?;
    let mut by_name: HashMap<String, (String, bool)> = HashMap::new();
    for line in raw.stdout.lines() {
      let mut parts = line.splitn(2, ' ');
      let Some(hash) = parts.next() else { continue };
      let Some(refname) = parts.next() else { continue };
      let Some(name) = refname.strip_prefix("refs/tags/") else { continue };
      if let Some(base) = name.strip_suffix("^{}") {
        by_name.insert(base.to_string(), (hash.to_string(), true));
      } else {
        by_name.entry(name.to_string()).or_insert((hash.to_string(), false));
      }
    }
    let mut tags: Vec<SourceTag> = by_name
      .into_iter()
      .map(|(name, (hash, annotated))| SourceTag { name, hash, annotated })
      .collect();
    tags.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tags)
  }

  /// Reconciles source tags into the target, applying include/exclude
  /// globs and the prefix transform, resolving each retained tag's commit
  /// through the identity oracle (falling back to the squash-range map).
  pub fn reconcile(
    &self,
    opts: &TagOptions,
    oracle: &mut IdentityOracle,
    squash: Option<&SquashRecord>,
  ) -> Result<Vec<String>> {
    let source_tags = self.list_tags(self.source_repo)?;
    let target_tags = self.list_tags(self.target_repo)?;
    let target_names: std::collections::HashSet<&str> = target_tags.iter().map(|t| t.name.as_str()).collect();

    // removeTagPrefix is implicitly added to the include list (§4.9.2).
    let mut include = opts.include.clone();
    if let Some(prefix) = &opts.remove_prefix {
      include.push(format!("{prefix}*"));
    }

    let new_source_tags: Vec<&SourceTag> = source_tags
      .iter()
      .filter(|t| !target_names.contains(self.transform_name(&t.name, opts).as_str()))
      .collect();
    let names: Vec<String> = new_source_tags.iter().map(|t| t.name.clone()).collect();
    let filtered_names = RefInventory::filter(&names, &include, &opts.exclude)?;
    let filtered: std::collections::HashSet<&str> = filtered_names.iter().map(|s| s.as_str()).collect();

    let mut created = Vec::new();
    for tag in new_source_tags.into_iter().filter(|t| filtered.contains(t.name.as_str())) {
      let target_name = self.transform_name(&tag.name, opts);

      let resolved = oracle.resolve(self.source_repo, self.target_repo, self.target_paths, &tag.hash, squash)?;
      let Some(resolved_hash) = resolved else {
        warn!("could not resolve tag \"{}\" (source commit {}) to a target commit, skipping", tag.name, tag.hash);
        continue;
      };

      if tag.annotated {
        let contents = self.git.output(&["tag", "-l", "--format=%(contents)", &tag.name], self.source_repo)?;
        self
          .git
          .output(&["tag", &target_name, &resolved_hash, "-m", &contents], self.target_repo)?;
      } else {
        self.git.output(&["tag", &target_name, &resolved_hash], self.target_repo)?;
      }
      info!("created tag \"{target_name}\" at {resolved_hash}");
      created.push(target_name);
    }

    Ok(created)
  }

  /// Applies the remove-then-add prefix transform a reconciled tag's name
  /// goes through; exposed so callers can preview a name before committing
  /// to creating it.
  pub fn transform_name(&self, name: &str, opts: &TagOptions) -> String {
    let mut out = name.to_string();
    if let Some(prefix) = &opts.remove_prefix {
      if let Some(stripped) = out.strip_prefix(prefix.as_str()) {
        out = stripped.to_string();
      }
    }
    if let Some(prefix) = &opts.add_prefix {
      out = format!("{prefix}{out}");
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transform_name_adds_prefix() {
    let git = GitDriver::new();
    let reconciler = TagReconciler::new(&git, Path::new("/src"), Path::new("/tgt"), &[]);
    let opts = TagOptions {
      add_prefix: Some("v".to_string()),
      ..Default::default()
    };
    assert_eq!(reconciler.transform_name("0.1.0", &opts), "v0.1.0");
  }

  #[test]
  fn transform_name_removes_then_adds_prefix() {
    let git = GitDriver::new();
    let reconciler = TagReconciler::new(&git, Path::new("/src"), Path::new("/tgt"), &[]);
    let opts = TagOptions {
      remove_prefix: Some("internal-".to_string()),
      add_prefix: Some("v".to_string()),
      ..Default::default()
    };
    assert_eq!(reconciler.transform_name("internal-1.0.0", &opts), "v1.0.0");
  }
}
