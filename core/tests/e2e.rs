//! End-to-end scenarios driven against real `git` subprocesses in temporary
//! repositories — the only way to exercise the engine's subprocess contract
//! faithfully.

use std::path::Path;
use std::process::Command;

use gitsync_core::config::RunConfig;
use gitsync_core::error::GitSyncError;
use gitsync_core::orchestrator::{run, Verbosity};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
  let status = Command::new("git")
    .args(args)
    .current_dir(dir)
    .status()
    .unwrap_or_else(|e| panic!("failed to spawn git {args:?}: {e}"));
  assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

fn git_output(dir: &Path, args: &[&str]) -> String {
  let out = Command::new("git")
    .args(args)
    .current_dir(dir)
    .output()
    .unwrap_or_else(|e| panic!("failed to spawn git {args:?}: {e}"));
  assert!(out.status.success(), "git {args:?} failed in {}", dir.display());
  String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn init_repo(dir: &Path) {
  git(dir, &["init", "-q", "-b", "master"]);
  git(dir, &["config", "user.name", "Test User"]);
  git(dir, &["config", "user.email", "test@example.com"]);
}

fn write_file(repo: &Path, rel_path: &str, content: &str) {
  let path = repo.join(rel_path);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}

fn commit_all(repo: &Path, message: &str) {
  git(repo, &["add", "-A"]);
  git(repo, &["commit", "-q", "-m", message]);
}

fn base_config(source: &Path, target: &Path) -> RunConfig {
  RunConfig {
    source_dir: source.to_path_buf(),
    source_subdir: ".".to_string(),
    target_dir: target.to_path_buf(),
    target_subdir: ".".to_string(),
    include_branches: Vec::new(),
    exclude_branches: Vec::new(),
    include_tags: Vec::new(),
    exclude_tags: Vec::new(),
    add_tag_prefix: None,
    remove_tag_prefix: None,
    no_tags: false,
    after: None,
    max_count: None,
    preserve_commit: false,
    filters: Vec::new(),
    squash: false,
    squash_base_branch: None,
    develop_branches: Vec::new(),
    skip_even_branch: false,
    plugins: Vec::new(),
  }
}

/// Scenario 1: a fresh source repo with one commit, synced into a brand
/// new empty target, is idempotent on a second run.
#[test]
fn basic_project_sync_is_idempotent() {
  let source_dir = TempDir::new().unwrap();
  let target_dir = TempDir::new().unwrap();
  init_repo(source_dir.path());
  init_repo(target_dir.path());

  write_file(source_dir.path(), "test.txt", "hello\n");
  commit_all(source_dir.path(), "Add test.txt");

  let config = base_config(source_dir.path(), target_dir.path());

  let report = run(&config, Verbosity::Info).expect("first sync should succeed");
  assert_eq!(report.commits_new, 1);
  assert_eq!(report.commits_exists, 0);
  assert_eq!(report.commits_source, 1);
  assert_eq!(report.commits_target, 0);
  assert!(target_dir.path().join("test.txt").exists());

  let report = run(&config, Verbosity::Info).expect("second sync should be a no-op");
  assert_eq!(report.commits_new, 0);
  assert_eq!(report.commits_exists, 1);
}

/// Scenario 2: projecting a subdirectory rehomes its files to the target
/// repository's root, dropping the subdirectory component.
#[test]
fn subdir_projection_rehomes_files_to_target_root() {
  let source_dir = TempDir::new().unwrap();
  let target_dir = TempDir::new().unwrap();
  init_repo(source_dir.path());
  init_repo(target_dir.path());

  write_file(source_dir.path(), "package-name/package.txt", "payload\n");
  write_file(source_dir.path(), "other/unrelated.txt", "noise\n");
  commit_all(source_dir.path(), "Add package-name");

  let mut config = base_config(source_dir.path(), target_dir.path());
  config.source_subdir = "package-name".to_string();

  let report = run(&config, Verbosity::Info).expect("subdir sync should succeed");
  assert_eq!(report.commits_new, 1);
  assert!(target_dir.path().join("package.txt").exists());
  assert!(!target_dir.path().join("package-name").exists());
  assert!(!target_dir.path().join("unrelated.txt").exists());
}

/// Scenario 3: a tag-prefix transform applies to newly created tags.
#[test]
fn tag_prefix_transform_applies_to_new_tags() {
  let source_dir = TempDir::new().unwrap();
  let target_dir = TempDir::new().unwrap();
  init_repo(source_dir.path());
  init_repo(target_dir.path());

  write_file(source_dir.path(), "test.txt", "v1\n");
  commit_all(source_dir.path(), "Release 0.1.0");
  git(source_dir.path(), &["tag", "0.1.0"]);

  write_file(source_dir.path(), "test.txt", "v2\n");
  commit_all(source_dir.path(), "Release 0.2.0");
  git(source_dir.path(), &["tag", "0.2.0"]);

  let mut config = base_config(source_dir.path(), target_dir.path());
  config.add_tag_prefix = Some("v".to_string());

  let report = run(&config, Verbosity::Info).expect("sync with tags should succeed");
  assert_eq!(report.tags_created, 2);

  let tags = git_output(target_dir.path(), &["tag", "-l"]);
  let tag_list: Vec<&str> = tags.lines().collect();
  assert!(tag_list.contains(&"v0.1.0"));
  assert!(tag_list.contains(&"v0.2.0"));
}

/// Scenario 5: a merge commit on the source side projects as a merge
/// commit on the target side with its subject preserved.
#[test]
fn merge_commit_is_projected_with_subject_preserved() {
  let source_dir = TempDir::new().unwrap();
  let target_dir = TempDir::new().unwrap();
  init_repo(source_dir.path());
  init_repo(target_dir.path());

  write_file(source_dir.path(), "test.txt", "base\n");
  commit_all(source_dir.path(), "Initial commit");

  git(source_dir.path(), &["checkout", "-q", "-b", "feature"]);
  write_file(source_dir.path(), "feature.txt", "feature work\n");
  commit_all(source_dir.path(), "Add feature work");

  git(source_dir.path(), &["checkout", "-q", "master"]);
  write_file(source_dir.path(), "trunk.txt", "trunk work\n");
  commit_all(source_dir.path(), "Add trunk work");

  git(source_dir.path(), &["merge", "--no-ff", "-q", "-m", "Merge branch 'feature'", "feature"]);

  let mut config = base_config(source_dir.path(), target_dir.path());
  config.include_branches = vec!["master".to_string()];
  let report = run(&config, Verbosity::Info).expect("merge sync should succeed");
  assert_eq!(report.commits_new, 4);

  let subject = git_output(target_dir.path(), &["log", "-1", "--format=%s"]);
  assert!(subject.contains("Merge branch 'feature'"));
  assert!(target_dir.path().join("feature.txt").exists());
  assert!(target_dir.path().join("trunk.txt").exists());
}

/// Scenario 6: squash mode collapses an entire branch's history into one
/// target commit carrying the squash-marker subject.
#[test]
fn squash_mode_collapses_branch_into_one_commit() {
  let source_dir = TempDir::new().unwrap();
  let target_dir = TempDir::new().unwrap();
  init_repo(source_dir.path());
  init_repo(target_dir.path());

  write_file(source_dir.path(), "package-name/a.txt", "a\n");
  commit_all(source_dir.path(), "Add a.txt");
  write_file(source_dir.path(), "package-name/b.txt", "b\n");
  commit_all(source_dir.path(), "Add b.txt");
  write_file(source_dir.path(), "package-name/c.txt", "c\n");
  commit_all(source_dir.path(), "Add c.txt");

  let mut config = base_config(source_dir.path(), target_dir.path());
  config.source_subdir = "package-name".to_string();
  config.squash = true;

  let report = run(&config, Verbosity::Info).expect("squash sync should succeed");
  assert_eq!(report.branches.len(), 1);

  let log = git_output(target_dir.path(), &["log", "--format=%s"]);
  let subjects: Vec<&str> = log.lines().collect();
  assert_eq!(subjects.len(), 1);
  assert!(subjects[0].starts_with("chore(sync): squash commits from"));

  assert!(target_dir.path().join("a.txt").exists());
  assert!(target_dir.path().join("b.txt").exists());
  assert!(target_dir.path().join("c.txt").exists());
}

/// Scenario 4: the target diverges from the source on the same file after
/// an initial sync, then the source adds another commit. The second sync
/// cannot three-way-apply cleanly, cannot worktree-overwrite (the source
/// does not contain the target's divergent commit), so it parks the new
/// commit on a `master-gitsync-conflict` branch and fails with `conflict`,
/// leaving `master` itself untouched.
#[test]
fn divergent_target_commit_parks_new_source_commit_on_conflict_branch() {
  let source_dir = TempDir::new().unwrap();
  let target_dir = TempDir::new().unwrap();
  init_repo(source_dir.path());
  init_repo(target_dir.path());

  write_file(source_dir.path(), "test.txt", "original content\n");
  commit_all(source_dir.path(), "Initial commit");

  let config = base_config(source_dir.path(), target_dir.path());
  run(&config, Verbosity::Info).expect("first sync should succeed");

  // The target diverges on its own, independent of the source.
  write_file(target_dir.path(), "test.txt", "new content by to repo\n");
  commit_all(target_dir.path(), "Target-only edit");

  // The source keeps moving forward with a conflicting edit to the same line.
  write_file(source_dir.path(), "test.txt", "different content by source\n");
  commit_all(source_dir.path(), "Source-only edit");

  let err = run(&config, Verbosity::Info).expect_err("second sync should diverge into conflict");
  assert!(matches!(err, GitSyncError::Conflict));

  let master_content = std::fs::read_to_string(target_dir.path().join("test.txt")).unwrap();
  assert_eq!(master_content, "new content by to repo\n");

  let branches = git_output(target_dir.path(), &["branch", "--no-color"]);
  assert!(branches.contains("master-gitsync-conflict"));
}
