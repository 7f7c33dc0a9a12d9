use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while driving a sync run.
///
/// Several variants carry their full, bit-exact recovery message at the
/// call site rather than here, since the text interpolates run-specific
/// names.
#[derive(Error, Debug)]
pub enum GitSyncError {
  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Configuration file not found at path: {0}\nConsider running `gitsync config init` to create a default file.")]
  ConfigNotFound(PathBuf),

  #[error("I/O Error: {0}")]
  Io(#[from] std::io::Error),

  #[error("TOML parsing error: {0}")]
  TomlParse(#[from] toml::de::Error),

  #[error("TOML serialization error: {0}")]
  TomlSerialize(#[from] toml::ser::Error),

  #[error("Git command failed: {cmd}\nStderr: {stderr}")]
  GitCommand {
    cmd: String,
    cwd: PathBuf,
    stdout: String,
    stderr: String,
  },

  #[error("Git operation failed: {0}")]
  GitOperation(String),

  #[error("Repository \"{dir}\" has unmerged conflict branches \"{names}\", please merge or remove branches before syncing.")]
  PreexistingConflictBranches { dir: PathBuf, names: String },

  #[error("Target repository \"{0}\" has uncommitted changes, please commit or remove changes before syncing.")]
  TargetDirty(PathBuf),

  #[error("Expected to return one commit, but returned more than one commit with the same message in the same second: {hashes}")]
  AmbiguousIdentity { hashes: String },

  #[error("conflict")]
  Conflict,

  #[error("Cannot delete develop branch \"{0}\" checked out in target repository.")]
  DevelopBranchCheckedOut(String),

  #[error("Squash base branch \"{0}\" not found in source repository.")]
  SquashBaseBranchMissing(String),

  #[error("Unsupported method \"{method}\" in plugin \"{path}\", please remove it from export")]
  UnsupportedPluginMethod { method: String, path: PathBuf },

  #[error("Plugin \"{path}\" failed: {message}")]
  PluginFailure { path: PathBuf, message: String },

  #[error("Required tool '{0}' not found in PATH")]
  ToolNotFound(String),

  #[error("Project path not found: {0}")]
  PathNotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, GitSyncError>;
