//! C1 — the git driver. The only module allowed to spawn `git`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;

use crate::error::{GitSyncError, Result};

/// Invokes `git` (or any external binary) inside a repository and returns
/// its stdout. Every other component funnels its subprocess calls through
/// here so behavior — env overlay, stdin piping, muting — stays in one
/// place.
#[derive(Debug, Clone, Default)]
pub struct GitDriver;

impl GitDriver {
  pub fn new() -> Self {
    Self
  }

  /// Runs `git <args>` in `cwd`. Returns trimmed stdout as UTF-8.
  ///
  /// `stdin` is piped in if given. `env` overlays additional environment
  /// variables on top of the inherited environment (used for
  /// `GIT_AUTHOR_*`/`GIT_COMMITTER_*` and `GITSYNC_UPDATE` propagation).
  /// When `mute` is true, a non-zero exit does not raise — the caller
  /// inspects stdout/stderr itself (used by the conflict-detection paths
  /// in C6/C7 that expect git to fail sometimes).
  pub fn run(
    &self,
    args: &[&str],
    cwd: &Path,
    stdin: Option<&[u8]>,
    env: Option<&HashMap<String, String>>,
    mute: bool,
  ) -> Result<RunOutput> {
    let cmd_str = format!("git {}", args.join(" "));
    debug!("git[{}]: {}", cwd.display(), cmd_str);

    let mut command = Command::new("git");
    command.args(args).current_dir(cwd);
    if let Some(env) = env {
      for (k, v) in env {
        command.env(k, v);
      }
    }
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;

    if let Some(bytes) = stdin {
      // Write on a side thread: large patches can exceed the pipe buffer,
      // and git may start producing stdout/stderr before we finish writing.
      let mut child_stdin = child.stdin.take().expect("stdin was piped");
      let bytes = bytes.to_vec();
      let writer = std::thread::spawn(move || child_stdin.write_all(&bytes));
      let output = child.wait_with_output()?;
      writer
        .join()
        .map_err(|_| GitSyncError::GitOperation("patch writer thread panicked".into()))??;
      return Self::finish(cmd_str, cwd, output, mute);
    }
    drop(child.stdin.take());
    let output = child.wait_with_output()?;
    Self::finish(cmd_str, cwd, output, mute)
  }

  fn finish(
    cmd_str: String,
    cwd: &Path,
    output: std::process::Output,
    mute: bool,
  ) -> Result<RunOutput> {
    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
    if !output.status.success() && !mute {
      return Err(GitSyncError::GitCommand {
        cmd: cmd_str,
        cwd: cwd.to_path_buf(),
        stdout,
        stderr,
      });
    }
    Ok(RunOutput {
      success: output.status.success(),
      stdout,
      stderr,
    })
  }

  /// Convenience wrapper for the common case: run and require success,
  /// returning just stdout.
  pub fn output(&self, args: &[&str], cwd: &Path) -> Result<String> {
    Ok(self.run(args, cwd, None, None, false)?.stdout)
  }

  /// Run and swallow failure, returning whether it succeeded plus stdout/stderr.
  pub fn try_output(&self, args: &[&str], cwd: &Path) -> Result<RunOutput> {
    self.run(args, cwd, None, None, true)
  }

  pub fn with_stdin(&self, args: &[&str], cwd: &Path, stdin: &[u8]) -> Result<RunOutput> {
    self.run(args, cwd, Some(stdin), None, true)
  }

  pub fn with_env(
    &self,
    args: &[&str],
    cwd: &Path,
    env: &HashMap<String, String>,
  ) -> Result<String> {
    Ok(self.run(args, cwd, None, Some(env), false)?.stdout)
  }

  /// Runs a `git log` invocation, treating "no commits yet" (an unborn
  /// `HEAD`, or a scoped ref/range with nothing reachable) as an empty
  /// result rather than a failure. A target repository being synced into
  /// for the first time has exactly this shape, and every collaborator
  /// that searches target history with `--all` needs to tolerate it.
  pub fn log_output_allowing_unborn_head(&self, args: &[&str], cwd: &Path) -> Result<String> {
    let result = self.try_output(args, cwd)?;
    if result.success {
      return Ok(result.stdout);
    }
    if result.stderr.contains("does not have any commits yet")
      || result.stderr.contains("unknown revision or path not in the working tree")
    {
      return Ok(String::new());
    }
    Err(GitSyncError::GitCommand {
      cmd: format!("git {}", args.join(" ")),
      cwd: cwd.to_path_buf(),
      stdout: result.stdout,
      stderr: result.stderr,
    })
  }

  pub fn check_tool_exists(tool_name: &str) -> Result<()> {
    Command::new(tool_name)
      .arg("--version")
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status()
      .map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
          GitSyncError::ToolNotFound(tool_name.to_string())
        } else {
          GitSyncError::Io(e)
        }
      })?;
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
  pub success: bool,
  pub stdout: String,
  pub stderr: String,
}

/// The git empty-tree object id — stands in for "no parent".
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

pub fn is_repo(dir: &Path) -> bool {
  dir.join(".git").exists()
}

pub fn repo_display(dir: &Path) -> PathBuf {
  dir.to_path_buf()
}
