//! Remote transfer seam and the adapters selected by deploy target.
//!
//! The publisher only sees [`Transfer`]: open once, push any number of items (possibly from
//! several threads), close once. Adapters shell out to `curl` and `ssh`; protocol details stay
//! with those tools.

mod ftp;
mod local;
mod ssh;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

pub use ftp::FtpTransfer;
pub use local::LocalTransfer;
pub use ssh::SshTransfer;

use crate::config::TargetConfig;
use crate::error::ConfigError;
use crate::project::ProjectLayout;
use crate::target::TargetId;

/// Failure reported by a transfer adapter.
#[derive(Debug, Error)]
pub enum TransferError {
  /// The external program could not be started.
  #[error("failed to start `{program}`: {source}")]
  Spawn {
    /// Program name.
    program: String,
    /// Source I/O error.
    #[source]
    source: std::io::Error,
  },
  /// The external program ran and reported failure.
  #[error("`{program}` failed for {destination}: {stderr}")]
  Failed {
    /// Program name.
    program: String,
    /// Remote destination of the failed operation.
    destination: String,
    /// Captured standard error.
    stderr: String,
  },
  /// The bounded worker pool for the adapter could not be started.
  #[error("failed to start a transfer pool of {limit} workers: {message}")]
  Pool {
    /// Requested worker count.
    limit: usize,
    /// Pool builder message.
    message: String,
  },
  /// Local filesystem error.
  #[error("I/O error at {}: {source}", .path.display())]
  Io {
    /// Path that caused the error.
    path: PathBuf,
    /// Source I/O error.
    #[source]
    source: std::io::Error,
  },
}

/// Transfer mechanism family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
  /// Copy into a local directory.
  Local,
  /// One independent upload per item.
  Push,
  /// Uploads multiplexed over one persistent session.
  Session,
}

impl TransferKind {
  /// Mechanism used for a deploy target.
  pub fn for_target(target: TargetId) -> Self {
    match target {
      TargetId::Local => TransferKind::Local,
      TargetId::Storage | TargetId::Tencent => TransferKind::Push,
      TargetId::JdTest => TransferKind::Session,
    }
  }
}

/// One file handed to a transfer adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
  /// File the contents were read from, when there is one.
  pub source: Option<PathBuf>,
  /// Destination path relative to the remote directory, `/`-separated.
  pub relative: String,
  /// Bytes to upload.
  pub contents: Vec<u8>,
}

impl TransferItem {
  /// Item read from `source` with final `contents`.
  pub fn new(source: impl Into<PathBuf>, relative: impl Into<String>, contents: Vec<u8>) -> Self {
    Self {
      source: Some(source.into()),
      relative: relative.into(),
      contents,
    }
  }
}

/// Destination for published files.
pub trait Transfer: Send + Sync {
  /// Human readable destination, used in logs.
  fn describe(&self) -> String;

  /// Establish whatever session the adapter needs.
  fn open(&mut self) -> Result<(), TransferError> {
    Ok(())
  }

  /// Upper bound on pushes in flight at once; `None` leaves it to the worker pool.
  fn max_concurrency(&self) -> Option<usize> {
    None
  }

  /// Upload one item into `remote_dir`.
  fn push(&self, remote_dir: &str, item: &TransferItem) -> Result<(), TransferError>;

  /// Tear the session down.
  fn close(&mut self) -> Result<(), TransferError> {
    Ok(())
  }
}

/// Build the adapter for `target`, validating the connection fields it needs.
pub fn connect(
  target: TargetId,
  config: Option<&TargetConfig>,
  layout: &ProjectLayout,
) -> Result<Box<dyn Transfer>, ConfigError> {
  match TransferKind::for_target(target) {
    TransferKind::Local => {
      let root = config
        .and_then(|config| config.remote_path.as_deref())
        .filter(|path| !path.trim().is_empty())
        .map(|path| layout.app_root().join(path))
        .unwrap_or_else(|| layout.preview_dir());
      Ok(Box::new(LocalTransfer::new(root)))
    }
    TransferKind::Push => {
      let config = config.ok_or_else(|| ConfigError::MissingTarget(target.to_string()))?;
      Ok(Box::new(FtpTransfer::new(target, config)?))
    }
    TransferKind::Session => {
      let config = config.ok_or_else(|| ConfigError::MissingTarget(target.to_string()))?;
      Ok(Box::new(SshTransfer::new(target, config)?))
    }
  }
}

/// Join a remote directory and a relative path with exactly one `/`.
pub fn remote_join(remote_dir: &str, relative: &str) -> String {
  let dir = remote_dir.trim_end_matches('/');
  let relative = relative.trim_start_matches('/');
  if dir.is_empty() {
    relative.to_string()
  } else {
    format!("{dir}/{relative}")
  }
}

fn shell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', "'\\''"))
}

/// Run `command`, feed `contents` on stdin and map a non-zero exit to [`TransferError::Failed`].
fn run_with_input(
  command: &mut Command,
  program: &str,
  destination: &str,
  contents: &[u8],
) -> Result<(), TransferError> {
  let mut child = command
    .stdin(Stdio::piped())
    .stdout(Stdio::null())
    .stderr(Stdio::piped())
    .spawn()
    .map_err(|source| TransferError::Spawn {
      program: program.to_string(),
      source,
    })?;

  if let Some(mut stdin) = child.stdin.take() {
    stdin.write_all(contents).map_err(|source| TransferError::Io {
      path: Path::new(destination).to_path_buf(),
      source,
    })?;
  }

  let output = child.wait_with_output().map_err(|source| TransferError::Spawn {
    program: program.to_string(),
    source,
  })?;

  if output.status.success() {
    Ok(())
  } else {
    Err(TransferError::Failed {
      program: program.to_string(),
      destination: destination.to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
  }
}
