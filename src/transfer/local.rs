use std::fs;
use std::path::PathBuf;

use same_file::is_same_file;
use tracing::debug;

use super::{Transfer, TransferError, TransferItem, remote_join};

/// Copies items into a directory on this machine; used for the local preview target.
#[derive(Debug, Clone)]
pub struct LocalTransfer {
  root: PathBuf,
}

impl LocalTransfer {
  /// Adapter writing below `root`. An absolute remote directory replaces the root.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn destination(&self, remote_dir: &str, relative: &str) -> PathBuf {
    self.root.join(remote_join(remote_dir, relative))
  }
}

impl Transfer for LocalTransfer {
  fn describe(&self) -> String {
    format!("local directory {}", self.root.display())
  }

  fn push(&self, remote_dir: &str, item: &TransferItem) -> Result<(), TransferError> {
    let destination = self.destination(remote_dir, &item.relative);

    // Never overwrite the build output the item was read from.
    if let Some(source) = &item.source
      && destination.exists()
      && is_same_file(source, &destination).unwrap_or(false)
    {
      debug!(path = %destination.display(), "destination is the source file; skipping");
      return Ok(());
    }

    if let Some(parent) = destination.parent() {
      fs::create_dir_all(parent).map_err(|source| TransferError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    fs::write(&destination, &item.contents).map_err(|source| TransferError::Io {
      path: destination.clone(),
      source,
    })
  }
}
