use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::{Transfer, TransferError, TransferItem, remote_join, run_with_input, shell_quote};
use crate::config::TargetConfig;
use crate::error::ConfigError;
use crate::target::TargetId;

const DEFAULT_SSH_PORT: u16 = 22;
/// Sessions multiplexed over the control connection at once; sshd refuses more than
/// `MaxSessions` (10 by default).
const MAX_SESSIONS: usize = 8;

/// Session-style uploads: one `ssh` control master is kept open for the whole run and every
/// item is written through it with `mkdir -p && cat >`.
///
/// Authentication is left to the user's ssh setup (keys or agent); `pass` is not used.
#[derive(Debug)]
pub struct SshTransfer {
  destination: String,
  port: u16,
  control_path: PathBuf,
  open: bool,
}

impl SshTransfer {
  /// Read `host`, `user` and optional `port` from the target configuration.
  pub fn new(target: TargetId, config: &TargetConfig) -> Result<Self, ConfigError> {
    let host = config.required(target, "host")?.trim();
    let user = config.required(target, "user")?.trim();
    let destination = format!("{user}@{host}");
    let control_path = std::env::temp_dir().join(format!(
      "asset-publisher-{}-{}.sock",
      std::process::id(),
      host.replace(|c: char| !c.is_ascii_alphanumeric(), "_")
    ));

    Ok(Self {
      destination,
      port: config.port.unwrap_or(DEFAULT_SSH_PORT),
      control_path,
      open: false,
    })
  }

  fn base_command(&self) -> Command {
    let mut command = Command::new("ssh");
    command
      .arg("-p")
      .arg(self.port.to_string())
      .arg("-o")
      .arg(format!("ControlPath={}", self.control_path.display()))
      .arg("-o")
      .arg("BatchMode=yes");
    command
  }

  fn upload_script(remote_file: &str) -> String {
    let remote_dir = match remote_file.rsplit_once('/') {
      Some((dir, _)) if !dir.is_empty() => dir,
      _ => ".",
    };
    format!(
      "mkdir -p {} && cat > {}",
      shell_quote(remote_dir),
      shell_quote(remote_file)
    )
  }

  fn run_status(mut command: Command, destination: &str) -> Result<(), TransferError> {
    let output = command
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .output()
      .map_err(|source| TransferError::Spawn {
        program: "ssh".to_string(),
        source,
      })?;

    if output.status.success() {
      Ok(())
    } else {
      Err(TransferError::Failed {
        program: "ssh".to_string(),
        destination: destination.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      })
    }
  }
}

impl Transfer for SshTransfer {
  fn describe(&self) -> String {
    format!("ssh://{}:{}", self.destination, self.port)
  }

  fn open(&mut self) -> Result<(), TransferError> {
    let mut command = self.base_command();
    command
      .arg("-o")
      .arg("ControlMaster=yes")
      .arg("-o")
      .arg("ControlPersist=yes")
      .arg("-N")
      .arg("-f")
      .arg(&self.destination);

    Self::run_status(command, &self.destination)?;
    self.open = true;
    debug!(destination = %self.destination, "opened ssh control connection");
    Ok(())
  }

  fn max_concurrency(&self) -> Option<usize> {
    Some(MAX_SESSIONS)
  }

  fn push(&self, remote_dir: &str, item: &TransferItem) -> Result<(), TransferError> {
    let remote_file = remote_join(remote_dir, &item.relative);
    let mut command = self.base_command();
    command
      .arg(&self.destination)
      .arg(Self::upload_script(&remote_file));

    run_with_input(&mut command, "ssh", &remote_file, &item.contents)
  }

  fn close(&mut self) -> Result<(), TransferError> {
    if !self.open {
      return Ok(());
    }

    let mut command = self.base_command();
    command.arg("-O").arg("exit").arg(&self.destination);
    self.open = false;
    Self::run_status(command, &self.destination)
  }
}

impl Drop for SshTransfer {
  fn drop(&mut self) {
    if self.open
      && let Err(err) = self.close()
    {
      warn!(error = %err, "failed to close ssh control connection");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn upload_script_creates_parent_and_quotes_paths() {
    assert_eq!(
      SshTransfer::upload_script("/data/www/shop/css/a b.css"),
      "mkdir -p '/data/www/shop/css' && cat > '/data/www/shop/css/a b.css'"
    );
    assert_eq!(SshTransfer::upload_script("a.css"), "mkdir -p '.' && cat > 'a.css'");
  }

  #[test]
  fn requires_host_and_user() {
    let config = TargetConfig {
      host: Some("test.example.com".into()),
      ..TargetConfig::default()
    };
    let err = SshTransfer::new(TargetId::JdTest, &config).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField { field: "user", .. }));

    let config = TargetConfig {
      host: Some("test.example.com".into()),
      user: Some("deploy".into()),
      ..TargetConfig::default()
    };
    let transfer = SshTransfer::new(TargetId::JdTest, &config).unwrap();
    assert_eq!(transfer.describe(), "ssh://deploy@test.example.com:22");
    assert_eq!(transfer.max_concurrency(), Some(MAX_SESSIONS));
  }
}
