use std::io::Write;
use std::path::Path;
use std::process::Command;

use tempfile::NamedTempFile;
use tracing::debug;

use super::{Transfer, TransferError, TransferItem, remote_join, run_with_input};
use crate::config::TargetConfig;
use crate::error::ConfigError;
use crate::target::TargetId;

const DEFAULT_FTP_PORT: u16 = 21;

/// Push-style uploads: every item is an independent `curl` FTP upload.
///
/// Credentials never reach curl's argument list. `open` writes them to a netrc file readable
/// only by the current user, and every upload points curl at it.
#[derive(Debug)]
pub struct FtpTransfer {
  host: String,
  port: u16,
  user: String,
  pass: String,
  netrc: Option<NamedTempFile>,
}

impl FtpTransfer {
  /// Read `host`, `user`, `pass` and optional `port` from the target configuration.
  pub fn new(target: TargetId, config: &TargetConfig) -> Result<Self, ConfigError> {
    Ok(Self {
      host: config.required(target, "host")?.trim().to_string(),
      port: config.port.unwrap_or(DEFAULT_FTP_PORT),
      user: config.required(target, "user")?.to_string(),
      pass: config.required(target, "pass")?.to_string(),
      netrc: None,
    })
  }

  fn url(&self, remote_dir: &str, relative: &str) -> String {
    let path = remote_join(remote_dir, relative);
    format!(
      "ftp://{}:{}/{}",
      self.host,
      self.port,
      path.trim_start_matches('/')
    )
  }

  fn netrc_entry(&self) -> String {
    format!(
      "machine {}\nlogin {}\npassword {}\n",
      self.host, self.user, self.pass
    )
  }

  fn upload_command(url: &str, netrc: &Path) -> Command {
    let mut command = Command::new("curl");
    command
      .arg("--silent")
      .arg("--show-error")
      .arg("--ftp-create-dirs")
      .arg("--netrc-file")
      .arg(netrc)
      .arg("-T")
      .arg("-")
      .arg(url);
    command
  }
}

impl Transfer for FtpTransfer {
  fn describe(&self) -> String {
    format!("ftp://{}@{}:{}", self.user, self.host, self.port)
  }

  fn open(&mut self) -> Result<(), TransferError> {
    let mut file = tempfile::Builder::new()
      .prefix("asset-publisher-")
      .suffix(".netrc")
      .tempfile()
      .map_err(|source| TransferError::Io {
        path: std::env::temp_dir(),
        source,
      })?;
    file
      .write_all(self.netrc_entry().as_bytes())
      .and_then(|()| file.flush())
      .map_err(|source| TransferError::Io {
        path: file.path().to_path_buf(),
        source,
      })?;

    debug!(host = %self.host, "wrote ftp credentials");
    self.netrc = Some(file);
    Ok(())
  }

  fn push(&self, remote_dir: &str, item: &TransferItem) -> Result<(), TransferError> {
    let url = self.url(remote_dir, &item.relative);
    let Some(netrc) = &self.netrc else {
      return Err(TransferError::Failed {
        program: "curl".to_string(),
        destination: url,
        stderr: "ftp session is not open".to_string(),
      });
    };
    debug!(url = %url, bytes = item.contents.len(), "uploading over ftp");

    let mut command = Self::upload_command(&url, netrc.path());
    run_with_input(&mut command, "curl", &url, &item.contents)
  }

  fn close(&mut self) -> Result<(), TransferError> {
    match self.netrc.take() {
      Some(file) => {
        let path = file.path().to_path_buf();
        file
          .close()
          .map_err(|source| TransferError::Io { path, source })
      }
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  fn transfer() -> FtpTransfer {
    let config = TargetConfig {
      host: Some("ftp.example.com".into()),
      port: Some(2121),
      user: Some("deploy".into()),
      pass: Some("secret".into()),
      ..TargetConfig::default()
    };
    FtpTransfer::new(TargetId::Tencent, &config).unwrap()
  }

  #[test]
  fn builds_urls_under_remote_dir() {
    let transfer = transfer();
    assert_eq!(
      transfer.url("/static/shop", "css/main.css"),
      "ftp://ftp.example.com:2121/static/shop/css/main.css"
    );
    assert_eq!(transfer.describe(), "ftp://deploy@ftp.example.com:2121");
  }

  #[test]
  fn password_stays_out_of_the_command_line() {
    let mut transfer = transfer();
    transfer.open().unwrap();
    let netrc = transfer.netrc.as_ref().unwrap().path().to_path_buf();

    let command = FtpTransfer::upload_command(&transfer.url("/static", "a.css"), &netrc);
    let args: Vec<String> = command
      .get_args()
      .map(|arg| arg.to_string_lossy().into_owned())
      .collect();
    assert!(args.iter().all(|arg| !arg.contains("secret")));
    assert!(args.contains(&"--netrc-file".to_string()));

    assert_eq!(
      fs::read_to_string(&netrc).unwrap(),
      "machine ftp.example.com\nlogin deploy\npassword secret\n"
    );
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      let mode = fs::metadata(&netrc).unwrap().permissions().mode();
      assert_eq!(mode & 0o077, 0);
    }

    transfer.close().unwrap();
    assert!(!netrc.exists());
  }

  #[test]
  fn push_before_open_is_refused() {
    let transfer = transfer();
    let item = TransferItem::new("a.css", "a.css", b"a{}".to_vec());
    let err = transfer.push("/static", &item).unwrap_err();
    assert!(matches!(err, TransferError::Failed { .. }));
  }
}
