//! Combo bundle generation seam.
//!
//! Merging a page's stylesheets and scripts into combo bundles is done by an external tool; the
//! publisher hands it the rewritten page HTML and picks up one `.html` and one `.shtml` per page.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ComboCommand;
use crate::pages::page_stem;

/// Combo generation failure.
#[derive(Debug, Error)]
pub enum ComboError {
  /// The combo command could not be started.
  #[error("failed to start combo command `{program}`: {source}")]
  Spawn {
    /// Program name.
    program: String,
    /// Source I/O error.
    #[source]
    source: std::io::Error,
  },
  /// The combo command exited unsuccessfully.
  #[error("combo command `{program}` exited with {status}: {stderr}")]
  Failed {
    /// Program name.
    program: String,
    /// Exit status description.
    status: String,
    /// Captured standard error.
    stderr: String,
  },
  /// The generator finished without producing a page's combo HTML.
  #[error("combo output for `{page}` not found at {}", .path.display())]
  MissingOutput {
    /// Page file name.
    page: String,
    /// Expected location.
    path: PathBuf,
  },
}

/// Input for one combo run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboRequest {
  /// App name.
  pub app: String,
  /// Module name.
  pub module: String,
  /// File-distribution path of the target.
  pub fd_path: String,
  /// CDN domain of the target.
  pub domain: String,
  /// Rewritten page HTML files.
  pub pages: Vec<PathBuf>,
  /// Directory the bundles must be written to.
  pub output_dir: PathBuf,
  /// Working directory for the generator (the app root).
  pub working_dir: PathBuf,
}

/// Outputs produced for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboArtifact {
  /// Page file name, e.g. `index.html`.
  pub page: String,
  /// Merged HTML.
  pub html: PathBuf,
  /// Merged SHTML include, when the generator produced one.
  pub shtml: Option<PathBuf>,
}

/// Produces combo bundles for a set of pages.
pub trait ComboGenerator: Send + Sync {
  /// Generate bundles for every page of the request.
  fn generate(&self, request: &ComboRequest) -> Result<Vec<ComboArtifact>, ComboError>;
}

/// Runs a configured command with the page paths as trailing arguments.
///
/// Request fields are exported as `COMBO_APP`, `COMBO_MODULE`, `COMBO_FD_PATH`, `COMBO_DOMAIN`
/// and `COMBO_OUTPUT`.
#[derive(Debug, Clone)]
pub struct CommandComboGenerator {
  command: ComboCommand,
}

impl CommandComboGenerator {
  /// Wrap the app's combo command.
  pub fn new(command: ComboCommand) -> Self {
    Self { command }
  }
}

impl ComboGenerator for CommandComboGenerator {
  fn generate(&self, request: &ComboRequest) -> Result<Vec<ComboArtifact>, ComboError> {
    let program = self.command.command.clone();
    info!(
      command = %program,
      module = %request.module,
      pages = request.pages.len(),
      "running combo command"
    );

    let output = Command::new(&program)
      .args(&self.command.args)
      .args(&request.pages)
      .current_dir(&request.working_dir)
      .env("COMBO_APP", &request.app)
      .env("COMBO_MODULE", &request.module)
      .env("COMBO_FD_PATH", &request.fd_path)
      .env("COMBO_DOMAIN", &request.domain)
      .env("COMBO_OUTPUT", &request.output_dir)
      .output()
      .map_err(|source| ComboError::Spawn {
        program: program.clone(),
        source,
      })?;

    if !output.status.success() {
      return Err(ComboError::Failed {
        program,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    collect_artifacts(&request.output_dir, &request.pages)
  }
}

/// Locate `<page>` and `<stem>.shtml` for each page inside `output_dir`.
pub fn collect_artifacts(output_dir: &Path, pages: &[PathBuf]) -> Result<Vec<ComboArtifact>, ComboError> {
  pages
    .iter()
    .filter_map(|page| page.file_name().map(|name| name.to_string_lossy().into_owned()))
    .map(|page| {
      let html = output_dir.join(&page);
      if !html.is_file() {
        return Err(ComboError::MissingOutput { page, path: html });
      }

      let shtml = output_dir.join(format!("{}.shtml", page_stem(&page)));
      let shtml = shtml.is_file().then_some(shtml);
      debug!(page = %page, has_shtml = shtml.is_some(), "found combo output");

      Ok(ComboArtifact { page, html, shtml })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  #[test]
  fn collects_html_and_shtml_per_page() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "").unwrap();
    fs::write(dir.path().join("index.shtml"), "").unwrap();
    fs::write(dir.path().join("about.html"), "").unwrap();

    let pages = vec![PathBuf::from("/staging/index.html"), PathBuf::from("/staging/about.html")];
    let artifacts = collect_artifacts(dir.path(), &pages).unwrap();

    assert_eq!(artifacts[0].page, "index.html");
    assert_eq!(artifacts[0].shtml, Some(dir.path().join("index.shtml")));
    assert_eq!(artifacts[1].shtml, None);
  }

  #[test]
  fn upper_case_page_finds_its_shtml() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("about.HTML"), "").unwrap();
    fs::write(dir.path().join("about.shtml"), "").unwrap();

    let artifacts = collect_artifacts(dir.path(), &[PathBuf::from("about.HTML")]).unwrap();
    assert_eq!(artifacts[0].shtml, Some(dir.path().join("about.shtml")));
  }

  #[test]
  fn missing_html_output_is_an_error() {
    let dir = tempdir().unwrap();
    let err = collect_artifacts(dir.path(), &[PathBuf::from("index.html")]).unwrap_err();
    assert!(matches!(err, ComboError::MissingOutput { page, .. } if page == "index.html"));
  }

  #[cfg(unix)]
  #[test]
  fn command_generator_exports_request_fields() {
    let dir = tempdir().unwrap();
    let output_dir = dir.path().join("combofile");
    fs::create_dir_all(&output_dir).unwrap();
    let page = dir.path().join("index.html");
    fs::write(&page, "<html></html>").unwrap();

    let generator = CommandComboGenerator::new(ComboCommand {
      command: "sh".into(),
      args: vec![
        "-c".into(),
        r#"for p in "$@"; do printf '%s %s' "$COMBO_APP" "$COMBO_DOMAIN" > "$COMBO_OUTPUT/$(basename "$p")"; done"#.into(),
        "combo".into(),
      ],
    });
    let request = ComboRequest {
      app: "shop".into(),
      module: "shop".into(),
      fd_path: "/static".into(),
      domain: "cdn.example.com".into(),
      pages: vec![page],
      output_dir: output_dir.clone(),
      working_dir: dir.path().to_path_buf(),
    };

    let artifacts = generator.generate(&request).unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(
      fs::read_to_string(output_dir.join("index.html")).unwrap(),
      "shop cdn.example.com"
    );
  }
}
