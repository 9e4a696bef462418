//! Error taxonomy shared by the rewriter and the publish pipeline.
//!
//! Configuration problems and missing asset maps are fatal and surface as [`PublishError`].
//! Everything that only affects a single file or reference is collected as a [`Warning`] so a
//! run can still produce its manifest.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::combo::ComboError;
use crate::pipeline::PipelineError;
use crate::publish::PublishState;
use crate::transfer::TransferError;

/// Problems with the app or module configuration. Always raised before files are touched.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// A configuration file exists but could not be read.
  #[error("failed to read {}: {source}", .path.display())]
  Read {
    /// Path that caused the error.
    path: PathBuf,
    /// Source I/O error.
    #[source]
    source: std::io::Error,
  },
  /// A configuration file could not be parsed.
  #[error("failed to parse {}: {message}", .path.display())]
  Parse {
    /// Path that caused the error.
    path: PathBuf,
    /// Parser message.
    message: String,
  },
  /// Neither an app nor a module configuration was found.
  #[error("no app-conf or module-conf found in {}", .0.display())]
  NotFound(PathBuf),
  /// The target identifier is not one of the supported deploy targets.
  #[error("unknown deploy target `{0}` (expected one of: local, storage, jdTest, tencent)")]
  UnknownTarget(String),
  /// The target is known but has no entry in the app's `deploy` table.
  #[error("deploy target `{0}` is not configured in app-conf")]
  MissingTarget(String),
  /// A field required by the selected target is absent or empty.
  #[error("deploy target `{target}` is missing `{field}`")]
  MissingField {
    /// Target identifier.
    target: String,
    /// Name of the missing field as written in app-conf.
    field: &'static str,
  },
  /// A selected page is not present in the module's compiled output.
  #[error("page `{page}` does not exist in {}", .dir.display())]
  UnknownPage {
    /// Requested page file name.
    page: String,
    /// Output directory that was searched.
    dir: PathBuf,
  },
  /// Page publishing was requested without a combo generator.
  #[error("app `{0}` has no combo command configured; page publishing needs one")]
  MissingCombo(String),
  /// Catch-all for inconsistent invocations.
  #[error("{0}")]
  Invalid(String),
}

/// A module's generated asset map could not be located or parsed.
#[derive(Debug, Clone, Error)]
#[error("asset map for module `{module}` unavailable at {}: {reason}", .path.display())]
pub struct ManifestMissing {
  /// Module whose map was requested.
  pub module: String,
  /// Location that was read.
  pub path: PathBuf,
  /// Human readable cause.
  pub reason: String,
}

/// Fatal error raised inside one of the transfer or combo phases.
#[derive(Debug, Error)]
pub enum PhaseError {
  /// The transfer session could not be established.
  #[error(transparent)]
  Transfer(#[from] TransferError),
  /// Combo generation failed.
  #[error(transparent)]
  Combo(#[from] ComboError),
  /// Reading or persisting files failed.
  #[error(transparent)]
  Pipeline(#[from] PipelineError),
  /// A page handed to the combo step references a module without an asset map.
  #[error(transparent)]
  Manifest(#[from] ManifestMissing),
}

/// Terminal failure of a publish run.
#[derive(Debug, Error)]
pub enum PublishError {
  /// Invalid configuration or request; nothing was transferred.
  #[error(transparent)]
  Config(#[from] ConfigError),
  /// The publishing module's own asset map is missing.
  #[error(transparent)]
  ManifestMissing(#[from] ManifestMissing),
  /// A phase failed after work had started. Transferred files are not rolled back.
  #[error("publishing module `{module}` failed during {state}: {source}")]
  Phase {
    /// Module being published.
    module: String,
    /// State in which the failure happened.
    state: PublishState,
    /// Manifest entries accumulated before the failure.
    manifest: Vec<String>,
    /// Underlying cause.
    #[source]
    source: PhaseError,
  },
}

impl PublishError {
  /// Manifest entries that were confirmed before the run stopped.
  pub fn partial_manifest(&self) -> &[String] {
    match self {
      Self::Phase { manifest, .. } => manifest,
      _ => &[],
    }
  }
}

/// Category of a non-fatal problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
  /// A reference could not be delimited reliably and was left as is.
  MatchAmbiguity,
  /// A file could not be read or rewritten and was skipped.
  Rewrite,
  /// The transfer adapter rejected a single item.
  Transfer,
  /// A selected page has no entry in the include index.
  MissingInclude,
}

/// Non-fatal problem recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
  /// Problem category.
  pub kind: WarningKind,
  /// Module that was being processed.
  pub module: String,
  /// File the problem was found in, relative to the module output.
  pub file: Option<String>,
  /// Description including the offending snippet when there is one.
  pub detail: String,
}

impl Warning {
  /// Create a warning that is not yet attributed to a file.
  pub fn new(kind: WarningKind, module: &str, detail: impl Into<String>) -> Self {
    Self {
      kind,
      module: module.to_string(),
      file: None,
      detail: detail.into(),
    }
  }

  /// Attach the file the warning belongs to.
  pub fn in_file(mut self, file: &str) -> Self {
    self.file = Some(file.to_string());
    self
  }
}

impl fmt::Display for Warning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let kind = match self.kind {
      WarningKind::MatchAmbiguity => "unresolved reference",
      WarningKind::Rewrite => "rewrite skipped",
      WarningKind::Transfer => "transfer failed",
      WarningKind::MissingInclude => "no include entry",
    };
    match &self.file {
      Some(file) => write!(f, "[{}] {kind} in {file}: {}", self.module, self.detail),
      None => write!(f, "[{}] {kind}: {}", self.module, self.detail),
    }
  }
}
