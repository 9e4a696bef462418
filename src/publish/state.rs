use std::fmt;

use serde::Serialize;

/// Steps of a publish run, in order. `Failed` is reachable from every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishState {
  /// Resolving the deploy target and its configuration.
  SelectTarget,
  /// Validating pages and planning the raw file set.
  SelectPages,
  /// Rewriting and uploading CSS/JS/images (or the whole output tree).
  TransferRaw,
  /// Handing rewritten pages to the combo generator.
  GenerateCombo,
  /// Rewriting and uploading combo HTML and SHTML.
  TransferCombo,
  /// Manifest emitted.
  Done,
  /// Stopped by an unrecoverable error.
  Failed,
}

impl PublishState {
  /// Kebab-case name used in logs and reports.
  pub fn as_str(self) -> &'static str {
    match self {
      PublishState::SelectTarget => "select-target",
      PublishState::SelectPages => "select-pages",
      PublishState::TransferRaw => "transfer-raw",
      PublishState::GenerateCombo => "generate-combo",
      PublishState::TransferCombo => "transfer-combo",
      PublishState::Done => "done",
      PublishState::Failed => "failed",
    }
  }
}

impl fmt::Display for PublishState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What a run publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishMode {
  /// Selected pages, their own-module dependencies, images and combo bundles.
  Pages,
  /// Every file of the output tree; no combo step.
  WholeOutput,
}

impl fmt::Display for PublishMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PublishMode::Pages => f.write_str("pages"),
      PublishMode::WholeOutput => f.write_str("whole-output"),
    }
  }
}
