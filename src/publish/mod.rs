//! Publish orchestration for one module.
//!
//! A run walks `SelectTarget → SelectPages → TransferRaw → GenerateCombo → TransferCombo → Done`.
//! Configuration problems are reported before anything is transferred. Once transfers started,
//! a fatal error stops the run in its current state and hands back the manifest confirmed so far;
//! nothing is rolled back.

mod plan;
mod state;

use std::fs;
use std::path::{Path, PathBuf};

use rayon::ThreadPool;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

pub use plan::{ManifestPrefixes, PublishPlan};
pub use state::{PublishMode, PublishState};

use crate::combo::{ComboArtifact, ComboGenerator, ComboRequest, CommandComboGenerator};
use crate::config::TargetConfig;
use crate::error::{ConfigError, PhaseError, PublishError, Warning, WarningKind};
use crate::pages::list_pages;
use crate::pipeline::{self, PipelineError, SourceFile};
use crate::project::PublishContext;
use crate::registry::HashMapRegistry;
use crate::rewrite::{DocumentKind, Rewriter};
use crate::target::{PrefixResolver, TargetId};
use crate::transfer::{self, Transfer, TransferError, TransferItem, remote_join};

type TransferFactory<'a> = dyn Fn(TargetId) -> Result<Box<dyn Transfer>, ConfigError> + 'a;

/// What to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRequest {
  /// Deploy target identifier as typed by the user.
  pub target: String,
  /// Page file names; empty selects whole-output mode.
  pub pages: Vec<String>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
  /// Published module.
  pub module: String,
  /// Deploy target.
  pub target: String,
  /// Page or whole-output mode.
  pub mode: PublishMode,
  /// Final state, always [`PublishState::Done`] for a returned report.
  pub state: PublishState,
  /// Remote URLs that need activation on the CDN, in stable order.
  pub manifest: Vec<String>,
  /// Number of files uploaded successfully.
  pub transferred: usize,
  /// Non-fatal problems, in the order files were processed.
  pub warnings: Vec<Warning>,
  /// Combo outputs picked up in page mode.
  #[serde(skip)]
  pub combo_outputs: Vec<ComboArtifact>,
}

/// Publishes one module of an app.
pub struct Publisher<'a> {
  context: PublishContext<'a>,
  registry: &'a HashMapRegistry,
  connect: Box<TransferFactory<'a>>,
  combo: Option<Box<dyn ComboGenerator + 'a>>,
}

impl<'a> Publisher<'a> {
  /// Publisher using the target's real transfer adapter and the app's combo command.
  pub fn new(context: PublishContext<'a>, registry: &'a HashMapRegistry) -> Self {
    let combo = context
      .app
      .combo
      .clone()
      .map(|command| Box::new(CommandComboGenerator::new(command)) as Box<dyn ComboGenerator + 'a>);

    Self {
      context,
      registry,
      connect: Box::new(move |target| {
        transfer::connect(target, context.app.target(target), context.layout)
      }),
      combo,
    }
  }

  /// Replace how the transfer adapter is built for the selected target.
  pub fn with_transfer(
    mut self,
    connect: impl Fn(TargetId) -> Result<Box<dyn Transfer>, ConfigError> + 'a,
  ) -> Self {
    self.connect = Box::new(connect);
    self
  }

  /// Replace the combo generator.
  pub fn with_combo(mut self, combo: impl ComboGenerator + 'a) -> Self {
    self.combo = Some(Box::new(combo));
    self
  }

  /// Run the publish state machine for `request`.
  pub fn publish(&self, request: &PublishRequest) -> Result<PublishReport, PublishError> {
    let module = self.context.module_name();
    let layout = self.context.layout;

    // SelectTarget
    let target: TargetId = request.target.parse()?;
    let prefixes = PrefixResolver::new(self.context.app, target)?;
    let target_config = self.context.app.target(target);
    info!(module, target = %target, state = %PublishState::SelectTarget, "publishing module");

    // SelectPages
    let output_dir = layout.output_dir(module);
    let mode = self.select_pages(&output_dir, &request.pages)?;
    let combo = match mode {
      PublishMode::Pages => Some(
        self
          .combo
          .as_deref()
          .ok_or_else(|| ConfigError::MissingCombo(self.context.app_name().to_string()))?,
      ),
      PublishMode::WholeOutput => None,
    };
    let dirs = RemoteDirs::new(target, target_config, module, mode)?;
    let manifest_prefixes = ManifestPrefixes::new(
      module,
      target_config.and_then(|config| config.asset_prefix.as_deref()),
      target_config.and_then(|config| config.shtml_prefix.as_deref()),
      prefixes.prefix_for(module),
    );

    let map = self.registry.load(module)?;
    let mut warnings = Vec::new();
    let plan = match mode {
      PublishMode::Pages => PublishPlan::for_pages(
        module,
        &request.pages,
        &map,
        layout.images_dir_name(),
        &list_images(&layout.images_dir(module)),
        &manifest_prefixes,
        &mut warnings,
      ),
      PublishMode::WholeOutput => PublishPlan::default(),
    };
    info!(
      module,
      mode = %mode,
      state = %PublishState::SelectPages,
      pages = plan.pages().len(),
      globs = plan.raw_globs().len(),
      "planned publish"
    );

    let mut transfer = (self.connect)(target)?;
    let pool = transfer_pool(transfer.as_ref());
    let mut run = Run {
      context: self.context,
      module,
      target,
      target_config,
      mode,
      output_dir,
      rewriter: Rewriter::new(module, &prefixes, self.registry),
      dirs,
      manifest_prefixes,
      plan,
      combo,
      pool: None,
      manifest: Vec::new(),
      transferred: 0,
      warnings,
      staged_pages: Vec::new(),
      combo_outputs: Vec::new(),
    };

    let mut phase = Some(Phase::TransferRaw);
    let mut state = PublishState::TransferRaw;
    match pool {
      Ok(pool) => run.pool = pool,
      Err(source) => return Err(run.fail(state, source.into())),
    }
    if let Err(source) = transfer.open() {
      return Err(run.fail(state, source.into()));
    }
    debug!(module, destination = %transfer.describe(), "transfer session open");

    while let Some(current) = phase {
      state = current.state();
      match run.step(current, transfer.as_ref()) {
        Ok(next) => phase = next,
        Err(source) => {
          if let Err(err) = transfer.close() {
            warn!(module, error = %err, "failed to close transfer session");
          }
          return Err(run.fail(state, source));
        }
      }
    }

    if let Err(source) = transfer.close() {
      return Err(run.fail(state, source.into()));
    }
    state = PublishState::Done;

    info!(
      module,
      target = %target,
      state = %state,
      transferred = run.transferred,
      manifest = run.manifest.len(),
      warnings = run.warnings.len(),
      "publish finished"
    );
    Ok(run.into_report(state))
  }

  fn select_pages(&self, output_dir: &Path, pages: &[String]) -> Result<PublishMode, ConfigError> {
    if pages.is_empty() {
      return Ok(PublishMode::WholeOutput);
    }

    let available = list_pages(output_dir).map_err(|source| ConfigError::Read {
      path: output_dir.to_path_buf(),
      source,
    })?;
    if let Some(unknown) = pages.iter().find(|page| !available.contains(page)) {
      return Err(ConfigError::UnknownPage {
        page: unknown.clone(),
        dir: output_dir.to_path_buf(),
      });
    }

    Ok(PublishMode::Pages)
  }
}

/// Remote directories of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteDirs {
  /// Raw CSS/JS/images and combo HTML.
  raw: String,
  /// Combo SHTML.
  cssi: String,
}

impl RemoteDirs {
  fn new(
    target: TargetId,
    config: Option<&TargetConfig>,
    module: &str,
    mode: PublishMode,
  ) -> Result<Self, ConfigError> {
    if target == TargetId::Local {
      let raw = module.to_string();
      return Ok(Self {
        cssi: raw.clone(),
        raw,
      });
    }

    let config = config.ok_or_else(|| ConfigError::MissingTarget(target.to_string()))?;
    let raw = remote_join(config.required(target, "remotePath")?, module);
    let cssi = if mode == PublishMode::Pages && target.is_cdn() {
      remote_join(config.required(target, "cssiPath")?, module)
    } else {
      config
        .cssi_path
        .as_deref()
        .filter(|path| !path.trim().is_empty())
        .map_or_else(|| raw.clone(), |path| remote_join(path, module))
    };

    Ok(Self { raw, cssi })
  }
}

/// Thread pool bounding concurrent pushes, when the adapter asks for a limit.
fn transfer_pool(transfer: &dyn Transfer) -> Result<Option<ThreadPool>, TransferError> {
  let Some(limit) = transfer.max_concurrency() else {
    return Ok(None);
  };

  rayon::ThreadPoolBuilder::new()
    .num_threads(limit.max(1))
    .thread_name(|index| format!("transfer-{index}"))
    .build()
    .map(Some)
    .map_err(|source| TransferError::Pool {
      limit,
      message: source.to_string(),
    })
}

/// Phases driven after the run is planned; each one hands over to the next or finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  TransferRaw,
  GenerateCombo,
  TransferCombo,
}

impl Phase {
  fn state(self) -> PublishState {
    match self {
      Phase::TransferRaw => PublishState::TransferRaw,
      Phase::GenerateCombo => PublishState::GenerateCombo,
      Phase::TransferCombo => PublishState::TransferCombo,
    }
  }
}

/// Result of processing one file in a transfer phase.
struct FileOutcome {
  pushed: bool,
  attempted: bool,
  warnings: Vec<Warning>,
}

struct Run<'r> {
  context: PublishContext<'r>,
  module: &'r str,
  target: TargetId,
  target_config: Option<&'r TargetConfig>,
  mode: PublishMode,
  output_dir: PathBuf,
  rewriter: Rewriter<'r>,
  dirs: RemoteDirs,
  manifest_prefixes: ManifestPrefixes,
  plan: PublishPlan,
  combo: Option<&'r dyn ComboGenerator>,
  pool: Option<ThreadPool>,
  manifest: Vec<String>,
  transferred: usize,
  warnings: Vec<Warning>,
  staged_pages: Vec<PathBuf>,
  combo_outputs: Vec<ComboArtifact>,
}

impl Run<'_> {
  fn step(&mut self, phase: Phase, transfer: &dyn Transfer) -> Result<Option<Phase>, PhaseError> {
    match phase {
      Phase::TransferRaw => self.transfer_raw(transfer),
      Phase::GenerateCombo => self.generate_combo(),
      Phase::TransferCombo => self.transfer_combo(transfer),
    }
  }

  /// Run `work` inside the adapter's bounded pool, or on the global pool without a limit.
  fn in_pool<T: Send>(&self, work: impl FnOnce() -> T + Send) -> T {
    match &self.pool {
      Some(pool) => pool.install(work),
      None => work(),
    }
  }

  fn transfer_raw(&mut self, transfer: &dyn Transfer) -> Result<Option<Phase>, PhaseError> {
    let sources = match self.mode {
      PublishMode::Pages => pipeline::collect_sources(&self.output_dir, self.plan.raw_globs())?,
      PublishMode::WholeOutput => pipeline::collect_sources(&self.output_dir, &[])?,
    };
    info!(
      module = self.module,
      state = %PublishState::TransferRaw,
      files = sources.len(),
      destination = %self.dirs.raw,
      "transferring raw files"
    );

    let outcomes: Vec<FileOutcome> = self.in_pool(|| {
      sources
        .par_iter()
        .map(|source| self.process_file(transfer, source, &self.dirs.raw))
        .collect()
    });

    for (source, outcome) in sources.iter().zip(outcomes) {
      if self.mode == PublishMode::WholeOutput && outcome.attempted {
        self
          .manifest
          .push(format!("{}{}", self.manifest_prefixes.assets, source.relative));
      }
      self.record(outcome);
    }

    match self.mode {
      PublishMode::WholeOutput => Ok(None),
      PublishMode::Pages => {
        self.manifest.extend(self.plan.manifest().iter().cloned());
        self.stage_pages()?;
        Ok(Some(Phase::GenerateCombo))
      }
    }
  }

  /// Rewrite the selected pages into the staging directory for the combo step.
  fn stage_pages(&mut self) -> Result<(), PhaseError> {
    let staging = self.context.layout.staging_dir(self.module);
    for page in self.plan.pages() {
      let path = self.output_dir.join(page);
      let text = fs::read_to_string(&path).map_err(|source| PipelineError::Io {
        path: path.clone(),
        source,
      })?;

      let rewritten = self.rewriter.rewrite_html(&text)?;
      self
        .warnings
        .extend(rewritten.warnings.into_iter().map(|warning| warning.in_file(page)));
      self
        .staged_pages
        .push(pipeline::persist(&staging, page, rewritten.text.as_bytes())?);
    }
    debug!(module = self.module, pages = self.staged_pages.len(), staging = %staging.display(), "staged pages");
    Ok(())
  }

  fn generate_combo(&mut self) -> Result<Option<Phase>, PhaseError> {
    let Some(combo) = self.combo else {
      return Ok(None);
    };

    let layout = self.context.layout;
    let output_dir = layout.combo_dir(self.module);
    fs::create_dir_all(&output_dir).map_err(|source| PipelineError::Io {
      path: output_dir.clone(),
      source,
    })?;

    let field = |value: Option<&String>| value.cloned().unwrap_or_default();
    let request = ComboRequest {
      app: self.context.app_name().to_string(),
      module: self.module.to_string(),
      fd_path: field(self.target_config.and_then(|config| config.fd_path.as_ref())),
      domain: field(self.target_config.and_then(|config| config.domain.as_ref())),
      pages: self.staged_pages.clone(),
      output_dir,
      working_dir: layout.app_root().to_path_buf(),
    };

    info!(module = self.module, state = %PublishState::GenerateCombo, pages = request.pages.len(), "generating combo bundles");
    self.combo_outputs = combo.generate(&request)?;
    Ok(Some(Phase::TransferCombo))
  }

  fn transfer_combo(&mut self, transfer: &dyn Transfer) -> Result<Option<Phase>, PhaseError> {
    let mut html = Vec::new();
    let mut shtml = Vec::new();
    for artifact in &self.combo_outputs {
      html.push(SourceFile {
        path: artifact.html.clone(),
        relative: artifact.page.clone(),
      });
      if let Some(path) = &artifact.shtml {
        let relative = path
          .file_name()
          .map(|name| name.to_string_lossy().into_owned())
          .unwrap_or_default();
        shtml.push(SourceFile {
          path: path.clone(),
          relative,
        });
      }
    }
    info!(
      module = self.module,
      state = %PublishState::TransferCombo,
      html = html.len(),
      shtml = shtml.len(),
      "transferring combo outputs"
    );

    let outcomes: Vec<FileOutcome> = self.in_pool(|| {
      html
        .par_iter()
        .map(|source| self.process_file(transfer, source, &self.dirs.raw))
        .chain(
          shtml
            .par_iter()
            .map(|source| self.push_verbatim(transfer, source, &self.dirs.cssi)),
        )
        .collect()
    });

    for outcome in outcomes {
      self.record(outcome);
    }
    Ok(None)
  }

  /// Read, rewrite and upload one file. Failures become warnings.
  fn process_file(&self, transfer: &dyn Transfer, source: &SourceFile, remote_dir: &str) -> FileOutcome {
    let mut warnings = Vec::new();
    let contents = match source.read() {
      Ok(contents) => contents,
      Err(err) => return self.skipped(source, WarningKind::Rewrite, err.to_string()),
    };

    let contents = match DocumentKind::from_path(&source.path) {
      DocumentKind::Passthrough => contents,
      kind => match String::from_utf8(contents) {
        Ok(text) => match self.rewriter.rewrite_document(kind, &text) {
          Ok(rewritten) => {
            warnings.extend(
              rewritten
                .warnings
                .into_iter()
                .map(|warning| warning.in_file(&source.relative)),
            );
            rewritten.text.into_bytes()
          }
          Err(err) => return self.skipped(source, WarningKind::Rewrite, err.to_string()),
        },
        Err(err) => {
          warnings.push(
            Warning::new(WarningKind::Rewrite, self.module, "not valid UTF-8; uploaded unchanged")
              .in_file(&source.relative),
          );
          err.into_bytes()
        }
      },
    };

    let mut outcome = self.upload(transfer, source, remote_dir, contents);
    warnings.append(&mut outcome.warnings);
    outcome.warnings = warnings;
    outcome
  }

  /// Upload one file exactly as it is on disk.
  fn push_verbatim(&self, transfer: &dyn Transfer, source: &SourceFile, remote_dir: &str) -> FileOutcome {
    match source.read() {
      Ok(contents) => self.upload(transfer, source, remote_dir, contents),
      Err(err) => self.skipped(source, WarningKind::Rewrite, err.to_string()),
    }
  }

  fn upload(&self, transfer: &dyn Transfer, source: &SourceFile, remote_dir: &str, contents: Vec<u8>) -> FileOutcome {
    let item = TransferItem::new(&source.path, source.relative.clone(), contents);
    match transfer.push(remote_dir, &item) {
      Ok(()) => {
        debug!(module = self.module, file = %source.relative, remote_dir, "transferred");
        FileOutcome {
          pushed: true,
          attempted: true,
          warnings: Vec::new(),
        }
      }
      Err(err) => FileOutcome {
        pushed: false,
        attempted: true,
        warnings: vec![
          Warning::new(WarningKind::Transfer, self.module, err.to_string()).in_file(&source.relative),
        ],
      },
    }
  }

  fn skipped(&self, source: &SourceFile, kind: WarningKind, detail: String) -> FileOutcome {
    FileOutcome {
      pushed: false,
      attempted: false,
      warnings: vec![Warning::new(kind, self.module, detail).in_file(&source.relative)],
    }
  }

  fn record(&mut self, outcome: FileOutcome) {
    if outcome.pushed {
      self.transferred += 1;
    }
    for warning in outcome.warnings {
      warn!(module = self.module, "{warning}");
      self.warnings.push(warning);
    }
  }

  fn fail(self, state: PublishState, source: PhaseError) -> PublishError {
    warn!(
      module = self.module,
      target = %self.target,
      state = %state,
      error = %source,
      "publish moved to {}",
      PublishState::Failed
    );
    PublishError::Phase {
      module: self.module.to_string(),
      state,
      manifest: self.manifest,
      source,
    }
  }

  fn into_report(self, state: PublishState) -> PublishReport {
    PublishReport {
      module: self.module.to_string(),
      target: self.target.to_string(),
      mode: self.mode,
      state,
      manifest: self.manifest,
      transferred: self.transferred,
      warnings: self.warnings,
      combo_outputs: self.combo_outputs,
    }
  }
}

/// File names directly inside the image directory, sorted.
fn list_images(dir: &Path) -> Vec<String> {
  let Ok(entries) = fs::read_dir(dir) else {
    return Vec::new();
  };

  let mut images: Vec<String> = entries
    .filter_map(Result::ok)
    .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
    .map(|entry| entry.file_name().to_string_lossy().into_owned())
    .collect();
  images.sort();
  images
}

#[cfg(test)]
mod tests;
