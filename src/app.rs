//! Publishing every module an invocation addresses, one after another.

use serde::Serialize;
use tracing::{error, info};

use crate::config::ProjectScope;
use crate::error::{ConfigError, PublishError};
use crate::project::{ProjectLayout, PublishContext};
use crate::publish::{PublishReport, PublishRequest, PublishState, Publisher};
use crate::registry::HashMapRegistry;

/// Result of publishing one module as part of an app run.
#[derive(Debug)]
pub struct ModuleOutcome {
  /// Module name.
  pub module: String,
  /// Report of a finished run, or the error that stopped it.
  pub result: Result<PublishReport, PublishError>,
}

impl ModuleOutcome {
  /// Terminal state of the module's run.
  pub fn state(&self) -> PublishState {
    match &self.result {
      Ok(report) => report.state,
      Err(_) => PublishState::Failed,
    }
  }

  /// Manifest entries confirmed for this module, including those of a failed run.
  pub fn manifest(&self) -> &[String] {
    match &self.result {
      Ok(report) => &report.manifest,
      Err(err) => err.partial_manifest(),
    }
  }
}

/// Outcomes of every addressed module, in build order.
#[derive(Debug, Default)]
pub struct AppRun {
  /// Per-module outcomes.
  pub outcomes: Vec<ModuleOutcome>,
}

/// Compact per-module line of an [`AppRun`] summary.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary<'a> {
  /// Module name.
  pub module: &'a str,
  /// Terminal state.
  pub state: PublishState,
  /// Number of manifest entries.
  pub manifest: usize,
}

impl AppRun {
  /// Combined manifest of all modules, failed ones included.
  pub fn manifest(&self) -> impl Iterator<Item = &str> {
    self
      .outcomes
      .iter()
      .flat_map(|outcome| outcome.manifest().iter().map(String::as_str))
  }

  /// Whether every module reached [`PublishState::Done`].
  pub fn is_success(&self) -> bool {
    self
      .outcomes
      .iter()
      .all(|outcome| outcome.state() == PublishState::Done)
  }

  /// One summary line per module.
  pub fn summary(&self) -> Vec<ModuleSummary<'_>> {
    self
      .outcomes
      .iter()
      .map(|outcome| ModuleSummary {
        module: &outcome.module,
        state: outcome.state(),
        manifest: outcome.manifest().len(),
      })
      .collect()
  }
}

/// Publishes the modules of a [`ProjectScope`] with one shared asset map registry.
pub struct AppPublisher<'a> {
  scope: &'a ProjectScope,
  layout: ProjectLayout,
  registry: HashMapRegistry,
}

impl<'a> AppPublisher<'a> {
  /// Prepare a run for `scope`.
  pub fn new(scope: &'a ProjectScope) -> Self {
    let layout = ProjectLayout::new(&scope.app_root, scope.app.layout.clone());
    let registry = HashMapRegistry::new(layout.clone(), scope.app.modules.iter().cloned());
    Self {
      scope,
      layout,
      registry,
    }
  }

  /// Layout of the app being published.
  pub fn layout(&self) -> &ProjectLayout {
    &self.layout
  }

  /// Publish every addressed module with the default adapters.
  pub fn publish(&self, request: &PublishRequest) -> Result<AppRun, ConfigError> {
    self.publish_with(request, |publisher| publisher)
  }

  /// Publish every addressed module, letting `configure` adjust each [`Publisher`].
  ///
  /// Modules run strictly in order. A failed module is recorded and the next one still runs.
  pub fn publish_with<F>(&self, request: &PublishRequest, configure: F) -> Result<AppRun, ConfigError>
  where
    F: for<'p> Fn(Publisher<'p>) -> Publisher<'p>,
  {
    let modules = self.scope.modules()?;
    if modules.len() > 1 && !request.pages.is_empty() {
      return Err(ConfigError::Invalid(
        "pages can only be selected when publishing a single module".into(),
      ));
    }

    let mut run = AppRun::default();
    for module in &modules {
      let context = PublishContext::new(&self.scope.app, module, &self.layout);
      let publisher = configure(Publisher::new(context, &self.registry));
      let result = publisher.publish(request);

      match &result {
        Ok(report) => info!(
          module = %module.module,
          manifest = report.manifest.len(),
          warnings = report.warnings.len(),
          "module published"
        ),
        Err(err) => error!(module = %module.module, error = %err, "module failed"),
      }
      run.outcomes.push(ModuleOutcome {
        module: module.module.clone(),
        result,
      });
    }

    Ok(run)
  }
}
