//! Filesystem layout of an app and the context handed to a single module's publish run.

use std::path::{Path, PathBuf};

use crate::config::{AppConfig, LayoutConfig, ModuleConf};

/// Resolves build artefact locations for the modules of one app.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
  app_root: PathBuf,
  layout: LayoutConfig,
}

impl ProjectLayout {
  /// Create a layout rooted at the app directory.
  pub fn new(app_root: impl Into<PathBuf>, layout: LayoutConfig) -> Self {
    Self {
      app_root: app_root.into(),
      layout,
    }
  }

  /// App root directory.
  pub fn app_root(&self) -> &Path {
    &self.app_root
  }

  /// Directory of a module.
  pub fn module_dir(&self, module: &str) -> PathBuf {
    self.app_root.join(module)
  }

  /// Compiled output tree of a module.
  pub fn output_dir(&self, module: &str) -> PathBuf {
    self.module_dir(module).join(&self.layout.output_dir)
  }

  /// Generated asset map (`rev` + `include`) of a module.
  pub fn map_file(&self, module: &str) -> PathBuf {
    self.module_dir(module).join(&self.layout.map_file)
  }

  /// Directory the combo step writes into.
  pub fn combo_dir(&self, module: &str) -> PathBuf {
    self.output_dir(module).join(&self.layout.combo_dir)
  }

  /// Directory holding rewritten page HTML for the combo step.
  pub fn staging_dir(&self, module: &str) -> PathBuf {
    self.module_dir(module).join(&self.layout.staging_dir)
  }

  /// Image directory name relative to the output tree.
  pub fn images_dir_name(&self) -> &str {
    self.layout.images_dir.trim_matches('/')
  }

  /// Image directory of a module's output tree.
  pub fn images_dir(&self, module: &str) -> PathBuf {
    self.output_dir(module).join(self.images_dir_name())
  }

  /// Local preview tree of the app.
  pub fn preview_dir(&self) -> PathBuf {
    self.app_root.join(&self.layout.preview_dir)
  }
}

/// Everything a publish run needs to know about the module it publishes.
#[derive(Debug, Clone, Copy)]
pub struct PublishContext<'a> {
  /// App configuration.
  pub app: &'a AppConfig,
  /// Module being published.
  pub module: &'a ModuleConf,
  /// App layout.
  pub layout: &'a ProjectLayout,
}

impl<'a> PublishContext<'a> {
  /// Bundle the pieces of a publish context.
  pub fn new(app: &'a AppConfig, module: &'a ModuleConf, layout: &'a ProjectLayout) -> Self {
    Self {
      app,
      module,
      layout,
    }
  }

  /// Name of the module being published.
  pub fn module_name(&self) -> &'a str {
    &self.module.module
  }

  /// App name handed to the combo step; the module's own `app` wins when set.
  pub fn app_name(&self) -> &'a str {
    if self.module.app.is_empty() {
      &self.app.app
    } else {
      &self.module.app
    }
  }
}
