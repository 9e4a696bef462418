//! App and module configuration, plus discovery of the project scope the tool runs in.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ConfigError;
use crate::target::TargetId;

/// File stem of the app configuration (`app-conf.json`, `app-conf.yaml`, ...).
pub const APP_CONFIG_STEM: &str = "app-conf";
/// File stem of the per-module configuration.
pub const MODULE_CONFIG_STEM: &str = "module-conf";

const CONFIG_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// App-level configuration shared by every module.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  /// App name, used as a path segment in CDN prefixes.
  pub app: String,
  /// Modules in build order.
  #[serde(default, alias = "moduleList")]
  pub modules: Vec<String>,
  /// Deploy targets keyed by target identifier.
  #[serde(default)]
  pub deploy: BTreeMap<String, TargetConfig>,
  /// Overrides for the module build layout.
  #[serde(default)]
  pub layout: LayoutConfig,
  /// External command producing combo bundles.
  #[serde(default)]
  pub combo: Option<ComboCommand>,
}

impl AppConfig {
  /// Configuration block for a target, if the app declares one under its current or legacy key.
  pub fn target(&self, target: TargetId) -> Option<&TargetConfig> {
    self
      .deploy
      .get(target.as_str())
      .or_else(|| target.legacy_key().and_then(|key| self.deploy.get(key)))
  }

  /// Configuration block for a target, failing when it is absent.
  pub fn require_target(&self, target: TargetId) -> Result<&TargetConfig, ConfigError> {
    self
      .target(target)
      .ok_or_else(|| ConfigError::MissingTarget(target.to_string()))
  }
}

/// Connection and path settings for one deploy target. Fields vary by target.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
  /// Remote host name.
  pub host: Option<String>,
  /// Remote port.
  pub port: Option<u16>,
  /// Login user.
  pub user: Option<String>,
  /// Login password (push transfers only).
  pub pass: Option<String>,
  /// Remote directory receiving CSS/JS/images and combo HTML.
  pub remote_path: Option<String>,
  /// CDN domain.
  pub domain: Option<String>,
  /// File-distribution path appended to the domain.
  pub fd_path: Option<String>,
  /// Public prefix for CSS/JS/image entries in the publish manifest.
  #[serde(alias = "assestPrefix")]
  pub asset_prefix: Option<String>,
  /// Public prefix for SHTML entries in the publish manifest.
  pub shtml_prefix: Option<String>,
  /// Remote directory receiving combo SHTML.
  #[serde(alias = "cssi")]
  pub cssi_path: Option<String>,
}

impl TargetConfig {
  /// Return a non-empty string field or a [`ConfigError::MissingField`].
  pub fn required(&self, target: TargetId, field: &'static str) -> Result<&str, ConfigError> {
    let value = match field {
      "host" => self.host.as_deref(),
      "user" => self.user.as_deref(),
      "pass" => self.pass.as_deref(),
      "remotePath" => self.remote_path.as_deref(),
      "domain" => self.domain.as_deref(),
      "fdPath" => self.fd_path.as_deref(),
      "assetPrefix" => self.asset_prefix.as_deref(),
      "shtmlPrefix" => self.shtml_prefix.as_deref(),
      "cssiPath" => self.cssi_path.as_deref(),
      _ => None,
    };

    value
      .filter(|value| !value.trim().is_empty())
      .ok_or_else(|| ConfigError::MissingField {
        target: target.to_string(),
        field,
      })
  }
}

/// Per-module configuration file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModuleConf {
  /// Module name; also the module's directory name inside the app.
  pub module: String,
  /// Owning app name.
  #[serde(default)]
  pub app: String,
}

/// External combo command. Receives the page HTML paths as trailing arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct ComboCommand {
  /// Program to run.
  pub command: String,
  /// Arguments placed before the page paths.
  #[serde(default)]
  pub args: Vec<String>,
}

/// Relative locations of build artefacts inside a module directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LayoutConfig {
  /// Compiled output tree, relative to the module directory.
  pub output_dir: String,
  /// Generated asset map, relative to the module directory.
  pub map_file: String,
  /// Combo output, relative to the output tree.
  pub combo_dir: String,
  /// Rewritten page HTML handed to the combo step, relative to the module directory.
  pub staging_dir: String,
  /// Image directory, relative to the output tree.
  pub images_dir: String,
  /// Local preview tree, relative to the app directory.
  pub preview_dir: String,
}

impl Default for LayoutConfig {
  fn default() -> Self {
    Self {
      output_dir: "dist/output".into(),
      map_file: "dist/map.json".into(),
      combo_dir: "combofile".into(),
      staging_dir: "dist/publish".into(),
      images_dir: "images".into(),
      preview_dir: ".temp".into(),
    }
  }
}

/// Whether the tool was started from an app root or from inside a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
  /// Started in a directory holding `app-conf`.
  App,
  /// Started in a directory holding `module-conf`.
  Module,
}

/// Resolved project context: where the app lives and which module, if any, was addressed.
#[derive(Debug, Clone)]
pub struct ProjectScope {
  /// How the scope was discovered.
  pub kind: ScopeKind,
  /// App root directory.
  pub app_root: PathBuf,
  /// Loaded app configuration.
  pub app: AppConfig,
  /// Addressed module, when one was given or the tool runs inside a module.
  pub module: Option<ModuleConf>,
}

impl ProjectScope {
  /// Discover the scope from `dir`.
  ///
  /// An `app-conf` in `dir` makes it the app root and `module` (when given) selects a module
  /// inside it. Otherwise a `module-conf` in `dir` makes it a module whose parent is the app.
  pub fn discover(dir: &Path, module: Option<&str>) -> Result<Self, ConfigError> {
    if let Some(app) = load_config::<AppConfig>(dir, APP_CONFIG_STEM)? {
      let module = match module {
        Some(name) => Some(load_module_conf(dir, name)?),
        None => None,
      };
      return Ok(Self {
        kind: ScopeKind::App,
        app_root: dir.to_path_buf(),
        app,
        module,
      });
    }

    if let Some(module_conf) = load_config::<ModuleConf>(dir, MODULE_CONFIG_STEM)? {
      let app_root = dir
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;
      let app = load_config::<AppConfig>(&app_root, APP_CONFIG_STEM)?
        .ok_or_else(|| ConfigError::NotFound(app_root.clone()))?;
      return Ok(Self {
        kind: ScopeKind::Module,
        app_root,
        app,
        module: Some(module_conf),
      });
    }

    Err(ConfigError::NotFound(dir.to_path_buf()))
  }

  /// Modules addressed by this scope, in build order.
  pub fn modules(&self) -> Result<Vec<ModuleConf>, ConfigError> {
    if let Some(module) = &self.module {
      return Ok(vec![module.clone()]);
    }

    self
      .app
      .modules
      .iter()
      .map(|name| load_module_conf(&self.app_root, name))
      .collect()
  }
}

fn load_module_conf(app_root: &Path, name: &str) -> Result<ModuleConf, ConfigError> {
  let module_dir = app_root.join(name);
  load_config::<ModuleConf>(&module_dir, MODULE_CONFIG_STEM)?
    .ok_or(ConfigError::NotFound(module_dir))
}

/// Load `<dir>/<stem>.{json,yaml,yml}`, returning `None` when no candidate exists.
pub fn load_config<T: DeserializeOwned>(dir: &Path, stem: &str) -> Result<Option<T>, ConfigError> {
  let Some(path) = CONFIG_EXTENSIONS
    .iter()
    .map(|ext| dir.join(format!("{stem}.{ext}")))
    .find(|candidate| candidate.is_file())
  else {
    return Ok(None);
  };

  let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
    path: path.clone(),
    source,
  })?;
  parse_config(&path, &content).map(Some)
}

fn parse_config<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T, ConfigError> {
  let is_json = path.extension().is_some_and(|ext| ext == "json");
  let parsed = if is_json {
    serde_json::from_str(content).map_err(|err| err.to_string())
  } else {
    serde_yaml::from_str(content).map_err(|err| err.to_string())
  };

  parsed.map_err(|message| ConfigError::Parse {
    path: path.to_path_buf(),
    message,
  })
}
