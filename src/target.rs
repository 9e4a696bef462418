//! Deploy target identifiers and the per-target URL prefix rules.

use std::fmt;
use std::str::FromStr;

use crate::config::AppConfig;
use crate::error::ConfigError;

/// Base URL of the local preview server.
pub const LOCAL_PREVIEW_BASE: &str = "http://127.0.0.1:3001/";

/// Closed set of deploy targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetId {
  /// Local preview.
  Local,
  /// Internal static storage.
  Storage,
  /// External test CDN.
  JdTest,
  /// External production CDN.
  Tencent,
}

impl TargetId {
  /// Every supported target.
  pub const ALL: [TargetId; 4] = [
    TargetId::Local,
    TargetId::Storage,
    TargetId::JdTest,
    TargetId::Tencent,
  ];

  /// Identifier as written in app-conf and on the command line.
  pub fn as_str(self) -> &'static str {
    match self {
      TargetId::Local => "local",
      TargetId::Storage => "storage",
      TargetId::JdTest => "jdTest",
      TargetId::Tencent => "tencent",
    }
  }

  /// Older app-conf key for the same target.
  pub fn legacy_key(self) -> Option<&'static str> {
    match self {
      TargetId::Storage => Some("qiang"),
      _ => None,
    }
  }

  /// Whether the target is served from an external CDN domain.
  pub fn is_cdn(self) -> bool {
    matches!(self, TargetId::JdTest | TargetId::Tencent)
  }
}

impl fmt::Display for TargetId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TargetId {
  type Err = ConfigError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    TargetId::ALL
      .into_iter()
      .find(|target| {
        let value = value.trim();
        target.as_str() == value || target.legacy_key() == Some(value)
      })
      .ok_or_else(|| ConfigError::UnknownTarget(value.to_string()))
  }
}

#[derive(Debug, Clone)]
enum PrefixRule {
  Local,
  Storage { remote_path: String },
  Cdn {
    domain: String,
    fd_path: String,
    app: String,
  },
}

/// Computes module URL prefixes for one target. Configuration is validated up front so
/// prefix lookups cannot fail once a resolver exists.
#[derive(Debug, Clone)]
pub struct PrefixResolver {
  target: TargetId,
  rule: PrefixRule,
}

impl PrefixResolver {
  /// Validate the target's configuration and build its prefix rule.
  pub fn new(app: &AppConfig, target: TargetId) -> Result<Self, ConfigError> {
    let rule = match target {
      TargetId::Local => PrefixRule::Local,
      TargetId::Storage => {
        let config = app.require_target(target)?;
        PrefixRule::Storage {
          remote_path: config.required(target, "remotePath")?.trim_matches('/').to_string(),
        }
      }
      TargetId::JdTest | TargetId::Tencent => {
        let config = app.require_target(target)?;
        PrefixRule::Cdn {
          domain: config.required(target, "domain")?.trim_end_matches('/').to_string(),
          fd_path: config
            .fd_path
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string(),
          app: app.app.clone(),
        }
      }
    };

    Ok(Self { target, rule })
  }

  /// Target this resolver was built for.
  pub fn target(&self) -> TargetId {
    self.target
  }

  /// Prefix prepended to every rewritten reference owned by `module`.
  pub fn prefix_for(&self, module: &str) -> String {
    match &self.rule {
      PrefixRule::Local => LOCAL_PREVIEW_BASE.to_string(),
      PrefixRule::Storage { remote_path } => format!("/{remote_path}/{module}/"),
      PrefixRule::Cdn {
        domain,
        fd_path,
        app,
      } => format!("//{domain}{fd_path}/{app}/{module}/"),
    }
  }

  /// Split a value this resolver already prefixed into `(module, relative)`.
  ///
  /// The local preview prefix carries no module segment and is never recognised.
  pub fn strip_prefix<'v>(&self, value: &'v str) -> Option<(&'v str, &'v str)> {
    let base = match &self.rule {
      PrefixRule::Local => return None,
      PrefixRule::Storage { remote_path } if remote_path.is_empty() => return None,
      PrefixRule::Storage { remote_path } => format!("/{remote_path}/"),
      PrefixRule::Cdn {
        domain,
        fd_path,
        app,
      } => format!("//{domain}{fd_path}/{app}/"),
    };

    let rest = value.strip_prefix(base.as_str())?;
    let (module, relative) = rest.split_once('/')?;
    (!module.is_empty() && !relative.is_empty()).then_some((module, relative))
  }
}
