#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod app;
pub mod combo;
pub mod config;
pub mod error;
pub mod models;
pub mod pages;
pub mod pipeline;
pub mod project;
pub mod publish;
pub mod registry;
pub mod rewrite;
pub mod target;
pub mod transfer;

pub use app::{AppPublisher, AppRun, ModuleOutcome};
pub use config::{AppConfig, ModuleConf, ProjectScope, TargetConfig};
pub use error::{ConfigError, ManifestMissing, PublishError, Warning, WarningKind};
pub use project::{ProjectLayout, PublishContext};
pub use publish::{PublishReport, PublishRequest, PublishState, Publisher};
pub use registry::HashMapRegistry;
pub use rewrite::{DocumentKind, Rewriter};
pub use target::{PrefixResolver, TargetId};
