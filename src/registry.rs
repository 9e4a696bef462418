//! Per-run cache of module asset maps.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::ManifestMissing;
use crate::models::AssetMap;
use crate::project::ProjectLayout;

/// Loads each module's `map.json` at most once per run and shares it between files.
///
/// The registry lives for one build/publish invocation. A module referenced from another
/// module's markup is loaded lazily on first use; loaded maps are never replaced.
#[derive(Debug)]
pub struct HashMapRegistry {
  layout: ProjectLayout,
  known_modules: BTreeSet<String>,
  cache: RwLock<HashMap<String, Arc<AssetMap>>>,
}

impl HashMapRegistry {
  /// Create an empty registry for the app described by `layout`.
  pub fn new(layout: ProjectLayout, known_modules: impl IntoIterator<Item = String>) -> Self {
    Self {
      layout,
      known_modules: known_modules.into_iter().collect(),
      cache: RwLock::new(HashMap::new()),
    }
  }

  /// Return the cached map for `module`, reading it from disk on first access.
  pub fn load(&self, module: &str) -> Result<Arc<AssetMap>, ManifestMissing> {
    if let Some(map) = self.cache.read().get(module) {
      return Ok(Arc::clone(map));
    }

    let mut cache = self.cache.write();
    if let Some(map) = cache.get(module) {
      return Ok(Arc::clone(map));
    }

    let path = self.layout.map_file(module);
    let map = Arc::new(read_asset_map(module, &path)?);
    debug!(
      module,
      path = %path.display(),
      hashed = map.rev.len(),
      pages = map.include.len(),
      "loaded asset map"
    );
    cache.insert(module.to_string(), Arc::clone(&map));
    Ok(map)
  }

  /// Whether `name` refers to a module of this app.
  pub fn is_module(&self, name: &str) -> bool {
    if name.is_empty() || name.starts_with('.') {
      return false;
    }

    self.known_modules.contains(name)
      || self.cache.read().contains_key(name)
      || self.layout.map_file(name).is_file()
  }

  /// Modules whose maps have been loaded so far, sorted.
  pub fn loaded_modules(&self) -> Vec<String> {
    let mut modules: Vec<String> = self.cache.read().keys().cloned().collect();
    modules.sort();
    modules
  }
}

/// Hashed file name for `logical`, or `logical` itself when the map does not track it.
pub fn resolve_hashed_name<'a>(logical: &'a str, map: &'a AssetMap) -> &'a str {
  map.rev.get(logical).map(String::as_str).unwrap_or(logical)
}

fn read_asset_map(module: &str, path: &Path) -> Result<AssetMap, ManifestMissing> {
  let missing = |reason: String| ManifestMissing {
    module: module.to_string(),
    path: path.to_path_buf(),
    reason,
  };

  let content = fs::read_to_string(path).map_err(|err| missing(err.to_string()))?;
  serde_json::from_str(&content).map_err(|err| missing(err.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::LayoutConfig;
  use tempfile::tempdir;

  fn write_map(root: &Path, module: &str, json: &str) {
    let dist = root.join(module).join("dist");
    fs::create_dir_all(&dist).unwrap();
    fs::write(dist.join("map.json"), json).unwrap();
  }

  #[test]
  fn hashed_name_falls_back_to_logical_path() {
    let map: AssetMap =
      serde_json::from_str(r#"{"rev": {"css/main.css": "css/main.a1b2c3.css"}}"#).unwrap();

    assert_eq!(resolve_hashed_name("css/main.css", &map), "css/main.a1b2c3.css");
    assert_eq!(resolve_hashed_name("css/other.css", &map), "css/other.css");
  }

  #[test]
  fn caches_each_module_after_first_load() {
    let dir = tempdir().unwrap();
    write_map(dir.path(), "cart", r#"{"rev": {"js/app.js": "js/app.9f.js"}}"#);
    let registry = HashMapRegistry::new(
      ProjectLayout::new(dir.path(), LayoutConfig::default()),
      Vec::new(),
    );

    let first = registry.load("cart").unwrap();
    fs::remove_file(dir.path().join("cart/dist/map.json")).unwrap();
    let second = registry.load("cart").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.loaded_modules(), vec!["cart".to_string()]);
  }

  #[test]
  fn missing_map_reports_module_and_path() {
    let dir = tempdir().unwrap();
    let registry = HashMapRegistry::new(
      ProjectLayout::new(dir.path(), LayoutConfig::default()),
      Vec::new(),
    );

    let err = registry.load("ghost").unwrap_err();
    assert_eq!(err.module, "ghost");
    assert!(err.path.ends_with("ghost/dist/map.json"));
    assert!(registry.loaded_modules().is_empty());
  }

  #[test]
  fn unparsable_map_is_reported_as_missing() {
    let dir = tempdir().unwrap();
    write_map(dir.path(), "cart", "[1, 2");
    let registry = HashMapRegistry::new(
      ProjectLayout::new(dir.path(), LayoutConfig::default()),
      Vec::new(),
    );

    assert!(registry.load("cart").is_err());
  }

  #[test]
  fn recognises_modules_from_config_or_disk() {
    let dir = tempdir().unwrap();
    write_map(dir.path(), "common", "{}");
    let registry = HashMapRegistry::new(
      ProjectLayout::new(dir.path(), LayoutConfig::default()),
      vec!["cart".to_string()],
    );

    assert!(registry.is_module("cart"));
    assert!(registry.is_module("common"));
    assert!(!registry.is_module("images"));
    assert!(!registry.is_module(".."));
  }
}
