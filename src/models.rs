//! Data structures read from module build output or produced while rewriting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Generated `map.json` of a module: content-hash map plus the per-page include index.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssetMap {
  /// Logical asset path (`css/main.css`) to content-hashed path (`css/main.a1b2c3.css`).
  #[serde(default)]
  pub rev: BTreeMap<String, String>,
  /// Page file name to the stylesheets and scripts it includes.
  #[serde(default)]
  pub include: BTreeMap<String, PageInclude>,
}

/// Declared dependency closure for one page.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PageInclude {
  /// Stylesheets, in document order.
  #[serde(default)]
  pub css: Vec<ModuleAsset>,
  /// Scripts, in document order.
  #[serde(default)]
  pub js: Vec<ModuleAsset>,
}

/// A file name qualified by the module that owns it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ModuleAsset {
  /// File name, e.g. `main.css`.
  pub name: String,
  /// Owning module.
  pub module: String,
}

/// Where a reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
  /// `src` of a `<script>` opener.
  Script,
  /// Reference inside a `<style>` body.
  Style,
  /// Attribute of a resource-bearing tag.
  Tag,
  /// CSS `url(...)`.
  CssUrl,
  /// Legacy IE filter `src=...`.
  CssSrc,
}

/// A single reference pulled out of a document during one rewrite pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
  /// Where the reference was found.
  pub kind: ReferenceKind,
  /// Matched value including quotes.
  pub raw: String,
  /// Quote character wrapping the value.
  pub quote: Option<char>,
  /// Value without quotes.
  pub value: String,
  /// Module named by the value's leading segment, when it names one.
  pub owner_module: Option<String>,
}
