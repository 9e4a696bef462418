//! Rewrites resource references embedded in HTML and CSS so they point at a deploy target.
//!
//! Scanning is regex assisted and best effort: the inputs are machine generated, and markup
//! that cannot be delimited reliably is passed through untouched with a warning rather than
//! failing the file. Every rewritten value goes through the same steps:
//!
//! 1. quotes are detected and restored around the result,
//! 2. a value carrying a prefix this target produced is mapped back to `<module>/<path>`, and
//!    otherwise anything before an `images` path segment is dropped, so an already prefixed
//!    value is not prefixed twice,
//! 3. a leading `<module>/` segment selects the owning module,
//! 4. stylesheets and scripts are swapped for their content-hashed name,
//! 5. the owning module's prefix for the active target is prepended.

mod css;
mod filters;
mod html;
mod quote;

use std::path::Path;

pub use css::{CssSegment, scan_css};
pub use filters::{images_segment_start, should_skip_reference};
pub use html::{HtmlSegment, scan_html};
pub use quote::Quoted;

use crate::error::{ManifestMissing, Warning, WarningKind};
use crate::models::{ReferenceKind, ResourceReference};
use crate::registry::{HashMapRegistry, resolve_hashed_name};
use crate::target::PrefixResolver;

const SNIPPET_LIMIT: usize = 60;

/// How a file's contents are treated by the rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
  /// HTML-like markup (`.html`, `.htm`, `.shtml`).
  Html,
  /// Stylesheets (`.css`, `.scss`, `.sass`, `.less`).
  Css,
  /// Anything else, copied verbatim.
  Passthrough,
}

impl DocumentKind {
  /// Classify a file by its extension.
  pub fn from_path(path: &Path) -> Self {
    let extension = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(str::to_ascii_lowercase)
      .unwrap_or_default();

    match extension.as_str() {
      "html" | "htm" | "shtml" => DocumentKind::Html,
      "css" | "scss" | "sass" | "less" => DocumentKind::Css,
      _ => DocumentKind::Passthrough,
    }
  }
}

/// Result of rewriting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
  /// Rewritten document text.
  pub text: String,
  /// References that were left untouched because they could not be delimited.
  pub warnings: Vec<Warning>,
}

/// Rewrites documents of one module for one deploy target.
#[derive(Debug, Clone, Copy)]
pub struct Rewriter<'a> {
  module: &'a str,
  prefixes: &'a PrefixResolver,
  registry: &'a HashMapRegistry,
}

impl<'a> Rewriter<'a> {
  /// Create a rewriter for documents belonging to `module`.
  pub fn new(module: &'a str, prefixes: &'a PrefixResolver, registry: &'a HashMapRegistry) -> Self {
    Self {
      module,
      prefixes,
      registry,
    }
  }

  /// Module whose documents are being rewritten.
  pub fn module(&self) -> &'a str {
    self.module
  }

  /// Rewrite a document according to its kind; passthrough documents are returned unchanged.
  pub fn rewrite_document(&self, kind: DocumentKind, text: &str) -> Result<Rewritten, ManifestMissing> {
    match kind {
      DocumentKind::Html => self.rewrite_html(text),
      DocumentKind::Css => self.rewrite_css(text),
      DocumentKind::Passthrough => Ok(Rewritten {
        text: text.to_string(),
        warnings: Vec::new(),
      }),
    }
  }

  /// Rewrite resource tags, script sources and style blocks of an HTML document.
  pub fn rewrite_html(&self, text: &str) -> Result<Rewritten, ManifestMissing> {
    let mut warnings = Vec::new();
    let text = html::rewrite_html(self, text, &mut warnings)?;
    Ok(Rewritten { text, warnings })
  }

  /// Rewrite `url(...)` and filter `src=` references of a stylesheet.
  pub fn rewrite_css(&self, text: &str) -> Result<Rewritten, ManifestMissing> {
    let mut warnings = Vec::new();
    let text = css::rewrite_css(self, text, false, &mut warnings)?;
    Ok(Rewritten { text, warnings })
  }

  /// Describe a raw matched value, or `None` when the value is never rewritten.
  pub fn inspect(&self, kind: ReferenceKind, raw: &str) -> Option<ResourceReference> {
    let quoted = Quoted::parse(raw);
    let value = match self.strip_own_prefix(quoted.inner.trim()) {
      Some(value) => value,
      None => normalise_value(quoted.inner)?.to_string(),
    };
    let owner_module = self.split_owner(&value).0.map(str::to_string);

    Some(ResourceReference {
      kind,
      raw: raw.to_string(),
      quote: quoted.quote,
      value,
      owner_module,
    })
  }

  /// Final URL for an inspected reference, without quotes.
  pub fn resolve(&self, reference: &ResourceReference) -> Result<String, ManifestMissing> {
    let (_, relative) = self.split_owner(&reference.value);
    let owner = reference.owner_module.as_deref().unwrap_or(self.module);
    let (path, suffix) = split_suffix(relative);

    let owner_map = match &reference.owner_module {
      Some(module) => Some(self.registry.load(module)?),
      None => None,
    };

    let path = if is_hash_eligible(path) {
      let map = match owner_map {
        Some(map) => map,
        None => self.registry.load(owner)?,
      };
      resolve_hashed_name(path, &map).to_string()
    } else {
      path.to_string()
    };

    Ok(format!("{}{path}{suffix}", self.prefixes.prefix_for(owner)))
  }

  /// Rewrite a single matched value, keeping its quotes.
  pub(crate) fn rewrite_value(
    &self,
    kind: ReferenceKind,
    raw: &str,
    warnings: &mut Vec<Warning>,
  ) -> Result<String, ManifestMissing> {
    if Quoted::parse(raw).is_unbalanced() {
      warnings.push(self.ambiguity(raw, "value opens a quote it never closes"));
      return Ok(raw.to_string());
    }

    match self.inspect(kind, raw) {
      Some(reference) => {
        let resolved = self.resolve(&reference)?;
        Ok(Quoted::parse(raw).wrap(&resolved))
      }
      None => Ok(raw.to_string()),
    }
  }

  /// Rewrite the URL part of every `srcset` candidate, keeping width/density descriptors.
  pub(crate) fn rewrite_srcset(
    &self,
    raw: &str,
    warnings: &mut Vec<Warning>,
  ) -> Result<String, ManifestMissing> {
    let quoted = Quoted::parse(raw);
    if quoted.is_unbalanced() {
      warnings.push(self.ambiguity(raw, "srcset opens a quote it never closes"));
      return Ok(raw.to_string());
    }

    let mut candidates = Vec::new();
    for item in quoted.inner.split(',').map(str::trim).filter(|item| !item.is_empty()) {
      let (url, descriptor) = match item.find(char::is_whitespace) {
        Some(split) => item.split_at(split),
        None => (item, ""),
      };

      match self.inspect(ReferenceKind::Tag, url) {
        Some(reference) => candidates.push(format!("{}{descriptor}", self.resolve(&reference)?)),
        None => candidates.push(item.to_string()),
      }
    }

    Ok(quoted.wrap(&candidates.join(", ")))
  }

  pub(crate) fn ambiguity(&self, snippet: &str, reason: &str) -> Warning {
    let mut shown: String = snippet.chars().take(SNIPPET_LIMIT).collect();
    if snippet.chars().count() > SNIPPET_LIMIT {
      shown.push('…');
    }
    Warning::new(
      WarningKind::MatchAmbiguity,
      self.module,
      format!("{reason}: `{shown}`"),
    )
  }

  /// `<module>/<path>` for a value already carrying this target's prefix of a known module.
  fn strip_own_prefix(&self, value: &str) -> Option<String> {
    let (module, relative) = self.prefixes.strip_prefix(value)?;
    (module == self.module || self.registry.is_module(module)).then(|| format!("{module}/{relative}"))
  }

  /// Split `<module>/<path>` into the foreign owner (if any) and the module-relative path.
  fn split_owner<'v>(&self, value: &'v str) -> (Option<&'v str>, &'v str) {
    match value.split_once('/') {
      Some((head, rest)) if head == self.module && !rest.is_empty() => (None, rest),
      Some((head, rest)) if !rest.is_empty() && self.registry.is_module(head) => (Some(head), rest),
      _ => (None, value),
    }
  }
}

fn normalise_value(value: &str) -> Option<&str> {
  let value = value.trim();
  if should_skip_reference(value) {
    return None;
  }

  let value = match images_segment_start(value) {
    Some(start) => &value[start..],
    None => value,
  };
  let value = value.trim_start_matches("./").trim_start_matches('/');
  (!value.is_empty()).then_some(value)
}

fn split_suffix(path: &str) -> (&str, &str) {
  match path.find(['?', '#']) {
    Some(index) => path.split_at(index),
    None => (path, ""),
  }
}

fn is_hash_eligible(path: &str) -> bool {
  let lower = path.to_ascii_lowercase();
  lower.ends_with(".css") || lower.ends_with(".js")
}
