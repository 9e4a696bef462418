//! Page discovery and the per-page dependency lookup used by page publishing.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

use crate::models::{ModuleAsset, PageInclude};

/// Page files (`*.html`) directly inside a module's output directory, sorted by name.
///
/// A missing output directory yields no pages.
pub fn list_pages(output_dir: &Path) -> io::Result<Vec<String>> {
  let entries = match fs::read_dir(output_dir) {
    Ok(entries) => entries,
    Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(err) => return Err(err),
  };

  let mut pages = Vec::new();
  for entry in entries {
    let entry = entry?;
    if !entry.file_type()?.is_file() {
      continue;
    }
    let name = entry.file_name().to_string_lossy().into_owned();
    if is_page(&name) {
      pages.push(name);
    }
  }

  pages.sort();
  Ok(pages)
}

/// Page file name without its `.html` extension, matched case-insensitively.
pub fn page_stem(page: &str) -> &str {
  match page.len().checked_sub(".html".len()) {
    Some(split) if page.is_char_boundary(split) && page[split..].eq_ignore_ascii_case(".html") => {
      &page[..split]
    }
    _ => page,
  }
}

fn is_page(name: &str) -> bool {
  Path::new(name)
    .extension()
    .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
}

/// Stylesheets and scripts a page includes, or `None` when the index has no entry for it.
pub fn dependencies_for<'a>(
  page: &str,
  index: &'a BTreeMap<String, PageInclude>,
) -> Option<&'a PageInclude> {
  let include = index.get(page);
  if include.is_none() {
    warn!(page, "page has no include entry; publishing images only");
  }
  include
}

impl PageInclude {
  /// Stylesheets owned by `module`.
  pub fn css_owned_by<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a ModuleAsset> + 'a {
    self.css.iter().filter(move |asset| asset.module == module)
  }

  /// Scripts owned by `module`.
  pub fn js_owned_by<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a ModuleAsset> + 'a {
    self.js.iter().filter(move |asset| asset.module == module)
  }
}

impl ModuleAsset {
  /// File name without directories and without the given extension.
  pub fn stem(&self, extension: &str) -> &str {
    let name = self.name.rsplit('/').next().unwrap_or(&self.name);
    name
      .strip_suffix(extension)
      .and_then(|stem| stem.strip_suffix('.'))
      .unwrap_or(name)
  }
}
