//! Glob-driven enumeration of build output and persistence of rewritten files.

use std::fs;
use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use thiserror::Error;

/// Failure while reading or writing files handed to or received from the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
  /// A glob could not be compiled.
  #[error("invalid file glob `{pattern}`: {source}")]
  Glob {
    /// Offending pattern.
    pattern: String,
    /// Underlying parser error.
    #[source]
    source: ignore::Error,
  },
  /// Directory traversal failed.
  #[error("failed to walk {}: {source}", .base.display())]
  Walk {
    /// Directory being walked.
    base: PathBuf,
    /// Underlying walker error.
    #[source]
    source: ignore::Error,
  },
  /// Reading or writing a file failed.
  #[error("I/O error at {}: {source}", .path.display())]
  Io {
    /// Path that caused the error.
    path: PathBuf,
    /// Source I/O error.
    #[source]
    source: std::io::Error,
  },
}

/// A file selected from a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
  /// Absolute (or base-joined) path on disk.
  pub path: PathBuf,
  /// Path relative to the base directory, `/`-separated.
  pub relative: String,
}

impl SourceFile {
  /// Read the file's bytes.
  pub fn read(&self) -> Result<Vec<u8>, PipelineError> {
    fs::read(&self.path).map_err(|source| PipelineError::Io {
      path: self.path.clone(),
      source,
    })
  }
}

/// Select files under `base` matching any of `globs` (gitignore syntax, anchored at `base`).
///
/// An empty glob list selects every file. Results are sorted by path and contain each file once.
/// A missing base directory selects nothing.
pub fn collect_sources(base: &Path, globs: &[String]) -> Result<Vec<SourceFile>, PipelineError> {
  if !base.is_dir() {
    return Ok(Vec::new());
  }

  let mut overrides = OverrideBuilder::new(base);
  for pattern in globs {
    overrides.add(pattern).map_err(|source| PipelineError::Glob {
      pattern: pattern.clone(),
      source,
    })?;
  }
  let overrides = overrides.build().map_err(|source| PipelineError::Glob {
    pattern: globs.join(", "),
    source,
  })?;

  let walker = WalkBuilder::new(base)
    .standard_filters(false)
    .overrides(overrides)
    .sort_by_file_name(|left, right| left.cmp(right))
    .build();

  let mut files = Vec::new();
  for entry in walker {
    let entry = entry.map_err(|source| PipelineError::Walk {
      base: base.to_path_buf(),
      source,
    })?;
    if !entry.file_type().is_some_and(|kind| kind.is_file()) {
      continue;
    }

    let path = entry.into_path();
    let Some(relative) = relative_slash_path(base, &path) else {
      continue;
    };
    files.push(SourceFile { path, relative });
  }

  Ok(files)
}

/// Write `contents` to `base/relative`, creating parent directories.
pub fn persist(base: &Path, relative: &str, contents: &[u8]) -> Result<PathBuf, PipelineError> {
  let path = base.join(relative);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|source| PipelineError::Io {
      path: parent.to_path_buf(),
      source,
    })?;
  }

  fs::write(&path, contents).map_err(|source| PipelineError::Io {
    path: path.clone(),
    source,
  })?;
  Ok(path)
}

fn relative_slash_path(base: &Path, path: &Path) -> Option<String> {
  let relative = path.strip_prefix(base).ok()?;
  let parts: Vec<String> = relative
    .components()
    .filter_map(|component| match component {
      Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
      _ => None,
    })
    .collect();

  (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn touch(base: &Path, relative: &str) {
    let path = base.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, relative).unwrap();
  }

  fn relatives(files: &[SourceFile]) -> Vec<&str> {
    files.iter().map(|file| file.relative.as_str()).collect()
  }

  #[test]
  fn selects_files_matching_globs_in_sorted_order() {
    let dir = tempdir().unwrap();
    for file in [
      "css/main.css",
      "css/main.a1b2c3.css",
      "css/other.css",
      "images/a.png",
      "images/sub/b.png",
      "js/app.js",
    ] {
      touch(dir.path(), file);
    }

    let globs = vec![
      "css/main.*".to_string(),
      "css/main.a1b2c3.css".to_string(),
      "images/*".to_string(),
    ];
    let files = collect_sources(dir.path(), &globs).unwrap();

    assert_eq!(relatives(&files), vec![
      "css/main.a1b2c3.css",
      "css/main.css",
      "images/a.png"
    ]);
    assert_eq!(files[1].read().unwrap(), b"css/main.css");
  }

  #[test]
  fn empty_glob_list_selects_everything() {
    let dir = tempdir().unwrap();
    touch(dir.path(), ".hidden/x.js");
    touch(dir.path(), "index.html");

    let files = collect_sources(dir.path(), &[]).unwrap();
    assert_eq!(relatives(&files), vec![".hidden/x.js", "index.html"]);
  }

  #[test]
  fn missing_base_selects_nothing() {
    let dir = tempdir().unwrap();
    let files = collect_sources(&dir.path().join("absent"), &["*".to_string()]).unwrap();
    assert!(files.is_empty());
  }

  #[test]
  fn persists_nested_files() {
    let dir = tempdir().unwrap();
    let path = persist(dir.path(), "publish/index.html", b"<p>").unwrap();
    assert_eq!(fs::read(path).unwrap(), b"<p>");
  }
}
