use std::sync::OnceLock;

use regex::Regex;

use super::Rewriter;
use crate::error::{ManifestMissing, Warning};
use crate::models::ReferenceKind;

/// One piece of a stylesheet as seen by the rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssSegment<'t> {
  /// Text between references.
  Literal(&'t str),
  /// `/* ... */`, copied verbatim. An unterminated comment runs to the end of the input.
  Comment(&'t str),
  /// `@import url(...)`; imports are resolved by the build, never rewritten here.
  Import(&'t str),
  /// `url(value)` followed by optional whitespace and `;`.
  Url {
    /// Whole matched text.
    raw: &'t str,
    /// Value between the parentheses, quotes included.
    value: &'t str,
    /// Whitespace and semicolon after the closing parenthesis.
    trailer: &'t str,
  },
  /// Legacy filter `src=value`.
  FilterSrc {
    /// Whole matched text.
    raw: &'t str,
    /// Value after `=`, quotes included.
    value: &'t str,
  },
}

fn css_reference_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| {
    Regex::new(concat!(
      r#"(/\*[\s\S]*?(?:\*/|$))"#,
      r#"|(?:@import\s+)?\burl\s*\(\s*("(?:[^\\"\r\n\f]|\\[\s\S])*"|'(?:[^\\'\n\r\f]|\\[\s\S])*'|[^)}\s]+)\s*\)(\s*;?)"#,
      r#"|\bsrc\s*=\s*("(?:[^\\"\r\n\f]|\\[\s\S])*"|'(?:[^\\'\n\r\f]|\\[\s\S])*'|[^\s}]+)"#,
    ))
    .expect("invalid css reference regex")
  })
}

/// Split a stylesheet into literal text, comments and references.
pub fn scan_css(text: &str) -> Vec<CssSegment<'_>> {
  let mut segments = Vec::new();
  let mut cursor = 0;

  for captures in css_reference_pattern().captures_iter(text) {
    let Some(whole) = captures.get(0) else {
      continue;
    };
    if whole.start() > cursor {
      segments.push(CssSegment::Literal(&text[cursor..whole.start()]));
    }

    let segment = if captures.get(1).is_some() {
      CssSegment::Comment(whole.as_str())
    } else if let Some(value) = captures.get(2) {
      if whole.as_str().starts_with('@') {
        CssSegment::Import(whole.as_str())
      } else {
        CssSegment::Url {
          raw: whole.as_str(),
          value: value.as_str(),
          trailer: captures.get(3).map_or("", |m| m.as_str()),
        }
      }
    } else if let Some(value) = captures.get(4) {
      CssSegment::FilterSrc {
        raw: whole.as_str(),
        value: value.as_str(),
      }
    } else {
      CssSegment::Literal(whole.as_str())
    };

    segments.push(segment);
    cursor = whole.end();
  }

  if cursor < text.len() {
    segments.push(CssSegment::Literal(&text[cursor..]));
  }
  segments
}

/// Rewrite a stylesheet; `embedded` marks the body of an HTML `<style>` block.
pub(super) fn rewrite_css(
  rewriter: &Rewriter<'_>,
  text: &str,
  embedded: bool,
  warnings: &mut Vec<Warning>,
) -> Result<String, ManifestMissing> {
  let (url_kind, src_kind) = if embedded {
    (ReferenceKind::Style, ReferenceKind::Style)
  } else {
    (ReferenceKind::CssUrl, ReferenceKind::CssSrc)
  };

  let mut output = String::with_capacity(text.len());
  for segment in scan_css(text) {
    match segment {
      CssSegment::Literal(raw) | CssSegment::Comment(raw) | CssSegment::Import(raw) => {
        output.push_str(raw)
      }
      CssSegment::Url {
        raw,
        value,
        trailer,
      } => {
        let rewritten = rewriter.rewrite_value(url_kind, value, warnings)?;
        if rewritten == value {
          output.push_str(raw);
        } else {
          output.push_str("url(");
          output.push_str(&rewritten);
          output.push(')');
          output.push_str(trailer);
        }
      }
      CssSegment::FilterSrc { raw, value } => {
        let rewritten = rewriter.rewrite_value(src_kind, value, warnings)?;
        if rewritten == value {
          output.push_str(raw);
        } else {
          output.push_str("src=");
          output.push_str(&rewritten);
        }
      }
    }
  }

  Ok(output)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn separates_comments_imports_and_urls() {
    let css = "/* url(a.png) */@import url('base.css');\n.a{background:url( \"images/a.png\" ) ;}";
    let segments = scan_css(css);

    assert_eq!(segments[0], CssSegment::Comment("/* url(a.png) */"));
    assert_eq!(segments[1], CssSegment::Import("@import url('base.css');"));
    assert_eq!(segments[2], CssSegment::Literal("\n.a{background:"));
    assert_eq!(segments[3], CssSegment::Url {
      raw: "url( \"images/a.png\" ) ;",
      value: "\"images/a.png\"",
      trailer: " ;",
    });
    assert_eq!(segments[4], CssSegment::Literal("}"));
  }

  #[test]
  fn finds_filter_src_values() {
    let css = ".b{filter:progid:DXImageTransform.Microsoft.AlphaImageLoader(src='images/b.png');}";
    let values: Vec<&str> = scan_css(css)
      .into_iter()
      .filter_map(|segment| match segment {
        CssSegment::FilterSrc { value, .. } => Some(value),
        _ => None,
      })
      .collect();

    assert_eq!(values, vec!["'images/b.png'"]);
  }

  #[test]
  fn unterminated_comment_swallows_the_rest() {
    let segments = scan_css("a{} /* url(x.png)");
    assert_eq!(segments.last(), Some(&CssSegment::Comment("/* url(x.png)")));
  }
}
