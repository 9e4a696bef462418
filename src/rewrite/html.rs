use std::sync::OnceLock;

use regex::Regex;

use super::{Rewriter, css};
use crate::error::{ManifestMissing, Warning};
use crate::models::ReferenceKind;

/// One piece of an HTML document as seen by the rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlSegment<'t> {
  /// Text that is copied verbatim.
  Literal(&'t str),
  /// A complete `<!-- ... -->` comment.
  Comment(&'t str),
  /// `<!--inline[path]-->` marker; left in place for the bundler that expands it.
  InlineMarker {
    /// Whole marker text.
    raw: &'t str,
    /// Path between the brackets.
    name: &'t str,
  },
  /// A `<script ...>` opening tag. The script body follows as a literal.
  ScriptOpen(&'t str),
  /// Contents of a `<style>` block, excluding the tags.
  StyleBody(&'t str),
  /// A media tag (`img`, `embed`, `audio`, `video`, `object`, `source`) with attributes.
  ResourceTag {
    /// Whole tag text, `<` through `>`.
    raw: &'t str,
    /// Tag name as written.
    tag: &'t str,
  },
  /// A media tag whose closing `>` never appears.
  Unterminated(&'t str),
}

fn opener_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| {
    Regex::new(r"(?i)<(?:(script|style)(?:\s[^>]*)?>|(img|embed|audio|video|object|source)\s|!--)")
      .expect("invalid html opener regex")
  })
}

fn script_close_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| Regex::new(r"(?i)</script\s*>").expect("invalid script close regex"))
}

fn style_close_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| Regex::new(r"(?i)</style\s*>").expect("invalid style close regex"))
}

fn inline_marker_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| {
    Regex::new(r"^<!--inline\[([^\]]+)\]-->").expect("invalid inline marker regex")
  })
}

/// Attribute matchers: the full `name=value` pattern and the bare `name=` pattern used to spot
/// attributes whose value could not be matched.
struct AttributeRule {
  value: Regex,
  name: Regex,
}

impl AttributeRule {
  fn new(name: &str) -> Self {
    let value = format!(r#"(?i)(\s{name}\s*=\s*)('[^']*'|"[^"]*"|[^\s>]+)"#);
    let bare = format!(r"(?i)\s{name}\s*=");
    Self {
      value: Regex::new(&value).expect("invalid attribute value regex"),
      name: Regex::new(&bare).expect("invalid attribute name regex"),
    }
  }
}

fn script_src_rule() -> &'static AttributeRule {
  static RULE: OnceLock<AttributeRule> = OnceLock::new();
  RULE.get_or_init(|| AttributeRule::new("src"))
}

fn media_src_rule() -> &'static AttributeRule {
  static RULE: OnceLock<AttributeRule> = OnceLock::new();
  RULE.get_or_init(|| AttributeRule::new("(?:data-)?src(?:set)?"))
}

fn object_data_rule() -> &'static AttributeRule {
  static RULE: OnceLock<AttributeRule> = OnceLock::new();
  RULE.get_or_init(|| AttributeRule::new("data"))
}

/// Split an HTML document into segments.
///
/// Script and style bodies are never searched for media tags or comments. A `<!--[if ...]>`
/// conditional comment is not treated as a comment so the tags inside it are still rewritten.
pub fn scan_html(text: &str) -> Vec<HtmlSegment<'_>> {
  let mut segments = Vec::new();
  let mut cursor = 0;
  let mut search = 0;

  while let Some(captures) = opener_pattern().captures_at(text, search) {
    let Some(whole) = captures.get(0) else {
      break;
    };
    let start = whole.start();

    if let Some(block) = captures.get(1) {
      let is_script = block.as_str().eq_ignore_ascii_case("script");
      let closer = if is_script {
        script_close_pattern()
      } else {
        style_close_pattern()
      };
      let body_end = closer
        .find_at(text, whole.end())
        .map_or(text.len(), |close| close.start());

      flush(&mut segments, text, cursor, start);
      if is_script {
        segments.push(HtmlSegment::ScriptOpen(whole.as_str()));
        flush(&mut segments, text, whole.end(), body_end);
      } else {
        segments.push(HtmlSegment::Literal(whole.as_str()));
        segments.push(HtmlSegment::StyleBody(&text[whole.end()..body_end]));
      }
      cursor = body_end;
      search = body_end;
      continue;
    }

    if let Some(tag) = captures.get(2) {
      let Some(offset) = text[whole.end()..].find('>') else {
        flush(&mut segments, text, cursor, start);
        segments.push(HtmlSegment::Unterminated(&text[start..]));
        cursor = text.len();
        break;
      };

      let end = whole.end() + offset + 1;
      if has_attributes(&text[tag.end()..end - 1]) {
        flush(&mut segments, text, cursor, start);
        segments.push(HtmlSegment::ResourceTag {
          raw: &text[start..end],
          tag: tag.as_str(),
        });
        cursor = end;
      }
      search = end;
      continue;
    }

    // comment opener
    if text[whole.end()..].starts_with('[') {
      search = whole.end();
      continue;
    }

    flush(&mut segments, text, cursor, start);
    if let Some(marker) = inline_marker_pattern().captures(&text[start..])
      && let (Some(raw), Some(name)) = (marker.get(0), marker.get(1))
    {
      segments.push(HtmlSegment::InlineMarker {
        raw: raw.as_str(),
        name: name.as_str(),
      });
      cursor = start + raw.end();
    } else {
      let end = text[whole.end()..]
        .find("-->")
        .map_or(text.len(), |offset| whole.end() + offset + 3);
      segments.push(HtmlSegment::Comment(&text[start..end]));
      cursor = end;
    }
    search = cursor;
  }

  flush(&mut segments, text, cursor, text.len());
  segments
}

fn flush<'t>(segments: &mut Vec<HtmlSegment<'t>>, text: &'t str, from: usize, to: usize) {
  if to > from {
    segments.push(HtmlSegment::Literal(&text[from..to]));
  }
}

fn has_attributes(attributes: &str) -> bool {
  let trimmed = attributes.trim().trim_end_matches('/').trim_end();
  trimmed
    .chars()
    .last()
    .is_some_and(|last| last.is_alphanumeric() || matches!(last, '"' | '\'' | '-' | '_' | '='))
}

pub(super) fn rewrite_html(
  rewriter: &Rewriter<'_>,
  text: &str,
  warnings: &mut Vec<Warning>,
) -> Result<String, ManifestMissing> {
  let mut output = String::with_capacity(text.len());

  for segment in scan_html(text) {
    match segment {
      HtmlSegment::Literal(raw) | HtmlSegment::Comment(raw) => output.push_str(raw),
      HtmlSegment::InlineMarker { raw, .. } => output.push_str(raw),
      HtmlSegment::ScriptOpen(raw) => output.push_str(&rewrite_attributes(
        rewriter,
        raw,
        script_src_rule(),
        ReferenceKind::Script,
        warnings,
      )?),
      HtmlSegment::StyleBody(body) => {
        output.push_str(&css::rewrite_css(rewriter, body, true, warnings)?)
      }
      HtmlSegment::ResourceTag { raw, tag } => {
        let rule = if tag.eq_ignore_ascii_case("object") {
          object_data_rule()
        } else {
          media_src_rule()
        };
        output.push_str(&rewrite_attributes(
          rewriter,
          raw,
          rule,
          ReferenceKind::Tag,
          warnings,
        )?);
      }
      HtmlSegment::Unterminated(raw) => {
        warnings.push(rewriter.ambiguity(raw, "tag is never closed"));
        output.push_str(raw);
      }
    }
  }

  Ok(output)
}

fn rewrite_attributes(
  rewriter: &Rewriter<'_>,
  tag: &str,
  rule: &AttributeRule,
  kind: ReferenceKind,
  warnings: &mut Vec<Warning>,
) -> Result<String, ManifestMissing> {
  let mut output = String::with_capacity(tag.len());
  let mut last = 0;
  let mut matched = 0;

  for captures in rule.value.captures_iter(tag) {
    let (Some(name), Some(value)) = (captures.get(1), captures.get(2)) else {
      continue;
    };
    matched += 1;

    // `src=a.png/>`: the slash belongs to the tag, not the value.
    let mut value_end = value.end();
    let unquoted = !value.as_str().starts_with(['"', '\'']);
    if unquoted && value.len() > 1 && value.as_str().ends_with('/') && tag[value_end..].starts_with('>') {
      value_end -= 1;
    }
    let raw_value = &tag[value.start()..value_end];

    let rewritten = if name.as_str().to_ascii_lowercase().contains("srcset") {
      rewriter.rewrite_srcset(raw_value, warnings)?
    } else {
      rewriter.rewrite_value(kind, raw_value, warnings)?
    };

    output.push_str(&tag[last..value.start()]);
    output.push_str(&rewritten);
    last = value_end;
  }
  output.push_str(&tag[last..]);

  if rule.name.find_iter(tag).count() > matched {
    warnings.push(rewriter.ambiguity(tag, "attribute has no value"));
  }

  Ok(output)
}
