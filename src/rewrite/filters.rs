use std::sync::OnceLock;

use regex::Regex;

fn skipped_reference_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            vec![
                Regex::new(r"(?i)^data:").expect("invalid data URI regex"),
                Regex::new(r"(?i)^mailto:").expect("invalid mailto regex"),
                Regex::new(r"(?i)^javascript:").expect("invalid javascript regex"),
                Regex::new(r"(?i)^about:").expect("invalid about regex"),
                Regex::new(r"^#").expect("invalid fragment regex"),
            ]
        })
        .as_slice()
}

fn absolute_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(?:[a-z][a-z0-9+.\-]*:)?//").expect("invalid absolute URL regex")
    })
}

/// Determine whether a reference must be left exactly as written.
///
/// Inline data, non-resource schemes and fragments are never prefixed. Absolute URLs are kept
/// unless they point into an `images` directory, in which case they are assumed to be an
/// earlier rewrite of one of our own assets.
pub fn should_skip_reference(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }

    if skipped_reference_patterns()
        .iter()
        .any(|pattern| pattern.is_match(value))
    {
        return true;
    }

    absolute_url_pattern().is_match(value) && images_segment_start(value).is_none()
}

/// Byte offset of the first `images` path segment, if the value has one.
pub fn images_segment_start(value: &str) -> Option<usize> {
    const SEGMENT: &str = "images";
    let bytes = value.as_bytes();

    value.match_indices(SEGMENT).map(|(index, _)| index).find(|&index| {
        let starts_segment = index == 0 || bytes[index - 1] == b'/';
        let ends_segment = matches!(bytes.get(index + SEGMENT.len()), None | Some(b'/'));
        starts_segment && ends_segment
    })
}
