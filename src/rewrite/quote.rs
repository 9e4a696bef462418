/// A value split from the quote characters wrapping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quoted<'a> {
  /// Quote character found at both ends, if any.
  pub quote: Option<char>,
  /// Value without surrounding whitespace and quotes.
  pub inner: &'a str,
}

impl<'a> Quoted<'a> {
  /// Detect a matching `'` or `"` pair around the trimmed value.
  pub fn parse(raw: &'a str) -> Self {
    let trimmed = raw.trim();
    for quote in ['\'', '"'] {
      if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
        return Self {
          quote: Some(quote),
          inner: &trimmed[1..trimmed.len() - 1],
        };
      }
    }

    Self {
      quote: None,
      inner: trimmed,
    }
  }

  /// Whether the value opens a quote it never closes.
  pub fn is_unbalanced(&self) -> bool {
    self.quote.is_none() && self.inner.starts_with(['\'', '"'])
  }

  /// Wrap `value` in the original quote character.
  pub fn wrap(&self, value: &str) -> String {
    match self.quote {
      Some(quote) => format!("{quote}{value}{quote}"),
      None => value.to_string(),
    }
  }
}
