//! Query normalisation and classification.
//!
//! A raw query such as `from:user deploy failed` is rewritten to the
//! canonical sigil form, split into an optional role filter and free text,
//! and classified as keyword-like or phrase-like. The store decides how to
//! execute each class; this module only produces the plan inputs.

use std::sync::LazyLock;

use regex::Regex;

static FROM_SIGIL_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\bfrom:").expect("valid sigil regex"));

static ROLE_FILTER_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\brole:([A-Za-z_][A-Za-z0-9_]{0,31})\b").expect("valid role filter regex")
});

static ROLE_SIGIL_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\brole:\S*").expect("valid role sigil regex"));

/// FTS5 bareword operators. Their presence means the caller wrote FTS syntax.
const FTS_OPERATORS: [&str; 4] = ["AND", "OR", "NOT", "NEAR"];

/// How the router should execute a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
  /// Short single token: recent-window substring scan, topped up from FTS.
  Keyword,
  /// Anything else: FTS `MATCH` ordered by BM25.
  Phrase,
}

/// A query after sigil rewriting and role extraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedQuery {
  /// Free text with role sigils removed and whitespace collapsed.
  pub text: String,
  /// The first `role:<x>` filter, if any.
  pub role: Option<String>,
}

impl ParsedQuery {
  /// Rewrite `from:` to `role:`, take the first role filter and strip every
  /// role sigil from the text.
  pub fn parse(query: &str) -> Self {
    let canonical = FROM_SIGIL_RE.replace_all(query, "role:");
    let role = ROLE_FILTER_RE
      .captures(&canonical)
      .map(|c| c[1].to_owned());
    let stripped = ROLE_SIGIL_RE.replace_all(&canonical, " ");
    let text = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    Self { text, role }
  }

  /// Keyword-like iff at most `keyword_maxlen` characters and no whitespace.
  pub fn classify(&self, keyword_maxlen: usize) -> QueryKind {
    let short = self.text.chars().count() <= keyword_maxlen;
    if short && !self.text.chars().any(char::is_whitespace) {
      QueryKind::Keyword
    } else {
      QueryKind::Phrase
    }
  }

  /// `LIKE` pattern matching the text anywhere, with `\` as escape character.
  pub fn like_pattern(&self) -> String {
    let mut pattern = String::with_capacity(self.text.len() + 2);
    pattern.push('%');
    for c in self.text.chars() {
      if matches!(c, '%' | '_' | '\\') {
        pattern.push('\\');
      }
      pattern.push(c);
    }
    pattern.push('%');
    pattern
  }

  /// Expression for `MATCH`, or `None` when there is no text to match.
  ///
  /// Plain words are quoted individually and joined with spaces (implicit
  /// AND), so punctuation never reaches the FTS parser. Text that already uses
  /// FTS syntax is passed through untouched.
  pub fn fts_expression(&self) -> Option<String> {
    if self.text.is_empty() {
      return None;
    }
    if uses_fts_syntax(&self.text) {
      return Some(self.text.clone());
    }
    let quoted = self
      .text
      .split_whitespace()
      .map(|word| format!("\"{}\"", word.replace('"', "\"\"")))
      .collect::<Vec<_>>()
      .join(" ");
    Some(quoted)
  }
}

fn uses_fts_syntax(text: &str) -> bool {
  text.contains(['"', '*', '(', ')', '^'])
    || text.split_whitespace().any(|w| FTS_OPERATORS.contains(&w))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_sigil_becomes_role_filter() {
    let q = ParsedQuery::parse("from:user deploy failed");
    assert_eq!(q.role.as_deref(), Some("user"));
    assert_eq!(q.text, "deploy failed");
  }

  #[test]
  fn only_first_role_filter_is_used() {
    let q = ParsedQuery::parse("role:user  role:system  hello");
    assert_eq!(q.role.as_deref(), Some("user"));
    assert_eq!(q.text, "hello");
  }

  #[test]
  fn bare_role_query_has_empty_text() {
    let q = ParsedQuery::parse("role:user");
    assert_eq!(q.role.as_deref(), Some("user"));
    assert!(q.text.is_empty());
    assert_eq!(q.classify(24), QueryKind::Keyword);
    assert_eq!(q.fts_expression(), None);
  }

  #[test]
  fn keyword_threshold_is_inclusive() {
    let exact = ParsedQuery::parse(&"a".repeat(8));
    let over = ParsedQuery::parse(&"a".repeat(9));
    assert_eq!(exact.classify(8), QueryKind::Keyword);
    assert_eq!(over.classify(8), QueryKind::Phrase);
  }

  #[test]
  fn short_query_with_whitespace_is_phrase() {
    assert_eq!(ParsedQuery::parse("a b").classify(24), QueryKind::Phrase);
  }

  #[test]
  fn threshold_counts_characters_not_bytes() {
    let q = ParsedQuery::parse("éééé");
    assert_eq!(q.classify(4), QueryKind::Keyword);
  }

  #[test]
  fn like_pattern_escapes_wildcards() {
    let q = ParsedQuery::parse("50%_off");
    assert_eq!(q.like_pattern(), "%50\\%\\_off%");
  }

  #[test]
  fn plain_words_are_quoted_for_fts() {
    let q = ParsedQuery::parse("memory adapter-test");
    assert_eq!(q.fts_expression().as_deref(), Some("\"memory\" \"adapter-test\""));
  }

  #[test]
  fn fts_syntax_passes_through() {
    let q = ParsedQuery::parse("memory OR adapter");
    assert_eq!(q.fts_expression().as_deref(), Some("memory OR adapter"));
    let q = ParsedQuery::parse("\"unclosed phrase");
    assert_eq!(q.fts_expression().as_deref(), Some("\"unclosed phrase"));
  }
}
