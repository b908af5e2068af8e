//! Entry-line matching: which lines of a chain text name a migration file.
//!
//! Two naming conventions are in use for migration files, so the rule is a
//! strategy rather than a fixed regex:
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `timestamped` | `20250309093454.sql`, `20250309093454_init.sql` |
//! | `any_sql` | any non-blank token ending in `.sql` |
//! | custom regex | first capture group, or the whole match |

use std::fmt;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ChainError;

const TIMESTAMPED_REGEX: &str = r"^(\d{14}(?:_\S*)?\.sql)(?:\s|$)";
const ANY_SQL_REGEX: &str = r"^(\S+\.sql)(?:\s|$)";

/// Built-in entry naming conventions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryPattern {
    /// Fixed-width 14-digit version prefix.
    #[default]
    Timestamped,
    /// Any `*.sql` token.
    AnySql,
}

impl EntryPattern {
    pub fn regex(&self) -> &'static str {
        match self {
            Self::Timestamped => TIMESTAMPED_REGEX,
            Self::AnySql => ANY_SQL_REGEX,
        }
    }
}

impl fmt::Display for EntryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamped => write!(f, "timestamped"),
            Self::AnySql => write!(f, "any_sql"),
        }
    }
}

/// Compiled entry-line matcher. Also serves as the chain entry lister.
#[derive(Debug, Clone)]
pub struct EntryMatcher {
    regex: Regex,
}

impl EntryMatcher {
    pub fn from_pattern(pattern: EntryPattern) -> Result<Self, ChainError> {
        Self::from_regex(pattern.regex())
    }

    pub fn from_regex(source: &str) -> Result<Self, ChainError> {
        let regex = Regex::new(source).map_err(|e| ChainError::InvalidPattern {
            pattern: source.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Self { regex })
    }

    /// A custom regex, when given, overrides the built-in pattern.
    pub fn from_config(pattern: EntryPattern, custom: Option<&str>) -> Result<Self, ChainError> {
        match custom {
            Some(source) => Self::from_regex(source),
            None => Self::from_pattern(pattern),
        }
    }

    /// The migration file name on `line`, ignoring leading indentation.
    pub fn match_line<'a>(&self, line: &'a str) -> Option<&'a str> {
        let line = line.trim_start();
        let caps = self.regex.captures(line)?;
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str())
            .filter(|name| !name.is_empty())
    }

    /// `true` if a bare file name follows the entry naming convention.
    pub fn is_entry_name(&self, name: &str) -> bool {
        self.match_line(name) == Some(name)
    }

    /// Ordered file names referenced by one side of a chain text.
    ///
    /// Non-entry lines (the `h1:` header, blank lines, anything else) are
    /// skipped. Duplicates are kept.
    pub fn list_entries(&self, text: &str) -> Vec<String> {
        let names: Vec<String> = text
            .lines()
            .filter_map(|line| self.match_line(line))
            .map(str::to_string)
            .collect();
        debug!(count = names.len(), "listed chain entries");
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIDE: &str = "h1:GplzCB5bzYwaRyf6zllMDN5xUpp139MxS/9lPRBbXwg=
20250309093454_init_1.sql h1:h6tXkQgcuEtcMlIT3Q2ei1WKXqaqb2PK7F87YFUcSR4=
  20250309093833_second.sql h1:gDi08EnaiS7cPo+IbS72CkQFg/2vanxGLMjfNN9XHEE=
\t20250309093929_test.sql   h1:zbRBfc5QvPTMZnEzN+JgIoClApvV+nB+xhZ3mU7jU90=";

    #[test]
    fn test_list_entries_timestamped() {
        let matcher = EntryMatcher::from_pattern(EntryPattern::Timestamped).unwrap();
        assert_eq!(
            matcher.list_entries(SIDE),
            vec![
                "20250309093454_init_1.sql",
                "20250309093833_second.sql",
                "20250309093929_test.sql",
            ]
        );
    }

    #[test]
    fn test_timestamped_skips_short_versions() {
        let matcher = EntryMatcher::from_pattern(EntryPattern::Timestamped).unwrap();
        let text = "h1:abc=\n2025030900000.sql h1:x=\n20250309093454.sql h1:y=";
        assert_eq!(matcher.list_entries(text), vec!["20250309093454.sql"]);
    }

    #[test]
    fn test_any_sql_matches_free_names() {
        let matcher = EntryMatcher::from_pattern(EntryPattern::AnySql).unwrap();
        let text = "h1:hash\nfile1.sql h1:hash\n  file2.sql h1:hash\nnotes.txt h1:hash";
        assert_eq!(matcher.list_entries(text), vec!["file1.sql", "file2.sql"]);
    }

    #[test]
    fn test_any_sql_requires_extension_boundary() {
        let matcher = EntryMatcher::from_pattern(EntryPattern::AnySql).unwrap();
        assert_eq!(matcher.match_line("file.sqlx h1:abc"), None);
        assert_eq!(matcher.match_line("file.sql"), Some("file.sql"));
    }

    #[test]
    fn test_duplicates_preserved() {
        let matcher = EntryMatcher::from_pattern(EntryPattern::AnySql).unwrap();
        let text = "a.sql h1:x\na.sql h1:x";
        assert_eq!(matcher.list_entries(text), vec!["a.sql", "a.sql"]);
    }

    #[test]
    fn test_custom_regex() {
        let matcher = EntryMatcher::from_config(EntryPattern::Timestamped, Some(r"^V\d+__\w+\.sql")).unwrap();
        assert_eq!(matcher.match_line("V2__add_users.sql h1:x"), Some("V2__add_users.sql"));
        assert!(matcher.is_entry_name("V3__drop.sql"));
        assert!(!matcher.is_entry_name("20250309093454.sql"));
    }

    #[test]
    fn test_invalid_custom_regex() {
        let err = EntryMatcher::from_regex("(unclosed").unwrap_err();
        assert!(matches!(err, ChainError::InvalidPattern { .. }));
    }

    #[test]
    fn test_is_entry_name() {
        let matcher = EntryMatcher::from_pattern(EntryPattern::Timestamped).unwrap();
        assert!(matcher.is_entry_name("20250309093454_init.sql"));
        assert!(!matcher.is_entry_name("atlas.sum"));
    }
}
