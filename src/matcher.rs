//! String matching for tag and role predicates.
//!
//! One value covers the whole family of match strategies, so filter
//! configuration can be stored and dispatched without trait objects.

use std::fmt;

use regex::Regex;

/// A string predicate. The default value never matches.
#[derive(Debug, Clone)]
pub enum StringMatcher {
    /// Never matches.
    AlwaysFalse,
    /// Always matches.
    AlwaysTrue,
    /// Matches strings equal to the stored string.
    Equal(String),
    /// Matches strings starting with the stored string.
    Prefix(String),
    /// Matches strings containing the stored string.
    Substring(String),
    /// Matches strings the regex finds a match in (search, not anchored).
    Regex(Regex),
    /// Matches strings equal to any of the stored strings.
    List(Vec<String>),
}

impl StringMatcher {
    pub fn matches(&self, test: &str) -> bool {
        match self {
            StringMatcher::AlwaysFalse => false,
            StringMatcher::AlwaysTrue => true,
            StringMatcher::Equal(s) => test == s,
            StringMatcher::Prefix(s) => test.starts_with(s.as_str()),
            StringMatcher::Substring(s) => test.contains(s.as_str()),
            StringMatcher::Regex(re) => re.is_match(test),
            StringMatcher::List(list) => list.iter().any(|s| s == test),
        }
    }
}

impl Default for StringMatcher {
    fn default() -> Self {
        StringMatcher::AlwaysFalse
    }
}

impl fmt::Display for StringMatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StringMatcher::AlwaysFalse => write!(f, "always_false"),
            StringMatcher::AlwaysTrue => write!(f, "always_true"),
            StringMatcher::Equal(s) => write!(f, "equal[{}]", s),
            StringMatcher::Prefix(s) => write!(f, "prefix[{}]", s),
            StringMatcher::Substring(s) => write!(f, "substring[{}]", s),
            StringMatcher::Regex(re) => write!(f, "regex[{}]", re.as_str()),
            StringMatcher::List(list) => {
                write!(f, "list[")?;
                for s in list {
                    write!(f, "[{}]", s)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for StringMatcher {
    fn from(always: bool) -> Self {
        if always {
            StringMatcher::AlwaysTrue
        } else {
            StringMatcher::AlwaysFalse
        }
    }
}

impl From<&str> for StringMatcher {
    fn from(s: &str) -> Self {
        StringMatcher::Equal(s.to_string())
    }
}

impl From<String> for StringMatcher {
    fn from(s: String) -> Self {
        StringMatcher::Equal(s)
    }
}

impl From<Vec<String>> for StringMatcher {
    fn from(list: Vec<String>) -> Self {
        StringMatcher::List(list)
    }
}

impl From<Regex> for StringMatcher {
    fn from(re: Regex) -> Self {
        StringMatcher::Regex(re)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_variants() {
        assert!(!StringMatcher::default().matches("foo"));
        assert!(StringMatcher::from(true).matches("foo"));
        assert!(StringMatcher::from("foo").matches("foo"));
        assert!(!StringMatcher::from("foo").matches("foobar"));
        assert!(StringMatcher::Prefix("multi".into()).matches("multipolygon"));
        assert!(!StringMatcher::Prefix("poly".into()).matches("multipolygon"));
        assert!(StringMatcher::Substring("poly".into()).matches("multipolygon"));

        let list: StringMatcher =
            vec!["multipolygon".to_string(), "boundary".to_string()].into();
        assert!(list.matches("boundary"));
        assert!(!list.matches("route"));

        let re = StringMatcher::from(Regex::new("^multi").unwrap());
        assert!(re.matches("multipolygon"));
        assert!(!re.matches("not multi"));
    }

    #[test]
    fn test_display() {
        assert_eq!(StringMatcher::from("x").to_string(), "equal[x]");
        assert_eq!(
            StringMatcher::List(vec!["a".into(), "b".into()]).to_string(),
            "list[[a][b]]"
        );
    }
}
