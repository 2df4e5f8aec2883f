//! Lazily compiled regular expressions shared across modules.

use std::sync::OnceLock;

use regex::Regex;

/// Compile `pattern` once into `cell`. An invalid pattern yields `None`
/// and callers treat it as "no match".
pub(crate) fn cached_regex(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::error!(pattern, error = %err, "invalid built-in pattern");
            None
        }
    })
    .as_ref()
}

/// Declare a function returning a lazily compiled static regex.
macro_rules! static_regex {
    ($vis:vis fn $name:ident() = $pattern:expr;) => {
        $vis fn $name() -> Option<&'static regex::Regex> {
            static CELL: std::sync::OnceLock<Option<regex::Regex>> = std::sync::OnceLock::new();
            $crate::pattern::cached_regex(&CELL, $pattern)
        }
    };
}

pub(crate) use static_regex;

#[cfg(test)]
mod tests {
    static_regex! {
        fn digits() = r"^\d+$";
    }

    static_regex! {
        fn broken() = r"(unclosed";
    }

    #[test]
    fn test_static_regex_compiles_once() {
        let first = digits().unwrap();
        let second = digits().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(first.is_match("123"));
    }

    #[test]
    fn test_invalid_pattern_is_none() {
        assert!(broken().is_none());
    }
}
