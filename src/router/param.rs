//! Placeholder grammar for a single path segment.
//!
//! | Segment              | Effective regex | Optional |
//! |----------------------|-----------------|----------|
//! | `{(REGEX):name}`     | `REGEX`         | no       |
//! | `{(REGEX):name?}`    | `REGEX`         | yes      |
//! | `{num:name}`         | `[0-9]+`        | no       |
//! | `{any:name}`         | `[^/]+`         | no       |
//! | `{name}`             | `[^/]+`         | no       |
//!
//! Every form accepts the trailing `?`. Anything else is a literal segment.
//! The segment is scanned once, left to right; the forms never compete with
//! each other.

use regex::Regex;

use crate::error::RouteDefinitionError;

/// Regex used by `{num:…}` placeholders.
pub const NUM_PATTERN: &str = "[0-9]+";
/// Regex used by `{any:…}` and bare `{…}` placeholders.
pub const ANY_PATTERN: &str = "[^/]+";

/// One placeholder parsed out of a route path.
///
/// The bound value of a parameter is never stored here; it lives in the
/// per-request [`Parameters`](crate::context::Parameters).
#[derive(Debug, Clone)]
pub struct RouteParam {
    name: String,
    regex: String,
    optional: bool,
    // `^(?:regex)$`, used to validate values when generating URLs.
    requirement: Regex,
}

impl RouteParam {
    /// Parse one path segment.
    ///
    /// Returns `Ok(None)` when the segment is a literal.
    ///
    /// # Errors
    ///
    /// - [`RouteDefinitionError::MalformedPattern`]: a `{(` custom regex whose
    ///   parentheses never balance, or that is not followed by `:name`.
    /// - [`RouteDefinitionError::InvalidRequirement`]: the custom regex does not compile.
    ///
    /// # Examples
    ///
    /// ```
    /// use switchyard::router::RouteParam;
    ///
    /// let param = RouteParam::parse("{num:id?}").unwrap().unwrap();
    /// assert_eq!(param.name(), "id");
    /// assert_eq!(param.regex(), "[0-9]+");
    /// assert!(param.is_optional());
    ///
    /// assert!(RouteParam::parse("users").unwrap().is_none());
    /// ```
    pub fn parse(segment: &str) -> Result<Option<Self>, RouteDefinitionError> {
        let Some(inner) = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
        else {
            return Ok(None);
        };

        if inner.starts_with('(') {
            return Self::parse_custom(segment, inner).map(Some);
        }

        let (body, optional) = split_optional(inner);
        let (name, regex) = match body.split_once(':') {
            Some(("num", name)) => (name, NUM_PATTERN),
            Some(("any", name)) => (name, ANY_PATTERN),
            Some(_) => return Ok(None),
            None => (body, ANY_PATTERN),
        };

        if !is_valid_name(name) {
            return Ok(None);
        }
        Self::new(name, regex, optional).map(Some)
    }

    // `inner` is the segment without its braces and starts with `(`.
    fn parse_custom(segment: &str, inner: &str) -> Result<Self, RouteDefinitionError> {
        let malformed = |reason| RouteDefinitionError::MalformedPattern {
            segment: segment.to_owned(),
            reason,
        };

        let close = closing_paren(inner).ok_or_else(|| malformed("unbalanced parentheses"))?;
        let regex = &inner[1..close];
        if regex.is_empty() {
            return Err(malformed("empty regex"));
        }

        let rest = inner[close + 1..]
            .strip_prefix(':')
            .ok_or_else(|| malformed("expected `:name` after the regex"))?;
        let (name, optional) = split_optional(rest);
        if !is_valid_name(name) {
            return Err(malformed("invalid parameter name"));
        }

        Self::new(name, regex, optional)
    }

    fn new(name: &str, regex: &str, optional: bool) -> Result<Self, RouteDefinitionError> {
        let requirement = Regex::new(&format!("^(?:{regex})$")).map_err(|e| {
            RouteDefinitionError::InvalidRequirement {
                name: name.to_owned(),
                message: e.to_string(),
            }
        })?;
        Ok(Self {
            name: name.to_owned(),
            regex: regex.to_owned(),
            optional,
            requirement,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The effective matching pattern, unanchored.
    pub fn regex(&self) -> &str {
        &self.regex
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// `true` if `value` satisfies this parameter's requirement in full.
    pub fn accepts(&self, value: &str) -> bool {
        self.requirement.is_match(value)
    }
}

impl PartialEq for RouteParam {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.regex == other.regex && self.optional == other.optional
    }
}

impl Eq for RouteParam {}

fn split_optional(s: &str) -> (&str, bool) {
    match s.strip_suffix('?') {
        Some(stripped) => (stripped, true),
        None => (s, false),
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

// Byte index of the `)` closing the group opened at index 0, honouring
// backslash escapes and `[...]` classes.
fn closing_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut escaped = false;
    let mut in_class = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(segment: &str) -> RouteParam {
        RouteParam::parse(segment)
            .expect("segment should parse")
            .expect("segment should be a placeholder")
    }

    // ── literals ──────────────────────────────────────────────────────────────

    #[test]
    fn plain_segment_is_literal() {
        assert!(RouteParam::parse("users").unwrap().is_none());
        assert!(RouteParam::parse("").unwrap().is_none());
    }

    #[test]
    fn partial_braces_are_literal() {
        assert!(RouteParam::parse("{id").unwrap().is_none());
        assert!(RouteParam::parse("id}").unwrap().is_none());
        assert!(RouteParam::parse("file-{id}").unwrap().is_none());
    }

    #[test]
    fn unknown_type_prefix_is_literal() {
        assert!(RouteParam::parse("{int:id}").unwrap().is_none());
    }

    #[test]
    fn invalid_names_are_literal() {
        assert!(RouteParam::parse("{}").unwrap().is_none());
        assert!(RouteParam::parse("{?}").unwrap().is_none());
        assert!(RouteParam::parse("{1st}").unwrap().is_none());
        assert!(RouteParam::parse("{num:}").unwrap().is_none());
    }

    // ── typed forms ───────────────────────────────────────────────────────────

    #[test]
    fn bare_placeholder() {
        let p = param("{name}");
        assert_eq!(p.name(), "name");
        assert_eq!(p.regex(), ANY_PATTERN);
        assert!(!p.is_optional());
    }

    #[test]
    fn bare_optional_placeholder() {
        let p = param("{name?}");
        assert_eq!(p.name(), "name");
        assert!(p.is_optional());
    }

    #[test]
    fn num_placeholder() {
        let p = param("{num:id}");
        assert_eq!(p.name(), "id");
        assert_eq!(p.regex(), NUM_PATTERN);
        assert!(p.accepts("42"));
        assert!(!p.accepts("4a"));
    }

    #[test]
    fn any_placeholder_optional() {
        let p = param("{any:slug?}");
        assert_eq!(p.name(), "slug");
        assert_eq!(p.regex(), ANY_PATTERN);
        assert!(p.is_optional());
        assert!(!p.accepts("a/b"));
    }

    // ── custom regex ──────────────────────────────────────────────────────────

    #[test]
    fn custom_regex() {
        let p = param("{([a-z]{2}):lang}");
        assert_eq!(p.name(), "lang");
        assert_eq!(p.regex(), "[a-z]{2}");
        assert!(p.accepts("en"));
        assert!(!p.accepts("eng"));
    }

    #[test]
    fn custom_regex_optional() {
        let p = param("{(\\d+):page?}");
        assert_eq!(p.regex(), "\\d+");
        assert!(p.is_optional());
    }

    #[test]
    fn custom_regex_with_nested_groups_and_colons() {
        let p = param("{((?:v|ver)[0-9]+):version}");
        assert_eq!(p.regex(), "(?:v|ver)[0-9]+");
        assert!(p.accepts("ver2"));
    }

    #[test]
    fn custom_regex_with_paren_in_class_and_escape() {
        let p = param("{([)(]+|\\)):odd}");
        assert_eq!(p.regex(), "[)(]+|\\)");
        assert!(p.accepts(")"));
    }

    #[test]
    fn custom_regex_takes_priority_over_type_prefix() {
        // `num:` inside the group is part of the regex, not a type prefix.
        let p = param("{(num:[0-9]+):id}");
        assert_eq!(p.regex(), "num:[0-9]+");
        assert!(p.accepts("num:7"));
    }

    #[test]
    fn unbalanced_regex_is_error() {
        let err = RouteParam::parse("{([a-z]+:name}").unwrap_err();
        assert!(matches!(err, RouteDefinitionError::MalformedPattern { .. }));
    }

    #[test]
    fn missing_colon_after_regex_is_error() {
        let err = RouteParam::parse("{([a-z]+)name}").unwrap_err();
        assert!(matches!(err, RouteDefinitionError::MalformedPattern { .. }));
    }

    #[test]
    fn uncompilable_regex_is_error() {
        let err = RouteParam::parse("{(a{2,1}):name}").unwrap_err();
        assert!(matches!(err, RouteDefinitionError::InvalidRequirement { .. }));
    }
}
