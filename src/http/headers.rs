//! Header map shared by [`Request`](super::Request) and [`Response`](super::Response).
//!
//! Names compare case-insensitively and entries keep arrival order. List-valued
//! headers (`Accept`, `Connection`, `Allow`) can be read back as tokens with
//! [`Headers::tokens`].

use std::fmt;

/// Ordered, multi-value header map.
///
/// # Examples
///
/// ```
/// use switchyard::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Accept", "text/html;q=0.9, application/json");
/// headers.set_list("Allow", ["GET", "HEAD"]);
///
/// let accept: Vec<_> = headers.tokens("accept").collect();
/// assert_eq!(accept, vec!["text/html;q=0.9", "application/json"]);
/// assert_eq!(headers.get("ALLOW"), Some("GET, HEAD"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; earlier values under the same name are kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every entry under `name` with one value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Replace `name` with a comma-joined list, as used for `Allow`.
    pub fn set_list<I, S>(&mut self, name: impl Into<String>, items: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = items
            .into_iter()
            .map(|item| item.as_ref().to_owned())
            .collect::<Vec<_>>()
            .join(", ");
        self.set(name, joined);
    }

    /// First value under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values(name).next()
    }

    /// Every value under `name`, in arrival order.
    pub fn values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Comma-separated tokens across every value under `name`, trimmed, with
    /// empty tokens skipped.
    pub fn tokens<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.values(name)
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// `true` if some token under `name` equals `token`, ignoring case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name).any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Drop every entry under `name`; `true` if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of entries, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Wire form: one `Name: value\r\n` line per entry.
impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.entries
            .iter()
            .try_for_each(|(name, value)| write!(f, "{name}: {value}\r\n"))
    }
}
