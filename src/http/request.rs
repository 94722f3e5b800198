//! Incoming request as seen by the router.
//!
//! Transports build a [`Request`] either from raw HTTP/1.1 bytes with
//! [`Request::parse`] or programmatically with [`Request::new`]. Besides the
//! method, path and headers, a request carries named *attributes*: the router
//! copies bound path parameters into them so that code holding only the
//! request can still read them.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// An HTTP request.
///
/// # Examples
///
/// ```
/// use switchyard::http::{Method, Request};
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost:8080\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.host(), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    scheme: String,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    params: HashMap<String, String>,
    attributes: HashMap<String, String>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Build a request without going through the wire format.
    ///
    /// A query string in `target` (`/search?q=x`) is split off and parsed.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        let params = query.as_deref().map(parse_query_string).unwrap_or_default();
        Self {
            method,
            path,
            version: 1,
            scheme: "http".to_owned(),
            headers: Headers::new(),
            query,
            body: Bytes::new(),
            params,
            attributes: HashMap::new(),
        }
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (immediately after the `\r\n\r\n` header terminator).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the headers.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?;
        let method = match method.parse::<Method>() {
            Ok(m) => m,
            Err(never) => match never {},
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut request = Self::new(method, raw_path);
        request.version = version;
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                request.headers.insert(header.name, value);
            }
        }
        request.body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((request, body_offset))
    }

    /// Append a header, builder style.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the URL scheme the transport received this request on (`http`, `https`).
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into().to_ascii_lowercase();
        self
    }

    /// Replace the body, builder style.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the lowercase URL scheme.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the `Host` header without any port suffix.
    pub fn host(&self) -> Option<&str> {
        let host = self.headers.get("host")?;
        // Bracketed IPv6 literals keep their colons.
        if host.starts_with('[') {
            return host.split_once(']').map(|(h, _)| &host[..h.len() + 1]);
        }
        Some(host.split(':').next().unwrap_or(host))
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns a named attribute, such as a bound path parameter.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Set a named attribute, replacing any previous value.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// `true` when some `Accept` media range is JSON (`application/json` or a
    /// `+json` suffix type) with a non-zero quality.
    pub fn accepts_json(&self) -> bool {
        self.headers.tokens("accept").any(|range| {
            let mut parts = range.split(';').map(str::trim);
            let media = parts.next().unwrap_or_default().to_ascii_lowercase();
            let rejected = parts.any(|p| {
                p.strip_prefix("q=")
                    .and_then(|q| q.parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            !rejected && (media == "application/json" || media.ends_with("+json"))
        })
    }

    /// Whether the connection stays open after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive unless a `close` token is present;
    /// HTTP/1.0 needs an explicit `keep-alive` token.
    pub fn is_keep_alive(&self) -> bool {
        if self.version == 1 {
            !self.headers.has_token("connection", "close")
        } else {
            self.headers.has_token("connection", "keep-alive")
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// Keys and values have `+` decoded as a space; percent-decoding is left to
/// the application.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.replace('+', " ");
            let value = parts.next().unwrap_or("").replace('+', " ");
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn parse_query_string() {
        let raw = b"GET /search?q=rust&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&page=2"));
        assert_eq!(req.query_param("q"), Some("rust"));
        assert_eq!(req.query_param("page"), Some("2"));
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn content_length_and_body() {
        let raw = b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&raw[body_offset..], b"hello");
        assert_eq!(req.body().as_ref(), b"hello");
    }

    #[test]
    fn host_strips_port() {
        let req = Request::new(Method::Get, "/").with_header("Host", "api.example.com:8443");
        assert_eq!(req.host(), Some("api.example.com"));

        let req = Request::new(Method::Get, "/").with_header("Host", "[::1]:8080");
        assert_eq!(req.host(), Some("[::1]"));

        assert_eq!(Request::new(Method::Get, "/").host(), None);
    }

    #[test]
    fn attributes_round_trip() {
        let mut req = Request::new(Method::Get, "/users/7");
        assert_eq!(req.attribute("id"), None);
        req.set_attribute("id", "7");
        assert_eq!(req.attribute("id"), Some("7"));
    }

    #[test]
    fn scheme_defaults_to_http() {
        let req = Request::new(Method::Get, "/");
        assert_eq!(req.scheme(), "http");
        assert_eq!(req.with_scheme("HTTPS").scheme(), "https");
    }

    #[test]
    fn accepts_json_detection() {
        let json = |accept: &str| Request::new(Method::Get, "/").with_header("Accept", accept).accepts_json();
        assert!(json("application/json"));
        assert!(json("text/html, application/problem+json;q=0.5"));
        assert!(!json("application/json;q=0"));
        assert!(!json("text/html"));
        assert!(!Request::new(Method::Get, "/").accepts_json());
    }

    #[test]
    fn keep_alive_follows_connection_tokens() {
        let raw = b"GET / HTTP/1.1\r\nConnection: Upgrade, close\r\n\r\n";
        assert!(!Request::parse(raw).unwrap().0.is_keep_alive());

        let raw = b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n";
        assert!(Request::parse(raw).unwrap().0.is_keep_alive());

        let raw = b"GET / HTTP/1.0\r\n\r\n";
        assert!(!Request::parse(raw).unwrap().0.is_keep_alive());
        assert!(Request::new(Method::Get, "/").is_keep_alive());
    }
}
