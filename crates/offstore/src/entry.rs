//! Request identity and captured responses

use std::fmt;

/// Identity of a stored request: upper-cased method plus absolute URL.
///
/// The URL fragment never takes part in matching, so it is stripped on
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Build a key from a method and an absolute URL
    pub fn new(method: &str, url: &str) -> Self {
        let url = match url.find('#') {
            Some(pos) => &url[..pos],
            None => url,
        };

        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// Shorthand for a GET key
    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    /// Request method (upper case)
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Absolute URL without fragment
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether this key can be stored or matched
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A captured response: status, headers in arrival order, full body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Header name/value pairs
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl Response {
    /// Create a response with no headers
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Append a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True for 2xx statuses
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
