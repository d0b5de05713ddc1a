//! The request record flowing through every pipeline module.
//!
//! A `Request` is produced once by a source and never mutated afterwards.
//! Modules that need to annotate a request build a new value
//! (see [`Request::with_meta`]); fan-out branches each receive their own clone,
//! so no branch can observe another branch's changes.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP method of a captured request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Connect,
    Options,
    Trace,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Connect,
        Method::Options,
        Method::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }

    /// Stable numeric code, exposed to expressions as the constants `GET`, `POST`, ...
    pub fn code(&self) -> i64 {
        *self as i64
    }

    pub fn from_http(method: &axum::http::Method) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == method.as_str())
    }

    pub fn to_http(self) -> axum::http::Method {
        match self {
            Method::Get => axum::http::Method::GET,
            Method::Head => axum::http::Method::HEAD,
            Method::Post => axum::http::Method::POST,
            Method::Put => axum::http::Method::PUT,
            Method::Patch => axum::http::Method::PATCH,
            Method::Delete => axum::http::Method::DELETE,
            Method::Connect => axum::http::Method::CONNECT,
            Method::Options => axum::http::Method::OPTIONS,
            Method::Trace => axum::http::Method::TRACE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP protocol version of a captured request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HttpVersion {
    #[serde(rename = "HTTP/1.0")]
    Http10,
    #[default]
    #[serde(rename = "HTTP/1.1")]
    Http11,
    #[serde(rename = "HTTP/2")]
    Http2,
}

impl HttpVersion {
    pub const ALL: [(HttpVersion, &'static str); 3] = [
        (HttpVersion::Http10, "HTTP1_0"),
        (HttpVersion::Http11, "HTTP1_1"),
        (HttpVersion::Http2, "HTTP2"),
    ];

    pub fn code(&self) -> i64 {
        *self as i64
    }

    pub fn from_http(version: axum::http::Version) -> Self {
        match version {
            axum::http::Version::HTTP_10 | axum::http::Version::HTTP_09 => HttpVersion::Http10,
            axum::http::Version::HTTP_11 => HttpVersion::Http11,
            _ => HttpVersion::Http2,
        }
    }
}

/// A typed annotation attached to a request by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::String(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::String(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

/// One captured HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub time: DateTime<Utc>,
    pub method: Method,
    pub path: String,
    pub http_version: HttpVersion,
    /// Header name to its values, in order. Captured requests carry
    /// canonical names (`Content-Type`, `X-Tenant`).
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default, with = "body_base64")]
    pub body: Bytes,
    #[serde(default)]
    pub meta: HashMap<String, MetaValue>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            time: Utc::now(),
            method: Method::default(),
            path: String::new(),
            http_version: HttpVersion::default(),
            headers: HashMap::new(),
            body: Bytes::new(),
            meta: HashMap::new(),
        }
    }
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Self::default()
        }
    }

    /// Append a header value, keeping previously added values for the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_version(mut self, version: HttpVersion) -> Self {
        self.http_version = version;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// First value of the named header. An exact match wins, otherwise the
    /// canonical form of `name` is looked up.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| self.headers.get(&canonical_header_name(name)))
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Canonical MIME form of a header name: the first letter and every letter
/// following a hyphen upper case, the rest lower case (`x-tenant` becomes
/// `X-Tenant`).
pub fn canonical_header_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

mod body_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
