//! Normalized request/response value objects.
//!
//! The HTTP adapter builds one [`RequestMessage`] per inbound request before
//! matching starts; everything downstream (matchers, templating, the journal)
//! reads from that immutable snapshot. [`ResponseMessage`] is the engine's
//! output, handed back to the adapter for emission.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Headers the transport computes itself; user-supplied values are dropped
/// on emission.
pub const RESERVED_HEADERS: [&str; 6] = [
    "transfer-encoding",
    "content-length",
    "keep-alive",
    "connection",
    "upgrade",
    "proxy-connection",
];

/// Check whether a header is transport-reserved (case-insensitive).
pub fn is_reserved_header(name: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Methods whose body is coerced to empty before matching.
const BODYLESS_METHODS: [&str; 3] = ["GET", "HEAD", "TRACE"];

/// Ordered multimap with case-insensitive keys, used for headers.
///
/// Insertion order is preserved; `get` returns the first value for a key,
/// `get_all` every value in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMultimap {
    entries: Vec<(String, String)>,
}

impl HeaderMultimap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single entry.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop transport-reserved headers, returning the removed names.
    pub fn strip_reserved(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|(k, _)| {
            if is_reserved_header(k) {
                removed.push(k.clone());
                false
            } else {
                true
            }
        });
        removed
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMultimap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Ordered query-parameter multimap (names are case-sensitive).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryMultimap {
    entries: Vec<(String, String)>,
}

impl QueryMultimap {
    /// Parse a raw query string, percent-decoding names and values and
    /// preserving parameter order.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut entries = Vec::new();
        if let Some(q) = raw {
            for pair in q.split('&').filter(|p| !p.is_empty()) {
                let (name, value) = match pair.split_once('=') {
                    Some((n, v)) => (n, v),
                    None => (pair, ""),
                };
                entries.push((
                    urlencoding::decode(name).unwrap_or_default().into_owned(),
                    urlencoding::decode(value).unwrap_or_default().into_owned(),
                ));
            }
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Request body with its three co-resident views.
#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    /// Raw bytes, fully materialized before matching.
    pub bytes: Bytes,
    /// Best-effort decoded string (lossy UTF-8).
    pub text: String,
    /// Parsed JSON, present only when the Content-Type indicates JSON and
    /// the bytes parse.
    pub json: Option<Value>,
}

impl RequestBody {
    fn from_bytes(bytes: Bytes, content_type: Option<&str>) -> Self {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let json = match content_type {
            Some(ct) if is_json_content_type(ct) && !bytes.is_empty() => {
                serde_json::from_slice(&bytes).ok()
            }
            _ => None,
        };
        Self { bytes, text, json }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// True for `application/json` and its charset/suffix variants.
pub fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

/// True for `application/xml`, `text/xml`, and `+xml` suffix variants.
pub fn is_xml_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "application/xml" || mime == "text/xml" || mime.ends_with("+xml")
}

/// The normalized view of one inbound HTTP request. Immutable once
/// constructed.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    /// Absolute URL as the client sent it.
    pub url: String,
    /// Path plus query exactly as they appeared on the request line.
    pub relative_url: String,
    /// Percent-decoded path.
    pub path: String,
    /// Uppercased method.
    pub method: String,
    pub headers: HeaderMultimap,
    /// Cookie name → value; on duplicates the last one wins.
    pub cookies: HashMap<String, String>,
    pub query: QueryMultimap,
    pub body: RequestBody,
    pub client_ip: String,
    /// Wall-clock arrival time.
    pub received_at: DateTime<Utc>,
    /// Monotonic arrival time, for latency accounting.
    pub started: Instant,
}

impl RequestMessage {
    /// Build the normalized request. `body` must already be decompressed by
    /// the adapter; methods in the bodyless set get their body coerced to
    /// empty before any matcher sees it.
    pub fn new(
        method: &str,
        url: &str,
        path: &str,
        query: Option<&str>,
        headers: HeaderMultimap,
        body: Bytes,
        client_ip: &str,
    ) -> Self {
        let method = method.to_ascii_uppercase();
        let effective_body = if BODYLESS_METHODS.contains(&method.as_str()) {
            Bytes::new()
        } else {
            body
        };
        let cookies = parse_cookies(&headers);
        let content_type = headers.get("content-type").map(str::to_string);
        let decoded_path = urlencoding::decode(path)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| path.to_string());
        let relative_url = match query {
            Some(q) if !q.is_empty() => format!("{path}?{q}"),
            _ => path.to_string(),
        };

        Self {
            url: url.to_string(),
            relative_url,
            path: decoded_path,
            method,
            body: RequestBody::from_bytes(effective_body, content_type.as_deref()),
            cookies,
            query: QueryMultimap::parse(query),
            headers,
            client_ip: client_ip.to_string(),
            received_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Test-friendly builder.
    pub fn builder() -> RequestMessageBuilder {
        RequestMessageBuilder::default()
    }
}

/// Builder used by tests and embedders; each setter returns the updated
/// builder.
#[derive(Debug, Default)]
pub struct RequestMessageBuilder {
    method: Option<String>,
    path: Option<String>,
    query: Option<String>,
    headers: HeaderMultimap,
    body: Bytes,
    client_ip: Option<String>,
}

impl RequestMessageBuilder {
    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json_body(mut self, value: Value) -> Self {
        self.body = Bytes::from(value.to_string());
        self.headers.set("Content-Type", "application/json");
        self
    }

    pub fn client_ip(mut self, ip: &str) -> Self {
        self.client_ip = Some(ip.to_string());
        self
    }

    pub fn build(self) -> RequestMessage {
        let method = self.method.unwrap_or_else(|| "GET".to_string());
        let path = self.path.unwrap_or_else(|| "/".to_string());
        let url = match &self.query {
            Some(q) => format!("http://localhost{path}?{q}"),
            None => format!("http://localhost{path}"),
        };
        RequestMessage::new(
            &method,
            &url,
            &path,
            self.query.as_deref(),
            self.headers,
            self.body,
            self.client_ip.as_deref().unwrap_or("127.0.0.1"),
        )
    }
}

fn parse_cookies(headers: &HeaderMultimap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for raw in headers.get_all("cookie") {
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

/// Deliberate transport-level failure served in place of a normal body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Send headers, then no body at all.
    EmptyResponse,
    /// Garbage bytes in place of the body.
    MalformedResponse,
    /// Send only the first `n` body bytes, then stop.
    AbortAfterBytes(usize),
}

/// Response body variants the generator can produce.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Empty,
    Bytes(Bytes),
    Text(String),
    Json(Value),
}

impl ResponseBody {
    pub fn to_bytes(&self) -> Bytes {
        match self {
            ResponseBody::Empty => Bytes::new(),
            ResponseBody::Bytes(b) => b.clone(),
            ResponseBody::Text(t) => Bytes::from(t.clone()),
            ResponseBody::Json(v) => Bytes::from(v.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
            || matches!(self, ResponseBody::Bytes(b) if b.is_empty())
            || matches!(self, ResponseBody::Text(t) if t.is_empty())
    }
}

/// The engine's output for one request.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub status: u16,
    pub headers: HeaderMultimap,
    pub body: ResponseBody,
    /// Delay already resolved to a concrete duration (per-mapping plus
    /// global), applied by the adapter on the response side.
    pub delay: Option<Duration>,
    pub fault: Option<Fault>,
}

impl Default for ResponseMessage {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderMultimap::new(),
            body: ResponseBody::Empty,
            delay: None,
            fault: None,
        }
    }
}

impl ResponseMessage {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Apply the reserved-header rule before emission.
    pub fn sanitize_headers(&mut self) {
        self.headers.strip_reserved();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_multimap_is_case_insensitive_and_ordered() {
        let mut headers = HeaderMultimap::new();
        headers.append("Accept", "text/html");
        headers.append("X-Tag", "a");
        headers.append("x-tag", "b");

        assert_eq!(headers.get("accept"), Some("text/html"));
        assert_eq!(headers.get("X-TAG"), Some("a"));
        assert_eq!(headers.get_all("x-tag"), vec!["a", "b"]);
        assert!(!headers.contains("x-missing"));
    }

    #[test]
    fn strip_reserved_drops_transport_headers() {
        let mut headers = HeaderMultimap::new();
        headers.append("Transfer-Encoding", "chunked");
        headers.append("Content-Type", "text/plain");
        headers.append("connection", "close");

        let removed = headers.strip_reserved();
        assert_eq!(removed.len(), 2);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn query_multimap_preserves_order_and_decodes() {
        let q = QueryMultimap::parse(Some("b=2&a=1&a=3&city=New%20York&flag"));
        assert_eq!(q.get("a"), Some("1"));
        assert_eq!(q.get_all("a"), vec!["1", "3"]);
        assert_eq!(q.get("city"), Some("New York"));
        assert_eq!(q.get("flag"), Some(""));
        let names: Vec<&str> = q.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b", "a", "a", "city", "flag"]);
    }

    #[test]
    fn bodyless_methods_lose_their_body_before_matching() {
        let req = RequestMessage::builder()
            .method("trace")
            .path("/x")
            .body("hello")
            .build();
        assert_eq!(req.method, "TRACE");
        assert!(req.body.is_empty());

        let req = RequestMessage::builder()
            .method("POST")
            .path("/x")
            .body("hello")
            .build();
        assert_eq!(req.body.text, "hello");
    }

    #[test]
    fn unknown_verbs_keep_their_body() {
        let req = RequestMessage::builder()
            .method("REPORT")
            .body("calendar")
            .build();
        assert_eq!(req.body.text, "calendar");

        let req = RequestMessage::builder()
            .method("FROBNICATE")
            .body("x")
            .build();
        assert_eq!(req.body.text, "x");
    }

    #[test]
    fn json_body_view_requires_json_content_type() {
        let req = RequestMessage::builder()
            .method("POST")
            .json_body(json!({"a": 1}))
            .build();
        assert_eq!(req.body.json, Some(json!({"a": 1})));

        let req = RequestMessage::builder()
            .method("POST")
            .header("Content-Type", "text/plain")
            .body(r#"{"a": 1}"#)
            .build();
        assert!(req.body.json.is_none());
    }

    #[test]
    fn json_content_type_accepts_charset_variants() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("application/json; charset=UTF-8"));
        assert!(is_json_content_type("application/json; charset=ascii"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/plain"));
    }

    #[test]
    fn xml_content_type_variants() {
        assert!(is_xml_content_type("application/xml"));
        assert!(is_xml_content_type("text/xml; charset=utf-8"));
        assert!(is_xml_content_type("application/soap+xml"));
        assert!(!is_xml_content_type("application/json"));
        assert!(!is_xml_content_type("text/plain"));
    }

    #[test]
    fn cookies_last_wins() {
        let req = RequestMessage::builder()
            .header("Cookie", "session=a; theme=dark")
            .header("Cookie", "session=b")
            .build();
        assert_eq!(req.cookies.get("session"), Some(&"b".to_string()));
        assert_eq!(req.cookies.get("theme"), Some(&"dark".to_string()));
    }

    #[test]
    fn path_is_percent_decoded() {
        let req = RequestMessage::builder().path("/a%20b/c").build();
        assert_eq!(req.path, "/a b/c");
    }

    #[test]
    fn response_sanitize_strips_reserved() {
        let mut resp = ResponseMessage::with_status(200);
        resp.headers.append("Transfer-Encoding", "chunked");
        resp.headers.append("X-Ok", "1");
        resp.sanitize_headers();
        assert!(!resp.headers.contains("transfer-encoding"));
        assert!(resp.headers.contains("x-ok"));
    }
}
