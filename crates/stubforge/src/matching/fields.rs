//! Field selectors: which part of a request a matcher reads.

use crate::message::{is_xml_content_type, RequestMessage};
use serde_json::Value;
use std::fmt;

/// The request field a matcher evaluates against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelector {
    Path,
    Url,
    Method,
    Query(String),
    Header(String),
    Cookie(String),
    BodyText,
    BodyJson,
    /// Raw body bytes; string matchers compare their base64 rendering.
    BodyBytes,
    /// Body text, present only when the Content-Type indicates XML.
    BodyXml,
    ClientIp,
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSelector::Path => write!(f, "path"),
            FieldSelector::Url => write!(f, "url"),
            FieldSelector::Method => write!(f, "method"),
            FieldSelector::Query(name) => write!(f, "query[{name}]"),
            FieldSelector::Header(name) => write!(f, "header[{name}]"),
            FieldSelector::Cookie(name) => write!(f, "cookie[{name}]"),
            FieldSelector::BodyText => write!(f, "body"),
            FieldSelector::BodyJson => write!(f, "bodyAsJson"),
            FieldSelector::BodyBytes => write!(f, "bodyAsBytes"),
            FieldSelector::BodyXml => write!(f, "bodyAsXml"),
            FieldSelector::ClientIp => write!(f, "clientIp"),
        }
    }
}

/// A field's value as seen by matchers. Multi-valued fields (headers,
/// query parameters) keep every value; string matchers take the best score
/// across them.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Absent,
    One(&'a str),
    Many(Vec<&'a str>),
    Json(&'a Value),
    Bytes(&'a [u8]),
}

impl FieldSelector {
    pub fn lookup<'a>(&self, req: &'a RequestMessage) -> FieldValue<'a> {
        match self {
            FieldSelector::Path => FieldValue::One(&req.path),
            // "url" is the request-line form: path plus query.
            FieldSelector::Url => FieldValue::One(&req.relative_url),
            FieldSelector::Method => FieldValue::One(&req.method),
            FieldSelector::ClientIp => FieldValue::One(&req.client_ip),
            FieldSelector::Query(name) => {
                let values = req.query.get_all(name);
                if values.is_empty() {
                    FieldValue::Absent
                } else {
                    FieldValue::Many(values)
                }
            }
            FieldSelector::Header(name) => {
                let values = req.headers.get_all(name);
                if values.is_empty() {
                    FieldValue::Absent
                } else {
                    FieldValue::Many(values)
                }
            }
            FieldSelector::Cookie(name) => match req.cookies.get(name) {
                Some(v) => FieldValue::One(v),
                None => FieldValue::Absent,
            },
            FieldSelector::BodyText => {
                if req.body.is_empty() {
                    FieldValue::Absent
                } else {
                    FieldValue::One(&req.body.text)
                }
            }
            FieldSelector::BodyJson => match &req.body.json {
                Some(v) => FieldValue::Json(v),
                None => FieldValue::Absent,
            },
            FieldSelector::BodyBytes => {
                if req.body.is_empty() {
                    FieldValue::Absent
                } else {
                    FieldValue::Bytes(&req.body.bytes)
                }
            }
            FieldSelector::BodyXml => {
                let is_xml = req
                    .headers
                    .get("content-type")
                    .map(is_xml_content_type)
                    .unwrap_or(false);
                if is_xml && !req.body.is_empty() {
                    FieldValue::One(&req.body.text)
                } else {
                    FieldValue::Absent
                }
            }
        }
    }
}
