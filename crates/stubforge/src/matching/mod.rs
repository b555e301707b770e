//! Request matching: scored predicates over request fields and their
//! boolean composition.
//!
//! A [`RequestMatcher`] reads one field and yields a score in `[0.0, 1.0]`;
//! 1.0 is a perfect match, 0.0 a definite miss, and intermediate values come
//! from partial JSON matching. [`MatchTree`] combines matchers with `all-of`
//! (product of scores, zero short-circuits) and `any-of` (max of scores).

mod fields;
mod glob;
mod json;
mod operators;

pub use fields::{FieldSelector, FieldValue};
pub use glob::glob_match;
pub use json::{node_as_string, partial_score, select_nodes};
pub use operators::{CaseMode, StringComparer, StringOperator};

use crate::message::RequestMessage;
use base64::Engine as _;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Matcher construction failure. Raised when building a matcher, never
/// while scoring a request.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("unsupported matcher: {0}")]
    Unsupported(String),
}

/// Whether a matching field accepts or vetoes the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchBehavior {
    #[default]
    AcceptOnMatch,
    /// Inverts the score: a hit becomes 0, a miss becomes 1.
    RejectOnMatch,
}

/// Embedder-supplied matcher, the extension seam for predicates the
/// built-in algebra cannot express.
pub trait RequestMatch: Send + Sync {
    /// Score in `[0.0, 1.0]`.
    fn score(&self, request: &RequestMessage) -> f64;

    fn describe(&self) -> String {
        "custom".to_string()
    }
}

impl<F> RequestMatch for F
where
    F: Fn(&RequestMessage) -> f64 + Send + Sync,
{
    fn score(&self, request: &RequestMessage) -> f64 {
        self(request)
    }
}

/// The matcher variants.
#[derive(Clone)]
pub enum MatcherKind {
    /// String comparison under an operator (equals/contains/starts/ends/
    /// regex); covers the exact and regex matchers.
    Text(StringComparer),
    /// Anchored glob with `*` and `?`.
    Wildcard { pattern: String, case: CaseMode },
    /// Selects nodes from the JSON body; scores 1 when any node satisfies
    /// the predicate (or merely exists, when no predicate is given).
    JsonPath {
        path: String,
        predicate: Option<StringComparer>,
    },
    /// Fraction of expected leaves found equal in the JSON body.
    JsonPartial { expected: Value },
    /// Matches when the field is absent from the request.
    Absent,
    Custom(Arc<dyn RequestMatch>),
}

impl fmt::Debug for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatcherKind::Text(c) => write!(f, "Text({:?} {:?})", c.operator(), c.expected()),
            MatcherKind::Wildcard { pattern, .. } => write!(f, "Wildcard({pattern:?})"),
            MatcherKind::JsonPath { path, .. } => write!(f, "JsonPath({path:?})"),
            MatcherKind::JsonPartial { .. } => write!(f, "JsonPartial"),
            MatcherKind::Absent => write!(f, "Absent"),
            MatcherKind::Custom(m) => write!(f, "Custom({})", m.describe()),
        }
    }
}

/// One scored predicate over one request field.
#[derive(Debug, Clone)]
pub struct RequestMatcher {
    pub field: FieldSelector,
    pub kind: MatcherKind,
    pub behavior: MatchBehavior,
}

impl RequestMatcher {
    pub fn new(field: FieldSelector, kind: MatcherKind) -> Self {
        Self {
            field,
            kind,
            behavior: MatchBehavior::AcceptOnMatch,
        }
    }

    pub fn rejecting(mut self) -> Self {
        self.behavior = MatchBehavior::RejectOnMatch;
        self
    }

    // ---- constructors for the common shapes ----

    pub fn text(
        field: FieldSelector,
        operator: StringOperator,
        case: CaseMode,
        expected: &str,
    ) -> Result<Self, MatcherError> {
        Ok(Self::new(
            field,
            MatcherKind::Text(StringComparer::compile(operator, case, expected)?),
        ))
    }

    pub fn exact(field: FieldSelector, expected: &str) -> Self {
        // Literal equality cannot fail to compile.
        Self::text(field, StringOperator::Equals, CaseMode::Sensitive, expected)
            .unwrap_or_else(|_| unreachable!())
    }

    pub fn regex(field: FieldSelector, pattern: &str) -> Result<Self, MatcherError> {
        Self::text(field, StringOperator::Matches, CaseMode::Sensitive, pattern)
    }

    pub fn wildcard(field: FieldSelector, pattern: &str, case: CaseMode) -> Self {
        Self::new(
            field,
            MatcherKind::Wildcard {
                pattern: pattern.to_string(),
                case,
            },
        )
    }

    pub fn method(method: &str) -> Self {
        Self::text(
            FieldSelector::Method,
            StringOperator::Equals,
            CaseMode::Insensitive,
            method,
        )
        .unwrap_or_else(|_| unreachable!())
    }

    pub fn content_type(expected: &str) -> Self {
        Self::text(
            FieldSelector::Header("Content-Type".into()),
            StringOperator::Contains,
            CaseMode::Insensitive,
            expected,
        )
        .unwrap_or_else(|_| unreachable!())
    }

    pub fn client_ip(expected: &str) -> Self {
        Self::exact(FieldSelector::ClientIp, expected)
    }

    pub fn json_path(path: &str, predicate: Option<StringComparer>) -> Self {
        Self::new(
            FieldSelector::BodyJson,
            MatcherKind::JsonPath {
                path: path.to_string(),
                predicate,
            },
        )
    }

    pub fn json_partial(expected: Value) -> Self {
        Self::new(FieldSelector::BodyJson, MatcherKind::JsonPartial { expected })
    }

    /// Exact raw-body match; `expected_base64` is the base64 of the bytes.
    pub fn body_bytes(expected_base64: &str) -> Self {
        Self::exact(FieldSelector::BodyBytes, expected_base64)
    }

    pub fn absent(field: FieldSelector) -> Self {
        Self::new(field, MatcherKind::Absent)
    }

    pub fn custom(matcher: Arc<dyn RequestMatch>) -> Self {
        Self::new(FieldSelector::Path, MatcherKind::Custom(matcher))
    }

    /// Score in `[0.0, 1.0]`, with RejectOnMatch inverting the raw score.
    pub fn score(&self, request: &RequestMessage) -> f64 {
        let raw = self.raw_score(request);
        match self.behavior {
            MatchBehavior::AcceptOnMatch => raw,
            MatchBehavior::RejectOnMatch => 1.0 - raw,
        }
    }

    fn raw_score(&self, request: &RequestMessage) -> f64 {
        // Custom matchers see the whole request, not one field.
        if let MatcherKind::Custom(matcher) = &self.kind {
            return matcher.score(request).clamp(0.0, 1.0);
        }

        let value = self.field.lookup(request);

        if let MatcherKind::Absent = self.kind {
            return if matches!(value, FieldValue::Absent) {
                1.0
            } else {
                0.0
            };
        }

        match value {
            FieldValue::Absent => 0.0,
            FieldValue::One(v) => self.score_strings(&[v]),
            FieldValue::Many(vs) => self.score_strings(&vs),
            FieldValue::Json(root) => match &self.kind {
                MatcherKind::JsonPath { path, predicate } => {
                    let nodes = select_nodes(root, path);
                    let hit = match predicate {
                        None => !nodes.is_empty(),
                        Some(p) => nodes.iter().any(|n| p.matches(&node_as_string(n))),
                    };
                    if hit {
                        1.0
                    } else {
                        0.0
                    }
                }
                MatcherKind::JsonPartial { expected } => partial_score(expected, root),
                // String matchers against the JSON body compare its compact
                // rendering.
                _ => {
                    let rendered = root.to_string();
                    self.score_strings(&[rendered.as_str()])
                }
            },
            // Byte-valued fields compare through their base64 rendering, so
            // an exact matcher expects the base64 of the raw body.
            FieldValue::Bytes(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                self.score_strings(&[encoded.as_str()])
            }
        }
    }

    /// Best score across a field's values; string matchers are binary.
    fn score_strings(&self, values: &[&str]) -> f64 {
        let hit = match &self.kind {
            MatcherKind::Text(comparer) => values.iter().any(|v| comparer.matches(v)),
            MatcherKind::Wildcard { pattern, case } => values
                .iter()
                .any(|v| glob_match(pattern, v, *case == CaseMode::Insensitive)),
            // JSON matchers require a JSON field value.
            MatcherKind::JsonPath { .. } | MatcherKind::JsonPartial { .. } => false,
            MatcherKind::Absent | MatcherKind::Custom(_) => unreachable!(),
        };
        if hit {
            1.0
        } else {
            0.0
        }
    }
}

/// Boolean composition of matchers. The root of a mapping is an `all-of`
/// of its per-field matchers.
#[derive(Debug, Clone)]
pub enum MatchTree {
    Leaf(RequestMatcher),
    AllOf(Vec<MatchTree>),
    AnyOf(Vec<MatchTree>),
}

impl MatchTree {
    pub fn all_of(children: Vec<MatchTree>) -> Self {
        MatchTree::AllOf(children)
    }

    pub fn any_of(children: Vec<MatchTree>) -> Self {
        MatchTree::AnyOf(children)
    }

    /// An empty all-of: matches every request with score 1.
    pub fn match_all() -> Self {
        MatchTree::AllOf(Vec::new())
    }

    pub fn score(&self, request: &RequestMessage) -> f64 {
        match self {
            MatchTree::Leaf(matcher) => matcher.score(request),
            MatchTree::AllOf(children) => {
                let mut product = 1.0;
                for child in children {
                    let s = child.score(request);
                    if s == 0.0 {
                        return 0.0;
                    }
                    product *= s;
                }
                product
            }
            MatchTree::AnyOf(children) => children
                .iter()
                .map(|c| c.score(request))
                .fold(0.0, f64::max),
        }
    }
}

impl From<RequestMatcher> for MatchTree {
    fn from(matcher: RequestMatcher) -> Self {
        MatchTree::Leaf(matcher)
    }
}
