//! Mapping: one (matcher tree → response template) rule with metadata.
//!
//! Mappings are immutable once inserted into the store; an update is a
//! replace-by-id at the store level.

mod builder;
mod store;

pub use builder::{MappingBuilder, RequestPatternBuilder, ResponseTemplateBuilder};
pub use store::{MappingStore, StoreError};

use crate::matching::MatchTree;
use crate::message::{Fault, RequestMessage, ResponseMessage};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Embedder-supplied response producer, invoked with the matched request.
pub trait ResponseCallback: Send + Sync {
    fn respond(&self, request: &RequestMessage) -> ResponseMessage;
}

impl<F> ResponseCallback for F
where
    F: Fn(&RequestMessage) -> ResponseMessage + Send + Sync,
{
    fn respond(&self, request: &RequestMessage) -> ResponseMessage {
        self(request)
    }
}

/// Response body template variants.
#[derive(Debug, Clone, PartialEq)]
pub enum BodySpec {
    Empty,
    Text(String),
    Json(Value),
    /// Base64-encoded binary payload, decoded at generation time.
    Base64(String),
    /// Served from a file on disk.
    File(PathBuf),
}

/// Template for the static and templated response paths.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseTemplate {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: BodySpec,
    /// When set, `{{...}}` placeholders in body and header values are
    /// rendered against the request.
    pub templated: bool,
    pub fault: Option<Fault>,
}

impl Default for ResponseTemplate {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: BodySpec::Empty,
            templated: false,
            fault: None,
        }
    }
}

/// Upstream forwarding configuration for the proxy path.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySpec {
    /// Scheme + authority of the upstream; path and query are appended.
    pub base_url: String,
    /// Extra headers injected into the forwarded request.
    pub additional_headers: Vec<(String, String)>,
    /// Persist the observed upstream response as a new static mapping on
    /// first hit.
    pub save_mapping: bool,
    /// PEM bundle presented as a client certificate.
    pub client_cert_path: Option<PathBuf>,
}

impl ProxySpec {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            additional_headers: Vec::new(),
            save_mapping: false,
            client_cert_path: None,
        }
    }
}

/// How the response for a matched request is produced.
#[derive(Clone)]
pub enum ResponseSpec {
    Static(ResponseTemplate),
    Proxy(ProxySpec),
    Callback(Arc<dyn ResponseCallback>),
}

impl fmt::Debug for ResponseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSpec::Static(t) => f.debug_tuple("Static").field(t).finish(),
            ResponseSpec::Proxy(p) => f.debug_tuple("Proxy").field(p).finish(),
            ResponseSpec::Callback(_) => write!(f, "Callback(..)"),
        }
    }
}

/// Scenario gate: the mapping is eligible only while the scenario is in
/// `required_state`, and moves it to `new_state` once served.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioClause {
    pub name: String,
    /// `None` means eligible in any state.
    pub required_state: Option<String>,
    /// `None` means serving this mapping does not transition the scenario.
    pub new_state: Option<String>,
}

/// Inclusive random delay range, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomDelay {
    pub min_ms: u64,
    pub max_ms: u64,
}

/// Per-mapping response timing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingSpec {
    pub fixed_delay: Option<Duration>,
    pub random_delay: Option<RandomDelay>,
}

/// Outbound call fired after a mapping has served.
#[derive(Debug, Clone, PartialEq)]
pub struct Webhook {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// One request-pattern → response-template rule.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub id: Uuid,
    pub title: Option<String>,
    /// Lower wins; negatives allowed; defaults to 0.
    pub priority: i32,
    pub tree: MatchTree,
    pub response: ResponseSpec,
    pub scenario: Option<ScenarioClause>,
    pub timing: TimingSpec,
    pub webhooks: Vec<Webhook>,
    /// Fire webhooks without awaiting their completion.
    pub webhooks_fire_and_forget: bool,
}

impl Mapping {
    /// Start a fluent builder; `id` defaults to a fresh v4 UUID.
    pub fn builder() -> MappingBuilder {
        MappingBuilder::new()
    }

    /// A catch-all mapping at the lowest precedence, used for proxy-all
    /// mode.
    pub fn catch_all_proxy(base_url: &str, save_mapping: bool) -> Self {
        let mut proxy = ProxySpec::new(base_url);
        proxy.save_mapping = save_mapping;
        Self {
            id: Uuid::new_v4(),
            title: Some("proxy-all".to_string()),
            priority: i32::MAX,
            tree: MatchTree::match_all(),
            response: ResponseSpec::Proxy(proxy),
            scenario: None,
            timing: TimingSpec::default(),
            webhooks: Vec::new(),
            webhooks_fire_and_forget: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_all_proxy_has_lowest_precedence() {
        let m = Mapping::catch_all_proxy("http://upstream:9000/", true);
        assert_eq!(m.priority, i32::MAX);
        match &m.response {
            ResponseSpec::Proxy(p) => {
                assert_eq!(p.base_url, "http://upstream:9000");
                assert!(p.save_mapping);
            }
            other => panic!("expected proxy spec, got {other:?}"),
        }
        let req = crate::message::RequestMessage::builder().path("/anything").build();
        assert_eq!(m.tree.score(&req), 1.0);
    }
}
