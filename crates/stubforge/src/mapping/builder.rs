//! Value-constructing fluent builders.
//!
//! Each call returns the builder with the accumulated configuration;
//! `build` produces the immutable value. Pattern-compilation failures
//! (bad regexes) are deferred and surfaced by `build`, keeping the chain
//! free of per-call `Result`s.

use super::{
    BodySpec, Mapping, ProxySpec, RandomDelay, ResponseCallback, ResponseSpec, ResponseTemplate,
    ScenarioClause, TimingSpec, Webhook,
};
use crate::matching::{
    CaseMode, FieldSelector, MatchTree, MatcherError, RequestMatch, RequestMatcher, StringComparer,
    StringOperator,
};
use crate::message::Fault;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Builds the matcher tree for one request pattern. The result is an
/// `all-of` across every configured field.
#[derive(Debug, Default)]
pub struct RequestPatternBuilder {
    matchers: Vec<MatchTree>,
    error: Option<MatcherError>,
}

impl RequestPatternBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, matcher: RequestMatcher) -> Self {
        self.matchers.push(matcher.into());
        self
    }

    fn push_result(mut self, result: Result<RequestMatcher, MatcherError>) -> Self {
        match result {
            Ok(m) => self.matchers.push(m.into()),
            Err(e) => self.error = self.error.or(Some(e)),
        }
        self
    }

    pub fn method(self, method: &str) -> Self {
        self.push(RequestMatcher::method(method))
    }

    pub fn path(self, path: &str) -> Self {
        self.push(RequestMatcher::exact(FieldSelector::Path, path))
    }

    /// Glob over the decoded path (`*` any run, `?` one char).
    pub fn path_wildcard(self, pattern: &str) -> Self {
        self.push(RequestMatcher::wildcard(
            FieldSelector::Path,
            pattern,
            CaseMode::Sensitive,
        ))
    }

    pub fn path_regex(self, pattern: &str) -> Self {
        self.push_result(RequestMatcher::regex(FieldSelector::Path, pattern))
    }

    pub fn url(self, url: &str) -> Self {
        self.push(RequestMatcher::exact(FieldSelector::Url, url))
    }

    pub fn url_regex(self, pattern: &str) -> Self {
        self.push_result(RequestMatcher::regex(FieldSelector::Url, pattern))
    }

    pub fn query(self, name: &str, value: &str) -> Self {
        self.push(RequestMatcher::exact(
            FieldSelector::Query(name.to_string()),
            value,
        ))
    }

    pub fn header(self, name: &str, value: &str) -> Self {
        self.push(RequestMatcher::exact(
            FieldSelector::Header(name.to_string()),
            value,
        ))
    }

    pub fn header_matches(self, name: &str, pattern: &str) -> Self {
        self.push_result(RequestMatcher::regex(
            FieldSelector::Header(name.to_string()),
            pattern,
        ))
    }

    pub fn header_absent(self, name: &str) -> Self {
        self.push(RequestMatcher::absent(FieldSelector::Header(
            name.to_string(),
        )))
    }

    pub fn cookie(self, name: &str, value: &str) -> Self {
        self.push(RequestMatcher::exact(
            FieldSelector::Cookie(name.to_string()),
            value,
        ))
    }

    pub fn content_type(self, expected: &str) -> Self {
        self.push(RequestMatcher::content_type(expected))
    }

    pub fn client_ip(self, ip: &str) -> Self {
        self.push(RequestMatcher::client_ip(ip))
    }

    pub fn body(self, text: &str) -> Self {
        self.push(RequestMatcher::exact(FieldSelector::BodyText, text))
    }

    pub fn body_contains(self, fragment: &str) -> Self {
        self.push_result(RequestMatcher::text(
            FieldSelector::BodyText,
            StringOperator::Contains,
            CaseMode::Sensitive,
            fragment,
        ))
    }

    pub fn body_matches(self, pattern: &str) -> Self {
        self.push_result(RequestMatcher::regex(FieldSelector::BodyText, pattern))
    }

    /// Request body must be present (any content).
    pub fn body_present(self) -> Self {
        self.push(RequestMatcher::absent(FieldSelector::BodyText).rejecting())
    }

    /// Exact raw-body match against the base64 of the expected bytes.
    pub fn body_base64(self, expected_base64: &str) -> Self {
        self.push(RequestMatcher::body_bytes(expected_base64))
    }

    /// Substring match over the body text of XML-typed requests.
    pub fn body_xml_contains(self, fragment: &str) -> Self {
        self.push_result(RequestMatcher::text(
            FieldSelector::BodyXml,
            StringOperator::Contains,
            CaseMode::Sensitive,
            fragment,
        ))
    }

    pub fn body_json_partial(self, expected: Value) -> Self {
        self.push(RequestMatcher::json_partial(expected))
    }

    pub fn body_json_path(self, path: &str) -> Self {
        self.push(RequestMatcher::json_path(path, None))
    }

    pub fn body_json_path_equals(self, path: &str, expected: &str) -> Self {
        let predicate =
            StringComparer::compile(StringOperator::Equals, CaseMode::Sensitive, expected);
        match predicate {
            Ok(p) => self.push(RequestMatcher::json_path(path, Some(p))),
            Err(e) => {
                let mut this = self;
                this.error = this.error.or(Some(e));
                this
            }
        }
    }

    pub fn matching(self, matcher: Arc<dyn RequestMatch>) -> Self {
        self.push(RequestMatcher::custom(matcher))
    }

    /// Add an arbitrary subtree (e.g. an `any-of` group).
    pub fn tree(mut self, tree: MatchTree) -> Self {
        self.matchers.push(tree);
        self
    }

    pub fn build(self) -> Result<MatchTree, MatcherError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(MatchTree::all_of(self.matchers)),
        }
    }
}

/// Fluent builder for [`ResponseTemplate`].
#[derive(Debug, Default)]
pub struct ResponseTemplateBuilder {
    template: ResponseTemplate,
}

impl ResponseTemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.template.status = status;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.template
            .headers
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, text: &str) -> Self {
        self.template.body = BodySpec::Text(text.to_string());
        self
    }

    pub fn json_body(mut self, value: Value) -> Self {
        self.template.body = BodySpec::Json(value);
        self
    }

    pub fn base64_body(mut self, encoded: &str) -> Self {
        self.template.body = BodySpec::Base64(encoded.to_string());
        self
    }

    pub fn body_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.template.body = BodySpec::File(path.into());
        self
    }

    /// Enable `{{...}}` placeholder rendering.
    pub fn templated(mut self) -> Self {
        self.template.templated = true;
        self
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.template.fault = Some(fault);
        self
    }

    pub fn build(self) -> ResponseTemplate {
        self.template
    }
}

/// Fluent builder for [`Mapping`].
pub struct MappingBuilder {
    id: Uuid,
    title: Option<String>,
    priority: i32,
    pattern: Option<RequestPatternBuilder>,
    tree: Option<MatchTree>,
    response: Option<ResponseSpec>,
    scenario: Option<ScenarioClause>,
    timing: TimingSpec,
    webhooks: Vec<Webhook>,
    webhooks_fire_and_forget: bool,
}

impl MappingBuilder {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            title: None,
            priority: 0,
            pattern: None,
            tree: None,
            response: None,
            scenario: None,
            timing: TimingSpec::default(),
            webhooks: Vec::new(),
            webhooks_fire_and_forget: true,
        }
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn request(mut self, pattern: RequestPatternBuilder) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Use a pre-built tree instead of a pattern builder.
    pub fn tree(mut self, tree: MatchTree) -> Self {
        self.tree = Some(tree);
        self
    }

    pub fn response(mut self, response: ResponseSpec) -> Self {
        self.response = Some(response);
        self
    }

    pub fn respond_with(self, template: ResponseTemplateBuilder) -> Self {
        self.response(ResponseSpec::Static(template.build()))
    }

    pub fn proxy_to(self, spec: ProxySpec) -> Self {
        self.response(ResponseSpec::Proxy(spec))
    }

    pub fn callback(self, callback: Arc<dyn ResponseCallback>) -> Self {
        self.response(ResponseSpec::Callback(callback))
    }

    pub fn in_scenario(mut self, name: &str) -> Self {
        self.scenario = Some(ScenarioClause {
            name: name.to_string(),
            required_state: None,
            new_state: None,
        });
        self
    }

    /// Requires `in_scenario` first; otherwise ignored.
    pub fn when_state(mut self, state: &str) -> Self {
        if let Some(clause) = self.scenario.as_mut() {
            clause.required_state = Some(state.to_string());
        }
        self
    }

    /// Requires `in_scenario` first; otherwise ignored.
    pub fn will_set_state(mut self, state: &str) -> Self {
        if let Some(clause) = self.scenario.as_mut() {
            clause.new_state = Some(state.to_string());
        }
        self
    }

    pub fn fixed_delay(mut self, delay: Duration) -> Self {
        self.timing.fixed_delay = Some(delay);
        self
    }

    pub fn random_delay(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.timing.random_delay = Some(RandomDelay { min_ms, max_ms });
        self
    }

    pub fn webhook(mut self, webhook: Webhook) -> Self {
        self.webhooks.push(webhook);
        self
    }

    pub fn await_webhooks(mut self) -> Self {
        self.webhooks_fire_and_forget = false;
        self
    }

    pub fn build(self) -> Result<Mapping, MatcherError> {
        let tree = match (self.tree, self.pattern) {
            (Some(tree), _) => tree,
            (None, Some(pattern)) => pattern.build()?,
            (None, None) => MatchTree::match_all(),
        };
        Ok(Mapping {
            id: self.id,
            title: self.title,
            priority: self.priority,
            tree,
            response: self
                .response
                .unwrap_or(ResponseSpec::Static(ResponseTemplate::default())),
            scenario: self.scenario,
            timing: self.timing,
            webhooks: self.webhooks,
            webhooks_fire_and_forget: self.webhooks_fire_and_forget,
        })
    }
}

impl Default for MappingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RequestMessage;
    use serde_json::json;

    #[test]
    fn chained_pattern_builds_an_all_of() {
        let mapping = Mapping::builder()
            .request(
                RequestPatternBuilder::new()
                    .method("POST")
                    .path("/orders")
                    .header("X-Api-Key", "secret")
                    .body_json_partial(json!({"kind": "order"})),
            )
            .respond_with(ResponseTemplateBuilder::new().status(201).body("created"))
            .build()
            .unwrap();

        let hit = RequestMessage::builder()
            .method("POST")
            .path("/orders")
            .header("X-Api-Key", "secret")
            .json_body(json!({"kind": "order"}))
            .build();
        assert_eq!(mapping.tree.score(&hit), 1.0);

        let miss = RequestMessage::builder()
            .method("POST")
            .path("/orders")
            .json_body(json!({"kind": "order"}))
            .build();
        assert_eq!(mapping.tree.score(&miss), 0.0);
    }

    #[test]
    fn builder_is_value_constructing() {
        let base = RequestPatternBuilder::new().method("GET");
        // Consuming the base into two chains requires rebuilding; each build
        // yields an independent tree.
        let tree = base.path("/a").build().unwrap();
        let req = RequestMessage::builder().method("GET").path("/a").build();
        assert_eq!(tree.score(&req), 1.0);
    }

    #[test]
    fn bad_regex_surfaces_at_build() {
        let err = RequestPatternBuilder::new().path_regex("[").build();
        assert!(matches!(err, Err(MatcherError::InvalidPattern(_))));
    }

    #[test]
    fn body_present_uses_reject_on_absent() {
        let tree = RequestPatternBuilder::new().body_present().build().unwrap();

        let with_body = RequestMessage::builder().method("POST").body("x").build();
        assert_eq!(tree.score(&with_body), 1.0);

        // TRACE bodies are coerced empty before matching, so the matcher
        // sees no body at all.
        let trace = RequestMessage::builder().method("TRACE").body("x").build();
        assert_eq!(tree.score(&trace), 0.0);
    }

    #[test]
    fn body_bytes_and_xml_patterns() {
        let encoded = {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD.encode(b"\x01\x02\x03")
        };
        let binary = RequestPatternBuilder::new()
            .body_base64(&encoded)
            .build()
            .unwrap();
        let req = RequestMessage::builder()
            .method("POST")
            .body(&b"\x01\x02\x03"[..])
            .build();
        assert_eq!(binary.score(&req), 1.0);

        let xml = RequestPatternBuilder::new()
            .body_xml_contains("<sku>9</sku>")
            .build()
            .unwrap();
        let req = RequestMessage::builder()
            .method("POST")
            .header("Content-Type", "application/xml")
            .body("<item><sku>9</sku></item>")
            .build();
        assert_eq!(xml.score(&req), 1.0);
    }

    #[test]
    fn scenario_clause_roundtrip() {
        let mapping = Mapping::builder()
            .in_scenario("checkout")
            .when_state("Started")
            .will_set_state("paid")
            .build()
            .unwrap();
        let clause = mapping.scenario.unwrap();
        assert_eq!(clause.name, "checkout");
        assert_eq!(clause.required_state.as_deref(), Some("Started"));
        assert_eq!(clause.new_state.as_deref(), Some("paid"));
    }

    #[test]
    fn defaults() {
        let mapping = Mapping::builder().build().unwrap();
        assert_eq!(mapping.priority, 0);
        assert!(mapping.webhooks_fire_and_forget);
        let req = RequestMessage::builder().build();
        assert_eq!(mapping.tree.score(&req), 1.0);
    }
}
