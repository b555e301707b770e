//! Admin wire schema and its conversion to and from domain types.
//!
//! The admin surface speaks camelCase JSON; domain types stay free of
//! serde so compiled matchers and callbacks never have to round-trip.
//! Deserialization is lenient where clients are sloppy (status as number,
//! matchers as bare strings); anything genuinely unsupported is a 400.

pub mod handlers;
pub mod router;

use crate::mapping::{
    BodySpec, Mapping, ProxySpec, RandomDelay, ResponseSpec, ResponseTemplate, ScenarioClause,
    TimingSpec, Webhook,
};
use crate::matching::{
    CaseMode, FieldSelector, MatchBehavior, MatchTree, MatcherError, MatcherKind, RequestMatcher,
    StringOperator,
};
use crate::message::Fault;
use crate::settings::ServerSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("{0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
}

/// Load every `*.json` mapping file from a directory into the store.
/// Unparseable files are logged and skipped; an unreadable directory is an
/// error. Returns the number of mappings loaded.
pub fn load_static_mappings(
    ctx: &crate::settings::ServerContext,
    dir: &std::path::Path,
) -> anyhow::Result<usize> {
    use anyhow::Context as _;

    let mut loaded = 0;
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read static mappings dir {}", dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("cannot list {}", dir.display()))?
            .path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let result = std::fs::read(&path)
            .map_err(|e| AdminError::BadRequest(e.to_string()))
            .and_then(|bytes| {
                serde_json::from_slice::<MappingDto>(&bytes)
                    .map_err(|e| AdminError::BadRequest(e.to_string()))
            })
            .and_then(MappingDto::into_mapping);
        match result {
            Ok(mapping) => match ctx.store.add(mapping) {
                Ok(()) => loaded += 1,
                Err(e) => tracing::warn!("skipping {}: {e}", path.display()),
            },
            Err(e) => tracing::warn!("skipping {}: {e}", path.display()),
        }
    }
    tracing::info!("loaded {loaded} static mappings from {}", dir.display());
    Ok(loaded)
}

impl From<MatcherError> for AdminError {
    fn from(e: MatcherError) -> Self {
        AdminError::BadRequest(e.to_string())
    }
}

// ============================================================================
// Mapping schema
// ============================================================================

/// One mapping in admin JSON form.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MappingDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default)]
    pub request: RequestPatternDto,
    #[serde(default)]
    pub response: ResponseDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_scenario_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_scenario_state: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhooks: Vec<WebhookDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhooks_fire_and_forget: Option<bool>,
}

/// Request side of a mapping: each present field adds one matcher to the
/// root all-of.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequestPatternDto {
    /// `ANY` (or absence) matches every method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Exact path-plus-query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Exact decoded path, query ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    /// Regex over path-plus-query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, MatcherDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<BTreeMap<String, MatcherDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_parameters: Option<BTreeMap<String, MatcherDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<MatcherDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

/// A matcher is either a bare string (exact match) or an operator object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatcherDto {
    Literal(String),
    Spec(MatcherSpecDto),
}

/// Operator form of a matcher. Exactly one operator field should be set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MatcherSpecDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equal_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub does_not_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<String>,
    /// Body only: JSON path existence / predicate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    /// Body only: value the selected node must equal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_path_equals: Option<String>,
    /// Body only: leaf-fraction partial JSON match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_partial: Option<Value>,
    /// Body only: exact raw-byte match, value is the base64 of the bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_equal_to: Option<String>,
    /// Body only: bind the string operator to the XML-typed body text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xml_text: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_insensitive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_on_match: Option<bool>,
}

/// Response side of a mapping.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_as_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Fixed delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_delay: Option<RandomDelayDto>,
    /// `EMPTY_RESPONSE`, `MALFORMED_RESPONSE`, or `ABORT_AFTER_BYTES:<n>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_mapping: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templated: Option<bool>,
    /// Marker for programmatic callback responses; never accepted on
    /// input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomDelayDto {
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDto {
    #[serde(default = "default_webhook_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

// ============================================================================
// DTO -> domain
// ============================================================================

impl MatcherDto {
    fn into_matcher(self, field: FieldSelector) -> Result<RequestMatcher, AdminError> {
        match self {
            MatcherDto::Literal(expected) => Ok(RequestMatcher::exact(field, &expected)),
            MatcherDto::Spec(spec) => spec.into_matcher(field),
        }
    }
}

impl MatcherSpecDto {
    fn into_matcher(self, field: FieldSelector) -> Result<RequestMatcher, AdminError> {
        let case = if self.case_insensitive.unwrap_or(false) {
            CaseMode::Insensitive
        } else {
            CaseMode::Sensitive
        };
        let reject = self.reject_on_match.unwrap_or(false);

        let matcher = if let Some(expected) = self.equal_to {
            RequestMatcher::text(field, StringOperator::Equals, case, &expected)?
        } else if let Some(expected) = self.contains {
            RequestMatcher::text(field, StringOperator::Contains, case, &expected)?
        } else if let Some(expected) = self.starts_with {
            RequestMatcher::text(field, StringOperator::StartsWith, case, &expected)?
        } else if let Some(expected) = self.ends_with {
            RequestMatcher::text(field, StringOperator::EndsWith, case, &expected)?
        } else if let Some(pattern) = self.matches {
            RequestMatcher::text(field, StringOperator::Matches, case, &pattern)?
        } else if let Some(pattern) = self.does_not_match {
            RequestMatcher::text(field, StringOperator::NotMatches, case, &pattern)?
        } else if let Some(pattern) = self.wildcard {
            RequestMatcher::wildcard(field, &pattern, case)
        } else if let Some(path) = self.json_path {
            let predicate = match self.json_path_equals {
                Some(expected) => Some(
                    crate::matching::StringComparer::compile(
                        StringOperator::Equals,
                        case,
                        &expected,
                    )
                    .map_err(AdminError::from)?,
                ),
                None => None,
            };
            RequestMatcher::json_path(&path, predicate)
        } else if let Some(expected) = self.json_partial {
            RequestMatcher::json_partial(expected)
        } else if let Some(encoded) = self.binary_equal_to {
            RequestMatcher::text(field, StringOperator::Equals, CaseMode::Sensitive, &encoded)?
        } else if let Some(absent) = self.absent {
            if absent {
                RequestMatcher::absent(field)
            } else {
                RequestMatcher::absent(field).rejecting()
            }
        } else {
            return Err(AdminError::BadRequest(
                "matcher object has no operator field".to_string(),
            ));
        };

        Ok(if reject { matcher.rejecting() } else { matcher })
    }
}

impl RequestPatternDto {
    pub fn into_tree(self) -> Result<MatchTree, AdminError> {
        let mut leaves: Vec<MatchTree> = Vec::new();

        if let Some(method) = self.method {
            if !method.eq_ignore_ascii_case("ANY") {
                leaves.push(RequestMatcher::method(&method).into());
            }
        }
        if let Some(url) = self.url {
            leaves.push(RequestMatcher::exact(FieldSelector::Url, &url).into());
        }
        if let Some(path) = self.url_path {
            leaves.push(RequestMatcher::exact(FieldSelector::Path, &path).into());
        }
        if let Some(pattern) = self.url_pattern {
            leaves.push(RequestMatcher::regex(FieldSelector::Url, &pattern)?.into());
        }
        if let Some(headers) = self.headers {
            for (name, matcher) in headers {
                leaves.push(matcher.into_matcher(FieldSelector::Header(name))?.into());
            }
        }
        if let Some(cookies) = self.cookies {
            for (name, matcher) in cookies {
                leaves.push(matcher.into_matcher(FieldSelector::Cookie(name))?.into());
            }
        }
        if let Some(params) = self.query_parameters {
            for (name, matcher) in params {
                leaves.push(matcher.into_matcher(FieldSelector::Query(name))?.into());
            }
        }
        if let Some(body) = self.body {
            // JSON operators bind to the parsed body, binary and XML
            // operators to their views, string operators to the text view.
            let field = match &body {
                MatcherDto::Spec(spec)
                    if spec.json_path.is_some() || spec.json_partial.is_some() =>
                {
                    FieldSelector::BodyJson
                }
                MatcherDto::Spec(spec) if spec.binary_equal_to.is_some() => {
                    FieldSelector::BodyBytes
                }
                MatcherDto::Spec(spec) if spec.xml_text.unwrap_or(false) => FieldSelector::BodyXml,
                _ => FieldSelector::BodyText,
            };
            leaves.push(body.into_matcher(field)?.into());
        }
        if let Some(ip) = self.client_ip {
            leaves.push(RequestMatcher::client_ip(&ip).into());
        }

        Ok(MatchTree::all_of(leaves))
    }
}

fn parse_fault(raw: &str) -> Result<Fault, AdminError> {
    match raw {
        "EMPTY_RESPONSE" => Ok(Fault::EmptyResponse),
        "MALFORMED_RESPONSE" => Ok(Fault::MalformedResponse),
        other => {
            if let Some(n) = other.strip_prefix("ABORT_AFTER_BYTES:") {
                let bytes = n
                    .parse::<usize>()
                    .map_err(|_| AdminError::BadRequest(format!("bad fault byte count: {n}")))?;
                Ok(Fault::AbortAfterBytes(bytes))
            } else {
                Err(AdminError::BadRequest(format!("unknown fault: {other}")))
            }
        }
    }
}

fn fault_to_string(fault: Fault) -> String {
    match fault {
        Fault::EmptyResponse => "EMPTY_RESPONSE".to_string(),
        Fault::MalformedResponse => "MALFORMED_RESPONSE".to_string(),
        Fault::AbortAfterBytes(n) => format!("ABORT_AFTER_BYTES:{n}"),
    }
}

impl ResponseDto {
    fn into_spec(self) -> Result<(ResponseSpec, TimingSpec), AdminError> {
        let timing = TimingSpec {
            fixed_delay: self.delay.map(Duration::from_millis),
            random_delay: self.random_delay.map(|d| RandomDelay {
                min_ms: d.min,
                max_ms: d.max,
            }),
        };

        if self.callback.unwrap_or(false) {
            return Err(AdminError::BadRequest(
                "callback responses can only be registered programmatically".to_string(),
            ));
        }

        if let Some(proxy_url) = self.proxy_url {
            let mut spec = ProxySpec::new(&proxy_url);
            spec.save_mapping = self.save_mapping.unwrap_or(false);
            if let Some(headers) = self.headers {
                spec.additional_headers = headers.into_iter().collect();
            }
            return Ok((ResponseSpec::Proxy(spec), timing));
        }

        let body = if let Some(json) = self.body_as_json {
            BodySpec::Json(json)
        } else if let Some(b64) = self.base64_body {
            BodySpec::Base64(b64)
        } else if let Some(file) = self.body_file_name {
            BodySpec::File(file.into())
        } else if let Some(text) = self.body {
            BodySpec::Text(text)
        } else {
            BodySpec::Empty
        };

        let fault = self.fault.as_deref().map(parse_fault).transpose()?;

        let template = ResponseTemplate {
            status: self.status.unwrap_or(200),
            headers: self
                .headers
                .map(|h| h.into_iter().collect())
                .unwrap_or_default(),
            body,
            templated: self.templated.unwrap_or(false),
            fault,
        };
        Ok((ResponseSpec::Static(template), timing))
    }
}

impl MappingDto {
    /// Convert to a domain mapping; `id` defaults to a fresh UUID.
    pub fn into_mapping(self) -> Result<Mapping, AdminError> {
        let scenario = self.scenario_name.map(|name| ScenarioClause {
            name,
            required_state: self.required_scenario_state,
            new_state: self.new_scenario_state,
        });
        let (response, timing) = self.response.into_spec()?;

        Ok(Mapping {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            title: self.title,
            priority: self.priority.unwrap_or(0),
            tree: self.request.into_tree()?,
            response,
            scenario,
            timing,
            webhooks: self
                .webhooks
                .into_iter()
                .map(|w| Webhook {
                    method: w.method,
                    url: w.url,
                    headers: w.headers.into_iter().collect(),
                    body: w.body,
                })
                .collect(),
            webhooks_fire_and_forget: self.webhooks_fire_and_forget.unwrap_or(true),
        })
    }
}

// ============================================================================
// domain -> DTO
// ============================================================================

fn comparer_to_spec(matcher: &RequestMatcher) -> MatcherSpecDto {
    let mut spec = MatcherSpecDto::default();
    if matcher.behavior == MatchBehavior::RejectOnMatch {
        spec.reject_on_match = Some(true);
    }
    match &matcher.kind {
        MatcherKind::Text(c) => {
            if c.case() == CaseMode::Insensitive {
                spec.case_insensitive = Some(true);
            }
            let expected = Some(c.expected().to_string());
            match c.operator() {
                StringOperator::Equals => spec.equal_to = expected,
                StringOperator::Contains => spec.contains = expected,
                StringOperator::StartsWith => spec.starts_with = expected,
                StringOperator::EndsWith => spec.ends_with = expected,
                StringOperator::Matches => spec.matches = expected,
                StringOperator::NotMatches => spec.does_not_match = expected,
            }
        }
        MatcherKind::Wildcard { pattern, case } => {
            if *case == CaseMode::Insensitive {
                spec.case_insensitive = Some(true);
            }
            spec.wildcard = Some(pattern.clone());
        }
        MatcherKind::JsonPath { path, predicate } => {
            spec.json_path = Some(path.clone());
            if let Some(p) = predicate {
                spec.json_path_equals = Some(p.expected().to_string());
            }
        }
        MatcherKind::JsonPartial { expected } => {
            spec.json_partial = Some(expected.clone());
        }
        MatcherKind::Absent => spec.absent = Some(true),
        // Custom matchers have no wire form.
        MatcherKind::Custom(_) => {}
    }
    spec
}

/// Best-effort reconstruction of the request pattern from a mapping's
/// tree. Admin-created mappings (a flat all-of of per-field leaves) round
/// trip exactly; programmatic trees fold what they can.
fn pattern_to_dto(tree: &MatchTree) -> RequestPatternDto {
    let mut dto = RequestPatternDto::default();
    let leaves: Vec<&RequestMatcher> = match tree {
        MatchTree::AllOf(children) => children
            .iter()
            .filter_map(|c| match c {
                MatchTree::Leaf(m) => Some(m),
                _ => None,
            })
            .collect(),
        MatchTree::Leaf(m) => vec![m],
        MatchTree::AnyOf(_) => Vec::new(),
    };

    for matcher in leaves {
        let spec = comparer_to_spec(matcher);
        let value = MatcherDto::Spec(spec.clone());
        match &matcher.field {
            FieldSelector::Method => {
                dto.method = spec.equal_to;
            }
            FieldSelector::Url => match (&spec.equal_to, &spec.matches) {
                (Some(url), _) => dto.url = Some(url.clone()),
                (None, Some(pattern)) => dto.url_pattern = Some(pattern.clone()),
                _ => {}
            },
            FieldSelector::Path => {
                if let Some(path) = spec.equal_to {
                    dto.url_path = Some(path);
                }
            }
            FieldSelector::Header(name) => {
                dto.headers
                    .get_or_insert_with(BTreeMap::new)
                    .insert(name.clone(), value);
            }
            FieldSelector::Cookie(name) => {
                dto.cookies
                    .get_or_insert_with(BTreeMap::new)
                    .insert(name.clone(), value);
            }
            FieldSelector::Query(name) => {
                dto.query_parameters
                    .get_or_insert_with(BTreeMap::new)
                    .insert(name.clone(), value);
            }
            FieldSelector::BodyText | FieldSelector::BodyJson => {
                dto.body = Some(value);
            }
            FieldSelector::BodyBytes => {
                let mut spec = spec;
                spec.binary_equal_to = spec.equal_to.take();
                dto.body = Some(MatcherDto::Spec(spec));
            }
            FieldSelector::BodyXml => {
                let mut spec = spec;
                spec.xml_text = Some(true);
                dto.body = Some(MatcherDto::Spec(spec));
            }
            FieldSelector::ClientIp => {
                dto.client_ip = spec.equal_to;
            }
        }
    }
    dto
}

impl From<&Mapping> for MappingDto {
    fn from(mapping: &Mapping) -> Self {
        let response = match &mapping.response {
            ResponseSpec::Static(t) => {
                let mut dto = ResponseDto {
                    status: Some(t.status),
                    templated: if t.templated { Some(true) } else { None },
                    fault: t.fault.map(fault_to_string),
                    ..ResponseDto::default()
                };
                if !t.headers.is_empty() {
                    dto.headers = Some(t.headers.iter().cloned().collect());
                }
                match &t.body {
                    BodySpec::Empty => {}
                    BodySpec::Text(text) => dto.body = Some(text.clone()),
                    BodySpec::Json(json) => dto.body_as_json = Some(json.clone()),
                    BodySpec::Base64(b64) => dto.base64_body = Some(b64.clone()),
                    BodySpec::File(path) => {
                        dto.body_file_name = Some(path.to_string_lossy().into_owned())
                    }
                }
                dto
            }
            ResponseSpec::Proxy(p) => ResponseDto {
                proxy_url: Some(p.base_url.clone()),
                save_mapping: if p.save_mapping { Some(true) } else { None },
                headers: if p.additional_headers.is_empty() {
                    None
                } else {
                    Some(p.additional_headers.iter().cloned().collect())
                },
                ..ResponseDto::default()
            },
            ResponseSpec::Callback(_) => ResponseDto {
                callback: Some(true),
                ..ResponseDto::default()
            },
        };

        let mut response = response;
        response.delay = mapping
            .timing
            .fixed_delay
            .map(|d| d.as_millis() as u64);
        response.random_delay = mapping.timing.random_delay.map(|r| RandomDelayDto {
            min: r.min_ms,
            max: r.max_ms,
        });

        MappingDto {
            id: Some(mapping.id),
            title: mapping.title.clone(),
            priority: if mapping.priority == 0 {
                None
            } else {
                Some(mapping.priority)
            },
            request: pattern_to_dto(&mapping.tree),
            response,
            scenario_name: mapping.scenario.as_ref().map(|s| s.name.clone()),
            required_scenario_state: mapping
                .scenario
                .as_ref()
                .and_then(|s| s.required_state.clone()),
            new_scenario_state: mapping.scenario.as_ref().and_then(|s| s.new_state.clone()),
            webhooks: mapping
                .webhooks
                .iter()
                .map(|w| WebhookDto {
                    method: w.method.clone(),
                    url: w.url.clone(),
                    headers: w.headers.iter().cloned().collect(),
                    body: w.body.clone(),
                })
                .collect(),
            webhooks_fire_and_forget: if mapping.webhooks_fire_and_forget {
                None
            } else {
                Some(false)
            },
        }
    }
}

// ============================================================================
// Settings schema
// ============================================================================

/// Settings over the wire. On PUT, absent fields keep their current
/// value; `requestLogCapacity` of `-1` means unbounded.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_log_capacity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_partial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_match_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_logging_delay: Option<u64>,
}

impl SettingsDto {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            global_delay: settings.global_delay.map(|d| d.as_millis() as u64),
            fallback_status: Some(settings.fallback_status),
            request_log_capacity: Some(
                settings
                    .request_log_capacity
                    .map(|c| c as i64)
                    .unwrap_or(-1),
            ),
            allow_partial: Some(settings.allow_partial),
            partial_match_threshold: Some(settings.partial_match_threshold),
            request_logging_delay: settings.request_logging_delay.map(|d| d.as_millis() as u64),
        }
    }

    /// Merge onto the current settings.
    pub fn apply_to(self, current: &ServerSettings) -> ServerSettings {
        let mut next = current.clone();
        if let Some(ms) = self.global_delay {
            next.global_delay = if ms == 0 {
                None
            } else {
                Some(Duration::from_millis(ms))
            };
        }
        if let Some(status) = self.fallback_status {
            next.fallback_status = status;
        }
        if let Some(capacity) = self.request_log_capacity {
            next.request_log_capacity = if capacity < 0 {
                None
            } else {
                Some(capacity as usize)
            };
        }
        if let Some(allow) = self.allow_partial {
            next.allow_partial = allow;
        }
        if let Some(threshold) = self.partial_match_threshold {
            next.partial_match_threshold = threshold;
        }
        if let Some(ms) = self.request_logging_delay {
            next.request_logging_delay = if ms == 0 {
                None
            } else {
                Some(Duration::from_millis(ms))
            };
        }
        next
    }
}
