//! Response templating: `{{...}}` placeholders rendered against the
//! matched request.
//!
//! The document tree exposes `request.{method, url, path, absoluteurl,
//! query, headers, cookies, body, bodyAsJson}`, plus `now`, `guid`,
//! `random`, and `scenario.state`. Unknown references resolve to the empty
//! string; rendering is deterministic given the request except for `now`,
//! `guid`, and `random`.

use crate::matching::{node_as_string, select_nodes};
use crate::message::RequestMessage;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-\$\[\]\*]+)\s*\}\}")
            .unwrap_or_else(|_| unreachable!())
    })
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("malformed placeholder near: {0}")]
    Malformed(String),
}

/// Everything a template can reference.
pub struct TemplateContext<'a> {
    pub request: &'a RequestMessage,
    /// State of the winning mapping's scenario, if it has one.
    pub scenario_state: Option<&'a str>,
}

impl<'a> TemplateContext<'a> {
    pub fn new(request: &'a RequestMessage) -> Self {
        Self {
            request,
            scenario_state: None,
        }
    }

    pub fn with_scenario_state(mut self, state: &'a str) -> Self {
        self.scenario_state = Some(state);
        self
    }

    fn resolve(&self, reference: &str) -> String {
        match reference {
            "now" => chrono::Utc::now().to_rfc3339(),
            "guid" => Uuid::new_v4().to_string(),
            "random" => rand::thread_rng().gen::<u32>().to_string(),
            "scenario.state" => self.scenario_state.unwrap_or_default().to_string(),
            other => self.resolve_request(other),
        }
    }

    fn resolve_request(&self, reference: &str) -> String {
        let Some(path) = reference.strip_prefix("request.") else {
            return String::new();
        };
        let req = self.request;
        match path {
            "method" => return req.method.clone(),
            "url" => return req.relative_url.clone(),
            "absoluteurl" => return req.url.clone(),
            "path" => return req.path.clone(),
            "body" => return req.body.text.clone(),
            _ => {}
        }
        if let Some(name) = path.strip_prefix("query.") {
            return req.query.get(name).unwrap_or_default().to_string();
        }
        if let Some(name) = path.strip_prefix("headers.") {
            return req.headers.get(name).unwrap_or_default().to_string();
        }
        if let Some(name) = path.strip_prefix("cookies.") {
            return req.cookies.get(name).cloned().unwrap_or_default();
        }
        if let Some(json_path) = path.strip_prefix("bodyAsJson") {
            let json_path = json_path.strip_prefix('.').unwrap_or(json_path);
            if let Some(root) = &req.body.json {
                let nodes = select_nodes(root, json_path);
                if let Some(first) = nodes.first() {
                    return node_as_string(first);
                }
            }
            return String::new();
        }
        String::new()
    }
}

/// Substitute every placeholder in `template`. A stray `{{` with no
/// closing brace is a malformed template.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
    // Validate against the template itself, not the rendered output, so
    // substituted values containing braces cannot trip the check.
    let residue = placeholder_regex().replace_all(template, "");
    if let Some(pos) = residue.find("{{") {
        let tail: String = residue[pos..].chars().take(32).collect();
        return Err(TemplateError::Malformed(tail));
    }

    Ok(placeholder_regex()
        .replace_all(template, |caps: &regex::Captures| ctx.resolve(&caps[1]))
        .to_string())
}

/// Cheap pre-check so non-templated strings skip the regex pass.
pub fn has_placeholders(s: &str) -> bool {
    s.contains("{{")
}
