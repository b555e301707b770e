//! Handlers for the `/__admin` endpoints.

use super::{AdminError, MappingDto, RequestPatternDto, SettingsDto};
use crate::journal::{LogEntry, ServeOutcome};
use crate::message::is_json_content_type;
use crate::settings::ServerContext;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type AdminResponse = Response<Full<Bytes>>;

// ============================================================================
// Response helpers
// ============================================================================

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> AdminResponse {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("{}"))))
}

pub fn error_response(status: StatusCode, message: &str) -> AdminResponse {
    json_response(status, &serde_json::json!({ "errors": [message] }))
}

pub fn not_found() -> AdminResponse {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

fn admin_error(e: AdminError) -> AdminResponse {
    match e {
        AdminError::BadRequest(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
        AdminError::NotFound => not_found(),
    }
}

/// Parse a JSON admin body, tolerating any charset parameter on the
/// `application/json` content type.
fn parse_json_body<T: for<'de> Deserialize<'de>>(
    content_type: Option<&str>,
    body: &Bytes,
) -> Result<T, AdminError> {
    if let Some(ct) = content_type {
        if !is_json_content_type(ct) {
            return Err(AdminError::BadRequest(format!(
                "unsupported content type: {ct}"
            )));
        }
    }
    serde_json::from_slice(body).map_err(|e| AdminError::BadRequest(format!("invalid JSON: {e}")))
}

// ============================================================================
// Mappings
// ============================================================================

pub fn list_mappings(ctx: &Arc<ServerContext>) -> AdminResponse {
    let mappings: Vec<MappingDto> = ctx.store.list().iter().map(|m| MappingDto::from(m.as_ref())).collect();
    json_response(StatusCode::OK, &mappings)
}

pub fn add_mapping(
    ctx: &Arc<ServerContext>,
    content_type: Option<&str>,
    body: &Bytes,
) -> AdminResponse {
    let dto: MappingDto = match parse_json_body(content_type, body) {
        Ok(d) => d,
        Err(e) => return admin_error(e),
    };
    let mapping = match dto.into_mapping() {
        Ok(m) => m,
        Err(e) => return admin_error(e),
    };
    let id = mapping.id;
    if let Err(e) = ctx.store.add(mapping) {
        return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }
    info!(%id, "mapping added via admin API");
    json_response(
        StatusCode::CREATED,
        &serde_json::json!({ "status": "Mapping added", "id": id }),
    )
}

pub fn replace_mapping(
    ctx: &Arc<ServerContext>,
    id: Uuid,
    content_type: Option<&str>,
    body: &Bytes,
) -> AdminResponse {
    let dto: MappingDto = match parse_json_body(content_type, body) {
        Ok(d) => d,
        Err(e) => return admin_error(e),
    };
    let mapping = match dto.into_mapping() {
        Ok(mut m) => {
            // The path id is authoritative.
            m.id = id;
            m
        }
        Err(e) => return admin_error(e),
    };
    match ctx.store.update(mapping) {
        Ok(()) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "status": "Mapping replaced", "id": id }),
        ),
        Err(e) => error_response(StatusCode::NOT_FOUND, &e.to_string()),
    }
}

pub fn delete_mapping(ctx: &Arc<ServerContext>, id: Uuid) -> AdminResponse {
    match ctx.store.delete(id) {
        Ok(()) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "status": "Mapping deleted" }),
        ),
        Err(e) => error_response(StatusCode::NOT_FOUND, &e.to_string()),
    }
}

pub fn reset_mappings(ctx: &Arc<ServerContext>) -> AdminResponse {
    ctx.store.reset();
    ctx.scenarios.reset();
    info!("mappings reset via admin API");

    // Watched static mappings are re-read on reset.
    let settings = ctx.settings();
    if settings.watch_static_mappings {
        if let Some(dir) = &settings.static_mappings_dir {
            if let Err(e) = super::load_static_mappings(ctx, dir) {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
            }
        }
    }

    json_response(
        StatusCode::OK,
        &serde_json::json!({ "status": "Mappings reset" }),
    )
}

// ============================================================================
// Request log
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoggedRequestDto {
    method: String,
    url: String,
    absolute_url: String,
    path: String,
    headers: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    cookies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    body: String,
    client_ip: String,
    logged_date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoggedResponseDto {
    status: u16,
    headers: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartialCandidateDto {
    mapping_id: Uuid,
    score: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimingDto {
    started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched: Option<DateTime<Utc>>,
    completed: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyDto {
    target_url: String,
    latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogEntryDto {
    id: Uuid,
    request: LoggedRequestDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched_mapping_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    partial_match_candidates: Vec<PartialCandidateDto>,
    response: LoggedResponseDto,
    timing: TimingDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<ProxyDto>,
    outcome: String,
}

fn multimap_to_btree<'a>(
    entries: impl Iterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in entries {
        out.entry(name.to_string()).or_default().push(value.to_string());
    }
    out
}

fn outcome_str(outcome: ServeOutcome) -> &'static str {
    match outcome {
        ServeOutcome::Served => "served",
        ServeOutcome::NoMatch => "noMatch",
        ServeOutcome::Canceled => "canceled",
        ServeOutcome::Error => "error",
    }
}

fn entry_to_dto(entry: &LogEntry) -> LogEntryDto {
    LogEntryDto {
        id: entry.id,
        request: LoggedRequestDto {
            method: entry.request.method.clone(),
            url: entry.request.relative_url.clone(),
            absolute_url: entry.request.url.clone(),
            path: entry.request.path.clone(),
            headers: multimap_to_btree(entry.request.headers.iter()),
            cookies: entry
                .request
                .cookies
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: entry.request.body.text.clone(),
            client_ip: entry.request.client_ip.clone(),
            logged_date: entry.request.received_at,
        },
        matched_mapping_id: entry.matched_mapping_id,
        partial_match_candidates: entry
            .partial_candidates
            .iter()
            .map(|c| PartialCandidateDto {
                mapping_id: c.mapping_id,
                score: c.score,
            })
            .collect(),
        response: LoggedResponseDto {
            status: entry.response.status,
            headers: multimap_to_btree(entry.response.headers.iter()),
            body: String::from_utf8_lossy(&entry.response.body).into_owned(),
        },
        timing: TimingDto {
            started: entry.timing.started,
            matched: entry.timing.matched_at,
            completed: entry.timing.completed_at,
        },
        proxy: entry.proxy.as_ref().map(|p| ProxyDto {
            target_url: p.target_url.clone(),
            latency_ms: p.latency.as_millis() as u64,
            error: p.error.clone(),
        }),
        outcome: outcome_str(entry.outcome).to_string(),
    }
}

pub fn list_requests(ctx: &Arc<ServerContext>) -> AdminResponse {
    let entries: Vec<LogEntryDto> = ctx
        .journal
        .list(None)
        .iter()
        .map(|e| entry_to_dto(e))
        .collect();
    json_response(StatusCode::OK, &entries)
}

pub fn reset_requests(ctx: &Arc<ServerContext>) -> AdminResponse {
    ctx.journal.reset();
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "status": "Requests reset" }),
    )
}

/// Find log entries whose stored request matches a posted pattern.
pub fn find_requests(
    ctx: &Arc<ServerContext>,
    content_type: Option<&str>,
    body: &Bytes,
) -> AdminResponse {
    let pattern: RequestPatternDto = match parse_json_body(content_type, body) {
        Ok(p) => p,
        Err(e) => return admin_error(e),
    };
    let tree = match pattern.into_tree() {
        Ok(t) => t,
        Err(e) => return admin_error(e),
    };
    let entries: Vec<LogEntryDto> = ctx
        .journal
        .list(Some(&tree))
        .iter()
        .map(|e| entry_to_dto(e))
        .collect();
    json_response(StatusCode::OK, &entries)
}

// ============================================================================
// Scenarios
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScenarioStateDto {
    state: String,
}

pub fn set_scenario_state(
    ctx: &Arc<ServerContext>,
    name: &str,
    content_type: Option<&str>,
    body: &Bytes,
) -> AdminResponse {
    let dto: ScenarioStateDto = match parse_json_body(content_type, body) {
        Ok(d) => d,
        Err(e) => return admin_error(e),
    };
    ctx.scenarios.set_state(name, &dto.state);
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "scenario": name, "state": dto.state }),
    )
}

// ============================================================================
// Settings
// ============================================================================

pub fn get_settings(ctx: &Arc<ServerContext>) -> AdminResponse {
    json_response(StatusCode::OK, &SettingsDto::from_settings(&ctx.settings()))
}

pub fn update_settings(
    ctx: &Arc<ServerContext>,
    content_type: Option<&str>,
    body: &Bytes,
) -> AdminResponse {
    let dto: SettingsDto = match parse_json_body(content_type, body) {
        Ok(d) => d,
        Err(e) => return admin_error(e),
    };
    let next = dto.apply_to(&ctx.settings());
    ctx.apply_settings(next);
    get_settings(ctx)
}
