//! Response generation for the winning mapping: static, templated, proxy,
//! and callback paths, plus delay application.
//!
//! Delays are cancelable: a shutdown signal aborts the sleep and the
//! request is reported as canceled. The proxy path checks the same signal
//! before dispatch and never holds a store lock across the outbound call.

use super::proxy::{self, ProxyError};
use super::templating::{self, has_placeholders, TemplateContext, TemplateError};
use crate::journal::ProxyMetadata;
use crate::mapping::{BodySpec, Mapping, ResponseSpec, ResponseTemplate};
use crate::message::{HeaderMultimap, RequestMessage, ResponseBody, ResponseMessage};
use crate::settings::ServerContext;
use base64::Engine as _;
use bytes::Bytes;
use rand::Rng;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("request canceled")]
    Canceled,
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("body file unreadable: {0}")]
    BodyFile(std::io::Error),
}

/// The generated response plus proxy bookkeeping for the journal.
pub struct GeneratedResponse {
    pub response: ResponseMessage,
    pub proxy: Option<ProxyMetadata>,
}

/// Produce the response for `mapping`, applying per-mapping and global
/// delays before returning.
pub async fn generate(
    ctx: &ServerContext,
    mapping: &Mapping,
    request: &RequestMessage,
    cancel: &mut broadcast::Receiver<()>,
) -> Result<GeneratedResponse, EngineError> {
    let scenario_state = mapping
        .scenario
        .as_ref()
        .map(|clause| ctx.scenarios.state_of(&clause.name));

    let (mut response, proxy_meta) = match &mapping.response {
        ResponseSpec::Static(template) => (
            build_static(template, request, scenario_state.as_deref()).await?,
            None,
        ),
        ResponseSpec::Callback(callback) => (callback.respond(request), None),
        ResponseSpec::Proxy(spec) => {
            // Cooperative cancellation point: nothing upstream has been
            // touched yet.
            let dedicated = match proxy::client_for(spec) {
                Ok(client) => client,
                Err(e) => {
                    warn!("proxy client setup failed: {e}");
                    return Ok(GeneratedResponse {
                        response: proxy_failure_response(&e.to_string()),
                        proxy: Some(ProxyMetadata {
                            target_url: spec.base_url.clone(),
                            latency: Duration::ZERO,
                            error: Some(e.to_string()),
                        }),
                    });
                }
            };
            let client = dedicated.as_ref().unwrap_or_else(|| ctx.http_client());

            let forwarded = tokio::select! {
                outcome = proxy::forward(client, spec, request) => outcome,
                _ = cancel.recv() => return Err(EngineError::Canceled),
            };
            match forwarded {
                Ok(outcome) => {
                    if spec.save_mapping {
                        let recorded = proxy::mapping_from_exchange(
                            request,
                            &outcome.response,
                            mapping.priority,
                        );
                        debug!(id = %recorded.id, "saved mapping from proxy response");
                        if let Err(e) = ctx.store.add(recorded) {
                            warn!("could not save recorded mapping: {e}");
                        }
                    }
                    (outcome.response, Some(outcome.metadata))
                }
                Err(e @ ProxyError::Upstream(_)) | Err(e @ ProxyError::ClientCert(_)) => {
                    warn!("proxy request failed: {e}");
                    (
                        proxy_failure_response(&e.to_string()),
                        Some(ProxyMetadata {
                            target_url: spec.base_url.clone(),
                            latency: Duration::ZERO,
                            error: Some(e.to_string()),
                        }),
                    )
                }
            }
        }
    };

    // Faults bypass the reserved-header rule; everything else is
    // sanitized before emission.
    if response.fault.is_none() {
        response.sanitize_headers();
    }

    // Draw the random delay before any await: ThreadRng is not Send.
    let delay = total_delay(mapping, ctx);
    if let Some(duration) = delay {
        response.delay = Some(duration);
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = cancel.recv() => return Err(EngineError::Canceled),
        }
    }

    Ok(GeneratedResponse {
        response,
        proxy: proxy_meta,
    })
}

/// Per-mapping delay (fixed wins over random) plus the store-wide global
/// delay.
fn total_delay(mapping: &Mapping, ctx: &ServerContext) -> Option<Duration> {
    let per_mapping = if let Some(fixed) = mapping.timing.fixed_delay {
        Some(fixed)
    } else {
        mapping.timing.random_delay.map(|range| {
            let ms = if range.max_ms > range.min_ms {
                rand::thread_rng().gen_range(range.min_ms..=range.max_ms)
            } else {
                range.min_ms
            };
            Duration::from_millis(ms)
        })
    };
    let global = ctx.settings().global_delay;

    match (per_mapping, global) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(Duration::ZERO) + b.unwrap_or(Duration::ZERO)),
    }
}

async fn build_static(
    template: &ResponseTemplate,
    request: &RequestMessage,
    scenario_state: Option<&str>,
) -> Result<ResponseMessage, EngineError> {
    let mut tpl_ctx = TemplateContext::new(request);
    if let Some(state) = scenario_state {
        tpl_ctx = tpl_ctx.with_scenario_state(state);
    }

    let mut headers = HeaderMultimap::new();
    for (name, value) in &template.headers {
        let value = if template.templated && has_placeholders(value) {
            templating::render(value, &tpl_ctx)?
        } else {
            value.clone()
        };
        headers.append(name, value);
    }

    let body = match &template.body {
        BodySpec::Empty => ResponseBody::Empty,
        BodySpec::Text(text) => {
            if template.templated && has_placeholders(text) {
                ResponseBody::Text(templating::render(text, &tpl_ctx)?)
            } else {
                ResponseBody::Text(text.clone())
            }
        }
        BodySpec::Json(value) => {
            if template.templated {
                let rendered = templating::render(&value.to_string(), &tpl_ctx)?;
                match serde_json::from_str(&rendered) {
                    Ok(json) => ResponseBody::Json(json),
                    // Substitution broke the JSON shape; serve it as text.
                    Err(_) => ResponseBody::Text(rendered),
                }
            } else {
                ResponseBody::Json(value.clone())
            }
        }
        BodySpec::Base64(encoded) => {
            match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(decoded) => ResponseBody::Bytes(Bytes::from(decoded)),
                Err(e) => {
                    warn!("base64 body did not decode: {e}, serving raw text");
                    ResponseBody::Text(encoded.clone())
                }
            }
        }
        BodySpec::File(path) => {
            let bytes = tokio::fs::read(path).await.map_err(EngineError::BodyFile)?;
            ResponseBody::Bytes(Bytes::from(bytes))
        }
    };

    Ok(ResponseMessage {
        status: template.status,
        headers,
        body,
        delay: None,
        fault: template.fault,
    })
}

/// 502 diagnostic for upstream failures; the engine keeps serving.
fn proxy_failure_response(error: &str) -> ResponseMessage {
    let mut response = ResponseMessage::with_status(502);
    response.headers.append("Content-Type", "application/json");
    response.body = ResponseBody::Json(serde_json::json!({ "error": format!("proxy: {error}") }));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{RequestPatternBuilder, ResponseTemplateBuilder};
    use crate::message::Fault;
    use crate::settings::{ServerContext, ServerSettings};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Instant;

    fn ctx() -> Arc<ServerContext> {
        ServerContext::with_defaults()
    }

    fn static_mapping(template: ResponseTemplateBuilder) -> Mapping {
        Mapping::builder()
            .request(RequestPatternBuilder::new().path("/x"))
            .respond_with(template)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn static_path_copies_the_template() {
        let ctx = ctx();
        let mapping = static_mapping(
            ResponseTemplateBuilder::new()
                .status(201)
                .header("X-K", "v")
                .body("created"),
        );
        let req = RequestMessage::builder().path("/x").build();
        let mut cancel = ctx.shutdown_signal();

        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        assert_eq!(out.response.status, 201);
        assert_eq!(out.response.headers.get("x-k"), Some("v"));
        assert_eq!(out.response.body.to_bytes(), Bytes::from("created"));
    }

    #[tokio::test]
    async fn reserved_headers_are_stripped_from_static_responses() {
        let ctx = ctx();
        let mapping = static_mapping(
            ResponseTemplateBuilder::new()
                .header("Transfer-Encoding", "chunked")
                .header("Connection", "keep-alive")
                .header("X-Keep", "yes"),
        );
        let req = RequestMessage::builder().path("/x").build();
        let mut cancel = ctx.shutdown_signal();

        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        assert!(!out.response.headers.contains("transfer-encoding"));
        assert!(!out.response.headers.contains("connection"));
        assert_eq!(out.response.headers.get("x-keep"), Some("yes"));
    }

    #[tokio::test]
    async fn fault_responses_keep_their_headers() {
        let ctx = ctx();
        let mapping = static_mapping(
            ResponseTemplateBuilder::new()
                .header("Transfer-Encoding", "chunked")
                .fault(Fault::EmptyResponse),
        );
        let req = RequestMessage::builder().path("/x").build();
        let mut cancel = ctx.shutdown_signal();

        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        assert_eq!(out.response.fault, Some(Fault::EmptyResponse));
        assert!(out.response.headers.contains("transfer-encoding"));
    }

    #[tokio::test]
    async fn templated_body_renders_request_fields() {
        let ctx = ctx();
        let mapping = static_mapping(
            ResponseTemplateBuilder::new()
                .body("{{request.method}} {{request.query.id}}")
                .templated(),
        );
        let req = RequestMessage::builder()
            .method("POST")
            .path("/x")
            .query("id=9")
            .build();
        let mut cancel = ctx.shutdown_signal();

        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        assert_eq!(out.response.body.to_bytes(), Bytes::from("POST 9"));
    }

    #[tokio::test]
    async fn malformed_template_is_a_template_error() {
        let ctx = ctx();
        let mapping =
            static_mapping(ResponseTemplateBuilder::new().body("{{request.path").templated());
        let req = RequestMessage::builder().path("/x").build();
        let mut cancel = ctx.shutdown_signal();

        let err = generate(&ctx, &mapping, &req, &mut cancel).await;
        assert!(matches!(err, Err(EngineError::Template(_))));
    }

    #[tokio::test]
    async fn callback_path_invokes_user_code() {
        let ctx = ctx();
        let mapping = Mapping::builder()
            .callback(Arc::new(|req: &RequestMessage| {
                let mut r = ResponseMessage::with_status(418);
                r.body = ResponseBody::Text(format!("callback for {}", req.path));
                r
            }))
            .build()
            .unwrap();
        let req = RequestMessage::builder().path("/tea").build();
        let mut cancel = ctx.shutdown_signal();

        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        assert_eq!(out.response.status, 418);
        assert_eq!(out.response.body.to_bytes(), Bytes::from("callback for /tea"));
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_is_applied_and_recorded() {
        let ctx = ctx();
        let mapping = Mapping::builder()
            .respond_with(ResponseTemplateBuilder::new().status(200))
            .fixed_delay(Duration::from_millis(250))
            .build()
            .unwrap();
        let req = RequestMessage::builder().build();
        let mut cancel = ctx.shutdown_signal();

        let before = Instant::now();
        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        // Paused time: the sleep auto-advances, so only the recorded delay
        // is asserted.
        assert_eq!(out.response.delay, Some(Duration::from_millis(250)));
        assert!(before.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn global_delay_adds_to_per_mapping_delay() {
        let ctx = ServerContext::new(ServerSettings {
            global_delay: Some(Duration::from_millis(200)),
            ..ServerSettings::default()
        });
        let mapping = Mapping::builder()
            .fixed_delay(Duration::from_millis(100))
            .build()
            .unwrap();
        let req = RequestMessage::builder().build();
        let mut cancel = ctx.shutdown_signal();

        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        assert_eq!(out.response.delay, Some(Duration::from_millis(300)));
    }

    #[tokio::test]
    async fn random_delay_draws_within_the_inclusive_range() {
        let ctx = ctx();
        let mapping = Mapping::builder().random_delay(1, 3).build().unwrap();
        for _ in 0..20 {
            let delay = total_delay(&mapping, &ctx).unwrap();
            let ms = delay.as_millis() as u64;
            assert!((1..=3).contains(&ms), "drew {ms}ms");
        }
    }

    #[tokio::test]
    async fn shutdown_cancels_a_pending_delay() {
        let ctx = ctx();
        let mapping = Mapping::builder()
            .fixed_delay(Duration::from_secs(600))
            .build()
            .unwrap();
        let req = RequestMessage::builder().build();
        let mut cancel = ctx.shutdown_signal();

        let ctx2 = Arc::clone(&ctx);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx2.trigger_shutdown();
        });

        let err = generate(&ctx, &mapping, &req, &mut cancel).await;
        assert!(matches!(err, Err(EngineError::Canceled)));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn base64_bodies_decode_to_bytes() {
        let ctx = ctx();
        let mapping = static_mapping(ResponseTemplateBuilder::new().base64_body("aGVsbG8="));
        let req = RequestMessage::builder().build();
        let mut cancel = ctx.shutdown_signal();

        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        assert_eq!(out.response.body.to_bytes(), Bytes::from("hello"));
    }

    #[tokio::test]
    async fn scenario_state_is_visible_to_templates() {
        let ctx = ctx();
        ctx.scenarios.set_state("checkout", "paid");
        let mapping = Mapping::builder()
            .in_scenario("checkout")
            .respond_with(
                ResponseTemplateBuilder::new()
                    .body("state={{scenario.state}}")
                    .templated(),
            )
            .build()
            .unwrap();
        let req = RequestMessage::builder().build();
        let mut cancel = ctx.shutdown_signal();

        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        assert_eq!(out.response.body.to_bytes(), Bytes::from("state=paid"));
    }

    #[tokio::test]
    async fn json_template_bodies_render_and_reparse() {
        let ctx = ctx();
        let mapping = static_mapping(
            ResponseTemplateBuilder::new()
                .json_body(json!({"echo": "{{request.query.v}}"}))
                .templated(),
        );
        let req = RequestMessage::builder().query("v=42").build();
        let mut cancel = ctx.shutdown_signal();

        let out = generate(&ctx, &mapping, &req, &mut cancel).await.unwrap();
        match out.response.body {
            ResponseBody::Json(v) => assert_eq!(v, json!({"echo": "42"})),
            other => panic!("expected JSON body, got {other:?}"),
        }
    }
}
