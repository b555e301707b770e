//! The stub server: listeners, the request pipeline, and teardown.
//!
//! Each inbound request is handled on its own task. The pipeline takes one
//! store snapshot, runs the matching algorithm, generates the response,
//! commits the scenario transition, fires webhooks, and appends a journal
//! entry. The `/__admin` surface shares the same listeners.

use crate::admin;
use crate::engine::responder::{self, EngineError};
use crate::engine::{match_request, MatchOutcome};
use crate::journal::{LogEntry, LogTiming, ResponseSnapshot, ServeOutcome};
use crate::mapping::{Mapping, Webhook};
use crate::message::{Fault, HeaderMultimap, RequestMessage, ResponseBody, ResponseMessage};
use crate::settings::ServerContext;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Frame, Incoming, SizeHint};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::io::Read;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long teardown waits for in-flight requests.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// How often a lost scenario CAS triggers a re-match before giving up.
const SCENARIO_RETRY_LIMIT: usize = 8;

/// Egress bodies are emitted in frames of this size so cancellation has a
/// boundary to act on.
const EGRESS_CHUNK_SIZE: usize = 64 * 1024;

/// Unified body type for everything the server emits.
pub type WireBody = BoxBody<Bytes, Infallible>;

/// Response body emitted chunk by chunk. The stop signal is checked
/// cooperatively at every chunk boundary; once it fires, remaining chunks
/// are dropped and the stream ends early.
pub struct EgressBody {
    chunks: VecDeque<Bytes>,
    cancel: broadcast::Receiver<()>,
    canceled: bool,
}

impl EgressBody {
    pub fn new(body: Bytes, cancel: broadcast::Receiver<()>) -> Self {
        let mut chunks = VecDeque::new();
        let mut rest = body;
        while rest.len() > EGRESS_CHUNK_SIZE {
            chunks.push_back(rest.split_to(EGRESS_CHUNK_SIZE));
        }
        if !rest.is_empty() {
            chunks.push_back(rest);
        }
        Self {
            chunks,
            cancel,
            canceled: false,
        }
    }
}

impl hyper::body::Body for EgressBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if !this.canceled {
            match this.cancel.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    this.canceled = true;
                    this.chunks.clear();
                }
                Err(_) => {}
            }
        }
        match this.chunks.pop_front() {
            Some(chunk) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.canceled || self.chunks.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        let remaining: u64 = self.chunks.iter().map(|c| c.len() as u64).sum();
        SizeHint::with_exact(remaining)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// One running stub server: a set of listeners over a shared context.
pub struct StubServer {
    ctx: Arc<ServerContext>,
    listeners: Vec<TcpListener>,
}

impl StubServer {
    /// Bind every address up front so configuration errors surface before
    /// any traffic is accepted.
    pub async fn bind(ctx: Arc<ServerContext>, addrs: &[SocketAddr]) -> Result<Self, ServerError> {
        let mut listeners = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: *addr,
                    source,
                })?;
            info!("listening on http://{}", listener.local_addr().unwrap_or(*addr));
            listeners.push(listener);
        }
        Ok(Self { ctx, listeners })
    }

    /// Bound addresses, in bind order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Accept connections until shutdown is triggered, then drain in-flight
    /// requests up to a deadline.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut accept_tasks = JoinSet::new();
        for listener in self.listeners {
            let ctx = Arc::clone(&self.ctx);
            accept_tasks.spawn(accept_loop(listener, ctx));
        }

        while let Some(result) = accept_tasks.join_next().await {
            if let Err(e) = result {
                error!("accept loop panicked: {e}");
            }
        }
        info!("all listeners stopped");
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) {
    let mut shutdown = ctx.shutdown_signal();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, client_addr)) => {
                        let ctx = Arc::clone(&ctx);
                        connections.spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let ctx = Arc::clone(&ctx);
                                async move { handle_request(req, ctx, client_addr).await }
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!("connection error: {e}");
                            }
                        });
                    }
                    Err(e) => error!("accept error: {e}"),
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }

    // Stop accepting, then drain what is already in flight.
    drop(listener);
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(DRAIN_DEADLINE, drain).await.is_err() {
        warn!("drain deadline hit, aborting remaining connections");
        connections.abort_all();
    }
}

/// Entry point for one HTTP exchange: route to the admin surface or the
/// stub pipeline.
async fn handle_request(
    req: Request<Incoming>,
    ctx: Arc<ServerContext>,
    client_addr: SocketAddr,
) -> Result<Response<WireBody>, Infallible> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();

    // Capture headers in arrival order before consuming the body.
    let mut headers = HeaderMultimap::new();
    for (name, value) in req.headers() {
        headers.append(name.as_str(), value.to_str().unwrap_or(""));
    }
    let content_type = headers.get("content-type").map(str::to_string);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!("failed to read request body: {e}");
            Bytes::new()
        }
    };

    if let Some(admin_path) = path.strip_prefix("/__admin") {
        if ctx.settings().admin_enabled {
            let admin_path = if admin_path.is_empty() { "/" } else { admin_path };
            let resp = admin::router::route(
                &ctx,
                &method,
                admin_path,
                content_type.as_deref(),
                &body,
            );
            return Ok(resp.map(|b| b.boxed()));
        }
    }

    // Decompress before anything downstream sees the body.
    let body = match headers.get("content-encoding") {
        Some(encoding) => decompress_body(encoding, body),
        None => body,
    };

    let host = headers.get("host").unwrap_or("localhost").to_string();
    let url = format!(
        "http://{host}{}{}",
        uri.path(),
        uri.query().map(|q| format!("?{q}")).unwrap_or_default()
    );

    let request = RequestMessage::new(
        method.as_str(),
        &url,
        uri.path(),
        uri.query(),
        headers,
        body,
        &client_addr.ip().to_string(),
    );

    let response = serve(&ctx, request).await;
    Ok(response)
}

/// Decode a request body per its `Content-Encoding`. Undecodable payloads
/// are passed through untouched.
pub fn decompress_body(encoding: &str, body: Bytes) -> Bytes {
    match encoding.to_ascii_lowercase().as_str() {
        "gzip" => {
            let mut out = Vec::new();
            match GzDecoder::new(body.as_ref()).read_to_end(&mut out) {
                Ok(_) => Bytes::from(out),
                Err(e) => {
                    warn!("gzip body did not decode: {e}");
                    body
                }
            }
        }
        "deflate" => {
            // Zlib-wrapped per the RFC, but plenty of clients send raw
            // deflate streams.
            let mut out = Vec::new();
            if ZlibDecoder::new(body.as_ref()).read_to_end(&mut out).is_ok() {
                return Bytes::from(out);
            }
            out.clear();
            match DeflateDecoder::new(body.as_ref()).read_to_end(&mut out) {
                Ok(_) => Bytes::from(out),
                Err(e) => {
                    warn!("deflate body did not decode: {e}");
                    body
                }
            }
        }
        "identity" | "" => body,
        other => {
            warn!("unsupported content encoding: {other}");
            body
        }
    }
}

/// Run the full pipeline for one normalized request and return the wire
/// response.
pub async fn serve(ctx: &Arc<ServerContext>, request: RequestMessage) -> Response<WireBody> {
    let started = Utc::now();
    let settings = ctx.settings();

    let mut attempts = 0;
    loop {
        // One consistent snapshot per matching attempt.
        let snapshot = ctx.store.snapshot();
        let outcome = match_request(&snapshot, &ctx.scenarios, &settings, &request);
        let matched_at = Utc::now();

        let Some(winner) = outcome.winner.clone() else {
            let response = ResponseMessage::with_status(settings.fallback_status);
            let wire = build_wire_response(&response, ctx.shutdown_signal());
            commit_log(
                ctx,
                &request,
                &outcome,
                None,
                &response,
                started,
                Some(matched_at),
                ServeOutcome::NoMatch,
                None,
            );
            debug!(
                path = %request.path,
                candidates = outcome.partial_candidates.len(),
                "no mapping matched"
            );
            return wire;
        };

        let mut cancel = ctx.shutdown_signal();
        match responder::generate(ctx, &winner, &request, &mut cancel).await {
            Ok(generated) => {
                // Transition after response generation has begun, before
                // the log commit. A lost CAS means another request moved
                // the scenario first; re-evaluate against the new state.
                if let Some(clause) = &winner.scenario {
                    if let Some(new_state) = &clause.new_state {
                        let swapped = ctx.scenarios.transition(
                            &clause.name,
                            clause.required_state.as_deref(),
                            new_state,
                        );
                        if !swapped && clause.required_state.is_some() {
                            attempts += 1;
                            if attempts < SCENARIO_RETRY_LIMIT {
                                continue;
                            }
                            warn!(scenario = %clause.name, "scenario contention retry limit hit");
                        }
                    }
                }

                let serve_outcome = if generated
                    .proxy
                    .as_ref()
                    .is_some_and(|p| p.error.is_some())
                {
                    ServeOutcome::Error
                } else {
                    ServeOutcome::Served
                };

                let wire = build_wire_response(&generated.response, ctx.shutdown_signal());
                commit_log(
                    ctx,
                    &request,
                    &outcome,
                    Some(winner.id),
                    &generated.response,
                    started,
                    Some(matched_at),
                    serve_outcome,
                    generated.proxy,
                );
                fire_webhooks(ctx, &winner, &request).await;
                return wire;
            }
            Err(EngineError::Canceled) => {
                let response = ResponseMessage::with_status(503);
                let wire = build_wire_response(&response, ctx.shutdown_signal());
                commit_log(
                    ctx,
                    &request,
                    &outcome,
                    Some(winner.id),
                    &response,
                    started,
                    Some(matched_at),
                    ServeOutcome::Canceled,
                    None,
                );
                return wire;
            }
            Err(e @ EngineError::Template(_)) | Err(e @ EngineError::BodyFile(_)) => {
                warn!("response generation failed: {e}");
                let mut response = ResponseMessage::with_status(500);
                response.headers.append("Content-Type", "application/json");
                response.body = ResponseBody::Json(serde_json::json!({
                    "error": e.to_string()
                }));
                let wire = build_wire_response(&response, ctx.shutdown_signal());
                commit_log(
                    ctx,
                    &request,
                    &outcome,
                    Some(winner.id),
                    &response,
                    started,
                    Some(matched_at),
                    ServeOutcome::Error,
                    None,
                );
                return wire;
            }
        }
    }
}

/// Turn an engine response into the hyper response actually emitted,
/// applying fault directives. The body goes out through [`EgressBody`],
/// giving cancellation a boundary between chunks.
pub fn build_wire_response(
    response: &ResponseMessage,
    cancel: broadcast::Receiver<()>,
) -> Response<WireBody> {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = match response.fault {
        Some(Fault::EmptyResponse) => Bytes::new(),
        Some(Fault::MalformedResponse) => {
            // Garbage bytes in place of the declared body.
            Bytes::from_static(b"\x00\xff\xfe\xfd\x1f\x8b\x08\x00")
        }
        Some(Fault::AbortAfterBytes(n)) => {
            let full = response.body.to_bytes();
            full.slice(..n.min(full.len()))
        }
        None => response.body.to_bytes(),
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers.iter() {
        builder = builder.header(name, value);
    }
    if response.fault.is_some() {
        // Signal the transport to drop the connection after this exchange.
        builder = builder.header("Connection", "close");
    }

    builder
        .body(EgressBody::new(body, cancel).boxed())
        .unwrap_or_else(|_| {
            Response::new(Full::new(Bytes::from("response build error")).boxed())
        })
}

#[allow(clippy::too_many_arguments)]
fn commit_log(
    ctx: &Arc<ServerContext>,
    request: &RequestMessage,
    outcome: &MatchOutcome,
    matched_mapping_id: Option<Uuid>,
    response: &ResponseMessage,
    started: DateTime<Utc>,
    matched_at: Option<DateTime<Utc>>,
    serve_outcome: ServeOutcome,
    proxy: Option<crate::journal::ProxyMetadata>,
) {
    let entry = LogEntry {
        id: Uuid::new_v4(),
        request: request.clone(),
        matched_mapping_id,
        partial_candidates: outcome.partial_candidates.clone(),
        response: ResponseSnapshot {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.to_bytes(),
        },
        timing: LogTiming {
            started,
            matched_at,
            completed_at: Utc::now(),
        },
        proxy,
        outcome: serve_outcome,
    };

    match ctx.settings().request_logging_delay {
        Some(delay) => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                ctx.journal.append(entry);
            });
        }
        None => ctx.journal.append(entry),
    }
}

/// Fire a mapping's webhooks; fire-and-forget mappings do not delay the
/// response.
async fn fire_webhooks(ctx: &Arc<ServerContext>, mapping: &Mapping, request: &RequestMessage) {
    if mapping.webhooks.is_empty() {
        return;
    }
    let client = ctx.http_client().clone();
    let webhooks = mapping.webhooks.clone();
    let request = request.clone();

    if mapping.webhooks_fire_and_forget {
        tokio::spawn(async move {
            deliver_webhooks(&client, &webhooks, &request).await;
        });
    } else {
        deliver_webhooks(&client, &webhooks, &request).await;
    }
}

async fn deliver_webhooks(
    client: &reqwest::Client,
    webhooks: &[Webhook],
    request: &RequestMessage,
) {
    use crate::engine::templating::{self, has_placeholders, TemplateContext};

    let tpl_ctx = TemplateContext::new(request);
    for webhook in webhooks {
        let method = reqwest::Method::from_bytes(webhook.method.as_bytes())
            .unwrap_or(reqwest::Method::POST);
        let mut outbound = client.request(method, &webhook.url);
        for (name, value) in &webhook.headers {
            outbound = outbound.header(name, value);
        }
        if let Some(body) = &webhook.body {
            // Webhook bodies may reference the original request.
            let body = if has_placeholders(body) {
                templating::render(body, &tpl_ctx).unwrap_or_else(|_| body.clone())
            } else {
                body.clone()
            };
            outbound = outbound.body(body);
        }
        match outbound.send().await {
            Ok(resp) => {
                debug!(url = %webhook.url, status = resp.status().as_u16(), "webhook delivered")
            }
            Err(e) => warn!(url = %webhook.url, "webhook failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{Mapping, RequestPatternBuilder, ResponseTemplateBuilder};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    fn ctx() -> Arc<ServerContext> {
        ServerContext::with_defaults()
    }

    async fn wire_body<B>(resp: Response<B>) -> Bytes
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Debug,
    {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn gzip_bodies_decompress() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello wiremock").unwrap();
        let compressed = encoder.finish().unwrap();

        let out = decompress_body("gzip", Bytes::from(compressed));
        assert_eq!(out, Bytes::from("hello wiremock"));
    }

    #[test]
    fn deflate_bodies_decompress() {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let out = decompress_body("deflate", Bytes::from(compressed));
        assert_eq!(out, Bytes::from("payload"));
    }

    #[test]
    fn unknown_encoding_passes_through() {
        let body = Bytes::from("as-is");
        assert_eq!(decompress_body("br", body.clone()), body);
    }

    #[tokio::test]
    async fn egress_body_delivers_every_chunk() {
        let ctx = ctx();
        let payload = Bytes::from(vec![7u8; EGRESS_CHUNK_SIZE * 2 + 10]);
        let body = EgressBody::new(payload.clone(), ctx.shutdown_signal());

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, payload);
    }

    #[tokio::test]
    async fn egress_body_stops_at_a_chunk_boundary_on_shutdown() {
        let ctx = ctx();
        let payload = Bytes::from(vec![7u8; EGRESS_CHUNK_SIZE * 3]);
        let body = EgressBody::new(payload, ctx.shutdown_signal());

        // The signal fires before the first chunk is polled: nothing more
        // is emitted.
        ctx.trigger_shutdown();
        let collected = body.collect().await.unwrap().to_bytes();
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn egress_body_size_hint_is_exact() {
        let ctx = ctx();
        let payload = Bytes::from(vec![1u8; 100]);
        let body = EgressBody::new(payload, ctx.shutdown_signal());
        assert_eq!(hyper::body::Body::size_hint(&body).exact(), Some(100));
    }

    #[tokio::test]
    async fn serve_returns_fallback_when_store_is_empty() {
        let ctx = ctx();
        let request = RequestMessage::builder().path("/missing").build();
        let resp = serve(&ctx, request).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(wire_body(resp).await.is_empty());

        assert_eq!(ctx.journal.count(), 1);
        let entry = &ctx.journal.list(None)[0];
        assert_eq!(entry.outcome, ServeOutcome::NoMatch);
        assert!(entry.matched_mapping_id.is_none());
    }

    #[tokio::test]
    async fn serve_picks_and_logs_the_winner() {
        let ctx = ctx();
        let mapping = Mapping::builder()
            .request(RequestPatternBuilder::new().path("/hit"))
            .respond_with(ResponseTemplateBuilder::new().status(200).body("yes"))
            .build()
            .unwrap();
        let id = mapping.id;
        ctx.store.add(mapping).unwrap();

        let resp = serve(&ctx, RequestMessage::builder().path("/hit").build()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(wire_body(resp).await, Bytes::from("yes"));

        let entries = ctx.journal.find_by_mapping(id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, ServeOutcome::Served);
    }

    #[tokio::test]
    async fn body_gated_method_switch() {
        // Priority 0: body present -> 400. Priority 1: anything -> 200.
        let ctx = ctx();
        ctx.store
            .add(
                Mapping::builder()
                    .priority(0)
                    .request(RequestPatternBuilder::new().body_present())
                    .respond_with(ResponseTemplateBuilder::new().status(400))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        ctx.store
            .add(
                Mapping::builder()
                    .priority(1)
                    .respond_with(ResponseTemplateBuilder::new().status(200))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        // TRACE strips the body before matching: the catch-all wins.
        let trace = RequestMessage::builder()
            .method("TRACE")
            .path("/")
            .body("hello")
            .build();
        assert_eq!(serve(&ctx, trace).await.status(), StatusCode::OK);

        // POST keeps its body: the body-gated mapping wins.
        let post = RequestMessage::builder()
            .method("POST")
            .path("/")
            .body("hello")
            .build();
        assert_eq!(serve(&ctx, post).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn scenario_transition_applies_once_per_request() {
        let ctx = ctx();
        ctx.store
            .add(
                Mapping::builder()
                    .request(RequestPatternBuilder::new().path("/step"))
                    .in_scenario("walk")
                    .when_state("Started")
                    .will_set_state("one")
                    .respond_with(ResponseTemplateBuilder::new().body("first"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        ctx.store
            .add(
                Mapping::builder()
                    .request(RequestPatternBuilder::new().path("/step"))
                    .in_scenario("walk")
                    .when_state("one")
                    .will_set_state("two")
                    .respond_with(ResponseTemplateBuilder::new().body("second"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let req = || RequestMessage::builder().path("/step").build();
        assert_eq!(wire_body(serve(&ctx, req()).await).await, Bytes::from("first"));
        assert_eq!(ctx.scenarios.state_of("walk"), "one");
        assert_eq!(wire_body(serve(&ctx, req()).await).await, Bytes::from("second"));
        assert_eq!(ctx.scenarios.state_of("walk"), "two");

        // No eligible mapping in state "two".
        assert_eq!(
            serve(&ctx, req()).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn fault_empty_response_sends_headers_only() {
        let ctx = ctx();
        ctx.store
            .add(
                Mapping::builder()
                    .respond_with(
                        ResponseTemplateBuilder::new()
                            .status(200)
                            .body("never sent")
                            .fault(Fault::EmptyResponse),
                    )
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let resp = serve(&ctx, RequestMessage::builder().build()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(wire_body(resp).await.is_empty());
    }

    #[tokio::test]
    async fn fault_abort_after_bytes_truncates() {
        let ctx = ctx();
        ctx.store
            .add(
                Mapping::builder()
                    .respond_with(
                        ResponseTemplateBuilder::new()
                            .body("0123456789")
                            .fault(Fault::AbortAfterBytes(4)),
                    )
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let resp = serve(&ctx, RequestMessage::builder().build()).await;
        assert_eq!(wire_body(resp).await, Bytes::from("0123"));
    }

    #[tokio::test]
    async fn template_error_yields_500_and_keeps_serving() {
        let ctx = ctx();
        ctx.store
            .add(
                Mapping::builder()
                    .request(RequestPatternBuilder::new().path("/bad"))
                    .respond_with(
                        ResponseTemplateBuilder::new()
                            .body("{{request.path")
                            .templated(),
                    )
                    .build()
                    .unwrap(),
            )
            .unwrap();
        ctx.store
            .add(
                Mapping::builder()
                    .request(RequestPatternBuilder::new().path("/good"))
                    .respond_with(ResponseTemplateBuilder::new().body("fine"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let bad = serve(&ctx, RequestMessage::builder().path("/bad").build()).await;
        assert_eq!(bad.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let good = serve(&ctx, RequestMessage::builder().path("/good").build()).await;
        assert_eq!(good.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reset_empties_the_store_and_fallback_takes_over() {
        let ctx = ctx();
        ctx.store
            .add(
                Mapping::builder()
                    .request(RequestPatternBuilder::new().path("/x"))
                    .respond_with(ResponseTemplateBuilder::new().status(200))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(
            serve(&ctx, RequestMessage::builder().path("/x").build())
                .await
                .status(),
            StatusCode::OK
        );

        ctx.store.reset();
        assert_eq!(
            serve(&ctx, RequestMessage::builder().path("/x").build())
                .await
                .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn gzip_request_matches_decompressed_body_mapping() {
        // The adapter decompresses before matching; serve() sees plain
        // bytes.
        let ctx = ctx();
        ctx.store
            .add(
                Mapping::builder()
                    .request(RequestPatternBuilder::new().body("hello wiremock"))
                    .respond_with(ResponseTemplateBuilder::new().body("OK"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello wiremock").unwrap();
        let decompressed = decompress_body("gzip", Bytes::from(encoder.finish().unwrap()));

        let request = RequestMessage::builder()
            .method("POST")
            .path("/")
            .body(decompressed)
            .build();
        let resp = serve(&ctx, request).await;
        assert_eq!(wire_body(resp).await, Bytes::from("OK"));
    }

    #[tokio::test]
    async fn log_entry_survives_mapping_deletion() {
        let ctx = ctx();
        let mapping = Mapping::builder()
            .request(RequestPatternBuilder::new().path("/gone"))
            .respond_with(ResponseTemplateBuilder::new().status(200))
            .build()
            .unwrap();
        let id = mapping.id;
        ctx.store.add(mapping).unwrap();

        serve(&ctx, RequestMessage::builder().path("/gone").build()).await;
        ctx.store.delete(id).unwrap();

        let entries = ctx.journal.find_by_mapping(id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].matched_mapping_id, Some(id));
    }

    #[tokio::test]
    async fn bound_server_reports_local_addr() {
        let ctx = ctx();
        let server = StubServer::bind(ctx, &["127.0.0.1:0".parse().unwrap()])
            .await
            .unwrap();
        let addrs = server.local_addrs();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);
    }

    #[tokio::test]
    async fn binding_a_taken_port_fails() {
        let ctx = ctx();
        let first = StubServer::bind(Arc::clone(&ctx), &["127.0.0.1:0".parse().unwrap()])
            .await
            .unwrap();
        let taken = first.local_addrs()[0];

        let err = StubServer::bind(ctx, &[taken]).await;
        assert!(matches!(err, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn json_charset_variants_reach_the_admin_router() {
        let ctx = ctx();
        let body = json!({ "request": { "urlPath": "/via-admin" } }).to_string();
        let resp = admin::router::route(
            &ctx,
            &hyper::Method::POST,
            "/mappings",
            Some("application/json; charset=ascii"),
            &Bytes::from(body),
        );
        assert_eq!(resp.status(), StatusCode::CREATED);
        let payload = wire_body(resp).await;
        assert!(String::from_utf8_lossy(&payload).contains("Mapping added"));
    }
}
