//! Proxy path: forward the matched request to a real upstream and bring
//! the response back.
//!
//! No store lock is held across the outbound call; the caller passes
//! everything needed by value or snapshot.

use crate::journal::ProxyMetadata;
use crate::mapping::{Mapping, ProxySpec, RequestPatternBuilder, ResponseTemplateBuilder};
use crate::message::{is_reserved_header, HeaderMultimap, RequestMessage, ResponseBody, ResponseMessage};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("client certificate unusable: {0}")]
    ClientCert(String),
}

pub struct ProxyOutcome {
    pub response: ResponseMessage,
    pub metadata: ProxyMetadata,
}

/// Headers never forwarded upstream: transport-reserved ones plus those
/// the client rebuilds itself.
fn skip_on_forward(name: &str) -> bool {
    is_reserved_header(name)
        || name.eq_ignore_ascii_case("host")
        || name.eq_ignore_ascii_case("content-encoding")
        || name.eq_ignore_ascii_case("accept-encoding")
}

/// Forward `request` to the upstream described by `spec`.
pub async fn forward(
    client: &reqwest::Client,
    spec: &ProxySpec,
    request: &RequestMessage,
) -> Result<ProxyOutcome, ProxyError> {
    let target_url = format!("{}{}", spec.base_url, request.relative_url);
    debug!(%target_url, method = %request.method, "proxying request");

    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let mut outbound = client.request(method, &target_url);
    for (name, value) in request.headers.iter() {
        if !skip_on_forward(name) {
            outbound = outbound.header(name, value);
        }
    }
    for (name, value) in &spec.additional_headers {
        outbound = outbound.header(name, value);
    }
    if !request.body.is_empty() {
        outbound = outbound.body(request.body.bytes.clone());
    }

    let start = Instant::now();
    let upstream = outbound.send().await?;
    let status = upstream.status().as_u16();

    let mut headers = HeaderMultimap::new();
    for (name, value) in upstream.headers() {
        if let Ok(v) = value.to_str() {
            if !is_reserved_header(name.as_str()) {
                headers.append(name.as_str(), v);
            }
        }
    }

    let body = upstream.bytes().await?;
    let latency = start.elapsed();
    debug!(%target_url, status, latency_ms = latency.as_millis() as u64, "upstream answered");

    Ok(ProxyOutcome {
        response: ResponseMessage {
            status,
            headers,
            body: ResponseBody::Bytes(body),
            delay: None,
            fault: None,
        },
        metadata: ProxyMetadata {
            target_url,
            latency,
            error: None,
        },
    })
}

/// Build a dedicated outbound client for a proxy spec that presents a
/// client certificate. Falls back to the shared client when no cert is
/// configured.
pub fn client_for(spec: &ProxySpec) -> Result<Option<reqwest::Client>, ProxyError> {
    let Some(path) = &spec.client_cert_path else {
        return Ok(None);
    };
    let pem = std::fs::read(path)
        .map_err(|e| ProxyError::ClientCert(format!("{}: {e}", path.display())))?;
    let identity = reqwest::Identity::from_pem(&pem)
        .map_err(|e| ProxyError::ClientCert(e.to_string()))?;
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .identity(identity)
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| ProxyError::ClientCert(e.to_string()))?;
    Ok(Some(client))
}

/// Persist an observed upstream exchange as a static mapping
/// (save-mapping-on-first-hit mode). The recorded mapping matches the
/// exact method and path and outranks the proxy mapping that produced it.
pub fn mapping_from_exchange(
    request: &RequestMessage,
    response: &ResponseMessage,
    proxy_priority: i32,
) -> Mapping {
    let mut template = ResponseTemplateBuilder::new().status(response.status);
    for (name, value) in response.headers.iter() {
        template = template.header(name, value);
    }
    let body = response.body.to_bytes();
    if !body.is_empty() {
        template = template.body(&String::from_utf8_lossy(&body));
    }

    let mut pattern = RequestPatternBuilder::new()
        .method(&request.method)
        .path(&request.path);
    for (name, value) in request.query.iter() {
        pattern = pattern.query(name, value);
    }

    // Literal matchers cannot fail to compile.
    Mapping::builder()
        .title(&format!("recorded {} {}", request.method, request.path))
        .priority(proxy_priority.saturating_sub(1))
        .request(pattern)
        .respond_with(template)
        .build()
        .unwrap_or_else(|_| unreachable!())
}
