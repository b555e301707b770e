//! Route dispatch for the `/__admin` surface.
//!
//! The server strips the `/__admin` prefix and hands over the method, the
//! remaining path, the content type, and the collected body.

use super::handlers::{self, not_found, AdminResponse};
use crate::settings::ServerContext;
use bytes::Bytes;
use hyper::Method;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Dispatch one admin request.
pub fn route(
    ctx: &Arc<ServerContext>,
    method: &Method,
    subpath: &str,
    content_type: Option<&str>,
    body: &Bytes,
) -> AdminResponse {
    let segments: Vec<&str> = subpath.split('/').filter(|s| !s.is_empty()).collect();
    debug!(%method, subpath, "admin request");

    match (method, segments.as_slice()) {
        (&Method::GET, ["mappings"]) => handlers::list_mappings(ctx),
        (&Method::POST, ["mappings"]) => handlers::add_mapping(ctx, content_type, body),
        (&Method::DELETE, ["mappings"]) => handlers::reset_mappings(ctx),
        (&Method::PUT, ["mappings", id]) => match parse_id(id) {
            Some(id) => handlers::replace_mapping(ctx, id, content_type, body),
            None => bad_id(),
        },
        (&Method::DELETE, ["mappings", id]) => match parse_id(id) {
            Some(id) => handlers::delete_mapping(ctx, id),
            None => bad_id(),
        },

        (&Method::GET, ["requests"]) => handlers::list_requests(ctx),
        (&Method::DELETE, ["requests"]) => handlers::reset_requests(ctx),
        (&Method::POST, ["requests", "find"]) => handlers::find_requests(ctx, content_type, body),

        (&Method::POST, ["scenarios", name, "state"]) => {
            handlers::set_scenario_state(ctx, name, content_type, body)
        }

        (&Method::GET, ["settings"]) => handlers::get_settings(ctx),
        (&Method::PUT, ["settings"]) => handlers::update_settings(ctx, content_type, body),

        _ => not_found(),
    }
}

fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

fn bad_id() -> AdminResponse {
    handlers::error_response(hyper::StatusCode::BAD_REQUEST, "invalid mapping id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;
    use serde_json::json;

    fn ctx() -> Arc<ServerContext> {
        ServerContext::with_defaults()
    }

    #[test]
    fn unknown_routes_are_404() {
        let ctx = ctx();
        let resp = route(&ctx, &Method::GET, "/nope", None, &Bytes::new());
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn mapping_crud_routes_dispatch() {
        let ctx = ctx();
        let body = Bytes::from(json!({ "request": { "urlPath": "/r" } }).to_string());
        let resp = route(
            &ctx,
            &Method::POST,
            "/mappings",
            Some("application/json"),
            &body,
        );
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(ctx.store.len(), 1);

        let id = ctx.store.list()[0].id;
        let resp = route(
            &ctx,
            &Method::DELETE,
            &format!("/mappings/{id}"),
            None,
            &Bytes::new(),
        );
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(ctx.store.is_empty());
    }

    #[test]
    fn invalid_uuid_is_a_400() {
        let ctx = ctx();
        let resp = route(
            &ctx,
            &Method::DELETE,
            "/mappings/not-a-uuid",
            None,
            &Bytes::new(),
        );
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn reset_routes_clear_state() {
        let ctx = ctx();
        let body = Bytes::from(json!({ "request": { "urlPath": "/r" } }).to_string());
        route(
            &ctx,
            &Method::POST,
            "/mappings",
            Some("application/json"),
            &body,
        );
        ctx.scenarios.set_state("s", "x");

        let resp = route(&ctx, &Method::DELETE, "/mappings", None, &Bytes::new());
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(ctx.store.is_empty());
        assert_eq!(ctx.scenarios.state_of("s"), crate::scenario::STARTED_STATE);
    }

    #[test]
    fn scenario_route_requires_state_body() {
        let ctx = ctx();
        let resp = route(
            &ctx,
            &Method::POST,
            "/scenarios/checkout/state",
            Some("application/json"),
            &Bytes::from(json!({"state": "done"}).to_string()),
        );
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(ctx.scenarios.state_of("checkout"), "done");

        let resp = route(
            &ctx,
            &Method::POST,
            "/scenarios/checkout/state",
            Some("application/json"),
            &Bytes::from("{}"),
        );
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
