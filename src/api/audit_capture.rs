//! Request-layer audit capture.
//!
//! A middleware buffers the body of every mutating `/v1` request and, once
//! the handler answers with a success status, hands an event to the audit
//! recorder. The recorder does the sensitive-field scrubbing and tenant
//! resolution off the request path; this layer only gathers raw material.

use axum::{
    body::{Body, to_bytes},
    extract::Request,
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::handlers::auth::{AuthState, authenticate};
use crate::audit::{AuditEvent, AuditRecorder};
use crate::store::TenantHint;

/// Handlers that mutate a record attach the prior state to the response so
/// the audit entry can carry a diff.
#[derive(Clone, Debug)]
pub(crate) struct AuditPrevious(pub Value);

// Bodies past the cap are forwarded unread and recorded without a payload;
// this layer must never change a request's outcome.
const MAX_CAPTURE_BYTES: usize = 256 * 1024;

pub(crate) async fn capture_mutations(request: Request, next: Next) -> Response {
    if !matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) {
        return next.run(request).await;
    }

    let recorder = request.extensions().get::<AuditRecorder>().cloned();
    let auth_state = request.extensions().get::<Arc<AuthState>>().cloned();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(ToString::to_string);
    let source_addr = client_addr(request.headers());
    let api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let actor = match &auth_state {
        Some(state) => authenticate(request.headers(), state)
            .await
            .map(|principal| principal.user_id),
        None => None,
    };

    let declared_len = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    let (captured_body, request) = if declared_len.is_some_and(|len| len > MAX_CAPTURE_BYTES) {
        (None, request)
    } else {
        let (parts, body) = request.into_parts();
        match to_bytes(body, usize::MAX).await {
            Ok(bytes) => {
                // Undeclared lengths are buffered; the cap only bounds what
                // gets parsed into the audit record.
                let parsed: Option<Value> = if bytes.len() <= MAX_CAPTURE_BYTES {
                    serde_json::from_slice(&bytes).ok()
                } else {
                    None
                };
                (parsed, Request::from_parts(parts, Body::from(bytes)))
            }
            // The stream died mid-read; let the handler answer for it.
            Err(_) => (None, Request::from_parts(parts, Body::empty())),
        }
    };

    let response = next.run(request).await;

    if response.status().is_success() {
        if let Some(recorder) = recorder {
            let previous = response
                .extensions()
                .get::<AuditPrevious>()
                .map(|previous| previous.0.clone());
            let (explicit_tenant, tenant_hints) =
                tenant_context(&path, query.as_deref(), captured_body.as_ref());
            recorder.record(AuditEvent {
                user_id: actor,
                action: format!("{method} {path}"),
                source_addr: Some(source_addr),
                explicit_tenant,
                tenant_hints,
                body: captured_body,
                previous,
                api_key,
            });
        }
    }

    response
}

/// Best-effort client address; the service sits behind a proxy.
pub(crate) fn client_addr(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map_or_else(|| "unknown".to_string(), |addr| addr.trim().to_string())
}

/// Pull tenant context out of the request: an explicit tenant id wins
/// (path, then query string, then body), id shaped body fields become
/// owning-tenant lookup hints.
fn tenant_context(
    path: &str,
    query: Option<&str>,
    body: Option<&Value>,
) -> (Option<Uuid>, Vec<TenantHint>) {
    let mut explicit = path_tenant(path).or_else(|| query.and_then(query_tenant));
    let mut hints = Vec::new();

    if let Some(Value::Object(fields)) = body {
        if explicit.is_none() {
            explicit = field_uuid(fields, "tenant_id");
        }
        if let Some(id) = field_uuid(fields, "user_id") {
            hints.push(TenantHint::User(id));
        }
        if let Some(id) = field_uuid(fields, "staff_id") {
            hints.push(TenantHint::Staff(id));
        }
        if let Some(id) = field_uuid(fields, "asset_id") {
            hints.push(TenantHint::Asset(id));
        }
        if let Some(id) = field_uuid(fields, "invoice_id") {
            hints.push(TenantHint::Invoice(id));
        }
        if let Some(id) = field_uuid(fields, "id") {
            hints.push(TenantHint::Entity(id));
        }
    }

    // Body-less mutations like DELETE carry their id as the last segment.
    if let Some(id) = trailing_uuid(path) {
        if explicit != Some(id) && !hints.contains(&TenantHint::Entity(id)) {
            hints.push(TenantHint::Entity(id));
        }
    }

    (explicit, hints)
}

fn trailing_uuid(path: &str) -> Option<Uuid> {
    path.rsplit('/')
        .next()
        .and_then(|segment| Uuid::parse_str(segment).ok())
}

fn path_tenant(path: &str) -> Option<Uuid> {
    let mut segments = path.split('/');
    while let Some(segment) = segments.next() {
        if segment == "tenants" {
            return segments.next().and_then(|id| Uuid::parse_str(id).ok());
        }
    }
    None
}

fn query_tenant(query: &str) -> Option<Uuid> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "tenant_id" {
            Uuid::parse_str(value).ok()
        } else {
            None
        }
    })
}

fn field_uuid(fields: &serde_json::Map<String, Value>, key: &str) -> Option<Uuid> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .and_then(|value| Uuid::parse_str(value).ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn forwarded_header_yields_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_addr(&headers), "203.0.113.7");
        assert_eq!(client_addr(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn tenant_comes_from_path_then_query_then_body() {
        let path_id = Uuid::new_v4();
        let query_id = Uuid::new_v4();
        let body_id = Uuid::new_v4();
        let body = json!({ "tenant_id": body_id.to_string() });
        let query = format!("tenant_id={query_id}");

        let (explicit, _) = tenant_context(
            &format!("/v1/tenants/{path_id}/credentials/stripe"),
            Some(&query),
            Some(&body),
        );
        assert_eq!(explicit, Some(path_id));

        let (explicit, _) = tenant_context("/v1/api-keys", Some(&query), Some(&body));
        assert_eq!(explicit, Some(query_id));

        let (explicit, _) = tenant_context("/v1/api-keys", None, Some(&body));
        assert_eq!(explicit, Some(body_id));
    }

    #[tokio::test]
    async fn oversized_bodies_pass_through_unaudited() {
        use axum::http::StatusCode;
        use axum::{Router, middleware, routing::post};
        use tower::ServiceExt;

        let app = Router::new()
            .route("/v1/echo", post(|| async { StatusCode::NO_CONTENT }))
            .layer(middleware::from_fn(capture_mutations));

        let payload = vec![b'x'; MAX_CAPTURE_BYTES + 1024];
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/echo")
            .header(header::CONTENT_LENGTH, payload.len())
            .body(Body::from(payload))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn trailing_path_id_becomes_entity_hint() {
        let key_id = Uuid::new_v4();
        let (explicit, hints) =
            tenant_context(&format!("/v1/api-keys/{key_id}"), None, None);
        assert_eq!(explicit, None);
        assert_eq!(hints, vec![TenantHint::Entity(key_id)]);

        // A trailing tenant id is already the explicit tenant, not a hint.
        let tenant_id = Uuid::new_v4();
        let (explicit, hints) =
            tenant_context(&format!("/v1/tenants/{tenant_id}"), None, None);
        assert_eq!(explicit, Some(tenant_id));
        assert!(hints.is_empty());
    }

    #[test]
    fn id_fields_become_ordered_hints() {
        let user = Uuid::new_v4();
        let invoice = Uuid::new_v4();
        let body = json!({
            "user_id": user.to_string(),
            "invoice_id": invoice.to_string(),
            "note": "not an id"
        });
        let (explicit, hints) = tenant_context("/v1/things", None, Some(&body));
        assert_eq!(explicit, None);
        assert_eq!(
            hints,
            vec![TenantHint::User(user), TenantHint::Invoice(invoice)]
        );
    }
}
