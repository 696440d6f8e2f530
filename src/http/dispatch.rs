//! Per-request dispatch through the live routing table.
//!
//! The axum router only knows a single fallback handler. Each request
//! takes one snapshot of the routing table, so a concurrent reload can never
//! pair it with half of an old and half of a new table.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Instant;

use crate::crud::{parse_body, parse_id, CrudError};
use crate::http::request::request_id;
use crate::http::response::{method_not_allowed, route_not_found};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::routing::RouteEntry;

/// A request path split into routing segments.
#[derive(Debug, PartialEq, Eq)]
pub struct Target<'a> {
    pub project: &'a str,
    pub module: &'a str,
    pub id: Option<&'a str>,
}

/// Split `/project/module[/id]`; a single trailing slash is ignored.
pub fn parse_target(path: &str) -> Option<Target<'_>> {
    let trimmed = path.strip_prefix('/')?;
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    let mut segments = trimmed.split('/');

    let project = segments.next().filter(|s| !s.is_empty())?;
    let module = segments.next().filter(|s| !s.is_empty())?;
    let id = match segments.next() {
        None => None,
        Some(id) if !id.is_empty() => Some(id),
        Some(_) => return None,
    };
    if segments.next().is_some() {
        return None;
    }

    Some(Target {
        project,
        module,
        id,
    })
}

pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let path = uri.path();

    let entry = parse_target(path).and_then(|target| {
        let table = state.routes.snapshot();
        table
            .resolve(target.project, target.module)
            .cloned()
            .map(|entry| (entry, target.id))
    });

    let Some((entry, id)) = entry else {
        tracing::debug!(request_id = %request_id(&headers), path = %path, "No route mounted");
        metrics::record_request(method.as_str(), 404, "none", start);
        return route_not_found();
    };

    let response = handle(&entry, &method, id, &body).await;
    metrics::record_request(
        method.as_str(),
        response.status().as_u16(),
        &entry.path_key,
        start,
    );
    response
}

async fn handle(entry: &RouteEntry, method: &Method, id: Option<&str>, body: &[u8]) -> Response {
    let handler = &entry.handler;

    let result = match (method, id) {
        (&Method::POST, None) => match parse_body(body) {
            Ok(payload) => handler
                .create(payload)
                .await
                .map(|record| (StatusCode::CREATED, Json(record)).into_response()),
            Err(e) => Err(e),
        },
        (&Method::GET, None) => handler
            .list()
            .await
            .map(|records| Json(records).into_response()),
        (&Method::GET, Some(id)) => handler
            .get(id)
            .await
            .map(|record| Json(record).into_response()),
        (&Method::PUT, Some(id)) => match parse_id(id).and_then(|_| parse_body(body)) {
            Ok(payload) => handler
                .update(id, payload)
                .await
                .map(|record| Json(record).into_response()),
            Err(e) => Err(e),
        },
        (&Method::DELETE, Some(id)) => handler
            .delete(id)
            .await
            .map(|_| Json(json!({"message": "Deleted successfully"})).into_response()),
        (_, None) => return method_not_allowed("GET, POST"),
        (_, Some(_)) => return method_not_allowed("GET, PUT, DELETE"),
    };

    result.unwrap_or_else(|e: CrudError| {
        tracing::debug!(path = %entry.path_key, error = %e, "Request failed");
        e.into_response()
    })
}
