//! Response mapping for the generated endpoints.
//!
//! # Responsibilities
//! - Map CRUD adapter errors to status codes and JSON bodies
//! - Keep storage failures opaque to clients (the cause is logged)

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::crud::CrudError;

impl IntoResponse for CrudError {
    fn into_response(self) -> Response {
        match self {
            CrudError::EmptyBody => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Request body is empty!"})),
            )
                .into_response(),
            CrudError::InvalidBody(reason) => {
                (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response()
            }
            CrudError::Validation(details) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Validation failed", "details": details})),
            )
                .into_response(),
            CrudError::InvalidId => (
                StatusCode::NOT_FOUND,
                Json(json!({"message": "Invalid object id."})),
            )
                .into_response(),
            CrudError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"message": "Not found"}))).into_response()
            }
            CrudError::Storage(e) => {
                tracing::error!(error = %e, "Storage operation failed");
                internal_error()
            }
        }
    }
}

/// Nothing is mounted at the requested path.
pub fn route_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Route not found"})),
    )
        .into_response()
}

pub fn method_not_allowed(allow: &'static str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(axum::http::header::ALLOW, allow)],
        Json(json!({"error": "Method not allowed"})),
    )
        .into_response()
}

pub fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
        .into_response()
}
