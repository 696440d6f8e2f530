//! Management API, served on its own listener.
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::reload::ReloadOrchestrator;
use crate::store::MemoryStore;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<MemoryStore>,
    pub orchestrator: Arc<ReloadOrchestrator>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .route("/admin/reload", post(post_reload))
        .route("/admin/projects", get(get_projects))
        .route(
            "/admin/projects/{name}",
            get(get_project).put(put_project).delete(delete_project),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
