use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::admin::AdminState;
use crate::reload::ReloadReport;
use crate::store::seed::{apply_project, SeedProject, SyncSummary};
use crate::store::{MemoryStore, ModuleDefinition, ProjectDefinition, StoreError};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub reload: ReloadReport,
}

#[derive(Serialize)]
pub struct RouteStatus {
    pub path: String,
    pub project: String,
    pub module: String,
    pub collection: String,
    pub validated: bool,
}

#[derive(Serialize)]
pub struct ProjectView {
    pub id: String,
    pub name: String,
    pub modules: Vec<ModuleDefinition>,
    pub schema: Option<Value>,
}

impl ProjectView {
    fn new(store: &MemoryStore, project: ProjectDefinition) -> Self {
        let schema = store.schema_for(&project.id).map(|s| s.0);
        Self {
            id: project.id,
            name: project.name,
            modules: project.modules,
            schema,
        }
    }
}

/// Body of `PUT /admin/projects/{name}`. An absent schema clears it.
#[derive(Debug, Deserialize)]
pub struct ApplyProject {
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
    #[serde(default)]
    pub schema: Option<Value>,
}

fn store_error(e: StoreError) -> Response {
    let status = match &e {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::DuplicateProject(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %e, "Admin store write failed");
    (status, Json(json!({"error": e.to_string()}))).into_response()
}

fn project_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Project not found"})),
    )
        .into_response()
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        reload: state.orchestrator.report(),
    })
}

/// Installed routes, in table order.
pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteStatus>> {
    let table = state.orchestrator.table().snapshot();
    Json(
        table
            .entries()
            .map(|entry| RouteStatus {
                path: entry.path_key.clone(),
                project: entry.project.clone(),
                module: entry.module.clone(),
                collection: entry.collection_name().to_string(),
                validated: !entry.handler.validator().is_noop(),
            })
            .collect(),
    )
}

pub async fn post_reload(State(state): State<AdminState>) -> impl IntoResponse {
    let queued = state.orchestrator.request_reload("admin");
    (StatusCode::ACCEPTED, Json(json!({ "queued": queued })))
}

pub async fn get_projects(State(state): State<AdminState>) -> Json<Vec<ProjectView>> {
    Json(
        state
            .store
            .projects()
            .into_iter()
            .map(|p| ProjectView::new(&state.store, p))
            .collect(),
    )
}

pub async fn get_project(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.store.project_by_name(&name) {
        Some(project) => Json(ProjectView::new(&state.store, project)).into_response(),
        None => project_not_found(),
    }
}

/// Create or replace a project. Only differences reach the store.
pub async fn put_project(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(body): Json<ApplyProject>,
) -> Response {
    let seed = SeedProject {
        name,
        modules: body.modules,
        schema: body.schema,
    };
    let mut summary = SyncSummary::default();
    match apply_project(&state.store, &seed, &mut summary) {
        Ok(project) => {
            tracing::info!(
                project = %project.name,
                inserted = summary.inserted,
                updated = summary.updated,
                schemas = summary.schemas,
                "Project applied via admin API"
            );
            let status = if summary.inserted > 0 {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(ProjectView::new(&state.store, project))).into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn delete_project(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.store.delete_project(&name) {
        Ok(Some(project)) => {
            tracing::info!(project = %project.name, "Project deleted via admin API");
            Json(json!({ "deleted": project.name })).into_response()
        }
        Ok(None) => project_not_found(),
        Err(e) => store_error(e),
    }
}
