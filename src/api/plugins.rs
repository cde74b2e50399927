//! Plugin status and control endpoints

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::SharedStatus;
use crate::ports::PortStats;
use crate::registry::{Category, RegisteredCapability};
use crate::status::{ActionResult, ControlAction, PluginStatus};

/// Query parameters for listing plugins
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
}

/// Body of an action request
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
}

/// Build plugin, capability and port routes
pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .route("/plugins", get(list_plugins))
        .route("/plugins/{id}", get(get_plugin))
        .route("/plugins/{id}/actions", post(execute_action))
        .route("/capabilities", get(list_capabilities))
        .route("/ports", get(port_stats))
        .with_state(status)
}

/// List plugins, optionally filtered by category
async fn list_plugins(
    State(status): State<SharedStatus>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PluginStatus>>, ApiError> {
    let category = query
        .category
        .as_deref()
        .map(str::parse::<Category>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    Ok(Json(status.list_plugins(category.as_ref()).await))
}

async fn get_plugin(
    State(status): State<SharedStatus>,
    Path(id): Path<String>,
) -> Result<Json<PluginStatus>, ApiError> {
    status
        .get_plugin_status(&id)
        .await
        .map(Json)
        .map_err(|_| ApiError::NotFound(format!("plugin '{id}' not found")))
}

/// Run a control action; the HTTP status follows the failure kind
async fn execute_action(
    State(status): State<SharedStatus>,
    Path(id): Path<String>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ActionResult>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let action: ControlAction = request.action.parse().map_err(ApiError::BadRequest)?;

    let result = status.execute(&id, action).await;
    let code = result
        .error
        .as_ref()
        .map_or(StatusCode::OK, |e| status_for_kind(&e.kind));

    Ok((code, Json(result)))
}

async fn list_capabilities(State(status): State<SharedStatus>) -> Json<Vec<RegisteredCapability>> {
    Json(status.registry().list_capabilities())
}

async fn port_stats(State(status): State<SharedStatus>) -> Json<PortStats> {
    Json(status.allocator().get_stats())
}

/// HTTP status for an error kind
#[must_use]
pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "not_found" => StatusCode::NOT_FOUND,
        "duplicate" | "already_running" | "not_running" => StatusCode::CONFLICT,
        "exhaustion" | "unreachable" | "port_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "not_self_hosted" | "config" | "schema" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Plugin API errors
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(status_for_kind("not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_kind("already_running"), StatusCode::CONFLICT);
        assert_eq!(status_for_kind("exhaustion"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for_kind("unreachable"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for_kind("start_failed"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
