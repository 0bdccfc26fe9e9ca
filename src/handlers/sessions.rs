//! `/sessions/` handlers.  Sessions are created by `/login` only; the
//! administrative surface can list, inspect and revoke them.

use axum::response::Response;

use crate::errors::IdpError;
use crate::handlers::resource;
use crate::models::Session;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/sessions/",
    tag = "Sessions",
    operation_id = "ListSessions",
    responses(
        (status = 200, description = "Session ids, as {\"sessions\": [...]}"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn list_sessions(state: &AppState) -> Result<Response, IdpError> {
    resource::list::<Session>(state).await
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "Sessions",
    operation_id = "GetSession",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session record"),
        (status = 404, description = "No such session"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn get_session(state: &AppState, id: &str) -> Result<Response, IdpError> {
    resource::get::<Session>(state, id).await
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "Sessions",
    operation_id = "DeleteSession",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "No such session"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn delete_session(state: &AppState, id: &str) -> Result<Response, IdpError> {
    resource::delete::<Session>(state, id).await
}
