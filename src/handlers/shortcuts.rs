//! `/shortcuts/` handlers.

use axum::response::Response;

use crate::errors::IdpError;
use crate::handlers::resource;
use crate::models::Shortcut;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/shortcuts/",
    tag = "Shortcuts",
    operation_id = "ListShortcuts",
    responses(
        (status = 200, description = "Shortcut names, as {\"shortcuts\": [...]}"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn list_shortcuts(state: &AppState) -> Result<Response, IdpError> {
    resource::list::<Shortcut>(state).await
}

#[utoipa::path(
    get,
    path = "/shortcuts/{id}",
    tag = "Shortcuts",
    operation_id = "GetShortcut",
    params(("id" = String, Path, description = "Shortcut name")),
    responses(
        (status = 200, description = "Shortcut record"),
        (status = 404, description = "No such shortcut"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn get_shortcut(state: &AppState, id: &str) -> Result<Response, IdpError> {
    resource::get::<Shortcut>(state, id).await
}

/// Replace the shortcut.  Setting both a fixed relay state and
/// `url_suffix_as_relay_state` is rejected.
#[utoipa::path(
    put,
    path = "/shortcuts/{id}",
    tag = "Shortcuts",
    operation_id = "PutShortcut",
    params(("id" = String, Path, description = "Shortcut name")),
    request_body(content = String, content_type = "application/json", description = "Shortcut record"),
    responses(
        (status = 204, description = "Shortcut stored"),
        (status = 400, description = "Body is not a shortcut record"),
        (status = 422, description = "Field validation failed"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn put_shortcut(state: &AppState, id: &str, body: &[u8]) -> Result<Response, IdpError> {
    resource::put::<Shortcut>(state, id, body).await
}

#[utoipa::path(
    delete,
    path = "/shortcuts/{id}",
    tag = "Shortcuts",
    operation_id = "DeleteShortcut",
    params(("id" = String, Path, description = "Shortcut name")),
    responses(
        (status = 204, description = "Shortcut deleted"),
        (status = 404, description = "No such shortcut"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn delete_shortcut(state: &AppState, id: &str) -> Result<Response, IdpError> {
    resource::delete::<Shortcut>(state, id).await
}
