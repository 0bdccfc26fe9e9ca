//! `/users/` handlers.
//!
//! Writes go through the credential manager: a supplied password is hashed
//! and discarded, and an update without one keeps the stored credential.
//! Reads never return the credential.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::errors::IdpError;
use crate::handlers::resource::{self, key};
use crate::models::User;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/users/",
    tag = "Users",
    operation_id = "ListUsers",
    responses(
        (status = 200, description = "User names, as {\"users\": [...]}"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn list_users(state: &AppState) -> Result<Response, IdpError> {
    resource::list::<User>(state).await
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    operation_id = "GetUser",
    params(("id" = String, Path, description = "User name")),
    responses(
        (status = 200, description = "User record without credentials"),
        (status = 404, description = "No such user"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn get_user(state: &AppState, id: &str) -> Result<Response, IdpError> {
    resource::get::<User>(state, id).await
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    operation_id = "PutUser",
    params(("id" = String, Path, description = "User name")),
    request_body(content = String, content_type = "application/json", description = "User record; `password` is optional"),
    responses(
        (status = 204, description = "User stored"),
        (status = 400, description = "Body is not a user record"),
        (status = 422, description = "Field validation failed"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn put_user(state: &AppState, id: &str, body: &[u8]) -> Result<Response, IdpError> {
    let mut user: User = resource::decode(id, body)?;
    state
        .credentials
        .apply(state.store.as_ref(), &key::<User>(id), &mut user)
        .await?;
    resource::store(state, id, &user).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    operation_id = "DeleteUser",
    params(("id" = String, Path, description = "User name")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "No such user"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn delete_user(state: &AppState, id: &str) -> Result<Response, IdpError> {
    resource::delete::<User>(state, id).await
}
