//! Axum router construction.
//!
//! The [`app`] function wires the administrative CRUD surface and the
//! login surface to their handlers and returns a ready-to-serve
//! [`axum::Router`].  Route functions here only extract path and body
//! values and delegate to `crate::handlers`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{any, get, post},
    Router,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::engine::EngineRequest;
use crate::errors::{generate_request_id, IdpError};
use crate::handlers::{login, services, sessions, shortcuts, users};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI document ----------------------------------------------------------

/// OpenAPI documentation for the administrative API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "samlidp administrative API",
        version = "0.1.0",
        description = "Service providers, users, shortcuts and sessions of a SAML identity provider"
    ),
    paths(
        health_check,
        crate::handlers::services::list_services,
        crate::handlers::services::get_service,
        crate::handlers::services::put_service,
        crate::handlers::services::delete_service,
        crate::handlers::users::list_users,
        crate::handlers::users::get_user,
        crate::handlers::users::put_user,
        crate::handlers::users::delete_user,
        crate::handlers::shortcuts::list_shortcuts,
        crate::handlers::shortcuts::get_shortcut,
        crate::handlers::shortcuts::put_shortcut,
        crate::handlers::shortcuts::delete_shortcut,
        crate::handlers::sessions::list_sessions,
        crate::handlers::sessions::get_session,
        crate::handlers::sessions::delete_session,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Services", description = "Service-provider metadata"),
        (name = "Users", description = "Users and their credentials"),
        (name = "Shortcuts", description = "IDP-initiated login shortcuts"),
        (name = "Sessions", description = "Established login sessions"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with every route.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout);
    let metrics_enabled = state.config.observability.metrics;

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        // Login surface, served by the protocol engine.
        .route("/metadata", any(handle_metadata))
        .route("/sso", any(handle_sso))
        .route("/login", any(handle_login))
        .route("/login/:shortcut", any(handle_shortcut))
        .route("/login/:shortcut/:state", post(handle_shortcut_with_state))
        // Administrative surface.
        .route("/services/", get(handle_list_services))
        .route(
            "/services/:id",
            get(handle_get_service)
                .put(handle_put_service)
                .patch(handle_put_service)
                .post(handle_put_service)
                .delete(handle_delete_service),
        )
        .route("/users/", get(handle_list_users))
        .route(
            "/users/:id",
            get(handle_get_user)
                .put(handle_put_user)
                .patch(handle_put_user)
                .delete(handle_delete_user),
        )
        .route("/shortcuts/", get(handle_list_shortcuts))
        .route(
            "/shortcuts/:id",
            get(handle_get_shortcut)
                .put(handle_put_shortcut)
                .patch(handle_put_shortcut)
                .delete(handle_delete_shortcut),
        )
        .route("/sessions/", get(handle_list_sessions))
        .route(
            "/sessions/:id",
            get(handle_get_session).delete(handle_delete_session),
        );

    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
}

// -- Common headers middleware -----------------------------------------------

/// Adds to every response:
/// - `x-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `samlidp`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(request_id) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", request_id);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(date) = HeaderValue::from_str(&date) {
        headers.insert("date", date);
    }
    headers.insert("server", HeaderValue::from_static("samlidp"));

    response
}

// -- Infrastructure endpoints ------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// -- Login surface -----------------------------------------------------------

async fn handle_metadata(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    login::metadata(&state, EngineRequest::new(method, uri, headers, body)).await
}

async fn handle_sso(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    login::sso(&state, EngineRequest::new(method, uri, headers, body)).await
}

async fn handle_login(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    login::login(&state, EngineRequest::new(method, uri, headers, body)).await
}

/// `/login/:shortcut` -- IDP-initiated login with no path suffix.
async fn handle_shortcut(
    State(state): State<Arc<AppState>>,
    Path(shortcut): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = EngineRequest::new(method, uri, headers, body);
    login::shortcut(&state, &shortcut, None, req).await
}

/// `POST /login/:shortcut/:state` -- the trailing segment may become the
/// relay state.
async fn handle_shortcut_with_state(
    State(state): State<Arc<AppState>>,
    Path((shortcut, suffix)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = EngineRequest::new(method, uri, headers, body);
    login::shortcut(&state, &shortcut, Some(&suffix), req).await
}

// -- Services ----------------------------------------------------------------

async fn handle_list_services(State(state): State<Arc<AppState>>) -> Result<Response, IdpError> {
    services::list_services(&state).await
}

async fn handle_get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, IdpError> {
    services::get_service(&state, &id).await
}

async fn handle_put_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, IdpError> {
    services::put_service(&state, &id, &body).await
}

async fn handle_delete_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, IdpError> {
    services::delete_service(&state, &id).await
}

// -- Users -------------------------------------------------------------------

async fn handle_list_users(State(state): State<Arc<AppState>>) -> Result<Response, IdpError> {
    users::list_users(&state).await
}

async fn handle_get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, IdpError> {
    users::get_user(&state, &id).await
}

async fn handle_put_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, IdpError> {
    users::put_user(&state, &id, &body).await
}

async fn handle_delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, IdpError> {
    users::delete_user(&state, &id).await
}

// -- Shortcuts ---------------------------------------------------------------

async fn handle_list_shortcuts(State(state): State<Arc<AppState>>) -> Result<Response, IdpError> {
    shortcuts::list_shortcuts(&state).await
}

async fn handle_get_shortcut(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, IdpError> {
    shortcuts::get_shortcut(&state, &id).await
}

async fn handle_put_shortcut(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, IdpError> {
    shortcuts::put_shortcut(&state, &id, &body).await
}

async fn handle_delete_shortcut(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, IdpError> {
    shortcuts::delete_shortcut(&state, &id).await
}

// -- Sessions ----------------------------------------------------------------

async fn handle_list_sessions(State(state): State<Arc<AppState>>) -> Result<Response, IdpError> {
    sessions::list_sessions(&state).await
}

async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, IdpError> {
    sessions::get_session(&state, &id).await
}

async fn handle_delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, IdpError> {
    sessions::delete_session(&state, &id).await
}
