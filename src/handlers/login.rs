//! Login surface: IdP metadata, SSO, password login and shortcuts.
//!
//! These routes belong to the protocol engine.  The handlers here only
//! decide which registry lock, if any, the engine call runs under.

use axum::response::{IntoResponse, Response};

use crate::dispatch;
use crate::engine::EngineRequest;
use crate::AppState;

/// `/metadata`.  The IdP's own metadata depends on configuration only, so
/// no registry lock is taken.
pub async fn metadata(state: &AppState, req: EngineRequest) -> Response {
    state.engine.serve_metadata(state.engine_context(), req).await
}

/// `/sso`.  The relying party is resolved under the registry's shared lock.
pub async fn sso(state: &AppState, req: EngineRequest) -> Response {
    let providers = state.registry.read().await;
    state
        .engine
        .serve_sso(state.engine_context(), &providers, req)
        .await
}

/// `/login`.
pub async fn login(state: &AppState, req: EngineRequest) -> Response {
    state.engine.handle_login(state.engine_context(), req).await
}

/// `/login/:shortcut[/:state]`.
pub async fn shortcut(
    state: &AppState,
    name: &str,
    suffix: Option<&str>,
    req: EngineRequest,
) -> Response {
    match dispatch::dispatch(state, name, suffix, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}
