//! Shortcut dispatch for IDP-initiated logins.
//!
//! `/login/:shortcut[/:state]` names a stored [`Shortcut`].  The shortcut
//! picks the relying party and the relay state; the protocol engine does
//! the rest while the registry's shared lock is held.

use axum::response::Response;
use tracing::error;

use crate::engine::EngineRequest;
use crate::errors::IdpError;
use crate::metrics::IDP_INITIATED_TOTAL;
use crate::models::Shortcut;
use crate::store::StoreExt;
use crate::AppState;

/// Relay state for a shortcut: its fixed value, else the request's path
/// suffix when enabled, else empty.
pub fn resolve_relay_state(shortcut: &Shortcut, suffix: Option<&str>) -> String {
    match (&shortcut.relay_state, shortcut.url_suffix_as_relay_state) {
        (Some(fixed), _) => fixed.clone(),
        (None, true) => suffix.unwrap_or_default().to_string(),
        (None, false) => String::new(),
    }
}

/// Resolve `name` and hand off to the engine.
///
/// Any failure to read the shortcut, an absent one included, is reported
/// as an internal error.
pub async fn dispatch(
    state: &AppState,
    name: &str,
    suffix: Option<&str>,
    req: EngineRequest,
) -> Result<Response, IdpError> {
    let shortcut: Shortcut = match state.store.get_as(&format!("/shortcuts/{name}")).await {
        Ok(shortcut) => shortcut,
        Err(e) => {
            error!(shortcut = %name, error = %e, "Cannot load shortcut");
            metrics::counter!(IDP_INITIATED_TOTAL, "outcome" => "shortcut_error").increment(1);
            return Err(IdpError::Internal(e.into()));
        }
    };
    let relay_state = resolve_relay_state(&shortcut, suffix);

    let ctx = state.engine_context();
    let providers = state.registry.read().await;
    let response = state
        .engine
        .serve_idp_initiated(ctx, &providers, req, shortcut.service_provider, relay_state)
        .await;
    drop(providers);

    let outcome = if response.status().is_success() {
        "dispatched"
    } else {
        "rejected"
    };
    metrics::counter!(IDP_INITIATED_TOTAL, "outcome" => outcome).increment(1);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shortcut(relay_state: Option<&str>, suffix: bool) -> Shortcut {
        Shortcut {
            name: "promo".to_string(),
            service_provider: "https://sp.example/meta".to_string(),
            relay_state: relay_state.map(str::to_string),
            url_suffix_as_relay_state: suffix,
        }
    }

    #[test]
    fn test_fixed_relay_state_wins() {
        let s = shortcut(Some("fixed"), true);
        assert_eq!(resolve_relay_state(&s, Some("campaign42")), "fixed");
    }

    #[test]
    fn test_suffix_relay_state() {
        let s = shortcut(None, true);
        assert_eq!(resolve_relay_state(&s, Some("campaign42")), "campaign42");
        assert_eq!(resolve_relay_state(&s, None), "");
    }

    #[test]
    fn test_no_relay_state() {
        let s = shortcut(None, false);
        assert_eq!(resolve_relay_state(&s, Some("campaign42")), "");
    }
}
