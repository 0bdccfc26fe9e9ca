//! Generic CRUD over `/<kind>/<id>` store records.
//!
//! Every administrative resource follows the same shape: list the ids under
//! its prefix, read one record, write one record with the URL id stamped
//! into its name, and delete one record.  [`Resource`] supplies the
//! per-kind parts; the free functions here do the store work.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::IdpError;
use crate::models::{Service, Session, Shortcut, User};
use crate::store::StoreExt;
use crate::AppState;

/// A record kind stored under `/<KIND>/`.
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Plural store prefix and list-response key, e.g. `users`.
    const KIND: &'static str;

    /// Stamp the URL id into the record.  The URL always wins over a name
    /// sent in the body.
    fn set_name(&mut self, name: &str);

    /// Field checks run after decoding.
    fn validate(&self) -> Result<(), IdpError> {
        Ok(())
    }

    /// Strip anything that must not leave the server.
    fn redact(&mut self) {}
}

/// Store key of `id` for kind `R`.
pub fn key<R: Resource>(id: &str) -> String {
    format!("/{}/{}", R::KIND, id)
}

fn prefix<R: Resource>() -> String {
    format!("/{}/", R::KIND)
}

/// `GET /<kind>/`: `{"<kind>": [ids...]}`.  Always 200 when the store
/// answers, even with nothing listed.
pub async fn list<R: Resource>(state: &AppState) -> Result<Response, IdpError> {
    let ids = state.store.list(&prefix::<R>()).await?;
    debug!(kind = R::KIND, count = ids.len(), "Listed resources");
    Ok(Json(BTreeMap::from([(R::KIND, ids)])).into_response())
}

/// Read and redact one record.
pub async fn fetch<R: Resource>(state: &AppState, id: &str) -> Result<R, IdpError> {
    let mut record: R = state.store.get_as(&key::<R>(id)).await?;
    record.redact();
    Ok(record)
}

/// `GET /<kind>/:id` as JSON.
pub async fn get<R: Resource>(state: &AppState, id: &str) -> Result<Response, IdpError> {
    let record: R = fetch(state, id).await?;
    Ok(Json(record).into_response())
}

/// Decode a JSON body into `R`, named after `id`, and validate it.
pub fn decode<R: Resource>(id: &str, body: &[u8]) -> Result<R, IdpError> {
    let mut record: R = serde_json::from_slice(body).map_err(IdpError::malformed)?;
    record.set_name(id);
    record.validate()?;
    Ok(record)
}

/// Write `record` at `/<kind>/:id`.
pub async fn store<R: Resource>(state: &AppState, id: &str, record: &R) -> Result<(), IdpError> {
    state.store.put_as(&key::<R>(id), record).await?;
    info!(kind = R::KIND, id = %id, "Stored resource");
    Ok(())
}

/// `PUT /<kind>/:id` for kinds with no side effects beyond the store.
pub async fn put<R: Resource>(state: &AppState, id: &str, body: &[u8]) -> Result<Response, IdpError> {
    let record: R = decode(id, body)?;
    store(state, id, &record).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `DELETE /<kind>/:id`.  404 when nothing is stored there.
pub async fn delete<R: Resource>(state: &AppState, id: &str) -> Result<Response, IdpError> {
    state.store.delete(&key::<R>(id)).await?;
    info!(kind = R::KIND, id = %id, "Deleted resource");
    Ok(StatusCode::NO_CONTENT.into_response())
}

// -- Resource kinds ----------------------------------------------------------

impl Resource for Service {
    const KIND: &'static str = "services";

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

impl Resource for User {
    const KIND: &'static str = "users";

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn validate(&self) -> Result<(), IdpError> {
        garde::Validate::validate(self)?;
        Ok(())
    }

    fn redact(&mut self) {
        self.password = None;
        self.hashed_password = None;
    }
}

impl Resource for Shortcut {
    const KIND: &'static str = "shortcuts";

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn validate(&self) -> Result<(), IdpError> {
        garde::Validate::validate(self)?;
        if self.relay_state.is_some() && self.url_suffix_as_relay_state {
            return Err(IdpError::Validation {
                message: "relay_state and url_suffix_as_relay_state are mutually exclusive"
                    .to_string(),
            });
        }
        Ok(())
    }
}

impl Resource for Session {
    const KIND: &'static str = "sessions";

    fn set_name(&mut self, name: &str) {
        self.id = name.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::store::failing::{FailingStore, Op};

    #[test]
    fn test_keys() {
        assert_eq!(key::<User>("alice"), "/users/alice");
        assert_eq!(key::<Service>("sp"), "/services/sp");
        assert_eq!(prefix::<Session>(), "/sessions/");
    }

    #[test]
    fn test_decode_url_name_wins() {
        let user: User = decode("alice", br#"{"name": "mallory", "email": "a@example.com"}"#).unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(user.email, "a@example.com");
    }

    #[test]
    fn test_decode_malformed_body() {
        let err = decode::<Shortcut>("promo", b"{not json").unwrap_err();
        assert!(matches!(err, IdpError::MalformedBody { .. }));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_decode_shortcut_rejects_both_relay_modes() {
        let body = br#"{"service_provider": "https://sp.example/meta", "relay_state": "x", "url_suffix_as_relay_state": true}"#;
        let err = decode::<Shortcut>("promo", body).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_decode_shortcut_requires_service_provider() {
        let err = decode::<Shortcut>("promo", br#"{"service_provider": ""}"#).unwrap_err();
        assert!(matches!(err, IdpError::Validation { .. }));
    }

    #[test]
    fn test_decode_user_rejects_empty_password() {
        let err = decode::<User>("alice", br#"{"password": ""}"#).unwrap_err();
        assert!(matches!(err, IdpError::Validation { .. }));
    }

    #[test]
    fn test_user_redact() {
        let mut user = User {
            name: "alice".to_string(),
            password: Some("pw".to_string()),
            hashed_password: Some(b"$argon2id$...".to_vec()),
            ..Default::default()
        };
        user.redact();
        assert_eq!(user.password, None);
        assert_eq!(user.hashed_password, None);
    }

    async fn failing_state() -> (Arc<FailingStore>, AppState) {
        let mut config = Config::default();
        config.idp.password_hash.memory_kib = 8;
        config.idp.password_hash.iterations = 1;
        let store = Arc::new(FailingStore::new());
        let state = AppState::new(config, store.clone()).await.unwrap();
        (store, state)
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let (_store, state) = failing_state().await;
        let err = get::<Shortcut>(&state, "promo").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        let err = delete::<Shortcut>(&state, "promo").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_backend_failure_is_internal_error() {
        let (store, state) = failing_state().await;
        put::<Shortcut>(&state, "promo", br#"{"service_provider": "https://sp.example/meta"}"#)
            .await
            .unwrap();

        store.fail(Op::List);
        let err = list::<Shortcut>(&state).await.unwrap_err();
        assert!(matches!(err, IdpError::Internal(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        store.fail(Op::Get);
        let err = get::<Shortcut>(&state, "promo").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        store.fail(Op::Delete);
        let err = delete::<Shortcut>(&state, "promo").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        store.fail(Op::Put);
        let err = put::<Shortcut>(&state, "promo", br#"{"service_provider": "x"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        store.recover();
        assert_eq!(list::<Shortcut>(&state).await.unwrap().status(), StatusCode::OK);
    }
}
