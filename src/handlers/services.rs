//! `/services/` handlers.
//!
//! Services are exchanged as SAML metadata XML.  Every mutation holds the
//! registry's mutation gate from before the store write until the registry
//! has been updated, and the registry is only touched once the store write
//! has succeeded.  Mutations run on a spawned task so that the request
//! being dropped cannot leave the store and the registry apart.

use std::future::Future;
use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, info, warn};

use crate::errors::IdpError;
use crate::handlers::resource::{self, key};
use crate::models::Service;
use crate::store::{StoreError, StoreExt};
use crate::xml::{self, MetadataError};
use crate::AppState;

#[utoipa::path(
    get,
    path = "/services/",
    tag = "Services",
    operation_id = "ListServices",
    responses(
        (status = 200, description = "Service ids, as {\"services\": [...]}"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn list_services(state: &AppState) -> Result<Response, IdpError> {
    resource::list::<Service>(state).await
}

/// Serve the stored metadata document unchanged.
#[utoipa::path(
    get,
    path = "/services/{id}",
    tag = "Services",
    operation_id = "GetService",
    params(("id" = String, Path, description = "Service id")),
    responses(
        (status = 200, description = "Service provider metadata", content_type = "application/xml"),
        (status = 404, description = "No such service"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn get_service(state: &AppState, id: &str) -> Result<Response, IdpError> {
    let service: Service = state.store.get_as(&key::<Service>(id)).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        service.metadata.document,
    )
        .into_response())
}

/// Decode the metadata, store it, then register it.
#[utoipa::path(
    put,
    path = "/services/{id}",
    tag = "Services",
    operation_id = "PutService",
    params(("id" = String, Path, description = "Service id")),
    request_body(content = String, content_type = "application/xml", description = "EntityDescriptor or EntitiesDescriptor"),
    responses(
        (status = 204, description = "Service stored"),
        (status = 400, description = "Metadata could not be decoded"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn put_service(
    state: &Arc<AppState>,
    id: &str,
    body: &[u8],
) -> Result<Response, IdpError> {
    let metadata = xml::decode_sp_metadata(body).map_err(metadata_error)?;
    let service = Service {
        name: id.to_string(),
        metadata,
    };

    let state = Arc::clone(state);
    let id = id.to_string();
    run_detached(async move { commit_put(&state, &id, service).await }).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn commit_put(state: &AppState, id: &str, service: Service) -> Result<(), IdpError> {
    let key = key::<Service>(id);

    let _gate = state.registry.lock_mutations().await;
    let previous = match state.store.get_as::<Service>(&key).await {
        Ok(previous) => Some(previous),
        Err(StoreError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };
    state.store.put_as(&key, &service).await?;

    let previous = previous.map(|p| p.metadata);
    if let Some(old) = previous.as_ref().filter(|p| p.entity_id != service.metadata.entity_id) {
        info!(service = %id, old = %old.entity_id, new = %service.metadata.entity_id, "Service EntityID changed");
    }
    let entity_id = service.metadata.entity_id.clone();
    state.registry.upsert(previous.as_ref(), service.metadata).await;
    info!(service = %id, entity_id = %entity_id, "Service provider registered");
    if let Some(old) = previous.filter(|p| p.entity_id != entity_id) {
        reclaim(state, &old.entity_id).await;
    }
    Ok(())
}

/// Delete the record, then drop its EntityID from the registry.
#[utoipa::path(
    delete,
    path = "/services/{id}",
    tag = "Services",
    operation_id = "DeleteService",
    params(("id" = String, Path, description = "Service id")),
    responses(
        (status = 204, description = "Service deleted"),
        (status = 404, description = "No such service"),
        (status = 500, description = "Store failure")
    )
)]
pub async fn delete_service(state: &Arc<AppState>, id: &str) -> Result<Response, IdpError> {
    let state = Arc::clone(state);
    let id = id.to_string();
    run_detached(async move { commit_delete(&state, &id).await }).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn commit_delete(state: &AppState, id: &str) -> Result<(), IdpError> {
    let key = key::<Service>(id);

    let _gate = state.registry.lock_mutations().await;
    let service: Service = state.store.get_as(&key).await?;
    state.store.delete(&key).await?;
    state.registry.evict(&service.metadata).await;
    info!(service = %id, entity_id = %service.metadata.entity_id, "Service provider removed");
    reclaim(state, &service.metadata.entity_id).await;
    Ok(())
}

/// The store change is already committed, so a failed rescan is logged
/// rather than reported; the next start rebuilds the entry.
async fn reclaim(state: &AppState, entity_id: &str) {
    if let Err(e) = state.registry.reclaim(state.store.as_ref(), entity_id).await {
        error!(entity_id = %entity_id, error = %e, "Cannot rescan services for a released EntityID");
    }
}

/// Run a service mutation on its own task.  Dropping the request future
/// (timeout, client disconnect) detaches the task instead of cancelling it,
/// so a committed store write is always followed by its registry update.
async fn run_detached<F>(mutation: F) -> Result<(), IdpError>
where
    F: Future<Output = Result<(), IdpError>> + Send + 'static,
{
    tokio::spawn(mutation)
        .await
        .map_err(|e| IdpError::Internal(anyhow::anyhow!("service mutation task failed: {e}")))?
}

/// Only the "no service provider" rejection explains itself to the client;
/// anything else is a plain bad request.
fn metadata_error(err: MetadataError) -> IdpError {
    match err {
        MetadataError::NoServiceProvider => {
            warn!("Rejected metadata without an SPSSODescriptor");
            IdpError::bad_request(err.to_string())
        }
        other => IdpError::malformed(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::ServiceProviderLookup;
    use crate::store::failing::{FailingStore, Op};
    use crate::store::memory::MemoryStore;
    use crate::store::Store;
    use std::time::Duration;

    const ENTITY_ID: &str = "https://sp.example/meta";

    fn metadata(entity_id: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:SPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://sp.example/acs" index="1"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#
        )
    }

    async fn state_with(store: Arc<dyn Store>) -> Arc<AppState> {
        let mut config = Config::default();
        config.idp.password_hash.memory_kib = 8;
        config.idp.password_hash.iterations = 1;
        Arc::new(AppState::new(config, store).await.unwrap())
    }

    async fn state() -> Arc<AppState> {
        state_with(Arc::new(MemoryStore::new())).await
    }

    #[tokio::test]
    async fn test_put_registers_entity_id() {
        let state = state().await;
        let doc = metadata(ENTITY_ID);
        let resp = put_service(&state, "sp", doc.as_bytes()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let found = state.registry.lookup(ENTITY_ID).await.unwrap();
        assert_eq!(found.document, doc);
    }

    #[tokio::test]
    async fn test_put_with_new_entity_id_evicts_old() {
        let state = state().await;
        put_service(&state, "sp", metadata("https://old.example/meta").as_bytes())
            .await
            .unwrap();
        put_service(&state, "sp", metadata("https://new.example/meta").as_bytes())
            .await
            .unwrap();

        assert!(state.registry.lookup("https://old.example/meta").await.is_err());
        assert!(state.registry.lookup("https://new.example/meta").await.is_ok());
        assert_eq!(state.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_rejects_bad_metadata() {
        let state = state().await;
        let err = put_service(&state, "sp", b"<Organization/>").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(state.store.list("/services/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_evicts() {
        let state = state().await;
        put_service(&state, "sp", metadata(ENTITY_ID).as_bytes())
            .await
            .unwrap();
        let resp = delete_service(&state, "sp").await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(state.registry.lookup(ENTITY_ID).await.is_err());

        let err = delete_service(&state, "sp").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_hands_entity_id_to_remaining_service() {
        let state = state().await;
        put_service(&state, "a", metadata(ENTITY_ID).as_bytes())
            .await
            .unwrap();
        put_service(&state, "b", metadata(ENTITY_ID).as_bytes())
            .await
            .unwrap();

        delete_service(&state, "b").await.unwrap();
        assert!(state.registry.lookup(ENTITY_ID).await.is_ok());

        delete_service(&state, "a").await.unwrap();
        assert!(state.registry.lookup(ENTITY_ID).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_store_write_leaves_registry_unchanged() {
        let store = Arc::new(FailingStore::new());
        let state = state_with(store.clone()).await;
        put_service(&state, "sp", metadata(ENTITY_ID).as_bytes())
            .await
            .unwrap();

        store.fail(Op::Put);
        let err = put_service(&state, "sp", metadata("https://new.example/meta").as_bytes())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        assert!(state.registry.lookup(ENTITY_ID).await.is_ok());
        assert!(state.registry.lookup("https://new.example/meta").await.is_err());
        let stored: Service = state.store.get_as("/services/sp").await.unwrap();
        assert_eq!(stored.metadata.entity_id, ENTITY_ID);
    }

    #[tokio::test]
    async fn test_failed_prior_read_aborts_put() {
        let store = Arc::new(FailingStore::new());
        let state = state_with(store.clone()).await;

        store.fail(Op::Get);
        let err = put_service(&state, "sp", metadata(ENTITY_ID).as_bytes())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.registry.len().await, 0);
        store.recover();
        assert!(state.store.list("/services/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_store_delete_keeps_entry() {
        let store = Arc::new(FailingStore::new());
        let state = state_with(store.clone()).await;
        put_service(&state, "sp", metadata(ENTITY_ID).as_bytes())
            .await
            .unwrap();

        store.fail(Op::Delete);
        let err = delete_service(&state, "sp").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        assert!(state.registry.lookup(ENTITY_ID).await.is_ok());
        assert!(state.store.get("/services/sp").await.is_ok());
    }

    #[tokio::test]
    async fn test_put_completes_after_request_is_dropped() {
        let state = state().await;

        // A reader holds the shared lock, so the registry update has to wait
        // past the caller's deadline.
        let view = state.registry.read().await;
        let body = metadata(ENTITY_ID);
        let put = put_service(&state, "sp", body.as_bytes());
        assert!(tokio::time::timeout(Duration::from_millis(50), put)
            .await
            .is_err());
        assert!(view.service_provider(ENTITY_ID).is_none());
        drop(view);

        // The mutation still owns the gate until it has updated the registry.
        drop(state.registry.lock_mutations().await);
        assert!(state.registry.lookup(ENTITY_ID).await.is_ok());
        assert_eq!(state.store.list("/services/").await.unwrap(), vec!["sp"]);
    }

    #[tokio::test]
    async fn test_delete_completes_after_request_is_dropped() {
        let state = state().await;
        put_service(&state, "sp", metadata(ENTITY_ID).as_bytes())
            .await
            .unwrap();

        let view = state.registry.read().await;
        let delete = delete_service(&state, "sp");
        assert!(tokio::time::timeout(Duration::from_millis(50), delete)
            .await
            .is_err());
        assert!(view.service_provider(ENTITY_ID).is_some());
        drop(view);

        drop(state.registry.lock_mutations().await);
        assert!(state.registry.lookup(ENTITY_ID).await.is_err());
        assert!(state.store.list("/services/").await.unwrap().is_empty());
    }
}
