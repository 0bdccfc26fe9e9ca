//! samlidp library: configuration registry for a SAML identity provider.
//!
//! This crate holds the administrative side of the IdP: a pluggable
//! key/value store, CRUD handlers for services, users, shortcuts and
//! sessions, the credential manager, the in-memory service-provider
//! registry consulted during SSO, and the shortcut dispatcher for
//! IDP-initiated logins.

use std::sync::Arc;

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod serialization;
pub mod server;
pub mod store;
pub mod xml;

use crate::config::Config;
use crate::credentials::{Argon2Hasher, CredentialManager};
use crate::engine::{EngineContext, HandoffEngine, ProtocolEngine};
use crate::registry::ServiceRegistry;
use crate::store::Store;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Durable key/value store; the source of truth for every resource.
    pub store: Arc<dyn Store>,
    /// EntityID -> metadata cache rebuilt from the store at startup.
    pub registry: ServiceRegistry,
    /// Password hashing for user records and logins.
    pub credentials: CredentialManager,
    /// SAML protocol engine.
    pub engine: Arc<dyn ProtocolEngine>,
}

impl AppState {
    /// Build the state with the bundled hand-off engine.
    ///
    /// The registry is loaded from `store`; a store failure here is fatal.
    pub async fn new(config: Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let engine = Arc::new(HandoffEngine::new(&config)?);
        Self::with_engine(config, store, engine).await
    }

    pub async fn with_engine(
        config: Config,
        store: Arc<dyn Store>,
        engine: Arc<dyn ProtocolEngine>,
    ) -> anyhow::Result<Self> {
        let hasher = Argon2Hasher::new(&config.idp.password_hash)?;
        let credentials = CredentialManager::new(Arc::new(hasher));

        let registry = ServiceRegistry::new();
        registry.initialize(store.as_ref()).await?;

        Ok(Self {
            config,
            store,
            registry,
            credentials,
            engine,
        })
    }

    /// Collaborators handed to the protocol engine for one request.
    pub fn engine_context(&self) -> EngineContext<'_> {
        EngineContext {
            store: self.store.as_ref(),
            credentials: &self.credentials,
        }
    }
}
