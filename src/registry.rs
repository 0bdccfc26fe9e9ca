//! Service-provider registry.
//!
//! An in-memory map from EntityID to the provider's metadata, derived from
//! the `/services/` records in the store.  The store stays authoritative:
//! the registry is rebuilt from it on every start and is only changed after
//! a store write has succeeded.
//!
//! Readers (the SSO and IDP-initiated paths) hold the shared lock for the
//! duration of a protocol-engine call through a [`RegistryView`].  Writers
//! take the exclusive lock only for the map update itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::errors::IdpError;
use crate::metrics::SERVICE_PROVIDERS;
use crate::models::{EntityDescriptor, Service};
use crate::store::{Store, StoreExt};

/// Resolves a relying party by EntityID.
pub trait ServiceProviderLookup: Send + Sync {
    fn service_provider(&self, entity_id: &str) -> Option<Arc<EntityDescriptor>>;
}

type Providers = HashMap<String, Arc<EntityDescriptor>>;

pub struct ServiceRegistry {
    providers: RwLock<Providers>,
    /// Serializes service mutations across "store write, then registry
    /// update" so the registry ends up matching the last committed write.
    mutations: Mutex<()>,
}

/// Shared-lock view of the registry.  While it is alive no service
/// mutation can be applied to the registry.
pub struct RegistryView<'a> {
    guard: RwLockReadGuard<'a, Providers>,
}

impl ServiceProviderLookup for RegistryView<'_> {
    fn service_provider(&self, entity_id: &str) -> Option<Arc<EntityDescriptor>> {
        self.guard.get(entity_id).cloned()
    }
}

impl RegistryView<'_> {
    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            mutations: Mutex::new(()),
        }
    }

    /// Load every stored service.  Any store failure is returned to the
    /// caller, which treats it as fatal.
    pub async fn initialize(&self, store: &dyn Store) -> anyhow::Result<usize> {
        let names = store.list("/services/").await?;
        let mut loaded = HashMap::with_capacity(names.len());
        for name in &names {
            let service: Service = store.get_as(&format!("/services/{name}")).await?;
            debug!(service = %name, entity_id = %service.metadata.entity_id, "Loaded service provider");
            loaded.insert(service.metadata.entity_id.clone(), Arc::new(service.metadata));
        }

        let mut providers = self.providers.write().await;
        *providers = loaded;
        let count = providers.len();
        record_size(count);
        info!("Service registry initialized with {} provider(s)", count);
        Ok(count)
    }

    /// Acquire the shared lock.
    pub async fn read(&self) -> RegistryView<'_> {
        RegistryView {
            guard: self.providers.read().await,
        }
    }

    pub async fn lookup(&self, entity_id: &str) -> Result<Arc<EntityDescriptor>, IdpError> {
        self.read()
            .await
            .service_provider(entity_id)
            .ok_or_else(|| IdpError::not_found(entity_id))
    }

    /// Take the mutation gate.  Hold it from before the store write until
    /// the matching [`upsert`](Self::upsert) or [`evict`](Self::evict).
    pub async fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutations.lock().await
    }

    /// Register `current`, first dropping `previous` when the EntityID of the
    /// service changed.
    pub async fn upsert(
        &self,
        previous: Option<&EntityDescriptor>,
        current: EntityDescriptor,
    ) -> Arc<EntityDescriptor> {
        let current = Arc::new(current);
        let mut providers = self.providers.write().await;
        if let Some(previous) = previous {
            if previous.entity_id != current.entity_id {
                remove_if_same(&mut providers, previous);
            }
        }
        providers.insert(current.entity_id.clone(), Arc::clone(&current));
        record_size(providers.len());
        current
    }

    /// Drop `metadata`'s EntityID from the registry.
    pub async fn evict(&self, metadata: &EntityDescriptor) {
        let mut providers = self.providers.write().await;
        remove_if_same(&mut providers, metadata);
        record_size(providers.len());
    }

    /// Hand `entity_id` to another stored service that still claims it.
    ///
    /// Scans `/services/` the way [`initialize`](Self::initialize) does, so
    /// the last claimant in list order wins, as it would after a restart.
    /// Call with the mutation gate held, after the store write.
    pub async fn reclaim(&self, store: &dyn Store, entity_id: &str) -> anyhow::Result<bool> {
        let mut claimant = None;
        for name in store.list("/services/").await? {
            let service: Service = store.get_as(&format!("/services/{name}")).await?;
            if service.metadata.entity_id == entity_id {
                claimant = Some((name, service.metadata));
            }
        }
        let Some((name, metadata)) = claimant else {
            return Ok(false);
        };

        let mut providers = self.providers.write().await;
        if providers.contains_key(entity_id) {
            return Ok(false);
        }
        debug!(service = %name, entity_id = %entity_id, "EntityID reclaimed by another service");
        providers.insert(entity_id.to_string(), Arc::new(metadata));
        record_size(providers.len());
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }
}

/// Remove the entry for `metadata.entity_id` unless it has since been
/// claimed by a different service with the same EntityID.
fn remove_if_same(providers: &mut Providers, metadata: &EntityDescriptor) {
    let same = providers
        .get(&metadata.entity_id)
        .is_some_and(|registered| **registered == *metadata);
    if same {
        providers.remove(&metadata.entity_id);
    }
}

fn record_size(count: usize) {
    metrics::gauge!(SERVICE_PROVIDERS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::failing::{FailingStore, Op};
    use crate::store::memory::MemoryStore;
    use crate::AppState;

    fn metadata(entity_id: &str) -> EntityDescriptor {
        EntityDescriptor {
            entity_id: entity_id.to_string(),
            valid_until: None,
            sp_sso_descriptors: Vec::new(),
            document: format!(r#"<EntityDescriptor entityID="{entity_id}"/>"#),
        }
    }

    #[tokio::test]
    async fn test_initialize_from_store() {
        let store = MemoryStore::new();
        let service = Service {
            name: "sp".to_string(),
            metadata: metadata("https://sp.example/meta"),
        };
        store.put_as("/services/sp", &service).await.unwrap();

        let registry = ServiceRegistry::new();
        assert_eq!(registry.initialize(&store).await.unwrap(), 1);

        let found = registry.lookup("https://sp.example/meta").await.unwrap();
        assert_eq!(*found, service.metadata);
        assert!(matches!(
            registry.lookup("https://other.example/meta").await,
            Err(IdpError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_initialize_fails_on_corrupt_record() {
        let store = MemoryStore::new();
        store.put("/services/bad", b"{".to_vec()).await.unwrap();
        let registry = ServiceRegistry::new();
        assert!(registry.initialize(&store).await.is_err());
    }

    #[tokio::test]
    async fn test_initialize_fails_on_list_error() {
        let store = FailingStore::new();
        store.fail(Op::List);
        let registry = ServiceRegistry::new();
        assert!(registry.initialize(&store).await.is_err());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_startup_aborts_when_registry_cannot_load() {
        let mut config = Config::default();
        config.idp.password_hash.memory_kib = 8;
        config.idp.password_hash.iterations = 1;
        let store = Arc::new(FailingStore::new());
        store.fail(Op::List);
        assert!(AppState::new(config, store).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_evicts_changed_entity_id() {
        let registry = ServiceRegistry::new();
        let old = metadata("https://sp.example/old");
        registry.upsert(None, old.clone()).await;

        registry
            .upsert(Some(&old), metadata("https://sp.example/new"))
            .await;

        assert!(registry.lookup("https://sp.example/old").await.is_err());
        assert!(registry.lookup("https://sp.example/new").await.is_ok());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_evict_keeps_entry_claimed_by_other_service() {
        let registry = ServiceRegistry::new();
        let first = metadata("https://sp.example/meta");
        let mut second = metadata("https://sp.example/meta");
        second.document.push_str("<!-- v2 -->");

        registry.upsert(None, first.clone()).await;
        registry.upsert(None, second.clone()).await;
        registry.evict(&first).await;
        assert_eq!(
            *registry.lookup("https://sp.example/meta").await.unwrap(),
            second
        );

        registry.evict(&second).await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_reclaim_registers_remaining_claimant() {
        let store = MemoryStore::new();
        let mut survivor = metadata("https://sp.example/meta");
        survivor.document.push_str("<!-- b -->");
        let service = Service {
            name: "b".to_string(),
            metadata: survivor.clone(),
        };
        store.put_as("/services/b", &service).await.unwrap();

        let registry = ServiceRegistry::new();
        let removed = metadata("https://sp.example/meta");
        registry.upsert(None, removed.clone()).await;
        registry.evict(&removed).await;
        assert!(registry.reclaim(&store, "https://sp.example/meta").await.unwrap());
        assert_eq!(
            *registry.lookup("https://sp.example/meta").await.unwrap(),
            survivor
        );

        // Nothing left to reclaim once the last claimant is gone.
        store.delete("/services/b").await.unwrap();
        registry.evict(&survivor).await;
        assert!(!registry.reclaim(&store, "https://sp.example/meta").await.unwrap());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_view_sees_consistent_snapshot() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.upsert(None, metadata("a")).await;

        let view = registry.read().await;
        let writer = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.upsert(None, metadata("b")).await })
        };
        tokio::task::yield_now().await;
        // The writer cannot proceed while the view is held.
        assert!(view.service_provider("b").is_none());
        assert_eq!(view.len(), 1);
        drop(view);

        writer.await.unwrap();
        assert!(registry.lookup("b").await.is_ok());
    }
}
