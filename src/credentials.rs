//! User credentials.
//!
//! A [`CredentialHasher`] turns a plaintext password into an opaque,
//! one-way credential and later checks a candidate against it.  The
//! [`CredentialManager`] decides, on every user update, whether the stored
//! credential is replaced or carried forward.

use std::sync::Arc;

use anyhow::anyhow;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use tracing::{debug, warn};

use crate::config::PasswordHashConfig;
use crate::errors::IdpError;
use crate::models::User;
use crate::store::{Store, StoreError, StoreExt};

/// One-way password hashing.
pub trait CredentialHasher: Send + Sync + 'static {
    fn hash(&self, plaintext: &str) -> anyhow::Result<Vec<u8>>;

    fn verify(&self, plaintext: &str, credential: &[u8]) -> bool;
}

/// Argon2id, storing the PHC string (which embeds salt and cost) as the
/// credential bytes.
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new(config: &PasswordHashConfig) -> anyhow::Result<Self> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| anyhow!("invalid argon2 parameters: {e}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> anyhow::Result<Vec<u8>> {
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        let hash = self
            .argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| anyhow!("password hashing failed: {e}"))?;
        Ok(hash.to_string().into_bytes())
    }

    fn verify(&self, plaintext: &str, credential: &[u8]) -> bool {
        let Ok(encoded) = std::str::from_utf8(credential) else {
            warn!("Stored credential is not a PHC string");
            return false;
        };
        let parsed = match PasswordHash::new(encoded) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Failed to parse stored credential: {}", e);
                return false;
            }
        };
        // Cost parameters come from the PHC string, not from `self`.
        self.argon2()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Applies credential rules to user records on their way into the store.
#[derive(Clone)]
pub struct CredentialManager {
    hasher: Arc<dyn CredentialHasher>,
}

impl CredentialManager {
    pub fn new(hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { hasher }
    }

    /// Settle the credential of `user`, about to be written at `key`.
    ///
    /// A supplied password is hashed and then dropped.  Without one, the
    /// credential already stored at `key` is carried forward, or left empty
    /// when no user exists there yet.  A credential sent by the client is
    /// never trusted.
    pub async fn apply(&self, store: &dyn Store, key: &str, user: &mut User) -> Result<(), IdpError> {
        user.hashed_password = match user.password.take() {
            Some(plaintext) => Some(self.hash(plaintext).await?),
            None => match store.get_as::<User>(key).await {
                Ok(existing) => existing.hashed_password,
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
        };
        Ok(())
    }

    /// Hash off the async runtime.
    pub async fn hash(&self, plaintext: String) -> anyhow::Result<Vec<u8>> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext)).await?
    }

    /// Check `plaintext` against `user`'s stored credential.  A user with no
    /// credential never verifies.
    pub async fn verify(&self, user: &User, plaintext: String) -> bool {
        let Some(credential) = user.hashed_password.clone() else {
            debug!(user = %user.name, "User has no credential");
            return false;
        };
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &credential))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn cheap_manager() -> CredentialManager {
        let config = PasswordHashConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        };
        CredentialManager::new(Arc::new(Argon2Hasher::new(&config).unwrap()))
    }

    fn user(name: &str, password: Option<&str>) -> User {
        User {
            name: name.to_string(),
            password: password.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_argon2_hash_and_verify() {
        let hasher = Argon2Hasher::new(&PasswordHashConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        let credential = hasher.hash("hunter2").unwrap();
        assert!(credential.starts_with(b"$argon2id$"));
        assert!(hasher.verify("hunter2", &credential));
        assert!(!hasher.verify("hunter3", &credential));
        assert!(!hasher.verify("hunter2", b"not-a-phc-string"));
        assert!(!hasher.verify("hunter2", &[0xff, 0xfe]));
    }

    #[test]
    fn test_argon2_rejects_bad_params() {
        let config = PasswordHashConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        assert!(Argon2Hasher::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_apply_hashes_supplied_password() {
        let store = MemoryStore::new();
        let manager = cheap_manager();
        let mut alice = user("alice", Some("hunter2"));

        manager.apply(&store, "/users/alice", &mut alice).await.unwrap();

        assert!(alice.password.is_none());
        assert!(manager.verify(&alice, "hunter2".to_string()).await);
    }

    #[tokio::test]
    async fn test_apply_carries_existing_credential_forward() {
        let store = MemoryStore::new();
        let manager = cheap_manager();

        let mut first = user("alice", Some("hunter2"));
        manager.apply(&store, "/users/alice", &mut first).await.unwrap();
        store.put_as("/users/alice", &first).await.unwrap();

        let mut update = user("alice", None);
        update.email = "alice@example.com".to_string();
        manager.apply(&store, "/users/alice", &mut update).await.unwrap();

        assert_eq!(update.hashed_password, first.hashed_password);
        assert!(manager.verify(&update, "hunter2".to_string()).await);
    }

    #[tokio::test]
    async fn test_apply_new_user_without_password_has_no_credential() {
        let store = MemoryStore::new();
        let manager = cheap_manager();
        let mut bob = user("bob", None);
        bob.hashed_password = Some(b"forged".to_vec());

        manager.apply(&store, "/users/bob", &mut bob).await.unwrap();

        assert!(bob.hashed_password.is_none());
        assert!(!manager.verify(&bob, "anything".to_string()).await);
    }

    #[tokio::test]
    async fn test_apply_propagates_store_failure() {
        let store = MemoryStore::new();
        store.put("/users/carol", b"not json".to_vec()).await.unwrap();
        let manager = cheap_manager();
        let mut carol = user("carol", None);

        let err = manager.apply(&store, "/users/carol", &mut carol).await.unwrap_err();
        assert!(matches!(err, IdpError::Internal(_)));
    }
}
