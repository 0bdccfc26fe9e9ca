//! Store serialization: export/import between any [`Store`] backend and JSON.
//!
//! The document is one object holding a `samlidp_export` envelope and, per
//! resource kind, a map from id to record:
//!
//! ```json
//! {
//!   "samlidp_export": {"exported_at": "...", "source": "samlidp/0.1.0", "version": 1},
//!   "users": {"alice": {"name": "alice", "email": "alice@example.com"}}
//! }
//! ```
//!
//! Records are re-decoded into their typed form on import, so a document
//! cannot smuggle a plaintext password into the store.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::credentials::CredentialManager;
use crate::handlers::resource::{key, Resource};
use crate::models::{Service, Session, Shortcut, User};
use crate::store::{Store, StoreError, StoreExt};

pub const VERSION: &str = "0.1.0";
pub const EXPORT_VERSION: i64 = 1;

const ENVELOPE: &str = "samlidp_export";

pub const ALL_KINDS: &[&str] = &["services", "users", "shortcuts", "sessions"];

pub struct ExportOptions {
    pub kinds: Vec<String>,
    pub include_credentials: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            kinds: ALL_KINDS.iter().map(|s| s.to_string()).collect(),
            include_credentials: false,
        }
    }
}

#[derive(Default)]
pub struct ImportOptions {
    pub replace: bool,
}

#[derive(Debug, Default)]
pub struct ImportResult {
    pub counts: BTreeMap<String, usize>,
    pub skipped: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

pub async fn export_store(store: &dyn Store, opts: &ExportOptions) -> anyhow::Result<String> {
    let mut result = BTreeMap::<String, Value>::new();
    result.insert(
        ENVELOPE.to_string(),
        json!({
            "exported_at": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "source": format!("samlidp/{}", VERSION),
            "version": EXPORT_VERSION,
        }),
    );

    for kind in &opts.kinds {
        if !ALL_KINDS.contains(&kind.as_str()) {
            anyhow::bail!("unknown resource kind: {}", kind);
        }
        let prefix = format!("/{kind}/");
        let mut records = Map::new();
        for id in store.list(&prefix).await? {
            let mut record: Value = store.get_as(&format!("{prefix}{id}")).await?;
            if kind == "users" && !opts.include_credentials {
                if let Some(obj) = record.as_object_mut() {
                    obj.remove("hashed_password");
                }
            }
            records.insert(id, record);
        }
        result.insert(kind.clone(), Value::Object(records));
    }

    // BTreeMap serializes with sorted keys.
    Ok(serde_json::to_string_pretty(&result)?)
}

/// Import a document produced by [`export_store`].
///
/// User records follow the same credential rule as an API write: a
/// `password` is hashed through `credentials` and never stored.
pub async fn import_store(
    store: &dyn Store,
    credentials: &CredentialManager,
    json_str: &str,
    opts: &ImportOptions,
) -> anyhow::Result<ImportResult> {
    let data: BTreeMap<String, Value> = serde_json::from_str(json_str)?;

    let envelope = data
        .get(ENVELOPE)
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow::anyhow!("missing {} envelope", ENVELOPE))?;
    let version = envelope
        .get("version")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if !(1..=EXPORT_VERSION).contains(&version) {
        anyhow::bail!("unsupported export version: {}", version);
    }

    let mut result = ImportResult::default();

    let services: Vec<(String, Service)> = decode_kind(&data, &mut result);
    write_kind(store, services, opts, &data, &mut result).await?;

    let mut users: Vec<(String, User)> = decode_kind(&data, &mut result);
    for (id, user) in users.iter_mut() {
        if let Some(plaintext) = user.password.take() {
            user.hashed_password = Some(credentials.hash(plaintext).await?);
            continue;
        }
        // No credential in the document keeps the one already stored.
        if user.hashed_password.is_none() && !opts.replace {
            match store.get_as::<User>(&key::<User>(id)).await {
                Ok(existing) => user.hashed_password = existing.hashed_password,
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    write_kind(store, users, opts, &data, &mut result).await?;

    let shortcuts: Vec<(String, Shortcut)> = decode_kind(&data, &mut result);
    write_kind(store, shortcuts, opts, &data, &mut result).await?;

    let sessions: Vec<(String, Session)> = decode_kind(&data, &mut result);
    write_kind(store, sessions, opts, &data, &mut result).await?;

    Ok(result)
}

/// Decode every record of kind `R`; undecodable ones are skipped with a
/// warning.
fn decode_kind<R: Resource>(
    data: &BTreeMap<String, Value>,
    result: &mut ImportResult,
) -> Vec<(String, R)> {
    let Some(Value::Object(records)) = data.get(R::KIND) else {
        return Vec::new();
    };

    let mut decoded = Vec::with_capacity(records.len());
    let mut skipped = 0usize;
    for (id, value) in records {
        let record = serde_json::from_value::<R>(value.clone())
            .map_err(crate::errors::IdpError::malformed)
            .and_then(|mut record| {
                record.set_name(id);
                record.validate()?;
                Ok(record)
            });
        match record {
            Ok(record) => decoded.push((id.clone(), record)),
            Err(e) => {
                skipped += 1;
                result
                    .warnings
                    .push(format!("Skipped {} '{}': {}", R::KIND, id, e));
            }
        }
    }
    if skipped > 0 {
        result.skipped.insert(R::KIND.to_string(), skipped);
    }
    decoded
}

async fn write_kind<R: Resource>(
    store: &dyn Store,
    records: Vec<(String, R)>,
    opts: &ImportOptions,
    data: &BTreeMap<String, Value>,
    result: &mut ImportResult,
) -> anyhow::Result<()> {
    if !data.contains_key(R::KIND) {
        return Ok(());
    }

    if opts.replace {
        let prefix = format!("/{}/", R::KIND);
        for id in store.list(&prefix).await? {
            match store.delete(&format!("{prefix}{id}")).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    let count = records.len();
    for (id, record) in &records {
        store.put_as(&key::<R>(id), record).await?;
    }
    result.counts.insert(R::KIND.to_string(), count);
    Ok(())
}
