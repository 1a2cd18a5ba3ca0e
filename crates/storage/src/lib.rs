use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::{default_case_types, CaseRecord, CollectionKey},
    protocol::ChangeEvent,
};
use thiserror::Error;
use tracing::{debug, warn};

mod memory;
pub mod notify;
mod sqlite;

pub use memory::MemoryStore;
pub use notify::{ChangeNotifier, Subscription, DEFAULT_EVENT_BUFFER};
pub use sqlite::SqliteStore;

/// Asynchronous whole-key get/set over a durable store.
///
/// No transactional guarantee: callers that need read-modify-write must
/// serialize themselves.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable for key '{key}': {source}")]
    Backend {
        key: CollectionKey,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("collection '{key}' holds malformed data: {source}")]
    Corrupt {
        key: CollectionKey,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode collection '{key}': {source}")]
    Serialize {
        key: CollectionKey,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn backend(key: CollectionKey, err: anyhow::Error) -> Self {
        StoreError::Backend {
            key,
            source: err.into(),
        }
    }
}

/// Typed handle over the three persisted collections.
///
/// Every successful `set` publishes a [`ChangeEvent`] naming the key written.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn KeyValueStore>,
    notifier: ChangeNotifier,
}

impl Storage {
    /// Opens (creating if needed) the sqlite database at `database_url`.
    pub async fn new(database_url: &str) -> Result<Self> {
        let backend = SqliteStore::new(database_url).await?;
        Ok(Self::with_backend(
            Arc::new(backend),
            ChangeNotifier::default(),
        ))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryStore::new()), ChangeNotifier::default())
    }

    pub fn with_backend(backend: Arc<dyn KeyValueStore>, notifier: ChangeNotifier) -> Self {
        Self { backend, notifier }
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn subscribe(&self, keys: impl IntoIterator<Item = CollectionKey>) -> Subscription {
        self.notifier.subscribe(keys)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.backend.health_check().await
    }

    pub async fn get(&self, key: CollectionKey) -> Result<Option<Value>, StoreError> {
        self.backend
            .get(key.as_str())
            .await
            .map_err(|err| StoreError::backend(key, err))
    }

    pub async fn set(&self, key: CollectionKey, value: &Value) -> Result<(), StoreError> {
        self.backend
            .set(key.as_str(), value)
            .await
            .map_err(|err| StoreError::backend(key, err))?;
        let reached = self.notifier.publish(ChangeEvent::single(key));
        debug!(%key, subscribers = reached, "collection persisted");
        Ok(())
    }

    /// Seeds each collection whose stored value is absent or not a well-formed
    /// sequence of the collection's element type.
    ///
    /// Returns the keys that were (re)seeded. Run once at process start,
    /// before any command is served.
    pub async fn initialize(&self) -> Result<Vec<CollectionKey>, StoreError> {
        let mut seeded = Vec::new();
        for key in CollectionKey::ALL {
            let current = self.get(key).await?;
            match &current {
                Some(value) if is_well_formed(key, value) => continue,
                Some(_) => warn!(%key, "stored collection is malformed; reseeding default"),
                None => {}
            }
            let seed = match key {
                CollectionKey::CaseTypes => Value::from(default_case_types()),
                CollectionKey::Queue | CollectionKey::History => Value::Array(Vec::new()),
            };
            self.set(key, &seed).await?;
            seeded.push(key);
        }
        Ok(seeded)
    }

    pub async fn load_records(&self, key: CollectionKey) -> Result<Vec<CaseRecord>, StoreError> {
        match self.get(key).await? {
            Some(value @ Value::Array(_)) => serde_json::from_value(value)
                .map_err(|source| StoreError::Corrupt { key, source }),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn store_records(
        &self,
        key: CollectionKey,
        records: &[CaseRecord],
    ) -> Result<(), StoreError> {
        let value =
            serde_json::to_value(records).map_err(|source| StoreError::Serialize { key, source })?;
        self.set(key, &value).await
    }

    pub async fn load_types(&self) -> Result<Vec<String>, StoreError> {
        let key = CollectionKey::CaseTypes;
        match self.get(key).await? {
            Some(value @ Value::Array(_)) => serde_json::from_value(value)
                .map_err(|source| StoreError::Corrupt { key, source }),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn store_types(&self, types: &[String]) -> Result<(), StoreError> {
        self.set(CollectionKey::CaseTypes, &Value::from(types.to_vec()))
            .await
    }
}

fn is_well_formed(key: CollectionKey, value: &Value) -> bool {
    if !value.is_array() {
        return false;
    }
    match key {
        CollectionKey::CaseTypes => Vec::<String>::deserialize(value).is_ok(),
        CollectionKey::Queue | CollectionKey::History => {
            Vec::<CaseRecord>::deserialize(value).is_ok()
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
