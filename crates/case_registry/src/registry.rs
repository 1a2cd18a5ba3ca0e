use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::domain::{CaseRecord, CaseSnapshot, CollectionKey};
use storage::{Storage, StoreError, Subscription};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// One lock per persisted collection. Acquire in field order to avoid deadlock.
#[derive(Default)]
struct CollectionLocks {
    queue: Mutex<()>,
    history: Mutex<()>,
    types: Mutex<()>,
}

/// Single source of truth for the queue, history and taxonomy collections.
///
/// Every mutation re-reads the collections it touches and writes them back
/// whole while holding their locks, so concurrent callers never lose updates.
#[derive(Clone)]
pub struct CaseRegistry {
    storage: Storage,
    locks: Arc<CollectionLocks>,
}

impl CaseRegistry {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            locks: Arc::new(CollectionLocks::default()),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Seeds missing collections. Must complete before any command is served.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let _queue = self.locks.queue.lock().await;
        let _history = self.locks.history.lock().await;
        let _types = self.locks.types.lock().await;
        let seeded = self.storage.initialize().await?;
        if !seeded.is_empty() {
            info!(?seeded, "seeded default collections");
        }
        Ok(())
    }

    pub fn subscribe(&self, keys: impl IntoIterator<Item = CollectionKey>) -> Subscription {
        self.storage.subscribe(keys)
    }

    /// Appends a new unclassified record unless the url is already queued or completed.
    pub async fn capture(
        &self,
        url: &str,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let _queue = self.locks.queue.lock().await;
        let _history = self.locks.history.lock().await;

        let mut queue = self.storage.load_records(CollectionKey::Queue).await?;
        let history = self.storage.load_records(CollectionKey::History).await?;
        if position(&queue, url).is_some() || position(&history, url).is_some() {
            debug!(url, "capture skipped; url already tracked");
            return Ok(false);
        }

        let opened_at = opened_at.unwrap_or_else(Utc::now);
        queue.push(CaseRecord::captured(url, opened_at));
        self.storage
            .store_records(CollectionKey::Queue, &queue)
            .await?;
        info!(url, %opened_at, queued = queue.len(), "case captured");
        Ok(true)
    }

    /// Sets the label on the first record matching `url`, queue before history.
    ///
    /// The label is free text; it is not checked against the taxonomy.
    pub async fn classify(&self, url: &str, case_type: &str) -> Result<bool, StoreError> {
        let _queue = self.locks.queue.lock().await;
        let _history = self.locks.history.lock().await;

        for key in [CollectionKey::Queue, CollectionKey::History] {
            let mut records = self.storage.load_records(key).await?;
            if let Some(idx) = position(&records, url) {
                records[idx].case_type = case_type.to_string();
                self.storage.store_records(key, &records).await?;
                debug!(url, case_type, collection = %key, "case classified");
                return Ok(true);
            }
        }

        debug!(url, "classify skipped; url not tracked");
        Ok(false)
    }

    /// Moves a classified record from the queue to the history.
    ///
    /// The queue write is confirmed before the history write is issued. If the
    /// history write then fails, the record is in neither collection; the
    /// error is returned and nothing is rolled back.
    pub async fn complete(&self, url: &str) -> Result<bool, StoreError> {
        let _queue = self.locks.queue.lock().await;
        let _history = self.locks.history.lock().await;

        let mut queue = self.storage.load_records(CollectionKey::Queue).await?;
        let Some(idx) = position(&queue, url) else {
            debug!(url, "complete skipped; url not queued");
            return Ok(false);
        };
        if !queue[idx].is_classified() {
            debug!(url, "complete skipped; case is unclassified");
            return Ok(false);
        }
        let mut history = self.storage.load_records(CollectionKey::History).await?;

        let record = queue.remove(idx);
        let now = Utc::now();
        if record.opened_at > now {
            debug!(
                url,
                opened_at = %record.opened_at,
                %now,
                "opened_at is ahead of the clock; completing at opened_at"
            );
        }
        let completed_at = now.max(record.opened_at);
        history.push(record.into_completed(completed_at));

        self.storage
            .store_records(CollectionKey::Queue, &queue)
            .await?;
        if let Err(err) = self
            .storage
            .store_records(CollectionKey::History, &history)
            .await
        {
            error!(url, %err, "case left the queue but was not recorded in history");
            return Err(err);
        }

        info!(url, %completed_at, "case completed");
        Ok(true)
    }

    /// Drops a queued record regardless of classification. History is untouched.
    pub async fn remove(&self, url: &str) -> Result<bool, StoreError> {
        let _queue = self.locks.queue.lock().await;

        let mut queue = self.storage.load_records(CollectionKey::Queue).await?;
        let before = queue.len();
        queue.retain(|record| record.url != url);
        if queue.len() == before {
            debug!(url, "remove skipped; url not queued");
            return Ok(false);
        }
        self.storage
            .store_records(CollectionKey::Queue, &queue)
            .await?;
        info!(url, "queued case removed");
        Ok(true)
    }

    /// Exact-match insert; `"Other"` and `"other"` are distinct labels.
    pub async fn add_type(&self, name: &str) -> Result<bool, StoreError> {
        let _types = self.locks.types.lock().await;

        let mut types = self.storage.load_types().await?;
        if types.iter().any(|existing| existing == name) {
            return Ok(false);
        }
        types.push(name.to_string());
        self.storage.store_types(&types).await?;
        info!(name, "case type added");
        Ok(true)
    }

    /// Records already carrying the label keep it.
    pub async fn remove_type(&self, name: &str) -> Result<bool, StoreError> {
        let _types = self.locks.types.lock().await;

        let mut types = self.storage.load_types().await?;
        let before = types.len();
        types.retain(|existing| existing != name);
        if types.len() == before {
            return Ok(false);
        }
        self.storage.store_types(&types).await?;
        info!(name, "case type removed");
        Ok(true)
    }

    pub async fn clear_history(&self) -> Result<(), StoreError> {
        let _history = self.locks.history.lock().await;
        self.storage
            .store_records(CollectionKey::History, &[])
            .await?;
        info!("history cleared");
        Ok(())
    }

    /// Consistent view of all three collections; never observes a half-applied completion.
    pub async fn snapshot(&self) -> Result<CaseSnapshot, StoreError> {
        let _queue = self.locks.queue.lock().await;
        let _history = self.locks.history.lock().await;
        let _types = self.locks.types.lock().await;

        Ok(CaseSnapshot {
            queue: self.storage.load_records(CollectionKey::Queue).await?,
            history: self.storage.load_records(CollectionKey::History).await?,
            case_types: self.storage.load_types().await?,
        })
    }
}

fn position(records: &[CaseRecord], url: &str) -> Option<usize> {
    records.iter().position(|record| record.url == url)
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
