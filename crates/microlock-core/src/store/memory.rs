// In-memory coordination store
// Implements the conditional write / delete / watch semantics of the etcd v2
// keys API inside the process, for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::error::{StoreError, StoreResult, error_code};
use super::model::{Action, Node, SetOptions, StoreResponse};
use super::{CoordinationStore, Watch};

// ============================================================================
// Stored entries
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    created_index: u64,
    modified_index: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    fn to_node(&self, key: &str, now: Instant) -> Node {
        Node {
            key: key.to_string(),
            value: Some(self.value.clone()),
            ttl: self.expires_at.map(|deadline| remaining_secs(deadline, now)),
            expiration: None,
            created_index: self.created_index,
            modified_index: self.modified_index,
        }
    }
}

/// Longest lease the timer is armed for; longer leases are cut to this.
const MAX_LEASE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn lease_deadline(now: Instant, ttl: u64) -> Instant {
    let lease = Duration::from_secs(ttl).min(MAX_LEASE);
    now.checked_add(lease)
        .unwrap_or_else(|| now + Duration::from_secs(24 * 60 * 60))
}

/// Remaining lease rounded up to whole seconds, as etcd reports it.
fn remaining_secs(deadline: Instant, now: Instant) -> i64 {
    let remaining = deadline.saturating_duration_since(now);
    let mut secs = remaining.as_secs() as i64;
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    secs
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    index: u64,
}

impl Entries {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }
}

struct Inner {
    entries: Mutex<Entries>,
    /// key -> live subscriptions
    watchers: DashMap<String, Vec<mpsc::UnboundedSender<StoreResponse>>>,
}

// ============================================================================
// Memory Store
// ============================================================================

/// Linearizable single-process store with lease expiry and change streams.
///
/// Every mutation happens under one lock and notifies watchers before the lock
/// is released, so watchers observe changes in index order.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Entries::default()),
                watchers: DashMap::new(),
            }),
        }
    }

    /// Current store index
    pub fn current_index(&self) -> u64 {
        self.inner.entries.lock().index
    }

    /// Number of subscriptions on `key` that are still open.
    pub fn watcher_count(&self, key: &str) -> usize {
        self.inner
            .watchers
            .get(key)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn notify(&self, key: &str, response: &StoreResponse) {
        if let Some(mut senders) = self.inner.watchers.get_mut(key) {
            senders.retain(|tx| tx.send(response.clone()).is_ok());
        }
    }

    /// Drop `key` if its lease ran out, telling watchers it expired.
    fn purge_expired(&self, entries: &mut Entries, key: &str, now: Instant) {
        let expired = entries.map.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            self.expire(entries, key);
        }
    }

    fn expire(&self, entries: &mut Entries, key: &str) {
        let Some(entry) = entries.map.remove(key) else {
            return;
        };
        let index = entries.next_index();
        debug!("Key expired: key={}, index={}", key, index);

        let node = Node {
            key: key.to_string(),
            created_index: entry.created_index,
            modified_index: index,
            ..Default::default()
        };
        let mut prev = entry.to_node(key, Instant::now());
        prev.ttl = None;
        self.notify(
            key,
            &StoreResponse::new(Action::Expire, Some(node), Some(prev)),
        );
    }

    /// Arm a timer that expires `key` at `deadline` unless the lease was reset.
    fn schedule_expiry(&self, key: &str, deadline: Instant) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let store = MemoryStore { inner };
            let mut entries = store.inner.entries.lock();
            let still_due = entries
                .map
                .get(&key)
                .is_some_and(|e| e.expires_at == Some(deadline));
            if still_due {
                store.expire(&mut entries, &key);
            }
        });
    }

    fn key_not_found(key: &str, index: u64) -> StoreError {
        StoreError::rejected(error_code::KEY_NOT_FOUND, "Key not found", key, index)
    }

    fn compare_failed(expected: &str, current: &str, index: u64) -> StoreError {
        StoreError::rejected(
            error_code::COMPARE_FAILED,
            "Compare failed",
            &format!("[{} != {}]", expected, current),
            index,
        )
    }

    fn check_preconditions(
        existing: Option<&Entry>,
        key: &str,
        options: &SetOptions,
        index: u64,
    ) -> StoreResult<()> {
        match (options.prev_exist, existing) {
            (Some(false), Some(_)) => {
                return Err(StoreError::rejected(
                    error_code::NODE_EXIST,
                    "Key already exists",
                    key,
                    index,
                ));
            }
            (Some(true), None) => return Err(Self::key_not_found(key, index)),
            _ => {}
        }

        if let Some(expected) = &options.prev_value {
            match existing {
                None => return Err(Self::key_not_found(key, index)),
                Some(entry) if &entry.value != expected => {
                    return Err(Self::compare_failed(expected, &entry.value, index));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    fn refresh(
        &self,
        entries: &mut Entries,
        key: &str,
        options: &SetOptions,
        now: Instant,
    ) -> StoreResult<StoreResponse> {
        let index = entries.index;
        let Some(ttl) = options.ttl else {
            return Err(StoreError::rejected(
                error_code::REFRESH_TTL_REQUIRED,
                "A TTL must be provided on refresh",
                "",
                index,
            ));
        };

        let existing = entries.map.get(key);
        if existing.is_none() {
            return Err(Self::key_not_found(key, index));
        }
        Self::check_preconditions(existing, key, options, index)?;

        let index = entries.next_index();
        let deadline = lease_deadline(now, ttl);
        let Some(entry) = entries.map.get_mut(key) else {
            return Err(Self::key_not_found(key, index));
        };
        let prev = entry.to_node(key, now);
        entry.modified_index = index;
        entry.expires_at = Some(deadline);
        let node = entry.to_node(key, now);

        self.schedule_expiry(key, deadline);
        debug!("Lease refreshed: key={}, ttl={}, index={}", key, ttl, index);

        let action = if options.prev_value.is_some() {
            Action::CompareAndSwap
        } else {
            Action::Update
        };
        // Refresh-only writes are invisible to watchers.
        Ok(StoreResponse::new(action, Some(node), Some(prev)))
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set(
        &self,
        key: &str,
        value: Option<&str>,
        options: SetOptions,
    ) -> StoreResult<StoreResponse> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        self.purge_expired(&mut entries, key, now);

        if options.refresh {
            if value.is_some_and(|v| !v.is_empty()) {
                return Err(StoreError::rejected(
                    error_code::REFRESH_VALUE,
                    "A TTL update cannot be combined with a value",
                    "",
                    entries.index,
                ));
            }
            return self.refresh(&mut entries, key, &options, now);
        }

        let Some(value) = value else {
            return Err(StoreError::rejected(
                error_code::VALUE_REQUIRED,
                "Value is Required in POST form",
                "",
                entries.index,
            ));
        };

        let existing = entries.map.get(key).cloned();
        Self::check_preconditions(existing.as_ref(), key, &options, entries.index)?;

        let index = entries.next_index();
        let action = match (options.prev_exist, &options.prev_value) {
            (Some(false), _) => Action::Create,
            (_, Some(_)) => Action::CompareAndSwap,
            (Some(true), _) => Action::Update,
            _ => Action::Set,
        };
        let created_index = match (&existing, action) {
            (Some(prev), Action::CompareAndSwap | Action::Update) => prev.created_index,
            _ => index,
        };
        let deadline = options.ttl.map(|ttl| lease_deadline(now, ttl));

        let entry = Entry {
            value: value.to_string(),
            created_index,
            modified_index: index,
            expires_at: deadline,
        };
        let node = entry.to_node(key, now);
        entries.map.insert(key.to_string(), entry);

        if let Some(deadline) = deadline {
            self.schedule_expiry(key, deadline);
        }
        debug!("Key written: key={}, action={}, index={}", key, action, index);

        let prev = existing.map(|e| e.to_node(key, now));
        let response = StoreResponse::new(action, Some(node), prev);
        self.notify(key, &response);
        Ok(response)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        prev_value: &str,
    ) -> StoreResult<StoreResponse> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        self.purge_expired(&mut entries, key, now);

        let index = entries.index;
        match entries.map.get(key) {
            None => return Err(Self::key_not_found(key, index)),
            Some(entry) if entry.value != prev_value => {
                return Err(Self::compare_failed(prev_value, &entry.value, index));
            }
            Some(_) => {}
        }

        let index = entries.next_index();
        let Some(entry) = entries.map.remove(key) else {
            return Err(Self::key_not_found(key, index));
        };
        debug!("Key compare-and-deleted: key={}, index={}", key, index);

        let node = Node {
            key: key.to_string(),
            created_index: entry.created_index,
            modified_index: index,
            ..Default::default()
        };
        let response = StoreResponse::new(
            Action::CompareAndDelete,
            Some(node),
            Some(entry.to_node(key, now)),
        );
        self.notify(key, &response);
        Ok(response)
    }

    async fn get(&self, key: &str) -> StoreResult<StoreResponse> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        self.purge_expired(&mut entries, key, now);

        match entries.map.get(key) {
            Some(entry) => Ok(StoreResponse::new(
                Action::Get,
                Some(entry.to_node(key, now)),
                None,
            )),
            None => Err(Self::key_not_found(key, entries.index)),
        }
    }

    fn watch(&self, key: &str) -> StoreResult<Watch> {
        let (tx, watch) = Watch::channel(key);
        self.inner
            .watchers
            .entry(key.to_string())
            .or_default()
            .push(tx);
        debug!("Watch opened: key={}", key);
        Ok(watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Conflict;

    #[tokio::test]
    async fn test_create_requires_absence() {
        let store = MemoryStore::new();
        let opts = SetOptions::new().ttl(5).prev_exist(false);

        let resp = store.set("/lock", Some("a"), opts.clone()).await.unwrap();
        assert_eq!(resp.action, Action::Create);
        let node = resp.node.unwrap();
        assert_eq!(node.value.as_deref(), Some("a"));
        assert_eq!(node.ttl, Some(5));

        let err = store.set("/lock", Some("b"), opts).await.unwrap_err();
        assert_eq!(err.conflict(), Some(Conflict::KeyExists));
    }

    #[tokio::test]
    async fn test_plain_set_without_value_is_rejected() {
        let store = MemoryStore::new();
        let err = store
            .set("/lock", None, SetOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(error_code::VALUE_REQUIRED));
        assert_eq!(err.conflict(), None);
    }

    #[tokio::test]
    async fn test_compare_and_delete_codes() {
        let store = MemoryStore::new();

        let err = store.compare_and_delete("/lock", "a").await.unwrap_err();
        assert_eq!(err.conflict(), Some(Conflict::KeyNotFound));

        store
            .set("/lock", Some("a"), SetOptions::new())
            .await
            .unwrap();
        let err = store.compare_and_delete("/lock", "b").await.unwrap_err();
        assert_eq!(err.conflict(), Some(Conflict::CompareFailed));

        let resp = store.compare_and_delete("/lock", "a").await.unwrap();
        assert_eq!(resp.action, Action::CompareAndDelete);
        assert_eq!(resp.prev_node.unwrap().value.as_deref(), Some("a"));
        assert!(store.get("/lock").await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_keeps_value_and_skips_watchers() {
        let store = MemoryStore::new();
        let mut watch = store.watch("/lock").unwrap();

        store
            .set("/lock", Some("a"), SetOptions::new().ttl(2).prev_exist(false))
            .await
            .unwrap();
        assert_eq!(watch.recv().await.unwrap().action, Action::Create);

        let resp = store
            .set(
                "/lock",
                None,
                SetOptions::new().ttl(10).prev_value("a").refresh(true),
            )
            .await
            .unwrap();
        let node = resp.node.unwrap();
        assert_eq!(node.value.as_deref(), Some("a"));
        assert_eq!(node.ttl, Some(10));

        // Nothing was delivered for the refresh.
        store
            .set("/other", Some("x"), SetOptions::new())
            .await
            .unwrap();
        assert!(watch.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_of_missing_key_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .set(
                "/lock",
                None,
                SetOptions::new().ttl(1).prev_value("a").refresh(true),
            )
            .await
            .unwrap_err();
        assert_eq!(err.conflict(), Some(Conflict::KeyNotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_notifies_watchers() {
        let store = MemoryStore::new();
        let mut watch = store.watch("/lock").unwrap();

        store
            .set("/lock", Some("a"), SetOptions::new().ttl(1).prev_exist(false))
            .await
            .unwrap();
        assert_eq!(watch.recv().await.unwrap().action, Action::Create);

        let expired = watch.recv().await.unwrap();
        assert_eq!(expired.action, Action::Expire);
        assert!(!expired.node.unwrap().has_ttl());
        assert!(store.get("/lock").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_postpones_expiry() {
        let store = MemoryStore::new();
        store
            .set("/lock", Some("a"), SetOptions::new().ttl(2).prev_exist(false))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        store
            .set(
                "/lock",
                None,
                SetOptions::new().ttl(2).prev_value("a").refresh(true),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(store.get("/lock").await.is_ok());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.get("/lock").await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_capped() {
        let store = MemoryStore::new();
        let huge = i64::MAX as u64;

        let resp = store
            .set("/lock", Some("a"), SetOptions::new().ttl(huge).prev_exist(false))
            .await
            .unwrap();
        let ttl = resp.node.unwrap().ttl.unwrap();
        assert_eq!(ttl, MAX_LEASE.as_secs() as i64);

        let resp = store
            .set(
                "/lock",
                None,
                SetOptions::new().ttl(u64::MAX).prev_value("a").refresh(true),
            )
            .await
            .unwrap();
        assert!(resp.node.unwrap().has_ttl());
        assert!(store.get("/lock").await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_watchers_are_pruned() {
        let store = MemoryStore::new();
        let mut watch = store.watch("/lock").unwrap();
        assert_eq!(store.watcher_count("/lock"), 1);

        watch.stop();
        assert_eq!(store.watcher_count("/lock"), 0);

        store
            .set("/lock", Some("a"), SetOptions::new())
            .await
            .unwrap();
        assert!(store.inner.watchers.get("/lock").unwrap().is_empty());
    }
}
