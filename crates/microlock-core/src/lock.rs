//! Lock handle
//!
//! A `Microlock` binds a key, a holder id and a lease to a shared store
//! connection. It never remembers whether it holds the lock: each operation is
//! answered by the store at call time.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{self, DEFAULT_TTL_SECONDS, LockConfig};
use crate::error::{LockError, Result};
use crate::listener::{EventKind, FnLockListener, ListenerId, Listeners, LockEvent, LockListener};
use crate::protocol;
use crate::relay::WatchRelay;
use crate::store::{CoordinationStore, StoreResponse};

#[derive(Debug, Clone, Default)]
enum TtlInput {
    #[default]
    Default,
    Seconds(i64),
    Text(String),
}

/// Builder validating lock parameters before a handle is created.
#[derive(Default)]
pub struct MicrolockBuilder {
    store: Option<Arc<dyn CoordinationStore>>,
    key: Option<String>,
    holder_id: Option<String>,
    ttl: TtlInput,
}

impl MicrolockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from declarative settings; explicit setters called afterwards win.
    pub fn from_config(config: &LockConfig) -> Self {
        Self {
            store: None,
            key: config.key.clone(),
            holder_id: config.holder_id.clone(),
            ttl: config
                .ttl
                .clone()
                .map(TtlInput::Text)
                .unwrap_or_default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn holder_id(mut self, holder_id: impl Into<String>) -> Self {
        self.holder_id = Some(holder_id.into());
        self
    }

    /// Lease in seconds; values below one are raised to one.
    pub fn ttl(mut self, ttl: i64) -> Self {
        self.ttl = TtlInput::Seconds(ttl);
        self
    }

    /// Lease given as text, e.g. from a command line or environment variable.
    pub fn ttl_str(mut self, ttl: &str) -> Self {
        self.ttl = TtlInput::Text(ttl.to_string());
        self
    }

    /// Validate the parameters, open the key watch and start relaying events.
    ///
    /// The relay task needs a Tokio runtime; outside one this fails with
    /// [`LockError::RuntimeRequired`]. Nothing is written to the store.
    pub fn build(self) -> Result<Microlock> {
        let store = self.store.ok_or(LockError::StoreRequired)?;
        let key = self
            .key
            .filter(|k| !k.is_empty())
            .ok_or(LockError::KeyRequired)?;
        let holder_id = self
            .holder_id
            .filter(|h| !h.is_empty())
            .ok_or(LockError::HolderRequired)?;
        let ttl = match self.ttl {
            TtlInput::Default => DEFAULT_TTL_SECONDS,
            TtlInput::Seconds(secs) => config::clamp_ttl(secs),
            TtlInput::Text(raw) => config::parse_ttl(&raw)?,
        };

        tokio::runtime::Handle::try_current().map_err(|_| LockError::RuntimeRequired)?;

        let watch = store.watch(&key)?;
        let listeners = Arc::new(Listeners::new());
        let relay = WatchRelay::spawn(watch, listeners.clone());

        info!(
            "Lock handle created: key={}, holder={}, ttl={}s",
            key, holder_id, ttl
        );

        Ok(Microlock {
            store,
            key,
            holder_id,
            ttl,
            listeners,
            relay,
        })
    }
}

/// Single-key, single-owner advisory lock with a store-side lease.
///
/// Concurrent calls on the same handle are not serialized: each call sends its
/// own request and the store decides the order. Callers needing single-flight
/// behaviour must add it on top.
///
/// The watch subscription lives until [`Microlock::destroy`] is called.
/// Dropping a handle without destroying it leaves the subscription running.
pub struct Microlock {
    store: Arc<dyn CoordinationStore>,
    key: String,
    holder_id: String,
    ttl: u64,
    listeners: Arc<Listeners>,
    relay: WatchRelay,
}

impl fmt::Debug for Microlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Microlock")
            .field("key", &self.key)
            .field("holder_id", &self.holder_id)
            .field("ttl", &self.ttl)
            .field("listeners", &self.listeners.total())
            .finish()
    }
}

impl Microlock {
    /// Create a lock on `key` for `holder_id` with a lease of `ttl` seconds.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        key: impl Into<String>,
        holder_id: impl Into<String>,
        ttl: i64,
    ) -> Result<Self> {
        Self::builder()
            .store(store)
            .key(key)
            .holder_id(holder_id)
            .ttl(ttl)
            .build()
    }

    pub fn builder() -> MicrolockBuilder {
        MicrolockBuilder::new()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Effective lease in seconds
    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    /// Acquire the lock: create the key with our holder id, only if absent.
    pub async fn lock(&self) -> Result<StoreResponse> {
        debug!("Acquiring lock: key={}, holder={}", self.key, self.holder_id);
        match self
            .store
            .set(
                &self.key,
                Some(&self.holder_id),
                protocol::acquire_options(self.ttl),
            )
            .await
        {
            Ok(resp) => {
                info!("Lock acquired: key={}, holder={}", self.key, self.holder_id);
                Ok(resp)
            }
            Err(e) => Err(self.report(protocol::classify_acquire_error(e, &self.key))),
        }
    }

    /// Release the lock: delete the key only if it still holds our holder id.
    pub async fn unlock(&self) -> Result<StoreResponse> {
        debug!("Releasing lock: key={}, holder={}", self.key, self.holder_id);
        match self
            .store
            .compare_and_delete(&self.key, &self.holder_id)
            .await
        {
            Ok(resp) => {
                info!("Lock released: key={}, holder={}", self.key, self.holder_id);
                Ok(resp)
            }
            Err(e) => Err(self.report(protocol::classify_release_error(
                e,
                &self.key,
                &self.holder_id,
            ))),
        }
    }

    /// Reset the lease of a lock we hold, leaving its value untouched.
    pub async fn renew(&self) -> Result<StoreResponse> {
        debug!("Renewing lock: key={}, holder={}", self.key, self.holder_id);
        match self
            .store
            .set(
                &self.key,
                None,
                protocol::renew_options(&self.holder_id, self.ttl),
            )
            .await
        {
            Ok(resp) => {
                debug!("Lock renewed: key={}, ttl={}s", self.key, self.ttl);
                Ok(resp)
            }
            Err(e) => Err(self.report(protocol::classify_renew_error(
                e,
                &self.key,
                &self.holder_id,
            ))),
        }
    }

    /// Broadcast contention failures on the error channel before returning them.
    fn report(&self, err: LockError) -> LockError {
        if err.is_contention() {
            debug!("Lock contention: {}", err);
            self.listeners.emit(&LockEvent::Error(&err));
        } else {
            warn!("Lock store request failed: key={}, error={}", self.key, err);
        }
        err
    }

    /// Register a listener for one event kind.
    pub fn add_listener(&self, kind: EventKind, listener: Arc<dyn LockListener>) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    /// Register a closure for one event kind.
    pub fn on<F>(&self, kind: EventKind, f: F) -> ListenerId
    where
        F: Fn(&LockEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(kind, Arc::new(FnLockListener::new(f)))
    }

    /// Remove a single listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Remove every listener (returns the count of removed listeners).
    pub fn remove_all_listeners(&self) -> usize {
        self.listeners.clear()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.count(kind)
    }

    /// Stop watching the key and detach all listeners.
    ///
    /// Listeners are closed before the relay task is cancelled, so no listener
    /// is called after this returns unless it was already running on the relay
    /// task; that call is allowed to finish.
    pub fn destroy(self) {
        let removed = self.listeners.close();
        self.relay.stop();
        info!(
            "Lock handle destroyed: key={}, holder={}, listeners_removed={}",
            self.key, self.holder_id, removed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn memory_store() -> Arc<dyn CoordinationStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_builder_validation_order() {
        let err = Microlock::builder().key("k").holder_id("h").build().unwrap_err();
        assert!(matches!(err, LockError::StoreRequired));

        let err = Microlock::builder()
            .store(memory_store())
            .holder_id("h")
            .build()
            .unwrap_err();
        assert!(matches!(err, LockError::KeyRequired));

        let err = Microlock::builder()
            .store(memory_store())
            .key("")
            .holder_id("h")
            .build()
            .unwrap_err();
        assert!(matches!(err, LockError::KeyRequired));

        let err = Microlock::builder()
            .store(memory_store())
            .key("k")
            .build()
            .unwrap_err();
        assert!(matches!(err, LockError::HolderRequired));

        let err = Microlock::builder()
            .store(memory_store())
            .key("k")
            .holder_id("h")
            .ttl_str("hello")
            .build()
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidTtl(_)));
    }

    #[tokio::test]
    async fn test_ttl_defaults_and_clamping() {
        let store = memory_store();

        let lock = Microlock::builder()
            .store(store.clone())
            .key("k")
            .holder_id("h")
            .build()
            .unwrap();
        assert_eq!(lock.ttl(), 1);
        lock.destroy();

        for (input, expected) in [(-4, 1), (0, 1), (1, 1), (42, 42)] {
            let lock = Microlock::new(store.clone(), "k", "h", input).unwrap();
            assert_eq!(lock.ttl(), expected);
            lock.destroy();
        }
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = LockConfig::new("/jobs/report", "node-7").with_ttl(30);
        let lock = MicrolockBuilder::from_config(&config)
            .store(memory_store())
            .build()
            .unwrap();

        assert_eq!(lock.key(), "/jobs/report");
        assert_eq!(lock.holder_id(), "node-7");
        assert_eq!(lock.ttl(), 30);
        lock.destroy();
    }

    #[tokio::test]
    async fn test_destroy_clears_listeners() {
        let lock = Microlock::new(memory_store(), "k", "h", 5).unwrap();
        lock.on(EventKind::Locked, |_| {});
        lock.on(EventKind::Unlocked, |_| {});
        lock.on(EventKind::Error, |_| {});
        assert_eq!(lock.listener_count(EventKind::Locked), 1);

        let listeners = lock.listeners.clone();
        assert_eq!(listeners.total(), 3);

        lock.destroy();
        assert_eq!(listeners.total(), 0);
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let err = Microlock::new(memory_store(), "k", "h", 5).unwrap_err();
        assert!(matches!(err, LockError::RuntimeRequired));
    }

    #[tokio::test]
    async fn test_destroy_silences_pending_events() {
        let store = memory_store();
        let lock = Microlock::new(store.clone(), "k", "h", 5).unwrap();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();
        lock.on(EventKind::Locked, move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let listeners = lock.listeners.clone();
        lock.lock().await.unwrap();
        lock.destroy();
        assert!(listeners.is_closed());

        // The notification for our own write may still be queued on the relay.
        listeners.emit(&LockEvent::Locked);
        tokio::task::yield_now().await;
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let lock = Microlock::new(memory_store(), "k", "h", 5).unwrap();
        let id = lock.on(EventKind::Locked, |_| {});
        assert!(lock.remove_listener(id));
        assert_eq!(lock.listener_count(EventKind::Locked), 0);
        assert_eq!(lock.remove_all_listeners(), 0);
        lock.destroy();
    }

    #[tokio::test]
    async fn test_debug_omits_store() {
        let lock = Microlock::new(memory_store(), "k", "h", 5).unwrap();
        let rendered = format!("{:?}", lock);
        assert!(rendered.contains("key: \"k\""));
        assert!(rendered.contains("ttl: 5"));
        lock.destroy();
    }
}
