//! Coordination store abstraction
//!
//! The lock never talks to a concrete store. It needs conditional writes with a
//! lease, a conditional delete and a change stream on one key; any store that
//! can provide those behind [`CoordinationStore`] can back a [`crate::Microlock`].

pub mod error;
pub mod memory;
pub mod model;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use self::error::{Conflict, StoreError, StoreResult, error_code};
pub use self::memory::MemoryStore;
pub use self::model::{Action, Node, SetOptions, StoreResponse};

/// Capability set a coordination store must offer.
///
/// Implementations are shared between every lock built on them and must be safe
/// for concurrent use.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Conditional write. `value` is `None` only for refresh-only writes.
    async fn set(
        &self,
        key: &str,
        value: Option<&str>,
        options: SetOptions,
    ) -> StoreResult<StoreResponse>;

    /// Delete `key` only if it currently holds `prev_value`.
    async fn compare_and_delete(&self, key: &str, prev_value: &str)
    -> StoreResult<StoreResponse>;

    /// Read the current record of `key`.
    async fn get(&self, key: &str) -> StoreResult<StoreResponse>;

    /// Open a change subscription on `key`.
    fn watch(&self, key: &str) -> StoreResult<Watch>;
}

/// Receiving end of a change subscription on a single key.
///
/// The store keeps the sending half; dropping or stopping the `Watch` ends the
/// subscription on the store side the next time it tries to deliver.
#[derive(Debug)]
pub struct Watch {
    key: String,
    rx: mpsc::UnboundedReceiver<StoreResponse>,
}

impl Watch {
    /// Create a connected sender / watch pair for `key`.
    pub fn channel(key: &str) -> (mpsc::UnboundedSender<StoreResponse>, Watch) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Watch {
                key: key.to_string(),
                rx,
            },
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next notification, or `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<StoreResponse> {
        self.rx.recv().await
    }

    /// Terminate the subscription.
    pub fn stop(&mut self) {
        self.rx.close();
    }
}
