//! Long-poll watch loop
//!
//! One task per [`microlock_core::Watch`]. It polls `?wait=true&waitIndex=n`
//! in a loop, forwarding every change in index order, and exits as soon as
//! the receiving side is closed or dropped.

use std::sync::Arc;

use microlock_core::StoreResponse;
use microlock_core::store::{StoreError, error_code};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::store::EtcdInner;

/// What the loop does after one poll.
#[derive(Debug, PartialEq, Eq)]
enum Next {
    /// Poll again from this index (`None`: from "now")
    Poll(Option<u64>),
    /// Sleep for the retry delay, then poll from this index
    Backoff(Option<u64>),
}

/// Decide the next wait index from the outcome of a poll.
fn advance(wait_index: Option<u64>, outcome: &Result<Option<StoreResponse>, StoreError>) -> Next {
    match outcome {
        Ok(Some(change)) => Next::Poll(change.modified_index().map(|i| i + 1).or(wait_index)),
        Ok(None) => Next::Poll(wait_index),
        // History compacted past our index: resume from the store's current index.
        Err(StoreError::Rejected { code, index, .. }) if *code == error_code::EVENT_INDEX_CLEARED => {
            Next::Poll(Some(index + 1))
        }
        Err(_) => Next::Backoff(wait_index),
    }
}

pub(crate) fn spawn(inner: Arc<EtcdInner>, key: String, tx: mpsc::UnboundedSender<StoreResponse>) {
    tokio::spawn(async move {
        debug!("etcd watch started for {}", key);
        let mut wait_index = None;

        loop {
            let outcome = tokio::select! {
                _ = tx.closed() => break,
                outcome = inner.poll_change(&key, wait_index) => outcome,
            };

            match advance(wait_index, &outcome) {
                Next::Poll(next) => wait_index = next,
                Next::Backoff(next) => {
                    if let Err(e) = &outcome {
                        warn!("etcd watch on {} failed, retrying: {}", key, e);
                    }
                    wait_index = next;
                    tokio::select! {
                        _ = tx.closed() => break,
                        _ = tokio::time::sleep(inner.watch_retry()) => {}
                    }
                }
            }

            if let Ok(Some(change)) = outcome {
                trace!("etcd watch {} -> {}", key, change.action);
                if tx.send(change).is_err() {
                    break;
                }
            }
        }

        debug!("etcd watch stopped for {}", key);
    });
}
