//! Watch relay: store change stream -> lock events

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::listener::{Listeners, LockEvent};
use crate::store::{Action, Node, StoreResponse, Watch};

/// Translate one store notification into lock events.
///
/// A conditional delete means the lock was released; any change whose node
/// carries a lease means the key is held. Everything else (plain expiry,
/// lease-less writes) yields nothing.
pub fn translate(response: &StoreResponse) -> Vec<LockEvent<'static>> {
    let mut events = Vec::with_capacity(1);
    if response.action == Action::CompareAndDelete {
        events.push(LockEvent::Unlocked);
    }
    if response.node.as_ref().is_some_and(Node::has_ttl) {
        events.push(LockEvent::Locked);
    }
    events
}

/// Background task forwarding a key's notifications to the lock's listeners.
pub(crate) struct WatchRelay {
    key: String,
    task: JoinHandle<()>,
}

impl WatchRelay {
    pub(crate) fn spawn(mut watch: Watch, listeners: Arc<Listeners>) -> Self {
        let key = watch.key().to_string();
        let task = tokio::spawn(async move {
            while let Some(response) = watch.recv().await {
                let events = translate(&response);
                if events.is_empty() {
                    trace!(
                        "Ignoring notification: key={}, action={}",
                        watch.key(),
                        response.action
                    );
                    continue;
                }
                for event in events {
                    debug!(
                        "Relaying lock event: key={}, event={}",
                        watch.key(),
                        event.kind().as_str()
                    );
                    listeners.emit(&event);
                }
            }
            debug!("Watch stream ended: key={}", watch.key());
        });

        Self { key, task }
    }

    /// Terminate the subscription. The watch is dropped with the task.
    pub(crate) fn stop(self) {
        debug!("Stopping watch relay: key={}", self.key);
        self.task.abort();
    }
}
