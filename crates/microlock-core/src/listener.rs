//! Lock event listener trait and event types

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::LockError;

/// Named event channels of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Locked,
    Unlocked,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Locked => "locked",
            EventKind::Unlocked => "unlocked",
            EventKind::Error => "error",
        }
    }
}

/// Event delivered to lock listeners.
///
/// `Locked` and `Unlocked` are key-presence transitions observed on the store;
/// they say nothing about which holder caused them. `Error` carries a
/// contention failure of an operation on this lock.
#[derive(Debug, Clone, Copy)]
pub enum LockEvent<'a> {
    Locked,
    Unlocked,
    Error(&'a LockError),
}

impl LockEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            LockEvent::Locked => EventKind::Locked,
            LockEvent::Unlocked => EventKind::Unlocked,
            LockEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Trait for receiving lock events.
pub trait LockListener: Send + Sync + 'static {
    /// Called for every event of the kind this listener was registered for.
    fn on_event(&self, event: &LockEvent<'_>);
}

/// A simple listener that invokes a closure.
pub struct FnLockListener<F>
where
    F: Fn(&LockEvent<'_>) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnLockListener<F>
where
    F: Fn(&LockEvent<'_>) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> LockListener for FnLockListener<F>
where
    F: Fn(&LockEvent<'_>) + Send + Sync + 'static,
{
    fn on_event(&self, event: &LockEvent<'_>) {
        (self.f)(event);
    }
}

/// Handle returned on registration, used to remove a single listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: EventKind,
    listener: Arc<dyn LockListener>,
}

/// Listener registry shared by a lock and its watch relay.
#[derive(Default)]
pub(crate) struct Listeners {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Listeners {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, kind: EventKind, listener: Arc<dyn LockListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registrations.write().push(Registration { id, kind, listener });
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    /// Remove all listeners (returns the count of removed listeners).
    pub(crate) fn clear(&self) -> usize {
        let mut registrations = self.registrations.write();
        let count = registrations.len();
        registrations.clear();
        count
    }

    /// Stop all further delivery and remove every listener.
    ///
    /// Returns the count of removed listeners. A listener already running
    /// when this is called finishes its current call.
    pub(crate) fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.clear()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.registrations
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    pub(crate) fn total(&self) -> usize {
        self.registrations.read().len()
    }

    /// Deliver `event` to its listeners in registration order.
    ///
    /// The registry lock is not held while listeners run, so a listener may
    /// register or remove listeners itself. Once the registry is closed no
    /// further listener is called, even mid-delivery.
    pub(crate) fn emit(&self, event: &LockEvent<'_>) {
        if self.is_closed() {
            return;
        }
        let kind = event.kind();
        let targets: Vec<Arc<dyn LockListener>> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.listener.clone())
            .collect();

        for listener in targets {
            if self.is_closed() {
                return;
            }
            listener.on_event(event);
        }
    }
}
