//! Microlock Core - advisory locks on a CAS + TTL coordination store
//!
//! This crate provides:
//! - `Microlock`: a single-key, single-owner lock whose state lives only in the store
//! - The acquire / release / renew protocol and its conflict classification
//! - A watch relay turning key notifications into `locked` / `unlocked` events
//! - The `CoordinationStore` trait and an in-memory implementation

pub mod config;
pub mod error;
pub mod listener;
pub mod lock;
pub mod protocol;
pub mod relay;
pub mod store;

pub use config::LockConfig;
pub use error::{LockError, Result};
pub use listener::{EventKind, FnLockListener, ListenerId, LockEvent, LockListener};
pub use lock::{Microlock, MicrolockBuilder};
pub use store::{
    Action, CoordinationStore, MemoryStore, Node, SetOptions, StoreError, StoreResponse, Watch,
};
