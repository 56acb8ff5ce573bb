//! Microlock etcd backend
//!
//! A [`microlock_core::CoordinationStore`] speaking the etcd v2 keys API over
//! HTTP, with multi-endpoint failover and long-poll watches.

pub mod config;
mod response;
pub mod store;
mod watcher;

pub use config::EtcdClientConfig;
pub use store::EtcdStore;
