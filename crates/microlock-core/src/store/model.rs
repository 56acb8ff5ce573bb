//! Wire model shared by every coordination store adapter
//!
//! The shapes follow the etcd v2 keys API: every write and every watch
//! notification is a `StoreResponse` carrying the action that happened, the
//! node after the action and, when there was one, the node before it.

use serde::{Deserialize, Serialize};

/// Kind of change reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Get,
    Set,
    Create,
    Update,
    Delete,
    CompareAndSwap,
    CompareAndDelete,
    Expire,
    /// Actions this crate does not know about are carried through untouched.
    #[serde(other)]
    Unknown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::Set => "set",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::CompareAndSwap => "compareAndSwap",
            Action::CompareAndDelete => "compareAndDelete",
            Action::Expire => "expire",
            Action::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single key record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Remaining lease in seconds, present only on keys written with a TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,

    /// RFC 3339 expiry instant as reported by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,

    #[serde(default)]
    pub created_index: u64,

    #[serde(default)]
    pub modified_index: u64,
}

impl Node {
    /// Create a node record for `key` without value or lease.
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    /// Whether the node carries a lease; a zero TTL counts as none.
    pub fn has_ttl(&self) -> bool {
        self.ttl.is_some_and(|ttl| ttl > 0)
    }
}

/// Store acknowledgement of a write, and payload of a watch notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResponse {
    pub action: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_node: Option<Node>,
}

impl StoreResponse {
    pub fn new(action: Action, node: Option<Node>, prev_node: Option<Node>) -> Self {
        Self {
            action,
            node,
            prev_node,
        }
    }

    /// Index of the change this response describes, if the store reported one.
    pub fn modified_index(&self) -> Option<u64> {
        self.node.as_ref().map(|n| n.modified_index)
    }
}

/// Preconditions and lease settings for a conditional write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// Lease in seconds
    pub ttl: Option<u64>,
    /// `Some(false)`: key must not exist; `Some(true)`: key must exist
    pub prev_exist: Option<bool>,
    /// Key must currently hold exactly this value
    pub prev_value: Option<String>,
    /// Only reset the lease; the value is left untouched and watchers are not woken
    pub refresh: bool,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn prev_exist(mut self, prev_exist: bool) -> Self {
        self.prev_exist = Some(prev_exist);
        self
    }

    pub fn prev_value(mut self, prev_value: &str) -> Self {
        self.prev_value = Some(prev_value.to_string());
        self
    }

    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}
