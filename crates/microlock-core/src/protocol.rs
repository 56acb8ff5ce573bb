//! Lock protocol over CAS writes
//!
//! Acquire, release and renew each map to exactly one conditional store
//! request. Store conflicts are classified here and nowhere else:
//!
//! | operation | store request                                   | conflict            | lock error     |
//! |-----------|-------------------------------------------------|---------------------|----------------|
//! | acquire   | `set(key, holder, {ttl, prevExist: false})`     | key exists          | `AlreadyLocked`|
//! | release   | `compare_and_delete(key, holder)`               | not found / compare | `LockNotOwned` |
//! | renew     | `set(key, None, {prevValue: holder, refresh, ttl})` | not found / compare | `LockNotOwned` |
//!
//! "Not found" and "compare failed" are one outcome for the caller: it does not
//! hold the lock. Every other store error passes through unchanged.

use crate::error::LockError;
use crate::store::{Conflict, SetOptions, StoreError};

/// Write options for acquiring: create with a lease, only if absent.
pub fn acquire_options(ttl: u64) -> SetOptions {
    SetOptions::new().ttl(ttl).prev_exist(false)
}

/// Write options for renewing: reset the lease of a key we still hold.
pub fn renew_options(holder_id: &str, ttl: u64) -> SetOptions {
    SetOptions::new()
        .ttl(ttl)
        .prev_value(holder_id)
        .refresh(true)
}

pub fn classify_acquire_error(err: StoreError, key: &str) -> LockError {
    match err.conflict() {
        Some(Conflict::KeyExists) => LockError::AlreadyLocked {
            key: key.to_string(),
        },
        _ => LockError::Store(err),
    }
}

pub fn classify_release_error(err: StoreError, key: &str, holder_id: &str) -> LockError {
    not_owned_or_passthrough(err, key, holder_id)
}

pub fn classify_renew_error(err: StoreError, key: &str, holder_id: &str) -> LockError {
    not_owned_or_passthrough(err, key, holder_id)
}

fn not_owned_or_passthrough(err: StoreError, key: &str, holder_id: &str) -> LockError {
    match err.conflict() {
        Some(Conflict::KeyNotFound | Conflict::CompareFailed) => LockError::LockNotOwned {
            key: key.to_string(),
            holder_id: holder_id.to_string(),
        },
        _ => LockError::Store(err),
    }
}
