//! Subcommand execution
//!
//! Every command works against any [`CoordinationStore`]; `main` passes the
//! etcd store, tests pass an in-memory one. Results are returned as text for
//! stdout; progress goes through `tracing`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use microlock_core::store::Conflict;
use microlock_core::{
    CoordinationStore, EventKind, LockError, LockEvent, Microlock, MicrolockBuilder, Node,
    StoreResponse,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::Command;
use crate::error::CliError;
use crate::settings::Settings;

/// Run `command`, stopping long-running commands when `shutdown` resolves.
pub async fn run<S>(
    command: Command,
    settings: &Settings,
    store: Arc<dyn CoordinationStore>,
    shutdown: S,
) -> Result<String, CliError>
where
    S: Future<Output = ()>,
{
    let lock = MicrolockBuilder::from_config(&settings.lock)
        .store(store.clone())
        .build()?;

    let result = match command {
        Command::Lock => lock
            .lock()
            .await
            .map(|ack| acknowledge(&lock, "locked", &ack))
            .map_err(CliError::from),
        Command::Unlock => lock
            .unlock()
            .await
            .map(|ack| acknowledge(&lock, "unlocked", &ack))
            .map_err(CliError::from),
        Command::Renew => lock
            .renew()
            .await
            .map(|ack| acknowledge(&lock, "renewed", &ack))
            .map_err(CliError::from),
        Command::Status => status(store.as_ref(), lock.key()).await,
        Command::Watch => Ok(watch(&lock, shutdown).await),
        Command::Hold => hold(&lock, shutdown).await.map_err(CliError::from),
    };

    lock.destroy();
    result
}

fn acknowledge(lock: &Microlock, verb: &str, ack: &StoreResponse) -> String {
    info!("{} {} as {} (action={})", verb, lock.key(), lock.holder_id(), ack.action);
    format!("{} {} {}", verb, lock.key(), lock.holder_id())
}

/// Report who holds `key` without touching it.
pub async fn status(store: &dyn CoordinationStore, key: &str) -> Result<String, CliError> {
    match store.get(key).await {
        Ok(current) => {
            let node = current.node.unwrap_or_else(|| Node::new(key));
            let holder = node.value.unwrap_or_default();
            Ok(match node.ttl {
                Some(ttl) => format!("{} locked by {} (ttl {}s)", key, holder, ttl),
                None => format!("{} set to {} without lease", key, holder),
            })
        }
        Err(e) if e.conflict() == Some(Conflict::KeyNotFound) => Ok(format!("{} unlocked", key)),
        Err(e) => Err(e.into()),
    }
}

/// Print `locked` / `unlocked` lines until `shutdown` resolves.
async fn watch<S>(lock: &Microlock, shutdown: S) -> String
where
    S: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    for kind in [EventKind::Locked, EventKind::Unlocked] {
        let tx = tx.clone();
        lock.on(kind, move |event: &LockEvent<'_>| {
            let _ = tx.send(event.kind());
        });
    }
    drop(tx);

    info!("watching {}", lock.key());
    tokio::pin!(shutdown);
    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = rx.recv() => match event {
                Some(kind) => {
                    seen += 1;
                    println!("{} {}", lock.key(), kind.as_str());
                }
                None => break,
            },
        }
    }

    format!("watched {} ({} events)", lock.key(), seen)
}

/// Longest wait between two renewals, whatever the lease.
pub const MAX_RENEW_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Renewal period for a lease of `ttl` seconds: half the lease, at most a day.
pub fn renew_interval(ttl: u64) -> Duration {
    (Duration::from_secs(ttl) / 2).min(MAX_RENEW_INTERVAL)
}

/// Acquire, renew every half lease until `shutdown`, then release.
///
/// A failed renewal means the lease was lost; the command stops and reports
/// it instead of trying to take the lock back.
async fn hold<S>(lock: &Microlock, shutdown: S) -> Result<String, LockError>
where
    S: Future<Output = ()>,
{
    lock.lock().await?;
    info!("holding {} as {}", lock.key(), lock.holder_id());

    let period = renew_interval(lock.ttl());
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut renewals = 0u64;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Err(e) = lock.renew().await {
                    warn!("lost {} after {} renewals: {}", lock.key(), renewals, e);
                    return Err(e);
                }
                renewals += 1;
            }
        }
    }

    lock.unlock().await?;
    Ok(format!(
        "released {} after {} renewals",
        lock.key(),
        renewals
    ))
}

#[cfg(test)]
mod tests {
    use microlock_core::{LockConfig, MemoryStore, SetOptions};
    use tokio::sync::oneshot;

    use super::*;

    const KEY: &str = "/locks/job";

    fn settings(holder: &str, ttl: u64) -> Settings {
        Settings {
            lock: LockConfig::new(KEY, holder).with_ttl(ttl),
            ..Default::default()
        }
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    #[tokio::test]
    async fn test_lock_unlock_and_status() {
        let store = Arc::new(MemoryStore::new());

        let out = run(Command::Status, &settings("a", 5), store.clone(), never())
            .await
            .unwrap();
        assert_eq!(out, "/locks/job unlocked");

        let out = run(Command::Lock, &settings("a", 5), store.clone(), never())
            .await
            .unwrap();
        assert_eq!(out, "locked /locks/job a");

        let out = run(Command::Status, &settings("b", 5), store.clone(), never())
            .await
            .unwrap();
        assert_eq!(out, "/locks/job locked by a (ttl 5s)");

        let err = run(Command::Lock, &settings("b", 5), store.clone(), never())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONTENTION);

        let err = run(Command::Unlock, &settings("b", 5), store.clone(), never())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONTENTION);

        run(Command::Renew, &settings("a", 5), store.clone(), never())
            .await
            .unwrap();
        let out = run(Command::Unlock, &settings("a", 5), store.clone(), never())
            .await
            .unwrap();
        assert_eq!(out, "unlocked /locks/job a");
    }

    #[tokio::test]
    async fn test_status_of_plain_value() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, Some("manual"), SetOptions::new()).await.unwrap();

        let out = status(store.as_ref(), KEY).await.unwrap();
        assert_eq!(out, "/locks/job set to manual without lease");
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let settings = Settings::default();

        for command in [Command::Status, Command::Lock] {
            let err = run(command, &settings, store.clone(), never())
                .await
                .unwrap_err();
            assert!(matches!(err, CliError::Lock(LockError::KeyRequired)));
        }
    }

    #[test]
    fn test_renew_interval() {
        assert_eq!(renew_interval(1), Duration::from_millis(500));
        assert_eq!(renew_interval(30), Duration::from_secs(15));
        assert_eq!(renew_interval(i64::MAX as u64), MAX_RENEW_INTERVAL);
        assert_eq!(renew_interval(u64::MAX), MAX_RENEW_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_renews_past_lease_and_releases() {
        let store = Arc::new(MemoryStore::new());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let task = {
            let store = store.clone();
            tokio::spawn(async move {
                let shutdown = async {
                    let _ = stop_rx.await;
                };
                run(Command::Hold, &settings("a", 2), store, shutdown).await
            })
        };

        // Four lease lengths later the key is still held.
        tokio::time::sleep(Duration::from_secs(8)).await;
        let out = status(store.as_ref(), KEY).await.unwrap();
        assert!(out.starts_with("/locks/job locked by a"), "{out}");

        stop_tx.send(()).unwrap();
        let out = task.await.unwrap().unwrap();
        assert!(out.starts_with("released /locks/job after "), "{out}");

        let out = status(store.as_ref(), KEY).await.unwrap();
        assert_eq!(out, "/locks/job unlocked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_with_largest_ttl() {
        let store = Arc::new(MemoryStore::new());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let settings = settings("a", i64::MAX as u64);

        let task = {
            let store = store.clone();
            tokio::spawn(async move {
                let shutdown = async {
                    let _ = stop_rx.await;
                };
                run(Command::Hold, &settings, store, shutdown).await
            })
        };

        tokio::time::sleep(MAX_RENEW_INTERVAL * 2 + Duration::from_secs(1)).await;
        stop_tx.send(()).unwrap();
        let out = task.await.unwrap().unwrap();
        assert_eq!(out, "released /locks/job after 2 renewals");
    }

    #[tokio::test]
    async fn test_hold_rejects_out_of_range_ttl() {
        let store = Arc::new(MemoryStore::new());
        let settings = Settings {
            lock: LockConfig {
                ttl: Some("1e30".to_string()),
                ..LockConfig::new(KEY, "a")
            },
            ..Default::default()
        };

        let err = run(Command::Hold, &settings, store, never()).await.unwrap_err();
        assert!(matches!(err, CliError::Lock(LockError::InvalidTtl(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_reports_lost_lease() {
        let store = Arc::new(MemoryStore::new());

        let task = {
            let store = store.clone();
            tokio::spawn(async move { run(Command::Hold, &settings("a", 2), store, never()).await })
        };

        // Someone force-releases the key between renewals.
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.compare_and_delete(KEY, "a").await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CliError::Lock(LockError::LockNotOwned { .. })));
    }

    #[tokio::test]
    async fn test_watch_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let task = {
            let store = store.clone();
            tokio::spawn(async move {
                let shutdown = async {
                    let _ = stop_rx.await;
                };
                run(Command::Watch, &settings("watcher", 5), store, shutdown).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let other = Microlock::new(store.clone(), KEY, "other", 5).unwrap();
        other.lock().await.unwrap();
        other.unlock().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        other.destroy();

        stop_tx.send(()).unwrap();
        let out = task.await.unwrap().unwrap();
        assert_eq!(out, "watched /locks/job (2 events)");
    }
}
