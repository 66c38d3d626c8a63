//! Background reclamation of expired objects.
//!
//! One long-lived task cycles `Idle -> Scanning -> Sleeping -> Idle`. A failed
//! delete is logged and the scan moves on; a failed scan is logged and retried
//! after a short backoff instead of the full interval. Shutdown is signalled
//! through a `CancellationToken` and interrupts both the scan and the sleep.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use lockbox_core::{
    config::VaultConfig,
    store::{ObjectStore, StoreError},
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperState {
    Idle,
    Scanning,
    Sleeping,
}

/// Outcome of one pass over the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

pub struct ExpiryReaper<S: ObjectStore> {
    store: Arc<S>,
    interval: Duration,
    retry: Duration,
}

impl<S: ObjectStore + 'static> ExpiryReaper<S> {
    pub fn new(store: Arc<S>, config: &VaultConfig) -> Self {
        Self {
            store,
            interval: config.sweep_interval(),
            retry: config.sweep_retry(),
        }
    }

    /// Delete every listed object that is expired at `now`.
    ///
    /// Listing failures abort the pass; per-object failures do not.
    #[instrument(skip_all)]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let ids = self.store.list_ids().await?;
        let mut report = SweepReport::default();

        for id in ids {
            report.scanned += 1;
            if !self.store.is_expired(&id, now).await {
                continue;
            }
            match self.store.delete(&id).await {
                Ok(()) => {
                    report.removed += 1;
                    info!(%id, "removed expired object");
                }
                Err(err) => {
                    report.failed += 1;
                    error!(%id, error = %err, "failed to remove expired object");
                }
            }
        }

        Ok(report)
    }

    /// Start the background loop on the current tokio runtime.
    pub fn spawn(self) -> ReaperHandle {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ReaperState::Idle);
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(state_tx, task_cancel).await });

        ReaperHandle {
            cancel,
            state: state_rx,
            join,
        }
    }

    async fn run(self, state: watch::Sender<ReaperState>, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retry_secs = self.retry.as_secs(),
            "expiry reaper started"
        );

        loop {
            state.send_replace(ReaperState::Scanning);
            let outcome = tokio::select! {
                outcome = self.sweep(Utc::now()) => outcome,
                _ = cancel.cancelled() => break,
            };
            let pause = match outcome {
                Ok(report) => {
                    debug!(?report, "sweep finished");
                    self.interval
                }
                Err(err) => {
                    error!(error = %err, "sweep failed; retrying after backoff");
                    self.retry
                }
            };

            state.send_replace(ReaperState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => break,
            }
            state.send_replace(ReaperState::Idle);
        }

        state.send_replace(ReaperState::Idle);
        info!("expiry reaper stopped");
    }
}

/// Handle to a running reaper. Dropping it leaves the task running until the
/// runtime shuts down.
pub struct ReaperHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ReaperState>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub fn state(&self) -> ReaperState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReaperState> {
        self.state.clone()
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            error!(error = %err, "expiry reaper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use lockbox_core::{
        object::{NewObject, ObjectId, ObjectMetadata, PlaintextDigest, StoredObject},
        store::InMemoryObjectStore,
    };
    use lockbox_storage::fs_store::FsObjectStore;

    use super::*;

    fn object(created_at: DateTime<Utc>) -> NewObject {
        NewObject {
            salt: [0; 16],
            iv: [0; 16],
            ciphertext: vec![0; 16],
            digest: PlaintextDigest::new([0; 32]),
            metadata: ObjectMetadata::new("a.txt", created_at, 1),
        }
    }

    /// Wraps an in-memory store with injectable failures.
    struct FlakyStore {
        inner: InMemoryObjectStore,
        failing_lists: AtomicUsize,
        list_calls: AtomicUsize,
        undeletable: Mutex<HashSet<ObjectId>>,
    }

    impl FlakyStore {
        fn new(failing_lists: usize) -> Self {
            Self {
                inner: InMemoryObjectStore::new(chrono::Duration::hours(24)),
                failing_lists: AtomicUsize::new(failing_lists),
                list_calls: AtomicUsize::new(0),
                undeletable: Mutex::new(HashSet::new()),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn put(&self, object: NewObject) -> Result<ObjectId, StoreError> {
            self.inner.put(object).await
        }

        async fn get(&self, id: &ObjectId) -> Result<StoredObject, StoreError> {
            self.inner.get(id).await
        }

        async fn metadata(&self, id: &ObjectId) -> Result<ObjectMetadata, StoreError> {
            self.inner.metadata(id).await
        }

        async fn exists(&self, id: &ObjectId) -> Result<bool, StoreError> {
            self.inner.exists(id).await
        }

        async fn is_expired(&self, id: &ObjectId, now: DateTime<Utc>) -> bool {
            self.inner.is_expired(id, now).await
        }

        async fn delete(&self, id: &ObjectId) -> Result<(), StoreError> {
            if self.undeletable.lock().expect("lock").contains(id) {
                return Err(StoreError::Storage {
                    reason: "permission denied".into(),
                });
            }
            self.inner.delete(id).await
        }

        async fn list_ids(&self) -> Result<Vec<ObjectId>, StoreError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_lists.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_lists.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Storage {
                    reason: "directory unavailable".into(),
                });
            }
            self.inner.list_ids().await
        }
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = VaultConfig::default();
        let store = Arc::new(FsObjectStore::new(dir.path(), cfg.ttl()));
        let now = Utc::now();

        let fresh = store.put(object(now)).await.expect("fresh");
        let stale = store
            .put(object(now - chrono::Duration::hours(25)))
            .await
            .expect("stale");
        std::fs::write(dir.path().join("temp_download"), b"staged").expect("staging");

        let reaper = ExpiryReaper::new(Arc::clone(&store), &cfg);
        let report = reaper.sweep(now).await.expect("sweep");

        assert_eq!(
            report,
            SweepReport {
                scanned: 2,
                removed: 1,
                failed: 0
            }
        );
        assert!(store.exists(&fresh).await.expect("exists"));
        assert!(!store.exists(&stale).await.expect("exists"));
        assert!(dir.path().join("temp_download").exists());
        assert!(!dir.path().join(format!("{stale}.meta")).exists());
        assert!(!dir.path().join(format!("{stale}.hash")).exists());
    }

    #[tokio::test]
    async fn sweep_reclaims_orphaned_sidecars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = VaultConfig::default();
        let store = Arc::new(FsObjectStore::new(dir.path(), cfg.ttl()));
        let orphan = ObjectId::generate();
        std::fs::write(store.hash_path(&orphan), "00").expect("orphan");

        let report = ExpiryReaper::new(Arc::clone(&store), &cfg)
            .sweep(Utc::now())
            .await
            .expect("sweep");

        assert_eq!(report.removed, 1);
        assert!(!store.hash_path(&orphan).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sweeps_racing_puts_never_remove_fresh_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = VaultConfig::default();
        let store = Arc::new(FsObjectStore::new(dir.path(), cfg.ttl()));
        let reaper = Arc::new(ExpiryReaper::new(Arc::clone(&store), &cfg));
        let stop = CancellationToken::new();

        let sweeper = {
            let reaper = Arc::clone(&reaper);
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut removed = 0;
                while !stop.is_cancelled() {
                    removed += reaper.sweep(Utc::now()).await.expect("sweep").removed;
                    tokio::task::yield_now().await;
                }
                removed
            })
        };

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut ids = Vec::new();
                    for _ in 0..75 {
                        ids.push(store.put(object(Utc::now())).await.expect("put"));
                    }
                    ids
                })
            })
            .collect();

        let mut ids = Vec::new();
        for writer in writers {
            ids.extend(writer.await.expect("join"));
        }
        stop.cancel();
        let removed = sweeper.await.expect("join");

        assert_eq!(removed, 0);
        for id in ids {
            store.get(&id).await.expect("freshly stored object is readable");
        }
    }

    #[tokio::test]
    async fn one_failed_delete_does_not_stop_the_scan() {
        let store = Arc::new(FlakyStore::new(0));
        let old = Utc::now() - chrono::Duration::hours(48);
        let stuck = store.put(object(old)).await.expect("put");
        let others = [
            store.put(object(old)).await.expect("put"),
            store.put(object(old)).await.expect("put"),
        ];
        store.undeletable.lock().expect("lock").insert(stuck);

        let report = ExpiryReaper::new(Arc::clone(&store), &VaultConfig::default())
            .sweep(Utc::now())
            .await
            .expect("sweep");

        assert_eq!(report.removed, 2);
        assert_eq!(report.failed, 1);
        assert!(store.exists(&stuck).await.expect("exists"));
        for id in others {
            assert!(!store.exists(&id).await.expect("exists"));
        }
    }

    #[tokio::test]
    async fn deleting_an_already_reaped_id_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = VaultConfig::default();
        let store = Arc::new(FsObjectStore::new(dir.path(), cfg.ttl()));
        let id = store
            .put(object(Utc::now() - chrono::Duration::hours(30)))
            .await
            .expect("put");

        ExpiryReaper::new(Arc::clone(&store), &cfg)
            .sweep(Utc::now())
            .await
            .expect("sweep");
        store.delete(&id).await.expect("delete after reap");
        store.delete(&id).await.expect("delete twice");
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_retries_after_failed_scan() {
        let store = Arc::new(FlakyStore::new(1));
        let stale = store
            .put(object(Utc::now() - chrono::Duration::hours(30)))
            .await
            .expect("put");

        let handle = ExpiryReaper::new(Arc::clone(&store), &VaultConfig::default()).spawn();

        // The retry backoff (60s) is far shorter than the interval (1h).
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 2);
        assert!(!store.exists(&stale).await.expect("exists"));
        assert_eq!(handle.state(), ReaperState::Sleeping);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn spawned_reaper_sweeps_and_shuts_down_promptly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = VaultConfig::default();
        let store = Arc::new(FsObjectStore::new(dir.path(), cfg.ttl()));
        let stale = store
            .put(object(Utc::now() - chrono::Duration::hours(30)))
            .await
            .expect("put");

        let handle = ExpiryReaper::new(Arc::clone(&store), &cfg).spawn();
        let mut state = handle.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ReaperState::Sleeping),
        )
        .await
        .expect("first sweep in time")
        .expect("reaper alive");

        assert!(!store.exists(&stale).await.expect("exists"));

        // The hour-long sleep must not delay shutdown.
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown in time");
    }
}
