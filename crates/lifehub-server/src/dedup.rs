//! Upload de-duplication keyed by content hash.
//!
//! The first request for a given hash leads: it runs the upload while later
//! requests for the same bytes wait, then share its result. A finished result
//! is kept for a TTL so quick re-submissions are answered without another
//! Drive round trip. Failed or cancelled uploads are not remembered; a waiter
//! takes over as the new leader.
//!
//! Entries are evicted explicitly with [`UploadDeduplicator::evict_expired`],
//! which the server runs periodically through [`spawn_eviction`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lifehub_core::ContentHash;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::signals::ShutdownSignal;

/// Default time a finished upload is remembered.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// A shared upload result.
#[derive(Debug, Clone, PartialEq)]
pub struct Deduped<T> {
    pub value: T,
    /// True when another request produced `value`.
    pub duplicate: bool,
}

enum Slot<T> {
    /// Upload running; the receiver wakes when its leader finishes.
    InFlight(watch::Receiver<()>),
    Done { value: T, expires_at: Instant },
}

enum Claim<T> {
    Lead(watch::Sender<()>),
    Wait(watch::Receiver<()>),
    Done(T),
}

/// Collapses concurrent and repeated uploads of the same bytes.
pub struct UploadDeduplicator<T> {
    ttl: Duration,
    slots: Mutex<HashMap<ContentHash, Slot<T>>>,
}

impl<T: Clone> UploadDeduplicator<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `upload` unless the same content is being or was recently
    /// uploaded, in which case that result is returned instead.
    pub async fn run<F, Fut, E>(&self, hash: &ContentHash, upload: F) -> Result<Deduped<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let tx = loop {
            match self.claim(hash) {
                Claim::Done(value) => {
                    debug!(%hash, "duplicate upload, reusing earlier result");
                    return Ok(Deduped {
                        value,
                        duplicate: true,
                    });
                }
                Claim::Wait(mut rx) => {
                    trace!(%hash, "waiting for in-flight upload");
                    // Only ever errors: the leader drops the sender when done.
                    let _ = rx.changed().await;
                }
                Claim::Lead(tx) => break tx,
            }
        };

        let mut guard = LeaderGuard {
            owner: self,
            hash,
            _tx: tx,
            finished: false,
        };
        let value = upload().await?;
        guard.finish(value.clone());

        Ok(Deduped {
            value,
            duplicate: false,
        })
    }

    /// Removes finished entries older than the TTL. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::InFlight(_) => true,
            Slot::Done { expires_at, .. } => *expires_at > now,
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, remaining = slots.len(), "evicted expired uploads");
        }
        evicted
    }

    /// Number of tracked hashes, in flight or finished.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claim(&self, hash: &ContentHash) -> Claim<T> {
        let mut slots = self.lock();
        match slots.get(hash) {
            Some(Slot::Done { value, expires_at }) if *expires_at > Instant::now() => {
                return Claim::Done(value.clone());
            }
            Some(Slot::InFlight(rx)) => return Claim::Wait(rx.clone()),
            _ => {}
        }

        let (tx, rx) = watch::channel(());
        slots.insert(hash.clone(), Slot::InFlight(rx));
        Claim::Lead(tx)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContentHash, Slot<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for UploadDeduplicator<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// Evicts expired entries every `every` until `shutdown` fires.
pub fn spawn_eviction<T>(
    dedup: Arc<UploadDeduplicator<T>>,
    every: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
{
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stop = shutdown.wait();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!("upload eviction stopped");
                    break;
                }
                _ = ticker.tick() => {
                    dedup.evict_expired();
                }
            }
        }
    })
}

/// Clears the in-flight slot unless the upload finished, so waiters can take
/// over after an error or a dropped request. Waiters wake when `_tx` drops.
struct LeaderGuard<'a, T: Clone> {
    owner: &'a UploadDeduplicator<T>,
    hash: &'a ContentHash,
    _tx: watch::Sender<()>,
    finished: bool,
}

impl<T: Clone> LeaderGuard<'_, T> {
    fn finish(&mut self, value: T) {
        let expires_at = Instant::now() + self.owner.ttl;
        self.owner
            .lock()
            .insert(self.hash.clone(), Slot::Done { value, expires_at });
        self.finished = true;
    }
}

impl<T: Clone> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.owner.lock().remove(self.hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn counted(calls: &AtomicUsize, value: &str) -> Result<String, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value.to_string())
    }

    #[tokio::test]
    async fn repeated_upload_reuses_result() {
        let dedup = UploadDeduplicator::default();
        let hash = ContentHash::of(b"photo");
        let calls = &AtomicUsize::new(0);

        let first = dedup
            .run(&hash, || async move { counted(calls, "file-1") })
            .await
            .unwrap();
        let second = dedup
            .run(&hash, || async move { counted(calls, "file-2") })
            .await
            .unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(second.value, "file-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_content_uploads_separately() {
        let dedup = UploadDeduplicator::default();
        let calls = &AtomicUsize::new(0);

        dedup
            .run(&ContentHash::of(b"a"), || async move { counted(calls, "a") })
            .await
            .unwrap();
        dedup
            .run(&ContentHash::of(b"b"), || async move { counted(calls, "b") })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dedup.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_duplicate_waits_for_leader() {
        let dedup = Arc::new(UploadDeduplicator::<String>::default());
        let hash = ContentHash::of(b"same bytes");
        let calls = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let leader = {
            let dedup = dedup.clone();
            let hash = hash.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                dedup
                    .run(&hash, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok::<_, String>("drive-id".to_string())
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let follower = {
            let dedup = dedup.clone();
            let hash = hash.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                dedup
                    .run(&hash, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>("second-id".to_string())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        release_tx.send(()).unwrap();

        let leader = leader.await.unwrap().unwrap();
        let follower = follower.await.unwrap().unwrap();
        assert!(!leader.duplicate);
        assert!(follower.duplicate);
        assert_eq!(follower.value, "drive-id");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_upload_is_not_remembered() {
        let dedup = UploadDeduplicator::<String>::default();
        let hash = ContentHash::of(b"flaky");

        let failed = dedup
            .run(&hash, || async { Err::<String, _>("drive down".to_string()) })
            .await;
        assert_eq!(failed.unwrap_err(), "drive down");
        assert!(dedup.is_empty());

        let retried = dedup
            .run(&hash, || async { Ok::<_, String>("file-1".to_string()) })
            .await
            .unwrap();
        assert!(!retried.duplicate);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let dedup = UploadDeduplicator::new(Duration::from_secs(60));
        let hash = ContentHash::of(b"old");
        let calls = &AtomicUsize::new(0);

        dedup
            .run(&hash, || async move { counted(calls, "file-1") })
            .await
            .unwrap();
        assert_eq!(dedup.evict_expired(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;

        // An expired entry is not reused even before it is evicted.
        let again = dedup
            .run(&hash, || async move { counted(calls, "file-2") })
            .await
            .unwrap();
        assert!(!again.duplicate);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(dedup.evict_expired(), 1);
        assert!(dedup.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_task_clears_expired_entries() {
        let dedup = Arc::new(UploadDeduplicator::new(Duration::from_secs(60)));
        let hash = ContentHash::of(b"photo");
        dedup
            .run(&hash, || async { Ok::<_, String>("file-1".to_string()) })
            .await
            .unwrap();

        let signals = crate::signals::SignalHandler::new();
        let task = spawn_eviction(dedup.clone(), Duration::from_secs(10), signals.shutdown());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(dedup.len(), 1);
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(dedup.is_empty());

        signals.trigger_shutdown();
        task.await.unwrap();
    }
}
