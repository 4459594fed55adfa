//! Request coalescing.
//!
//! Concurrent callers asking for the same keyed operation share a single
//! underlying future and all observe its one settled result. The map only
//! holds weak handles: once every caller has gone away the operation is
//! dropped (and cancelled, unless it runs as a spawned task).

use convo_sync_types::SyncError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use tokio::task::JoinHandle;

type SharedOp<V> = Shared<BoxFuture<'static, Result<V, SyncError>>>;
type WeakOp<V> = WeakShared<BoxFuture<'static, Result<V, SyncError>>>;

/// Keyed in-flight operations.
pub struct InFlight<K, V> {
    pending: DashMap<K, WeakOp<V>>,
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Empty map.
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Join the operation running for `key`, or start one with `start`.
    ///
    /// `start` runs at most once per call and only when no live operation
    /// exists for the key.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<V, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SyncError>> + Send + 'static,
    {
        let shared = match self.pending.entry(key.clone()) {
            Entry::Occupied(mut entry) => match entry.get().upgrade() {
                Some(shared) => {
                    tracing::debug!(?key, "joining in-flight operation");
                    shared
                }
                None => {
                    let shared: SharedOp<V> = start().boxed().shared();
                    if let Some(weak) = shared.downgrade() {
                        entry.insert(weak);
                    }
                    shared
                }
            },
            Entry::Vacant(entry) => {
                let shared: SharedOp<V> = start().boxed().shared();
                if let Some(weak) = shared.downgrade() {
                    entry.insert(weak);
                }
                shared
            }
        };

        let result = shared.clone().await;
        self.pending.remove_if(&key, |_, weak| match weak.upgrade() {
            Some(current) => current.ptr_eq(&shared),
            None => true,
        });
        result
    }

    /// Whether an operation is live for `key`.
    pub fn is_running(&self, key: &K) -> bool {
        self.pending
            .get(key)
            .is_some_and(|weak| weak.upgrade().is_some())
    }
}

impl<K, V> Default for InFlight<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Await a spawned task, mapping a panic or abort to [`SyncError::Internal`].
pub async fn settle<T>(handle: JoinHandle<Result<T, SyncError>>) -> Result<T, SyncError> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(SyncError::Internal(format!("background task failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counted(
        counter: &Arc<AtomicUsize>,
        result: Result<u32, SyncError>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, SyncError>> {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_operation() {
        let inflight: InFlight<&'static str, u32> = InFlight::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            inflight.run("page", counted(&starts, Ok(7))),
            inflight.run("page", counted(&starts, Ok(8))),
            inflight.run("page", counted(&starts, Ok(9))),
        );

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!((a, b, c), (Ok(7), Ok(7), Ok(7)));
        assert!(!inflight.is_running(&"page"));
    }

    #[tokio::test]
    async fn failures_are_shared_too() {
        let inflight: InFlight<u8, u32> = InFlight::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let failure = Err(SyncError::Network("offline".into()));

        let (a, b) = tokio::join!(
            inflight.run(1, counted(&starts, failure.clone())),
            inflight.run(1, counted(&starts, Ok(1))),
        );

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(a, failure);
        assert_eq!(b, failure);
    }

    #[tokio::test]
    async fn settled_operation_is_not_reused() {
        let inflight: InFlight<u8, u32> = InFlight::new();
        let starts = Arc::new(AtomicUsize::new(0));

        assert_eq!(inflight.run(1, counted(&starts, Ok(1))).await, Ok(1));
        assert_eq!(inflight.run(1, counted(&starts, Ok(2))).await, Ok(2));
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let inflight: InFlight<u8, u32> = InFlight::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            inflight.run(1, counted(&starts, Ok(1))),
            inflight.run(2, counted(&starts, Ok(2))),
        );

        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!((a, b), (Ok(1), Ok(2)));
    }

    #[tokio::test]
    async fn abandoned_operation_is_restarted() {
        let inflight: InFlight<u8, u32> = InFlight::new();
        let starts = Arc::new(AtomicUsize::new(0));

        // The only caller gives up before the operation settles
        let abandoned =
            tokio::time::timeout(Duration::from_millis(1), inflight.run(1, counted(&starts, Ok(1))))
                .await;
        assert!(abandoned.is_err());
        assert!(!inflight.is_running(&1));

        assert_eq!(inflight.run(1, counted(&starts, Ok(2))).await, Ok(2));
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn settle_maps_panics_to_internal() {
        let handle: JoinHandle<Result<(), SyncError>> = tokio::spawn(async { panic!("boom") });
        assert!(matches!(settle(handle).await, Err(SyncError::Internal(_))));
    }
}
