//! Keyed single-flight.
//!
//! Collapses concurrent operations for the same key into one underlying
//! future: the first caller starts the work, later callers await the
//! same shared future and receive a clone of the same result. The entry
//! is cleared on completion, so the next call after that starts fresh.
//!
//! This is the engine's only enforced critical section -- the sync
//! engine wraps `sync_single` in it so duplicate reconciliation for one
//! account can never race.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;

/// A keyed single-flight group.
///
/// `V` must be `Clone`: every concurrent caller gets a copy of the one
/// computed result.
pub struct SingleFlight<K, V> {
    in_flight: Arc<Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Run `make()` for `key`, unless a call for the same key is already
    /// in flight -- in that case await and return its result instead.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = {
            let mut map = self.in_flight.lock().await;
            if let Some(existing) = map.get(&key) {
                existing.clone()
            } else {
                let slot = Arc::clone(&self.in_flight);
                let cleanup_key = key.clone();
                let fut = make();
                let shared = async move {
                    let result = fut.await;
                    slot.lock().await.remove(&cleanup_key);
                    result
                }
                .boxed()
                .shared();
                map.insert(key, shared.clone());
                shared
            }
        };

        shared.await
    }

    /// Number of keys currently in flight.
    pub async fn len(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.in_flight.lock().await.is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn concurrent_calls_share_one_execution() {
        let group: Arc<SingleFlight<String, usize>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let spawn_call = |group: Arc<SingleFlight<String, usize>>, runs: Arc<AtomicUsize>| {
            tokio::spawn(async move {
                group
                    .run("acct-1".to_owned(), move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42
                    })
                    .await
            })
        };

        let a = spawn_call(Arc::clone(&group), Arc::clone(&runs));
        let b = spawn_call(Arc::clone(&group), Arc::clone(&runs));
        let c = spawn_call(Arc::clone(&group), Arc::clone(&runs));

        let (ra, rb, rc) = (a.await.unwrap(), b.await.unwrap(), c.await.unwrap());
        assert_eq!((ra, rb, rc), (42, 42, 42));
        assert_eq!(runs.load(Ordering::SeqCst), 1, "only one execution may run");
    }

    #[tokio::test]
    async fn entry_is_cleared_after_completion() {
        let group: SingleFlight<&'static str, u32> = SingleFlight::new();

        let first = group.run("k", || async { 1 }).await;
        assert_eq!(first, 1);
        assert!(group.is_empty().await);

        // A later call recomputes rather than reusing the stale result.
        let second = group.run("k", || async { 2 }).await;
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let group: Arc<SingleFlight<String, String>> = Arc::new(SingleFlight::new());

        let g1 = Arc::clone(&group);
        let a = tokio::spawn(async move {
            g1.run("a".to_owned(), || async { "ra".to_owned() }).await
        });
        let g2 = Arc::clone(&group);
        let b = tokio::spawn(async move {
            g2.run("b".to_owned(), || async { "rb".to_owned() }).await
        });

        assert_eq!(a.await.unwrap(), "ra");
        assert_eq!(b.await.unwrap(), "rb");
    }
}
