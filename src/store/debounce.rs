use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Trailing-edge debounce keyed by `K`.
///
/// Scheduling a key arms a timer and cancels any timer still pending for the
/// same key. Once a timer fires its task is no longer cancellable, so a
/// superseding schedule never aborts work that is already running.
pub struct Debouncer<K> {
    delay: Duration,
    pending: Arc<Mutex<HashMap<K, Pending>>>,
    next_generation: AtomicU64,
}

fn lock<K>(pending: &Mutex<HashMap<K, Pending>>) -> MutexGuard<'_, HashMap<K, Pending>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn schedule<F, Fut>(&self, key: K, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay;
        let pending = Arc::clone(&self.pending);
        let task_key = key.clone();

        // Held across the spawn so the timer cannot fire before it is registered.
        let mut map = lock(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fired = {
                let mut map = lock(&pending);
                match map.get(&task_key) {
                    Some(p) if p.generation == generation => {
                        map.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };
            if fired {
                task().await;
            }
        });

        if let Some(previous) = map.insert(key, Pending { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel the pending timer for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.pending).remove(key) {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer and return their keys, so the caller can run
    /// the work immediately.
    pub fn take_all(&self) -> Vec<K> {
        let drained: Vec<(K, Pending)> = lock(&self.pending).drain().collect();
        drained
            .into_iter()
            .map(|(key, p)| {
                p.handle.abort();
                key
            })
            .collect()
    }

    #[cfg(test)]
    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.pending).contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_one_run() {
        let debouncer = Debouncer::new(Duration::from_millis(1000));
        let runs = counter();
        let last = Arc::new(AtomicUsize::new(0));

        for i in 1..=5 {
            let runs = runs.clone();
            let last = last.clone();
            debouncer.schedule("2024-03-01", move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                last.store(i, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 5);
        assert!(!debouncer.is_pending(&"2024-03-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = counter();
        for key in ["a", "b"] {
            let runs = runs.clone();
            debouncer.schedule(key, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(debouncer.pending_count(), 2);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_take_all() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = counter();
        for key in ["a", "b", "c"] {
            let runs = runs.clone();
            debouncer.schedule(key, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(debouncer.cancel(&"a"));
        assert!(!debouncer.cancel(&"a"));

        let mut taken = debouncer.take_all();
        taken.sort();
        assert_eq!(taken, vec!["b", "c"]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
