use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use crate::error::FlightError;

type Flight<T> = Shared<BoxFuture<'static, Result<T, FlightError>>>;
type Registry<K, T> = Arc<Mutex<HashMap<K, Flight<T>>>>;

/// Result of joining a flight.
#[derive(Debug, Clone)]
pub struct Coalesced<T> {
    pub value: Result<T, FlightError>,
    /// False for the caller that started the flight.
    pub shared: bool,
}

/// Keyed single-flight registry: at most one in-flight computation per key.
///
/// The work is spawned on the runtime, so it completes even if every
/// waiter stops polling.
pub struct RequestCoalescer<K, T> {
    in_flight: Registry<K, T>,
}

impl<K, T> Default for RequestCoalescer<K, T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Removes the flight's key when the spawned task ends, including by panic.
struct Deregister<K: Eq + Hash, T> {
    registry: Registry<K, T>,
    key: Option<K>,
}

impl<K: Eq + Hash, T> Drop for Deregister<K, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(&self.registry).remove(&key);
        }
    }
}

fn lock<K, T>(registry: &Registry<K, T>) -> MutexGuard<'_, HashMap<K, Flight<T>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K, T> RequestCoalescer<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the flight for `key`, starting it with `work` if none is running.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Coalesced<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (flight, shared) = {
            let mut registry = lock(&self.in_flight);
            match registry.get(&key) {
                Some(flight) => (flight.clone(), true),
                None => {
                    let cleanup = Deregister {
                        registry: self.in_flight.clone(),
                        key: Some(key.clone()),
                    };
                    let fut = work();
                    let handle = tokio::spawn(async move {
                        let _cleanup = cleanup;
                        fut.await
                    });
                    let flight = async move {
                        handle.await.map_err(|e| {
                            if e.is_panic() {
                                FlightError::Aborted("resolution task panicked".into())
                            } else {
                                FlightError::Aborted(e.to_string())
                            }
                        })
                    }
                    .boxed()
                    .shared();
                    registry.insert(key, flight.clone());
                    (flight, false)
                }
            }
        };

        Coalesced {
            value: flight.await,
            shared,
        }
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let coalescer = Arc::new(RequestCoalescer::<String, u32>::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coalescer = coalescer.clone();
            let executions = executions.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .run("solar:1.00000:2.00000".to_string(), move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42
                    })
                    .await
            }));
        }

        let mut shared = 0;
        for handle in handles {
            let out = handle.await.unwrap();
            assert_eq!(out.value, Ok(42));
            shared += out.shared as usize;
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(shared, 9);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let coalescer = RequestCoalescer::<u8, u8>::new();
        let (a, b) = tokio::join!(
            coalescer.run(1, || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                1
            }),
            coalescer.run(2, || async { 2 }),
        );
        assert_eq!((a.value, b.value), (Ok(1), Ok(2)));
        assert!(!a.shared && !b.shared);
    }

    #[tokio::test]
    async fn errors_are_delivered_to_every_waiter() {
        let coalescer = Arc::new(RequestCoalescer::<u8, Result<u8, String>>::new());
        let slow_fail = || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<u8, _>("upstream down".to_string())
        };
        let (a, b) = tokio::join!(coalescer.run(7, slow_fail), coalescer.run(7, slow_fail));
        assert_eq!(a.value, Ok(Err("upstream down".to_string())));
        assert_eq!(b.value, a.value);
        assert!(b.shared);
    }

    #[tokio::test]
    async fn panic_becomes_aborted_and_key_is_released() {
        let coalescer = RequestCoalescer::<u8, u8>::new();
        let out = coalescer
            .run(3, || async {
                if true {
                    panic!("boom");
                }
                0
            })
            .await;
        assert!(matches!(out.value, Err(FlightError::Aborted(_))));
        assert_eq!(coalescer.in_flight(), 0);

        let again = coalescer.run(3, || async { 5 }).await;
        assert_eq!(again.value, Ok(5));
    }

    #[tokio::test]
    async fn work_finishes_after_waiter_gives_up() {
        let coalescer = RequestCoalescer::<u8, u8>::new();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        let waited = tokio::time::timeout(
            Duration::from_millis(5),
            coalescer.run(9, move || async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                1
            }),
        )
        .await;
        assert!(waited.is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }
}
