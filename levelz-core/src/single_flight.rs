//! Single-flight: collapse concurrent identical loads into one execution.
//!
//! The first caller for a key becomes the leader and runs the load; callers
//! arriving while it runs block until the leader publishes its result and
//! then share a clone of it. Once the leader finishes the key is forgotten,
//! so the next miss starts a fresh flight. A leader that unwinds abandons
//! its flight; waiters wake and one of them runs its own load instead.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

enum Flight<V> {
    Running,
    Done(V),
    Abandoned,
}

struct Call<V> {
    state: Mutex<Flight<V>>,
    done: Condvar,
}

impl<V: Clone> Call<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(Flight::Running),
            done: Condvar::new(),
        }
    }

    /// The leader's value, or `None` if the leader abandoned the flight.
    fn wait(&self) -> Option<V> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                Flight::Done(value) => return Some(value.clone()),
                Flight::Abandoned => return None,
                Flight::Running => self.done.wait(&mut state),
            }
        }
    }

    fn finish(&self, flight: Flight<V>) {
        *self.state.lock() = flight;
        self.done.notify_all();
    }
}

/// Ends a leader's flight. Dropped without [`publish`](Self::publish), it
/// marks the flight abandoned so waiters never block on a dead leader.
struct Leader<'a, K: Hash + Eq, V: Clone> {
    group: &'a SingleFlight<K, V>,
    key: &'a K,
    call: Arc<Call<V>>,
    published: bool,
}

impl<K: Hash + Eq, V: Clone> Leader<'_, K, V> {
    fn publish(mut self, value: V) {
        self.published = true;
        self.group.calls.lock().remove(self.key);
        self.call.finish(Flight::Done(value));
    }
}

impl<K: Hash + Eq, V: Clone> Drop for Leader<'_, K, V> {
    fn drop(&mut self) {
        if !self.published {
            self.group.calls.lock().remove(self.key);
            self.call.finish(Flight::Abandoned);
        }
    }
}

/// Per-key deduplication of in-flight work.
pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Hash + Eq + Clone, V: Clone> SingleFlight<K, V> {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `load` for `key` unless a flight for it is already running, in
    /// which case wait for and return that flight's result.
    ///
    /// If the running flight's leader panics, a waiter leads a new flight
    /// with its own `load`.
    pub fn run<F>(&self, key: &K, load: F) -> V
    where
        F: FnOnce() -> V,
    {
        loop {
            let (call, leading) = {
                let mut calls = self.calls.lock();
                if let Some(call) = calls.get(key) {
                    (Arc::clone(call), false)
                } else {
                    let call = Arc::new(Call::new());
                    calls.insert(key.clone(), Arc::clone(&call));
                    (call, true)
                }
            };

            if leading {
                let leader = Leader {
                    group: self,
                    key,
                    call,
                    published: false,
                };
                let value = load();
                leader.publish(value.clone());
                return value;
            }
            if let Some(value) = call.wait() {
                return value;
            }
        }
    }

    /// Number of keys with a load in progress.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn sequential_calls_each_run() {
        let flights: SingleFlight<u64, u64> = SingleFlight::new();
        let runs = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = flights.run(&1, || {
                runs.fetch_add(1, Ordering::SeqCst);
                7
            });
            assert_eq!(v, 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(flights.in_flight(), 0);
    }

    #[test]
    fn concurrent_calls_collapse() {
        let flights: Arc<SingleFlight<u64, u64>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    flights.run(&42, || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(100));
                        99
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("thread"), 99);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1, "only the leader loads");
    }

    #[test]
    fn panicking_leader_hands_the_flight_to_a_waiter() {
        let flights: Arc<SingleFlight<u64, u64>> = Arc::new(SingleFlight::new());
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let leader = {
            let flights = Arc::clone(&flights);
            std::thread::spawn(move || {
                flights.run(&1, || {
                    let _ = started_tx.send(());
                    std::thread::sleep(Duration::from_millis(100));
                    panic!("load failed");
                })
            })
        };
        started_rx.recv().expect("leader started");

        let waiter = {
            let flights = Arc::clone(&flights);
            std::thread::spawn(move || flights.run(&1, || 5))
        };

        assert!(leader.join().is_err());
        assert_eq!(waiter.join().expect("thread"), 5);
        assert_eq!(flights.in_flight(), 0);
    }

    #[test]
    fn distinct_keys_do_not_block_each_other() {
        let flights: SingleFlight<u64, u64> = SingleFlight::new();
        assert_eq!(flights.run(&1, || 1), 1);
        assert_eq!(flights.run(&2, || 2), 2);
    }
}
