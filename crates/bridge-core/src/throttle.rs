//! Process-wide throttle on concurrent engine computations.
//!
//! Every session holds a [`ThrottlePermit`] while it waits for an
//! engine answer. The permit counts towards the total and, for
//! slow-paced (correspondence) matches, towards a narrower counter that
//! sessions consult before starting another slow-paced computation.
//! Dropping the permit releases both counts and wakes every
//! [`Throttle::subscribe`]r so deferred sessions can retry.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleCounts {
    /// Sessions currently awaiting an engine result.
    pub in_flight: usize,
    /// Subset of `in_flight` for slow-paced matches.
    pub slow_in_flight: usize,
}

#[derive(Debug)]
pub struct Throttle {
    counts: Mutex<ThrottleCounts>,
    /// Bumped on every release.
    released: watch::Sender<u64>,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

impl Throttle {
    pub fn new() -> Self {
        let (released, _) = watch::channel(0);
        Throttle {
            counts: Mutex::new(ThrottleCounts::default()),
            released,
        }
    }

    /// Current counter values.
    pub fn counts(&self) -> ThrottleCounts {
        *self.lock()
    }

    /// True if a slow-paced request must wait for another slow-paced
    /// computation to finish. Fast-paced requests are never deferred.
    pub fn should_defer(&self, slow: bool) -> bool {
        slow && self.lock().slow_in_flight > 0
    }

    /// Count a new in-flight computation. `slow` also counts it against
    /// the slow-paced limit.
    pub fn acquire(self: &Arc<Self>, slow: bool) -> ThrottlePermit {
        {
            let mut counts = self.lock();
            counts.in_flight += 1;
            if slow {
                counts.slow_in_flight += 1;
            }
        }

        ThrottlePermit {
            throttle: Arc::clone(self),
            slow,
        }
    }

    /// Take the slow-paced slot if it is free. The check and the count
    /// happen under one lock, so two sessions woken by the same release
    /// cannot both get it.
    pub fn try_acquire_slow(self: &Arc<Self>) -> Option<ThrottlePermit> {
        {
            let mut counts = self.lock();
            if counts.slow_in_flight > 0 {
                return None;
            }
            counts.in_flight += 1;
            counts.slow_in_flight += 1;
        }

        Some(ThrottlePermit {
            throttle: Arc::clone(self),
            slow: true,
        })
    }

    /// Receiver that changes whenever a permit is released.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.released.subscribe()
    }

    fn release(&self, slow: bool) {
        {
            let mut counts = self.lock();
            counts.in_flight = counts.in_flight.saturating_sub(1);
            if slow {
                counts.slow_in_flight = counts.slow_in_flight.saturating_sub(1);
            }
        }
        self.released.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    // A panic while holding the lock cannot leave the counters half
    // updated, so a poisoned mutex is still usable.
    fn lock(&self) -> MutexGuard<'_, ThrottleCounts> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One in-flight computation. Released on drop.
#[derive(Debug)]
pub struct ThrottlePermit {
    throttle: Arc<Throttle>,
    slow: bool,
}

impl ThrottlePermit {
    pub fn is_slow(&self) -> bool {
        self.slow
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        self.throttle.release(self.slow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_count_and_release_symmetrically() {
        let throttle = Arc::new(Throttle::new());

        let fast = throttle.acquire(false);
        let slow = throttle.acquire(true);
        assert_eq!(
            throttle.counts(),
            ThrottleCounts { in_flight: 2, slow_in_flight: 1 }
        );

        drop(fast);
        assert_eq!(
            throttle.counts(),
            ThrottleCounts { in_flight: 1, slow_in_flight: 1 }
        );

        drop(slow);
        assert_eq!(throttle.counts(), ThrottleCounts::default());
    }

    #[test]
    fn fast_permits_never_touch_slow_counter() {
        let throttle = Arc::new(Throttle::new());
        let permits: Vec<_> = (0..5).map(|_| throttle.acquire(false)).collect();
        assert_eq!(throttle.counts().slow_in_flight, 0);
        assert!(!throttle.should_defer(true));
        drop(permits);
        assert_eq!(throttle.counts(), ThrottleCounts::default());
    }

    #[test]
    fn slow_requests_defer_behind_slow_computation() {
        let throttle = Arc::new(Throttle::new());
        let held = throttle.acquire(true);

        assert!(throttle.should_defer(true));
        assert!(!throttle.should_defer(false));

        drop(held);
        assert!(!throttle.should_defer(true));
    }

    #[test]
    fn slow_slot_goes_to_one_taker() {
        let throttle = Arc::new(Throttle::new());
        let held = throttle.acquire(true);
        assert!(throttle.try_acquire_slow().is_none());
        assert_eq!(throttle.counts(), ThrottleCounts { in_flight: 1, slow_in_flight: 1 });
        drop(held);

        let barrier = Arc::new(std::sync::Barrier::new(8));
        let takers: Vec<_> = (0..8)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    throttle.try_acquire_slow()
                })
            })
            .collect();
        let permits: Vec<_> = takers
            .into_iter()
            .filter_map(|taker| taker.join().unwrap())
            .collect();

        assert_eq!(permits.len(), 1);
        assert!(permits[0].is_slow());
        assert_eq!(throttle.counts(), ThrottleCounts { in_flight: 1, slow_in_flight: 1 });
        drop(permits);
        assert_eq!(throttle.counts(), ThrottleCounts::default());
    }

    #[test]
    fn release_notifies_subscribers() {
        let throttle = Arc::new(Throttle::new());
        let mut rx = throttle.subscribe();
        assert!(!rx.has_changed().unwrap_or(false));

        drop(throttle.acquire(true));
        assert!(rx.has_changed().unwrap_or(false));
        rx.mark_unchanged();
        assert!(!rx.has_changed().unwrap_or(true));
    }
}
