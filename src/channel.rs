//! Single-slot swap channel.
//!
//! The producer swaps its value into the slot, the consumer swaps it back
//! out. Only the most recent value is kept: producing twice before a
//! consume overwrites the first one. Each side notices that the other has
//! gone away through the shared reference count.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked consumer re-checks that the producer is still alive.
const LIVENESS_POLL: Duration = Duration::from_millis(100);

struct Slot<T> {
    value: T,
    ready: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready_cond: Condvar,
}

pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

pub fn swap_channel<T: Default>() -> (Producer<T>, Consumer<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            value: T::default(),
            ready: false,
        }),
        ready_cond: Condvar::new(),
    });
    (
        Producer {
            shared: shared.clone(),
        },
        Consumer { shared },
    )
}

impl<T> Producer<T> {
    /// Swap `value` into the slot and mark it ready.
    ///
    /// Afterwards `value` holds whatever was in the slot before (a stale
    /// frame if the consumer was slow), which the caller can reuse.
    pub fn produce(&self, value: &mut T) {
        {
            let mut slot = self.shared.slot.lock();
            std::mem::swap(&mut slot.value, value);
            slot.ready = true;
        }
        self.shared.ready_cond.notify_one();
    }

    pub fn is_consumer_alive(&self) -> bool {
        Arc::strong_count(&self.shared) > 1
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.shared.ready_cond.notify_all();
    }
}

impl<T> Consumer<T> {
    /// Take the pending value if there is one. Never blocks.
    pub fn try_consume(&self, out: &mut T) -> bool {
        let mut slot = self.shared.slot.lock();
        take_ready(&mut slot, out)
    }

    /// Block until a value is ready and swap it into `out`.
    ///
    /// Returns `false` once the producer has been dropped and nothing is
    /// left to take.
    pub fn wait_consume(&self, out: &mut T) -> bool {
        let mut slot = self.shared.slot.lock();
        loop {
            if take_ready(&mut slot, out) {
                return true;
            }
            if !self.is_producer_alive() {
                return false;
            }
            self.shared.ready_cond.wait_for(&mut slot, LIVENESS_POLL);
        }
    }

    /// Like [`wait_consume`](Self::wait_consume) but gives up after `timeout`.
    pub fn wait_consume_timeout(&self, out: &mut T, timeout: Duration) -> bool {
        let mut slot = self.shared.slot.lock();
        if take_ready(&mut slot, out) {
            return true;
        }
        if !self.is_producer_alive() {
            return false;
        }
        self.shared.ready_cond.wait_for(&mut slot, timeout);
        take_ready(&mut slot, out)
    }

    pub fn is_producer_alive(&self) -> bool {
        Arc::strong_count(&self.shared) > 1
    }
}

fn take_ready<T>(slot: &mut Slot<T>, out: &mut T) -> bool {
    if !slot.ready {
        return false;
    }
    std::mem::swap(&mut slot.value, out);
    slot.ready = false;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_consume_empty() {
        let (_producer, consumer) = swap_channel::<i32>();
        let mut out = 0;
        assert!(!consumer.try_consume(&mut out));
        assert_eq!(out, 0);
    }

    #[test]
    fn test_latest_value_wins() {
        let (producer, consumer) = swap_channel::<i32>();
        producer.produce(&mut 1);
        producer.produce(&mut 2);

        let mut out = 0;
        assert!(consumer.try_consume(&mut out));
        assert_eq!(out, 2);
        // nothing queued behind it
        assert!(!consumer.try_consume(&mut out));
    }

    #[test]
    fn test_produce_swaps_back_previous_slot() {
        let (producer, consumer) = swap_channel::<Vec<u8>>();
        let mut first = vec![1];
        producer.produce(&mut first);
        assert!(first.is_empty());

        let mut second = vec![2];
        producer.produce(&mut second);
        assert_eq!(second, vec![1]);

        let mut out = Vec::new();
        assert!(consumer.try_consume(&mut out));
        assert_eq!(out, vec![2]);
    }

    #[test]
    fn test_wait_consume_across_threads() {
        let (producer, consumer) = swap_channel::<u64>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.produce(&mut 42);
        });

        let mut out = 0;
        assert!(consumer.wait_consume(&mut out));
        assert_eq!(out, 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_consume_returns_when_producer_dropped() {
        let (producer, consumer) = swap_channel::<u64>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(producer);
        });

        let mut out = 0;
        assert!(!consumer.wait_consume(&mut out));
        assert!(!consumer.is_producer_alive());
        handle.join().unwrap();
    }

    #[test]
    fn test_pending_value_survives_producer_drop() {
        let (producer, consumer) = swap_channel::<u64>();
        producer.produce(&mut 7);
        drop(producer);

        let mut out = 0;
        assert!(consumer.wait_consume(&mut out));
        assert_eq!(out, 7);
        assert!(!consumer.wait_consume(&mut out));
    }

    #[test]
    fn test_wait_consume_timeout() {
        let (producer, consumer) = swap_channel::<u64>();
        let mut out = 0;
        assert!(!consumer.wait_consume_timeout(&mut out, Duration::from_millis(5)));
        assert!(producer.is_consumer_alive());
        drop(consumer);
        assert!(!producer.is_consumer_alive());
    }
}
