//! Per-resource-family version accounting: a monotonic counter plus an
//! edge-triggered wakeup fan-out.

use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;

#[derive(Default)]
pub struct Notifier {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    last: u64,
    waiters: Vec<Sender<u64>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently published version; zero before the first bump.
    pub fn last(&self) -> u64 {
        self.inner.lock().last
    }

    /// Increments the version, signals every registered waiter with the new
    /// value, and drops them all; waiters re-register for the next edge.
    pub fn next(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.last += 1;
        let last = inner.last;
        for waiter in inner.waiters.drain(..) {
            // A full slot means a wakeup is already pending; a closed
            // receiver means the stream went away. Neither matters.
            let _ = waiter.try_send(last);
        }
        last
    }

    /// Enrolls a waiter that last observed `last`. Fires immediately when
    /// the waiter is already behind.
    pub fn register(&self, waker: Sender<u64>, last: u64) {
        let mut inner = self.inner.lock();
        if inner.last > last {
            let _ = waker.try_send(inner.last);
        } else {
            inner.waiters.push(waker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn versions_count_up_from_one() {
        let notifier = Notifier::new();
        assert_eq!(notifier.next(), 1);
        assert_eq!(notifier.next(), 2);
        assert_eq!(notifier.next(), 3);
    }

    #[test]
    fn a_stale_waiter_is_signaled_immediately() {
        let notifier = Notifier::new();
        notifier.next();
        notifier.next();

        let (tx, mut rx) = mpsc::channel(1);
        notifier.register(tx, 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
    }

    #[test]
    fn waiters_are_edge_triggered() {
        let notifier = Notifier::new();
        let (tx, mut rx) = mpsc::channel(1);
        notifier.register(tx, 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(notifier.next(), 1);
        assert_eq!(rx.try_recv().unwrap(), 1);

        // The waiter was dropped on the edge; a further bump stays silent.
        notifier.next();
        assert!(rx.try_recv().is_err());
    }
}
