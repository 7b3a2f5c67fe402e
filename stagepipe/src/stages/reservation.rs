//! The reservation flag guarding a stage's single handoff slot.

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default, Clone, Copy)]
struct ReservationState {
    reserved: bool,
    closed: bool,
}

/// A one-slot reservation with a terminal closed state.
///
/// At most one reservation is outstanding at a time, and once closed the
/// slot can never be reserved again. Waiters register with a [`Notify`]
/// before inspecting the state, so no wakeup can be lost between the check
/// and the wait.
#[derive(Debug, Default)]
pub struct Reservation {
    state: Mutex<ReservationState>,
    /// Signalled once per release; wakes one blocked reserver.
    available: Notify,
    /// Signalled on every release; wakes the owner waiting to go idle.
    released: Notify,
    /// Signalled when the slot closes.
    closure: Notify,
}

impl Reservation {
    /// Creates an open, unreserved slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the slot to become free and takes it.
    ///
    /// Returns `false` without reserving if the slot is or becomes closed.
    pub async fn reserve(&self) -> bool {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return false;
                }
                if !state.reserved {
                    state.reserved = true;
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Frees the slot and wakes one waiting reserver.
    ///
    /// Returns `false` (and wakes nobody) if the slot was not reserved.
    pub fn release(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.reserved {
                trace!("release without an outstanding reservation");
                return false;
            }
            state.reserved = false;
        }
        self.available.notify_one();
        self.released.notify_waiters();
        true
    }

    /// Closes the slot and wakes every waiter. Returns true on the first call.
    pub fn close(&self) -> bool {
        let newly_closed = {
            let mut state = self.state.lock();
            let was_closed = state.closed;
            state.closed = true;
            !was_closed
        };
        self.wake_all();
        newly_closed
    }

    /// Closes the slot only if no reservation is outstanding.
    ///
    /// Returns true if the slot is closed afterwards. The check and the close
    /// happen under one lock, so a concurrent reserver either wins before the
    /// close or observes it.
    pub fn close_if_unreserved(&self) -> bool {
        let newly_closed = {
            let mut state = self.state.lock();
            if state.reserved {
                return false;
            }
            let was_closed = state.closed;
            state.closed = true;
            !was_closed
        };
        if newly_closed {
            self.wake_all();
        }
        true
    }

    /// Returns true while a reservation is outstanding.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.state.lock().reserved
    }

    /// Returns true once the slot has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Resolves once the slot has closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.closure.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Resolves once no reservation is outstanding.
    pub async fn unreserved(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_reserved() {
                return;
            }
            notified.await;
        }
    }

    fn wake_all(&self) {
        self.available.notify_waiters();
        self.closure.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_reserve_free_slot() {
        let slot = Reservation::new();
        assert!(slot.reserve().await);
        assert!(slot.is_reserved());
    }

    #[tokio::test]
    async fn test_second_reserve_waits_for_release() {
        let slot = Arc::new(Reservation::new());
        assert!(slot.reserve().await);

        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.reserve().await })
        };
        tokio::time::sleep(SHORT).await;
        assert!(!waiter.is_finished());

        assert!(slot.release());
        assert!(tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());
        assert!(slot.is_reserved());
    }

    #[tokio::test]
    async fn test_release_wakes_exactly_one_waiter() {
        let slot = Arc::new(Reservation::new());
        assert!(slot.reserve().await);

        let granted = Arc::new(AtomicUsize::new(0));
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let slot = slot.clone();
            let granted = granted.clone();
            waiters.push(tokio::spawn(async move {
                if slot.reserve().await {
                    granted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        tokio::time::sleep(SHORT).await;

        slot.release();
        tokio::time::sleep(SHORT).await;
        assert_eq!(granted.load(Ordering::SeqCst), 1);

        slot.close();
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(granted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reservers_are_mutually_exclusive() {
        let slot = Arc::new(Reservation::new());
        let holders = Arc::new(AtomicUsize::new(0));
        let max_holders = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let slot = slot.clone();
            let holders = holders.clone();
            let max_holders = max_holders.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    assert!(slot.reserve().await);
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_holders.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    slot.release();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_holders.load(Ordering::SeqCst), 1);
        assert!(!slot.is_reserved());
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_future_reserves() {
        let slot = Arc::new(Reservation::new());
        assert!(slot.reserve().await);

        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.reserve().await })
        };
        tokio::time::sleep(SHORT).await;

        assert!(slot.close());
        assert!(!slot.close());
        assert!(!tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());

        slot.release();
        assert!(!slot.reserve().await);
        assert!(slot.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_reserve_leaves_no_reservation() {
        let slot = Arc::new(Reservation::new());
        assert!(slot.reserve().await);

        let result = tokio::time::timeout(SHORT, slot.reserve()).await;
        assert!(result.is_err());

        slot.release();
        assert!(!slot.is_reserved());
        assert!(slot.reserve().await);
    }

    #[tokio::test]
    async fn test_release_without_reservation_is_noop() {
        let slot = Reservation::new();
        assert!(!slot.release());
        assert!(!slot.is_reserved());
        assert!(slot.reserve().await);
    }

    #[tokio::test]
    async fn test_close_if_unreserved() {
        let slot = Reservation::new();
        assert!(slot.reserve().await);
        assert!(!slot.close_if_unreserved());
        assert!(!slot.is_closed());

        slot.release();
        assert!(slot.close_if_unreserved());
        assert!(slot.is_closed());
        assert!(slot.close_if_unreserved());
    }

    #[tokio::test]
    async fn test_closed_and_unreserved_signals() {
        let slot = Arc::new(Reservation::new());
        assert!(slot.reserve().await);

        let idle = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.unreserved().await })
        };
        let closed = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.closed().await })
        };
        tokio::time::sleep(SHORT).await;
        assert!(!idle.is_finished());
        assert!(!closed.is_finished());

        slot.release();
        tokio::time::timeout(Duration::from_secs(1), idle).await.unwrap().unwrap();

        slot.close();
        tokio::time::timeout(Duration::from_secs(1), closed).await.unwrap().unwrap();
    }
}
