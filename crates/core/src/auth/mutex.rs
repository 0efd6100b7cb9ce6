//! FIFO mutex guarding calls to the remote authority
//!
//! State is a `held` flag plus an ordered queue of parked waiters. Release
//! either hands the lock directly to the oldest live waiter (the flag stays
//! set) or clears the flag when nobody is waiting, so the mutex is never
//! "unheld with a non-empty queue".
//!
//! A waiter whose future is dropped before it is resumed is skipped. If it
//! was dropped after the hand-off but before observing it, the lock is
//! passed on from its drop.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct MutexState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Explicit hand-off mutex
#[derive(Debug, Default)]
pub struct RefreshMutex {
    state: Mutex<MutexState>,
}

impl RefreshMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, parking behind earlier callers if it is held
    pub async fn acquire(&self) -> RefreshPermit<'_> {
        loop {
            let rx = {
                let mut state = self.state.lock();
                if !state.held {
                    state.held = true;
                    return RefreshPermit { mutex: self };
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };

            let mut waiter = ParkedWaiter { mutex: self, rx: Some(rx) };
            let resumed = match waiter.rx.as_mut() {
                Some(rx) => rx.await.is_ok(),
                None => false,
            };
            waiter.rx = None;

            if resumed {
                // Ownership was transferred by `release`; the flag is still set.
                return RefreshPermit { mutex: self };
            }
        }
    }

    /// Take the lock only if it is free
    pub fn try_acquire(&self) -> Option<RefreshPermit<'_>> {
        let mut state = self.state.lock();
        if state.held {
            return None;
        }
        state.held = true;
        Some(RefreshPermit { mutex: self })
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// Number of parked waiters, including ones that have since gone away
    pub fn queue_len(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn release(&self) {
        let mut state = self.state.lock();
        while let Some(next) = state.waiters.pop_front() {
            if next.send(()).is_ok() {
                return;
            }
        }
        state.held = false;
    }
}

/// Proof of holding the [`RefreshMutex`]; releases on drop
#[derive(Debug)]
#[must_use = "the mutex is released as soon as the permit is dropped"]
pub struct RefreshPermit<'a> {
    mutex: &'a RefreshMutex,
}

impl Drop for RefreshPermit<'_> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

struct ParkedWaiter<'a> {
    mutex: &'a RefreshMutex,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for ParkedWaiter<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                // Handed the lock but cancelled before taking it
                self.mutex.release();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex as PlMutex;

    use super::*;

    #[tokio::test]
    async fn test_uncontended_acquire_and_release() {
        let mutex = RefreshMutex::new();
        {
            let _permit = mutex.acquire().await;
            assert!(mutex.is_held());
            assert!(mutex.try_acquire().is_none());
        }
        assert!(!mutex.is_held());
        assert!(mutex.try_acquire().is_some());
    }

    /// Validates FIFO hand-off between queued waiters.
    ///
    /// Assertions:
    /// - Waiters run in the order they queued.
    /// - The mutex is unheld with an empty queue afterwards.
    #[tokio::test]
    async fn test_waiters_resume_in_fifo_order() {
        let mutex = Arc::new(RefreshMutex::new());
        let order = Arc::new(PlMutex::new(Vec::new()));

        let first = mutex.acquire().await;
        let mut tasks = Vec::new();
        for id in 0..4 {
            let task_mutex = Arc::clone(&mutex);
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _permit = task_mutex.acquire().await;
                order.lock().push(id);
            }));
            // Let each task park before the next one starts
            while mutex.queue_len() < id + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(first);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert!(!mutex.is_held());
        assert_eq!(mutex.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let mutex = Arc::new(RefreshMutex::new());
        let held = mutex.acquire().await;

        let cancelled = {
            let mutex = Arc::clone(&mutex);
            tokio::spawn(async move {
                let _permit = mutex.acquire().await;
            })
        };
        while mutex.queue_len() < 1 {
            tokio::task::yield_now().await;
        }
        cancelled.abort();
        let _ = cancelled.await;

        drop(held);
        assert!(!mutex.is_held());

        let next = tokio::time::timeout(Duration::from_secs(1), mutex.acquire()).await;
        assert!(next.is_ok());
    }
}
