//! Write-once result cell shared between one producer and many waiters
//!
//! The producer half ([`OutcomeCell`]) is created at reservation time; any
//! number of [`OutcomeHandle`]s can await it. Dropping the cell without
//! resolving it is observable: waiters get `None` instead of hanging.

use tokio::sync::watch;

/// Producer side; resolves exactly once
#[derive(Debug)]
pub struct OutcomeCell<T, E> {
    tx: watch::Sender<Option<Result<T, E>>>,
}

/// Waiter side; cheap to clone
#[derive(Debug)]
pub struct OutcomeHandle<T, E> {
    rx: watch::Receiver<Option<Result<T, E>>>,
}

impl<T, E> Clone for OutcomeHandle<T, E> {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

impl<T, E> OutcomeCell<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn new() -> (Self, OutcomeHandle<T, E>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, OutcomeHandle { rx })
    }

    pub fn handle(&self) -> OutcomeHandle<T, E> {
        OutcomeHandle { rx: self.tx.subscribe() }
    }

    pub fn complete(self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, error: E) {
        self.resolve(Err(error));
    }

    pub fn resolve(self, outcome: Result<T, E>) {
        self.tx.send_replace(Some(outcome));
    }
}

impl<T, E> OutcomeHandle<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Wait for the outcome
    ///
    /// Returns `None` when the producer was dropped without resolving.
    pub async fn wait(mut self) -> Option<Result<T, E>> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
    }

    /// Outcome if already resolved, without waiting
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_waiters_see_same_value() {
        let (cell, handle) = OutcomeCell::<u32, String>::new();
        let second = handle.clone();
        let third = cell.handle();

        let waiters = tokio::spawn(async move {
            let (a, b) = tokio::join!(handle.wait(), second.wait());
            (a, b)
        });
        tokio::task::yield_now().await;
        cell.complete(7);

        let (a, b) = waiters.await.unwrap();
        assert_eq!(a, Some(Ok(7)));
        assert_eq!(b, Some(Ok(7)));
        assert_eq!(third.wait().await, Some(Ok(7)));
    }

    #[tokio::test]
    async fn test_failure_is_shared() {
        let (cell, handle) = OutcomeCell::<u32, String>::new();
        cell.fail("boom".to_string());
        assert_eq!(handle.peek(), Some(Err("boom".to_string())));
        assert_eq!(handle.wait().await, Some(Err("boom".to_string())));
    }

    #[tokio::test]
    async fn test_dropped_cell_reports_abandonment() {
        let (cell, handle) = OutcomeCell::<u32, String>::new();
        drop(cell);
        assert_eq!(handle.wait().await, None);
    }
}
