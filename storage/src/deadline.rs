use crate::error::{Result, StorageError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Caller-supplied bound on how long a storage operation may take.
///
/// Expiry surfaces as [`StorageError::Timeout`]. The wrapped future is
/// dropped on expiry, so an open transaction inside it rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No bound
    pub fn none() -> Self {
        Self(None)
    }

    /// Expire `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    /// Expire at a fixed instant
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` to completion unless the deadline passes first
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let expired = || StorageError::Timeout(format!("{} exceeded its deadline", operation));

        match self.0 {
            None => fut.await,
            // Never start work whose deadline has already passed.
            Some(at) if Instant::now() >= at => Err(expired()),
            Some(at) => tokio::time::timeout_at(at, fut).await.unwrap_or_else(|_| Err(expired())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unbounded_deadline_completes() {
        let value = Deadline::none().run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!Deadline::none().is_expired());
        assert!(Deadline::none().remaining().is_none());
    }

    #[tokio::test]
    async fn test_expired_deadline_times_out() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result: Result<()> = deadline
            .run("slow_op", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(StorageError::Timeout(msg)) => assert!(msg.contains("slow_op")),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_passed_deadline_skips_work() {
        let deadline = Deadline::at(Instant::now());
        let result = deadline.run("instant_op", async { Ok(1) }).await;
        assert!(matches!(result, Err(StorageError::Timeout(_))));
    }
}
