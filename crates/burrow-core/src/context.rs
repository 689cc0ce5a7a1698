use crate::error::{Result, StorageError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline carried by every request-facing store operation.
///
/// Backends wrap their work in [`OpContext::run`], so a cancelled or expired
/// context surfaces as [`StorageError::DeadlineExceeded`] instead of a
/// misleading "not found" or an indefinitely blocked caller.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context bound to an externally owned cancellation token.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// A context cancelled together with `parent` and expiring after `timeout`.
    pub fn child(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel: parent.child_token(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Returns `true` once the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    /// Runs `operation` until it completes or the context ends, whichever is first.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                Err(StorageError::DeadlineExceeded(format!("{operation}: context cancelled")))
            }
            () = deadline => {
                Err(StorageError::DeadlineExceeded(format!("{operation}: deadline elapsed")))
            }
            result = fut => result,
        }
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_operation_result() {
        let ctx = OpContext::background();
        let value = ctx.run("lookup", async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn run_passes_operation_errors_through() {
        let ctx = OpContext::background();
        let err = ctx
            .run::<_, ()>("lookup", async { Err(StorageError::NotFound("abc".into())) })
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound("abc".into()));
    }

    #[tokio::test]
    async fn cancelled_context_fails_fast() {
        let token = CancellationToken::new();
        let ctx = OpContext::with_cancel(token.clone());
        token.cancel();

        let err = ctx.run("lookup", async { Ok(1) }).await.unwrap_err();
        assert!(matches!(err, StorageError::DeadlineExceeded(_)));
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_slow_operation() {
        let ctx = OpContext::with_timeout(Duration::from_millis(50));
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        };

        let err = ctx.run("insert", slow).await.unwrap_err();
        assert!(matches!(err, StorageError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn child_context_follows_parent_cancellation() {
        let parent = CancellationToken::new();
        let ctx = OpContext::child(&parent, Duration::from_secs(60));
        assert!(!ctx.is_done());

        parent.cancel();
        assert!(ctx.is_done());
    }
}
