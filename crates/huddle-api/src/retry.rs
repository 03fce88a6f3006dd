use std::future::Future;
use std::time::Duration;

use tracing::warn;

use huddle_types::ChatError;

/// Total attempts per operation, conflicts included.
pub const MAX_ATTEMPTS: u32 = 3;

/// Fixed pause between conflicting attempts.
pub const BACKOFF: Duration = Duration::from_millis(100);

/// Re-invoke a transactional closure while it fails with an optimistic
/// lock conflict. Domain errors pass through untouched; once the attempt
/// budget is spent the conflict itself surfaces.
pub async fn on_conflict<T, F, Fut>(op: &str, mut run: F) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let mut attempt = 1;
    loop {
        match run().await {
            Err(ChatError::Conflict) if attempt < MAX_ATTEMPTS => {
                warn!("optimistic conflict on {op} (attempt {attempt}/{MAX_ATTEMPTS}), retrying");
                tokio::time::sleep(BACKOFF).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn single_conflict_retries_to_success() {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let result = on_conflict("test", move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ChatError::Conflict)
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_conflict_surfaces_after_budget() {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let result: Result<(), ChatError> = on_conflict("test", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ChatError::Conflict)
        })
        .await;

        assert!(matches!(result, Err(ChatError::Conflict)));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn domain_errors_never_retry() {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let result: Result<(), ChatError> = on_conflict("test", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ChatError::UserDoesNotExist)
        })
        .await;

        assert!(matches!(result, Err(ChatError::UserDoesNotExist)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
