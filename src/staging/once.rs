use crate::error::DmlError;
use std::future::Future;
use tokio::sync::OnceCell;

/// Single-assignment outcome shared by every caller.
///
/// The first caller runs the task; concurrent callers wait for it and later
/// callers observe the memoized outcome without running anything. A failure is
/// memoized too, so a task is never retried.
#[derive(Debug, Default)]
pub(crate) struct RunOnce {
    outcome: OnceCell<Result<(), String>>,
}

impl RunOnce {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs `task` unless some caller already did. The caller that ran the task
    /// gets its original error; everyone else gets `replay(message)`.
    pub(crate) async fn run<F, Fut, R>(&self, task: F, replay: R) -> Result<(), DmlError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), DmlError>>,
        R: FnOnce(&str) -> DmlError,
    {
        let mut original: Option<DmlError> = None;
        let slot = &mut original;
        let outcome = self
            .outcome
            .get_or_init(move || async move {
                match task().await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        let message = err.to_string();
                        *slot = Some(err);
                        Err(message)
                    }
                }
            })
            .await;
        match outcome {
            Ok(()) => Ok(()),
            Err(message) => Err(original.unwrap_or_else(|| replay(message.as_str()))),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.outcome.initialized()
    }

    pub(crate) fn succeeded(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::RunOnce;
    use crate::error::DmlError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let once = Arc::new(RunOnce::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let once = once.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                once.run(
                    || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(())
                    },
                    |m| DmlError::Validation(m.to_string()),
                )
                .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("run");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(once.succeeded());
    }

    #[tokio::test]
    async fn failure_is_memoized_and_replayed() {
        let once = RunOnce::new();
        let first = once
            .run(
                || async { Err(DmlError::Unsupported("boom".into())) },
                |m| DmlError::Validation(m.to_string()),
            )
            .await
            .unwrap_err();
        assert_eq!(first.code_str(), "unsupported");

        let second = once
            .run(|| async { Ok(()) }, |m| DmlError::Validation(m.to_string()))
            .await
            .unwrap_err();
        assert_eq!(second.to_string(), "validation error: not supported: boom");
        assert!(once.is_settled());
        assert!(!once.succeeded());
    }
}
