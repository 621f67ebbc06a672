//! Deferred task execution

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A boxed future handed off for later execution.
pub type ScheduledTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Seam for deferring work. Production schedules onto the runtime; tests
/// can capture tasks and run them inline.
pub trait TaskScheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed.
    fn run_after(&self, delay: Duration, task: ScheduledTask);
}

/// Schedules tasks onto the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl TaskScheduler for TokioScheduler {
    fn run_after(&self, delay: Duration, task: ScheduledTask) {
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn task_runs_only_after_the_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        TokioScheduler.run_after(
            Duration::from_millis(20),
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn zero_delay_runs_promptly() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        TokioScheduler.run_after(
            Duration::ZERO,
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
