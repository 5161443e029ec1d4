use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, warn};

/// Bounded pool for fire-and-forget work (automation event dispatch,
/// needs-attention notifications). The triggering path never blocks on the
/// task and never sees its errors; failures land in the log. Saturation is
/// visible as a warning before the task queues on the semaphore.
pub struct DetachedPool {
    permits: Arc<Semaphore>,
}

impl DetachedPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn spawn<F>(&self, task_name: &'static str, fut: F)
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        if self.permits.available_permits() == 0 {
            warn!("Detached pool saturated; {} will wait for a slot", task_name);
        }
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // pool closed during shutdown
            };
            if let Err(e) = fut.await {
                error!("Detached task {} failed: {}", task_name, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_submitted_tasks() {
        static RAN: AtomicUsize = AtomicUsize::new(0);
        let pool = DetachedPool::new(2);
        for _ in 0..3 {
            pool.spawn("test_task", async {
                RAN.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(RAN.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn task_errors_do_not_propagate() {
        let pool = DetachedPool::new(1);
        pool.spawn("failing_task", async { Err("boom".to_string()) });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // still usable after a failure
        pool.spawn("ok_task", async { Ok(()) });
    }
}
