//! In-memory queue owned by the orchestrating host

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::trace;

use crate::error::{QueueError, QueueResult};
use crate::queue::{Wait, WorkQueue};

/// FIFO queue in host memory
///
/// `get` blocks up to its [`Wait`]. Role processes reach these queues through
/// [`crate::ManagedQueue`]; the host's own code uses them directly.
pub struct LocalQueue<T> {
    name: String,
    items: Mutex<VecDeque<T>>,
    available: Notify,
    closed: AtomicBool,
}

impl<T: Send> LocalQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Send> WorkQueue<T> for LocalQueue<T> {
    async fn put(&self, item: T) -> QueueResult<()> {
        self.ensure_open()?;
        self.items.lock().await.push_back(item);
        self.available.notify_one();
        Ok(())
    }

    async fn get(&self, wait: Wait) -> QueueResult<Option<T>> {
        let deadline = wait.deadline();

        loop {
            // Register interest before looking so a put between the check
            // and the await is not missed
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.items.lock().await.pop_front() {
                return Ok(Some(item));
            }
            self.ensure_open()?;

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        trace!(queue = %self.name, "get timed out");
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn size(&self) -> QueueResult<usize> {
        Ok(self.items.lock().await.len())
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
        Ok(())
    }

    fn honours_wait(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = LocalQueue::new("fifo");
        for i in 0..3 {
            queue.put(i).await.unwrap();
        }
        assert_eq!(queue.size().await.unwrap(), 3);
        assert_eq!(queue.get(Wait::Immediate).await.unwrap(), Some(0));
        assert_eq!(queue.get(Wait::Immediate).await.unwrap(), Some(1));
        assert_eq!(queue.get(Wait::Immediate).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_immediate_get_on_empty_does_not_block() {
        let queue: LocalQueue<u8> = LocalQueue::new("empty");
        let result = tokio::time::timeout(Duration::from_millis(100), queue.get(Wait::Immediate))
            .await
            .expect("immediate get must not block");
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_get_expires() {
        let queue: LocalQueue<u8> = LocalQueue::new("bounded");
        let result = queue.get(Wait::For(Duration::from_secs(2))).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_forever_get_waits_for_put() {
        let queue = Arc::new(LocalQueue::new("forever"));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get(Wait::Forever).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!consumer.is_finished());

        queue.put("work".to_string()).await.unwrap();
        let item = consumer.await.unwrap().unwrap();
        assert_eq!(item.as_deref(), Some("work"));
    }

    #[tokio::test]
    async fn test_close_wakes_waiters_and_rejects_puts() {
        let queue: Arc<LocalQueue<u8>> = Arc::new(LocalQueue::new("closing"));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get(Wait::Forever).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close().await.unwrap();

        assert!(matches!(consumer.await.unwrap(), Err(QueueError::Closed(_))));
        assert!(matches!(queue.put(1).await, Err(QueueError::Closed(_))));
    }

    #[tokio::test]
    async fn test_items_survive_close_for_draining() {
        let queue = LocalQueue::new("drain");
        queue.put(5u8).await.unwrap();
        queue.close().await.unwrap();
        assert_eq!(queue.get(Wait::Immediate).await.unwrap(), Some(5));
    }
}
