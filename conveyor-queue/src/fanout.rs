//! In-memory broadcast channel

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{QueueError, QueueResult};
use crate::queue::{Wait, WorkQueue};

/// Fan-out where every subscriber sees every message put after it subscribed
///
/// `get` never blocks, like [`crate::BrokerFanout`], so the crash protocol
/// behaves the same whichever backs it.
pub struct MemoryFanout<T: Clone> {
    sender: broadcast::Sender<T>,
    receiver: Mutex<Option<broadcast::Receiver<T>>>,
}

impl<T: Clone + Send + 'static> MemoryFanout<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Another endpoint on the same channel with its own subscription
    pub fn subscribe(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: Mutex::new(Some(self.sender.subscribe())),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> WorkQueue<T> for MemoryFanout<T> {
    async fn put(&self, item: T) -> QueueResult<()> {
        if self.receiver.lock().await.is_none() {
            return Err(QueueError::Closed("fanout".to_string()));
        }
        // No subscribers is not a failure: nobody was listening
        let _ = self.sender.send(item);
        Ok(())
    }

    async fn get(&self, _wait: Wait) -> QueueResult<Option<T>> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard
            .as_mut()
            .ok_or_else(|| QueueError::Closed("fanout".to_string()))?;

        loop {
            match receiver.try_recv() {
                Ok(item) => return Ok(Some(item)),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "fanout subscriber lagged; oldest messages dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn size(&self) -> QueueResult<usize> {
        Ok(self
            .receiver
            .lock()
            .await
            .as_ref()
            .map(|r| r.len())
            .unwrap_or(0))
    }

    async fn close(&self) -> QueueResult<()> {
        self.receiver.lock().await.take();
        Ok(())
    }

    fn honours_wait(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_every_message() {
        let first = MemoryFanout::new(8);
        let second = first.subscribe();

        first.put("crash".to_string()).await.unwrap();

        assert_eq!(first.get(Wait::Forever).await.unwrap().as_deref(), Some("crash"));
        assert_eq!(second.get(Wait::Forever).await.unwrap().as_deref(), Some("crash"));
        assert_eq!(second.get(Wait::Forever).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_is_non_blocking_for_any_wait() {
        let fanout: MemoryFanout<u8> = MemoryFanout::new(4);
        for wait in [Wait::Immediate, Wait::For(std::time::Duration::from_secs(60)), Wait::Forever] {
            let got = tokio::time::timeout(std::time::Duration::from_millis(100), fanout.get(wait))
                .await
                .expect("fanout get must not block");
            assert_eq!(got.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_newest() {
        let fanout = MemoryFanout::new(2);
        for i in 0..5u8 {
            fanout.put(i).await.unwrap();
        }
        assert_eq!(fanout.get(Wait::Immediate).await.unwrap(), Some(3));
        assert_eq!(fanout.get(Wait::Immediate).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_closed_endpoint_rejects_use() {
        let fanout: MemoryFanout<u8> = MemoryFanout::new(2);
        fanout.close().await.unwrap();
        assert!(fanout.put(1).await.is_err());
        assert!(fanout.get(Wait::Immediate).await.is_err());
    }
}
