//! The uniform queue contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::QueueResult;

/// How long a `get` may wait for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wait {
    /// Return at once
    Immediate,
    /// Wait up to the given duration
    For(Duration),
    /// Wait until an item arrives
    Forever,
}

impl Wait {
    /// Build from a timeout in seconds, where `None`, a non-finite value or
    /// one too large for a `Duration` means forever and zero or less means
    /// immediate
    pub fn from_secs_f64(seconds: Option<f64>) -> Self {
        match seconds {
            None => Wait::Forever,
            Some(s) if !s.is_finite() => Wait::Forever,
            Some(s) if s <= 0.0 => Wait::Immediate,
            Some(s) => Duration::try_from_secs_f64(s)
                .map(Wait::For)
                .unwrap_or(Wait::Forever),
        }
    }

    /// Upper bound on the wait, `None` for forever
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Wait::Immediate => Some(Duration::ZERO),
            Wait::For(d) => Some(*d),
            Wait::Forever => None,
        }
    }

    /// Instant at which the wait expires, `None` for forever
    pub fn deadline(&self) -> Option<Instant> {
        self.as_duration().map(|d| Instant::now() + d)
    }
}

impl From<Duration> for Wait {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Wait::Immediate
        } else {
            Wait::For(duration)
        }
    }
}

/// A queue every pipeline stage uses the same way
///
/// Backends differ in one respect: whether `get` honours its [`Wait`].
/// In-memory backends block up to the wait; broker backends always poll
/// once and return immediately. Callers that need blocking semantics on
/// any backend use [`recv_polling`].
#[async_trait]
pub trait WorkQueue<T>: Send + Sync {
    /// Append an item (for fan-out backends: deliver it to every subscriber)
    async fn put(&self, item: T) -> QueueResult<()>;

    /// Take one item; `Ok(None)` when none became available
    async fn get(&self, wait: Wait) -> QueueResult<Option<T>>;

    /// Number of items currently waiting
    async fn size(&self) -> QueueResult<usize>;

    /// Release the queue's resources; later calls fail
    async fn close(&self) -> QueueResult<()>;

    /// Whether `get` blocks for its [`Wait`]
    fn honours_wait(&self) -> bool;
}

/// Shared handles are queues too
#[async_trait]
impl<T, Q> WorkQueue<T> for Arc<Q>
where
    T: Send + 'static,
    Q: WorkQueue<T> + ?Sized,
{
    async fn put(&self, item: T) -> QueueResult<()> {
        (**self).put(item).await
    }

    async fn get(&self, wait: Wait) -> QueueResult<Option<T>> {
        (**self).get(wait).await
    }

    async fn size(&self) -> QueueResult<usize> {
        (**self).size().await
    }

    async fn close(&self) -> QueueResult<()> {
        (**self).close().await
    }

    fn honours_wait(&self) -> bool {
        (**self).honours_wait()
    }
}

/// Blocking `get` over any backend
///
/// Delegates to `get` when the backend honours waits, otherwise polls every
/// `interval` until an item arrives or the wait expires.
pub async fn recv_polling<T, Q>(queue: &Q, wait: Wait, interval: Duration) -> QueueResult<Option<T>>
where
    Q: WorkQueue<T> + ?Sized,
{
    if queue.honours_wait() {
        return queue.get(wait).await;
    }

    let deadline = wait.deadline();
    loop {
        if let Some(item) = queue.get(Wait::Immediate).await? {
            return Ok(Some(item));
        }

        let pause = match deadline {
            None => interval,
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                interval.min(deadline - now)
            }
        };
        tokio::time::sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Non-blocking backend that only yields its item after a few polls
    struct SlowPoll {
        polls_before_item: usize,
        polls: AtomicUsize,
        items: Mutex<VecDeque<u32>>,
    }

    #[async_trait]
    impl WorkQueue<u32> for SlowPoll {
        async fn put(&self, item: u32) -> QueueResult<()> {
            self.items.lock().await.push_back(item);
            Ok(())
        }

        async fn get(&self, _wait: Wait) -> QueueResult<Option<u32>> {
            let seen = self.polls.fetch_add(1, Ordering::SeqCst);
            if seen < self.polls_before_item {
                return Ok(None);
            }
            Ok(self.items.lock().await.pop_front())
        }

        async fn size(&self) -> QueueResult<usize> {
            Ok(self.items.lock().await.len())
        }

        async fn close(&self) -> QueueResult<()> {
            Ok(())
        }

        fn honours_wait(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_wait_from_seconds() {
        assert_eq!(Wait::from_secs_f64(None), Wait::Forever);
        assert_eq!(Wait::from_secs_f64(Some(f64::INFINITY)), Wait::Forever);
        assert_eq!(Wait::from_secs_f64(Some(0.0)), Wait::Immediate);
        assert_eq!(
            Wait::from_secs_f64(Some(1.5)),
            Wait::For(Duration::from_millis(1500))
        );
        assert_eq!(Wait::from(Duration::ZERO), Wait::Immediate);
    }

    #[test]
    fn test_wait_beyond_duration_range_is_forever() {
        assert_eq!(Wait::from_secs_f64(Some(1e20)), Wait::Forever);
        assert_eq!(Wait::from_secs_f64(Some(f64::MAX)), Wait::Forever);
        assert_eq!(
            Wait::from_secs_f64(Some(86_400.0)),
            Wait::For(Duration::from_secs(86_400))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_polling_retries_until_item() {
        let queue = SlowPoll {
            polls_before_item: 3,
            polls: AtomicUsize::new(0),
            items: Mutex::new(VecDeque::from([7])),
        };

        let item = recv_polling(&queue, Wait::Forever, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(item, Some(7));
        assert_eq!(queue.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_polling_gives_up_at_deadline() {
        let queue = SlowPoll {
            polls_before_item: usize::MAX,
            polls: AtomicUsize::new(0),
            items: Mutex::new(VecDeque::new()),
        };

        let item = recv_polling(&queue, Wait::For(Duration::from_millis(35)), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(item, None);
        assert!(queue.polls.load(Ordering::SeqCst) >= 4);
    }
}
