//! Queue-facing input and output stages
//!
//! Stream ends are signalled with sentinels:
//! - a single producer ends the stream with `NoMoreEvents`; each consumer
//!   puts it back for its siblings before stopping;
//! - one of several producers (`many_to_one`) registers with
//!   `RegisterPusher` and signs off with `PusherDone`; the consumer stops
//!   once it has heard `PusherDone` from every expected producer.

use anyhow::bail;
use conveyor_queue::{recv_polling, Payload, Wait, WorkQueue};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::event::Event;

pub type EventQueue = Box<dyn WorkQueue<Payload<Event>>>;

/// Restores event-number order from out-of-order arrivals
#[derive(Debug, Default)]
pub struct Reorder {
    next: u64,
    pending: BTreeMap<u64, Event>,
}

impl Reorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an event; returns false for a number already released
    pub fn push(&mut self, event: Event) -> bool {
        if event.number < self.next || self.pending.contains_key(&event.number) {
            return false;
        }
        self.pending.insert(event.number, event);
        true
    }

    /// Next event in order, if it has arrived
    pub fn pop_ready(&mut self) -> Option<Event> {
        let event = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(event)
    }

    /// Next buffered event, skipping over numbers that never arrived
    pub fn pop_any(&mut self) -> Option<Event> {
        let (number, event) = self.pending.pop_first()?;
        if number != self.next {
            warn!(expected = self.next, got = number, "events missing from ordered stream");
        }
        self.next = number + 1;
        Some(event)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Consumes a processing or output queue
pub struct Puller {
    queue: EventQueue,
    wait: Wait,
    poll_interval: Duration,
    /// Producers to hear `PusherDone` from; zero means a single producer
    /// that ends the stream with `NoMoreEvents`
    producers: usize,
    registered: usize,
    done: usize,
    reorder: Option<Reorder>,
    finished: bool,
}

impl Puller {
    pub fn new(
        queue: EventQueue,
        timeout_after_sec: Option<f64>,
        ordered: bool,
        producers: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            wait: Wait::from_secs_f64(timeout_after_sec),
            poll_interval,
            producers,
            registered: 0,
            done: 0,
            reorder: ordered.then(Reorder::new),
            finished: false,
        }
    }

    /// Next event, `None` once the stream has ended
    pub async fn next(&mut self) -> anyhow::Result<Option<Event>> {
        loop {
            if let Some(event) = self.reorder.as_mut().and_then(Reorder::pop_ready) {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(self.reorder.as_mut().and_then(Reorder::pop_any));
            }

            let Some(payload) = recv_polling(self.queue.as_ref(), self.wait, self.poll_interval).await? else {
                bail!("no event arrived within {:?}", self.wait.as_duration());
            };

            match payload {
                Payload::Item(event) => match &mut self.reorder {
                    None => return Ok(Some(event)),
                    Some(reorder) => {
                        let number = event.number;
                        if !reorder.push(event) {
                            debug!(number, "dropping duplicate event");
                        }
                    }
                },
                Payload::NoMoreEvents if self.producers == 0 => {
                    self.queue.put(Payload::NoMoreEvents).await?;
                    self.finished = true;
                }
                Payload::RegisterPusher => {
                    self.registered += 1;
                    debug!(registered = self.registered, "producer registered");
                }
                Payload::PusherDone => {
                    self.done += 1;
                    debug!(done = self.done, expected = self.producers, "producer finished");
                    if self.producers > 0 && self.done >= self.producers {
                        self.finished = true;
                    }
                }
                Payload::NoMoreEvents => {
                    debug!("ignoring end-of-stream from a single producer on a many-producer queue");
                }
            }
        }
    }
}

/// Feeds a processing or output queue
pub struct Pusher {
    queue: EventQueue,
    preserve_ids: bool,
    many_to_one: bool,
    next_number: u64,
}

impl Pusher {
    pub fn new(queue: EventQueue, preserve_ids: bool, many_to_one: bool) -> Self {
        Self {
            queue,
            preserve_ids,
            many_to_one,
            next_number: 0,
        }
    }

    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.many_to_one {
            self.queue.put(Payload::RegisterPusher).await?;
        }
        Ok(())
    }

    pub async fn push(&mut self, mut event: Event) -> anyhow::Result<()> {
        if !self.preserve_ids {
            event.number = self.next_number;
        }
        self.next_number += 1;
        self.queue.put(Payload::Item(event)).await?;
        Ok(())
    }

    pub async fn finish(&mut self) -> anyhow::Result<()> {
        let end = if self.many_to_one {
            Payload::PusherDone
        } else {
            Payload::NoMoreEvents
        };
        self.queue.put(end).await?;
        Ok(())
    }

    pub fn pushed(&self) -> u64 {
        self.next_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_queue::LocalQueue;
    use serde_json::json;
    use std::sync::Arc;

    fn event(number: u64) -> Event {
        Event::new(number, json!(number))
    }

    fn shared() -> Arc<LocalQueue<Payload<Event>>> {
        Arc::new(LocalQueue::new("q"))
    }

    async fn drain(puller: &mut Puller) -> Vec<u64> {
        let mut numbers = Vec::new();
        while let Some(event) = puller.next().await.unwrap() {
            numbers.push(event.number);
        }
        numbers
    }

    #[test]
    fn test_reorder_releases_in_sequence() {
        let mut reorder = Reorder::new();
        assert!(reorder.push(event(1)));
        assert!(reorder.pop_ready().is_none());
        assert!(reorder.push(event(0)));
        assert_eq!(reorder.pop_ready().unwrap().number, 0);
        assert_eq!(reorder.pop_ready().unwrap().number, 1);
        assert!(!reorder.push(event(1)));
        assert!(reorder.is_empty());
    }

    #[test]
    fn test_reorder_skips_gaps_on_flush() {
        let mut reorder = Reorder::new();
        reorder.push(event(4));
        reorder.push(event(2));
        assert_eq!(reorder.pop_any().unwrap().number, 2);
        assert_eq!(reorder.pop_any().unwrap().number, 4);
        assert!(reorder.pop_any().is_none());
    }

    #[tokio::test]
    async fn test_single_producer_stream_is_shared_by_consumers() {
        let queue = shared();
        let mut input = Pusher::new(Box::new(queue.clone()), false, false);
        input.start().await.unwrap();
        for n in [10, 20, 30] {
            input.push(event(n)).await.unwrap();
        }
        input.finish().await.unwrap();
        assert_eq!(input.pushed(), 3);

        let mut first = Puller::new(Box::new(queue.clone()), None, false, 0, Duration::from_millis(5));
        assert_eq!(drain(&mut first).await, vec![0, 1, 2]);

        // The end marker was put back for the next consumer
        let mut second = Puller::new(Box::new(queue.clone()), None, false, 0, Duration::from_millis(5));
        assert_eq!(drain(&mut second).await, Vec::<u64>::new());
        assert_eq!(queue.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ordered_pull_waits_for_every_producer() {
        let queue = shared();
        let mut a = Pusher::new(Box::new(queue.clone()), true, true);
        let mut b = Pusher::new(Box::new(queue.clone()), true, true);
        a.start().await.unwrap();
        b.start().await.unwrap();

        b.push(event(1)).await.unwrap();
        a.push(event(2)).await.unwrap();
        b.finish().await.unwrap();
        a.push(event(0)).await.unwrap();
        a.push(event(0)).await.unwrap();
        a.finish().await.unwrap();

        let mut output = Puller::new(Box::new(queue), None, true, 2, Duration::from_millis(5));
        assert_eq!(drain(&mut output).await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let mut puller = Puller::new(Box::new(shared()), Some(0.05), false, 0, Duration::from_millis(5));
        let err = puller.next().await.unwrap_err();
        assert!(err.to_string().contains("no event arrived"));
    }
}
