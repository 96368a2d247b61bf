//! Publisher fan-out: one independent bounded queue per subscriber sink.
//!
//! A slow WebSocket client must never stall the archive sink, or the
//! Operator's control loop — each subscriber gets its own queue and its own
//! backpressure policy. `ScanStart`/`ScanStop` are never dropped (a sink
//! that misses scan boundaries can't make sense of anything after); `Result`
//! is the high-frequency, droppable stream and falls back to drop-oldest
//! once a subscriber can't keep up.

use crate::messages::Message;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// A single subscriber's inbound queue. Cheap to clone (`Arc`); sinks hold
/// their own handle and poll it independently of every other subscriber.
pub struct SubscriberQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl SubscriberQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    /// Enqueue one message, applying the drop-oldest policy to `Result`
    /// once `capacity` is exceeded. `ScanStart`/`ScanStop`/`ResultStop` are
    /// always admitted.
    pub fn push(&self, msg: Message) {
        let droppable = matches!(msg, Message::Result(_));
        let mut queue = self.inner.lock().expect("subscriber queue poisoned");
        if droppable && queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(msg);
        drop(queue);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<Message> {
        self.inner.lock().expect("subscriber queue poisoned").pop_front()
    }

    /// Wait for and return the next queued message, in FIFO order.
    pub async fn recv(&self) -> Message {
        loop {
            let notified = self.notify.notified();
            if let Some(msg) = self.try_pop() {
                return msg;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("subscriber queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns the set of subscriber queues and forwards every message from the
/// Operator's outbound channel to all of them.
pub struct PublisherFanout {
    subscribers: Vec<Arc<SubscriberQueue>>,
}

impl Default for PublisherFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl PublisherFanout {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber with its own bounded queue, returning the
    /// handle a sink task polls for messages.
    pub fn subscribe(&mut self, capacity: usize) -> Arc<SubscriberQueue> {
        let queue = Arc::new(SubscriberQueue::new(capacity));
        self.subscribers.push(queue.clone());
        queue
    }

    /// Drain `upstream` until the Operator's sender side closes, copying
    /// every message into every subscriber's queue.
    pub async fn run(self, mut upstream: mpsc::Receiver<Message>) {
        while let Some(msg) = upstream.recv().await {
            for subscriber in &self.subscribers {
                subscriber.push(msg.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{PeakTable, ResultMsg, ShotStats, SpectralTransform};

    fn result_msg(frame_number: u64) -> Message {
        Message::Result(ResultMsg {
            scan_name: "run-001".to_string(),
            frame_number,
            stack_rows: vec![],
            peaks: PeakTable::default(),
            spectral: SpectralTransform {
                vfft: vec![],
                ifft: vec![],
            },
            shots: ShotStats {
                n_shots: 0,
                shot_recent: vec![],
                mean: vec![],
                std: vec![],
            },
        })
    }

    #[test]
    fn drops_oldest_result_once_capacity_exceeded() {
        let queue = SubscriberQueue::new(2);
        queue.push(result_msg(1));
        queue.push(result_msg(2));
        queue.push(result_msg(3));
        assert_eq!(queue.len(), 2);
        let first = queue.try_pop().unwrap();
        match first {
            Message::Result(r) => assert_eq!(r.frame_number, 2),
            _ => panic!("expected Result"),
        }
    }

    #[test]
    fn scan_boundaries_are_never_dropped() {
        let queue = SubscriberQueue::new(1);
        queue.push(Message::ScanStart(crate::protocol::ScanGeometry {
            scan_name: "a".to_string(),
            data_type: crate::protocol::DataType::U16,
            f_reset: 1,
            height: 1,
            width: 1,
            notes: None,
        }));
        queue.push(Message::ScanStop(None));
        queue.push(Message::ScanStop(None));
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn recv_returns_messages_in_fifo_order() {
        let queue = SubscriberQueue::new(8);
        queue.push(result_msg(1));
        queue.push(result_msg(2));
        let first = queue.recv().await;
        match first {
            Message::Result(r) => assert_eq!(r.frame_number, 1),
            _ => panic!("expected Result"),
        }
    }

    #[tokio::test]
    async fn fanout_delivers_to_every_subscriber_independently() {
        let mut fanout = PublisherFanout::new();
        let sub_a = fanout.subscribe(8);
        let sub_b = fanout.subscribe(8);
        let (tx, rx) = mpsc::channel(8);
        tx.send(result_msg(1)).await.unwrap();
        drop(tx);
        fanout.run(rx).await;

        assert_eq!(sub_a.len(), 1);
        assert_eq!(sub_b.len(), 1);
    }
}
