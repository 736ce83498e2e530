use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// A confident embedding waiting to be persisted.
#[derive(Debug, Clone)]
pub struct PendingEmbeddingUpdate {
    pub identity: String,
    /// L2-normalized.
    pub embedding: Vec<f32>,
    pub created_at: Instant,
    /// Negated recognition score: lower runs first.
    pub priority: f32,
}

impl PendingEmbeddingUpdate {
    pub fn new(identity: &str, embedding: Vec<f32>, score: f32) -> Self {
        Self {
            identity: identity.to_string(),
            embedding,
            created_at: Instant::now(),
            priority: -score,
        }
    }
}

struct Queued {
    update: PendingEmbeddingUpdate,
    sequence: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap pops the greatest: lowest priority value, then oldest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .update
            .priority
            .total_cmp(&self.update.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug)]
pub enum PushError {
    Full(PendingEmbeddingUpdate),
    Closed(PendingEmbeddingUpdate),
}

#[derive(Debug)]
pub enum PopResult {
    Item(PendingEmbeddingUpdate),
    Timeout,
    /// The queue was closed and nothing is left in it.
    Closed,
}

struct QueueState {
    heap: BinaryHeap<Queued>,
    next_sequence: u64,
    closed: bool,
}

/// Bounded priority queue of embedding updates. Producers never block;
/// closing it lets the consumer drain what is left and then stop.
pub struct UpdateQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::with_capacity(capacity),
                next_sequence: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, update: PendingEmbeddingUpdate) -> Result<(), PushError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PushError::Closed(update));
        }
        if state.heap.len() >= self.capacity {
            return Err(PushError::Full(update));
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.heap.push(Queued { update, sequence });
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    pub fn pop_timeout(&self, timeout: Duration) -> PopResult {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(queued) = state.heap.pop() {
                return PopResult::Item(queued.update);
            }
            if state.closed {
                return PopResult::Closed;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return match state.heap.pop() {
                    Some(queued) => PopResult::Item(queued.update),
                    None if state.closed => PopResult::Closed,
                    None => PopResult::Timeout,
                };
            }
        }
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(identity: &str, score: f32) -> PendingEmbeddingUpdate {
        PendingEmbeddingUpdate::new(identity, vec![1.0], score)
    }

    fn pop_identity(queue: &UpdateQueue) -> String {
        match queue.pop_timeout(Duration::from_millis(10)) {
            PopResult::Item(update) => update.identity,
            other => panic!("expected an item, got {:?}", other),
        }
    }

    #[test]
    fn test_highest_confidence_first_then_oldest() {
        let queue = UpdateQueue::new(10);
        queue.push(update("low", 0.81)).unwrap();
        queue.push(update("high-a", 0.95)).unwrap();
        queue.push(update("mid", 0.9)).unwrap();
        queue.push(update("high-b", 0.95)).unwrap();

        assert_eq!(pop_identity(&queue), "high-a");
        assert_eq!(pop_identity(&queue), "high-b");
        assert_eq!(pop_identity(&queue), "mid");
        assert_eq!(pop_identity(&queue), "low");
        assert!(matches!(queue.pop_timeout(Duration::from_millis(5)), PopResult::Timeout));
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let queue = UpdateQueue::new(2);
        queue.push(update("a", 0.9)).unwrap();
        queue.push(update("b", 0.9)).unwrap();
        assert!(matches!(queue.push(update("c", 0.99)), Err(PushError::Full(_))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_close_drains_then_reports_closed() {
        let queue = UpdateQueue::new(4);
        queue.push(update("a", 0.9)).unwrap();
        queue.close();

        assert!(matches!(queue.push(update("b", 0.9)), Err(PushError::Closed(_))));
        assert_eq!(pop_identity(&queue), "a");
        assert!(matches!(queue.pop_timeout(Duration::from_secs(5)), PopResult::Closed));
    }

    #[test]
    fn test_close_wakes_a_waiting_consumer() {
        let queue = std::sync::Arc::new(UpdateQueue::new(4));
        let consumer = {
            let queue = std::sync::Arc::clone(&queue);
            std::thread::spawn(move || queue.pop_timeout(Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(matches!(consumer.join().unwrap(), PopResult::Closed));
    }
}
