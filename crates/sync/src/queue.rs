use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded FIFO with drop-oldest overflow semantics.
///
/// Producers on the network side and a single consumer on the simulation side
/// may touch the queue concurrently without any caller-side locking. When the
/// queue is full, `enqueue` evicts the oldest buffered items until the new one
/// fits; it never blocks the producer.
#[derive(Debug)]
pub struct RingQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> RingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring queue capacity must be at least 1");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        // a poisoned queue still holds valid items; keep going
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, item: T) {
        let mut queue = self.lock();
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(item);
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<T: Clone> RingQueue<T> {
    /// Random access into the buffered window without removal; index 0 is the
    /// oldest buffered item.
    pub fn peek_at(&self, index: usize) -> Option<T> {
        self.lock().get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drop_oldest_on_overflow() {
        let queue = RingQueue::new(3);
        for i in 1..=5 {
            queue.enqueue(i);
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue(), Some(3));
        assert_eq!(queue.try_dequeue(), Some(4));
        assert_eq!(queue.try_dequeue(), Some(5));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn peek_does_not_remove() {
        let queue = RingQueue::new(4);
        queue.enqueue("a");
        queue.enqueue("b");

        assert_eq!(queue.peek_at(0), Some("a"));
        assert_eq!(queue.peek_at(1), Some("b"));
        assert_eq!(queue.peek_at(2), None);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn concurrent_producers_stay_bounded() {
        let queue = Arc::new(RingQueue::new(16));

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(worker * 100 + i);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 16);
    }

    #[test]
    fn empty_queue_dequeues_none() {
        let queue: RingQueue<u32> = RingQueue::new(2);
        assert!(queue.is_empty());
        assert_eq!(queue.try_dequeue(), None);
    }
}
