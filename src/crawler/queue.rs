//! Comparator-driven priority queue
//!
//! A binary heap whose order comes from a caller-supplied comparator instead of `Ord`. Items that
//! compare equal leave the queue in insertion order.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Orders two items; `Ordering::Less` means the left item is dequeued first
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Items carrying an integer priority, higher runs first
pub trait Prioritized {
    fn priority(&self) -> i64;
}

#[derive(Clone)]
struct Entry<T> {
    seq: u64,
    item: T,
}

/// Min-heap over a comparator with FIFO tie-breaking
pub struct PriorityQueue<T> {
    heap: Vec<Entry<T>>,
    next_seq: u64,
    compare: Comparator<T>,
}

impl<T> PriorityQueue<T> {
    /// Creates a queue ordered by `compare`
    ///
    /// # Examples
    ///
    /// ```
    /// use sumi_weave::crawler::PriorityQueue;
    ///
    /// let mut queue = PriorityQueue::with_comparator(|a: &u32, b: &u32| a.cmp(b));
    /// queue.enqueue(3);
    /// queue.enqueue(1);
    /// queue.enqueue(2);
    /// assert_eq!(queue.dequeue(), Some(1));
    /// ```
    pub fn with_comparator<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self {
            heap: Vec::new(),
            next_seq: 0,
            compare: Arc::new(compare),
        }
    }

    pub fn enqueue(&mut self, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { seq, item });
        self.sift_up(self.heap.len() - 1);
    }

    pub fn dequeue(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let entry = self.heap.pop()?;
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(entry.item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.first().map(|e| &e.item)
    }

    pub fn size(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Returns every item in dequeue order without touching the queue
    pub fn values(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut copy = Self {
            heap: self.heap.clone(),
            next_seq: self.next_seq,
            compare: Arc::clone(&self.compare),
        };
        std::iter::from_fn(|| copy.dequeue()).collect()
    }

    /// True when the entry at `a` must leave the queue before the entry at `b`
    fn precedes(&self, a: usize, b: usize) -> bool {
        let (left, right) = (&self.heap[a], &self.heap[b]);
        match (self.compare)(&left.item, &right.item) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => left.seq < right.seq,
        }
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.precedes(idx, parent) {
                break;
            }
            self.heap.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut first = idx;

            if left < len && self.precedes(left, first) {
                first = left;
            }
            if right < len && self.precedes(right, first) {
                first = right;
            }
            if first == idx {
                break;
            }
            self.heap.swap(idx, first);
            idx = first;
        }
    }
}

impl<T: Prioritized> PriorityQueue<T> {
    /// Creates a queue that hands out the highest priority first
    pub fn by_priority() -> Self {
        Self::with_comparator(|a: &T, b: &T| b.priority().cmp(&a.priority()))
    }
}

impl<T: Prioritized> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::by_priority()
    }
}

impl<T> fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("size", &self.heap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Job {
        name: &'static str,
        priority: i64,
    }

    impl Prioritized for Job {
        fn priority(&self) -> i64 {
            self.priority
        }
    }

    fn job(name: &'static str, priority: i64) -> Job {
        Job { name, priority }
    }

    fn drain(queue: &mut PriorityQueue<Job>) -> Vec<&'static str> {
        std::iter::from_fn(|| queue.dequeue()).map(|j| j.name).collect()
    }

    #[test]
    fn test_higher_priority_first() {
        let mut queue = PriorityQueue::by_priority();
        for (name, p) in [("low", 1), ("high", 10), ("mid", 5), ("neg", -3)] {
            queue.enqueue(job(name, p));
        }
        assert_eq!(drain(&mut queue), vec!["high", "mid", "low", "neg"]);
    }

    #[test]
    fn test_ties_are_fifo() {
        let mut queue = PriorityQueue::by_priority();
        for name in ["a", "b", "c", "d", "e", "f", "g"] {
            queue.enqueue(job(name, 0));
        }
        queue.enqueue(job("urgent", 1));
        assert_eq!(
            drain(&mut queue),
            vec!["urgent", "a", "b", "c", "d", "e", "f", "g"]
        );
    }

    #[test]
    fn test_dequeue_order_is_non_increasing() {
        let mut queue = PriorityQueue::by_priority();
        for (i, p) in [3, 9, 1, 4, 4, 7, 0, 2, 9, 5].into_iter().enumerate() {
            let name: &'static str = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"][i];
            queue.enqueue(job(name, p));
        }
        let mut last = i64::MAX;
        while let Some(j) = queue.dequeue() {
            assert!(j.priority <= last);
            last = j.priority;
        }
    }

    #[test]
    fn test_values_does_not_mutate() {
        let mut queue = PriorityQueue::by_priority();
        queue.enqueue(job("a", 1));
        queue.enqueue(job("b", 2));

        let snapshot: Vec<_> = queue.values().into_iter().map(|j| j.name).collect();
        assert_eq!(snapshot, vec!["b", "a"]);
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.peek().map(|j| j.name), Some("b"));
    }

    #[test]
    fn test_empty_queue() {
        let mut queue: PriorityQueue<Job> = PriorityQueue::default();
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
        assert!(queue.peek().is_none());
    }

    #[test]
    fn test_clear() {
        let mut queue = PriorityQueue::by_priority();
        queue.enqueue(job("a", 1));
        queue.clear();
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_custom_comparator() {
        let mut queue = PriorityQueue::with_comparator(|a: &&str, b: &&str| a.len().cmp(&b.len()));
        for word in ["three", "a", "to", "xy"] {
            queue.enqueue(word);
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(order, vec!["a", "to", "xy", "three"]);
    }
}
