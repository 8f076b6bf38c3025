//! Ordered collections of pending calls.
//!
//! [`CallQueue`] keeps calls in an ordered map and is the scheduler's default. [`HeapQueue`]
//! is a binary min-heap with lazy deletion, for workloads dominated by push/pop where
//! cancellations are rare.
use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap, HashMap},
    fmt,
};

use super::{
    call::{CallKey, PendingCall},
    PriorityQueue,
};

/// Ordered-map backed queue. All operations are `O(log n)`.
pub struct CallQueue<T> {
    calls: BTreeMap<CallKey<T>, PendingCall<T>>,
}

impl<T: Ord + Clone> CallQueue<T> {
    pub fn new() -> Self {
        Self {
            calls: BTreeMap::new(),
        }
    }
}

impl<T: Ord + Clone> Default for CallQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Clone> PriorityQueue<T> for CallQueue<T> {
    fn add(&mut self, call: PendingCall<T>) {
        self.calls.insert(call.key().clone(), call);
    }

    fn peek(&self) -> Option<&PendingCall<T>> {
        self.calls.first_key_value().map(|(_, call)| call)
    }

    fn get(&mut self) -> Option<PendingCall<T>> {
        self.calls.pop_first().map(|(_, call)| call)
    }

    fn remove(&mut self, key: &CallKey<T>) -> Option<PendingCall<T>> {
        self.calls.remove(key)
    }

    fn len(&self) -> usize {
        self.calls.len()
    }
}

impl<T: fmt::Debug> fmt::Debug for CallQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.calls.keys()).finish()
    }
}

/// Binary min-heap with lazy deletion.
///
/// `live` is the source of truth; removed calls leave stale keys behind in `heap`. Stale keys
/// are pruned from the top after every removal, so the top of `heap` is always live and
/// `peek` never needs `&mut self`.
pub struct HeapQueue<T> {
    heap: BinaryHeap<Reverse<CallKey<T>>>,
    live: HashMap<u64, PendingCall<T>>,
}

impl<T: Ord + Clone> HeapQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
        }
    }

    fn is_live(&self, key: &CallKey<T>) -> bool {
        is_live(&self.live, key)
    }

    fn prune(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
        // rebuild once stale keys dominate, so the heap stays proportional to `live`
        if self.heap.len() > 2 * self.live.len() + 16 {
            let live = &self.live;
            self.heap.retain(|Reverse(key)| is_live(live, key));
        }
    }
}

/// A heap key is live only if `live` still holds that exact call; a reused sequence with a
/// different timestamp is stale.
fn is_live<T: PartialEq>(live: &HashMap<u64, PendingCall<T>>, key: &CallKey<T>) -> bool {
    live.get(&key.sequence)
        .is_some_and(|call| call.key() == key)
}

impl<T: Ord + Clone> Default for HeapQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Clone> PriorityQueue<T> for HeapQueue<T> {
    fn add(&mut self, call: PendingCall<T>) {
        self.heap.push(Reverse(call.key().clone()));
        self.live.insert(call.sequence(), call);
        self.prune();
    }

    fn peek(&self) -> Option<&PendingCall<T>> {
        let Reverse(top) = self.heap.peek()?;
        self.live.get(&top.sequence)
    }

    fn get(&mut self) -> Option<PendingCall<T>> {
        let Reverse(top) = self.heap.pop()?;
        let call = self.live.remove(&top.sequence);
        self.prune();
        call
    }

    fn remove(&mut self, key: &CallKey<T>) -> Option<PendingCall<T>> {
        if !self.is_live(key) {
            return None;
        }
        let call = self.live.remove(&key.sequence);
        self.prune();
        call
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}

impl<T: fmt::Debug> fmt::Debug for HeapQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapQueue")
            .field("live", &self.live.len())
            .field("heap", &self.heap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(when: u64, sequence: u64) -> PendingCall<u64> {
        PendingCall::new(CallKey::new(when, sequence), || {})
    }

    fn drain_order<Q: PriorityQueue<u64>>(q: &mut Q) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        while let Some(c) = q.get() {
            out.push((*c.when(), c.sequence()));
        }
        out
    }

    fn check_ordering<Q: PriorityQueue<u64>>(mut q: Q) {
        q.add(call(20, 1));
        q.add(call(10, 0));
        q.add(call(10, 2));
        q.add(call(5, 3));

        assert_eq!(q.len(), 4);
        assert_eq!(q.peek().map(|c| c.sequence()), Some(3));
        assert_eq!(drain_order(&mut q), vec![(5, 3), (10, 0), (10, 2), (20, 1)]);
        assert!(q.is_empty());
        assert!(q.peek().is_none());
        assert!(q.get().is_none());
    }

    fn check_remove<Q: PriorityQueue<u64>>(mut q: Q) {
        q.add(call(10, 0));
        q.add(call(10, 1));
        q.add(call(30, 2));
        q.add(call(20, 3));

        // same timestamp as the minimum, different identity
        let removed = q.remove(&CallKey::new(10, 1));
        assert_eq!(removed.map(|c| c.sequence()), Some(1));
        assert_eq!(q.peek().map(|c| c.sequence()), Some(0));

        // removing the minimum exposes the next one
        assert!(q.remove(&CallKey::new(10, 0)).is_some());
        assert_eq!(q.peek().map(|c| c.sequence()), Some(3));

        // absent, and present-sequence-wrong-time, are both no-ops
        assert!(q.remove(&CallKey::new(10, 0)).is_none());
        assert!(q.remove(&CallKey::new(99, 2)).is_none());

        assert_eq!(q.len(), 2);
        assert_eq!(drain_order(&mut q), vec![(20, 3), (30, 2)]);
    }

    #[test]
    fn test_call_queue_ordering() {
        check_ordering(CallQueue::new());
    }

    #[test]
    fn test_call_queue_remove() {
        check_remove(CallQueue::new());
    }

    #[test]
    fn test_heap_queue_ordering() {
        check_ordering(HeapQueue::new());
    }

    #[test]
    fn test_heap_queue_remove() {
        check_remove(HeapQueue::new());
    }

    #[test]
    fn test_heap_queue_compacts_stale_keys() {
        let mut q = HeapQueue::new();
        for seq in 0..200 {
            q.add(call(1_000 - seq, seq));
        }
        // cancel everything except the earliest, leaving stale keys below the top
        for seq in 0..199 {
            assert!(q.remove(&CallKey::new(1_000 - seq, seq)).is_some());
        }
        assert_eq!(q.len(), 1);
        assert!(q.heap.len() <= 2 * q.live.len() + 16);
        assert_eq!(drain_order(&mut q), vec![(801, 199)]);
    }
}
