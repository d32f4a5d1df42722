//! Binary min-heap keyed by an external integer id, with O(1) `contains`
//! and O(log n) push / update / pop-min. Used by the simplifier to always
//! contract the lowest-cost edge first.

use ahash::AHashMap;

/// Priorities are single precision; ties are broken by insertion order so
/// iteration order among equal-cost edges is deterministic.
#[derive(Debug, Clone, Copy)]
struct Node {
    id: usize,
    priority: f32,
    seq: u64,
}

fn order(a: &Node, b: &Node) -> std::cmp::Ordering {
    a.priority
        .partial_cmp(&b.priority)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.seq.cmp(&b.seq))
}

/// A 1-indexed binary heap (slot 0 is unused) paired with an id -> slot
/// map so `Contains`/`Update` don't need a linear scan. The heap does not
/// own the priorities: callers recompute them externally and call
/// [`IndexedMinHeap::update`] to signal a change.
#[derive(Debug, Default)]
pub struct IndexedMinHeap {
    heap: Vec<Node>,
    slot: AHashMap<usize, usize>,
    next_seq: u64,
}

impl IndexedMinHeap {
    pub fn new() -> Self {
        Self {
            heap: vec![Node {
                id: 0,
                priority: 0.0,
                seq: 0,
            }],
            slot: AHashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: usize) -> bool {
        self.slot.contains_key(&id)
    }

    /// Push a new id with the given priority. Pushing an id already present
    /// is a programmer error, not recoverable user-data corruption, and
    /// panics.
    pub fn push(&mut self, id: usize, priority: f32) {
        assert!(
            !self.slot.contains_key(&id),
            "IndexedMinHeap: duplicate push for id {id}"
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        let at = self.heap.len();
        self.heap.push(Node { id, priority, seq });
        self.slot.insert(id, at);
        self.sift_up(at);
    }

    /// Change the priority of an id already in the heap, restoring heap
    /// order. No-op target for ids not present (the caller is expected to
    /// `push` instead).
    pub fn update(&mut self, id: usize, priority: f32) {
        let Some(&at) = self.slot.get(&id) else {
            return;
        };
        let old_priority = self.heap[at].priority;
        self.heap[at].priority = priority;
        if priority < old_priority {
            self.sift_up(at);
        } else {
            self.sift_down(at);
        }
    }

    /// Push if absent, otherwise update.
    pub fn push_or_update(&mut self, id: usize, priority: f32) {
        if self.contains(id) {
            self.update(id, priority);
        } else {
            self.push(id, priority);
        }
    }

    pub fn peek(&self) -> Option<(usize, f32)> {
        self.heap.get(1).map(|n| (n.id, n.priority))
    }

    pub fn pop_min(&mut self) -> Option<(usize, f32)> {
        if self.is_empty() {
            return None;
        }
        let min = self.heap[1];
        let last = self.heap.pop().unwrap();
        self.slot.remove(&min.id);
        if !self.heap.is_empty() && self.heap.len() > 1 {
            self.heap[1] = last;
            self.slot.insert(last.id, 1);
            self.sift_down(1);
        } else if self.heap.len() == 1 {
            // only the sentinel remains, nothing left to re-seat
        }
        Some((min.id, min.priority))
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 1 {
            let parent = i / 2;
            if order(&self.heap[i], &self.heap[parent]) == std::cmp::Ordering::Less {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.heap.len() - 1;
        loop {
            let l = 2 * i;
            let r = 2 * i + 1;
            let mut smallest = i;
            if l <= n && order(&self.heap[l], &self.heap[smallest]) == std::cmp::Ordering::Less {
                smallest = l;
            }
            if r <= n && order(&self.heap[r], &self.heap[smallest]) == std::cmp::Ordering::Less {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.slot.insert(self.heap[i].id, i);
        self.slot.insert(self.heap[j].id, j);
    }
}
