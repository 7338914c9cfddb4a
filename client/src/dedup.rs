use events::Id;
use std::collections::{HashSet, VecDeque};

/// Bounded memory of recently seen event ids. The oldest id is forgotten once
/// the window is full.
#[derive(Debug)]
pub struct RecentEvents {
    capacity: usize,
    order: VecDeque<Id>,
    seen: HashSet<Id>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Returns true the first time an id is seen within the window.
    pub fn insert(&mut self, id: Id) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
