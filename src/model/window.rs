use std::collections::VecDeque;

use super::tick::Tick;

pub const DEFAULT_WINDOW_CAPACITY: usize = 1000;

/// Bounded FIFO of ticks in arrival order. Pushing past capacity evicts the oldest tick.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    ticks: VecDeque<Tick>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be > 0");
        Self {
            capacity,
            ticks: VecDeque::with_capacity(capacity),
        }
    }

    /// Replace the contents with a snapshot, keeping only the newest `capacity` ticks.
    pub fn replace(&mut self, snapshot: Vec<Tick>) {
        self.ticks.clear();
        let skip = snapshot.len().saturating_sub(self.capacity);
        self.ticks.extend(snapshot.into_iter().skip(skip));
    }

    /// Append one tick, returning the evicted tick if the window was full.
    pub fn push(&mut self, tick: Tick) -> Option<Tick> {
        self.ticks.push_back(tick);
        if self.ticks.len() > self.capacity {
            self.ticks.pop_front()
        } else {
            None
        }
    }

    /// Change capacity, evicting from the front if the window now overflows.
    pub fn set_capacity(&mut self, capacity: usize) {
        assert!(capacity > 0, "window capacity must be > 0");
        self.capacity = capacity;
        while self.ticks.len() > self.capacity {
            self.ticks.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tick> {
        self.ticks.iter()
    }

    /// Oldest-first copy of the window for read-only consumers.
    pub fn to_vec(&self) -> Vec<Tick> {
        self.ticks.iter().copied().collect()
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}
