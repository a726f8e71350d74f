use serde::{Deserialize, Serialize};

/// Binary segment tree holding one non-negative mass per slot.
///
/// Leaves live at `nodes[size..size + capacity]`, internal node `i` holds
/// the sum of `2i` and `2i + 1`. Sums are kept in f64 so repeated updates
/// do not drift.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct SumTree {
    capacity: usize,
    size: usize,
    nodes: Vec<f64>,
}

impl SumTree {
    pub(crate) fn new(capacity: usize) -> Self {
        let size = capacity.next_power_of_two();
        SumTree {
            capacity,
            size,
            nodes: vec![0.0; 2 * size],
        }
    }

    pub(crate) fn set(&mut self, slot: usize, mass: f64) {
        debug_assert!(slot < self.capacity);
        let mut node = slot + self.size;
        self.nodes[node] = mass;
        while node > 1 {
            node /= 2;
            self.nodes[node] = self.nodes[2 * node] + self.nodes[2 * node + 1];
        }
    }

    pub(crate) fn get(&self, slot: usize) -> f64 {
        self.nodes[slot + self.size]
    }

    pub(crate) fn total(&self) -> f64 {
        self.nodes[1]
    }

    /// Slot whose cumulative mass interval contains `mass`.
    ///
    /// `mass` is clamped into `[0, total)`; zero-mass slots are never returned
    /// while any slot has positive mass.
    pub(crate) fn find(&self, mass: f64) -> usize {
        let mut mass = mass.max(0.0);
        let mut node = 1;
        while node < self.size {
            let left = 2 * node;
            if mass < self.nodes[left] || self.nodes[left + 1] <= 0.0 {
                node = left;
            } else {
                mass -= self.nodes[left];
                node = left + 1;
            }
        }
        (node - self.size).min(self.capacity - 1)
    }
}

/// Segment tree answering "which occupied slot has the smallest
/// `(priority, insertion id)`", used for lowest-priority eviction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct MinTree {
    size: usize,
    nodes: Vec<(f32, u64, usize)>,
}

const EMPTY: (f32, u64, usize) = (f32::INFINITY, u64::MAX, usize::MAX);

fn smaller(a: (f32, u64, usize), b: (f32, u64, usize)) -> (f32, u64, usize) {
    if a.0 < b.0 || (a.0 == b.0 && a.1 <= b.1) {
        a
    } else {
        b
    }
}

impl MinTree {
    pub(crate) fn new(capacity: usize) -> Self {
        let size = capacity.next_power_of_two();
        MinTree {
            size,
            nodes: vec![EMPTY; 2 * size],
        }
    }

    pub(crate) fn set(&mut self, slot: usize, priority: f32, id: u64) {
        self.write(slot, (priority, id, slot));
    }

    pub(crate) fn unset(&mut self, slot: usize) {
        self.write(slot, EMPTY);
    }

    fn write(&mut self, slot: usize, value: (f32, u64, usize)) {
        let mut node = slot + self.size;
        self.nodes[node] = value;
        while node > 1 {
            node /= 2;
            self.nodes[node] = smaller(self.nodes[2 * node], self.nodes[2 * node + 1]);
        }
    }

    /// Slot of the minimum, `None` when empty
    pub(crate) fn argmin(&self) -> Option<usize> {
        let (_, _, slot) = self.nodes[1];
        if slot == usize::MAX {
            None
        } else {
            Some(slot)
        }
    }
}
