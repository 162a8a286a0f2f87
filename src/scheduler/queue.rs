// src/scheduler/queue.rs

//! Pending queue of due sites, most overdue first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::Duration;

use crate::models::Site;

struct Pending {
    lateness: Duration,
    /// Registry position; earlier sites win ties
    order: usize,
    site: Site,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lateness
            .cmp(&other.lateness)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Max-heap of sites keyed by how late they are.
#[derive(Default)]
pub struct PendingQueue {
    heap: BinaryHeap<Pending>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, site: Site, lateness: Duration, order: usize) {
        self.heap.push(Pending {
            lateness,
            order,
            site,
        });
    }

    pub fn pop(&mut self) -> Option<Site> {
        self.heap.pop().map(|p| p.site)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain in priority order.
    pub fn into_sorted(self) -> Vec<Site> {
        let mut pending = self.heap.into_sorted_vec();
        pending.reverse();
        pending.into_iter().map(|p| p.site).collect()
    }
}
