use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::Rate;

/// The grants of one bucket under one [`Rate`], oldest first.
///
/// A window never holds more than `limit` grants: anything older than the
/// last `limit` grants cannot decide whether another request fits.
#[derive(Debug, Clone)]
pub(crate) struct Window {
    grants: VecDeque<Instant>,
    rate: Rate,
}

impl Window {
    pub(crate) fn new(rate: Rate) -> Self {
        Self {
            grants: VecDeque::with_capacity(capacity(rate)),
            rate,
        }
    }

    /// Time until `cost` more grants fit into the interval ending at `now`,
    /// zero if they fit right away
    pub(crate) fn wait(&mut self, cost: u32, now: Instant) -> Duration {
        self.expire(now);
        let needed = self.grants.len() + to_usize(cost);
        let excess = needed.saturating_sub(capacity(self.rate));

        // The `excess` oldest grants have to leave the interval first
        match excess.checked_sub(1).and_then(|i| self.grants.get(i)) {
            Some(&grant) => self
                .rate
                .interval()
                .saturating_sub(now.duration_since(grant)),
            None => Duration::ZERO,
        }
    }

    /// Record `cost` grants at `now`
    pub(crate) fn push(&mut self, cost: u32, now: Instant) {
        for _ in 0..cost {
            if self.grants.len() >= capacity(self.rate) {
                self.grants.pop_front();
            }
            self.grants.push_back(now);
        }
    }

    /// Use up all remaining capacity at `now`, returning how many grants
    /// were added
    pub(crate) fn fill(&mut self, now: Instant) -> usize {
        self.expire(now);
        let added = capacity(self.rate) - self.grants.len();
        for _ in 0..added {
            self.grants.push_back(now);
        }
        added
    }

    /// Whether no grant lies within the interval ending at `now`
    pub(crate) fn is_idle(&mut self, now: Instant) -> bool {
        self.expire(now);
        self.grants.is_empty()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.grants.front() {
            if now.duration_since(oldest) < self.rate.interval() {
                break;
            }
            self.grants.pop_front();
        }
    }
}

fn capacity(rate: Rate) -> usize {
    to_usize(rate.limit().get())
}

fn to_usize(n: u32) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}
