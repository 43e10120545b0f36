//! Commit bookkeeping for concurrently processed messages.
//!
//! Messages of one partition finish out of order when several are in flight.
//! Committing a later offset would implicitly acknowledge earlier ones that
//! are still running, so the tracker only releases the end of the contiguous
//! run of completed offsets.
//!
//! A message that could not reach a terminal state stalls its partition: its
//! offset is never committed, so nothing after it can be either. A stalled
//! partition refuses new offsets and forgets completed ones until the
//! process restarts and the broker redelivers from the last commit.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionState {
    in_flight: BTreeSet<i64>,
    done: BTreeSet<i64>,
    stalled: bool,
}

/// Per-partition tracker of in-flight and completed offsets.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionState>,
}

impl OffsetTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `offset` as in flight. Call in consumption order.
    ///
    /// Returns `false`, registering nothing, when the partition is stalled.
    pub fn begin(&mut self, topic: &str, partition: i32, offset: i64) -> bool {
        let state = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        if state.stalled {
            return false;
        }
        state.in_flight.insert(offset);
        true
    }

    /// Give up on `offset`: it will not be committed in this process, and
    /// neither will anything after it on the same partition.
    pub fn fail(&mut self, topic: &str, partition: i32, offset: i64) {
        let state = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        state.stalled = true;
        state.in_flight.remove(&offset);
        state.done.clear();
    }

    #[must_use]
    pub fn is_stalled(&self, topic: &str, partition: i32) -> bool {
        self.partitions
            .get(&(topic.to_string(), partition))
            .is_some_and(|s| s.stalled)
    }

    /// Mark `offset` done.
    ///
    /// Returns the offset to commit (one past the last contiguous completed
    /// message), or `None` if an earlier message is still in flight.
    pub fn complete(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if state.stalled {
            state.in_flight.remove(&offset);
            return None;
        }
        if !state.in_flight.contains(&offset) {
            return None;
        }
        state.done.insert(offset);

        let mut committable = None;
        while let Some(&lowest) = state.in_flight.iter().next() {
            if !state.done.remove(&lowest) {
                break;
            }
            state.in_flight.remove(&lowest);
            committable = Some(lowest + 1);
        }
        committable
    }

    /// Messages registered but not yet released.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.partitions.values().map(|s| s.in_flight.len()).sum()
    }
}
