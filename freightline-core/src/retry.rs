//! The retry queue (part of C9): holds items that failed a retryable stage until their retry
//! delay elapses, then hands them back to the coordinator for resubmission.
//!
//! Grounded on `vsi::scan::artifacts`'s channel-based stage wiring, generalized from "one
//! channel, no retries" to "one bounded channel per stage plus a side queue swept on a timer".

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use crate::events::Stage;
use crate::model::FileRef;
use crate::package::Package;

/// What a retry entry resubmits, and to which stage.
pub enum RetryTarget {
    /// Resubmit a file to the file-stability, archive-stability, or hash stage.
    File(FileRef),
    /// Resubmit a package to the transport stage.
    Package(Package),
}

/// One item waiting out a retry delay.
pub struct RetryEntry {
    /// The item to resubmit once ready.
    pub target: RetryTarget,
    /// Which stage to resubmit it to.
    pub stage: Stage,
    /// How many attempts have already been made (including the one that just failed).
    pub attempt: usize,
    /// Earliest time this entry may be resubmitted.
    pub not_before: Instant,
}

/// A FIFO of items waiting out retry backoff, swept periodically by the coordinator's retry
/// loop rather than on every stage-worker failure, so a burst of failures doesn't thrash the
/// stage channels.
#[derive(Default)]
pub struct RetryQueue {
    entries: Mutex<VecDeque<RetryEntry>>,
}

impl RetryQueue {
    /// Construct an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an item to retry once `entry.not_before` has passed.
    pub fn push(&self, entry: RetryEntry) {
        self.entries.lock().expect("retry queue lock poisoned").push_back(entry);
    }

    /// Remove and return every entry whose delay has elapsed, in FIFO order. Entries still
    /// waiting are left in place.
    pub fn drain_ready(&self) -> Vec<RetryEntry> {
        let now = Instant::now();
        let mut queue = self.entries.lock().expect("retry queue lock poisoned");
        let mut ready = Vec::new();
        let mut still_waiting = VecDeque::with_capacity(queue.len());
        while let Some(entry) = queue.pop_front() {
            if entry.not_before <= now {
                ready.push(entry);
            } else {
                still_waiting.push_back(entry);
            }
        }
        *queue = still_waiting;
        ready
    }

    /// Number of items currently waiting (ready or not).
    pub fn len(&self) -> usize {
        self.entries.lock().expect("retry queue lock poisoned").len()
    }

    /// Whether the queue holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn file_entry(stage: Stage, delay: Duration) -> RetryEntry {
        RetryEntry {
            target: RetryTarget::File(FileRef::filesystem(PathBuf::from("a.txt"), 1, None, None)),
            stage,
            attempt: 1,
            not_before: Instant::now() + delay,
        }
    }

    #[test]
    fn drain_ready_only_returns_elapsed_entries() {
        let queue = RetryQueue::new();
        queue.push(file_entry(Stage::Hash, Duration::from_secs(0)));
        queue.push(file_entry(Stage::Hash, Duration::from_secs(60)));

        let ready = queue.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(queue.len(), 1);
    }
}
