//! Wall-clock ordered event queue.
//!
//! Entries fire at absolute wall-clock times rather than after relative
//! delays, which is what lets received `<w>` intervals be replayed with their
//! original spacing even when stanzas arrive late or in bursts.
//!
//! ```text
//!   time_base ──┬── offset 0 ── offset 40 ── offset 90 ──► target offsets
//!               │
//!   reduce_backlog() moves time_base backward, pulling every
//!   pending target closer to "now" without reordering anything.
//! ```
//!
//! The scheduler is generic over its payload. Instead of storing closures it
//! stores tagged payloads and hands each one to a caller-supplied closure in
//! [`Scheduler::fire_due`]; this keeps the owner free to mutate its own state
//! while the queue drains.

use std::collections::VecDeque;

use crate::clock::{SharedClock, Timestamp};
use crate::error::RttError;

/// One queued entry. The target is stored relative to the scheduler's time
/// base so that backlog reduction can move every entry at once.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAction<T> {
    target_offset: i64,
    pub payload: T,
}

/// Queue of payloads firing at non-decreasing wall-clock times.
pub struct Scheduler<T> {
    clock: SharedClock,
    /// Origin that all target offsets are relative to.
    time_base: Timestamp,
    /// Offset of the most recent insertion; enqueues may not precede it.
    last_insertion_offset: i64,
    queue: VecDeque<ScheduledAction<T>>,
    running: bool,
}

impl<T> Scheduler<T> {
    pub fn new(clock: SharedClock) -> Self {
        let time_base = clock.now();
        Self {
            clock,
            time_base,
            last_insertion_offset: 0,
            queue: VecDeque::new(),
            running: false,
        }
    }

    pub fn start(&mut self) -> &mut Self {
        self.running = true;
        self
    }

    /// Stop firing. Queued entries are kept and fire after a restart.
    pub fn stop(&mut self) -> &mut Self {
        self.running = false;
        self
    }

    /// Drop every queued entry and move the insertion watermark to `pivot`
    /// (or to now). Does not change the running state.
    pub fn clear(&mut self, pivot: Option<Timestamp>) -> &mut Self {
        self.queue.clear();
        let pivot = pivot.unwrap_or_else(|| self.clock.now());
        self.last_insertion_offset = pivot.saturating_sub(self.time_base);
        self
    }

    /// Queue `payload` to fire at `target_time`.
    ///
    /// Fails with [`RttError::TimeOrderingViolation`] if `target_time` is
    /// earlier than the latest target time enqueued so far.
    pub fn enqueue(&mut self, target_time: Timestamp, payload: T) -> Result<&mut Self, RttError> {
        let watermark = self.time_base.saturating_add(self.last_insertion_offset);
        if target_time < watermark {
            return Err(RttError::TimeOrderingViolation {
                target: target_time,
                watermark,
            });
        }
        let target_offset = target_time.saturating_sub(self.time_base);
        self.queue.push_back(ScheduledAction {
            target_offset,
            payload,
        });
        self.last_insertion_offset = target_offset;
        Ok(self)
    }

    /// Remove the earliest entry without firing it.
    pub fn dequeue(&mut self) -> Option<T> {
        self.queue.pop_front().map(|entry| entry.payload)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Earliest entry and its absolute target time.
    pub fn top(&self) -> Option<(Timestamp, &T)> {
        self.queue
            .front()
            .map(|entry| (self.target_time(entry), &entry.payload))
    }

    /// Lead time of the last queued entry in milliseconds: how far in the
    /// future the queue's work currently extends. Zero when empty, negative
    /// when everything is overdue.
    pub fn backlog(&self) -> i64 {
        match self.queue.back() {
            Some(last) => self.target_time(last).saturating_sub(self.clock.now()),
            None => 0,
        }
    }

    /// Bound the backlog to `max_backlog` milliseconds by shifting the time
    /// base backward. Entries that become overdue fire on the next tick.
    pub fn reduce_backlog(&mut self, max_backlog: i64) -> &mut Self {
        let backlog = self.backlog();
        if !self.queue.is_empty() && backlog > max_backlog {
            self.time_base = self.time_base.saturating_sub(backlog.saturating_sub(max_backlog));
        }
        self
    }

    /// When the next entry becomes due, if the scheduler is running.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        if !self.running {
            return None;
        }
        self.top().map(|(target, _)| target)
    }

    /// Fire every entry whose target time has elapsed, in order.
    ///
    /// `fire` receives the absolute target time, the payload, and `has_more`,
    /// which is true when the entry queued behind it is due as well. Returns
    /// the number of entries fired. Nothing fires while stopped.
    pub fn fire_due<F>(&mut self, mut fire: F) -> usize
    where
        F: FnMut(Timestamp, T, bool),
    {
        if !self.running {
            return 0;
        }
        let now = self.clock.now();
        let mut fired = 0;
        while let Some(front) = self.queue.front() {
            if self.target_time(front) > now {
                break;
            }
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            let has_more = self
                .queue
                .front()
                .is_some_and(|next| self.target_time(next) <= now);
            fire(self.target_time(&entry), entry.payload, has_more);
            fired += 1;
        }
        fired
    }

    /// Targets far in the future saturate rather than wrap.
    fn target_time(&self, entry: &ScheduledAction<T>) -> Timestamp {
        self.time_base.saturating_add(entry.target_offset)
    }
}

impl<T> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("time_base", &self.time_base)
            .field("last_insertion_offset", &self.last_insertion_offset)
            .field("len", &self.queue.len())
            .field("running", &self.running)
            .finish()
    }
}
