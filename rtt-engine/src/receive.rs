//! Receive-side reconstruction of a peer's in-progress text.
//!
//! Decoded actions are scheduled at the buffer's logical time cursor and
//! applied when the scheduler fires them, replaying the sender's typing
//! rhythm. Listeners see a small lifecycle stream:
//!
//! ```text
//! StartRtt → NewMessage → Edit* → (Reset → Edit*)* → Body
//!
//! StopRtt may follow at any point while active.
//! LostSync may be inserted once sequence tracking fails.
//! ```
//!
//! A burst of actions that become due in the same tick produces a single
//! `Edit`, so `NewMessage` followed by its text never shows an empty buffer
//! in between.

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::clock::{SharedClock, Timestamp};
use crate::error::RttError;
use crate::scheduler::Scheduler;
use crate::text::TextBuffer;

/// Lifecycle events of a [`ReceiveBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RttEvent {
    StartRtt,
    StopRtt,
    NewMessage,
    Edit,
    Reset,
    Body,
    LostSync,
}

/// Listener invoked with each event and the text at that moment.
pub type ReceiveListener = Box<dyn FnMut(RttEvent, &TextBuffer) + Send>;

/// Work item held by the scheduler.
#[derive(Debug, Clone, PartialEq)]
enum ReceiveAction {
    Insert {
        pos: Option<usize>,
        text: Vec<char>,
    },
    Erase {
        pos: Option<usize>,
        count: Option<usize>,
    },
    SyncLost,
}

pub struct ReceiveBuffer {
    clock: SharedClock,
    scheduler: Scheduler<ReceiveAction>,
    text: TextBuffer,
    /// Logical time cursor is `time_base + time_offset`.
    time_base: Timestamp,
    time_offset: i64,
    listeners: Vec<ReceiveListener>,
    /// Edits were applied inside a burst but `Edit` has not been emitted yet.
    pending_edit: bool,
}

impl ReceiveBuffer {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            scheduler: Scheduler::new(clock.clone()),
            clock,
            text: TextBuffer::new(),
            time_base: 0,
            time_offset: 0,
            listeners: Vec::new(),
            pending_edit: false,
        }
    }

    pub fn add_event_listener<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut(RttEvent, &TextBuffer) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
        self
    }

    /// True between `StartRtt` and `StopRtt`.
    pub fn is_active(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn text(&self) -> &TextBuffer {
        &self.text
    }

    /// Begin a new message, anchored at `base` (or now).
    pub fn new_message(&mut self, base: Option<Timestamp>) -> Result<&mut Self, RttError> {
        self.restart(RttEvent::NewMessage, base)
    }

    /// Resynchronize the current message, anchored at `base` (or now).
    pub fn reset(&mut self, base: Option<Timestamp>) -> Result<&mut Self, RttError> {
        self.restart(RttEvent::Reset, base)
    }

    pub fn stop_rtt(&mut self) -> &mut Self {
        if self.scheduler.is_running() {
            self.pending_edit = false;
            self.scheduler.stop().clear(None);
            self.text.clear();
            self.emit(RttEvent::StopRtt);
        }
        self
    }

    pub fn insert(&mut self, pos: Option<usize>, text: &str) -> Result<&mut Self, RttError> {
        let text = text.chars().collect();
        self.schedule(ReceiveAction::Insert { pos, text })
    }

    /// Erase `count` code points ending at `pos` (wire semantics).
    pub fn erase(&mut self, pos: Option<usize>, count: Option<usize>) -> Result<&mut Self, RttError> {
        self.schedule(ReceiveAction::Erase { pos, count })
    }

    pub fn wait(&mut self, millis: u64) -> &mut Self {
        let millis = i64::try_from(millis).unwrap_or(i64::MAX);
        self.time_offset = self.time_offset.saturating_add(millis);
        self
    }

    /// Replace everything with a complete message body. Pending work is dropped.
    pub fn body(&mut self, message: &str) -> &mut Self {
        self.pending_edit = false;
        self.time_base = 0;
        self.time_offset = 0;
        self.scheduler.clear(None);
        self.text.clear().insert_str(0, message);
        self.emit(RttEvent::Body);
        self
    }

    /// Schedule a `LostSync` behind everything already queued.
    pub fn sync_lost(&mut self) -> Result<&mut Self, RttError> {
        self.schedule(ReceiveAction::SyncLost)
    }

    /// Re-anchor the time cursor at `base` (or now), never moving it backward.
    pub fn sync_time(&mut self, base: Option<Timestamp>) -> &mut Self {
        let base = base.unwrap_or_else(|| self.clock.now());
        self.time_base = base.max(self.time_base.saturating_add(self.time_offset));
        self.time_offset = 0;
        self
    }

    pub fn eliminate_excess_backlog(&mut self, max_backlog: i64) -> &mut Self {
        self.scheduler.reduce_backlog(max_backlog);
        self
    }

    /// Schedule one decoded wire action.
    pub fn apply(&mut self, action: &Action) -> Result<(), RttError> {
        match action {
            Action::Insert { pos, text } => self.insert(*pos, text)?,
            Action::Erase { pos, count } => self.erase(*pos, *count)?,
            Action::Wait { millis } => self.wait(*millis),
        };
        Ok(())
    }

    /// Fire all scheduled work that is due. Returns the number of actions fired.
    pub fn process_due(&mut self) -> usize {
        let Self {
            scheduler,
            text,
            listeners,
            pending_edit,
            ..
        } = self;
        scheduler.fire_due(|_, action, has_more| match action {
            ReceiveAction::Insert { pos, text: chars } => {
                let pos = pos.unwrap_or(text.len());
                text.insert(pos, &chars);
                settle_edit(listeners, text, pending_edit, has_more);
            }
            ReceiveAction::Erase { pos, count } => {
                let pos = pos.unwrap_or(text.len());
                let count = count.unwrap_or(1);
                text.remove(pos.saturating_sub(count), count);
                settle_edit(listeners, text, pending_edit, has_more);
            }
            ReceiveAction::SyncLost => {
                if *pending_edit {
                    emit_to(listeners, RttEvent::Edit, text);
                    *pending_edit = false;
                }
                emit_to(listeners, RttEvent::LostSync, text);
            }
        })
    }

    /// When scheduled work next becomes due.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.scheduler.next_deadline()
    }

    /// Current lead time of scheduled work.
    pub fn backlog(&self) -> i64 {
        self.scheduler.backlog()
    }

    fn restart(&mut self, event: RttEvent, base: Option<Timestamp>) -> Result<&mut Self, RttError> {
        self.sync_time(base);
        // Pass the caller's base: the clock may tick between sync and clear.
        self.scheduler.clear(base);
        if !self.scheduler.is_running() {
            self.pending_edit = false;
            self.emit(RttEvent::StartRtt);
            self.scheduler.start();
        }
        self.emit(event);
        // Clear through a scheduled edit so it merges with the text that follows.
        let len = self.text.len();
        if len > 0 {
            self.erase(Some(len), Some(len))?;
        }
        Ok(self)
    }

    fn schedule(&mut self, action: ReceiveAction) -> Result<&mut Self, RttError> {
        let target = self.time_base.saturating_add(self.time_offset);
        self.scheduler.enqueue(target, action)?;
        Ok(self)
    }

    fn emit(&mut self, event: RttEvent) {
        emit_to(&mut self.listeners, event, &self.text);
    }
}

fn emit_to(listeners: &mut [ReceiveListener], event: RttEvent, text: &TextBuffer) {
    for listener in listeners.iter_mut() {
        listener(event, text);
    }
}

fn settle_edit(
    listeners: &mut [ReceiveListener],
    text: &TextBuffer,
    pending_edit: &mut bool,
    has_more: bool,
) {
    if has_more {
        *pending_edit = true;
    } else {
        emit_to(listeners, RttEvent::Edit, text);
        *pending_edit = false;
    }
}

impl std::fmt::Debug for ReceiveBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveBuffer")
            .field("text", &self.text.to_string())
            .field("active", &self.is_active())
            .field("time_base", &self.time_base)
            .field("time_offset", &self.time_offset)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::{Arc, Mutex};

    const T0: Timestamp = 1_700_000_000_000;

    type Log = Arc<Mutex<Vec<(RttEvent, String)>>>;

    fn buffer() -> (Arc<ManualClock>, ReceiveBuffer, Log) {
        let clock = ManualClock::new(T0);
        let mut buf = ReceiveBuffer::new(clock.clone());
        let log: Log = Arc::default();
        let sink = log.clone();
        buf.add_event_listener(move |event, text| {
            sink.lock().unwrap().push((event, text.to_string()));
        });
        (clock, buf, log)
    }

    fn take(log: &Log) -> Vec<(RttEvent, String)> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    fn ev(event: RttEvent, text: &str) -> (RttEvent, String) {
        (event, text.to_string())
    }

    #[test]
    fn test_lifecycle_events() {
        let (clock, mut buf, log) = buffer();
        assert!(!buf.is_active());

        buf.new_message(None).unwrap();
        assert!(buf.is_active());
        buf.reset(None).unwrap();
        buf.body("hello world!");
        buf.new_message(None).unwrap();
        assert_eq!(
            take(&log),
            vec![
                ev(RttEvent::StartRtt, ""),
                ev(RttEvent::NewMessage, ""),
                ev(RttEvent::Reset, ""),
                ev(RttEvent::Body, "hello world!"),
                ev(RttEvent::NewMessage, "hello world!"),
            ]
        );

        // The clear after NewMessage is itself a scheduled edit.
        clock.advance(10);
        buf.process_due();
        assert_eq!(take(&log), vec![ev(RttEvent::Edit, "")]);

        buf.stop_rtt();
        assert!(!buf.is_active());
        buf.stop_rtt();
        buf.new_message(None).unwrap();
        assert_eq!(
            take(&log),
            vec![
                ev(RttEvent::StopRtt, ""),
                ev(RttEvent::StartRtt, ""),
                ev(RttEvent::NewMessage, ""),
            ]
        );
    }

    #[test]
    fn test_edits_replay_with_original_timing() {
        let (clock, mut buf, log) = buffer();
        buf.new_message(None).unwrap();
        buf.insert(Some(0), "hx").unwrap();
        buf.wait(50);
        buf.insert(Some(2), "w").unwrap();
        buf.wait(30);
        buf.erase(Some(2), Some(1)).unwrap();
        buf.insert(Some(1), "o").unwrap();
        buf.wait(30);
        buf.insert(Some(3), " at").unwrap();
        buf.erase(Some(6), Some(1)).unwrap();
        buf.wait(50);
        buf.insert(Some(6), "re thi").unwrap();
        take(&log);

        let mut seen = Vec::new();
        for t in [0, 49, 50, 80, 110, 125] {
            clock.set(T0 + t);
            buf.process_due();
            seen.extend(take(&log).into_iter().map(|(e, s)| (t, e, s)));
        }
        assert_eq!(
            seen,
            vec![
                (0, RttEvent::Edit, "hx".to_string()),
                (50, RttEvent::Edit, "hxw".to_string()),
                (80, RttEvent::Edit, "how".to_string()),
                (110, RttEvent::Edit, "how a".to_string()),
            ]
        );

        // The reset drops "re thi" but starts after its target time.
        buf.reset(None).unwrap();
        buf.insert(Some(0), "how are things?").unwrap();
        assert_eq!(take(&log), vec![ev(RttEvent::Reset, "how a")]);
        clock.set(T0 + 159);
        assert_eq!(buf.process_due(), 0);
        clock.set(T0 + 160);
        assert_eq!(buf.process_due(), 2);
        assert_eq!(take(&log), vec![ev(RttEvent::Edit, "how are things?")]);
    }

    #[test]
    fn test_defaults_resolve_when_fired() {
        let (clock, mut buf, log) = buffer();
        buf.new_message(None).unwrap();
        buf.insert(None, "he").unwrap();
        buf.wait(50);
        buf.insert(None, "").unwrap();
        buf.wait(30);
        buf.insert(None, "l").unwrap();
        buf.wait(30);
        buf.erase(None, Some(2)).unwrap();
        buf.wait(30);
        buf.insert(None, "ow at").unwrap();
        buf.erase(None, None).unwrap();
        take(&log);

        let mut texts = Vec::new();
        for t in [0, 50, 80, 110, 140] {
            clock.set(T0 + t);
            buf.process_due();
            texts.extend(take(&log).into_iter().map(|(e, s)| {
                assert_eq!(e, RttEvent::Edit);
                s
            }));
        }
        assert_eq!(texts, vec!["he", "he", "hel", "h", "how a"]);
    }

    #[test]
    fn test_burst_coalesces_into_one_edit() {
        let (_, mut buf, log) = buffer();
        buf.new_message(None).unwrap();
        buf.insert(None, "abc").unwrap();
        buf.erase(None, None).unwrap();
        buf.insert(Some(0), "x").unwrap();
        assert_eq!(buf.process_due(), 3);
        assert_eq!(
            take(&log),
            vec![
                ev(RttEvent::StartRtt, ""),
                ev(RttEvent::NewMessage, ""),
                ev(RttEvent::Edit, "xab"),
            ]
        );
    }

    #[test]
    fn test_new_message_clears_through_scheduled_erase() {
        let (clock, mut buf, log) = buffer();
        buf.body("old text");
        buf.new_message(None).unwrap();
        buf.insert(None, "new").unwrap();
        assert_eq!(buf.text().to_string(), "old text");
        clock.advance(1);
        buf.process_due();
        assert_eq!(
            take(&log),
            vec![
                ev(RttEvent::Body, "old text"),
                ev(RttEvent::StartRtt, "old text"),
                ev(RttEvent::NewMessage, "old text"),
                ev(RttEvent::Edit, "new"),
            ]
        );
    }

    fn clear_scenario(interrupt: impl FnOnce(&mut ReceiveBuffer)) -> Vec<(RttEvent, String)> {
        let (clock, mut buf, log) = buffer();
        buf.new_message(None).unwrap();
        buf.insert(None, "hello").unwrap();
        buf.wait(100);
        buf.insert(None, " world").unwrap();
        buf.process_due();
        clock.set(T0 + 50);
        interrupt(&mut buf);
        clock.set(T0 + 130);
        buf.process_due();
        take(&log)
    }

    #[test]
    fn test_reset_drops_pending_work() {
        let events = clear_scenario(|buf| {
            buf.reset(None).unwrap();
        });
        assert_eq!(
            &events[2..],
            &[
                ev(RttEvent::Edit, "hello"),
                ev(RttEvent::Reset, "hello"),
                ev(RttEvent::Edit, ""),
            ]
        );
    }

    #[test]
    fn test_body_drops_pending_work() {
        let events = clear_scenario(|buf| {
            buf.body("hello 𝒥𝒶𝓋𝒶𝓈𝒸𝓇𝒾𝓅𝓉");
        });
        assert_eq!(
            &events[2..],
            &[
                ev(RttEvent::Edit, "hello"),
                ev(RttEvent::Body, "hello 𝒥𝒶𝓋𝒶𝓈𝒸𝓇𝒾𝓅𝓉"),
            ]
        );
    }

    #[test]
    fn test_stop_drops_pending_work() {
        let events = clear_scenario(|buf| {
            buf.stop_rtt();
        });
        assert_eq!(
            &events[2..],
            &[ev(RttEvent::Edit, "hello"), ev(RttEvent::StopRtt, "")]
        );
    }

    #[test]
    fn test_sync_lost_follows_queued_edits() {
        let (clock, mut buf, log) = buffer();
        buf.new_message(None).unwrap();
        buf.insert(Some(0), "hx").unwrap();
        buf.wait(50);
        buf.insert(Some(2), "w").unwrap();
        buf.sync_lost().unwrap();
        buf.process_due();
        clock.set(T0 + 50);
        buf.process_due();
        assert_eq!(
            &take(&log)[2..],
            &[
                ev(RttEvent::Edit, "hx"),
                ev(RttEvent::Edit, "hxw"),
                ev(RttEvent::LostSync, "hxw"),
            ]
        );
        assert!(buf.is_active());
    }

    #[test]
    fn test_sync_time_never_moves_backward() {
        let (clock, mut buf, _) = buffer();
        buf.new_message(None).unwrap();
        buf.wait(500);
        buf.sync_time(Some(T0 + 100));
        buf.insert(None, "a").unwrap();
        // Cursor stayed at T0 + 500.
        buf.process_due();
        assert_eq!(buf.next_deadline(), Some(T0 + 500));
        clock.set(T0 + 500);
        buf.process_due();
        assert_eq!(buf.text().to_string(), "a");
    }

    #[test]
    fn test_ordering_violation_surfaces() {
        let (_, mut buf, _) = buffer();
        buf.new_message(None).unwrap();
        buf.body("x");
        // After a body the cursor is unanchored until the next sync.
        assert!(matches!(
            buf.insert(None, "y"),
            Err(RttError::TimeOrderingViolation { .. })
        ));
    }

    #[test]
    fn test_eliminate_excess_backlog() {
        let (clock, mut buf, _) = buffer();
        buf.new_message(None).unwrap();
        buf.insert(None, "a").unwrap();
        buf.wait(3_000);
        buf.insert(None, "b").unwrap();
        assert_eq!(buf.backlog(), 3_000);
        buf.eliminate_excess_backlog(1_000);
        assert_eq!(buf.backlog(), 1_000);
        clock.set(T0 + 1_000);
        buf.process_due();
        assert_eq!(buf.text().to_string(), "ab");
    }

    #[test]
    fn test_apply_actions() {
        let (clock, mut buf, _) = buffer();
        buf.new_message(None).unwrap();
        for action in [
            Action::Insert { pos: None, text: "𝒥ul".into() },
            Action::Wait { millis: 20 },
            Action::Erase { pos: Some(2), count: None },
            Action::Insert { pos: Some(1), text: "U".into() },
        ] {
            buf.apply(&action).unwrap();
        }
        clock.set(T0 + 20);
        buf.process_due();
        assert_eq!(buf.text().to_string(), "𝒥Ul");
    }
}
