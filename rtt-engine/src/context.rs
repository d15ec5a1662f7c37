//! Per-peer protocol state: sequence tracking and wire encode/decode.
//!
//! One `PeerContext` exists per bare peer address. It owns the receive
//! buffer that reconstructs the peer's text and the send queue that
//! accumulates our edits for that peer.

use uuid::Uuid;

use crate::action::{numeric_attr, Action};
use crate::clock::{SharedClock, Timestamp};
use crate::error::RttError;
use crate::receive::{ReceiveBuffer, RttEvent};
use crate::send_queue::SendQueue;
use crate::stanza::{bare_address, Element, NS_RTT};
use crate::text::TextBuffer;

/// Sequence numbers wrap within 31 bits.
pub const SEQ_MASK: u32 = 0x7fff_ffff;

/// Fresh send sequences start below this, leaving room before the wrap.
const INITIAL_SEQ_MASK: u32 = 0x3fff_ffff;

/// The `event` attribute of an `<rtt>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEvent {
    New,
    Reset,
    Edit,
    Init,
    Cancel,
}

impl MessageEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageEvent::New => "new",
            MessageEvent::Reset => "reset",
            MessageEvent::Edit => "edit",
            MessageEvent::Init => "init",
            MessageEvent::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(MessageEvent::New),
            "reset" => Some(MessageEvent::Reset),
            "edit" => Some(MessageEvent::Edit),
            "init" => Some(MessageEvent::Init),
            "cancel" => Some(MessageEvent::Cancel),
            _ => None,
        }
    }
}

pub struct PeerContext {
    clock: SharedClock,
    /// Most recent full address seen for this peer.
    peer_address: String,
    /// `None` while out of sync.
    receive_sequence: Option<u32>,
    send_sequence: Option<u32>,
    last_send_reset: Option<Timestamp>,
    last_receive_active: Option<Timestamp>,
    max_backlog: i64,
    receive_buffer: ReceiveBuffer,
    send_queue: SendQueue,
}

impl PeerContext {
    pub fn new(peer_address: impl Into<String>, clock: SharedClock, max_backlog: i64) -> Self {
        Self {
            receive_buffer: ReceiveBuffer::new(clock.clone()),
            send_queue: SendQueue::new(clock.clone()),
            clock,
            peer_address: peer_address.into(),
            receive_sequence: None,
            send_sequence: None,
            last_send_reset: None,
            last_receive_active: None,
            max_backlog,
        }
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    pub fn receive_buffer(&self) -> &ReceiveBuffer {
        &self.receive_buffer
    }

    pub fn receive_buffer_mut(&mut self) -> &mut ReceiveBuffer {
        &mut self.receive_buffer
    }

    pub fn send_queue(&self) -> &SendQueue {
        &self.send_queue
    }

    pub fn send_queue_mut(&mut self) -> &mut SendQueue {
        &mut self.send_queue
    }

    pub fn receive_sequence(&self) -> Option<u32> {
        self.receive_sequence
    }

    pub fn send_sequence(&self) -> Option<u32> {
        self.send_sequence
    }

    /// When a `new` or `reset` was last sent.
    pub fn last_send_reset(&self) -> Option<Timestamp> {
        self.last_send_reset
    }

    /// When a stanza from this peer was last decoded.
    pub fn last_receive_active(&self) -> Option<Timestamp> {
        self.last_receive_active
    }

    /// Listen to the receive buffer. The listener gets the bare peer address.
    pub fn add_receive_event_listener<F>(&mut self, mut listener: F) -> &mut Self
    where
        F: FnMut(&str, RttEvent, &TextBuffer) + Send + 'static,
    {
        let peer = bare_address(&self.peer_address).to_string();
        self.receive_buffer
            .add_event_listener(move |event, text| listener(&peer, event, text));
        self
    }

    /// Fire due receive-side work.
    pub fn process_due(&mut self) -> usize {
        self.receive_buffer.process_due()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.receive_buffer.next_deadline()
    }

    /// Decode one inbound message stanza from `full_address`.
    pub fn decode_message(&mut self, full_address: &str, stanza: &Element) -> Result<(), RttError> {
        let now = self.clock.now();
        self.receive_buffer.sync_time(Some(now));
        self.last_receive_active = Some(now);

        for child in stanza.child_elements() {
            if child.is("rtt", NS_RTT) {
                let seq: Option<u32> = numeric_attr(child, "seq");
                let event = match child.attr("event") {
                    None => MessageEvent::Edit,
                    Some(raw) => match MessageEvent::parse(raw) {
                        Some(event) => event,
                        None => {
                            log::warn!("Ignoring rtt with unknown event \"{raw}\" from {full_address}");
                            continue;
                        }
                    },
                };
                match event {
                    MessageEvent::Edit => self.decode_edit(full_address, seq, child)?,
                    MessageEvent::New => {
                        self.receive_buffer.new_message(Some(now))?;
                        self.decode_restart(full_address, seq, child)?;
                    }
                    MessageEvent::Reset => {
                        self.receive_buffer.reset(Some(now))?;
                        self.decode_restart(full_address, seq, child)?;
                    }
                    MessageEvent::Init | MessageEvent::Cancel => {
                        log::debug!("Ignoring rtt event=\"{}\" from {full_address}", event.as_str());
                    }
                }
            } else if child.name == "body" {
                self.receive_sequence = None;
                self.receive_buffer.body(&child.text());
            }
        }

        self.receive_buffer.eliminate_excess_backlog(self.max_backlog);
        self.peer_address = full_address.to_string();
        Ok(())
    }

    fn decode_edit(&mut self, full_address: &str, seq: Option<u32>, rtt: &Element) -> Result<(), RttError> {
        let Some(current) = self.receive_sequence else {
            // Already out of sync; wait for the next new/reset/body.
            return Ok(());
        };
        let expected = current.wrapping_add(1) & SEQ_MASK;
        self.receive_sequence = Some(expected);
        if seq == Some(expected) && self.peer_address == full_address {
            self.decode_actions(rtt)
        } else {
            self.receive_sequence = None;
            self.receive_buffer.sync_lost()?;
            log::warn!("Lost rtt sync with {}", self.peer_address);
            Ok(())
        }
    }

    /// Shared tail of `new` and `reset`: adopt the sequence and replay the
    /// contained actions. A missing sequence reports lost sync.
    fn decode_restart(&mut self, full_address: &str, seq: Option<u32>, rtt: &Element) -> Result<(), RttError> {
        self.receive_sequence = seq.map(|s| s & SEQ_MASK);
        self.decode_actions(rtt)?;
        if self.receive_sequence.is_none() {
            log::warn!("Missing rtt seq on restart from {full_address}");
            self.receive_buffer.sync_lost()?;
        }
        Ok(())
    }

    fn decode_actions(&mut self, rtt: &Element) -> Result<(), RttError> {
        for action in rtt.child_elements().filter_map(Action::from_element) {
            self.receive_buffer.apply(&action)?;
        }
        Ok(())
    }

    /// Encode pending local edits into an outbound stanza, if anything is due.
    ///
    /// `now` is the sample time, `last_sample` the previous one and
    /// `interval` the sampling period; they place the `<w>` elements.
    /// On success the send queue is flushed.
    pub fn sample_send_buffer(
        &mut self,
        now: Timestamp,
        last_sample: Timestamp,
        interval: i64,
        reset_due: bool,
    ) -> Option<Element> {
        let mut event = reset_due.then_some(MessageEvent::Reset);
        let send = if !self.send_queue.actions().is_empty() {
            if self.send_queue.is_new_message() {
                event = Some(MessageEvent::New);
                self.send_sequence = Some(random_sequence());
            }
            true
        } else {
            // Nothing queued: only a due reset for a message that saw activity.
            reset_due
                && !self.send_queue.is_new_message()
                && self.send_queue.last_action_timestamp() >= self.last_send_reset.unwrap_or(0)
        };
        if !send {
            return None;
        }

        if matches!(event, Some(MessageEvent::New | MessageEvent::Reset)) {
            self.last_send_reset = Some(now);
        }
        let seq = self.next_send_sequence();
        let message = self.encode_rtt(event, seq, last_sample, interval);
        self.send_queue.flush();
        Some(message)
    }

    fn next_send_sequence(&mut self) -> u32 {
        let next = self.send_sequence.map_or(1, |s| s.wrapping_add(1) & SEQ_MASK);
        self.send_sequence = Some(next);
        next
    }

    fn encode_rtt(
        &self,
        event: Option<MessageEvent>,
        seq: u32,
        last_sample: Timestamp,
        interval: i64,
    ) -> Element {
        let mut rtt = Element::new("rtt").with_attr("xmlns", NS_RTT).with_attr("seq", seq);
        if let Some(event) = event {
            rtt.set_attr("event", event.as_str());
            log::info!("Generating rtt event: {}", event.as_str());
        }

        let pre_action_text = self.send_queue.pre_action_text();
        if matches!(event, Some(MessageEvent::New | MessageEvent::Reset)) && !pre_action_text.is_empty() {
            rtt.push_child(Element::new("t").with_text(pre_action_text.to_string()));
        }

        let actions = self.send_queue.actions();
        let mut last_timestamp = last_sample;
        for queued in actions {
            if queued.timestamp > last_timestamp {
                let millis = (queued.timestamp - last_timestamp) as u64;
                rtt.push_child(Action::Wait { millis }.to_element());
            }
            last_timestamp = queued.timestamp;
            rtt.push_child(queued.action.to_element());
        }

        let remaining = interval - (last_timestamp - last_sample);
        if !actions.is_empty() && remaining > 0 {
            rtt.push_child(
                Action::Wait {
                    millis: remaining as u64,
                }
                .to_element(),
            );
        }

        Element::new("message")
            .with_attr("to", bare_address(&self.peer_address))
            .with_attr("type", "chat")
            .with_child(rtt)
    }
}

fn random_sequence() -> u32 {
    (Uuid::new_v4().as_u128() as u32) & INITIAL_SEQ_MASK
}

impl std::fmt::Debug for PeerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerContext")
            .field("peer_address", &self.peer_address)
            .field("receive_sequence", &self.receive_sequence)
            .field("send_sequence", &self.send_sequence)
            .field("last_send_reset", &self.last_send_reset)
            .field("receive_buffer", &self.receive_buffer)
            .field("send_queue", &self.send_queue)
            .finish()
    }
}
