//! # rtt-engine: Real-time text for XMPP chat
//!
//! Implements the XEP-0301 in-band real-time text protocol: text is
//! transmitted while it is being typed, as a timed stream of insert, erase
//! and wait actions, and replayed on the receiving side with the original
//! typing rhythm.
//!
//! ## Architecture
//!
//! ```text
//!   rtt_update(peer, text)                       ReceiveUpdate events
//!            │                                           ▲
//!            ▼                                           │
//! ┌─────────────────────┐   sample tick   ┌──────────────┴──────┐
//! │ SendQueue (per peer)│ ──────────────► │ Engine              │
//! │ diff → actions      │                 │ (one tokio task)    │
//! └─────────────────────┘                 └───┬─────────────▲───┘
//!                                   <rtt> out │             │ <message> in
//!                                             ▼             │
//!                                       ┌───────────────────┴─┐
//!                                       │ Transport           │
//!                                       └─────────────────────┘
//!
//! inbound <rtt> ─► PeerContext (seq check) ─► ReceiveBuffer ─► Scheduler
//!                                              (timed replay of actions)
//! ```
//!
//! ## Modules
//!
//! - [`text`]: code-point text buffer and UTF-16 conversion
//! - [`diff`]: minimal erase/insert between two texts
//! - [`scheduler`]: wall-clock ordered action queue
//! - [`receive`]: receive buffer that replays remote edits
//! - [`send_queue`]: local edits between samples
//! - [`context`]: per-peer sequence tracking and wire codec
//! - [`registry`]: contexts by bare address, active senders
//! - [`engine`]: sampling loop and session handling
//! - [`transport`]: seam to the XMPP session

pub mod action;
pub mod clock;
pub mod config;
pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod receive;
pub mod registry;
pub mod scheduler;
pub mod send_queue;
pub mod stanza;
pub mod text;
pub mod transport;

// Re-exports for convenience
pub use action::{Action, QueuedAction};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, Timestamp};
pub use config::RttConfig;
pub use context::{MessageEvent, PeerContext, SEQ_MASK};
pub use diff::{string_diff, EraseSpan, InsertSpan, TextDiff};
pub use engine::{Engine, EngineCommand, EngineHandle};
pub use error::{RttError, UnicodeError};
pub use receive::{ReceiveBuffer, RttEvent};
pub use registry::{ContextRegistry, ReceiveHandler, ReceiveUpdate};
pub use scheduler::{ScheduledAction, Scheduler};
pub use send_queue::SendQueue;
pub use stanza::{bare_address, Element, Node, NS_DISCO_INFO, NS_RTT};
pub use text::TextBuffer;
pub use transport::{spawn_relay, ChannelTransport, FeatureRegistry, FeatureSet, SessionEvent, Transport};
