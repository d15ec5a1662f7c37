//! Peer contexts keyed by bare address, plus the active-sender set.
//!
//! A peer becomes an active sender as soon as its send queue records an
//! action, and stays one until the engine marks it inactive after a quiet
//! period. The reactivation listener fires when the set goes from empty to
//! non-empty, which is how the engine knows to resume sampling.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, Timestamp};
use crate::context::PeerContext;
use crate::error::RttError;
use crate::receive::RttEvent;
use crate::stanza::{bare_address, Element};

/// A receive-side event as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveUpdate {
    /// Bare address of the peer.
    pub peer: String,
    pub event: RttEvent,
    /// Full reconstructed text after the event.
    pub text: String,
}

pub type ReceiveHandler = Arc<dyn Fn(ReceiveUpdate) + Send + Sync>;

type ReactivationListener = Box<dyn FnMut() + Send>;

#[derive(Default)]
struct ActiveSenders {
    peers: HashSet<String>,
    on_reactivation: Option<ReactivationListener>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ContextRegistry {
    clock: SharedClock,
    max_backlog: i64,
    contexts: HashMap<String, PeerContext>,
    active: Arc<Mutex<ActiveSenders>>,
    receive_handler: Arc<Mutex<Option<ReceiveHandler>>>,
}

impl ContextRegistry {
    pub fn new(clock: SharedClock, max_backlog: i64) -> Self {
        Self {
            clock,
            max_backlog,
            contexts: HashMap::new(),
            active: Arc::default(),
            receive_handler: Arc::default(),
        }
    }

    /// Handler for receive events of every context, existing and future.
    pub fn set_default_receive_handler(&mut self, handler: ReceiveHandler) {
        *lock(&self.receive_handler) = Some(handler);
    }

    /// Called when the first peer becomes an active sender.
    pub fn set_reactivation_listener<F>(&mut self, listener: F)
    where
        F: FnMut() + Send + 'static,
    {
        lock(&self.active).on_reactivation = Some(Box::new(listener));
    }

    /// Context for `address` (full or bare), created on first use.
    pub fn get(&mut self, address: &str) -> &mut PeerContext {
        match self.contexts.entry(bare_address(address).to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(new_context(
                address,
                &self.clock,
                self.max_backlog,
                &self.active,
                &self.receive_handler,
            )),
        }
    }

    pub fn context(&self, address: &str) -> Option<&PeerContext> {
        self.contexts.get(bare_address(address))
    }

    /// Decode an inbound message from `full_address` into its context.
    pub fn route_message(&mut self, full_address: &str, stanza: &Element) -> Result<(), RttError> {
        self.get(full_address).decode_message(full_address, stanza)
    }

    pub fn mark_inactive(&mut self, address: &str) {
        if lock(&self.active).peers.remove(bare_address(address)) {
            log::info!("Marking context inactive: {}", bare_address(address));
        }
    }

    /// Bare addresses of all known peers, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut list: Vec<String> = self.contexts.keys().cloned().collect();
        list.sort();
        list
    }

    /// Bare addresses of active senders, sorted.
    pub fn active_senders(&self) -> Vec<String> {
        let mut list: Vec<String> = lock(&self.active).peers.iter().cloned().collect();
        list.sort();
        list
    }

    pub fn active_sender_count(&self) -> usize {
        lock(&self.active).peers.len()
    }

    pub fn contexts_mut(&mut self) -> impl Iterator<Item = (&String, &mut PeerContext)> {
        self.contexts.iter_mut()
    }

    /// Earliest pending receive deadline across all contexts.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.contexts.values().filter_map(PeerContext::next_deadline).min()
    }

    /// Fire due receive work in every context.
    pub fn process_due(&mut self) -> usize {
        self.contexts.values_mut().map(PeerContext::process_due).sum()
    }
}

fn new_context(
    address: &str,
    clock: &SharedClock,
    max_backlog: i64,
    active: &Arc<Mutex<ActiveSenders>>,
    receive_handler: &Arc<Mutex<Option<ReceiveHandler>>>,
) -> PeerContext {
    let mut context = PeerContext::new(address, Arc::clone(clock), max_backlog);

    let handler = Arc::clone(receive_handler);
    context.add_receive_event_listener(move |peer, event, text| {
        let handler = lock(&handler).clone();
        if let Some(handler) = handler {
            handler(ReceiveUpdate {
                peer: peer.to_string(),
                event,
                text: text.to_string(),
            });
        }
    });

    let active = Arc::clone(active);
    let bare = bare_address(address).to_string();
    context.send_queue_mut().add_activity_listener(move || {
        let mut guard = lock(&active);
        let ActiveSenders {
            peers,
            on_reactivation,
        } = &mut *guard;
        let reactivation = peers.is_empty();
        peers.insert(bare.clone());
        if reactivation {
            if let Some(listener) = on_reactivation.as_mut() {
                listener();
            }
        }
    });
    context
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("addresses", &self.addresses())
            .field("active_senders", &self.active_senders())
            .finish()
    }
}
