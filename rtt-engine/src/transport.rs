//! Transport seam between the engine and an XMPP session.
//!
//! The engine hands finished stanza trees to a [`Transport`] and receives
//! session events in return. [`ChannelTransport`] is an in-process
//! implementation backed by tokio channels, used for loopback setups and
//! tests.

use std::collections::BTreeSet;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::stanza::Element;

/// Something that advertises supported features through service discovery.
pub trait FeatureRegistry {
    fn add_feature(&mut self, feature: &str);
}

/// Outbound side of an XMPP session.
pub trait Transport: Send {
    /// Queue a stanza for delivery.
    fn send(&mut self, stanza: Element);

    /// A fresh stanza id.
    fn unique_id(&mut self) -> String;

    /// Our own full address, once the session is bound.
    fn local_address(&self) -> Option<String>;

    /// The session's discovery registrar, if it has one. Without it the
    /// engine answers disco#info queries itself.
    fn discovery(&mut self) -> Option<&mut dyn FeatureRegistry> {
        None
    }
}

/// Events from the session into the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Stanza(Element),
}

/// Set of advertised feature namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    features: BTreeSet<String>,
}

impl FeatureSet {
    pub fn contains(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(String::as_str)
    }
}

impl FeatureRegistry for FeatureSet {
    fn add_feature(&mut self, feature: &str) {
        self.features.insert(feature.to_string());
    }
}

/// Transport that pushes outbound stanzas into an unbounded channel.
///
/// Outbound stanzas get a `from` attribute with the local address if
/// they carry none.
#[derive(Debug)]
pub struct ChannelTransport {
    local_address: String,
    tx: mpsc::UnboundedSender<Element>,
    features: Option<FeatureSet>,
}

impl ChannelTransport {
    pub fn new(local_address: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Element>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            local_address: local_address.into(),
            tx,
            features: None,
        };
        (transport, rx)
    }

    /// Give this transport its own discovery registrar.
    pub fn with_discovery(mut self) -> Self {
        self.features = Some(FeatureSet::default());
        self
    }

    /// Features registered so far, when discovery is enabled.
    pub fn features(&self) -> Option<&FeatureSet> {
        self.features.as_ref()
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, mut stanza: Element) {
        if stanza.attr("from").is_none() {
            stanza.set_attr("from", &self.local_address);
        }
        if self.tx.send(stanza).is_err() {
            log::warn!("Outbound channel closed, dropping stanza");
        }
    }

    fn unique_id(&mut self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn local_address(&self) -> Option<String> {
        Some(self.local_address.clone())
    }

    fn discovery(&mut self) -> Option<&mut dyn FeatureRegistry> {
        self.features.as_mut().map(|f| f as &mut dyn FeatureRegistry)
    }
}

/// Forward every stanza from `outbound` into `inbound` as a session event.
///
/// Connects one engine's output to another engine's input. The task ends
/// when either side closes.
pub fn spawn_relay(
    mut outbound: mpsc::UnboundedReceiver<Element>,
    inbound: mpsc::UnboundedSender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(stanza) = outbound.recv().await {
            if inbound.send(SessionEvent::Stanza(stanza)).is_err() {
                break;
            }
        }
        log::debug!("Relay finished");
    })
}
