//! The RTT engine: sampling loop, inbound routing and the command surface.
//!
//! The engine owns the context registry and a [`Transport`]. Local text
//! updates go into per-peer send queues; while any peer is an active
//! sender the engine samples every queue once per sample period and sends
//! the resulting `<rtt>` stanzas. Inbound message stanzas are routed to the
//! sender's context and the reconstructed text is reported as
//! [`ReceiveUpdate`]s on the event channel.
//!
//! Everything is driven from one task. [`Engine::run`] multiplexes session
//! events, commands from [`EngineHandle`]s, the sample tick and receive
//! deadlines. The synchronous methods are public so that callers with their
//! own loop (or a manual clock) can drive the engine directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::clock::{SharedClock, Timestamp};
use crate::config::RttConfig;
use crate::error::RttError;
use crate::registry::{ContextRegistry, ReceiveUpdate};
use crate::stanza::{bare_address, Element, NS_DISCO_INFO, NS_RTT};
use crate::transport::{SessionEvent, Transport};

/// Requests accepted by a running engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// The local text typed for `peer` is now `text`.
    Update { peer: String, text: String },
    /// Send `text` as a completed message body to `peer`.
    SendBody { peer: String, text: String },
    SetSampleFrequency(u64),
    SetResetFrequency(u64),
    Shutdown,
}

/// Cloneable handle for talking to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    fn command(&self, command: EngineCommand) -> Result<(), RttError> {
        self.tx.send(command).map_err(|_| RttError::EngineClosed)
    }

    pub fn update(&self, peer: impl Into<String>, text: impl Into<String>) -> Result<(), RttError> {
        self.command(EngineCommand::Update {
            peer: peer.into(),
            text: text.into(),
        })
    }

    pub fn send_body(&self, peer: impl Into<String>, text: impl Into<String>) -> Result<(), RttError> {
        self.command(EngineCommand::SendBody {
            peer: peer.into(),
            text: text.into(),
        })
    }

    pub fn set_sample_frequency(&self, millis: u64) -> Result<(), RttError> {
        self.command(EngineCommand::SetSampleFrequency(millis))
    }

    pub fn set_reset_frequency(&self, millis: u64) -> Result<(), RttError> {
        self.command(EngineCommand::SetResetFrequency(millis))
    }

    pub fn shutdown(&self) -> Result<(), RttError> {
        self.command(EngineCommand::Shutdown)
    }
}

pub struct Engine<T: Transport> {
    transport: T,
    clock: SharedClock,
    config: RttConfig,
    registry: ContextRegistry,
    connected: bool,
    sampling: bool,
    /// Bumped whenever the sample timer restarts.
    sampler_epoch: u64,
    last_sample: Timestamp,
    /// Set by the registry when the first peer becomes an active sender.
    reactivated: Arc<AtomicBool>,
    has_registrar: bool,
    event_rx: Option<mpsc::UnboundedReceiver<ReceiveUpdate>>,
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
}

impl<T: Transport> Engine<T> {
    pub fn new(transport: T, config: RttConfig, clock: SharedClock) -> Result<Self, RttError> {
        config.validate()?;

        let mut registry = ContextRegistry::new(clock.clone(), config.max_queue_backlog_ms as i64);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ReceiveUpdate>();
        registry.set_default_receive_handler(Arc::new(move |update: ReceiveUpdate| {
            // Nobody listening is fine.
            let _ = event_tx.send(update);
        }));

        let reactivated = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&reactivated);
        registry.set_reactivation_listener(move || flag.store(true, Ordering::SeqCst));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let last_sample = clock.now();
        Ok(Self {
            transport,
            clock,
            config,
            registry,
            connected: false,
            sampling: false,
            sampler_epoch: 0,
            last_sample,
            reactivated,
            has_registrar: false,
            event_rx: Some(event_rx),
            command_tx,
            command_rx,
        })
    }

    /// Take the receive event stream. Returns `None` after the first call.
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<ReceiveUpdate>> {
        self.event_rx.take()
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.command_tx.clone(),
        }
    }

    pub fn config(&self) -> &RttConfig {
        &self.config
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ContextRegistry {
        &mut self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling
    }

    pub fn last_sample(&self) -> Timestamp {
        self.last_sample
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                log::info!("Session connected");
                self.connected = true;
                if let Some(registrar) = self.transport.discovery() {
                    registrar.add_feature(NS_RTT);
                    self.has_registrar = true;
                }
                self.reset_sample_timer();
            }
            SessionEvent::Disconnected => {
                log::info!("Session disconnected");
                self.connected = false;
                self.sampling = false;
            }
            SessionEvent::Stanza(stanza) => {
                if self.connected {
                    self.handle_stanza(&stanza);
                } else {
                    log::debug!("Dropping <{}> received while disconnected", stanza.name);
                }
            }
        }
    }

    fn handle_stanza(&mut self, stanza: &Element) {
        match stanza.name.as_str() {
            "message" => {
                let Some(from) = stanza.attr("from") else {
                    log::warn!("Ignoring message without sender");
                    return;
                };
                if stanza.attr("type") == Some("error") {
                    log::warn!("Ignoring error message from {from}");
                    return;
                }
                if let Err(e) = self.registry.route_message(from, stanza) {
                    log::error!("Failed to decode message from {from}: {e}");
                }
            }
            "iq" => self.handle_iq(stanza),
            other => log::trace!("Unhandled stanza <{other}>"),
        }
    }

    fn handle_iq(&mut self, iq: &Element) {
        let is_disco_get = iq.attr("type") == Some("get")
            && iq.child_elements().any(|c| c.is("query", NS_DISCO_INFO));
        if !is_disco_get || self.has_registrar {
            return;
        }
        let Some(from) = iq.attr("from") else {
            return;
        };

        let mut reply = Element::new("iq").with_attr("to", from).with_attr("type", "result");
        if let Some(id) = iq.attr("id") {
            reply.set_attr("id", id);
        }
        if let Some(local) = self.transport.local_address() {
            reply.set_attr("from", local);
        }
        reply.push_child(
            Element::new("query")
                .with_attr("xmlns", NS_DISCO_INFO)
                .with_child(Element::new("feature").with_attr("var", NS_RTT)),
        );
        log::debug!("Answering disco#info from {from}");
        self.transport.send(reply);
    }

    /// Restart the sampler if there is anything to sample, else stop it.
    fn reset_sample_timer(&mut self) {
        if self.connected && self.registry.active_sender_count() > 0 {
            self.sampling = true;
            self.last_sample = self.clock.now();
            self.sampler_epoch += 1;
        } else {
            self.sampling = false;
        }
    }

    fn check_reactivation(&mut self) {
        if self.reactivated.swap(false, Ordering::SeqCst) && !self.sampling {
            log::info!("Resuming sampling");
            self.reset_sample_timer();
        }
    }

    /// Record that the local text for `peer` is now `text`.
    pub fn rtt_update(&mut self, peer: &str, text: &str) {
        self.registry.get(peer).send_queue_mut().edit(text);
        self.check_reactivation();
    }

    /// Send a completed message and start a fresh one for `peer`.
    pub fn send_body(&mut self, peer: &str, text: &str) {
        let id = self.transport.unique_id();
        let mut message = Element::new("message")
            .with_attr("to", bare_address(peer))
            .with_attr("type", "chat")
            .with_attr("id", id)
            .with_child(Element::new("body").with_text(text));
        if let Some(local) = self.transport.local_address() {
            message.set_attr("from", local);
        }
        self.registry.get(peer).send_queue_mut().clear();
        self.transport.send(message);
        log::info!("Sent message body to {}", bare_address(peer));
    }

    /// Sample every active sender once. Returns the number of stanzas sent.
    pub fn sample_all(&mut self) -> usize {
        let now = self.clock.now();
        let sample = self.config.sample_frequency_ms as i64;
        let reset = self.config.reset_frequency_ms as i64;
        let mut sent = 0;

        for peer in self.registry.active_senders() {
            let context = self.registry.get(&peer);
            let reset_due = now >= context.last_send_reset().unwrap_or(0) + reset - sample / 2;
            match context.sample_send_buffer(now, self.last_sample, sample, reset_due) {
                Some(mut message) => {
                    if let Some(local) = self.transport.local_address() {
                        message.set_attr("from", local);
                    }
                    message.set_attr("id", self.transport.unique_id());
                    log::info!("Sending rtt to {peer}");
                    self.transport.send(message);
                    sent += 1;
                }
                None => {
                    if now > context.send_queue().last_action_timestamp() + reset {
                        self.registry.mark_inactive(&peer);
                        if self.registry.active_sender_count() == 0 {
                            log::info!("No active senders, suspending sampling");
                            self.sampling = false;
                        }
                    }
                }
            }
        }
        self.last_sample = now;
        sent
    }

    /// Fire due receive-side work. Returns the number of actions applied.
    pub fn process_receive_queues(&mut self) -> usize {
        self.registry.process_due()
    }

    pub fn next_receive_deadline(&self) -> Option<Timestamp> {
        self.registry.next_deadline()
    }

    pub fn set_sample_frequency(&mut self, millis: u64) -> Result<(), RttError> {
        let config = RttConfig {
            sample_frequency_ms: millis,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        if self.sampling {
            self.reset_sample_timer();
        }
        Ok(())
    }

    pub fn set_reset_frequency(&mut self, millis: u64) -> Result<(), RttError> {
        let config = RttConfig {
            reset_frequency_ms: millis,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Apply one command. Returns `false` on shutdown.
    pub fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Update { peer, text } => self.rtt_update(&peer, &text),
            EngineCommand::SendBody { peer, text } => self.send_body(&peer, &text),
            EngineCommand::SetSampleFrequency(millis) => {
                if let Err(e) = self.set_sample_frequency(millis) {
                    log::warn!("Rejected sample frequency {millis}: {e}");
                }
            }
            EngineCommand::SetResetFrequency(millis) => {
                if let Err(e) = self.set_reset_frequency(millis) {
                    log::warn!("Rejected reset frequency {millis}: {e}");
                }
            }
            EngineCommand::Shutdown => return false,
        }
        true
    }

    /// Drive the engine until the session channel closes or a shutdown
    /// command arrives. Returns the engine for inspection.
    pub async fn run(mut self, mut session_rx: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        let mut sampler: Option<(u64, Interval)> = None;

        loop {
            if !self.sampling {
                sampler = None;
            } else if sampler.as_ref().map(|(epoch, _)| *epoch) != Some(self.sampler_epoch) {
                let period = Duration::from_millis(self.config.sample_frequency_ms);
                let mut interval = time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                sampler = Some((self.sampler_epoch, interval));
            }

            let receive_wait = self.next_receive_deadline().map(|deadline| {
                let millis = (deadline - self.clock.now()).max(1);
                Duration::from_millis(millis as u64)
            });

            let sample_tick = async {
                match sampler.as_mut() {
                    Some((_, interval)) => {
                        interval.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = session_rx.recv() => {
                    match event {
                        Some(event) => self.handle_session_event(event),
                        None => {
                            log::info!("Session channel closed, engine stopping");
                            break;
                        }
                    }
                }
                Some(command) = self.command_rx.recv() => {
                    if !self.handle_command(command) {
                        log::info!("Engine shutting down");
                        break;
                    }
                }
                _ = sample_tick => {
                    self.sample_all();
                }
                _ = wait_for(receive_wait) => {}
            }

            self.process_receive_queues();
        }
        self
    }
}

async fn wait_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

impl<T: Transport> std::fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("connected", &self.connected)
            .field("sampling", &self.sampling)
            .field("last_sample", &self.last_sample)
            .field("registry", &self.registry)
            .finish()
    }
}
