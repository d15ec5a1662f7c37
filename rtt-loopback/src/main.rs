//! Loopback demo: two engines in one process, Juliet typing to Romeo.
//!
//! Usage: `rtt-loopback [message]`. Set `RTT_CONFIG` to a JSON object to
//! override timing, e.g. `RTT_CONFIG='{"sample_frequency_ms": 300}'`.
//! Logging follows `RUST_LOG`.

use std::time::Duration;

use log::info;
use rtt_engine::{
    spawn_relay, ChannelTransport, Engine, RttConfig, RttError, RttEvent, SessionEvent,
    SystemClock,
};
use tokio::sync::mpsc;

const JULIET: &str = "juliet@capulet.lit/balcony";
const ROMEO: &str = "romeo@montague.lit/orchard";

/// Delay between simulated keystrokes.
const KEYSTROKE: Duration = Duration::from_millis(120);

fn load_config() -> Result<RttConfig, RttError> {
    match std::env::var("RTT_CONFIG") {
        Ok(json) => RttConfig::from_json(&json),
        Err(_) => Ok(RttConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let message = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "But soft, what light through yonder window breaks?".to_string());
    let config = load_config()?;
    info!("Starting loopback with {config:?}");

    let clock = SystemClock::shared();
    let (juliet_transport, juliet_out) = ChannelTransport::new(JULIET);
    let (romeo_transport, romeo_out) = ChannelTransport::new(ROMEO);
    let (juliet_in, juliet_session) = mpsc::unbounded_channel();
    let (romeo_in, romeo_session) = mpsc::unbounded_channel();
    spawn_relay(juliet_out, romeo_in.clone());
    spawn_relay(romeo_out, juliet_in.clone());

    let juliet = Engine::new(juliet_transport, config.clone(), clock.clone())?;
    let mut romeo = Engine::new(romeo_transport, config, clock)?;
    let mut updates = romeo
        .take_event_rx()
        .ok_or("receive events already taken")?;
    let juliet_handle = juliet.handle();
    let romeo_handle = romeo.handle();
    let juliet_task = tokio::spawn(juliet.run(juliet_session));
    let romeo_task = tokio::spawn(romeo.run(romeo_session));

    juliet_in.send(SessionEvent::Connected)?;
    romeo_in.send(SessionEvent::Connected)?;

    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update.event {
                RttEvent::Edit => println!("{}> {}", update.peer, update.text),
                RttEvent::Body => {
                    println!("{}: {}", update.peer, update.text);
                    break;
                }
                event => println!("[{event:?}]"),
            }
        }
    });

    let mut typed = String::new();
    for c in message.chars() {
        typed.push(c);
        juliet_handle.update("romeo@montague.lit", typed.as_str())?;
        tokio::time::sleep(KEYSTROKE).await;
    }
    // Let the last sample arrive and replay before completing the message.
    tokio::time::sleep(Duration::from_secs(2)).await;
    juliet_handle.send_body("romeo@montague.lit", typed.as_str())?;

    printer.await?;
    juliet_handle.shutdown()?;
    romeo_handle.shutdown()?;
    juliet_task.await?;
    romeo_task.await?;
    info!("Loopback finished");
    Ok(())
}
