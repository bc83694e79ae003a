//! Event-logging bot — connects anonymously and prints every typed
//! event the SDK emits.
//!
//! Usage:
//!   cargo run --example logbot -- "#somechannel"

use tmi_sdk::client::{ConnectionOpts, Opts};
use tmi_sdk::connect;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let channels: Vec<String> = std::env::args().skip(1).collect();
    anyhow::ensure!(!channels.is_empty(), "usage: logbot <#channel>...");

    let opts = Opts {
        channels,
        connection: ConnectionOpts { reconnect: true, ..ConnectionOpts::default() },
        ..Opts::default()
    };

    let (_handle, mut events) = connect(opts);
    while let Some(event) = events.recv().await {
        println!("{event:?}");
    }
    Ok(())
}
