//! Minimal chat watcher: connect, join, print.
//!
//! Usage:
//!   tmi-cli somechannel otherchannel
//!   tmi-cli --username mybot --password oauth:... --reconnect somechannel

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tmi_sdk::client::{ConnectionOpts, IdentityOpts, MiscOpts};
use tmi_sdk::{connect, Event, Opts};

#[derive(Parser)]
#[command(name = "tmi-cli", about = "Watch Twitch chat from the terminal")]
struct Args {
    /// Channels to join. The leading `#` is optional.
    #[arg(required = true)]
    channels: Vec<String>,

    /// Fixed server host; a random chat server is picked when omitted.
    #[arg(long)]
    server: Option<String>,

    /// Port for a fixed server.
    #[arg(long)]
    port: Option<u16>,

    /// Login name. Connects as an anonymous guest when omitted.
    #[arg(long)]
    username: Option<String>,

    /// OAuth token; the `oauth:` prefix is optional.
    #[arg(long, env = "TMI_PASSWORD")]
    password: Option<String>,

    /// Reconnect after unexpected closes.
    #[arg(long)]
    reconnect: bool,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let opts = Opts {
        channels: args.channels.iter().map(|c| normalize_channel(c)).collect(),
        connection: ConnectionOpts {
            reconnect: args.reconnect,
            server: args.server,
            port: args.port,
            random: None,
        },
        identity: IdentityOpts { username: args.username, password: args.password },
        options: MiscOpts { debug: args.debug },
    };

    let (handle, mut events) = connect(opts);

    // Ctrl-C closes the socket cleanly instead of killing the process
    // mid-line.
    let closer = handle.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = closer.disconnect().await;
    });

    while let Some(event) = events.recv().await {
        match event {
            Event::Connected { server, port } => {
                println!("* connected to {server}:{port}");
            }
            Event::Chat { channel, tags, message } => {
                println!("[{channel}] <{}>: {message}", username_of(&tags));
            }
            Event::Action { channel, tags, message } => {
                println!("[{channel}] * {} {message}", username_of(&tags));
            }
            Event::Join { channel, username } => {
                println!("[{channel}] {username} joined");
            }
            Event::Part { channel, username } => {
                println!("[{channel}] {username} left");
            }
            Event::Timeout { channel, username } => {
                println!("[{channel}] {username} has been timed out");
            }
            Event::ClearChat { channel } => {
                println!("[{channel}] chat was cleared by a moderator");
            }
            Event::Disconnected { reason } => {
                println!("* disconnected: {reason}");
            }
            _ => {}
        }
    }

    Ok(())
}

fn username_of(tags: &tmi_sdk::Tags) -> &str {
    tags.get("username").map(String::as_str).unwrap_or("?")
}

fn normalize_channel(name: &str) -> String {
    if name.starts_with('#') {
        name.to_string()
    } else {
        format!("#{name}")
    }
}
