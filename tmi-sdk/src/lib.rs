//! Twitch chat (TMI) client over WebSocket.
//!
//! The SDK keeps a single persistent connection to a Twitch chat server,
//! authenticates, joins the configured channels, and translates every
//! inbound protocol line into a typed [`Event`]. Failed connections are
//! re-established automatically when `connection.reconnect` is set.
//!
//! ```no_run
//! use tmi_sdk::{connect, Event, Opts};
//!
//! # async fn example() {
//! let opts = Opts {
//!     channels: vec!["#some_channel".to_string()],
//!     ..Opts::default()
//! };
//! let (handle, mut events) = connect(opts);
//! while let Some(event) = events.recv().await {
//!     if let Event::Chat { channel, tags, message } = event {
//!         println!("[{channel}] <{}>: {message}", tags["username"]);
//!     }
//! }
//! # let _ = handle;
//! # }
//! ```

pub mod client;
mod dispatch;
pub mod error;
pub mod event;
pub mod irc;
pub mod server;
pub mod transport;

pub use client::{connect, connect_with, ClientHandle, ConnectionState, Opts};
pub use error::ClientError;
pub use event::{Event, Tags};
