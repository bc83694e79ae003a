//! Events emitted by the client for the consumer to act on.

use std::collections::HashMap;

/// Message tags as key/value pairs. Chat and action events carry a
/// synthesized `username` entry alongside the server's IRCv3 tags.
pub type Tags = HashMap<String, String>;

/// Events the SDK emits to the consumer (CLI, bot, UI).
///
/// Delivery is in the exact order the triggering lines arrived from the
/// server; the session task is the only sender.
#[derive(Debug, Clone)]
pub enum Event {
    /// Opening the socket to a resolved server.
    Connecting { server: String, port: u16 },

    /// Sending authentication to the server.
    Logon,

    /// The server finished its welcome sequence; joins are underway.
    Connected { server: String, port: u16 },

    /// Server sent PING (the client answers PONG automatically).
    Ping,

    /// Server answered a PING of ours.
    Pong,

    /// The connection is gone. `reason` is human-readable.
    Disconnected { reason: String },

    /// Someone joined a channel.
    Join { channel: String, username: String },

    /// Someone left a channel.
    Part { channel: String, username: String },

    /// NAMES list for a channel (numeric 353; may arrive in parts).
    Names { channel: String, nicks: Vec<String> },

    /// A regular chat message.
    Chat { channel: String, tags: Tags, message: String },

    /// A `/me` action message, wrapper already stripped.
    Action { channel: String, tags: Tags, message: String },

    /// Subscribers-only mode toggled.
    Subscribers { channel: String, enabled: bool },

    /// Slow mode toggled.
    Slow { channel: String, enabled: bool },

    /// R9K mode toggled.
    R9kMode { channel: String, enabled: bool },

    /// Channel started hosting. The target is only known when the
    /// server announced it via HOSTTARGET.
    Hosting { channel: String, target: Option<String> },

    /// Channel stopped hosting.
    Unhost { channel: String },

    /// A user was timed out by a moderator.
    Timeout { channel: String, username: String },

    /// Chat was cleared by a moderator.
    ClearChat { channel: String },
}
