//! Server resolution: picking a chat endpoint out of a named pool.

use async_trait::async_trait;
use rand::Rng;

use crate::error::ClientError;

/// WebSocket-capable chat endpoints.
const CHAT_POOL: &[&str] = &[
    "irc-ws.chat.twitch.tv:80",
    "irc-ws.chat.twitch.tv:443",
];

/// Group-chat (whisper) endpoints.
const GROUP_POOL: &[&str] = &[
    "group-ws.tmi.twitch.tv:80",
    "group-ws.tmi.twitch.tv:443",
];

/// Resolves a pool kind to a connectable `host:port`.
///
/// Called again on every retry, with the previously failed address as
/// `exclude`, so a bad endpoint is not immediately re-selected.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, pool: &str, exclude: Option<&str>)
        -> Result<String, ClientError>;
}

/// Default resolver: a random pick from the built-in pool tables.
/// Unknown pool kinds fall back to the chat pool.
#[derive(Debug, Default)]
pub struct StaticPool;

#[async_trait]
impl Resolver for StaticPool {
    async fn resolve(&self, pool: &str, exclude: Option<&str>) -> Result<String, ClientError> {
        let table = match pool {
            "group" => GROUP_POOL,
            _ => CHAT_POOL,
        };
        let candidates: Vec<&str> = table
            .iter()
            .copied()
            .filter(|addr| Some(*addr) != exclude)
            .collect();
        // When everything is excluded, retrying the full pool beats failing.
        let candidates = if candidates.is_empty() { table.to_vec() } else { candidates };
        if candidates.is_empty() {
            return Err(ClientError::Resolve { pool: pool.to_string() });
        }
        let pick = candidates[rand::thread_rng().gen_range(0..candidates.len())];
        Ok(pick.to_string())
    }
}

/// Split a `host:port` address. Returns `None` on a missing or bad port.
pub fn split_addr(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.to_string(), port))
}
