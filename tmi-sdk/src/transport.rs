//! WebSocket transport: the open/probe/send/close primitive the state
//! machine drives.
//!
//! The session loop only sees the [`Connector`]/[`Transport`] traits, so
//! tests can substitute an in-memory transport. The default
//! implementation is tokio-tungstenite speaking the `irc` WebSocket
//! subprotocol.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ClientError;

/// What the transport reported to the session loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// One protocol line, CR-LF already stripped.
    Line(String),
    /// The socket errored. A `Closed` follows.
    Error(String),
    /// The socket is gone.
    Closed,
}

/// An open duplex line channel.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, line: &str) -> Result<(), ClientError>;
    async fn next_event(&mut self) -> TransportEvent;
    async fn close(&mut self);
}

/// Opens transports and probes whether an endpoint accepts them.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Whether the endpoint completes our WebSocket handshake.
    async fn probe(&self, host: &str, port: u16) -> bool;
    async fn open(&self, host: &str, port: u16)
        -> Result<Box<dyn Transport>, ClientError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// tokio-tungstenite connector for `ws://host:port/` with the `irc`
/// subprotocol.
pub struct WsConnector {
    /// Deadline for the handshake probe.
    pub probe_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self { probe_timeout: Duration::from_secs(5) }
    }
}

async fn handshake(host: &str, port: u16) -> Result<WsStream, ClientError> {
    let mut request = format!("ws://{host}:{port}/").into_client_request()?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("irc"));
    let (ws, _response) = connect_async(request).await?;
    Ok(ws)
}

#[async_trait]
impl Connector for WsConnector {
    async fn probe(&self, host: &str, port: u16) -> bool {
        match tokio::time::timeout(self.probe_timeout, handshake(host, port)).await {
            Ok(Ok(mut ws)) => {
                let _ = ws.close(None).await;
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, host, port, "handshake probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(host, port, "handshake probe timed out");
                false
            }
        }
    }

    async fn open(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, ClientError> {
        let ws = handshake(host, port).await?;
        Ok(Box::new(WsTransport { ws, pending: VecDeque::new() }))
    }
}

/// A live WebSocket. One text frame may carry several CR-LF terminated
/// lines; extras are buffered and yielded in order.
struct WsTransport {
    ws: WsStream,
    pending: VecDeque<String>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, line: &str) -> Result<(), ClientError> {
        self.ws.send(WsMessage::text(line)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return TransportEvent::Line(line);
            }
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    self.pending.extend(
                        text.lines().filter(|l| !l.is_empty()).map(str::to_string),
                    );
                }
                Some(Ok(WsMessage::Close(_))) | None => return TransportEvent::Closed,
                Some(Ok(_)) => {} // ping/pong/binary frames carry no chat lines
                Some(Err(e)) => return TransportEvent::Error(e.to_string()),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
