//! SDK error types.
//!
//! Runtime connection failures surface asynchronously as
//! [`Event::Disconnected`](crate::Event::Disconnected) per the lifecycle
//! design; these types cover the API boundary (handle calls and the
//! transport/resolver seams).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The resolver produced no usable endpoint for a pool.
    #[error("no server available in pool {pool:?}")]
    Resolve { pool: String },

    /// The underlying WebSocket failed.
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The session task is gone; the handle can no longer send.
    #[error("connection is closed")]
    Closed,
}
