//! Connection lifecycle: resolve, probe, open, authenticate, join, and
//! the steady-state session loop.
//!
//! [`connect`] spawns a task that owns the socket. Every connection
//! attempt gets a fresh [`Session`], so no timer or flag can act on a
//! previous socket. Consumers receive typed [`Event`]s on the returned
//! channel and talk back through the [`ClientHandle`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::dispatch::{self, Action};
use crate::error::ClientError;
use crate::event::{Event, Tags};
use crate::irc::Message;
use crate::server::{split_addr, Resolver, StaticPool};
use crate::transport::{Connector, TransportEvent, WsConnector};

/// Delay between successive JOIN commands.
const JOIN_INTERVAL: Duration = Duration::from_secs(1);

/// Backoff before a reconnect attempt.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Anonymous login password sentinel; never oauth-prefixed.
pub(crate) const ANON_PASSWORD: &str = "SCHMOOPIIE";

const DEFAULT_PORT: u16 = 443;
const DEFAULT_POOL: &str = "chat";
const CAP_REQ: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership";

/// Client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Opts {
    /// Channels to join after the welcome sequence, in order.
    pub channels: Vec<String>,
    pub connection: ConnectionOpts,
    pub identity: IdentityOpts,
    pub options: MiscOpts,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionOpts {
    /// Retry with a fixed 10 second backoff after unexpected closes.
    pub reconnect: bool,
    /// Fixed server host. Unset means pick from a pool at random.
    pub server: Option<String>,
    /// Port for a fixed server. Defaults to 443.
    pub port: Option<u16>,
    /// Pool kind for random selection; forces pool selection even when
    /// a fixed server is configured. Defaults to `"chat"`.
    pub random: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityOpts {
    /// Login name. Unset means an anonymous `justinfanNNNN` guest.
    pub username: Option<String>,
    /// OAuth token; the `oauth:` prefix is added when missing.
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MiscOpts {
    /// Verbosity toggle for the consumer's log filter. No behavioral
    /// effect inside the SDK.
    pub debug: bool,
}

/// Lifecycle of one connection attempt. The session task is the only
/// mutator; transitions happen nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Resolving,
    Opening,
    Authenticating,
    Joining,
    Ready,
    Closing,
    Disconnected,
}

/// Commands the consumer pushes into the session task.
#[derive(Debug)]
enum Command {
    Raw(String),
    Say { channel: String, message: String },
    Disconnect,
}

pub(crate) type SharedUserstate = Arc<Mutex<HashMap<String, Tags>>>;

/// Handle to a running client. Cheap to clone.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
    userstate: SharedUserstate,
}

impl ClientHandle {
    /// Send an arbitrary raw line on the wire.
    pub async fn raw(&self, line: &str) -> Result<(), ClientError> {
        self.cmd_tx
            .send(Command::Raw(line.to_string()))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Send a chat message to a channel.
    pub async fn say(&self, channel: &str, message: &str) -> Result<(), ClientError> {
        self.cmd_tx
            .send(Command::Say { channel: channel.to_string(), message: message.to_string() })
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Close the connection. The resulting `disconnected` event carries
    /// reason "Connection closed." and no reconnect is scheduled. Issued
    /// while no socket is open (during the reconnect backoff), it
    /// cancels the pending attempt and ends the client task.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.cmd_tx
            .send(Command::Disconnect)
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Last-seen USERSTATE tags for a channel. Updated on every
    /// USERSTATE message; last write wins.
    pub fn userstate(&self, channel: &str) -> Option<Tags> {
        self.userstate.lock().get(channel).cloned()
    }
}

/// State owned by one connect/disconnect cycle.
pub(crate) struct Session {
    pub(crate) server: String,
    pub(crate) port: u16,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) state: ConnectionState,
    pub(crate) close_called: bool,
    pub(crate) channels: Vec<String>,
    pub(crate) join_queue: VecDeque<String>,
    pub(crate) userstate: SharedUserstate,
}

impl Session {
    fn new(opts: &Opts, userstate: SharedUserstate) -> Self {
        Self {
            server: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            state: ConnectionState::Idle,
            close_called: false,
            channels: opts.channels.clone(),
            join_queue: VecDeque::new(),
            userstate,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        tracing::debug!(from = ?self.state, to = ?state, "connection state");
        self.state = state;
    }
}

/// Connect with the default WebSocket transport and pool resolver.
pub fn connect(opts: Opts) -> (ClientHandle, mpsc::Receiver<Event>) {
    connect_with(opts, Arc::new(StaticPool), Arc::new(WsConnector::default()))
}

/// Connect with injected resolver and connector seams.
pub fn connect_with(
    opts: Opts,
    resolver: Arc<dyn Resolver>,
    connector: Arc<dyn Connector>,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let userstate: SharedUserstate = Arc::new(Mutex::new(HashMap::new()));
    let handle = ClientHandle { cmd_tx, userstate: userstate.clone() };

    tokio::spawn(run_client(opts, resolver, connector, event_tx, cmd_rx, userstate));

    (handle, event_rx)
}

/// How a connection attempt ended.
enum SessionEnd {
    /// The resolver produced no endpoint.
    ResolveFailed,
    /// The endpoint refused the WebSocket handshake probe.
    ProbeRejected { addr: String },
    /// User-initiated close, or a fatal authentication rejection.
    Explicit,
    /// The socket dropped out from under us.
    Dropped { addr: Option<String> },
}

/// Outer attempt loop: one iteration per connection attempt, with the
/// fixed backoff and exclusion-address hint between failed attempts.
async fn run_client(
    opts: Opts,
    resolver: Arc<dyn Resolver>,
    connector: Arc<dyn Connector>,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
    userstate: SharedUserstate,
) {
    let reconnect = opts.connection.reconnect;
    let mut exclude: Option<String> = None;

    loop {
        let mut session = Session::new(&opts, userstate.clone());
        let end = run_session(
            &opts,
            &mut session,
            resolver.as_ref(),
            connector.as_ref(),
            &event_tx,
            &mut cmd_rx,
            exclude.as_deref(),
        )
        .await;

        match end {
            SessionEnd::Explicit => {
                tracing::info!("connection closed");
                emit(&event_tx, Event::Disconnected { reason: "Connection closed.".into() })
                    .await;
                return;
            }
            SessionEnd::Dropped { addr } => {
                emit(
                    &event_tx,
                    Event::Disconnected { reason: "Unable to connect to chat.".into() },
                )
                .await;
                if !reconnect {
                    tracing::error!("unable to connect to chat");
                    return;
                }
                tracing::error!(
                    delay_secs = RECONNECT_DELAY.as_secs(),
                    "unable to connect to chat, reconnecting"
                );
                exclude = addr.or(exclude);
            }
            SessionEnd::ProbeRejected { addr } => {
                if !reconnect {
                    tracing::error!("server is not accepting WebSocket connections");
                    return;
                }
                tracing::error!(
                    delay_secs = RECONNECT_DELAY.as_secs(),
                    "server is not accepting WebSocket connections, reconnecting"
                );
                exclude = Some(addr);
            }
            SessionEnd::ResolveFailed => {
                if !reconnect {
                    tracing::error!("could not resolve a chat server");
                    return;
                }
                tracing::error!(
                    delay_secs = RECONNECT_DELAY.as_secs(),
                    "could not resolve a chat server, retrying"
                );
            }
        }

        if !backoff(&mut cmd_rx).await {
            return;
        }
    }
}

/// Wait out the reconnect backoff. A `disconnect()` issued while no
/// socket is open cancels the pending attempt; other commands have no
/// socket to go to and are dropped with a warning.
async fn backoff(cmd_rx: &mut mpsc::Receiver<Command>) -> bool {
    let deadline = tokio::time::Instant::now() + RECONNECT_DELAY;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Disconnect) | None => {
                    tracing::info!("reconnect cancelled");
                    return false;
                }
                Some(cmd) => tracing::warn!(?cmd, "not connected, dropping command"),
            },
        }
    }
}

/// One step of the session select loop.
enum Step {
    Transport(TransportEvent),
    JoinTick,
    Command(Option<Command>),
}

/// Drive a single connection attempt from resolution to its close.
async fn run_session(
    opts: &Opts,
    session: &mut Session,
    resolver: &dyn Resolver,
    connector: &dyn Connector,
    event_tx: &mpsc::Sender<Event>,
    cmd_rx: &mut mpsc::Receiver<Command>,
    exclude: Option<&str>,
) -> SessionEnd {
    // Resolve an endpoint, unless one is pinned in the configuration.
    session.set_state(ConnectionState::Resolving);
    let addr = match pick_server(opts, resolver, exclude).await {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "server resolution failed");
            return SessionEnd::ResolveFailed;
        }
    };
    let Some((host, port)) = split_addr(&addr) else {
        tracing::error!(addr = %addr, "resolver returned an unusable address");
        return SessionEnd::ResolveFailed;
    };
    session.server = host;
    session.port = port;

    // Probe that the endpoint speaks our handshake before committing.
    if !connector.probe(&session.server, session.port).await {
        return SessionEnd::ProbeRejected { addr };
    }

    session.set_state(ConnectionState::Opening);
    let mut transport = match connector.open(&session.server, session.port).await {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!(error = %e, "unable to connect");
            emit(event_tx, Event::Disconnected { reason: "Unable to connect.".into() }).await;
            session.set_state(ConnectionState::Disconnected);
            return SessionEnd::Dropped { addr: Some(addr) };
        }
    };

    // Socket is open: compute identity and authenticate. One auth triple
    // per socket, ever.
    session.set_state(ConnectionState::Authenticating);
    session.username = opts
        .identity
        .username
        .clone()
        .unwrap_or_else(anonymous_username);
    session.password = normalize_password(opts.identity.password.as_deref());

    tracing::info!(server = %session.server, port = session.port, "connecting");
    emit(
        event_tx,
        Event::Connecting { server: session.server.clone(), port: session.port },
    )
    .await;

    tracing::info!("sending authentication to server");
    emit(event_tx, Event::Logon).await;

    let auth = [
        format!("PASS {}", session.password),
        format!("NICK {}", session.username),
        format!("USER {0} 8 * :{0}", session.username),
    ];
    for line in auth {
        if let Err(e) = transport.send(&line).await {
            tracing::error!(error = %e, "unable to connect");
            emit(event_tx, Event::Disconnected { reason: "Unable to connect.".into() }).await;
            session.set_state(ConnectionState::Disconnected);
            return SessionEnd::Dropped { addr: Some(addr) };
        }
    }

    // Paced JOIN timer; armed when the queue is seeded on the server's
    // end-of-MOTD.
    let mut join_tick = tokio::time::interval(JOIN_INTERVAL);
    join_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cmd_open = true;

    loop {
        let step = tokio::select! {
            ev = transport.next_event() => Step::Transport(ev),
            _ = join_tick.tick(), if !session.join_queue.is_empty() => Step::JoinTick,
            cmd = cmd_rx.recv(), if cmd_open => Step::Command(cmd),
        };

        match step {
            Step::Transport(TransportEvent::Line(line)) => {
                let Some(msg) = Message::parse(&line) else { continue };
                for action in dispatch::dispatch(session, &msg) {
                    match action {
                        Action::Emit(event) => emit(event_tx, event).await,
                        Action::Send(line) => {
                            let _ = transport.send(&line).await;
                        }
                        Action::BeginJoin => {
                            session.set_state(ConnectionState::Joining);
                            let _ = transport.send(CAP_REQ).await;
                            session.join_queue = session.channels.iter().cloned().collect();
                            // First JOIN goes out immediately; the rest
                            // wait on the pacing timer.
                            if let Some(channel) = session.join_queue.pop_front() {
                                let _ = transport.send(&format!("JOIN {channel}")).await;
                                join_tick.reset();
                            }
                            session.set_state(ConnectionState::Ready);
                        }
                        Action::CloseExplicit => {
                            session.close_called = true;
                            session.set_state(ConnectionState::Closing);
                            transport.close().await;
                        }
                    }
                }
            }
            Step::Transport(TransportEvent::Error(err)) => {
                // The close that follows decides whether we retry.
                tracing::error!(error = %err, "unable to connect");
                emit(event_tx, Event::Disconnected { reason: "Unable to connect.".into() })
                    .await;
            }
            Step::Transport(TransportEvent::Closed) => {
                session.set_state(ConnectionState::Disconnected);
                return if session.close_called {
                    SessionEnd::Explicit
                } else {
                    SessionEnd::Dropped { addr: Some(addr) }
                };
            }
            Step::JoinTick => {
                if let Some(channel) = session.join_queue.pop_front() {
                    let _ = transport.send(&format!("JOIN {channel}")).await;
                }
            }
            Step::Command(Some(Command::Raw(line))) => {
                let _ = transport.send(&line).await;
            }
            Step::Command(Some(Command::Say { channel, message })) => {
                let _ = transport.send(&format!("PRIVMSG {channel} :{message}")).await;
            }
            Step::Command(Some(Command::Disconnect)) | Step::Command(None) => {
                tracing::info!("disconnecting from server");
                cmd_open = false;
                session.close_called = true;
                session.set_state(ConnectionState::Closing);
                transport.close().await;
                // Keep looping until the transport reports Closed.
            }
        }
    }
}

/// Endpoint selection per the configuration: a pinned server when one is
/// set, otherwise a pool pick with the exclusion hint.
async fn pick_server(
    opts: &Opts,
    resolver: &dyn Resolver,
    exclude: Option<&str>,
) -> Result<String, ClientError> {
    if opts.connection.random.is_none() {
        if let Some(server) = &opts.connection.server {
            let port = opts.connection.port.unwrap_or(DEFAULT_PORT);
            return Ok(format!("{server}:{port}"));
        }
    }
    let pool = opts.connection.random.as_deref().unwrap_or(DEFAULT_POOL);
    resolver.resolve(pool, exclude).await
}

/// `justinfanNNNN` guest login.
fn anonymous_username() -> String {
    format!("justinfan{}", rand::thread_rng().gen_range(1000..81000))
}

/// Ensure the `oauth:` prefix, except on the anonymous sentinel.
pub(crate) fn normalize_password(password: Option<&str>) -> String {
    match password {
        None | Some(ANON_PASSWORD) => ANON_PASSWORD.to_string(),
        Some(p) if p.starts_with("oauth:") => p.to_string(),
        Some(p) => format!("oauth:{p}"),
    }
}

async fn emit(event_tx: &mpsc::Sender<Event>, event: Event) {
    if event_tx.send(event).await.is_err() {
        tracing::debug!("event receiver dropped");
    }
}
