use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::backoff::ReconnectPolicy;
use super::queue::OutboundQueue;
use crate::config::TransportConfig;
use crate::error::PulseError;
use crate::model::{Envelope, MessageKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, PulseError>> + Send>>;

/// Lifecycle of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot published to readers after every state change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempt: u32,
    pub last_error: Option<String>,
    /// Connections opened so far; bumped before `Connected` is emitted.
    pub epoch: u64,
}

impl ConnectionStatus {
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// What happens to an envelope sent while the socket is not open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued and flushed on the next successful connect.
    Reliable,
    /// Dropped; used for traffic that is re-derived on every connect.
    Ephemeral,
}

#[derive(Debug)]
pub enum TransportCommand {
    Connect,
    Send {
        envelope: Envelope,
        delivery: Delivery,
    },
    Disconnect,
    Shutdown,
}

/// Observational events emitted by the connection actor, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    /// `normal` marks an explicit or server-requested clean closure.
    Disconnected { normal: bool, reason: String },
    Error(String),
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal until `connect()` is called again.
    MaxReconnectAttempts { attempts: u32 },
    Frame(String),
}

struct OpenSocket {
    write: WsWrite,
    read: WsRead,
    heartbeat: Interval,
}

enum Link {
    Idle,
    Connecting(ConnectFuture),
    Open(OpenSocket),
    Backoff(Pin<Box<Sleep>>),
}

/// Owns the socket, the offline queue and every timer.
pub struct ConnectionManager {
    url: Url,
    // endpoint without the query string, safe to log
    display_url: String,
    config: TransportConfig,
    policy: ReconnectPolicy,
    queue: OutboundQueue,
    reconnect_attempt: u32,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
    status: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    pub fn new(
        config: TransportConfig,
        commands: mpsc::UnboundedReceiver<TransportCommand>,
        events: mpsc::Sender<TransportEvent>,
        status: watch::Sender<ConnectionStatus>,
    ) -> Result<Self, PulseError> {
        let url = config.endpoint()?;
        let mut shown = url.clone();
        shown.set_query(None);

        Ok(Self {
            display_url: shown.to_string(),
            url,
            policy: ReconnectPolicy::from_config(&config),
            queue: OutboundQueue::new(config.outbound_queue_capacity),
            config,
            reconnect_attempt: 0,
            commands,
            events,
            status,
        })
    }

    // Runs until shutdown or until every Transport handle is dropped.
    pub async fn run(mut self) {
        let mut link = Link::Idle;

        loop {
            let next = match link {
                Link::Idle => self.idle().await,
                Link::Connecting(pending) => self.connecting(pending).await,
                Link::Open(socket) => self.open_socket(socket).await,
                Link::Backoff(timer) => self.backoff(timer).await,
            };

            match next {
                Some(l) => link = l,
                None => break,
            }
        }

        self.set_state(ConnectionState::Closed);
        info!("Transport for {} stopped", self.display_url);
    }

    async fn idle(&mut self) -> Option<Link> {
        match self.commands.recv().await? {
            TransportCommand::Connect => {
                // explicit connect restarts the attempt budget
                self.reconnect_attempt = 0;
                Some(self.begin_connect())
            }
            TransportCommand::Send { envelope, delivery } => {
                self.enqueue(envelope, delivery).await;
                Some(Link::Idle)
            }
            TransportCommand::Disconnect => {
                self.finish_explicit_close().await;
                Some(Link::Idle)
            }
            TransportCommand::Shutdown => None,
        }
    }

    async fn connecting(&mut self, mut pending: ConnectFuture) -> Option<Link> {
        tokio::select! {
            result = &mut pending => match result {
                Ok(ws) => Some(self.open(ws).await),
                Err(e) => {
                    warn!("Connection to {} failed: {}", self.display_url, e);
                    self.report_error(e.to_string()).await;
                    Some(self.schedule_reconnect().await)
                }
            },
            cmd = self.commands.recv() => match cmd {
                Some(TransportCommand::Connect) => {
                    debug!("connect() ignored, handshake already in progress");
                    Some(Link::Connecting(pending))
                }
                Some(TransportCommand::Send { envelope, delivery }) => {
                    self.enqueue(envelope, delivery).await;
                    Some(Link::Connecting(pending))
                }
                Some(TransportCommand::Disconnect) => {
                    drop(pending);
                    self.finish_explicit_close().await;
                    Some(Link::Idle)
                }
                Some(TransportCommand::Shutdown) | None => None,
            }
        }
    }

    async fn open_socket(&mut self, mut socket: OpenSocket) -> Option<Link> {
        tokio::select! {
            frame = socket.read.next() => Some(self.on_frame(socket, frame).await),
            _ = socket.heartbeat.tick() => {
                let ping = Envelope::new(MessageKind::Ping.as_str(), Value::Null);
                match send_envelope(&mut socket.write, &ping).await {
                    Ok(()) => {
                        trace!("Heartbeat sent");
                        Some(Link::Open(socket))
                    }
                    Err(e) => {
                        self.report_error(e.to_string()).await;
                        Some(self.abnormal_close(format!("heartbeat failed: {}", e)).await)
                    }
                }
            }
            cmd = self.commands.recv() => match cmd {
                Some(TransportCommand::Connect) => {
                    debug!("connect() ignored, already open");
                    Some(Link::Open(socket))
                }
                Some(TransportCommand::Send { envelope, delivery }) => {
                    Some(self.send_open(socket, envelope, delivery).await)
                }
                Some(TransportCommand::Disconnect) => {
                    self.close_socket(socket).await;
                    Some(Link::Idle)
                }
                Some(TransportCommand::Shutdown) | None => {
                    self.close_socket(socket).await;
                    None
                }
            }
        }
    }

    async fn backoff(&mut self, mut timer: Pin<Box<Sleep>>) -> Option<Link> {
        tokio::select! {
            _ = &mut timer => Some(self.begin_connect()),
            cmd = self.commands.recv() => match cmd {
                Some(TransportCommand::Connect) => {
                    debug!("connect() during backoff, retrying immediately");
                    Some(self.begin_connect())
                }
                Some(TransportCommand::Send { envelope, delivery }) => {
                    self.enqueue(envelope, delivery).await;
                    Some(Link::Backoff(timer))
                }
                Some(TransportCommand::Disconnect) => {
                    self.finish_explicit_close().await;
                    Some(Link::Idle)
                }
                Some(TransportCommand::Shutdown) | None => None,
            }
        }
    }

    fn begin_connect(&mut self) -> Link {
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}...", self.display_url);

        let url = self.url.to_string();
        let timeout = self.config.connect_timeout;

        Link::Connecting(Box::pin(async move {
            match tokio::time::timeout(timeout, connect_async(url)).await {
                Ok(Ok((ws, _))) => Ok(ws),
                Ok(Err(e)) => Err(PulseError::from(e)),
                Err(_) => Err(PulseError::ConnectionError(format!(
                    "handshake timed out after {:?}",
                    timeout
                ))),
            }
        }))
    }

    async fn open(&mut self, ws: WsStream) -> Link {
        let (mut write, read) = ws.split();
        info!("Connected to {}", self.display_url);

        self.reconnect_attempt = 0;
        self.status.send_modify(|s| {
            s.state = ConnectionState::Open;
            s.reconnect_attempt = 0;
            s.last_error = None;
            s.epoch += 1;
        });

        // queued traffic goes out before anything new
        if let Err(e) = self.flush_queue(&mut write).await {
            self.report_error(e.to_string()).await;
            return self.abnormal_close(format!("flush failed: {}", e)).await;
        }

        self.emit(TransportEvent::Connected).await;

        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Link::Open(OpenSocket {
            write,
            read,
            heartbeat,
        })
    }

    async fn flush_queue(&mut self, write: &mut WsWrite) -> Result<usize, PulseError> {
        let mut flushed = 0;

        while let Some(envelope) = self.queue.pop() {
            let text = match envelope.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Dropping unserializable '{}' envelope: {}", envelope.kind, e);
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text.into())).await {
                self.queue.requeue_front(envelope);
                return Err(e.into());
            }
            flushed += 1;
        }

        if flushed > 0 {
            debug!("Flushed {} queued envelopes", flushed);
        }
        Ok(flushed)
    }

    async fn on_frame(
        &mut self,
        socket: OpenSocket,
        frame: Option<Result<Message, tungstenite::Error>>,
    ) -> Link {
        match frame {
            Some(Ok(Message::Text(text))) => {
                self.emit(TransportEvent::Frame(text.to_string())).await;
                Link::Open(socket)
            }
            Some(Ok(Message::Binary(bytes))) => {
                match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => self.emit(TransportEvent::Frame(text)).await,
                    Err(_) => warn!("Dropping non UTF-8 binary frame ({} bytes)", bytes.len()),
                }
                Link::Open(socket)
            }
            Some(Ok(Message::Close(frame))) => {
                let normal = frame
                    .as_ref()
                    .map(|f| f.code == CloseCode::Normal)
                    .unwrap_or(false);
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "closed without status".to_string());

                if normal {
                    info!("Server closed the connection: {}", reason);
                    self.set_state(ConnectionState::Closed);
                    self.emit(TransportEvent::Disconnected {
                        normal: true,
                        reason,
                    })
                    .await;
                    Link::Idle
                } else {
                    self.abnormal_close(reason).await
                }
            }
            // ping/pong control frames are answered by tungstenite
            Some(Ok(_)) => Link::Open(socket),
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                self.report_error(e.to_string()).await;
                self.abnormal_close(e.to_string()).await
            }
            None => {
                warn!("Stream ended unexpectedly");
                self.abnormal_close("stream ended".to_string()).await
            }
        }
    }

    async fn send_open(
        &mut self,
        mut socket: OpenSocket,
        envelope: Envelope,
        delivery: Delivery,
    ) -> Link {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Dropping unserializable '{}' envelope: {}", envelope.kind, e);
                return Link::Open(socket);
            }
        };

        match socket.write.send(Message::Text(text.into())).await {
            Ok(()) => {
                trace!("Sent '{}'", envelope.kind);
                Link::Open(socket)
            }
            Err(e) => {
                warn!("Send of '{}' failed: {}", envelope.kind, e);
                if delivery == Delivery::Reliable {
                    self.queue.requeue_front(envelope);
                }
                self.report_error(e.to_string()).await;
                self.abnormal_close(e.to_string()).await
            }
        }
    }

    async fn close_socket(&mut self, mut socket: OpenSocket) {
        self.set_state(ConnectionState::Closing);

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };
        if let Err(e) = socket.write.send(Message::Close(Some(frame))).await {
            debug!("Close handshake failed: {}", e);
        }
        let _ = socket.write.close().await;

        self.finish_explicit_close().await;
    }

    async fn finish_explicit_close(&mut self) {
        self.queue.clear();
        self.reconnect_attempt = 0;
        self.status.send_modify(|s| {
            s.state = ConnectionState::Closed;
            s.reconnect_attempt = 0;
        });
        info!("Disconnected from {}", self.display_url);
        self.emit(TransportEvent::Disconnected {
            normal: true,
            reason: "client disconnect".to_string(),
        })
        .await;
    }

    async fn abnormal_close(&mut self, reason: String) -> Link {
        warn!("Connection lost: {}", reason);
        self.set_state(ConnectionState::Closed);
        self.emit(TransportEvent::Disconnected {
            normal: false,
            reason,
        })
        .await;
        self.schedule_reconnect().await
    }

    async fn schedule_reconnect(&mut self) -> Link {
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
        let attempt = self.reconnect_attempt;

        match self.policy.delay_for(attempt) {
            Some(delay) => {
                info!(
                    "Reconnect attempt {}/{} in {:?}",
                    attempt, self.policy.max_attempts, delay
                );
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Closed;
                    s.reconnect_attempt = attempt;
                });
                self.emit(TransportEvent::Reconnecting { attempt, delay }).await;
                Link::Backoff(Box::pin(sleep(delay)))
            }
            None => {
                let attempts = self.policy.max_attempts;
                error!(
                    "Giving up on {} after {} reconnect attempts",
                    self.display_url, attempts
                );
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Closed;
                    s.reconnect_attempt = attempts;
                    s.last_error = Some("maximum reconnect attempts reached".to_string());
                });
                self.emit(TransportEvent::MaxReconnectAttempts { attempts })
                    .await;
                Link::Idle
            }
        }
    }

    async fn enqueue(&mut self, envelope: Envelope, delivery: Delivery) {
        match delivery {
            Delivery::Ephemeral => {
                trace!("Not connected, dropping ephemeral '{}'", envelope.kind);
            }
            Delivery::Reliable => match self.queue.push(envelope) {
                Ok(()) => debug!("Queued envelope ({} pending)", self.queue.len()),
                Err(rejected) => {
                    let message = format!(
                        "outbound queue full ({} envelopes), rejected '{}'",
                        self.queue.capacity(),
                        rejected.kind
                    );
                    warn!("{}", message);
                    self.report_error(message).await;
                }
            },
        }
    }

    async fn report_error(&mut self, message: String) {
        self.status
            .send_modify(|s| s.last_error = Some(message.clone()));
        self.emit(TransportEvent::Error(message)).await;
    }

    async fn emit(&self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            trace!("Event receiver dropped");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| s.state = state);
    }
}

async fn send_envelope(write: &mut WsWrite, envelope: &Envelope) -> Result<(), PulseError> {
    let text = envelope.to_json()?;
    write.send(Message::Text(text.into())).await?;
    Ok(())
}
