use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::AppError;
use crate::event::WsConnectionStatus;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
/// A connection with no inbound traffic for this many ping intervals is treated as dead.
const IDLE_PING_INTERVALS: u32 = 2;

/// Outbound half of the shared connection, as seen by the correlator and the feed.
pub trait FrameSender: Send + Sync {
    fn send_frame(&self, frame: String) -> Result<(), AppError>;

    /// Send and report the connection generation the frame was queued on.
    fn send_tracked(&self, frame: String) -> Result<u64, AppError> {
        self.send_frame(frame).map(|()| 0)
    }
}

/// Everything the session reports, on one ordered channel so state changes
/// never overtake frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    State(WsConnectionStatus),
    Frame(String),
    /// The connection with this generation is gone. Sent before the matching
    /// `Disconnected` state.
    Closed { generation: u64 },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

#[derive(Debug)]
enum Control {
    Reconnect,
}

enum SessionExit {
    Shutdown,
    Restart,
}

/// Cloneable handle used to send frames and observe connectivity.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    outbound_tx: mpsc::UnboundedSender<String>,
    control_tx: mpsc::UnboundedSender<Control>,
    status_rx: watch::Receiver<WsConnectionStatus>,
    generation: Arc<Mutex<u64>>,
}

impl SessionHandle {
    pub fn status(&self) -> WsConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    pub fn watch_status(&self) -> watch::Receiver<WsConnectionStatus> {
        self.status_rx.clone()
    }

    /// Number of connections established so far. Bumped before `Connected` is published.
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Drop the current connection and dial again immediately, skipping the
    /// reconnect delay.
    pub fn reconnect(&self) -> Result<(), AppError> {
        self.control_tx
            .send(Control::Reconnect)
            .map_err(|_| AppError::SessionClosed)
    }
}

impl FrameSender for SessionHandle {
    fn send_frame(&self, frame: String) -> Result<(), AppError> {
        self.send_tracked(frame).map(|_| ())
    }

    fn send_tracked(&self, frame: String) -> Result<u64, AppError> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        // Held while queueing so a reconnect cannot drain the frame under a newer generation.
        let generation = self.generation.lock();
        self.outbound_tx
            .send(frame)
            .map_err(|_| AppError::SessionClosed)?;
        Ok(*generation)
    }
}

/// One persistent websocket connection with automatic fixed-delay reconnection.
pub struct WsSession {
    handle: SessionHandle,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WsSession {
    /// Spawn the connection task. Inbound frames and state transitions are
    /// delivered on `event_tx` in arrival order.
    pub fn spawn(config: SessionConfig, event_tx: mpsc::Sender<SessionEvent>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(WsConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let generation = Arc::new(Mutex::new(0));

        let io = SessionIo {
            event_tx,
            outbound_rx,
            control_rx,
            status_tx,
            shutdown: shutdown_rx,
            generation: generation.clone(),
            live_generation: None,
            last_status: None,
        };
        let join = tokio::spawn(run_session(config, io));

        Self {
            handle: SessionHandle {
                outbound_tx,
                control_tx,
                status_rx,
                generation,
            },
            shutdown_tx,
            join,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Close the connection and cancel any pending reconnect. Terminal.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "WebSocket session task ended abnormally");
        }
    }
}

struct SessionIo {
    event_tx: mpsc::Sender<SessionEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    status_tx: watch::Sender<WsConnectionStatus>,
    shutdown: watch::Receiver<bool>,
    generation: Arc<Mutex<u64>>,
    live_generation: Option<u64>,
    last_status: Option<WsConnectionStatus>,
}

impl SessionIo {
    /// Publish a state transition. Returns `false` once nobody listens any more.
    async fn set_status(&mut self, status: WsConnectionStatus) -> bool {
        if self.last_status == Some(status) {
            return true;
        }
        self.last_status = Some(status);
        self.status_tx.send_replace(status);
        self.event_tx.send(SessionEvent::State(status)).await.is_ok()
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Start a new generation and discard frames queued for the previous connection.
    fn begin_generation(&mut self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        let mut stale = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(stale, "Discarded frames queued before reconnect");
        }
        self.live_generation = Some(*generation);
        *generation
    }

    /// Report the end of the established connection, if any.
    async fn report_closed(&mut self) -> bool {
        match self.live_generation.take() {
            Some(generation) => self
                .event_tx
                .send(SessionEvent::Closed { generation })
                .await
                .is_ok(),
            None => true,
        }
    }
}

async fn run_session(config: SessionConfig, mut io: SessionIo) {
    let mut attempt: u32 = 0;

    loop {
        if io.shutdown_requested() {
            break;
        }
        attempt += 1;
        if !io.set_status(WsConnectionStatus::Connecting).await {
            break;
        }

        let exit = connect_once(&config, &mut io, attempt).await;
        if !io.report_closed().await {
            break;
        }
        match exit {
            Ok(SessionExit::Shutdown) => break,
            Ok(SessionExit::Restart) => {
                tracing::info!(url = %config.url, "WebSocket restart requested");
                if !io.set_status(WsConnectionStatus::Disconnected).await {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(
                    url = %config.url,
                    attempt,
                    error = %e,
                    delay_ms = config.reconnect_delay.as_millis() as u64,
                    "WebSocket disconnected, reconnecting after delay"
                );
                if !io.set_status(WsConnectionStatus::Disconnected).await {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(config.reconnect_delay) => {}
                    _ = io.shutdown.changed() => {
                        tracing::debug!("Shutdown during reconnect delay");
                        break;
                    }
                }
            }
        }
    }

    io.set_status(WsConnectionStatus::Disconnected).await;
    tracing::info!(url = %config.url, "WebSocket session stopped");
}

async fn connect_once(
    config: &SessionConfig,
    io: &mut SessionIo,
    attempt: u32,
) -> Result<SessionExit, AppError> {
    tracing::debug!(url = %config.url, attempt, "Connecting");

    let connected = tokio::select! {
        res = tokio_tungstenite::connect_async(config.url.as_str()) => res?,
        _ = io.shutdown.changed() => return Ok(SessionExit::Shutdown),
    };
    let (ws_stream, _resp) = connected;

    let generation = io.begin_generation();
    if !io.set_status(WsConnectionStatus::Connected).await {
        return Ok(SessionExit::Shutdown);
    }
    tracing::info!(url = %config.url, attempt, generation, "WebSocket connected");

    let (mut write, mut read) = ws_stream.split();
    let start = tokio::time::Instant::now() + config.ping_interval;
    let mut ping = tokio::time::interval_at(start, config.ping_interval);
    let idle_limit = config.ping_interval * IDLE_PING_INTERVALS;
    let mut last_inbound = tokio::time::Instant::now();

    loop {
        tokio::select! {
            msg = read.next() => {
                if let Some(Ok(_)) = &msg {
                    last_inbound = tokio::time::Instant::now();
                }
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if io.event_tx.send(SessionEvent::Frame(text)).await.is_err() {
                            return Ok(SessionExit::Shutdown);
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if io.event_tx.send(SessionEvent::Frame(text)).await.is_err() {
                                return Ok(SessionExit::Shutdown);
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        return Err(AppError::WebSocket(format!("closed by peer: {:?}", frame)));
                    }
                    // pongs only refresh `last_inbound`; tungstenite answers pings itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(AppError::WebSocket("stream ended".to_string())),
                }
            }
            Some(frame) = io.outbound_rx.recv() => {
                write.send(Message::Text(frame)).await?;
            }
            Some(control) = io.control_rx.recv() => {
                match control {
                    Control::Reconnect => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionExit::Restart);
                    }
                }
            }
            _ = ping.tick() => {
                let idle = last_inbound.elapsed();
                if idle >= idle_limit {
                    return Err(AppError::WebSocket(format!(
                        "no inbound traffic for {}ms",
                        idle.as_millis()
                    )));
                }
                write.send(Message::Ping(Vec::new())).await?;
            }
            _ = io.shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionExit::Shutdown);
            }
        }
    }
}
