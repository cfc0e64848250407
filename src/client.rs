use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{AnalysisConfig, DerivConfig};
use crate::deriv::correlator::RequestCorrelator;
use crate::deriv::ws::{SessionConfig, SessionEvent, SessionHandle, WsSession};
use crate::error::AppError;
use crate::event::{AppEvent, WsConnectionStatus};
use crate::feed::{FeedOutcome, FeedUpdate, TickFeed};

const SESSION_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub symbol: String,
    pub capacity: usize,
    pub reference_digit: Option<u8>,
    pub recent_digits: usize,
    pub request_timeout: Option<Duration>,
}

impl FeedOptions {
    pub fn from_config(deriv: &DerivConfig, analysis: &AnalysisConfig) -> Self {
        Self {
            symbol: deriv.symbol.trim().to_string(),
            capacity: deriv.tick_count,
            reference_digit: analysis.reference_digit,
            recent_digits: analysis.recent_digits,
            request_timeout: deriv.request_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    Subscribe { symbol: String, capacity: usize },
    ChangeSymbol(String),
    SelectDigit(Option<u8>),
}

/// Consumer side of a [`FeedClient`].
///
/// Status changes and subscription errors are delivered one by one, in order.
/// Window updates are coalesced: a slow consumer sees only the newest one.
pub struct FeedEvents {
    control_rx: mpsc::UnboundedReceiver<AppEvent>,
    update_rx: watch::Receiver<Option<FeedUpdate>>,
    updates_open: bool,
}

impl FeedEvents {
    /// Next event, or `None` once the client has shut down. Pending status and
    /// error events are always returned before the latest window update.
    pub async fn recv(&mut self) -> Option<AppEvent> {
        loop {
            tokio::select! {
                biased;
                event = self.control_rx.recv() => return event,
                changed = self.update_rx.changed(), if self.updates_open => match changed {
                    Ok(()) => {
                        let latest = self.update_rx.borrow_and_update().clone();
                        if let Some(update) = latest {
                            return Some(AppEvent::FeedUpdate(update));
                        }
                    }
                    Err(_) => self.updates_open = false,
                },
            }
        }
    }

    /// Newest window update without waiting.
    pub fn latest_update(&self) -> Option<FeedUpdate> {
        self.update_rx.borrow().clone()
    }
}

/// Consumer-facing entry point: one upstream connection, one live tick
/// subscription, and correlated calls sharing the same socket.
pub struct FeedClient {
    session: WsSession,
    handle: SessionHandle,
    correlator: Arc<RequestCorrelator>,
    command_tx: mpsc::UnboundedSender<FeedCommand>,
    dispatcher: JoinHandle<()>,
}

impl FeedClient {
    /// Connect and subscribe to `options.symbol` as soon as the socket opens.
    /// Updates and connectivity changes arrive on the returned [`FeedEvents`].
    pub fn start(
        session_config: SessionConfig,
        options: FeedOptions,
    ) -> Result<(Self, FeedEvents), AppError> {
        validate_symbol(&options.symbol)?;
        validate_capacity(options.capacity)?;
        if let Some(digit) = options.reference_digit {
            validate_digit(digit)?;
        }

        let (session_tx, session_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tracing::info!(
            url = %session_config.url,
            symbol = %options.symbol,
            capacity = options.capacity,
            "Starting tick feed client"
        );
        let session = WsSession::spawn(session_config, session_tx);
        let handle = session.handle();
        let correlator = Arc::new(RequestCorrelator::new(
            Arc::new(handle.clone()),
            options.request_timeout,
        ));

        let dispatcher = Dispatcher {
            feed: TickFeed::new(options.symbol, options.capacity),
            sender: handle.clone(),
            correlator: correlator.clone(),
            control_tx,
            update_tx,
            reference_digit: options.reference_digit,
            recent_digits: options.recent_digits,
        };
        let dispatcher = tokio::spawn(dispatcher.run(session_rx, command_rx));

        Ok((
            Self {
                session,
                handle,
                correlator,
                command_tx,
                dispatcher,
            },
            FeedEvents {
                control_rx,
                update_rx,
                updates_open: true,
            },
        ))
    }

    pub fn subscribe(&self, symbol: &str, capacity: usize) -> Result<(), AppError> {
        validate_symbol(symbol)?;
        validate_capacity(capacity)?;
        self.command(FeedCommand::Subscribe {
            symbol: symbol.trim().to_string(),
            capacity,
        })
    }

    pub fn change_symbol(&self, symbol: &str) -> Result<(), AppError> {
        validate_symbol(symbol)?;
        self.command(FeedCommand::ChangeSymbol(symbol.trim().to_string()))
    }

    /// Set or clear the digit used for the over/under/equal comparison.
    pub fn select_digit(&self, digit: Option<u8>) -> Result<(), AppError> {
        if let Some(digit) = digit {
            validate_digit(digit)?;
        }
        self.command(FeedCommand::SelectDigit(digit))
    }

    pub fn connection_status(&self) -> watch::Receiver<WsConnectionStatus> {
        self.handle.watch_status()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn reconnect(&self) -> Result<(), AppError> {
        self.handle.reconnect()
    }

    /// One-shot request/response exchange over the feed socket.
    pub async fn call(&self, purpose: &str, payload: Value) -> Result<Value, AppError> {
        self.correlator.call(purpose, payload).await
    }

    pub fn correlator(&self) -> Arc<RequestCorrelator> {
        self.correlator.clone()
    }

    /// Close the connection for good and wait for the background tasks.
    pub async fn shutdown(self) {
        self.session.shutdown().await;
        if let Err(e) = self.dispatcher.await {
            tracing::warn!(error = %e, "Feed dispatcher ended abnormally");
        }
    }

    fn command(&self, command: FeedCommand) -> Result<(), AppError> {
        self.command_tx
            .send(command)
            .map_err(|_| AppError::SessionClosed)
    }
}

fn validate_symbol(symbol: &str) -> Result<(), AppError> {
    if symbol.trim().is_empty() {
        return Err(AppError::InvalidArgument("symbol must not be empty".to_string()));
    }
    Ok(())
}

fn validate_capacity(capacity: usize) -> Result<(), AppError> {
    if capacity == 0 {
        return Err(AppError::InvalidArgument(
            "window capacity must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_digit(digit: u8) -> Result<(), AppError> {
    if digit > 9 {
        return Err(AppError::InvalidArgument(format!(
            "reference digit must be 0..=9, got {}",
            digit
        )));
    }
    Ok(())
}

/// Single consumer of session events and the only writer of the feed window.
struct Dispatcher {
    feed: TickFeed,
    sender: SessionHandle,
    correlator: Arc<RequestCorrelator>,
    control_tx: mpsc::UnboundedSender<AppEvent>,
    update_tx: watch::Sender<Option<FeedUpdate>>,
    reference_digit: Option<u8>,
    recent_digits: usize,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut session_rx: mpsc::Receiver<SessionEvent>,
        mut command_rx: mpsc::UnboundedReceiver<FeedCommand>,
    ) {
        loop {
            tokio::select! {
                event = session_rx.recv() => match event {
                    Some(event) => self.on_session_event(event),
                    None => break,
                },
                Some(command) = command_rx.recv() => self.on_command(command),
            }
        }
        let orphaned = self.correlator.fail_all();
        tracing::debug!(orphaned, "Feed dispatcher stopped");
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::State(status) => {
                self.emit(AppEvent::WsStatus(status));
                match status {
                    WsConnectionStatus::Connected => {
                        if let Err(e) = self.feed.on_connected(&self.sender) {
                            tracing::warn!(error = %e, "Failed to re-issue tick subscription");
                        }
                    }
                    WsConnectionStatus::Connecting | WsConnectionStatus::Disconnected => {}
                }
            }
            SessionEvent::Closed { generation } => {
                let failed = self.correlator.fail_connection(generation);
                if failed > 0 {
                    tracing::warn!(failed, generation, "Rejected pending requests after disconnect");
                }
            }
            SessionEvent::Frame(text) => self.on_frame(&text),
        }
    }

    fn on_frame(&mut self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed frame");
                return;
            }
        };
        if self.correlator.resolve(&frame) {
            return;
        }
        match self.feed.apply_frame(&self.sender, &frame) {
            FeedOutcome::Updated => self.emit_update(),
            FeedOutcome::Ignored => {}
            FeedOutcome::Rejected { symbol, error } => {
                self.emit(AppEvent::SubscriptionError {
                    symbol,
                    message: error.to_string(),
                });
            }
        }
    }

    fn on_command(&mut self, command: FeedCommand) {
        let result = match command {
            FeedCommand::Subscribe { symbol, capacity } => {
                self.feed.subscribe(&self.sender, &symbol, capacity)
            }
            FeedCommand::ChangeSymbol(symbol) => {
                tracing::info!(from = %self.feed.symbol(), to = %symbol, "Changing symbol");
                self.feed.change_symbol(&self.sender, &symbol)
            }
            FeedCommand::SelectDigit(digit) => {
                self.reference_digit = digit;
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(AppError::InvalidArgument(message)) => {
                tracing::warn!(message = %message, "Ignoring invalid feed command");
                return;
            }
            Err(AppError::NotConnected) => {
                tracing::info!(
                    symbol = %self.feed.symbol(),
                    "Not connected, subscription will be issued on connect"
                );
            }
            Err(e) => tracing::warn!(error = %e, "Feed command failed to reach upstream"),
        }
        self.emit_update();
    }

    /// Replaces any update the consumer has not picked up yet.
    fn emit_update(&self) {
        let update =
            FeedUpdate::from_snapshot(self.feed.snapshot(), self.reference_digit, self.recent_digits);
        self.update_tx.send_replace(Some(update));
    }

    fn emit(&self, event: AppEvent) {
        if self.control_tx.send(event).is_err() {
            tracing::trace!("Event consumer gone");
        }
    }
}
