use serde_json::Value;

use crate::analysis::precision::{decimal_places, MIN_DECIMAL_PLACES};
use crate::analysis::stats::DigitStats;
use crate::deriv::types::{
    ForgetRequest, HistoryResponse, InboundFrame, TickResponse, TicksHistoryRequest,
};
use crate::deriv::ws::FrameSender;
use crate::error::AppError;
use crate::model::tick::Tick;
use crate::model::window::RollingWindow;

/// Read-only copy of the window handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub symbol: String,
    /// Oldest first.
    pub ticks: Vec<Tick>,
    pub decimal_places: usize,
}

#[derive(Debug, Clone)]
pub struct FeedUpdate {
    pub snapshot: FeedSnapshot,
    pub stats: DigitStats,
}

impl FeedUpdate {
    pub fn from_snapshot(
        snapshot: FeedSnapshot,
        reference_digit: Option<u8>,
        recent_len: usize,
    ) -> Self {
        let stats = DigitStats::compute(
            &snapshot.ticks,
            snapshot.decimal_places,
            reference_digit,
            recent_len,
        );
        Self { snapshot, stats }
    }
}

#[derive(Debug)]
pub enum FeedOutcome {
    /// The window changed.
    Updated,
    /// Frame belongs to nobody here: stale symbol, old subscription, or noise.
    Ignored,
    /// Upstream refused the subscription for the active symbol.
    Rejected { symbol: String, error: AppError },
}

/// Owns the single active subscription and its rolling window.
///
/// Mutated only by the dispatcher task. A fresh subscription discards
/// increments until its snapshot arrives, so a window never mixes symbols.
#[derive(Debug)]
pub struct TickFeed {
    symbol: String,
    window: RollingWindow,
    precision: Option<usize>,
    subscription_id: Option<String>,
    awaiting_snapshot: bool,
}

impl TickFeed {
    pub fn new(symbol: impl Into<String>, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            window: RollingWindow::new(capacity),
            precision: None,
            subscription_id: None,
            awaiting_snapshot: true,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    /// Precision of the last snapshot, or the floor before any snapshot arrived.
    pub fn decimal_places(&self) -> usize {
        self.precision.unwrap_or(MIN_DECIMAL_PLACES)
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    pub fn is_awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            symbol: self.symbol.clone(),
            ticks: self.window.to_vec(),
            decimal_places: self.decimal_places(),
        }
    }

    /// Replace the active subscription. The window and precision are cleared
    /// before the request goes out, so the old symbol's statistics never leak.
    ///
    /// The local state changes even when the request cannot be sent; the
    /// subscription is then issued on the next connect.
    pub fn subscribe(
        &mut self,
        sender: &dyn FrameSender,
        symbol: &str,
        capacity: usize,
    ) -> Result<(), AppError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(AppError::InvalidArgument("symbol must not be empty".to_string()));
        }
        if capacity == 0 {
            return Err(AppError::InvalidArgument(
                "window capacity must be > 0".to_string(),
            ));
        }

        self.forget_active(sender);
        self.symbol = symbol.to_string();
        self.window.set_capacity(capacity);
        self.reset();
        self.request_history(sender)
    }

    pub fn change_symbol(&mut self, sender: &dyn FrameSender, symbol: &str) -> Result<(), AppError> {
        let capacity = self.window.capacity();
        self.subscribe(sender, symbol, capacity)
    }

    /// Re-issue the subscription on a fresh connection. Subscriptions do not
    /// survive a reconnect upstream; the window is kept until the new snapshot
    /// replaces it.
    pub fn on_connected(&mut self, sender: &dyn FrameSender) -> Result<(), AppError> {
        self.subscription_id = None;
        self.awaiting_snapshot = true;
        self.request_history(sender)
    }

    /// Apply one inbound frame. `sender` is used to cancel subscriptions that
    /// were superseded before their snapshot arrived.
    pub fn apply_frame(&mut self, sender: &dyn FrameSender, frame: &Value) -> FeedOutcome {
        match InboundFrame::classify(frame) {
            InboundFrame::History(history) => self.apply_snapshot(sender, history),
            InboundFrame::Tick(tick) => self.apply_increment(tick),
            InboundFrame::Rejected {
                msg_type,
                symbol,
                error,
            } => {
                let ours = matches!(msg_type.as_str(), "history" | "tick")
                    && symbol.as_deref() == Some(self.symbol.as_str());
                if !ours {
                    tracing::debug!(msg_type = %msg_type, code = %error.code, "Ignoring unrelated error frame");
                    return FeedOutcome::Ignored;
                }
                tracing::warn!(
                    symbol = %self.symbol,
                    code = %error.code,
                    message = %error.message,
                    "Tick subscription rejected"
                );
                FeedOutcome::Rejected {
                    symbol: self.symbol.clone(),
                    error: error.into(),
                }
            }
            InboundFrame::Other => FeedOutcome::Ignored,
        }
    }

    fn apply_snapshot(&mut self, sender: &dyn FrameSender, response: HistoryResponse) -> FeedOutcome {
        if response.echo_req.symbol() != Some(self.symbol.as_str()) {
            tracing::debug!(
                symbol = ?response.echo_req.symbol(),
                active = %self.symbol,
                "Dropping snapshot for inactive symbol"
            );
            if let Some(stale) = response.subscription {
                forget(sender, &stale.id);
            }
            return FeedOutcome::Ignored;
        }

        let ticks = Tick::from_history(&response.history.prices, &response.history.times);
        let places = decimal_places(&ticks);
        let count = ticks.len();
        self.window.replace(ticks);
        self.precision = Some(places);
        let incoming = response.subscription.map(|s| s.id);
        if let Some(previous) = self.subscription_id.take() {
            if incoming.as_deref() != Some(previous.as_str()) {
                forget(sender, &previous);
            }
        }
        self.subscription_id = incoming;
        self.awaiting_snapshot = false;

        tracing::info!(
            symbol = %self.symbol,
            count,
            decimal_places = places,
            subscription_id = ?self.subscription_id,
            "Tick snapshot applied"
        );
        FeedOutcome::Updated
    }

    fn apply_increment(&mut self, response: TickResponse) -> FeedOutcome {
        if response.tick.symbol != self.symbol {
            tracing::debug!(symbol = %response.tick.symbol, "Dropping tick for inactive symbol");
            return FeedOutcome::Ignored;
        }
        if self.awaiting_snapshot {
            tracing::debug!(symbol = %self.symbol, "Dropping tick received before snapshot");
            return FeedOutcome::Ignored;
        }
        if let (Some(active), Some(incoming)) = (&self.subscription_id, &response.subscription) {
            if *active != incoming.id {
                tracing::debug!(
                    subscription_id = %incoming.id,
                    "Dropping tick from superseded subscription"
                );
                return FeedOutcome::Ignored;
            }
        }

        self.window
            .push(Tick::new(response.tick.epoch, response.tick.quote));
        FeedOutcome::Updated
    }

    fn reset(&mut self) {
        self.window.clear();
        self.precision = None;
        self.subscription_id = None;
        self.awaiting_snapshot = true;
    }

    fn forget_active(&mut self, sender: &dyn FrameSender) {
        if let Some(id) = self.subscription_id.take() {
            forget(sender, &id);
        }
    }

    fn request_history(&self, sender: &dyn FrameSender) -> Result<(), AppError> {
        let count = self.window.capacity();
        let frame = serde_json::to_string(&TicksHistoryRequest::subscribe(&self.symbol, count))?;
        sender.send_frame(frame)?;
        tracing::info!(symbol = %self.symbol, count, "Requested tick history with live subscription");
        Ok(())
    }
}

/// Best effort. Stale frames are filtered whether or not the forget reaches upstream.
fn forget(sender: &dyn FrameSender, subscription_id: &str) {
    let sent = serde_json::to_string(&ForgetRequest {
        forget: subscription_id,
    })
    .map_err(AppError::from)
    .and_then(|frame| sender.send_frame(frame));
    match sent {
        Ok(()) => tracing::debug!(subscription_id, "Forgot tick subscription"),
        Err(e) => tracing::debug!(subscription_id, error = %e, "Could not forget subscription"),
    }
}
