use crate::feed::FeedUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl WsConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Events delivered to consumers of [`crate::client::FeedClient`].
#[derive(Debug, Clone)]
pub enum AppEvent {
    WsStatus(WsConnectionStatus),
    /// Produced after every window mutation and after a comparison digit change.
    /// Coalesced: a consumer that falls behind receives only the newest.
    FeedUpdate(FeedUpdate),
    /// Upstream refused the history/subscribe request for the active symbol.
    SubscriptionError { symbol: String, message: String },
}
