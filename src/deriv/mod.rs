pub mod api;
pub mod correlator;
pub mod types;
pub mod ws;

pub use correlator::RequestCorrelator;
pub use ws::{FrameSender, SessionConfig, SessionEvent, SessionHandle, WsSession};
