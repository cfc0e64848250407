use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::types::ApiErrorPayload;
use super::ws::FrameSender;
use crate::error::AppError;

type Reply = Result<Value, AppError>;

struct PendingCall {
    /// Connection the request went out on. `None` until the send returns.
    generation: Option<u64>,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<String, PendingCall>,
    /// Highest connection generation known to be closed.
    closed_generation: u64,
}

/// Matches responses on the shared socket to the call that requested them,
/// keyed by the `req_id` echoed back by the upstream.
pub struct RequestCorrelator {
    sender: Arc<dyn FrameSender>,
    pending: Mutex<PendingTable>,
    sequence: AtomicU64,
    timeout: Option<Duration>,
}

/// Removes a registration when the waiting call finishes, times out, or is dropped.
struct PendingSlot<'a> {
    pending: &'a Mutex<PendingTable>,
    req_id: String,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().calls.remove(&self.req_id);
    }
}

impl RequestCorrelator {
    pub fn new(sender: Arc<dyn FrameSender>, timeout: Option<Duration>) -> Self {
        Self {
            sender,
            pending: Mutex::new(PendingTable::default()),
            sequence: AtomicU64::new(0),
            timeout,
        }
    }

    /// `<purpose>_<epoch ms>_<seq>`. The sequence keeps ids unique within one millisecond.
    fn next_req_id(&self, purpose: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}_{}_{}",
            purpose,
            chrono::Utc::now().timestamp_millis(),
            seq
        )
    }

    /// Send `payload` with a fresh `req_id` and wait for the matching response frame.
    ///
    /// Resolves with the full response frame. A frame carrying `error` rejects the
    /// call with [`AppError::DerivApi`]. Losing the connection the request went out
    /// on rejects it with [`AppError::ConnectionLost`], see
    /// [`RequestCorrelator::fail_connection`].
    pub async fn call(&self, purpose: &str, payload: Value) -> Result<Value, AppError> {
        let Value::Object(mut body) = payload else {
            return Err(AppError::InvalidArgument(
                "correlated request payload must be a JSON object".to_string(),
            ));
        };
        let req_id = self.next_req_id(purpose);
        body.insert("req_id".to_string(), Value::String(req_id.clone()));
        let frame = serde_json::to_string(&body)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().calls.insert(
            req_id.clone(),
            PendingCall {
                generation: None,
                tx,
            },
        );
        let _slot = PendingSlot {
            pending: &self.pending,
            req_id: req_id.clone(),
        };

        let generation = self.sender.send_tracked(frame)?;
        {
            let mut table = self.pending.lock();
            if generation <= table.closed_generation && generation > 0 {
                tracing::debug!(req_id = %req_id, generation, "Request went out on a closed connection");
                return Err(AppError::ConnectionLost { req_id });
            }
            if let Some(call) = table.calls.get_mut(&req_id) {
                call.generation = Some(generation);
            }
        }
        tracing::debug!(req_id = %req_id, purpose, generation, "Correlated request sent");

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::warn!(req_id = %req_id, purpose, "Correlated request timed out");
                    return Err(AppError::Timeout {
                        req_id,
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };

        match reply {
            Ok(reply) => reply,
            Err(_) => Err(AppError::ConnectionLost { req_id }),
        }
    }

    /// Hand `frame` to its waiting call. Returns `false` when no outstanding call
    /// owns the frame's `req_id`, so the caller can route it elsewhere.
    pub fn resolve(&self, frame: &Value) -> bool {
        let Some(req_id) = frame.get("req_id").and_then(req_id_key) else {
            return false;
        };
        let Some(call) = self.pending.lock().calls.remove(&req_id) else {
            return false;
        };

        let reply = match frame.get("error") {
            Some(error) => {
                let payload = serde_json::from_value::<ApiErrorPayload>(error.clone())
                    .unwrap_or_else(|_| ApiErrorPayload {
                        code: "UnknownError".to_string(),
                        message: error.to_string(),
                    });
                Err(payload.into())
            }
            None => Ok(frame.clone()),
        };
        if call.tx.send(reply).is_err() {
            tracing::debug!(req_id = %req_id, "Response arrived after caller gave up");
        }
        true
    }

    /// Reject the calls sent on connection `generation` or earlier. The upstream
    /// never answers requests from a closed socket. Calls already sent on a newer
    /// connection stay pending.
    pub fn fail_connection(&self, generation: u64) -> usize {
        let failed: Vec<(String, PendingCall)> = {
            let mut table = self.pending.lock();
            table.closed_generation = table.closed_generation.max(generation);
            let stale: Vec<String> = table
                .calls
                .iter()
                .filter(|(_, call)| call.generation.is_some_and(|g| g <= generation))
                .map(|(req_id, _)| req_id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|req_id| table.calls.remove_entry(&req_id))
                .collect()
        };
        reject(failed)
    }

    /// Reject every outstanding call regardless of connection.
    pub fn fail_all(&self) -> usize {
        let failed: Vec<(String, PendingCall)> = self.pending.lock().calls.drain().collect();
        reject(failed)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().calls.len()
    }
}

fn reject(calls: Vec<(String, PendingCall)>) -> usize {
    let count = calls.len();
    for (req_id, call) in calls {
        let _ = call.tx.send(Err(AppError::ConnectionLost { req_id }));
    }
    count
}

fn req_id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract the payload field named after the request type, e.g. `authorize`.
pub fn response_field(frame: &Value, field: &str) -> Result<Value, AppError> {
    frame.get(field).cloned().ok_or_else(|| AppError::DerivApi {
        code: "MissingField".to_string(),
        message: format!("response has no `{}` field", field),
    })
}
