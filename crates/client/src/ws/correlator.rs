//! Correlated request/response calls over the notification socket.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use fva_shared::{response_outcome, ApiError, RequestFrame};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

pub type CallResult = Result<Value, ApiError>;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `{millis}-{9 random base36 chars}`.
fn generate_request_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[derive(Default)]
struct PendingState {
    /// Text frames for the socket writer; `None` while no link is open.
    outbound: Option<mpsc::UnboundedSender<String>>,
    entries: HashMap<String, oneshot::Sender<CallResult>>,
}

/// Pending-request table. Registration, resolution and bulk rejection all
/// happen under one lock, so a call either lands in the table before a bulk
/// rejection drains it or fails with `ConnectionUnavailable`.
pub struct Correlator {
    timeout: Duration,
    state: Mutex<PendingState>,
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(PendingState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the writer of a freshly opened socket.
    pub(crate) fn open(&self, outbound: mpsc::UnboundedSender<String>) {
        self.lock().outbound = Some(outbound);
    }

    /// Detach the writer and reject every outstanding call.
    pub(crate) fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.outbound = None;
            state.entries.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(ApiError::ConnectionClosed(reason.to_string())));
        }
        if count > 0 {
            crate::log_warn!("Rejected {} pending request(s): {}", count, reason);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Send `action` and wait for the matching response, the timeout, or the
    /// loss of the connection.
    pub async fn call(&self, action: &str, data: Option<Value>) -> CallResult {
        let (request_id, rx) = self.register(action, data)?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ApiError::ConnectionClosed("request dropped".to_string())),
            Err(_) => {
                // Forget first so a late response finds nothing to resolve.
                self.lock().entries.remove(&request_id);
                crate::log_warn!("Request {} ({}) timed out", request_id, action);
                Err(ApiError::Timeout(self.timeout))
            }
        }
    }

    fn register(
        &self,
        action: &str,
        data: Option<Value>,
    ) -> Result<(String, oneshot::Receiver<CallResult>), ApiError> {
        let mut state = self.lock();
        let Some(outbound) = state.outbound.clone() else {
            return Err(ApiError::ConnectionUnavailable);
        };

        let request_id = loop {
            let id = generate_request_id();
            if !state.entries.contains_key(&id) {
                break id;
            }
        };
        let frame = serde_json::to_string(&RequestFrame::new(action, request_id.clone(), data))?;

        let (tx, rx) = oneshot::channel();
        state.entries.insert(request_id.clone(), tx);
        if outbound.send(frame).is_err() {
            state.entries.remove(&request_id);
            return Err(ApiError::ConnectionUnavailable);
        }
        crate::log_debug!("Sent request {} ({})", request_id, action);
        Ok((request_id, rx))
    }

    /// Route a response frame. Unknown or stale ids are dropped.
    pub(crate) fn resolve(&self, request_id: &str, data: Value) -> bool {
        let Some(tx) = self.lock().entries.remove(request_id) else {
            crate::log_debug!("Dropping response for unknown request {}", request_id);
            return false;
        };
        let _ = tx.send(response_outcome(data).map_err(ApiError::rejected));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn request_id_of(frame: &str) -> String {
        let frame: RequestFrame = serde_json::from_str(frame).unwrap();
        frame.request_id
    }

    #[test]
    fn request_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| generate_request_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn call_without_link_fails_immediately() {
        let correlator = Correlator::new(Duration::from_secs(10));
        assert_eq!(
            correlator.call("getUserInfo", None).await,
            Err(ApiError::ConnectionUnavailable)
        );
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_resolves_matching_call() {
        let correlator = Arc::new(Correlator::new(Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator.open(tx);

        let c = correlator.clone();
        let call = tokio::spawn(async move { c.call("getUserInfo", Some(json!({"a": 1}))).await });

        let frame = rx.recv().await.unwrap();
        let sent: RequestFrame = serde_json::from_str(&frame).unwrap();
        assert_eq!(sent.kind, "request");
        assert_eq!(sent.action, "getUserInfo");
        assert_eq!(sent.data, Some(json!({"a": 1})));

        assert!(correlator.resolve(&sent.request_id, json!({"id": "u1"})));
        assert_eq!(call.await.unwrap(), Ok(json!({"id": "u1"})));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn success_false_rejects_with_server_message() {
        let correlator = Arc::new(Correlator::new(Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator.open(tx);

        let c = correlator.clone();
        let call = tokio::spawn(async move { c.call("getUserRoutes", None).await });
        let id = request_id_of(&rx.recv().await.unwrap());
        correlator.resolve(&id, json!({"success": false, "msg": "route cache missing"}));

        assert_eq!(
            call.await.unwrap(),
            Err(ApiError::ServerRejected("route cache missing".to_string()))
        );
    }

    #[tokio::test]
    async fn stale_response_after_timeout_is_ignored() {
        let correlator = Arc::new(Correlator::new(Duration::from_millis(50)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator.open(tx);

        let result = correlator.call("getUserInfo", None).await;
        assert_eq!(result, Err(ApiError::Timeout(Duration::from_millis(50))));
        assert_eq!(correlator.pending_count(), 0);

        let id = request_id_of(&rx.recv().await.unwrap());
        assert!(!correlator.resolve(&id, json!({"id": "late"})));
    }

    #[tokio::test]
    async fn bulk_rejection_empties_table_and_closes_link() {
        let correlator = Arc::new(Correlator::new(Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator.open(tx);

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let c = correlator.clone();
                tokio::spawn(async move { c.call("getUserInfo", None).await })
            })
            .collect();
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        assert_eq!(correlator.pending_count(), 3);

        assert_eq!(correlator.reject_all("connection closed"), 3);
        for call in calls {
            assert_eq!(
                call.await.unwrap(),
                Err(ApiError::ConnectionClosed("connection closed".to_string()))
            );
        }
        assert_eq!(
            correlator.call("getUserInfo", None).await,
            Err(ApiError::ConnectionUnavailable)
        );
        // Rejecting an empty table is a no-op.
        assert_eq!(correlator.reject_all("again"), 0);
    }
}
