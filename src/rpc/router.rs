//! Request/response correlation
//!
//! The [`Router`] owns two tables:
//! - outbound calls waiting for a response ([`PendingRequest`]), keyed by id
//! - inbound calls and whether they have received their one terminal answer
//!
//! It does no I/O and no locking of its own; the interactor keeps it behind
//! its state lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use super::{Outcome, Response};
use crate::error::{InteractorError, Result};

/// Monotonic request id source
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Ids start at `first` and increase by one
    pub fn starting_at(first: u64) -> Self {
        IdGenerator {
            next: AtomicU64::new(first),
        }
    }

    /// Seed from the wall clock in microseconds, so ids stay unique across
    /// reconnects of the same session
    pub fn from_clock() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(1);
        Self::starting_at(micros)
    }

    /// Take the next id
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_clock()
    }
}

/// What a pending call resolves to
pub type CallResult = Result<Value>;

/// An outbound call awaiting its response
#[derive(Debug)]
pub struct PendingRequest {
    /// Request id
    pub id: u64,
    /// Method that was called
    pub method: String,
    /// When the call was registered
    pub sent_at: Instant,
    responder: oneshot::Sender<CallResult>,
}

impl PendingRequest {
    fn complete(self, result: CallResult) {
        // the caller may have stopped waiting
        let _ = self.responder.send(result);
    }
}

/// Outcome of feeding a response to the router
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A pending call was completed
    Fulfilled {
        /// Method of the completed call
        method: String,
        /// Round trip time
        elapsed: Duration,
    },
    /// No call with this id is outstanding
    Unmatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundState {
    Open,
    Answered,
}

/// Answered inbound ids remembered for duplicate detection
pub const ANSWERED_WINDOW: usize = 1024;

/// Correlation tables for one session
#[derive(Debug, Default)]
pub struct Router {
    pending: HashMap<u64, PendingRequest>,
    inbound: HashMap<u64, InboundState>,
    // oldest first, trimmed to ANSWERED_WINDOW
    answered: VecDeque<u64>,
}

impl Router {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outbound call; the receiver resolves with its response.
    pub fn register(
        &mut self,
        id: u64,
        method: impl Into<String>,
    ) -> Result<oneshot::Receiver<CallResult>> {
        if self.pending.contains_key(&id) {
            return Err(InteractorError::InvalidState(format!(
                "request id {id} is already outstanding"
            )));
        }
        let (responder, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                id,
                method: method.into(),
                sent_at: Instant::now(),
                responder,
            },
        );
        Ok(rx)
    }

    /// Complete the pending call matching `response.id`
    pub fn resolve(&mut self, response: Response) -> Resolution {
        let Some(pending) = self.pending.remove(&response.id) else {
            return Resolution::Unmatched;
        };

        let method = pending.method.clone();
        let elapsed = pending.sent_at.elapsed();
        let result = match response.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(err) => Err(InteractorError::Rpc {
                code: err.code,
                message: err.message,
            }),
        };
        pending.complete(result);
        Resolution::Fulfilled { method, elapsed }
    }

    /// Fail a single pending call, e.g. when its publish failed
    pub fn fail(&mut self, id: u64, err: InteractorError) {
        if let Some(pending) = self.pending.remove(&id) {
            pending.complete(Err(err));
        }
    }

    /// Record an inbound call. Returns `false` for an id already seen.
    pub fn open_inbound(&mut self, id: u64) -> bool {
        if self.inbound.contains_key(&id) {
            return false;
        }
        self.inbound.insert(id, InboundState::Open);
        true
    }

    /// Claim the single terminal answer for an inbound call
    pub fn answer_inbound(&mut self, id: u64) -> Result<()> {
        match self.inbound.get_mut(&id) {
            Some(state @ InboundState::Open) => {
                *state = InboundState::Answered;
                self.remember_answered(id);
                Ok(())
            }
            Some(InboundState::Answered) => Err(InteractorError::InvalidState(format!(
                "request {id} has already been answered"
            ))),
            None => Err(InteractorError::InvalidState(format!(
                "no inbound request with id {id}"
            ))),
        }
    }

    fn remember_answered(&mut self, id: u64) {
        self.answered.push_back(id);
        while self.answered.len() > ANSWERED_WINDOW {
            let Some(oldest) = self.answered.pop_front() else {
                break;
            };
            if self.inbound.get(&oldest) == Some(&InboundState::Answered) {
                self.inbound.remove(&oldest);
            }
        }
    }

    /// Undo [`answer_inbound`](Self::answer_inbound) after the answer could
    /// not be delivered
    pub fn reopen_inbound(&mut self, id: u64) {
        if let Some(state) = self.inbound.get_mut(&id) {
            *state = InboundState::Open;
        }
    }

    /// Whether an inbound call is still waiting for its answer
    pub fn is_open(&self, id: u64) -> bool {
        self.inbound.get(&id) == Some(&InboundState::Open)
    }

    /// Number of outstanding outbound calls
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is an outstanding outbound call
    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    /// Fail every outstanding call with [`InteractorError::SessionClosed`]
    /// and abandon every unanswered inbound call. Returns how many calls
    /// were failed.
    pub fn close_all(&mut self) -> usize {
        let failed = self.pending.len();
        for (_, pending) in self.pending.drain() {
            debug!(id = pending.id, method = %pending.method, "failing pending request");
            pending.complete(Err(InteractorError::SessionClosed));
        }
        let abandoned = self
            .inbound
            .values()
            .filter(|s| **s == InboundState::Open)
            .count();
        if abandoned > 0 {
            debug!(abandoned, "abandoning unanswered inbound requests");
        }
        self.inbound.clear();
        self.answered.clear();
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::error_codes;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_monotonic() {
        let ids = IdGenerator::starting_at(10);
        assert_eq!(ids.next_id(), 10);
        assert_eq!(ids.next_id(), 11);
        assert!(IdGenerator::from_clock().next_id() > 1_500_000_000_000_000);
    }

    #[test]
    fn test_ids_distinct_across_threads() {
        let ids = Arc::new(IdGenerator::starting_at(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || {
                    let taken: Vec<u64> = (0..500).map(|_| ids.next_id()).collect();
                    assert!(taken.windows(2).all(|w| w[0] < w[1]));
                    taken
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "id {id} handed out twice");
            }
        }
        assert_eq!(all.len(), 4000);
    }

    #[tokio::test]
    async fn test_resolve_success_and_error() {
        let mut router = Router::new();
        let ok = router.register(1, "eth_chainId").unwrap();
        let err = router.register(2, "eth_sign").unwrap();
        assert_eq!(router.pending_len(), 2);

        // completes out of order
        let res = router.resolve(Response::error(2, error_codes::SERVER_ERROR, "User canceled"));
        assert!(matches!(res, Resolution::Fulfilled { ref method, .. } if method == "eth_sign"));
        assert!(matches!(router.resolve(Response::success(1, json!("0x1"))), Resolution::Fulfilled { .. }));

        assert_eq!(ok.await.unwrap(), Ok(json!("0x1")));
        assert_eq!(
            err.await.unwrap(),
            Err(InteractorError::Rpc {
                code: -32000,
                message: "User canceled".to_string()
            })
        );
        assert_eq!(router.pending_len(), 0);
    }

    #[test]
    fn test_unmatched_response_changes_nothing() {
        let mut router = Router::new();
        let _rx = router.register(5, "m").unwrap();

        assert_eq!(router.resolve(Response::success(6, json!(true))), Resolution::Unmatched);
        assert!(router.is_pending(5));
        assert_eq!(router.pending_len(), 1);
    }

    #[test]
    fn test_duplicate_outstanding_id_rejected() {
        let mut router = Router::new();
        let _rx = router.register(5, "m").unwrap();
        assert!(matches!(router.register(5, "m"), Err(InteractorError::InvalidState(_))));
    }

    #[test]
    fn test_inbound_answered_once() {
        let mut router = Router::new();
        assert!(router.open_inbound(42));
        assert!(!router.open_inbound(42));

        router.answer_inbound(42).unwrap();
        assert!(matches!(router.answer_inbound(42), Err(InteractorError::InvalidState(_))));

        router.reopen_inbound(42);
        assert!(router.is_open(42));
        router.answer_inbound(42).unwrap();

        assert!(matches!(router.answer_inbound(7), Err(InteractorError::InvalidState(_))));
    }

    #[test]
    fn test_answered_ids_are_bounded() {
        let mut router = Router::new();
        let total = ANSWERED_WINDOW as u64 + 500;
        for id in 0..total {
            assert!(router.open_inbound(id));
            router.answer_inbound(id).unwrap();
        }
        assert_eq!(router.inbound.len(), ANSWERED_WINDOW);

        // recent answers are still refused a second time
        assert!(matches!(
            router.answer_inbound(total - 1),
            Err(InteractorError::InvalidState(_))
        ));
        assert!(!router.open_inbound(total - 1));

        // open calls are never evicted
        assert!(router.open_inbound(total));
        for id in total + 1..total + 1 + ANSWERED_WINDOW as u64 {
            router.open_inbound(id);
            router.answer_inbound(id).unwrap();
        }
        assert!(router.is_open(total));
    }

    #[tokio::test]
    async fn test_close_all_fails_everything() {
        let mut router = Router::new();
        let receivers: Vec<_> = (0..3).map(|i| router.register(i, "m").unwrap()).collect();
        router.open_inbound(99);

        assert_eq!(router.close_all(), 3);
        assert_eq!(router.pending_len(), 0);
        assert!(!router.is_open(99));

        for rx in receivers {
            assert_eq!(rx.await.unwrap(), Err(InteractorError::SessionClosed));
        }
    }

    #[tokio::test]
    async fn test_fail_single() {
        let mut router = Router::new();
        let rx = router.register(1, "m").unwrap();
        router.fail(1, InteractorError::SessionClosed);
        assert_eq!(rx.await.unwrap(), Err(InteractorError::SessionClosed));
    }
}
