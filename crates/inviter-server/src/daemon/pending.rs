//! Correlated request table.
//!
//! Maps a correlation id to the request waiting on it. Every entry is
//! consumed exactly once: by a response, an error frame, a timeout or the
//! connection teardown. Consuming an entry sends on its oneshot, so a
//! caller awaiting the receiver always wakes.

use inviter_core::{DaemonResponse, InviterError, InviterResult, RequestKind};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Completion handle returned by [`PendingTable::issue`].
pub type Completion = oneshot::Receiver<InviterResult<DaemonResponse>>;

/// A request awaiting its response.
struct PendingRequest {
    expected: RequestKind,
    responder: oneshot::Sender<InviterResult<DaemonResponse>>,
}

impl PendingRequest {
    fn settle(self, outcome: InviterResult<DaemonResponse>) {
        // The caller may have given up (dropped its receiver); nothing to do then.
        let _ = self.responder.send(outcome);
    }
}

/// Pending requests for one daemon connection.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<Uuid, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request expecting a `expected` response.
    pub fn issue(&mut self, expected: RequestKind) -> (Uuid, Completion) {
        let mut id = Uuid::new_v4();
        while self.entries.contains_key(&id) {
            id = Uuid::new_v4();
        }
        let (responder, completion) = oneshot::channel();
        self.entries.insert(
            id,
            PendingRequest {
                expected,
                responder,
            },
        );
        (id, completion)
    }

    /// Settle `id` with a response. Returns `false` if no request was pending.
    ///
    /// A response whose tag differs from the expected one settles the request
    /// with [`InviterError::InvalidResponseType`].
    pub fn resolve(&mut self, id: Uuid, response: DaemonResponse) -> bool {
        let Some(request) = self.entries.remove(&id) else {
            debug!(request_id = %id, "response for unknown request ignored");
            return false;
        };
        if response.kind() == request.expected {
            request.settle(Ok(response));
        } else {
            warn!(
                request_id = %id,
                expected = %request.expected.cmd(),
                got = %response.kind().cmd(),
                "daemon answered with the wrong response type"
            );
            request.settle(Err(InviterError::InvalidResponseType));
        }
        true
    }

    /// Settle `id` with an error. Returns `false` if no request was pending.
    pub fn reject_one(&mut self, id: Uuid, error: InviterError) -> bool {
        match self.entries.remove(&id) {
            Some(request) => {
                request.settle(Err(error));
                true
            }
            None => false,
        }
    }

    /// Settle every pending request with `error`. Returns how many were settled.
    pub fn reject_all(&mut self, error: &InviterError) -> usize {
        let count = self.entries.len();
        for (_, request) in self.entries.drain() {
            request.settle(Err(error.clone()));
        }
        count
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
