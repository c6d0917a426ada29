use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, RpcError};

type Outcome = Result<Value>;

/// One outstanding request: the reply slot the caller waits on.
struct PendingCall {
    method: String,
    issued_at: Instant,
    reply: SyncSender<Outcome>,
}

/// Outstanding requests keyed by id.
///
/// An entry is removed when it is settled, so each call settles at most once.
#[derive(Default)]
pub struct CorrelationTable {
    entries: HashMap<u64, PendingCall>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and return the handle its caller waits on.
    ///
    /// Replaces (and abandons) any entry already stored under `id`; callers
    /// never reuse ids, so that only happens through misuse.
    pub fn insert(&mut self, id: u64, method: &str) -> PendingReply {
        let (tx, rx) = mpsc::sync_channel(1);
        self.entries.insert(
            id,
            PendingCall {
                method: method.to_string(),
                issued_at: Instant::now(),
                reply: tx,
            },
        );
        PendingReply {
            id,
            method: method.to_string(),
            rx,
        }
    }

    /// Remove the entry for `id` and deliver `outcome` to its caller.
    ///
    /// Returns `false` when no call with that id is pending.
    pub fn settle(&mut self, id: u64, outcome: Outcome) -> bool {
        let Some(call) = self.entries.remove(&id) else {
            return false;
        };
        let ok = outcome.is_ok();
        if call.reply.send(outcome).is_err() {
            debug!(id, method = %call.method, "reply dropped; caller stopped waiting");
        }
        debug!(
            id,
            method = %call.method,
            ok,
            elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
            "call settled"
        );
        true
    }

    /// Drop the entry for `id` without settling it.
    pub fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Settle every pending call with an error built by `make_err`.
    ///
    /// Returns how many calls were rejected. The table is empty afterwards.
    pub fn fail_all(&mut self, make_err: impl Fn() -> RpcError) -> usize {
        let count = self.entries.len();
        for (id, call) in self.entries.drain() {
            let _ = call.reply.send(Err(make_err()));
            debug!(id, method = %call.method, "call rejected");
        }
        count
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending ids, sorted.
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.ids())
            .finish()
    }
}

/// Caller's handle on an outstanding call.
///
/// Waiting has no built-in deadline. Use [`PendingReply::wait_timeout`] to
/// bound it; a timed-out call stays pending and can be waited on again.
#[derive(Debug)]
pub struct PendingReply {
    id: u64,
    method: String,
    rx: Receiver<Outcome>,
}

impl PendingReply {
    /// Request id of this call.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Method name of this call.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Block until the call settles.
    pub fn wait(self) -> Result<Value> {
        self.rx.recv().unwrap_or(Err(RpcError::Abandoned))
    }

    /// Block until the call settles or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Value> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(RpcError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::Abandoned),
        }
    }

    /// Take the outcome if the call has already settled.
    pub fn try_result(&self) -> Option<Result<Value>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(RpcError::Abandoned)),
        }
    }
}
