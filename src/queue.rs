//! Per-chain job lock.
//!
//! Entries sharing a chain run one at a time in FIFO order; different chains
//! drain independently. An id that is already queued or running is not queued
//! a second time, so a slow job absorbs the ticks that fire meanwhile.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::types::ChainId;

type JobAction = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

struct QueueEntry {
    id: String,
    action: JobAction,
}

#[derive(Default)]
struct ChainQueue {
    entries: VecDeque<QueueEntry>,
    running: Option<String>,
    executing: bool,
}

impl ChainQueue {
    fn is_pending(&self, id: &str) -> bool {
        self.running.as_deref() == Some(id) || self.entries.iter().any(|e| e.id == id)
    }
}

#[derive(Clone)]
pub struct JobQueue {
    chains: Arc<Mutex<HashMap<ChainId, ChainQueue>>>,
    timeout: Duration,
}

/// Clears the chain's executing flag if the draining future is dropped
/// mid-loop.
struct DrainGuard<'a> {
    queue: &'a JobQueue,
    chain: ChainId,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut chains = self.queue.chains.lock();
        if let Some(q) = chains.get_mut(&self.chain) {
            q.executing = false;
            q.running = None;
        }
    }
}

/// Cancels a spawned action once nothing waits on it anymore.
pub(crate) struct AbortOnDrop(pub(crate) AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl JobQueue {
    /// `timeout` bounds every single action.
    pub fn new(timeout: Duration) -> Self {
        Self {
            chains: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Queue `action` under `id` unless that id is already queued or running,
    /// then drain the chain. Returns whether the entry was accepted.
    ///
    /// If another caller is already draining this chain, this returns as soon
    /// as the entry is queued; otherwise it drains the backlog before
    /// returning.
    pub async fn enqueue<F>(&self, id: impl Into<String>, chain: ChainId, action: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let id = id.into();
        let accepted = {
            let mut chains = self.chains.lock();
            let q = chains.entry(chain).or_default();
            if q.is_pending(&id) {
                debug!(%id, %chain, "job already pending, dropping tick");
                false
            } else {
                q.entries.push_back(QueueEntry {
                    id,
                    action: Box::pin(action),
                });
                true
            }
        };
        self.drain(chain).await;
        accepted
    }

    /// Run queued entries for `chain` until the queue is empty, unless
    /// another caller is already doing so.
    pub async fn drain(&self, chain: ChainId) {
        {
            let mut chains = self.chains.lock();
            let q = chains.entry(chain).or_default();
            if q.executing || q.entries.is_empty() {
                return;
            }
            q.executing = true;
        }
        let mut guard = DrainGuard {
            queue: self,
            chain,
            armed: true,
        };

        loop {
            let entry = {
                let mut chains = self.chains.lock();
                let q = chains.entry(chain).or_default();
                match q.entries.pop_front() {
                    Some(entry) => {
                        q.running = Some(entry.id.clone());
                        entry
                    }
                    None => {
                        q.executing = false;
                        q.running = None;
                        guard.armed = false;
                        return;
                    }
                }
            };

            self.run(chain, entry).await;

            let mut chains = self.chains.lock();
            if let Some(q) = chains.get_mut(&chain) {
                q.running = None;
            }
        }
    }

    async fn run(&self, chain: ChainId, entry: QueueEntry) {
        let QueueEntry { id, action } = entry;
        debug!(%id, %chain, "job started");
        let mut handle = tokio::spawn(action);
        let _abort = AbortOnDrop(handle.abort_handle());
        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => debug!(%id, %chain, "job finished"),
            Ok(Ok(Err(e))) => error!(%id, %chain, "job failed: {e:#}"),
            Ok(Err(join_err)) if join_err.is_panic() => {
                error!(%id, %chain, "job panicked: {join_err}")
            }
            Ok(Err(join_err)) => warn!(%id, %chain, "job cancelled: {join_err}"),
            Err(_) => {
                handle.abort();
                warn!(%id, %chain, timeout_secs = self.timeout.as_secs(), "job timed out");
            }
        }
    }

    /// Entries waiting behind the running one.
    pub fn pending(&self, chain: ChainId) -> usize {
        self.chains
            .lock()
            .get(&chain)
            .map(|q| q.entries.len())
            .unwrap_or(0)
    }

    /// Whether a drain loop currently owns `chain`.
    pub fn is_executing(&self, chain: ChainId) -> bool {
        self.chains
            .lock()
            .get(&chain)
            .map(|q| q.executing)
            .unwrap_or(false)
    }
}
