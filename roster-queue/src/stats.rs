use serde::Serialize;

/// Snapshot published by the dispatcher after every state change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Waiting to be scheduled.
    pub pending: usize,
    /// Waiting out a retry backoff.
    pub delayed: usize,
    /// Held in batch buffers.
    pub batched: usize,
    pub running: usize,
    /// Highest `running` seen since start.
    pub peak_running: usize,
    pub completed: u64,
    pub failed: u64,
    /// Includes overflow evictions and shutdown.
    pub cancelled: u64,
    pub throttled: u64,
    /// Attempts re-queued after a retryable failure.
    pub retried: u64,
    pub paused: bool,
}

impl QueueStats {
    /// Requests accepted but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.pending + self.delayed + self.batched + self.running
    }
}
