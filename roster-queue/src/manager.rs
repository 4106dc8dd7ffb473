//! Request queue manager.
//!
//! One dispatcher task owns every queue map. [`RequestQueue`] handles talk to
//! it over a bounded command channel; attempts run in their own tasks and
//! report back over an unbounded completion channel so the dispatcher never
//! waits on itself.
use std::{any::Any, collections::HashMap, future::Future, time::Duration};

use derive_builder::Builder;
use futures::{FutureExt, future::BoxFuture};
use indexmap::IndexMap;
use roster_resilience::{CancelReason, RequestError, RetryPolicy};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, MissedTickBehavior, interval, sleep_until, timeout},
};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    EnqueueOptions, Priority, QueueError, QueueStats, QueuedRequest, RequestId,
    throttle::{PatternRule, Throttle, ThrottleRule},
};

type BoxedOutput = Box<dyn Any + Send>;
type AttemptResult = Result<BoxedOutput, RequestError>;
type Operation = Box<dyn Fn() -> BoxFuture<'static, AttemptResult> + Send>;
type Reply = oneshot::Sender<AttemptResult>;

#[derive(Builder, Clone, Debug)]
#[builder(public, setter(into), default)]
pub struct QueueOptions {
    pub max_concurrent: usize,
    pub max_concurrent_per_endpoint: usize,
    /// Pending capacity; batched and delayed requests are not counted.
    pub max_queue_size: usize,
    pub default_timeout: Duration,
    /// `max_retries` is the default per-request retry budget.
    pub retry: RetryPolicy,
    pub batching: bool,
    pub batch_window: Duration,
    pub boost_interval: Duration,
    pub aging_tick: Duration,
    pub throttle: ThrottleRule,
    pub pattern_throttles: Vec<PatternRule>,
    pub command_buffer: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            max_concurrent_per_endpoint: 4,
            max_queue_size: 100,
            default_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            batching: true,
            batch_window: Duration::from_millis(50),
            boost_interval: Duration::from_secs(10),
            aging_tick: Duration::from_secs(1),
            throttle: ThrottleRule::default(),
            pattern_throttles: Vec::new(),
            command_buffer: 256,
        }
    }
}

impl QueueOptions {
    pub fn builder() -> QueueOptionsBuilder {
        QueueOptionsBuilder::default()
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.max_concurrent == 0 || self.max_concurrent_per_endpoint == 0 {
            return Err(QueueError::Invalid(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(QueueError::Invalid("max_queue_size must be at least 1".to_string()));
        }
        if self.aging_tick.is_zero() {
            return Err(QueueError::Invalid("aging_tick must be positive".to_string()));
        }
        Ok(())
    }
}

enum Command {
    Enqueue {
        options: EnqueueOptions,
        operation: Operation,
        reply: Reply,
    },
    CancelByTag {
        tag: String,
        reply: oneshot::Sender<usize>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct Completion {
    id: RequestId,
    result: AttemptResult,
}

struct Entry {
    request: QueuedRequest,
    operation: Operation,
    reply: Reply,
    /// Arrival order, used to break priority ties.
    seq: u64,
}

impl Entry {
    fn resolve(self, result: AttemptResult) {
        // the caller may have stopped waiting
        let _ = self.reply.send(result);
    }
}

struct Batch {
    flush_at: Instant,
    entries: Vec<Entry>,
}

/// Cloneable handle to the queue dispatcher.
#[derive(Clone, Debug)]
pub struct RequestQueue {
    tx: mpsc::Sender<Command>,
    stats: watch::Receiver<QueueStats>,
}

impl RequestQueue {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn spawn(options: QueueOptions) -> Result<Self, QueueError> {
        options.validate()?;
        let throttle = Throttle::new(options.throttle.clone(), &options.pattern_throttles)?;

        let (tx, rx) = mpsc::channel(options.command_buffer.max(1));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(QueueStats::default());

        let dispatcher = Dispatcher {
            options,
            throttle,
            pending: Vec::new(),
            delayed: Vec::new(),
            batches: IndexMap::new(),
            running: HashMap::new(),
            running_per_endpoint: HashMap::new(),
            paused: false,
            next_seq: 0,
            stats: QueueStats::default(),
            stats_tx,
            completion_tx,
        };
        tokio::spawn(dispatcher.run(rx, completion_rx));

        Ok(Self {
            tx,
            stats: stats_rx,
        })
    }

    /// Schedule `operation` and wait for its final outcome.
    ///
    /// The operation is invoked once per attempt; retryable failures are
    /// re-queued after a backoff until the request's retry budget is spent.
    pub async fn enqueue<T, F, Fut>(
        &self,
        options: EnqueueOptions,
        operation: F,
    ) -> Result<T, RequestError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        let operation: Operation = Box::new(move || {
            let attempt = operation();
            async move { attempt.await.map(|value| Box::new(value) as BoxedOutput) }.boxed()
        });

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Enqueue {
                options,
                operation,
                reply,
            })
            .await
            .map_err(|_| RequestError::Cancelled(CancelReason::Shutdown))?;

        let output = rx
            .await
            .map_err(|_| RequestError::Cancelled(CancelReason::Shutdown))??;
        output.downcast::<T>().map(|value| *value).map_err(|_| {
            RequestError::Internal("queued operation produced an unexpected type".to_string())
        })
    }

    /// Cancel every outstanding request carrying `tag`; returns how many.
    pub async fn cancel_by_tag(&self, tag: impl Into<String>) -> usize {
        let (reply, rx) = oneshot::channel();
        let command = Command::CancelByTag {
            tag: tag.into(),
            reply,
        };
        if self.tx.send(command).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Stop admitting and scheduling. Returns once the dispatcher has
    /// applied it, so [`RequestQueue::is_paused`] already reflects it.
    pub async fn pause(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Pause { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn resume(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Resume { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Cancel everything outstanding and stop the dispatcher.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn stats(&self) -> watch::Receiver<QueueStats> {
        self.stats.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.stats.borrow().paused
    }
}

struct Dispatcher {
    options: QueueOptions,
    throttle: Throttle,
    pending: Vec<Entry>,
    /// Retries waiting for their backoff to elapse.
    delayed: Vec<(Instant, Entry)>,
    batches: IndexMap<String, Batch>,
    running: HashMap<RequestId, Entry>,
    running_per_endpoint: HashMap<String, usize>,
    paused: bool,
    next_seq: u64,
    stats: QueueStats,
    stats_tx: watch::Sender<QueueStats>,
    completion_tx: mpsc::UnboundedSender<Completion>,
}

impl Dispatcher {
    #[instrument(skip_all)]
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let mut aging = interval(self.options.aging_tick);
        aging.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            max_concurrent = self.options.max_concurrent,
            max_queue_size = self.options.max_queue_size,
            "request queue started"
        );

        loop {
            let deadline = self.next_deadline();
            let has_deadline = deadline.is_some();
            let deadline = deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;
                Some(completion) = completions.recv() => {
                    self.handle_completion(completion);
                }
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown { reply }) => {
                            self.cancel_all(CancelReason::Shutdown);
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            trace!("all queue handles dropped");
                            self.cancel_all(CancelReason::Shutdown);
                            break;
                        }
                    }
                }
                _ = sleep_until(deadline), if has_deadline => {
                    self.fire_timers(Instant::now());
                }
                _ = aging.tick() => {
                    self.age_pending(Instant::now());
                }
            }

            self.schedule();
            self.publish();
        }

        info!("request queue stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue {
                options,
                operation,
                reply,
            } => self.admit(options, operation, reply),
            Command::CancelByTag { tag, reply } => {
                let cancelled = self.cancel_by_tag(&tag);
                let _ = reply.send(cancelled);
            }
            Command::Pause { reply } => {
                self.paused = true;
                self.publish();
                info!("request queue paused");
                let _ = reply.send(());
            }
            Command::Resume { reply } => {
                self.paused = false;
                self.schedule();
                self.publish();
                info!("request queue resumed");
                let _ = reply.send(());
            }
            // handled by the loop
            Command::Shutdown { .. } => {}
        }
    }

    fn admit(&mut self, options: EnqueueOptions, operation: Operation, reply: Reply) {
        if self.paused {
            let _ = reply.send(Err(RequestError::Paused));
            return;
        }

        let now = Instant::now();
        if let Err(limit) = self.throttle.try_admit(&options.url, now) {
            self.stats.throttled += 1;
            warn!(url = %options.url, limit = %limit, "request throttled");
            let _ = reply.send(Err(RequestError::Throttled(limit)));
            return;
        }

        let request = QueuedRequest::new(
            options,
            self.options.default_timeout,
            self.options.retry.max_retries,
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = Entry {
            request,
            operation,
            reply,
            seq,
        };
        trace!(request_id = %entry.request.id, url = %entry.request.url, priority = ?entry.request.priority, "request admitted");

        match entry.request.batch_key.clone() {
            Some(key) if self.options.batching => {
                let flush_at = now + self.options.batch_window;
                self.batches
                    .entry(key)
                    .or_insert_with(|| Batch {
                        flush_at,
                        entries: Vec::new(),
                    })
                    .entries
                    .push(entry);
            }
            _ => self.push_pending(entry),
        }
    }

    /// Add to the pending list, making room when at capacity.
    fn push_pending(&mut self, entry: Entry) {
        if self.pending.len() >= self.options.max_queue_size {
            if entry.request.priority == Priority::Low {
                warn!(request_id = %entry.request.id, "queue full, rejecting low priority request");
                self.cancel_entry(entry, CancelReason::Overflow);
                return;
            }

            let victim = self
                .pending
                .iter()
                .enumerate()
                .max_by_key(|(_, e)| (e.request.priority, e.seq))
                .map(|(idx, e)| (idx, e.request.priority));
            match victim {
                Some((idx, priority)) if priority >= entry.request.priority => {
                    let victim = self.pending.remove(idx);
                    warn!(request_id = %victim.request.id, "queue full, evicting lowest priority request");
                    self.cancel_entry(victim, CancelReason::Overflow);
                }
                _ => {
                    warn!(request_id = %entry.request.id, "queue full of higher priority requests, rejecting");
                    self.cancel_entry(entry, CancelReason::Overflow);
                    return;
                }
            }
        }
        self.pending.push(entry);
    }

    /// Start pending requests while global and per-endpoint slots allow.
    fn schedule(&mut self) {
        if self.paused {
            return;
        }
        while self.running.len() < self.options.max_concurrent {
            let next = self
                .pending
                .iter()
                .enumerate()
                .filter(|(_, e)| {
                    self.running_per_endpoint
                        .get(&e.request.endpoint)
                        .copied()
                        .unwrap_or(0)
                        < self.options.max_concurrent_per_endpoint
                })
                .min_by_key(|(_, e)| (e.request.priority, e.seq))
                .map(|(idx, _)| idx);
            let Some(idx) = next else {
                break;
            };
            let entry = self.pending.remove(idx);
            self.start(entry);
        }
    }

    fn start(&mut self, mut entry: Entry) {
        let id = entry.request.id;
        let attempt_timeout = entry.request.timeout;
        let attempt = (entry.operation)();
        let completion_tx = self.completion_tx.clone();

        let handle = tokio::spawn(async move {
            let result = match timeout(attempt_timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(RequestError::Timeout(attempt_timeout)),
            };
            let _ = completion_tx.send(Completion { id, result });
        });

        entry.request.set_running(handle.abort_handle());
        *self
            .running_per_endpoint
            .entry(entry.request.endpoint.clone())
            .or_default() += 1;
        debug!(
            request_id = %id,
            url = %entry.request.url,
            attempt = entry.request.retries + 1,
            "request started"
        );
        self.running.insert(id, entry);
        self.stats.peak_running = self.stats.peak_running.max(self.running.len());
    }

    fn release_endpoint(&mut self, endpoint: &str) {
        if let Some(count) = self.running_per_endpoint.get_mut(endpoint) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.running_per_endpoint.remove(endpoint);
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Some(mut entry) = self.running.remove(&completion.id) else {
            // cancelled while finishing
            trace!(request_id = %completion.id, "completion for untracked request");
            return;
        };
        self.release_endpoint(&entry.request.endpoint);

        match completion.result {
            Ok(value) => {
                entry.request.set_completed();
                self.stats.completed += 1;
                trace!(request_id = %entry.request.id, "request completed");
                entry.resolve(Ok(value));
            }
            Err(err) if entry.request.can_retry(&err) => {
                let delay = self
                    .options
                    .retry
                    .delay_for(entry.request.retries, self.options.retry.base_delay);
                entry.request.set_retry();
                self.stats.retried += 1;
                warn!(
                    request_id = %entry.request.id,
                    url = %entry.request.url,
                    attempt = entry.request.retries,
                    max_retries = entry.request.max_retries,
                    error = %err,
                    ?delay,
                    "request failed, retrying"
                );
                self.delayed.push((Instant::now() + delay, entry));
            }
            Err(err) => {
                entry.request.set_failed();
                self.stats.failed += 1;
                debug!(request_id = %entry.request.id, error = %err, "request failed");
                entry.resolve(Err(err));
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let retry = self.delayed.iter().map(|(due, _)| *due);
        let batch = self.batches.values().map(|batch| batch.flush_at);
        retry.chain(batch).min()
    }

    fn fire_timers(&mut self, now: Instant) {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|(due, _)| *due <= now);
        self.delayed = waiting;
        for (_, entry) in due {
            self.push_pending(entry);
        }

        let ready: Vec<String> = self
            .batches
            .iter()
            .filter(|(_, batch)| batch.flush_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in ready {
            if let Some(batch) = self.batches.shift_remove(&key) {
                debug!(batch_key = %key, size = batch.entries.len(), "flushing batch");
                for entry in batch.entries {
                    self.push_pending(entry);
                }
            }
        }
    }

    fn age_pending(&mut self, now: Instant) {
        let boost_interval = self.options.boost_interval;
        for entry in self.pending.iter_mut() {
            let request = &mut entry.request;
            if request.priority != Priority::High
                && now.duration_since(request.boosted_at) >= boost_interval
            {
                request.priority = request.priority.boosted();
                request.boosted_at = now;
                debug!(request_id = %request.id, priority = ?request.priority, "aged request boosted");
            }
        }
    }

    fn cancel_entry(&mut self, mut entry: Entry, reason: CancelReason) {
        entry.request.set_cancelled();
        self.stats.cancelled += 1;
        entry.resolve(Err(RequestError::Cancelled(reason)));
    }

    fn cancel_by_tag(&mut self, tag: &str) -> usize {
        let reason = CancelReason::Tag(tag.to_string());
        let mut matched = Vec::new();

        let (hit, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|e| e.request.has_tag(tag));
        self.pending = kept;
        matched.extend(hit);

        let (hit, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|(_, e)| e.request.has_tag(tag));
        self.delayed = kept;
        matched.extend(hit.into_iter().map(|(_, e)| e));

        for batch in self.batches.values_mut() {
            let (hit, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut batch.entries)
                .into_iter()
                .partition(|e| e.request.has_tag(tag));
            batch.entries = kept;
            matched.extend(hit);
        }
        self.batches.retain(|_, batch| !batch.entries.is_empty());

        let running: Vec<RequestId> = self
            .running
            .iter()
            .filter(|(_, e)| e.request.has_tag(tag))
            .map(|(id, _)| *id)
            .collect();
        for id in running {
            if let Some(entry) = self.running.remove(&id) {
                self.release_endpoint(&entry.request.endpoint);
                matched.push(entry);
            }
        }

        let count = matched.len();
        for entry in matched {
            self.cancel_entry(entry, reason.clone());
        }
        if count > 0 {
            info!(tag, count, "requests cancelled by tag");
        }
        count
    }

    fn cancel_all(&mut self, reason: CancelReason) {
        let mut all: Vec<Entry> = std::mem::take(&mut self.pending);
        all.extend(std::mem::take(&mut self.delayed).into_iter().map(|(_, e)| e));
        for (_, batch) in std::mem::take(&mut self.batches) {
            all.extend(batch.entries);
        }
        all.extend(std::mem::take(&mut self.running).into_values());
        self.running_per_endpoint.clear();

        for entry in all {
            self.cancel_entry(entry, reason.clone());
        }
        self.publish();
    }

    fn publish(&mut self) {
        self.stats.pending = self.pending.len();
        self.stats.delayed = self.delayed.len();
        self.stats.batched = self.batches.values().map(|b| b.entries.len()).sum();
        self.stats.running = self.running.len();
        self.stats.paused = self.paused;
        self.stats_tx.send_if_modified(|current| {
            if *current == self.stats {
                false
            } else {
                *current = self.stats.clone();
                true
            }
        });
    }
}
