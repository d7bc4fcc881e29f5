mod emitter;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, StoreResult};
use crate::metrics::Metrics;
use crate::service::DispatchService;
use crate::store::{keys, DistributedLock};
use crate::time::now_millis;

pub use emitter::{Emitter, TracingEmitter};

/// Prefix of every poll-loop failure reported through [`Emitter::error`].
pub const ERROR_PREFIX: &str = "Error in scheduler:";

/// Lifecycle of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// No loop task is running.
    Idle,
    /// The loop task is running and will keep scheduling cycles.
    Polling,
    /// A stop was requested; the loop exits after its current step.
    Stopped,
}

/// Counts from one completed poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages returned by the due query.
    pub due: usize,
    /// Messages this dispatcher won the lock for and emitted.
    pub emitted: usize,
    /// Messages skipped because another dispatcher holds the lock.
    pub contended: usize,
}

/// Result of a call to [`Dispatcher::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another cycle was in flight, or the dispatcher is stopped.
    Skipped,
    Completed(CycleReport),
    /// The cycle was aborted; the error was reported through the emitter.
    Failed(String),
}

/// Polls the schedule for due messages and emits each one exactly once
/// across every dispatcher sharing the same store and lock backend.
///
/// A cycle fetches all messages due at the current wall-clock time, claims
/// each with `lock:{id}` and, for every claim it wins, emits the payload and
/// then removes the message. Emission happens before removal: a crash in
/// between re-emits the message on a later cycle instead of losing it.
pub struct Dispatcher {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    service: DispatchService,
    lock: Arc<dyn DistributedLock>,
    emitter: Arc<dyn Emitter>,
    metrics: Metrics,
    poll_interval: Duration,
    lock_ttl: Duration,
    store_timeout: Option<Duration>,
    state: Mutex<DispatcherState>,
    /// Set by `stop`, cleared only by `start`. Outlives the loop task so a
    /// stopped dispatcher keeps refusing manual polls.
    stop_requested: AtomicBool,
    in_flight: AtomicBool,
    wake: Notify,
}

/// Builder for [`Dispatcher`]; see [`Dispatcher::builder`].
pub struct DispatcherBuilder {
    service: DispatchService,
    lock: Arc<dyn DistributedLock>,
    emitter: Arc<dyn Emitter>,
    metrics: Option<Metrics>,
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: &DispatcherConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn Emitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Dispatcher {
        let inner = Inner {
            service: self.service,
            lock: self.lock,
            emitter: self.emitter,
            metrics: self.metrics.unwrap_or_default(),
            poll_interval: self.config.poll_interval(),
            lock_ttl: self.config.lock_ttl(),
            store_timeout: self.config.store_timeout(),
            state: Mutex::new(DispatcherState::Idle),
            stop_requested: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            wake: Notify::new(),
        };
        Dispatcher {
            inner: Arc::new(inner),
            task: Mutex::new(None),
        }
    }
}

impl Dispatcher {
    /// Dispatcher with the given config, emitting through [`TracingEmitter`].
    pub fn new(
        service: DispatchService,
        lock: Arc<dyn DistributedLock>,
        config: &DispatcherConfig,
    ) -> Self {
        Self::builder(service, lock).config(config).build()
    }

    pub fn builder(service: DispatchService, lock: Arc<dyn DistributedLock>) -> DispatcherBuilder {
        DispatcherBuilder {
            service,
            lock,
            emitter: Arc::new(TracingEmitter),
            metrics: None,
            config: DispatcherConfig::default(),
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.inner.lock_state()
    }

    /// Start the poll loop. The first cycle runs immediately.
    ///
    /// Calling `start` while the loop is running is a no-op. Calling it after
    /// [`stop`](Self::stop) but before the loop has exited keeps the existing
    /// loop running. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.lock_state();
        self.inner.stop_requested.store(false, Ordering::Release);
        match *state {
            DispatcherState::Polling => {}
            DispatcherState::Stopped => {
                *state = DispatcherState::Polling;
                info!("dispatcher resumed");
            }
            DispatcherState::Idle => {
                *state = DispatcherState::Polling;
                let inner = Arc::clone(&self.inner);
                let handle = tokio::spawn(inner.run());
                *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!(
                    poll_interval_ms = self.inner.poll_interval.as_millis() as u64,
                    lock_ttl_ms = self.inner.lock_ttl.as_millis() as u64,
                    "dispatcher started"
                );
            }
        }
    }

    /// Request the loop to stop. An in-flight cycle runs to completion; no
    /// further cycle is scheduled and [`poll`](Self::poll) skips until the
    /// dispatcher is started again.
    pub fn stop(&self) {
        let mut state = self.inner.lock_state();
        self.inner.stop_requested.store(true, Ordering::Release);
        if *state == DispatcherState::Polling {
            *state = DispatcherState::Stopped;
            self.inner.wake.notify_waiters();
            info!("dispatcher stopping");
        }
    }

    /// Stop the loop and wait for the loop task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatcher task ended abnormally");
            }
        }
        info!("dispatcher shutdown complete");
    }

    /// Run one poll cycle now.
    ///
    /// Returns [`PollOutcome::Skipped`] without touching the store when a
    /// cycle is already in flight on this dispatcher, or when the dispatcher
    /// has been stopped and not started since.
    pub async fn poll(&self) -> PollOutcome {
        self.inner.poll().await
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Let a still-running loop observe the stop and exit on its own.
        self.stop();
    }
}

/// Clears the in-flight flag when the cycle ends, including on cancellation.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// If a stop was requested, move to `Idle` and report that the loop
    /// should exit.
    fn finish_if_stopped(&self) -> bool {
        let mut state = self.lock_state();
        if *state == DispatcherState::Stopped {
            *state = DispatcherState::Idle;
            true
        } else {
            false
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.poll().await;

            // Register for the wake-up before checking the state so a stop
            // issued in between is not missed.
            let wake = self.wake.notified();
            tokio::pin!(wake);
            wake.as_mut().enable();
            if self.finish_if_stopped() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = &mut wake => {}
            }
            if self.finish_if_stopped() {
                break;
            }
        }
        info!("dispatcher loop exited");
    }

    async fn poll(&self) -> PollOutcome {
        if self.stop_requested.load(Ordering::Acquire) {
            return PollOutcome::Skipped;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("poll cycle already in flight, skipping");
            return PollOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        match self.run_cycle().await {
            Ok(report) => {
                self.metrics.record_cycle();
                if report.due > 0 {
                    debug!(
                        due = report.due,
                        emitted = report.emitted,
                        contended = report.contended,
                        "poll cycle complete"
                    );
                }
                PollOutcome::Completed(report)
            }
            Err(e) => {
                self.metrics.record_poll_error();
                let message = format!("{ERROR_PREFIX} {e}");
                self.emitter.error(&message);
                PollOutcome::Failed(message)
            }
        }
    }

    async fn run_cycle(&self) -> Result<CycleReport, DispatchError> {
        let due = self
            .bounded("fetch_due", self.service.due_messages(now_millis()))
            .await?;
        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };

        for msg in due {
            let key = keys::lock_key(&msg.id);
            let acquired = self
                .bounded("try_acquire", self.lock.try_acquire(&key, self.lock_ttl))
                .await?;
            if !acquired {
                debug!(msg_id = %msg.id, "lock held by another dispatcher, skipping");
                self.metrics.record_contended();
                report.contended += 1;
                continue;
            }

            let started = Instant::now();
            self.emitter.info(&msg.message);
            let elapsed = started.elapsed();
            if elapsed > self.lock_ttl {
                warn!(
                    msg_id = %msg.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    lock_ttl_ms = self.lock_ttl.as_millis() as u64,
                    "emission outlived its lock, another dispatcher may emit it again"
                );
            }
            self.metrics.record_emitted();
            report.emitted += 1;

            self.bounded("remove", self.service.remove_message(&msg.id))
                .await?;
        }

        Ok(report)
    }

    /// Await a store call, failing with [`DispatchError::Timeout`] when a
    /// store timeout is configured and exceeded.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, DispatchError> {
        match self.store_timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| DispatchError::Timeout { operation, after })?
                .map_err(DispatchError::from),
            None => Ok(call.await?),
        }
    }
}
