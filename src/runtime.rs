//! The actor that owns a [`Scheduler`] and drives it from real channels and
//! a real timer wheel.
//!
//! [`Scheduler`]'s handler methods are synchronous and take no channels of
//! their own; this module is the only place that touches `tokio::sync::mpsc`
//! and `tokio::time`. That split keeps the dispatch logic testable as plain
//! unit tests while keeping exactly one place responsible for I/O.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::protocol::{Dispatch, EngineResult, MonitorEvent, Notification, Reply, Submission, TimerFiring};
use crate::scheduler::{Outputs, Scheduler};

/// Handle for feeding input to a running [`SchedulerRuntime`]. Cheaply
/// cloneable; cloning it is how multiple client-facing and engine-facing
/// listeners share one scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    submissions: mpsc::Sender<Submission>,
    results: mpsc::Sender<EngineResult>,
    notifications: mpsc::Sender<Notification>,
}

impl SchedulerHandle {
    pub async fn submit(&self, submission: Submission) -> Result<(), mpsc::error::SendError<Submission>> {
        self.submissions.send(submission).await
    }

    pub async fn report_result(&self, result: EngineResult) -> Result<(), mpsc::error::SendError<EngineResult>> {
        self.results.send(result).await
    }

    pub async fn notify(&self, notification: Notification) -> Result<(), mpsc::error::SendError<Notification>> {
        self.notifications.send(notification).await
    }
}

/// A pending timer, ordered earliest-deadline-first. `seq` breaks ties
/// deterministically so two timers armed for the same instant fire in
/// the order they were requested.
struct ArmedTimer {
    deadline: Instant,
    seq: u64,
    firing: TimerFiring,
}

impl PartialEq for ArmedTimer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for ArmedTimer {}
impl PartialOrd for ArmedTimer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ArmedTimer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Owns the [`Scheduler`] and the `tokio::select!` loop that feeds it.
///
/// # Example
///
/// ```ignore
/// let (runtime, handle) = SchedulerBuilder::new(SchedulerConfig::default()).build();
/// let mut dispatches = runtime.take_dispatches();
/// let mut replies = runtime.take_replies();
/// tokio::spawn(runtime.run());
///
/// handle.notify(Notification::EngineUp(EngineId::new("engine-1"))).await?;
/// handle.submit(submission).await?;
/// while let Some(dispatch) = dispatches.recv().await {
///     // forward dispatch.raw_msg to dispatch.engine
/// }
/// ```
pub struct SchedulerRuntime {
    scheduler: Scheduler,
    submissions: mpsc::Receiver<Submission>,
    results: mpsc::Receiver<EngineResult>,
    notifications: mpsc::Receiver<Notification>,
    dispatch_tx: mpsc::Sender<Dispatch>,
    reply_tx: mpsc::Sender<Reply>,
    monitor_tx: mpsc::Sender<MonitorEvent>,
    timers: BinaryHeap<Reverse<ArmedTimer>>,
    timer_seq: u64,
    submissions_closed: bool,
    results_closed: bool,
    notifications_closed: bool,
}

impl SchedulerRuntime {
    /// Run until every input channel is closed and no timers remain armed.
    ///
    /// A channel that returns `None` is never polled again — without that,
    /// a closed `mpsc::Receiver` returns `None` immediately on every poll,
    /// turning the loop into a busy spin while the other channels are still
    /// live.
    pub async fn run(mut self) {
        info!("task scheduler runtime starting");
        loop {
            if self.submissions_closed
                && self.results_closed
                && self.notifications_closed
                && self.timers.is_empty()
            {
                break;
            }

            let sleep = match self.timers.peek() {
                Some(Reverse(t)) => tokio::time::sleep_until(t.deadline),
                None => tokio::time::sleep(std::time::Duration::from_secs(3600)),
            };
            tokio::pin!(sleep);

            tokio::select! {
                biased;

                maybe = self.submissions.recv(), if !self.submissions_closed => {
                    match maybe {
                        Some(submission) => self.handle(|s, now, out| s.dispatch_submission(submission, now, out)),
                        None => self.submissions_closed = true,
                    }
                }
                maybe = self.results.recv(), if !self.results_closed => {
                    match maybe {
                        Some(result) => self.handle(|s, now, out| s.dispatch_result(result, now, out)),
                        None => self.results_closed = true,
                    }
                }
                maybe = self.notifications.recv(), if !self.notifications_closed => {
                    match maybe {
                        Some(notification) => self.handle(|s, now, out| s.handle_notification(notification, now, out)),
                        None => self.notifications_closed = true,
                    }
                }
                _ = &mut sleep, if self.timers.peek().is_some() => {
                    if let Some(Reverse(armed)) = self.timers.pop() {
                        debug!("timer fired");
                        self.handle(|s, now, out| s.handle_timer(armed.firing, now, out));
                    }
                }
            }
        }
        info!("task scheduler runtime stopped");
    }

    /// Run one handler call against the scheduler, then drain its
    /// [`Outputs`] into the real channels and arm any requested timers.
    fn handle(&mut self, f: impl FnOnce(&mut Scheduler, chrono::DateTime<Utc>, &mut Outputs)) {
        let now = Utc::now();
        let mut out = Outputs::new();
        f(&mut self.scheduler, now, &mut out);

        for timer in out.timers {
            self.timer_seq += 1;
            self.timers.push(Reverse(ArmedTimer {
                deadline: Instant::now() + timer.after,
                seq: self.timer_seq,
                firing: timer.firing,
            }));
        }
        for dispatch in out.dispatches {
            if self.dispatch_tx.try_send(dispatch).is_err() {
                warn!("dispatch channel full or closed, dropping dispatch");
            }
        }
        for reply in out.replies {
            if self.reply_tx.try_send(reply).is_err() {
                warn!("reply channel full or closed, dropping reply");
            }
        }
        for event in out.monitor {
            // Monitor events are best-effort observability; no one is
            // required to be listening.
            let _ = self.monitor_tx.try_send(event);
        }
    }
}

/// Queue capacities for a [`SchedulerRuntime`]'s channels. `64` mirrors a
/// single-cluster submission burst; raise it for higher-throughput engine
/// pools.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Builds a [`SchedulerRuntime`] and its companion [`SchedulerHandle`] plus
/// output receivers.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    channel_capacity: usize,
    rng: Option<fastrand::Rng>,
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            rng: None,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Seed the chooser's RNG explicitly, for deterministic integration
    /// tests.
    pub fn with_rng(mut self, rng: fastrand::Rng) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn build(
        self,
    ) -> (
        SchedulerRuntime,
        SchedulerHandle,
        mpsc::Receiver<Dispatch>,
        mpsc::Receiver<Reply>,
        mpsc::Receiver<MonitorEvent>,
    ) {
        let (submission_tx, submission_rx) = mpsc::channel(self.channel_capacity);
        let (result_tx, result_rx) = mpsc::channel(self.channel_capacity);
        let (notification_tx, notification_rx) = mpsc::channel(self.channel_capacity);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.channel_capacity);
        let (reply_tx, reply_rx) = mpsc::channel(self.channel_capacity);
        let (monitor_tx, monitor_rx) = mpsc::channel(self.channel_capacity);

        let scheduler = match self.rng {
            Some(rng) => Scheduler::with_rng(self.config, rng),
            None => Scheduler::new(self.config),
        };

        let runtime = SchedulerRuntime {
            scheduler,
            submissions: submission_rx,
            results: result_rx,
            notifications: notification_rx,
            dispatch_tx,
            reply_tx,
            monitor_tx,
            timers: BinaryHeap::new(),
            timer_seq: 0,
            submissions_closed: false,
            results_closed: false,
            notifications_closed: false,
        };

        let handle = SchedulerHandle {
            submissions: submission_tx,
            results: result_tx,
            notifications: notification_tx,
        };

        (runtime, handle, dispatch_rx, reply_rx, monitor_rx)
    }
}
