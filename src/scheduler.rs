//! The dispatch core: dependency-gated, load-balanced placement of tasks
//! onto engines.
//!
//! [`Scheduler`] is plain data plus pure-ish handler methods — it performs no
//! I/O itself. Every handler takes the current time and an [`Outputs`]
//! accumulator; the calling actor (see [`crate::runtime`]) drains `Outputs`
//! into real channels and arms real timers. This split is what makes the
//! six end-to-end scenarios testable as ordinary synchronous unit tests.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::config::SchedulerConfig;
use crate::dependency::Dependency;
use crate::engine::EngineTable;
use crate::error::ReplyError;
use crate::graph::DependencyGraph;
use crate::ids::{EngineId, MsgId};
use crate::job::{Job, WaitingQueue};
use crate::protocol::{
    Dispatch, EngineResult, Idents, MonitorEvent, Notification, Reply, ReplyStatus, TimerFiring,
    TimerRequest, Submission,
};

/// Everything a handler call can produce. Order within each vector is
/// emission order.
#[derive(Debug, Default)]
pub struct Outputs {
    pub dispatches: Vec<Dispatch>,
    pub replies: Vec<Reply>,
    pub monitor: Vec<MonitorEvent>,
    pub timers: Vec<TimerRequest>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty()
            && self.replies.is_empty()
            && self.monitor.is_empty()
            && self.timers.is_empty()
    }
}

enum MaybeRunOutcome {
    Ran,
    NotReady(Job),
    /// `maybe_run` itself discovered the job unreachable and already called
    /// `fail_unreachable`; the job has been consumed.
    Failed,
}

/// Internal normalization of what an engine's result meant, independent of
/// whether it came over the wire or was synthesized for a stranded engine.
enum ResultOutcome {
    Success(crate::protocol::RawMessage),
    /// A genuine task failure; the bytes are the engine's own error payload,
    /// relayed verbatim to the client once retries are exhausted.
    Failure(crate::protocol::RawMessage),
    /// The engine refused the task because its local `follow` check
    /// disagreed with the scheduler's placement decision. Never consumes a
    /// retry.
    DependenciesUnmet,
    /// The engine disappeared with the task resident. No real reply bytes
    /// exist; once retries are exhausted the client sees a synthetic
    /// `EngineError`.
    EngineGone,
}

fn swap_idents(idents: &Idents) -> Idents {
    let mut v = idents.clone();
    if v.len() >= 2 {
        v.swap(0, 1);
    }
    v
}

/// The dependency-and-placement scheduler described by this crate.
pub struct Scheduler {
    config: SchedulerConfig,
    engines: EngineTable,
    queue: WaitingQueue,
    graph: DependencyGraph,
    all_completed: HashSet<MsgId>,
    all_failed: HashSet<MsgId>,
    all_ids: HashSet<MsgId>,
    destinations: std::collections::HashMap<MsgId, EngineId>,
    rng: fastrand::Rng,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_rng(config, fastrand::Rng::new())
    }

    /// Construct with an explicit RNG so chooser strategies that sample are
    /// reproducible in tests.
    pub fn with_rng(config: SchedulerConfig, rng: fastrand::Rng) -> Self {
        Self {
            config,
            engines: EngineTable::new(),
            queue: WaitingQueue::new(),
            graph: DependencyGraph::new(),
            all_completed: HashSet::new(),
            all_failed: HashSet::new(),
            all_ids: HashSet::new(),
            destinations: std::collections::HashMap::new(),
            rng,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn engines(&self) -> &EngineTable {
        &self.engines
    }

    pub fn is_waiting(&self, msg_id: &MsgId) -> bool {
        self.queue.contains(msg_id)
    }

    pub fn all_completed(&self) -> &HashSet<MsgId> {
        &self.all_completed
    }

    pub fn all_failed(&self) -> &HashSet<MsgId> {
        &self.all_failed
    }

    // =====================================================================
    // Notifications (engine registration)
    // =====================================================================

    pub fn handle_notification(&mut self, notification: Notification, now: DateTime<Utc>, out: &mut Outputs) {
        match notification {
            Notification::EngineUp(engine) => self.register_engine(engine, now, out),
            Notification::EngineDown(engine) => self.unregister_engine(engine, out),
        }
    }

    fn register_engine(&mut self, engine: EngineId, now: DateTime<Utc>, out: &mut Outputs) {
        tracing::info!(%engine, "engine registered");
        self.engines.register(engine);
        self.update_graph(None, now, out);
    }

    fn unregister_engine(&mut self, engine: EngineId, out: &mut Outputs) {
        tracing::info!(%engine, "engine unregistered");
        let has_pending = self.engines.has_pending(&engine);
        self.engines.unregister(&engine);
        if has_pending {
            out.timers.push(TimerRequest {
                after: std::time::Duration::from_secs(5),
                firing: TimerFiring::StrandedSweep { engine },
            });
        } else {
            self.engines.drop_records(&engine);
        }
    }

    // =====================================================================
    // Timers
    // =====================================================================

    pub fn handle_timer(&mut self, firing: TimerFiring, now: DateTime<Utc>, out: &mut Outputs) {
        match firing {
            TimerFiring::JobTimeout {
                msg_id,
                timeout_id,
                deadline,
            } => {
                if deadline - now > chrono::Duration::seconds(1) {
                    tracing::warn!(%msg_id, "timeout timer fired more than one second early (clock skew?)");
                }
                let stale = match self.queue.get(&msg_id) {
                    Some(job) => job.timeout_id != timeout_id,
                    None => true,
                };
                if stale {
                    return;
                }
                let job = self.queue.take(&msg_id).expect("presence just checked");
                tracing::info!(%msg_id, "task timed out waiting for dependencies");
                self.fail_unreachable(job, ReplyError::TaskTimeout { msg_id }, now, out);
            }
            TimerFiring::StrandedSweep { engine } => {
                let pending = self.engines.pending_ids(&engine);
                tracing::info!(%engine, stranded = pending.len(), "sweeping stranded tasks");
                for msg_id in pending {
                    self.process_result(msg_id, engine.clone(), None, ResultOutcome::EngineGone, now, out);
                }
                self.engines.drop_records(&engine);
            }
        }
    }

    // =====================================================================
    // Submission
    // =====================================================================

    pub fn dispatch_submission(&mut self, submission: Submission, now: DateTime<Utc>, out: &mut Outputs) {
        out.monitor.push(MonitorEvent::InTask {
            msg_id: submission.msg_id.clone(),
        });
        self.all_ids.insert(submission.msg_id.clone());

        let mut metadata = submission.metadata;
        metadata.after = metadata.after.canonicalize(&self.all_completed, &self.all_failed);

        let job = Job::new(
            submission.msg_id.clone(),
            submission.raw_msg,
            submission.idents,
            metadata,
            now,
        );

        if let Some(reason) = self.validate_dependencies(&job) {
            let msg_id = job.msg_id.clone();
            tracing::warn!(%msg_id, %reason, "invalid dependency on submission");
            self.fail_unreachable(
                job,
                ReplyError::InvalidDependency { msg_id, reason },
                now,
                out,
            );
            return;
        }

        if job.after.unreachable(&self.all_completed, &self.all_failed)
            || job.follow.unreachable(&self.all_completed, &self.all_failed)
        {
            let msg_id = job.msg_id.clone();
            self.fail_unreachable(
                job,
                ReplyError::ImpossibleDependency {
                    msg_id,
                    reason: "dependency already unreachable at submission time".into(),
                },
                now,
                out,
            );
            return;
        }

        if job.after.met(&self.all_completed, &self.all_failed) {
            match self.maybe_run(job, now, out) {
                MaybeRunOutcome::Ran | MaybeRunOutcome::Failed => {}
                MaybeRunOutcome::NotReady(job) => self.save_unmet(job, now, out),
            }
        } else {
            self.save_unmet(job, now, out);
        }
    }

    fn validate_dependencies(&self, job: &Job) -> Option<String> {
        if job.after.contains(&job.msg_id) || job.follow.contains(&job.msg_id) {
            return Some("task references itself as a dependency".to_string());
        }
        for id in job.after.ids().chain(job.follow.ids()) {
            if !self.all_ids.contains(id) {
                return Some(format!("unknown dependency id {id}"));
            }
        }
        None
    }

    fn save_unmet(&mut self, mut job: Job, now: DateTime<Utc>, out: &mut Outputs) {
        job.timeout_id += 1;
        if let Some(timeout) = job.timeout {
            out.timers.push(TimerRequest {
                after: timeout,
                firing: TimerFiring::JobTimeout {
                    msg_id: job.msg_id.clone(),
                    timeout_id: job.timeout_id,
                    deadline: now + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero()),
                },
            });
        }
        for dep_id in job.dependency_ids().cloned().collect::<Vec<_>>() {
            if !self.all_completed.contains(&dep_id) && !self.all_failed.contains(&dep_id) {
                self.graph.add(dep_id, job.msg_id.clone());
            }
        }
        self.queue.push(job);
    }

    // =====================================================================
    // Placement
    // =====================================================================

    fn maybe_run(&mut self, job: Job, now: DateTime<Utc>, out: &mut Outputs) -> MaybeRunOutcome {
        let msg_id = job.msg_id.clone();
        let hwm = self.config.hwm;
        let targets_vec = self.engines.targets_vec();
        let loads_vec = self.engines.loads_vec();

        if targets_vec.is_empty() {
            return MaybeRunOutcome::NotReady(job);
        }

        let mut candidate_indices = Vec::new();
        for (i, engine) in targets_vec.iter().enumerate() {
            if hwm != 0 && loads_vec[i] >= hwm {
                continue;
            }
            if job.blacklist.contains(engine) {
                continue;
            }
            if !job.targets.is_empty() && !job.targets.contains(engine) {
                continue;
            }
            let completed = self.engines.completed(engine);
            let failed = self.engines.failed(engine);
            if !job.follow.met(&completed, &failed) {
                continue;
            }
            candidate_indices.push(i);
        }

        if candidate_indices.is_empty() {
            if !job.follow.is_empty() && job.follow.all {
                let mut destinations: HashSet<EngineId> = HashSet::new();
                for id in job.follow.ids() {
                    if let Some(dest) = self.destinations.get(id) {
                        destinations.insert(dest.clone());
                    }
                }
                if destinations.len() > 1 {
                    tracing::info!(%msg_id, "follow dependency requires colocation on engines that ran on different destinations");
                    self.fail_unreachable(
                        job,
                        ReplyError::ImpossibleDependency {
                            msg_id,
                            reason: "follow dependency requires colocation but referenced tasks ran on different engines".into(),
                        },
                        now,
                        out,
                    );
                    return MaybeRunOutcome::Failed;
                }
            }
            if !job.targets.is_empty() {
                let any_remaining = targets_vec
                    .iter()
                    .any(|e| job.targets.contains(e) && !job.blacklist.contains(e));
                if !any_remaining {
                    tracing::info!(%msg_id, "blacklist exhausted all acceptable targets");
                    self.fail_unreachable(
                        job,
                        ReplyError::ImpossibleDependency {
                            msg_id,
                            reason: "blacklist exhausted all acceptable targets".into(),
                        },
                        now,
                        out,
                    );
                    return MaybeRunOutcome::Failed;
                }
            }
            return MaybeRunOutcome::NotReady(job);
        }

        let sub_loads: Vec<u32> = candidate_indices.iter().map(|&i| loads_vec[i]).collect();
        let chosen = crate::chooser::choose(self.config.scheme, &sub_loads, &mut self.rng);
        let actual_idx = candidate_indices[chosen];
        let engine = targets_vec[actual_idx].clone();
        self.submit_task(job, engine, out);
        MaybeRunOutcome::Ran
    }

    fn submit_task(&mut self, job: Job, engine: EngineId, out: &mut Outputs) {
        tracing::debug!(msg_id = %job.msg_id, %engine, "dispatching task");
        out.dispatches.push(Dispatch {
            msg_id: job.msg_id.clone(),
            engine: engine.clone(),
            raw_msg: job.raw_msg.clone(),
        });
        out.monitor.push(MonitorEvent::TaskDestination {
            msg_id: job.msg_id.clone(),
            engine: engine.clone(),
        });
        self.engines.dispatch(&engine, job);
    }

    // =====================================================================
    // Results
    // =====================================================================

    pub fn dispatch_result(&mut self, result: EngineResult, now: DateTime<Utc>, out: &mut Outputs) {
        let EngineResult {
            msg_id,
            engine,
            idents,
            raw_reply,
            success,
            dependencies_met,
        } = result;

        let outcome = if dependencies_met == Some(false) {
            ResultOutcome::DependenciesUnmet
        } else if success {
            ResultOutcome::Success(raw_reply)
        } else {
            ResultOutcome::Failure(raw_reply)
        };
        self.process_result(msg_id, engine, Some(idents), outcome, now, out);
    }

    /// `reply_idents` is the `[engine, client]` idents the engine reply
    /// arrived with, present whenever this is a real wire result; the
    /// synthetic stranded-sweep path has no engine reply to draw them from
    /// and passes `None`, falling back to the job's own submission idents
    /// (unswapped — no engine frame was ever involved).
    fn process_result(
        &mut self,
        msg_id: MsgId,
        engine: EngineId,
        reply_idents: Option<Idents>,
        outcome: ResultOutcome,
        now: DateTime<Utc>,
        out: &mut Outputs,
    ) {
        let prev_load = self.engines.load(&engine);
        self.engines.release_load(&engine);
        if self.config.hwm != 0 {
            if let Some(prev) = prev_load {
                if prev == self.config.hwm {
                    tracing::debug!(%engine, "hwm relaxed, triggering full graph rescan");
                    self.update_graph(None, now, out);
                }
            }
        }

        let job = match self.engines.remove_pending(&engine, &msg_id) {
            Some(job) => job,
            None => {
                tracing::warn!(%msg_id, %engine, "result for task not found in engine's pending set");
                return;
            }
        };

        // The engine reply's own `[engine, client]` idents, swapped so the
        // router delivers to the client; falls back to the job's original
        // submission idents, unswapped, when there is no real engine reply
        // to draw idents from (the synthetic stranded-sweep path).
        let reply_idents = reply_idents
            .as_ref()
            .map(swap_idents)
            .unwrap_or_else(|| job.idents.clone());

        match outcome {
            ResultOutcome::DependenciesUnmet => {
                tracing::debug!(%msg_id, %engine, "engine reported dependencies unmet, resubmitting");
                self.resubmit(job, engine, now, out);
            }
            ResultOutcome::Failure(bytes) => {
                if job.retries > 0 {
                    let mut job = job;
                    job.retries -= 1;
                    tracing::info!(%msg_id, %engine, retries_left = job.retries, "task failed, retrying");
                    self.resubmit(job, engine, now, out);
                } else {
                    tracing::info!(%msg_id, %engine, "task failed, retries exhausted");
                    self.finalize(job, engine, ReplyStatus::Ok(bytes), false, reply_idents, now, out);
                }
            }
            ResultOutcome::EngineGone => {
                if job.retries > 0 {
                    let mut job = job;
                    job.retries -= 1;
                    tracing::info!(%msg_id, %engine, retries_left = job.retries, "engine vanished, retrying elsewhere");
                    self.resubmit(job, engine, now, out);
                } else {
                    tracing::warn!(%msg_id, %engine, "engine vanished, retries exhausted");
                    self.finalize(
                        job,
                        engine.clone(),
                        ReplyStatus::Err(ReplyError::EngineError { msg_id, engine }),
                        false,
                        reply_idents,
                        now,
                        out,
                    );
                }
            }
            ResultOutcome::Success(bytes) => {
                self.finalize(job, engine, ReplyStatus::Ok(bytes), true, reply_idents, now, out);
            }
        }
    }

    fn resubmit(&mut self, mut job: Job, engine: EngineId, now: DateTime<Utc>, out: &mut Outputs) {
        job.blacklist.insert(engine);
        if !job.targets.is_empty() && job.targets.iter().all(|t| job.blacklist.contains(t)) {
            let msg_id = job.msg_id.clone();
            self.fail_unreachable(
                job,
                ReplyError::ImpossibleDependency {
                    msg_id,
                    reason: "blacklist saturated all acceptable targets".into(),
                },
                now,
                out,
            );
            return;
        }
        match self.maybe_run(job, now, out) {
            MaybeRunOutcome::Ran | MaybeRunOutcome::Failed => {}
            MaybeRunOutcome::NotReady(job) => self.save_unmet(job, now, out),
        }
    }

    fn finalize(
        &mut self,
        job: Job,
        engine: EngineId,
        status: ReplyStatus,
        success: bool,
        reply_idents: Idents,
        now: DateTime<Utc>,
        out: &mut Outputs,
    ) {
        out.replies.push(Reply {
            msg_id: job.msg_id.clone(),
            idents: reply_idents,
            status,
            engine: Some(engine.clone()),
            date: now,
        });
        out.monitor.push(MonitorEvent::OutTask {
            msg_id: job.msg_id.clone(),
        });
        if success {
            self.engines.mark_completed(&engine, job.msg_id.clone());
            self.all_completed.insert(job.msg_id.clone());
        } else {
            self.engines.mark_failed(&engine, job.msg_id.clone());
            self.all_failed.insert(job.msg_id.clone());
        }
        self.destinations.insert(job.msg_id.clone(), engine);
        self.update_graph(Some(job.msg_id), now, out);
    }

    // =====================================================================
    // Failure of the waiting set
    // =====================================================================

    fn fail_unreachable(&mut self, mut job: Job, err: ReplyError, now: DateTime<Utc>, out: &mut Outputs) {
        job.removed = true;
        let dep_ids: Vec<MsgId> = job.dependency_ids().cloned().collect();
        self.graph.remove_waiter(&job.msg_id, dep_ids.iter());
        out.replies.push(Reply {
            msg_id: job.msg_id.clone(),
            // Synthesized client reply — never touched an engine, so the
            // original submission idents are used as-is, unswapped.
            idents: job.idents.clone(),
            status: ReplyStatus::Err(err),
            engine: None,
            date: now,
        });
        out.monitor.push(MonitorEvent::OutTask {
            msg_id: job.msg_id.clone(),
        });
        self.all_failed.insert(job.msg_id.clone());
        let msg_id = job.msg_id.clone();
        // Leave a tombstone behind: a stale `queue` entry (or a handler
        // racing this one) sees the job as gone rather than absent. See
        // DESIGN.md for why this mirrors the reference scheduler.
        self.queue.insert_tombstoned(job);
        self.update_graph(Some(msg_id), now, out);
    }

    // =====================================================================
    // Graph rescan
    // =====================================================================

    fn update_graph(&mut self, dep_id: Option<MsgId>, now: DateTime<Utc>, out: &mut Outputs) {
        let full_scan = dep_id.is_none();

        let candidates: Vec<MsgId> = if full_scan {
            self.queue.drain_fifo_order()
        } else {
            let dep_id = dep_id.expect("full_scan false implies Some");
            let mut deps = self.graph.dependents_of(&dep_id);
            deps.sort_by_key(|id| self.queue.get(id).map(|j| j.timestamp));
            deps
        };

        let mut restore_list: Vec<MsgId> = Vec::new();
        let mut candidates = candidates.into_iter();

        while let Some(msg_id) = candidates.next() {
            let job = match self.queue.take(&msg_id) {
                Some(job) if !job.removed => job,
                _ => continue,
            };

            let dep_ids: Vec<MsgId> = job.dependency_ids().cloned().collect();

            if job.after.unreachable(&self.all_completed, &self.all_failed)
                || job.follow.unreachable(&self.all_completed, &self.all_failed)
            {
                let msg_id = job.msg_id.clone();
                self.fail_unreachable(
                    job,
                    ReplyError::ImpossibleDependency {
                        msg_id,
                        reason: "dependency became unreachable".into(),
                    },
                    now,
                    out,
                );
                continue;
            }

            if job.after.met(&self.all_completed, &self.all_failed) {
                let msg_id = job.msg_id.clone();
                match self.maybe_run(job, now, out) {
                    MaybeRunOutcome::Ran => {
                        self.graph.remove_waiter(&msg_id, dep_ids.iter());
                        if self.engines.available_indices(self.config.hwm).is_empty() {
                            // Every remaining candidate this scan hadn't
                            // reached yet is still live and must go back
                            // into `queue`, not just the ones we'd already
                            // taken and found not-ready.
                            if full_scan {
                                restore_list.extend(candidates);
                            }
                            break;
                        }
                    }
                    MaybeRunOutcome::NotReady(job) => {
                        if full_scan {
                            restore_list.push(job.msg_id.clone());
                        }
                        self.queue.put_back(job);
                    }
                    MaybeRunOutcome::Failed => {}
                }
            } else {
                if full_scan {
                    restore_list.push(job.msg_id.clone());
                }
                self.queue.put_back(job);
            }
        }

        if full_scan {
            self.queue.restore_front(restore_list);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Metadata, RawMessage};

    fn scheduler(hwm: u32) -> Scheduler {
        let cfg = SchedulerConfig::builder().hwm(hwm).build();
        Scheduler::with_rng(cfg, fastrand::Rng::with_seed(1))
    }

    fn scheduler_with_scheme(hwm: u32, scheme: crate::chooser::Scheme) -> Scheduler {
        let cfg = SchedulerConfig::builder().hwm(hwm).scheme(scheme).build();
        Scheduler::with_rng(cfg, fastrand::Rng::with_seed(1))
    }

    fn submission(msg_id: &str, metadata: Metadata) -> Submission {
        Submission {
            msg_id: MsgId::new(msg_id),
            idents: vec!["client".into()],
            raw_msg: RawMessage(msg_id.as_bytes().to_vec()),
            metadata,
        }
    }

    fn ok_result(msg_id: &str, engine: &str) -> EngineResult {
        EngineResult {
            msg_id: MsgId::new(msg_id),
            engine: EngineId::new(engine),
            idents: vec!["engine".into(), "client".into()],
            raw_reply: RawMessage(vec![]),
            success: true,
            dependencies_met: None,
        }
    }

    fn err_result(msg_id: &str, engine: &str) -> EngineResult {
        let mut r = ok_result(msg_id, engine);
        r.success = false;
        r
    }

    #[test]
    fn fifo_under_identical_loads_round_robins_across_engines() {
        // hwm=0 so nothing blocks placement; `Lru` always rotates to the
        // least-recently-dispatched engine, so four back-to-back
        // submissions must alternate between the two registered engines.
        let mut s = scheduler_with_scheme(0, crate::chooser::Scheme::Lru);
        let now = Utc::now();
        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineUp(EngineId::new("A")), now, &mut out);
        s.handle_notification(Notification::EngineUp(EngineId::new("B")), now, &mut out);

        let mut dispatched_to = Vec::new();
        for i in 1..=4 {
            let mut out = Outputs::new();
            s.dispatch_submission(submission(&format!("t{i}"), Metadata::default()), now, &mut out);
            assert_eq!(out.dispatches.len(), 1);
            dispatched_to.push(out.dispatches[0].engine.clone());
        }
        assert_ne!(dispatched_to[0], dispatched_to[1]);
        assert_eq!(dispatched_to[0], dispatched_to[2]);
        assert_eq!(dispatched_to[1], dispatched_to[3]);

        for i in 1..=4 {
            let engine = dispatched_to[i - 1].as_str().to_string();
            let mut out = Outputs::new();
            s.dispatch_result(ok_result(&format!("t{i}"), &engine), now, &mut out);
            assert_eq!(out.replies.len(), 1);
        }
        assert_eq!(s.engines.load(&EngineId::new("A")), Some(0));
        assert_eq!(s.engines.load(&EngineId::new("B")), Some(0));
        assert_eq!(s.all_completed.len(), 4);
    }

    #[test]
    fn after_dependency_chain_parks_then_dispatches_on_completion() {
        let mut s = scheduler(0);
        let now = Utc::now();
        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineUp(EngineId::new("A")), now, &mut out);

        let mut out = Outputs::new();
        s.dispatch_submission(submission("t1", Metadata::default()), now, &mut out);
        assert_eq!(out.dispatches.len(), 1);

        let meta = Metadata {
            after: Dependency::new([MsgId::new("t1")], true, true, false),
            ..Metadata::default()
        };
        let mut out = Outputs::new();
        s.dispatch_submission(submission("t2", meta), now, &mut out);
        assert!(out.dispatches.is_empty());
        assert!(s.is_waiting(&MsgId::new("t2")));
        assert_eq!(s.graph.dependents_of(&MsgId::new("t1")), vec![MsgId::new("t2")]);

        let mut out = Outputs::new();
        s.dispatch_result(ok_result("t1", "A"), now, &mut out);
        assert!(out.dispatches.iter().any(|d| d.msg_id == MsgId::new("t2")));
        assert!(s.graph.dependents_of(&MsgId::new("t1")).is_empty());
    }

    #[test]
    fn follow_all_unreachable_when_destinations_differ() {
        let mut s = scheduler(0);
        let now = Utc::now();
        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineUp(EngineId::new("A")), now, &mut out);
        s.handle_notification(Notification::EngineUp(EngineId::new("B")), now, &mut out);

        // Force t1 and t2 onto distinct engines via targets.
        let meta_a = Metadata {
            targets: vec![EngineId::new("A")],
            ..Metadata::default()
        };
        let meta_b = Metadata {
            targets: vec![EngineId::new("B")],
            ..Metadata::default()
        };
        let mut out = Outputs::new();
        s.dispatch_submission(submission("t1", meta_a), now, &mut out);
        s.dispatch_submission(submission("t2", meta_b), now, &mut out);
        s.dispatch_result(ok_result("t1", "A"), now, &mut out);
        s.dispatch_result(ok_result("t2", "B"), now, &mut out);

        let meta_follow = Metadata {
            follow: Dependency::new([MsgId::new("t1"), MsgId::new("t2")], true, true, false),
            ..Metadata::default()
        };
        let mut out = Outputs::new();
        s.dispatch_submission(submission("t3", meta_follow), now, &mut out);
        assert_eq!(out.replies.len(), 1);
        match &out.replies[0].status {
            ReplyStatus::Err(ReplyError::ImpossibleDependency { .. }) => {}
            other => panic!("expected ImpossibleDependency, got {other:?}"),
        }
    }

    #[test]
    fn retry_blacklists_failing_engines_until_exhausted() {
        let mut s = scheduler(1);
        let now = Utc::now();
        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineUp(EngineId::new("A")), now, &mut out);
        s.handle_notification(Notification::EngineUp(EngineId::new("B")), now, &mut out);

        let meta = Metadata {
            targets: vec![EngineId::new("A"), EngineId::new("B")],
            retries: 2,
            ..Metadata::default()
        };
        let mut out = Outputs::new();
        s.dispatch_submission(submission("t1", meta), now, &mut out);
        let first_engine = out.dispatches[0].engine.clone();

        let mut out = Outputs::new();
        s.dispatch_result(err_result("t1", first_engine.as_str()), now, &mut out);
        // retried onto the other engine
        assert_eq!(out.dispatches.len(), 1);
        let second_engine = out.dispatches[0].engine.clone();
        assert_ne!(second_engine, first_engine);

        let mut out = Outputs::new();
        s.dispatch_result(err_result("t1", second_engine.as_str()), now, &mut out);
        // both targets now blacklisted -> impossible
        assert_eq!(out.replies.len(), 1);
        match &out.replies[0].status {
            ReplyStatus::Err(ReplyError::ImpossibleDependency { .. }) => {}
            other => panic!("expected ImpossibleDependency, got {other:?}"),
        }
    }

    #[test]
    fn dependencies_unmet_does_not_consume_a_retry() {
        // Three engines so the dependencies-unmet blacklist (engine 1) and
        // the subsequent real failure's blacklist (engine 2) never exhaust
        // every candidate before the retry budget itself is checked.
        let mut s = scheduler(0);
        let now = Utc::now();
        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineUp(EngineId::new("A")), now, &mut out);
        s.handle_notification(Notification::EngineUp(EngineId::new("B")), now, &mut out);
        s.handle_notification(Notification::EngineUp(EngineId::new("C")), now, &mut out);

        let meta = Metadata {
            retries: 1,
            ..Metadata::default()
        };
        let mut out = Outputs::new();
        s.dispatch_submission(submission("t1", meta), now, &mut out);
        let engine1 = out.dispatches[0].engine.clone();

        let mut result = ok_result("t1", engine1.as_str());
        result.success = false;
        result.dependencies_met = Some(false);
        let mut out = Outputs::new();
        s.dispatch_result(result, now, &mut out);
        assert_eq!(out.dispatches.len(), 1, "should resubmit without failing");
        let engine2 = out.dispatches[0].engine.clone();
        assert_ne!(engine2, engine1);

        // A real failure now must still have its one retry available: if
        // the dependencies-unmet event had wrongly consumed it, this would
        // finalize with a reply instead of dispatching a third time.
        let mut out = Outputs::new();
        s.dispatch_result(err_result("t1", engine2.as_str()), now, &mut out);
        assert_eq!(
            out.dispatches.len(),
            1,
            "the dependencies-unmet reply must not have consumed the retry"
        );
        assert!(out.replies.is_empty());
        let engine3 = out.dispatches[0].engine.clone();
        assert_ne!(engine3, engine1);
        assert_ne!(engine3, engine2);

        // That retry is now spent; a second real failure must finalize.
        let mut out = Outputs::new();
        s.dispatch_result(err_result("t1", engine3.as_str()), now, &mut out);
        assert_eq!(out.dispatches.len(), 0);
        assert_eq!(out.replies.len(), 1);
    }

    #[test]
    fn stranded_engine_produces_engine_error_after_unregister() {
        let mut s = scheduler(1);
        let now = Utc::now();
        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineUp(EngineId::new("A")), now, &mut out);
        s.dispatch_submission(submission("t1", Metadata::default()), now, &mut out);

        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineDown(EngineId::new("A")), now, &mut out);
        assert_eq!(out.timers.len(), 1);
        let firing = match &out.timers[0].firing {
            TimerFiring::StrandedSweep { engine } => engine.clone(),
            _ => panic!("expected stranded sweep timer"),
        };

        let mut out = Outputs::new();
        s.handle_timer(TimerFiring::StrandedSweep { engine: firing }, now, &mut out);
        assert_eq!(out.replies.len(), 1);
        match &out.replies[0].status {
            ReplyStatus::Err(ReplyError::EngineError { .. }) => {}
            other => panic!("expected EngineError, got {other:?}"),
        }
    }

    #[test]
    fn timeout_fails_a_parked_task() {
        // No engines are ever registered, so "never" parks forever with no
        // placement candidates, and t1's `after` on it never resolves.
        let mut s = scheduler(0);
        let now = Utc::now();
        let meta = Metadata {
            after: Dependency::new([MsgId::new("never")], true, true, false),
            timeout: Some(std::time::Duration::from_millis(500)),
            ..Metadata::default()
        };
        let mut out = Outputs::new();
        s.dispatch_submission(submission("never", Metadata::default()), now, &mut out);
        assert!(out.dispatches.is_empty());
        assert!(s.is_waiting(&MsgId::new("never")));

        let mut out = Outputs::new();
        s.dispatch_submission(submission("t1", meta), now, &mut out);
        assert!(s.is_waiting(&MsgId::new("t1")));

        let firing = TimerFiring::JobTimeout {
            msg_id: MsgId::new("t1"),
            timeout_id: 1,
            deadline: now + chrono::Duration::milliseconds(500),
        };
        let later = now + chrono::Duration::milliseconds(500);
        let mut out = Outputs::new();
        s.handle_timer(firing, later, &mut out);
        assert_eq!(out.replies.len(), 1);
        match &out.replies[0].status {
            ReplyStatus::Err(ReplyError::TaskTimeout { .. }) => {}
            other => panic!("expected TaskTimeout, got {other:?}"),
        }
        assert!(!s.is_waiting(&MsgId::new("t1")));
    }

    #[test]
    fn invalid_dependency_on_unknown_id_is_rejected() {
        let mut s = scheduler(1);
        let now = Utc::now();
        let meta = Metadata {
            after: Dependency::new([MsgId::new("ghost")], true, true, false),
            ..Metadata::default()
        };
        let mut out = Outputs::new();
        s.dispatch_submission(submission("t1", meta), now, &mut out);
        assert_eq!(out.replies.len(), 1);
        match &out.replies[0].status {
            ReplyStatus::Err(ReplyError::InvalidDependency { .. }) => {}
            other => panic!("expected InvalidDependency, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_invalid_dependency() {
        let mut s = scheduler(1);
        let now = Utc::now();
        let meta = Metadata {
            after: Dependency::new([MsgId::new("t1")], true, true, false),
            ..Metadata::default()
        };
        let mut out = Outputs::new();
        s.dispatch_submission(submission("t1", meta), now, &mut out);
        match &out.replies[0].status {
            ReplyStatus::Err(ReplyError::InvalidDependency { .. }) => {}
            other => panic!("expected InvalidDependency, got {other:?}"),
        }
    }

    #[test]
    fn registering_an_engine_mid_flight_does_not_duplicate_the_waiting_queue() {
        // hwm=0, engine A up, t1 dispatched, t2 parks on t1. Registering a
        // second engine triggers a full-scan `update_graph(None)`; t2 isn't
        // ready yet (t1 hasn't completed) so it goes back into `queue` via
        // `put_back` + the full-scan restore list. If `drain_fifo_order`
        // also retained it, the same scan's registration of a *third*
        // engine would find it twice.
        let mut s = scheduler(0);
        let now = Utc::now();
        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineUp(EngineId::new("A")), now, &mut out);
        s.dispatch_submission(submission("t1", Metadata::default()), now, &mut out);

        let meta = Metadata {
            after: Dependency::new([MsgId::new("t1")], true, true, false),
            ..Metadata::default()
        };
        s.dispatch_submission(submission("t2", meta), now, &mut out);
        assert!(s.is_waiting(&MsgId::new("t2")));

        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineUp(EngineId::new("B")), now, &mut out);
        s.handle_notification(Notification::EngineUp(EngineId::new("C")), now, &mut out);

        assert_eq!(
            s.queue.drain_fifo_order(),
            vec![MsgId::new("t2")],
            "t2 must appear exactly once in the waiting queue after repeated full scans"
        );
    }

    #[test]
    fn fail_unreachable_relays_original_submission_idents_unswapped() {
        // A multi-frame client path (e.g. a routing hop in front of the
        // client) must come back unswapped on a scheduler-synthesized
        // failure: no engine was ever involved, so there is no `[engine,
        // client]` pair to swap.
        let mut s = scheduler(1);
        let now = Utc::now();
        let mut submission = submission(
            "t1",
            Metadata {
                after: Dependency::new([MsgId::new("ghost")], true, true, false),
                ..Metadata::default()
            },
        );
        submission.idents = vec!["router-hop".into(), "client".into()];
        let mut out = Outputs::new();
        s.dispatch_submission(submission, now, &mut out);
        assert_eq!(out.replies.len(), 1);
        assert_eq!(
            out.replies[0].idents,
            vec!["router-hop".to_string(), "client".to_string()]
        );
    }

    #[test]
    fn finalize_swaps_the_engine_replys_idents_not_the_submissions() {
        // The submission idents are single-frame, but the engine reply
        // carries a distinct two-frame identity; only the engine reply's
        // idents should be swapped and relayed.
        let mut s = scheduler(0);
        let now = Utc::now();
        let mut out = Outputs::new();
        s.handle_notification(Notification::EngineUp(EngineId::new("A")), now, &mut out);
        s.dispatch_submission(submission("t1", Metadata::default()), now, &mut out);

        let mut result = ok_result("t1", "A");
        result.idents = vec!["engine-a".into(), "router-hop".into()];
        let mut out = Outputs::new();
        s.dispatch_result(result, now, &mut out);
        assert_eq!(out.replies.len(), 1);
        assert_eq!(
            out.replies[0].idents,
            vec!["router-hop".to_string(), "engine-a".to_string()]
        );
    }
}
