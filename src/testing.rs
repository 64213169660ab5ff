//! Testing utilities for scheduler scenarios.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! task-scheduler = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use task_scheduler::testing::ScenarioTest;
//!
//! ScenarioTest::new(SchedulerConfig::default())
//!     .given_engine("engine-1")
//!     .given_submission(submission("t1", Metadata::default()))
//!     .expect_dispatched("t1", "engine-1")
//!     .then_result(ok_result("t1", "engine-1"))
//!     .expect_reply_ok("t1");
//! ```

use chrono::{DateTime, Utc};

use crate::config::SchedulerConfig;
use crate::ids::{EngineId, MsgId};
use crate::protocol::{EngineResult, MonitorEvent, Notification, ReplyStatus, Submission, TimerFiring};
use crate::scheduler::{Outputs, Scheduler};

/// Fluent given/then/expect builder over a [`Scheduler`], run purely
/// in-memory against an explicit clock so scenarios stay deterministic.
///
/// Every `given_*`/`then_*` step runs one handler call and accumulates its
/// [`Outputs`] into `last`; `expect_*` steps assert against `last` and
/// against the cumulative [`MonitorLog`].
pub struct ScenarioTest {
    scheduler: Scheduler,
    now: DateTime<Utc>,
    last: Outputs,
    monitor: MonitorLog,
}

impl ScenarioTest {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::at(config, Utc::now())
    }

    pub fn at(config: SchedulerConfig, now: DateTime<Utc>) -> Self {
        Self {
            scheduler: Scheduler::with_rng(config, fastrand::Rng::with_seed(1)),
            now,
            last: Outputs::new(),
            monitor: MonitorLog::new(),
        }
    }

    /// Advance the scenario's clock. Does not itself produce any output.
    pub fn advance(mut self, duration: chrono::Duration) -> Self {
        self.now += duration;
        self
    }

    fn run(mut self, f: impl FnOnce(&mut Scheduler, DateTime<Utc>, &mut Outputs)) -> Self {
        let mut out = Outputs::new();
        f(&mut self.scheduler, self.now, &mut out);
        self.monitor.extend(out.monitor.iter().cloned());
        self.last = out;
        self
    }

    pub fn given_engine(self, engine: impl Into<String>) -> Self {
        let engine = EngineId::new(engine.into());
        self.run(|s, now, out| s.handle_notification(Notification::EngineUp(engine), now, out))
    }

    pub fn then_engine_down(self, engine: impl Into<String>) -> Self {
        let engine = EngineId::new(engine.into());
        self.run(|s, now, out| s.handle_notification(Notification::EngineDown(engine), now, out))
    }

    pub fn given_submission(self, submission: Submission) -> Self {
        self.run(|s, now, out| s.dispatch_submission(submission, now, out))
    }

    pub fn then_submission(self, submission: Submission) -> Self {
        self.given_submission(submission)
    }

    pub fn then_result(self, result: EngineResult) -> Self {
        self.run(|s, now, out| s.dispatch_result(result, now, out))
    }

    pub fn then_timer(self, firing: TimerFiring) -> Self {
        self.run(|s, now, out| s.handle_timer(firing, now, out))
    }

    /// Fire every timer this scenario has requested so far whose deadline
    /// has now passed, oldest first. `ScenarioTest` has no real timer
    /// wheel of its own (see [`crate::runtime`] for that); tests that care
    /// about timeouts fire the `TimerRequest` from `last.timers` directly
    /// via `then_timer`, using `advance` to control the clock first.
    pub fn last_timer_requests(&self) -> &[crate::protocol::TimerRequest] {
        &self.last.timers
    }

    // -- assertions -----------------------------------------------------

    pub fn expect_dispatched(self, msg_id: &str, engine: &str) -> Self {
        let found = self
            .last
            .dispatches
            .iter()
            .any(|d| d.msg_id == MsgId::new(msg_id) && d.engine == EngineId::new(engine));
        assert!(
            found,
            "expected {msg_id} dispatched to {engine}, got {:?}",
            self.last.dispatches
        );
        self
    }

    pub fn expect_no_dispatch(self) -> Self {
        assert!(
            self.last.dispatches.is_empty(),
            "expected no dispatch, got {:?}",
            self.last.dispatches
        );
        self
    }

    pub fn expect_reply_ok(self, msg_id: &str) -> Self {
        let reply = self.find_reply(msg_id);
        assert!(
            matches!(reply.status, ReplyStatus::Ok(_)),
            "expected {msg_id} to reply Ok, got {:?}",
            reply.status
        );
        self
    }

    pub fn expect_reply_err(self, msg_id: &str, kind: &str) -> Self {
        let reply = self.find_reply(msg_id);
        match &reply.status {
            ReplyStatus::Err(e) => assert_eq!(e.kind(), kind, "wrong error kind for {msg_id}"),
            other => panic!("expected {msg_id} to reply Err({kind}), got {other:?}"),
        }
        self
    }

    fn find_reply(&self, msg_id: &str) -> &crate::protocol::Reply {
        self.last
            .replies
            .iter()
            .find(|r| r.msg_id == MsgId::new(msg_id))
            .unwrap_or_else(|| panic!("no reply for {msg_id} in {:?}", self.last.replies))
    }

    pub fn expect_monitor_sequence(self, expected: &[MonitorEvent]) -> Self {
        assert_eq!(self.monitor.events(), expected);
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn last(&self) -> &Outputs {
        &self.last
    }
}

/// Records every [`MonitorEvent`] emitted across a scenario, in emission
/// order, for assertions about the observability story rather than just
/// the final dispatch/reply outcome.
#[derive(Debug, Default, Clone)]
pub struct MonitorLog {
    events: Vec<MonitorEvent>,
}

impl MonitorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, events: impl Iterator<Item = MonitorEvent>) {
        self.events.extend(events);
    }

    pub fn events(&self) -> &[MonitorEvent] {
        &self.events
    }

    pub fn in_tasks(&self) -> Vec<&MsgId> {
        self.events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::InTask { msg_id } => Some(msg_id),
                _ => None,
            })
            .collect()
    }

    pub fn out_tasks(&self) -> Vec<&MsgId> {
        self.events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::OutTask { msg_id } => Some(msg_id),
                _ => None,
            })
            .collect()
    }

    pub fn destination_of(&self, msg_id: &MsgId) -> Option<&EngineId> {
        self.events.iter().rev().find_map(|e| match e {
            MonitorEvent::TaskDestination { msg_id: m, engine } if m == msg_id => Some(engine),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::Dependency;
    use crate::protocol::{Metadata, RawMessage};

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

    #[test]
    fn basic_submission_dispatches_and_replies() {
        ScenarioTest::new(SchedulerConfig::builder().hwm(0).build())
            .given_engine("engine-1")
            .given_submission(submission("t1", Metadata::default()))
            .expect_dispatched("t1", "engine-1")
            .then_result(ok_result("t1", "engine-1"))
            .expect_reply_ok("t1");
    }

    #[test]
    fn after_dependency_parks_until_predecessor_finishes() {
        ScenarioTest::new(SchedulerConfig::builder().hwm(0).build())
            .given_engine("engine-1")
            .given_submission(submission("t1", Metadata::default()))
            .expect_dispatched("t1", "engine-1")
            .given_submission(submission(
                "t2",
                Metadata {
                    after: Dependency::new([MsgId::new("t1")], true, true, false),
                    ..Metadata::default()
                },
            ))
            .expect_no_dispatch()
            .then_result(ok_result("t1", "engine-1"))
            .expect_reply_ok("t1")
            .expect_dispatched("t2", "engine-1");
    }

    #[test]
    fn monitor_log_tracks_in_out_and_destination() {
        let scenario = ScenarioTest::new(SchedulerConfig::builder().hwm(0).build())
            .given_engine("engine-1")
            .given_submission(submission("t1", Metadata::default()))
            .then_result(ok_result("t1", "engine-1"));

        assert_eq!(scenario.monitor.in_tasks(), vec![&MsgId::new("t1")]);
        assert_eq!(scenario.monitor.out_tasks(), vec![&MsgId::new("t1")]);
        assert_eq!(
            scenario.monitor.destination_of(&MsgId::new("t1")),
            Some(&EngineId::new("engine-1"))
        );
    }
}
