//! Task lifecycle state machine.
//!
//! The controller never performs I/O and never reads a clock. It hands out
//! [`Command`]s for the runtime to execute and is fed their completions
//! together with the current time, so the whole lifecycle can be driven
//! by a fake clock.
//!
//! ```text
//! Idle ─submit─▶ Submitting ─created─▶ Polling ─┬─▶ Succeeded
//!                    │                  ▲  │    ├─▶ Failed
//!                    └──────error───────┼──┘    └─▶ Cancelled
//!                                       └ pending / retryable error
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::client::{TaskId, TaskSnapshot, TaskStatus};
use crate::config::{GenerationOptions, PollPolicy};
use crate::encoder::ImageMime;
use crate::error::{FailureReason, PollError, RemoteFailure, SubmissionError};

/// Identifies one issued request. A completion is applied only if its ticket
/// is the one currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    generation: u64,
    seq: u64,
}

/// Work the runtime has to perform on behalf of the controller.
#[derive(Debug, Clone)]
pub enum Command {
    CreateTask {
        ticket: Ticket,
        mime: ImageMime,
        bytes: Arc<[u8]>,
        options: GenerationOptions,
    },
    PollStatus {
        ticket: Ticket,
        task_id: TaskId,
    },
}

impl Command {
    pub fn ticket(&self) -> Ticket {
        match self {
            Command::CreateTask { ticket, .. } | Command::PollStatus { ticket, .. } => *ticket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Polling {
        task_id: TaskId,
        status: TaskStatus,
        progress: Option<u8>,
        /// Consecutive transient poll failures so far.
        failures: u32,
    },
    Succeeded {
        task_id: TaskId,
        model_url: String,
    },
    Failed(FailureReason),
    Cancelled,
}

impl Phase {
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Submitting | Phase::Polling { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded { .. } | Phase::Failed(_) | Phase::Cancelled)
    }
}

/// One-shot deadline. Disarming it is the only way a poll sequence stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollTimer {
    due: Option<Duration>,
}

impl PollTimer {
    pub fn arm(&mut self, at: Duration) {
        self.due = Some(at);
    }

    pub fn disarm(&mut self) {
        self.due = None;
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.due
    }

    pub fn is_due(&self, now: Duration) -> bool {
        self.due.is_some_and(|due| now >= due)
    }
}

#[derive(Debug)]
pub struct PollingController {
    policy: PollPolicy,
    phase: Phase,
    generation: u64,
    seq: u64,
    in_flight: Option<Ticket>,
    last_issued_at: Duration,
    timer: PollTimer,
    unclaimed_model_url: Option<String>,
}

impl PollingController {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            phase: Phase::Idle,
            generation: 0,
            seq: 0,
            in_flight: None,
            last_issued_at: Duration::ZERO,
            timer: PollTimer::default(),
            unclaimed_model_url: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: PollPolicy) {
        self.policy = policy;
    }

    /// When the next poll becomes due, if one is scheduled.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timer.deadline()
    }

    /// Start a new session. Any live session is cancelled first, so its
    /// outstanding responses become no-ops.
    pub fn submit(&mut self, mime: ImageMime, bytes: Arc<[u8]>, options: GenerationOptions) -> Command {
        self.cancel();
        self.generation += 1;
        self.seq = 0;
        self.unclaimed_model_url = None;
        self.phase = Phase::Submitting;
        let ticket = self.issue();
        log::debug!("session {} submitting", self.generation);
        Command::CreateTask { ticket, mime, bytes, options }
    }

    /// Returns `true` if the completion was applied.
    pub fn on_created(
        &mut self,
        ticket: Ticket,
        result: Result<TaskId, SubmissionError>,
        now: Duration,
    ) -> bool {
        if !self.accepts(ticket) || self.phase != Phase::Submitting {
            return false;
        }
        self.in_flight = None;
        match result {
            Ok(task_id) => {
                log::info!("polling task {task_id} every {:?}", self.policy.interval);
                self.phase = Phase::Polling {
                    task_id,
                    status: TaskStatus::Pending,
                    progress: None,
                    failures: 0,
                };
                self.timer.arm(now + self.policy.interval);
            }
            Err(err) => {
                log::error!("{err}");
                self.finish(Phase::Failed(err.into()));
            }
        }
        true
    }

    /// Issue the next status read if the timer is due and nothing is in flight.
    pub fn tick(&mut self, now: Duration) -> Option<Command> {
        let Phase::Polling { task_id, .. } = &self.phase else {
            return None;
        };
        if self.in_flight.is_some() || !self.timer.is_due(now) {
            return None;
        }
        let task_id = task_id.clone();
        let ticket = self.issue();
        self.last_issued_at = now;
        self.timer.arm(now + self.policy.interval);
        Some(Command::PollStatus { ticket, task_id })
    }

    /// Returns `true` if the completion was applied.
    pub fn on_status(
        &mut self,
        ticket: Ticket,
        result: Result<TaskSnapshot, PollError>,
        now: Duration,
    ) -> bool {
        if !self.accepts(ticket) {
            return false;
        }
        let Phase::Polling { task_id, failures, .. } = &self.phase else {
            return false;
        };
        let task_id = task_id.clone();
        let failures = *failures;
        self.in_flight = None;

        match result {
            Ok(snapshot) => self.apply_snapshot(task_id, snapshot),
            Err(err) if err.is_retryable() && failures < self.policy.max_retries => {
                let failures = failures + 1;
                let delay = self.policy.delay_after(failures);
                log::warn!("{err}; retry {failures}/{} in {delay:?}", self.policy.max_retries);
                if let Phase::Polling { failures: f, .. } = &mut self.phase {
                    *f = failures;
                }
                let at = (self.last_issued_at + delay).max(now);
                self.timer.arm(at);
            }
            Err(err) => {
                log::error!("giving up on task {task_id}: {err}");
                self.finish(Phase::Failed(err.into()));
            }
        }
        true
    }

    /// Stop the live session. No-op (returns `false`) when nothing is running.
    pub fn cancel(&mut self) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        log::info!("session {} cancelled", self.generation);
        self.finish(Phase::Cancelled);
        true
    }

    /// Forget a terminal session and return to `Idle`.
    pub fn reset(&mut self) {
        self.cancel();
        self.unclaimed_model_url = None;
        self.phase = Phase::Idle;
    }

    /// The result URL of a successful session, handed out once.
    pub fn take_model_url(&mut self) -> Option<String> {
        self.unclaimed_model_url.take()
    }

    fn apply_snapshot(&mut self, task_id: TaskId, snapshot: TaskSnapshot) {
        match snapshot.status {
            TaskStatus::Succeeded => match snapshot.glb_url() {
                Some(url) => {
                    log::info!("task {task_id} succeeded");
                    self.unclaimed_model_url = Some(url.to_owned());
                    self.finish(Phase::Succeeded { task_id, model_url: url.to_owned() });
                }
                None => self.finish(Phase::Failed(
                    RemoteFailure {
                        status: TaskStatus::Succeeded.as_str().to_owned(),
                        message: "result contains no GLB model".to_owned(),
                    }
                    .into(),
                )),
            },
            status if status.is_terminal() => {
                let message = snapshot.error_message.unwrap_or_else(|| "no details given".to_owned());
                log::warn!("task {task_id} ended {}: {message}", status.as_str());
                self.finish(Phase::Failed(
                    RemoteFailure { status: status.as_str().to_owned(), message }.into(),
                ));
            }
            status => {
                self.phase = Phase::Polling {
                    task_id,
                    status,
                    progress: snapshot.progress,
                    failures: 0,
                };
            }
        }
    }

    fn issue(&mut self) -> Ticket {
        self.seq += 1;
        let ticket = Ticket { generation: self.generation, seq: self.seq };
        self.in_flight = Some(ticket);
        ticket
    }

    fn accepts(&self, ticket: Ticket) -> bool {
        self.phase.is_active() && self.in_flight == Some(ticket)
    }

    fn finish(&mut self, phase: Phase) {
        debug_assert!(phase.is_terminal());
        self.timer.disarm();
        self.in_flight = None;
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ModelUrls;
    use crate::error::TransportError;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn snapshot(status: TaskStatus, glb: Option<&str>) -> TaskSnapshot {
        TaskSnapshot {
            status,
            progress: None,
            model_urls: ModelUrls { glb: glb.map(str::to_owned), ..ModelUrls::default() },
            error_message: None,
        }
    }

    fn transient() -> PollError {
        PollError(TransportError::Http { status: 503, body: "busy".into() })
    }

    /// Submit at t=0 and acknowledge creation immediately.
    fn polling_controller() -> PollingController {
        let mut ctl = PollingController::new(PollPolicy::default());
        let cmd = ctl.submit(ImageMime::Png, Arc::from(&b"png"[..]), GenerationOptions::default());
        assert!(ctl.on_created(cmd.ticket(), Ok(TaskId("t1".into())), secs(0.0)));
        ctl
    }

    fn expect_poll(ctl: &mut PollingController, at: f64) -> Ticket {
        match ctl.tick(secs(at)) {
            Some(Command::PollStatus { ticket, task_id }) => {
                assert_eq!(task_id, TaskId("t1".into()));
                ticket
            }
            other => panic!("expected a poll at {at}s, got {other:?}"),
        }
    }

    #[test]
    fn submit_emits_one_create_command() {
        let mut ctl = PollingController::new(PollPolicy::default());
        let cmd = ctl.submit(ImageMime::Jpeg, Arc::from(&b"jpg"[..]), GenerationOptions::default());
        assert!(matches!(cmd, Command::CreateTask { mime: ImageMime::Jpeg, .. }));
        assert_eq!(ctl.phase(), &Phase::Submitting);
        assert!(ctl.tick(secs(100.0)).is_none());
    }

    #[test]
    fn pending_pending_succeeded() {
        let mut ctl = polling_controller();
        let mut polls = 0;

        assert!(ctl.tick(secs(4.9)).is_none());
        let t = expect_poll(&mut ctl, 5.0);
        polls += 1;
        assert!(ctl.on_status(t, Ok(snapshot(TaskStatus::Pending, None)), secs(5.3)));
        assert!(matches!(ctl.phase(), Phase::Polling { .. }));

        assert!(ctl.tick(secs(9.0)).is_none());
        let t = expect_poll(&mut ctl, 10.0);
        polls += 1;
        assert!(ctl.on_status(t, Ok(snapshot(TaskStatus::Pending, None)), secs(10.2)));
        assert!(matches!(ctl.phase(), Phase::Polling { .. }));

        let t = expect_poll(&mut ctl, 15.0);
        polls += 1;
        assert!(ctl.on_status(t, Ok(snapshot(TaskStatus::Succeeded, Some("https://x/m.glb"))), secs(15.1)));

        assert_eq!(polls, 3);
        assert!(matches!(ctl.phase(), Phase::Succeeded { model_url, .. } if model_url == "https://x/m.glb"));
        assert_eq!(ctl.take_model_url().as_deref(), Some("https://x/m.glb"));
        assert_eq!(ctl.take_model_url(), None);
        assert_eq!(ctl.next_deadline(), None);
        assert!(ctl.tick(secs(60.0)).is_none());
    }

    #[test]
    fn pending_then_failed_stops_polling() {
        let mut ctl = polling_controller();
        let t = expect_poll(&mut ctl, 5.0);
        ctl.on_status(t, Ok(snapshot(TaskStatus::InProgress, None)), secs(5.0));
        let t = expect_poll(&mut ctl, 10.0);
        let mut failed = snapshot(TaskStatus::Failed, None);
        failed.error_message = Some("no object found".into());
        ctl.on_status(t, Ok(failed), secs(10.0));

        assert_eq!(
            ctl.phase(),
            &Phase::Failed(FailureReason::Remote(RemoteFailure {
                status: "FAILED".into(),
                message: "no object found".into(),
            }))
        );
        assert_eq!(ctl.next_deadline(), None);
        for t in [15.0, 20.0, 300.0] {
            assert!(ctl.tick(secs(t)).is_none());
        }
    }

    #[test]
    fn cancel_discards_in_flight_response() {
        let mut ctl = polling_controller();
        let t = expect_poll(&mut ctl, 5.0);
        assert!(ctl.cancel());
        assert_eq!(ctl.phase(), &Phase::Cancelled);
        assert_eq!(ctl.next_deadline(), None);

        assert!(!ctl.on_status(t, Ok(snapshot(TaskStatus::Succeeded, Some("https://x/m.glb"))), secs(6.0)));
        assert_eq!(ctl.phase(), &Phase::Cancelled);
        assert_eq!(ctl.take_model_url(), None);
        assert!(ctl.tick(secs(10.0)).is_none());
        assert!(ctl.tick(secs(15.0)).is_none());
        assert!(!ctl.cancel());
    }

    #[test]
    fn resubmit_invalidates_previous_session() {
        let mut ctl = PollingController::new(PollPolicy::default());
        let first = ctl.submit(ImageMime::Png, Arc::from(&b"a"[..]), GenerationOptions::default());
        let second = ctl.submit(ImageMime::Png, Arc::from(&b"b"[..]), GenerationOptions::default());
        assert_ne!(first.ticket(), second.ticket());

        assert!(!ctl.on_created(first.ticket(), Ok(TaskId("old".into())), secs(1.0)));
        assert_eq!(ctl.phase(), &Phase::Submitting);
        assert!(ctl.on_created(second.ticket(), Ok(TaskId("new".into())), secs(1.0)));
        assert!(matches!(ctl.phase(), Phase::Polling { task_id, .. } if task_id.0 == "new"));
    }

    #[test]
    fn resubmit_while_polling_ignores_old_poll() {
        let mut ctl = polling_controller();
        let stale = expect_poll(&mut ctl, 5.0);
        let cmd = ctl.submit(ImageMime::Png, Arc::from(&b"c"[..]), GenerationOptions::default());
        assert!(!ctl.on_status(stale, Ok(snapshot(TaskStatus::Succeeded, Some("https://x/old.glb"))), secs(6.0)));
        assert_eq!(ctl.phase(), &Phase::Submitting);
        assert!(ctl.on_created(cmd.ticket(), Ok(TaskId("t1".into())), secs(6.0)));
        assert_eq!(ctl.take_model_url(), None);
    }

    #[test]
    fn submission_error_fails_without_polling() {
        let mut ctl = PollingController::new(PollPolicy::default());
        let cmd = ctl.submit(ImageMime::Webp, Arc::from(&b"w"[..]), GenerationOptions::default());
        let err = SubmissionError(TransportError::Http { status: 400, body: "bad image".into() });
        assert!(ctl.on_created(cmd.ticket(), Err(err.clone()), secs(0.5)));
        assert_eq!(ctl.phase(), &Phase::Failed(FailureReason::Submission(err)));
        assert!(ctl.tick(secs(10.0)).is_none());
    }

    #[test]
    fn transient_errors_back_off_then_recover() {
        let mut ctl = polling_controller();
        let t = expect_poll(&mut ctl, 5.0);
        ctl.on_status(t, Err(transient()), secs(5.0));
        // first retry after 2x interval
        assert!(ctl.tick(secs(14.9)).is_none());
        let t = expect_poll(&mut ctl, 15.0);
        ctl.on_status(t, Err(transient()), secs(15.0));
        assert_eq!(ctl.next_deadline(), Some(secs(35.0)));
        let t = expect_poll(&mut ctl, 35.0);
        ctl.on_status(t, Ok(snapshot(TaskStatus::InProgress, None)), secs(35.0));
        assert!(matches!(ctl.phase(), Phase::Polling { failures: 0, .. }));
        assert_eq!(ctl.next_deadline(), Some(secs(40.0)));
    }

    #[test]
    fn retry_budget_exhaustion_fails() {
        let mut ctl = polling_controller();
        let mut now = 5.0;
        for _ in 0..3 {
            let t = expect_poll(&mut ctl, now);
            assert!(ctl.on_status(t, Err(transient()), secs(now)));
            assert!(matches!(ctl.phase(), Phase::Polling { .. }));
            now = ctl.next_deadline().unwrap().as_secs_f64();
        }
        let t = expect_poll(&mut ctl, now);
        ctl.on_status(t, Err(transient()), secs(now));
        assert_eq!(ctl.phase(), &Phase::Failed(FailureReason::Poll(transient())));
        assert_eq!(ctl.next_deadline(), None);
    }

    #[test]
    fn unauthorized_poll_fails_immediately() {
        let mut ctl = polling_controller();
        let t = expect_poll(&mut ctl, 5.0);
        let err = PollError(TransportError::Http { status: 401, body: String::new() });
        ctl.on_status(t, Err(err.clone()), secs(5.0));
        assert_eq!(ctl.phase(), &Phase::Failed(FailureReason::Poll(err)));
    }

    #[test]
    fn success_without_glb_is_a_remote_failure() {
        let mut ctl = polling_controller();
        let t = expect_poll(&mut ctl, 5.0);
        ctl.on_status(t, Ok(snapshot(TaskStatus::Succeeded, None)), secs(5.0));
        assert!(matches!(ctl.phase(), Phase::Failed(FailureReason::Remote(_))));
        assert_eq!(ctl.take_model_url(), None);
    }

    #[test]
    fn slow_response_never_overlaps_polls() {
        let mut ctl = polling_controller();
        let t = expect_poll(&mut ctl, 5.0);
        // response is late; the deadline passes with the first poll still out
        assert!(ctl.tick(secs(10.0)).is_none());
        assert!(ctl.tick(secs(12.0)).is_none());
        ctl.on_status(t, Ok(snapshot(TaskStatus::Pending, None)), secs(12.5));
        let t2 = expect_poll(&mut ctl, 12.5);
        assert_ne!(t, t2);
        assert!(!ctl.on_status(t, Ok(snapshot(TaskStatus::Pending, None)), secs(13.0)));
    }

    #[test]
    fn cancel_from_idle_is_noop() {
        let mut ctl = PollingController::new(PollPolicy::default());
        assert!(!ctl.cancel());
        assert_eq!(ctl.phase(), &Phase::Idle);
    }
}
