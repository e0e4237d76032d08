//! Per-session event loop.
//!
//! Each active exam is owned by one tokio task running [`ExamRuntime::run`].
//! Client commands, timer ticks and grace-period deadlines are all handled on
//! that task one at a time, so the timer, the detector and the session state
//! never need locks and a terminal transition can never be observed twice.
//!
//! Persistence is mirrored through a per-session writer task: writes are
//! queued in order and retried in the background, and the loop never waits
//! on them.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Duration, Instant};
use uuid::Uuid;

use crate::error::ExamError;
use crate::metrics::{
    EXAM_SESSIONS_ACTIVE, EXAM_SESSIONS_TOTAL, EXAM_VIOLATIONS_TOTAL, GRACE_PERIODS_TOTAL,
};
use crate::models::events::{
    DirectiveIssued, ExamEvent, LifeLost, SessionFinished, TimeExpired, TimerTick,
};
use crate::models::exam::{AnswerPatch, SessionPatch};
use crate::models::{
    Answer, Directive, EnvSignal, ExamSnapshot, RunResult, Session, SignalOutcome, SubmitReason,
    Violation, ViolationType,
};
use crate::services::countdown::CountdownTimer;
use crate::services::eligibility_service::EligibilityGate;
use crate::services::exam_store::ExamStore;
use crate::services::lives_service::{LivesBucket, LivesLedger};
use crate::services::violation_detector::{
    CancelReason, DetectorContext, DetectorEffect, DetectorEvent, Environment, ViolationDetector,
};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

pub enum ExamCommand {
    Signal {
        signal: EnvSignal,
        reply: oneshot::Sender<SignalOutcome>,
    },
    UpdateAnswer {
        index: usize,
        code: String,
        reply: oneshot::Sender<Result<Answer, ExamError>>,
    },
    RecordRun {
        index: usize,
        result: RunResult,
        reply: oneshot::Sender<Result<Answer, ExamError>>,
    },
    Submit {
        reason: SubmitReason,
        reply: oneshot::Sender<Result<ExamSnapshot, ExamError>>,
    },
    Snapshot {
        reply: oneshot::Sender<ExamSnapshot>,
    },
    Shutdown,
}

/// Timer and detector settings for one session.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub total_seconds: u64,
    pub submit_unlock_seconds: u64,
    pub time_critical_seconds: u64,
    pub grace_period: Duration,
    pub tick_interval: Duration,
}

pub enum StoreWrite {
    CreateSession(Session),
    CreateAnswer {
        session_id: String,
        answer: Answer,
    },
    UpdateSession {
        session_id: String,
        patch: SessionPatch,
    },
    UpdateAnswer {
        session_id: String,
        index: usize,
        patch: AnswerPatch,
    },
    RecordViolation(Violation),
    BlockUser {
        user_id: String,
        session_id: String,
    },
}

impl StoreWrite {
    fn name(&self) -> &'static str {
        match self {
            StoreWrite::CreateSession(_) => "create_session",
            StoreWrite::CreateAnswer { .. } => "create_answer",
            StoreWrite::UpdateSession { .. } => "update_session",
            StoreWrite::UpdateAnswer { .. } => "update_answer",
            StoreWrite::RecordViolation(_) => "record_violation",
            StoreWrite::BlockUser { .. } => "block_user",
        }
    }

    /// Audit records and terminal outcomes get a longer retry budget.
    fn retry_config(&self) -> RetryConfig {
        match self {
            StoreWrite::RecordViolation(_) | StoreWrite::BlockUser { .. } => {
                RetryConfig::persistent()
            }
            StoreWrite::UpdateSession { patch, .. } if patch.completed_at.is_some() => {
                RetryConfig::persistent()
            }
            _ => RetryConfig::default(),
        }
    }
}

/// Applies queued writes in order until every sender is dropped.
pub fn spawn_store_writer(
    store: Arc<dyn ExamStore>,
    eligibility: Arc<dyn EligibilityGate>,
) -> (mpsc::UnboundedSender<StoreWrite>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<StoreWrite>();
    let handle = tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let name = write.name();
            let result = retry_async_with_config(name, write.retry_config(), || {
                apply_write(store.as_ref(), eligibility.as_ref(), &write)
            })
            .await;
            if let Err(e) = result {
                tracing::warn!("Dropping exam store write {} after retries: {:#}", name, e);
            }
        }
    });
    (tx, handle)
}

async fn apply_write(
    store: &dyn ExamStore,
    eligibility: &dyn EligibilityGate,
    write: &StoreWrite,
) -> anyhow::Result<()> {
    match write {
        StoreWrite::CreateSession(session) => store.create_session(session).await.map(|_| ()),
        StoreWrite::CreateAnswer { session_id, answer } => {
            store.create_answer_placeholder(session_id, answer).await
        }
        StoreWrite::UpdateSession { session_id, patch } => {
            store.update_session(session_id, patch).await
        }
        StoreWrite::UpdateAnswer {
            session_id,
            index,
            patch,
        } => store.update_answer(session_id, *index, patch).await,
        StoreWrite::RecordViolation(violation) => store.record_violation(violation).await,
        StoreWrite::BlockUser {
            user_id,
            session_id,
        } => eligibility.block_user(user_id, session_id).await,
    }
}

pub struct ExamRuntime {
    session: Session,
    answers: Vec<Answer>,
    violations: Vec<Violation>,
    settings: RuntimeSettings,
    timer: CountdownTimer,
    detector: ViolationDetector,
    grace: Option<(Instant, u64)>,
    ledger: LivesLedger,
    bucket: LivesBucket,
    writes: mpsc::UnboundedSender<StoreWrite>,
    events: broadcast::Sender<ExamEvent>,
}

impl ExamRuntime {
    pub fn new(
        session: Session,
        answers: Vec<Answer>,
        settings: RuntimeSettings,
        ledger: LivesLedger,
        writes: mpsc::UnboundedSender<StoreWrite>,
        events: broadcast::Sender<ExamEvent>,
    ) -> Self {
        let bucket = LivesBucket::Session(session.id.clone());
        Self {
            session,
            answers,
            violations: Vec::new(),
            settings,
            timer: CountdownTimer::new(settings.submit_unlock_seconds, settings.time_critical_seconds),
            detector: ViolationDetector::new(settings.grace_period),
            grace: None,
            ledger,
            bucket,
            writes,
            events,
        }
    }

    /// Starts the countdown and arms the detector. Returns the directives the
    /// client must carry out before the first signal.
    pub fn arm(&mut self) -> Vec<Directive> {
        self.timer.start(self.settings.total_seconds);
        let effects = self.feed(DetectorEvent::Arm {
            env: Environment::nominal(),
        });

        let mut directives = vec![Directive::RequestFullscreen];
        for effect in effects {
            match effect {
                DetectorEffect::Directive(directive) => directives.push(directive),
                DetectorEffect::StartGraceTimer {
                    deadline,
                    generation,
                } => self.grace = Some((deadline, generation)),
                other => tracing::debug!("Ignoring arm-time effect {:?}", other),
            }
        }
        directives
    }

    pub fn snapshot(&self) -> ExamSnapshot {
        ExamSnapshot {
            session: self.session.clone(),
            answers: self.answers.clone(),
            violations: self.violations.clone(),
            timer: Some(self.timer.status()),
            pending_violation: self.detector.pending_violation(),
        }
    }

    pub async fn run(mut self, commands: &mut mpsc::Receiver<ExamCommand>) -> ExamSnapshot {
        self.persist_initial();
        EXAM_SESSIONS_ACTIVE.inc();
        let session_id = self.session.id.clone();
        tracing::info!(
            "Exam session running: session={}, user={}, language={}",
            session_id,
            self.session.user_id,
            self.session.language
        );

        let period = self.settings.tick_interval;
        let mut ticker = interval_at(Instant::now() + period, period);

        while self.session.is_active() {
            let grace_deadline = self.grace.map(|(deadline, _)| deadline);
            let far_future = Instant::now() + Duration::from_secs(86_400 * 365);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(ExamCommand::Shutdown) | None => {
                        self.teardown();
                        tracing::info!("Exam session suspended by shutdown: session={}", session_id);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                },
                _ = ticker.tick(), if self.timer.is_running() => self.on_tick().await,
                _ = sleep_until(grace_deadline.unwrap_or(far_future)), if grace_deadline.is_some() => {
                    if let Some((_, generation)) = self.grace.take() {
                        let effects = self.feed(DetectorEvent::GraceElapsed { generation });
                        self.apply_effects(effects).await;
                    }
                }
            }
        }

        EXAM_SESSIONS_ACTIVE.dec();
        self.snapshot()
    }

    async fn handle(&mut self, command: ExamCommand) {
        match command {
            ExamCommand::Signal { signal, reply } => {
                let outcome = self.on_signal(signal).await;
                let _ = reply.send(outcome);
            }
            ExamCommand::UpdateAnswer { index, code, reply } => {
                let _ = reply.send(self.update_answer(index, code));
            }
            ExamCommand::RecordRun {
                index,
                result,
                reply,
            } => {
                let _ = reply.send(self.record_run(index, result));
            }
            ExamCommand::Submit { reason, reply } => {
                let _ = reply.send(self.submit(reason).await);
            }
            ExamCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            ExamCommand::Shutdown => {
                self.teardown();
            }
        }
    }

    async fn on_signal(&mut self, signal: EnvSignal) -> SignalOutcome {
        if signal == EnvSignal::FullscreenDenied {
            tracing::warn!(
                "{}: session={}, starting grace period",
                ExamError::FullscreenDenied,
                self.session.id
            );
        }
        let effects = self.feed(DetectorEvent::Signal(signal));
        let directives = self.apply_effects(effects).await;

        SignalOutcome {
            directives,
            lives_remaining: self.session.lives_remaining,
            pending_violation: self.detector.pending_violation(),
            session_active: self.session.is_active(),
        }
    }

    fn update_answer(&mut self, index: usize, code: String) -> Result<Answer, ExamError> {
        if !self.session.is_active() {
            return Err(ExamError::NotActive);
        }
        let answer = self
            .answers
            .get_mut(index)
            .ok_or(ExamError::InvalidQuestionIndex(index))?;
        answer.edit(code);
        let answer = answer.clone();
        self.write(StoreWrite::UpdateAnswer {
            session_id: self.session.id.clone(),
            index,
            patch: answer.patch(),
        });
        Ok(answer)
    }

    fn record_run(&mut self, index: usize, result: RunResult) -> Result<Answer, ExamError> {
        if !self.session.is_active() {
            return Err(ExamError::NotActive);
        }
        if !result.is_consistent() {
            return Err(ExamError::InvalidRunResult {
                passed: result.tests_passed,
                total: result.tests_total,
            });
        }
        let answer = self
            .answers
            .get_mut(index)
            .ok_or(ExamError::InvalidQuestionIndex(index))?;
        if let Some(error) = &result.grader_error {
            tracing::warn!(
                "Grader failed for session={}, question={}: {}",
                self.session.id,
                index,
                error
            );
        }
        answer.apply_run(&result, Utc::now());
        let answer = answer.clone();
        tracing::debug!(
            "Run recorded: session={}, question={}, passed={}/{}",
            self.session.id,
            index,
            answer.tests_passed,
            answer.tests_total
        );
        self.write(StoreWrite::UpdateAnswer {
            session_id: self.session.id.clone(),
            index,
            patch: answer.patch(),
        });
        Ok(answer)
    }

    async fn submit(&mut self, reason: SubmitReason) -> Result<ExamSnapshot, ExamError> {
        if !self.session.is_active() {
            tracing::debug!("Submit ignored, session already terminal: {}", self.session.id);
            return Ok(self.snapshot());
        }
        if reason == SubmitReason::User && !self.timer.can_submit() {
            return Err(ExamError::SubmitLocked {
                seconds_remaining: self.timer.seconds_until_submit(),
            });
        }
        self.finish(reason).await;
        Ok(self.snapshot())
    }

    async fn on_tick(&mut self) {
        let Some(tick) = self.timer.tick() else {
            return;
        };
        let now = Utc::now();
        self.publish(ExamEvent::TimerTick(TimerTick {
            session_id: self.session.id.clone(),
            remaining_seconds: tick.remaining_seconds,
            elapsed_seconds: tick.elapsed_seconds,
            total_seconds: tick.total_seconds,
            can_submit: tick.can_submit,
            seconds_until_submit: self.timer.seconds_until_submit(),
            time_critical: self.timer.is_time_critical(),
            timestamp: now,
        }));

        if tick.expired {
            tracing::info!("Exam time expired: session={}", self.session.id);
            self.publish(ExamEvent::TimeExpired(TimeExpired {
                session_id: self.session.id.clone(),
                timestamp: now,
                message: "Time limit exceeded".to_string(),
            }));
            self.finish(SubmitReason::TimeExpired).await;
        }
    }

    fn feed(&mut self, event: DetectorEvent) -> Vec<DetectorEffect> {
        let ctx = DetectorContext {
            now: Instant::now(),
            lives_remaining: self.session.lives_remaining,
        };
        let (next, effects) = self.detector.transition(event, ctx);
        self.detector = next;
        effects
    }

    /// Carries out detector effects in order and returns the directives the
    /// caller should relay to the client.
    async fn apply_effects(&mut self, effects: Vec<DetectorEffect>) -> Vec<Directive> {
        let mut directives = Vec::new();
        for effect in effects {
            match effect {
                DetectorEffect::StartGraceTimer {
                    deadline,
                    generation,
                } => {
                    self.grace = Some((deadline, generation));
                    GRACE_PERIODS_TOTAL.with_label_values(&["started"]).inc();
                    tracing::info!(
                        "Grace period started: session={}, violation={:?}",
                        self.session.id,
                        self.detector.pending_violation()
                    );
                }
                DetectorEffect::CancelGraceTimer { reason } => {
                    self.grace = None;
                    let outcome = match reason {
                        CancelReason::Recovered => "recovered",
                        CancelReason::Disarmed => "disarmed",
                    };
                    GRACE_PERIODS_TOTAL.with_label_values(&[outcome]).inc();
                    tracing::info!("Grace period {}: session={}", outcome, self.session.id);
                }
                DetectorEffect::LoseLife(violation_type) => {
                    if !violation_type.is_instantaneous() {
                        GRACE_PERIODS_TOTAL.with_label_values(&["penalized"]).inc();
                    }
                    directives.extend(self.apply_violation(violation_type).await);
                }
                DetectorEffect::AutoSubmit => {
                    directives.extend(self.finish(SubmitReason::LivesExhausted).await);
                }
                DetectorEffect::Directive(directive) => {
                    self.publish_directive(&directive);
                    directives.push(directive);
                }
            }
        }
        directives
    }

    /// Returns the termination directives when this violation used up the
    /// last life.
    async fn apply_violation(&mut self, violation_type: ViolationType) -> Vec<Directive> {
        if !self.session.is_active() || self.session.lives_remaining == 0 {
            tracing::debug!(
                "Violation {} ignored for inactive session {}",
                violation_type.as_str(),
                self.session.id
            );
            return Vec::new();
        }

        let hearts_before = self.session.lives_remaining;
        let hearts_after = match self.ledger.lose_life(&self.bucket).await {
            Ok(state) => state.lives,
            Err(e) => {
                tracing::warn!("Lives ledger unavailable, decrementing locally: {:#}", e);
                hearts_before.saturating_sub(1)
            }
        };
        let now = Utc::now();

        self.session.lives_remaining = hearts_after;
        self.session.total_violations += 1;

        let violation = Violation {
            id: Uuid::new_v4().to_string(),
            session_id: self.session.id.clone(),
            user_id: self.session.user_id.clone(),
            violation_type,
            hearts_before,
            hearts_after,
            occurred_at: now,
        };
        self.violations.push(violation.clone());
        EXAM_VIOLATIONS_TOTAL
            .with_label_values(&[violation_type.as_str()])
            .inc();

        self.write(StoreWrite::RecordViolation(violation));
        self.write(StoreWrite::UpdateSession {
            session_id: self.session.id.clone(),
            patch: SessionPatch {
                lives_remaining: Some(hearts_after),
                total_violations: Some(self.session.total_violations),
                ..SessionPatch::default()
            },
        });
        self.publish(ExamEvent::LifeLost(LifeLost {
            session_id: self.session.id.clone(),
            violation_type,
            hearts_before,
            hearts_after,
            timestamp: now,
        }));

        tracing::warn!(
            "Violation penalized: session={}, type={}, lives {} -> {}",
            self.session.id,
            violation_type.as_str(),
            hearts_before,
            hearts_after
        );

        if hearts_after == 0 {
            return self.finish(SubmitReason::LivesExhausted).await;
        }
        Vec::new()
    }

    /// Single exit point into a terminal state. Returns the directives that
    /// release the client, or nothing if the session had already terminated.
    async fn finish(&mut self, reason: SubmitReason) -> Vec<Directive> {
        if !self.session.is_active() {
            return Vec::new();
        }

        let mut directives = self.teardown();
        directives.push(Directive::ExitFullscreen);
        self.publish_directive(&Directive::ExitFullscreen);

        let now = Utc::now();
        let time_spent = self.timer.elapsed_seconds();
        self.session.finish(reason, time_spent, now);
        let status = self.session.status;

        self.write(StoreWrite::UpdateSession {
            session_id: self.session.id.clone(),
            patch: self.session.patch(),
        });
        if reason == SubmitReason::LivesExhausted {
            self.write(StoreWrite::BlockUser {
                user_id: self.session.user_id.clone(),
                session_id: self.session.id.clone(),
            });
        }

        EXAM_SESSIONS_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();

        self.publish(ExamEvent::SessionFinished(SessionFinished {
            session_id: self.session.id.clone(),
            status,
            auto_submitted: self.session.auto_submitted,
            time_spent_seconds: time_spent,
            timestamp: now,
        }));

        tracing::info!(
            "Exam session finished: session={}, status={}, reason={:?}, lives={}, violations={}, time_spent={}s",
            self.session.id,
            status.as_str(),
            reason,
            self.session.lives_remaining,
            self.session.total_violations,
            time_spent
        );
        directives
    }

    /// Stops the timer and disarms the detector. Safe to call repeatedly.
    /// Returns the directives it published.
    fn teardown(&mut self) -> Vec<Directive> {
        self.timer.stop();
        let effects = self.feed(DetectorEvent::Disarm);
        self.grace = None;
        let mut directives = Vec::new();
        for effect in effects {
            match effect {
                DetectorEffect::Directive(directive) => {
                    self.publish_directive(&directive);
                    directives.push(directive);
                }
                DetectorEffect::CancelGraceTimer { .. } => {
                    GRACE_PERIODS_TOTAL.with_label_values(&["disarmed"]).inc();
                }
                _ => {}
            }
        }
        directives
    }

    fn persist_initial(&self) {
        self.write(StoreWrite::CreateSession(self.session.clone()));
        for answer in &self.answers {
            self.write(StoreWrite::CreateAnswer {
                session_id: self.session.id.clone(),
                answer: answer.clone(),
            });
        }
    }

    fn write(&self, write: StoreWrite) {
        if self.writes.send(write).is_err() {
            tracing::warn!("Exam store writer stopped: session={}", self.session.id);
        }
    }

    fn publish(&self, event: ExamEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_directive(&self, directive: &Directive) {
        self.publish(ExamEvent::Directive(DirectiveIssued {
            session_id: self.session.id.clone(),
            directive: directive.clone(),
        }));
    }
}
