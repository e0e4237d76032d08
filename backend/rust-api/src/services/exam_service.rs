use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ExamSettings;
use crate::error::ExamError;
use crate::models::events::ExamEvent;
use crate::models::exam::{
    AdminSessionList, ExamScore, ExamStats, StartExamRequest, StartExamResponse,
};
use crate::models::{
    Answer, EnvSignal, ExamSnapshot, QuestionView, RunResult, Session, SessionStatus,
    SignalOutcome, SubmitReason, QUESTIONS_PER_EXAM,
};
use crate::services::content_service::ContentProvider;
use crate::services::eligibility_service::EligibilityGate;
use crate::services::exam_runtime::{spawn_store_writer, ExamCommand, ExamRuntime, RuntimeSettings};
use crate::services::exam_store::ExamStore;
use crate::services::lives_service::{LivesLedger, RestorePolicy};
use crate::services::lives_store::InMemoryLivesStore;
use crate::services::question_selection::select_questions;
use crate::services::scoring::score_exam;
use crate::utils::clock::SystemClock;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

struct ExamHandle {
    user_id: String,
    commands: mpsc::Sender<ExamCommand>,
    events: broadcast::Sender<ExamEvent>,
    task: JoinHandle<()>,
}

/// Final snapshots of recently finished sessions, oldest evicted first.
/// Evicted sessions are read back from the store.
struct FinishedArchive {
    snapshots: HashMap<String, ExamSnapshot>,
    order: VecDeque<String>,
    capacity: usize,
}

impl FinishedArchive {
    fn new(capacity: usize) -> Self {
        Self {
            snapshots: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, session_id: String, snapshot: ExamSnapshot) {
        if self.snapshots.insert(session_id.clone(), snapshot).is_none() {
            self.order.push_back(session_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.snapshots.remove(&oldest);
            }
        }
    }

    fn get(&self, session_id: &str) -> Option<ExamSnapshot> {
        self.snapshots.get(session_id).cloned()
    }

    fn len(&self) -> usize {
        self.snapshots.len()
    }
}

/// Running sessions plus the final snapshots of the most recently finished.
pub struct ExamRegistry {
    active: RwLock<HashMap<String, ExamHandle>>,
    archive: RwLock<FinishedArchive>,
}

impl ExamRegistry {
    pub fn new(archive_capacity: usize) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            archive: RwLock::new(FinishedArchive::new(archive_capacity)),
        }
    }

    pub async fn archived_count(&self) -> usize {
        self.archive.read().await.len()
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    async fn active_session_for(&self, user_id: &str) -> Option<String> {
        self.active
            .read()
            .await
            .iter()
            .find(|(_, handle)| handle.user_id == user_id)
            .map(|(id, _)| id.clone())
    }

    /// Spawns the runtime unless the user already has a running session.
    /// The handle is registered before the task can retire itself.
    async fn launch(
        self: &Arc<Self>,
        runtime: ExamRuntime,
        session_id: String,
        user_id: String,
        events: broadcast::Sender<ExamEvent>,
    ) -> Result<(), ExamError> {
        let mut active = self.active.write().await;
        if let Some((existing, _)) = active.iter().find(|(_, h)| h.user_id == user_id) {
            return Err(ExamError::AlreadyInProgress {
                session_id: existing.clone(),
            });
        }

        let (commands, mut rx) = mpsc::channel(COMMAND_BUFFER);
        let registry = Arc::clone(self);
        let id = session_id.clone();
        let task = tokio::spawn(async move {
            let snapshot = runtime.run(&mut rx).await;
            registry.retire(&id, snapshot).await;
            // commands that raced the end of the loop fail here and fall back to the archive
            drop(rx);
        });

        active.insert(
            session_id,
            ExamHandle {
                user_id,
                commands,
                events,
                task,
            },
        );
        Ok(())
    }

    async fn retire(&self, session_id: &str, snapshot: ExamSnapshot) {
        self.archive
            .write()
            .await
            .insert(session_id.to_string(), snapshot);
        self.active.write().await.remove(session_id);
    }

    async fn sender(&self, session_id: &str) -> Option<(String, mpsc::Sender<ExamCommand>)> {
        self.active
            .read()
            .await
            .get(session_id)
            .map(|h| (h.user_id.clone(), h.commands.clone()))
    }

    async fn archived(&self, session_id: &str) -> Option<ExamSnapshot> {
        self.archive.read().await.get(session_id)
    }

    /// Stops every running session. Their timers and detectors are torn
    /// down; sessions stay `in_progress` in the store.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, ExamHandle)> = self.active.write().await.drain().collect();
        if handles.is_empty() {
            return;
        }
        tracing::info!("Stopping {} running exam sessions", handles.len());

        for (session_id, handle) in handles {
            let _ = handle.commands.send(ExamCommand::Shutdown).await;
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.task).await {
                Ok(Ok(())) => tracing::debug!("Exam session {} stopped", session_id),
                Ok(Err(e)) => tracing::warn!("Exam session {} task failed: {}", session_id, e),
                Err(_) => tracing::warn!("Exam session {} did not stop in time", session_id),
            }
        }
    }
}

/// Exam session orchestrator: starts sessions, routes client commands to
/// their runtimes and answers for sessions that already ended.
pub struct ExamService {
    settings: ExamSettings,
    content: Arc<dyn ContentProvider>,
    store: Arc<dyn ExamStore>,
    eligibility: Arc<dyn EligibilityGate>,
    registry: Arc<ExamRegistry>,
}

impl ExamService {
    pub fn new(
        settings: ExamSettings,
        content: Arc<dyn ContentProvider>,
        store: Arc<dyn ExamStore>,
        eligibility: Arc<dyn EligibilityGate>,
    ) -> Self {
        let registry = Arc::new(ExamRegistry::new(settings.archive_capacity));
        Self {
            settings,
            content,
            store,
            eligibility,
            registry,
        }
    }

    pub fn registry(&self) -> &ExamRegistry {
        &self.registry
    }

    pub async fn start(
        &self,
        user_id: &str,
        req: StartExamRequest,
    ) -> Result<StartExamResponse, ExamError> {
        if let Some(session_id) = self.registry.active_session_for(user_id).await {
            return Err(ExamError::AlreadyInProgress { session_id });
        }
        if !self.eligibility.is_eligible(user_id).await? {
            tracing::info!("Exam start refused, user {} is not eligible", user_id);
            return Err(ExamError::Ineligible);
        }

        let topic = req.topic.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let pool = self.content.questions_for(req.language, topic).await?;
        let available = pool.len();
        let picked = {
            let mut rng = rand::rng();
            select_questions(&pool, &mut rng)
        };
        let Some(questions) = picked else {
            tracing::warn!(
                "Question pool exhausted: language={}, topic={:?}, available={}",
                req.language,
                topic,
                available
            );
            return Err(ExamError::SelectionExhausted {
                language: req.language,
                topic: topic.unwrap_or("any").to_string(),
                available,
            });
        };

        let session_id = Uuid::new_v4().to_string();
        let question_ids: [String; QUESTIONS_PER_EXAM] = questions.clone().map(|q| q.id);
        let session = Session::new(
            session_id.clone(),
            user_id.to_string(),
            req.language,
            question_ids,
            self.settings.max_lives,
            Utc::now(),
        );
        let answers: Vec<Answer> = questions
            .iter()
            .enumerate()
            .map(|(index, question)| Answer::placeholder(index, question))
            .collect();

        // Exam lives are a session-scoped copy: they start full and never restore.
        let ledger = LivesLedger::new(
            Arc::new(InMemoryLivesStore::new()),
            Arc::new(SystemClock),
            self.settings.max_lives,
            RestorePolicy::Never,
        );
        let (writes, _writer) = spawn_store_writer(self.store.clone(), self.eligibility.clone());
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let mut runtime = ExamRuntime::new(
            session,
            answers,
            self.runtime_settings(),
            ledger,
            writes,
            events.clone(),
        );
        let directives = runtime.arm();

        self.registry
            .launch(runtime, session_id.clone(), user_id.to_string(), events)
            .await?;

        tracing::info!(
            "Exam started: session={}, user={}, language={}, questions={:?}",
            session_id,
            user_id,
            req.language,
            questions.iter().map(|q| q.id.as_str()).collect::<Vec<_>>()
        );

        Ok(StartExamResponse {
            session_id,
            language: req.language,
            language_name: req.language.display_name(),
            questions: questions.iter().map(QuestionView::from).collect(),
            lives_remaining: self.settings.max_lives,
            total_seconds: self.settings.duration_seconds,
            seconds_until_submit: self.settings.submit_unlock_seconds,
            directives,
        })
    }

    pub async fn snapshot(&self, session_id: &str, user_id: &str) -> Result<ExamSnapshot, ExamError> {
        if let Some(commands) = self.owned_sender(session_id, user_id).await? {
            if let Some(snapshot) =
                ask(&commands, |reply| ExamCommand::Snapshot { reply }).await
            {
                return Ok(snapshot);
            }
        }
        self.finished_snapshot(session_id, user_id).await
    }

    pub async fn questions(
        &self,
        snapshot: &ExamSnapshot,
    ) -> Result<Vec<QuestionView>, ExamError> {
        let questions = self
            .content
            .questions_by_ids(snapshot.session.language, &snapshot.session.question_ids)
            .await?;
        Ok(questions.iter().map(QuestionView::from).collect())
    }

    pub async fn update_answer(
        &self,
        session_id: &str,
        user_id: &str,
        index: usize,
        code: String,
    ) -> Result<Answer, ExamError> {
        let commands = self.active_sender(session_id, user_id).await?;
        ask(&commands, |reply| ExamCommand::UpdateAnswer { index, code, reply })
            .await
            .unwrap_or(Err(ExamError::NotActive))
    }

    pub async fn record_run(
        &self,
        session_id: &str,
        user_id: &str,
        index: usize,
        result: RunResult,
    ) -> Result<Answer, ExamError> {
        let commands = self.active_sender(session_id, user_id).await?;
        ask(&commands, |reply| ExamCommand::RecordRun {
            index,
            result,
            reply,
        })
        .await
        .unwrap_or(Err(ExamError::NotActive))
    }

    /// Signals for a session that already ended produce no directives.
    pub async fn signal(
        &self,
        session_id: &str,
        user_id: &str,
        signal: EnvSignal,
    ) -> Result<SignalOutcome, ExamError> {
        if let Some(commands) = self.owned_sender(session_id, user_id).await? {
            if let Some(outcome) =
                ask(&commands, |reply| ExamCommand::Signal { signal, reply }).await
            {
                return Ok(outcome);
            }
        }
        let snapshot = self.finished_snapshot(session_id, user_id).await?;
        tracing::debug!("Signal ignored for finished session {}", session_id);
        Ok(SignalOutcome {
            directives: Vec::new(),
            lives_remaining: snapshot.session.lives_remaining,
            pending_violation: None,
            session_active: false,
        })
    }

    /// User-initiated submit. Submitting a finished session returns its
    /// final state instead of failing.
    pub async fn submit(&self, session_id: &str, user_id: &str) -> Result<ExamSnapshot, ExamError> {
        if let Some(commands) = self.owned_sender(session_id, user_id).await? {
            if let Some(result) = ask(&commands, |reply| ExamCommand::Submit {
                reason: SubmitReason::User,
                reply,
            })
            .await
            {
                return result;
            }
        }
        self.finished_snapshot(session_id, user_id).await
    }

    pub async fn score(&self, session_id: &str, user_id: &str) -> Result<ExamScore, ExamError> {
        let snapshot = self.snapshot(session_id, user_id).await?;
        Ok(score_exam(session_id, &snapshot.answers))
    }

    pub async fn subscribe(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<broadcast::Receiver<ExamEvent>, ExamError> {
        let active = self.registry.active.read().await;
        match active.get(session_id) {
            Some(handle) if handle.user_id != user_id => Err(ExamError::Forbidden),
            Some(handle) => Ok(handle.events.subscribe()),
            None => {
                drop(active);
                // distinguishes a finished session from an unknown one
                self.finished_snapshot(session_id, user_id).await?;
                Err(ExamError::NotActive)
            }
        }
    }

    pub async fn list_sessions(&self, limit: i64) -> Result<AdminSessionList, ExamError> {
        let sessions = self.store.list_sessions(limit).await?;
        let count = |status: SessionStatus| sessions.iter().filter(|s| s.status == status).count();
        let stats = ExamStats {
            total: sessions.len(),
            in_progress: count(SessionStatus::InProgress),
            completed: count(SessionStatus::Completed),
            disqualified: count(SessionStatus::Disqualified),
        };
        Ok(AdminSessionList { stats, sessions })
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            total_seconds: self.settings.duration_seconds,
            submit_unlock_seconds: self.settings.submit_unlock_seconds,
            time_critical_seconds: self.settings.time_critical_seconds,
            grace_period: self.settings.grace_period(),
            tick_interval: self.settings.tick_interval(),
        }
    }

    /// The command channel of a running session, if the caller owns it.
    async fn owned_sender(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<mpsc::Sender<ExamCommand>>, ExamError> {
        match self.registry.sender(session_id).await {
            Some((owner, _)) if owner != user_id => Err(ExamError::Forbidden),
            Some((_, commands)) => Ok(Some(commands)),
            None => Ok(None),
        }
    }

    async fn active_sender(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<mpsc::Sender<ExamCommand>, ExamError> {
        match self.owned_sender(session_id, user_id).await? {
            Some(commands) => Ok(commands),
            None => {
                self.finished_snapshot(session_id, user_id).await?;
                Err(ExamError::NotActive)
            }
        }
    }

    /// Final state of a session that is no longer running: the in-memory
    /// archive first, then whatever the store holds.
    async fn finished_snapshot(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<ExamSnapshot, ExamError> {
        let snapshot = match self.registry.archived(session_id).await {
            Some(snapshot) => snapshot,
            None => {
                let session = self
                    .store
                    .get_session(session_id)
                    .await?
                    .ok_or(ExamError::SessionNotFound)?;
                ExamSnapshot {
                    answers: self.store.get_answers(session_id).await?,
                    violations: self.store.get_violations(session_id).await?,
                    session,
                    timer: None,
                    pending_violation: None,
                }
            }
        };

        if snapshot.session.user_id != user_id {
            return Err(ExamError::Forbidden);
        }
        Ok(snapshot)
    }
}

/// Sends a command and waits for the reply. `None` means the session loop
/// ended before answering.
async fn ask<T>(
    commands: &mpsc::Sender<ExamCommand>,
    build: impl FnOnce(oneshot::Sender<T>) -> ExamCommand,
) -> Option<T> {
    let (reply, rx) = oneshot::channel();
    commands.send(build(reply)).await.ok()?;
    rx.await.ok()
}
