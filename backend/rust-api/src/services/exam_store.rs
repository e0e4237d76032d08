use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_document},
    options::FindOptions,
    Collection, Database,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::metrics::track_store_operation;
use crate::models::exam::{AnswerPatch, SessionPatch};
use crate::models::{Answer, Session, Violation};

const MAX_LIST_LIMIT: i64 = 200;

/// Durable mirror of exam sessions. The session runtime owns the
/// authoritative state; everything written here is a copy.
///
/// Writes are retried, so every create is keyed: repeating one replaces the
/// record instead of adding a second.
#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<String>;
    async fn update_session(&self, session_id: &str, patch: &SessionPatch) -> Result<()>;
    async fn create_answer_placeholder(&self, session_id: &str, answer: &Answer) -> Result<()>;
    async fn update_answer(
        &self,
        session_id: &str,
        question_index: usize,
        patch: &AnswerPatch,
    ) -> Result<()>;
    async fn record_violation(&self, violation: &Violation) -> Result<()>;
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;
    async fn get_answers(&self, session_id: &str) -> Result<Vec<Answer>>;
    async fn get_violations(&self, session_id: &str) -> Result<Vec<Violation>>;
    async fn list_sessions(&self, limit: i64) -> Result<Vec<Session>>;
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct AnswerRecord {
    session_id: String,
    #[serde(flatten)]
    answer: Answer,
}

pub struct MongoExamStore {
    mongo: Database,
}

impl MongoExamStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn sessions(&self) -> Collection<Session> {
        self.mongo.collection("exam_sessions")
    }

    fn answers(&self) -> Collection<AnswerRecord> {
        self.mongo.collection("exam_answers")
    }

    fn violations(&self) -> Collection<Violation> {
        self.mongo.collection("exam_violations")
    }
}

#[async_trait]
impl ExamStore for MongoExamStore {
    async fn create_session(&self, session: &Session) -> Result<String> {
        track_store_operation("mongodb", "create_session", async {
            self.sessions()
                .replace_one(doc! { "id": session.id.as_str() }, session)
                .upsert(true)
                .await
                .context("Failed to insert exam session")
        })
        .await?;
        Ok(session.id.clone())
    }

    async fn update_session(&self, session_id: &str, patch: &SessionPatch) -> Result<()> {
        let fields = to_document(patch).context("Failed to encode session patch")?;
        if fields.is_empty() {
            return Ok(());
        }
        track_store_operation("mongodb", "update_session", async {
            self.sessions()
                .update_one(doc! { "id": session_id }, doc! { "$set": fields })
                .await
                .context("Failed to update exam session")
        })
        .await?;
        Ok(())
    }

    async fn create_answer_placeholder(&self, session_id: &str, answer: &Answer) -> Result<()> {
        let record = AnswerRecord {
            session_id: session_id.to_string(),
            answer: answer.clone(),
        };
        track_store_operation("mongodb", "create_answer", async {
            self.answers()
                .replace_one(
                    doc! {
                        "session_id": session_id,
                        "question_index": answer.question_index as i64,
                    },
                    &record,
                )
                .upsert(true)
                .await
                .context("Failed to insert answer placeholder")
        })
        .await?;
        Ok(())
    }

    async fn update_answer(
        &self,
        session_id: &str,
        question_index: usize,
        patch: &AnswerPatch,
    ) -> Result<()> {
        let fields = to_document(patch).context("Failed to encode answer patch")?;
        if fields.is_empty() {
            return Ok(());
        }
        track_store_operation("mongodb", "update_answer", async {
            self.answers()
                .update_one(
                    doc! { "session_id": session_id, "question_index": question_index as i64 },
                    doc! { "$set": fields },
                )
                .await
                .context("Failed to update answer")
        })
        .await?;
        Ok(())
    }

    async fn record_violation(&self, violation: &Violation) -> Result<()> {
        track_store_operation("mongodb", "record_violation", async {
            self.violations()
                .replace_one(doc! { "id": violation.id.as_str() }, violation)
                .upsert(true)
                .await
                .context("Failed to insert violation")
        })
        .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        track_store_operation("mongodb", "get_session", async {
            self.sessions()
                .find_one(doc! { "id": session_id })
                .await
                .context("Failed to query exam session")
        })
        .await
    }

    async fn get_answers(&self, session_id: &str) -> Result<Vec<Answer>> {
        let options = FindOptions::builder()
            .sort(doc! { "question_index": 1 })
            .build();
        let cursor = self
            .answers()
            .find(doc! { "session_id": session_id })
            .with_options(options)
            .await
            .context("Failed to query answers")?;
        let records: Vec<AnswerRecord> = cursor
            .try_collect()
            .await
            .context("Failed to collect answers")?;
        Ok(records.into_iter().map(|r| r.answer).collect())
    }

    async fn get_violations(&self, session_id: &str) -> Result<Vec<Violation>> {
        let cursor = self
            .violations()
            .find(doc! { "session_id": session_id })
            .await
            .context("Failed to query violations")?;
        cursor
            .try_collect()
            .await
            .context("Failed to collect violations")
    }

    async fn list_sessions(&self, limit: i64) -> Result<Vec<Session>> {
        let options = FindOptions::builder()
            .sort(doc! { "started_at": -1 })
            .limit(limit.clamp(1, MAX_LIST_LIMIT))
            .build();
        let cursor = self
            .sessions()
            .find(doc! {})
            .with_options(options)
            .await
            .context("Failed to list exam sessions")?;
        cursor
            .try_collect()
            .await
            .context("Failed to collect exam sessions")
    }

    async fn ping(&self) -> Result<()> {
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            self.mongo.run_command(doc! { "ping": 1 }),
        )
        .await
        .map_err(|_| anyhow!("MongoDB timeout after 1s"))?
        .context("MongoDB ping failed")?;
        Ok(())
    }
}

#[derive(Default)]
struct Records {
    sessions: Vec<Session>,
    answers: HashMap<(String, usize), Answer>,
    violations: Vec<Violation>,
}

/// Process-local store. `set_available(false)` makes every call fail, which
/// tests use to check that gameplay never waits on persistence.
pub struct InMemoryExamStore {
    records: RwLock<Records>,
    available: AtomicBool,
}

impl Default for InMemoryExamStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(Records::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryExamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("in-memory exam store is unavailable"))
        }
    }
}

#[async_trait]
impl ExamStore for InMemoryExamStore {
    async fn create_session(&self, session: &Session) -> Result<String> {
        self.check()?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.sessions.retain(|s| s.id != session.id);
        records.sessions.push(session.clone());
        Ok(session.id.clone())
    }

    async fn update_session(&self, session_id: &str, patch: &SessionPatch) -> Result<()> {
        self.check()?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let session = records
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| anyhow!("Exam session {} not found", session_id))?;
        patch.apply_to(session);
        Ok(())
    }

    async fn create_answer_placeholder(&self, session_id: &str, answer: &Answer) -> Result<()> {
        self.check()?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records
            .answers
            .insert((session_id.to_string(), answer.question_index), answer.clone());
        Ok(())
    }

    async fn update_answer(
        &self,
        session_id: &str,
        question_index: usize,
        patch: &AnswerPatch,
    ) -> Result<()> {
        self.check()?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let answer = records
            .answers
            .get_mut(&(session_id.to_string(), question_index))
            .ok_or_else(|| anyhow!("Answer {} of {} not found", question_index, session_id))?;
        if let Some(code) = &patch.code {
            answer.code = code.clone();
        }
        if let Some(status) = patch.status {
            answer.status = status;
        }
        if let Some(v) = patch.tests_passed {
            answer.tests_passed = v;
        }
        if let Some(v) = patch.tests_total {
            answer.tests_total = v;
        }
        if let Some(v) = patch.compilation_errors {
            answer.compilation_errors = v;
        }
        if let Some(v) = patch.runtime_errors {
            answer.runtime_errors = v;
        }
        if let Some(v) = patch.run_count {
            answer.run_count = v;
        }
        if patch.last_run_at.is_some() {
            answer.last_run_at = patch.last_run_at;
        }
        Ok(())
    }

    async fn record_violation(&self, violation: &Violation) -> Result<()> {
        self.check()?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.violations.retain(|v| v.id != violation.id);
        records.violations.push(violation.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.check()?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.sessions.iter().find(|s| s.id == session_id).cloned())
    }

    async fn get_answers(&self, session_id: &str) -> Result<Vec<Answer>> {
        self.check()?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut answers: Vec<Answer> = records
            .answers
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .map(|(_, answer)| answer.clone())
            .collect();
        answers.sort_by_key(|a| a.question_index);
        Ok(answers)
    }

    async fn get_violations(&self, session_id: &str) -> Result<Vec<Violation>> {
        self.check()?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .violations
            .iter()
            .filter(|v| v.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_sessions(&self, limit: i64) -> Result<Vec<Session>> {
        self.check()?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut sessions = records.sessions.clone();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions.truncate(limit.clamp(1, MAX_LIST_LIMIT) as usize);
        Ok(sessions)
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}
