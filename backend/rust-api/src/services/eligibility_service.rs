use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_document},
    Collection, Database,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::metrics::track_store_operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityStatus {
    Blocked,
    Approved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityRecord {
    pub user_id: String,
    pub status: EligibilityStatus,
    pub blocked_session_id: Option<String>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl EligibilityRecord {
    fn blocked(user_id: &str, session_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            status: EligibilityStatus::Blocked,
            blocked_session_id: Some(session_id.to_string()),
            blocked_at: Some(at),
            approved_by: None,
            approved_at: None,
        }
    }
}

/// Retake gate consulted before an exam starts. Users with no record are eligible.
#[async_trait]
pub trait EligibilityGate: Send + Sync {
    async fn is_eligible(&self, user_id: &str) -> Result<bool>;
    async fn block_user(&self, user_id: &str, session_id: &str) -> Result<()>;
    /// Returns `false` when the user was not blocked.
    async fn approve_retake(&self, user_id: &str, approved_by: &str) -> Result<bool>;
    async fn list_blocked(&self) -> Result<Vec<EligibilityRecord>>;
}

pub struct MongoEligibilityGate {
    mongo: Database,
}

impl MongoEligibilityGate {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn records(&self) -> Collection<EligibilityRecord> {
        self.mongo.collection("exam_eligibility")
    }
}

#[async_trait]
impl EligibilityGate for MongoEligibilityGate {
    async fn is_eligible(&self, user_id: &str) -> Result<bool> {
        let record = track_store_operation("mongodb", "eligibility_get", async {
            self.records()
                .find_one(doc! { "user_id": user_id })
                .await
                .context("Failed to query exam eligibility")
        })
        .await?;
        Ok(record.is_none_or(|r| r.status != EligibilityStatus::Blocked))
    }

    async fn block_user(&self, user_id: &str, session_id: &str) -> Result<()> {
        let record = EligibilityRecord::blocked(user_id, session_id, Utc::now());
        let fields = to_document(&record).context("Failed to encode eligibility record")?;
        track_store_operation("mongodb", "eligibility_block", async {
            self.records()
                .update_one(doc! { "user_id": user_id }, doc! { "$set": fields })
                .upsert(true)
                .await
                .context("Failed to block user")
        })
        .await?;
        tracing::info!("User {} blocked from retakes after session {}", user_id, session_id);
        Ok(())
    }

    async fn approve_retake(&self, user_id: &str, approved_by: &str) -> Result<bool> {
        let result = track_store_operation("mongodb", "eligibility_approve", async {
            self.records()
                .update_one(
                    doc! { "user_id": user_id, "status": "blocked" },
                    doc! { "$set": {
                        "status": "approved",
                        "approved_by": approved_by,
                        "approved_at": Utc::now().to_rfc3339(),
                    } },
                )
                .await
                .context("Failed to approve retake")
        })
        .await?;
        Ok(result.modified_count > 0)
    }

    async fn list_blocked(&self) -> Result<Vec<EligibilityRecord>> {
        let cursor = self
            .records()
            .find(doc! { "status": "blocked" })
            .await
            .context("Failed to query blocked users")?;
        cursor
            .try_collect()
            .await
            .context("Failed to collect blocked users")
    }
}

#[derive(Default)]
pub struct InMemoryEligibilityGate {
    records: RwLock<HashMap<String, EligibilityRecord>>,
}

impl InMemoryEligibilityGate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EligibilityGate for InMemoryEligibilityGate {
    async fn is_eligible(&self, user_id: &str) -> Result<bool> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(user_id)
            .is_none_or(|r| r.status != EligibilityStatus::Blocked))
    }

    async fn block_user(&self, user_id: &str, session_id: &str) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(
            user_id.to_string(),
            EligibilityRecord::blocked(user_id, session_id, Utc::now()),
        );
        Ok(())
    }

    async fn approve_retake(&self, user_id: &str, approved_by: &str) -> Result<bool> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        match records.get_mut(user_id) {
            Some(record) if record.status == EligibilityStatus::Blocked => {
                record.status = EligibilityStatus::Approved;
                record.approved_by = Some(approved_by.to_string());
                record.approved_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_blocked(&self) -> Result<Vec<EligibilityRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut blocked: Vec<EligibilityRecord> = records
            .values()
            .filter(|r| r.status == EligibilityStatus::Blocked)
            .cloned()
            .collect();
        blocked.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(blocked)
    }
}
