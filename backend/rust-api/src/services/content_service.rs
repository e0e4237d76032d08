use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{bson::doc, Collection, Database};

use crate::metrics::track_store_operation;
use crate::models::{ExamLanguage, Question};

/// Source of exam questions.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Eligible pool for a language, narrowed to a topic when one is given.
    async fn questions_for(
        &self,
        language: ExamLanguage,
        topic: Option<&str>,
    ) -> Result<Vec<Question>>;

    /// Questions in the order of `ids`; unknown ids are skipped.
    async fn questions_by_ids(
        &self,
        language: ExamLanguage,
        ids: &[String],
    ) -> Result<Vec<Question>>;
}

fn topic_matches(question: &Question, topic: Option<&str>) -> bool {
    match topic {
        None => true,
        Some(wanted) => question
            .topic
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(wanted)),
    }
}

fn order_by_ids(mut questions: Vec<Question>, ids: &[String]) -> Vec<Question> {
    ids.iter()
        .filter_map(|id| {
            let pos = questions.iter().position(|q| &q.id == id)?;
            Some(questions.swap_remove(pos))
        })
        .collect()
}

pub struct MongoContentProvider {
    mongo: Database,
}

impl MongoContentProvider {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn questions(&self) -> Collection<Question> {
        self.mongo.collection("exam_questions")
    }
}

#[async_trait]
impl ContentProvider for MongoContentProvider {
    async fn questions_for(
        &self,
        language: ExamLanguage,
        topic: Option<&str>,
    ) -> Result<Vec<Question>> {
        let questions: Vec<Question> = track_store_operation("mongodb", "questions_for", async {
            let cursor = self
                .questions()
                .find(doc! { "language": language.as_str() })
                .await
                .context("Failed to query exam questions")?;
            cursor
                .try_collect()
                .await
                .context("Failed to collect exam questions")
        })
        .await?;

        Ok(questions
            .into_iter()
            .filter(|q| topic_matches(q, topic))
            .collect())
    }

    async fn questions_by_ids(
        &self,
        language: ExamLanguage,
        ids: &[String],
    ) -> Result<Vec<Question>> {
        let cursor = self
            .questions()
            .find(doc! { "language": language.as_str(), "id": { "$in": ids.to_vec() } })
            .await
            .context("Failed to query exam questions by id")?;
        let questions: Vec<Question> = cursor
            .try_collect()
            .await
            .context("Failed to collect exam questions")?;
        Ok(order_by_ids(questions, ids))
    }
}

/// Fixed catalog, loaded once from memory or a JSON file.
pub struct StaticContentProvider {
    questions: Vec<Question>,
}

impl StaticContentProvider {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    pub async fn from_json_file(path: &str) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read question catalog {}", path))?;
        let questions: Vec<Question> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse question catalog {}", path))?;
        tracing::info!("Loaded {} exam questions from {}", questions.len(), path);
        Ok(Self::new(questions))
    }
}

#[async_trait]
impl ContentProvider for StaticContentProvider {
    async fn questions_for(
        &self,
        language: ExamLanguage,
        topic: Option<&str>,
    ) -> Result<Vec<Question>> {
        Ok(self
            .questions
            .iter()
            .filter(|q| q.language == language && topic_matches(q, topic))
            .cloned()
            .collect())
    }

    async fn questions_by_ids(
        &self,
        language: ExamLanguage,
        ids: &[String],
    ) -> Result<Vec<Question>> {
        let matching = self
            .questions
            .iter()
            .filter(|q| q.language == language && ids.contains(&q.id))
            .cloned()
            .collect();
        Ok(order_by_ids(matching, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;

    fn question(id: &str, language: ExamLanguage, topic: Option<&str>) -> Question {
        Question {
            id: id.to_string(),
            language,
            title: id.to_string(),
            description: String::new(),
            difficulty: Difficulty::Easy,
            topic: topic.map(str::to_string),
            starter_code: String::new(),
            input_format: None,
            output_format: None,
            constraints: None,
            visible_test_cases: vec![],
            hidden_test_cases: vec![],
            time_limit_ms: 2000,
            memory_limit_mb: 256,
        }
    }

    fn catalog() -> StaticContentProvider {
        StaticContentProvider::new(vec![
            question("p1", ExamLanguage::Python, None),
            question("p2", ExamLanguage::Python, Some("Arrays")),
            question("j1", ExamLanguage::Java, Some("arrays")),
        ])
    }

    #[tokio::test]
    async fn filters_by_language_and_topic() {
        let provider = catalog();
        let python = provider
            .questions_for(ExamLanguage::Python, None)
            .await
            .unwrap();
        assert_eq!(python.len(), 2);

        let arrays = provider
            .questions_for(ExamLanguage::Python, Some("arrays"))
            .await
            .unwrap();
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].id, "p2");
    }

    #[tokio::test]
    async fn lookup_by_ids_keeps_requested_order() {
        let provider = catalog();
        let ids = vec!["p2".to_string(), "missing".to_string(), "p1".to_string()];
        let found = provider
            .questions_by_ids(ExamLanguage::Python, &ids)
            .await
            .unwrap();
        let found_ids: Vec<&str> = found.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(found_ids, vec!["p2", "p1"]);
    }
}
