use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language tracks offered for timed exams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamLanguage {
    Python,
    Javascript,
    Java,
    Cpp,
}

impl ExamLanguage {
    pub const ALL: [ExamLanguage; 4] = [
        ExamLanguage::Python,
        ExamLanguage::Javascript,
        ExamLanguage::Java,
        ExamLanguage::Cpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExamLanguage::Python => "python",
            ExamLanguage::Javascript => "javascript",
            ExamLanguage::Java => "java",
            ExamLanguage::Cpp => "cpp",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ExamLanguage::Python => "Python",
            ExamLanguage::Javascript => "JavaScript",
            ExamLanguage::Java => "Java",
            ExamLanguage::Cpp => "C++",
        }
    }
}

impl fmt::Display for ExamLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamLanguage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ExamLanguage::ALL
            .into_iter()
            .find(|language| language.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("Unsupported exam language: {}", value))
    }
}

/// Ordered so that sorting a selection yields non-decreasing difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

fn default_time_limit_ms() -> u32 {
    2000
}

fn default_memory_limit_mb() -> u32 {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub language: ExamLanguage,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub starter_code: String,
    #[serde(default)]
    pub input_format: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub constraints: Option<String>,
    #[serde(default)]
    pub visible_test_cases: Vec<TestCase>,
    #[serde(default)]
    pub hidden_test_cases: Vec<TestCase>,
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: u32,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
}

/// What a candidate is allowed to see: hidden test cases never leave the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub starter_code: String,
    pub input_format: Option<String>,
    pub output_format: Option<String>,
    pub constraints: Option<String>,
    pub visible_test_cases: Vec<TestCase>,
    pub hidden_test_count: usize,
    pub time_limit_ms: u32,
    pub memory_limit_mb: u32,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            title: question.title.clone(),
            description: question.description.clone(),
            difficulty: question.difficulty,
            starter_code: question.starter_code.clone(),
            input_format: question.input_format.clone(),
            output_format: question.output_format.clone(),
            constraints: question.constraints.clone(),
            visible_test_cases: question.visible_test_cases.clone(),
            hidden_test_count: question.hidden_test_cases.len(),
            time_limit_ms: question.time_limit_ms,
            memory_limit_mb: question.memory_limit_mb,
        }
    }
}
