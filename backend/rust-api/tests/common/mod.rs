#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use proctor_api::{
    config::{Config, ExamSettings},
    create_router,
    middlewares::auth::{JwtClaims, JwtService, ADMIN_ROLE},
    models::question::TestCase,
    models::{Difficulty, ExamLanguage, Question},
    services::{AppState, Backends},
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "proctor-test-secret";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub fn test_config(exam: ExamSettings) -> Config {
    Config {
        mongo_uri: "mongodb://unused".to_string(),
        redis_uri: "redis://unused".to_string(),
        mongo_database: "proctor_test".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        content_catalog_path: None,
        exam,
    }
}

/// Short exam: two minutes, submit unlocks after one.
pub fn short_exam() -> ExamSettings {
    ExamSettings {
        duration_seconds: 120,
        submit_unlock_seconds: 60,
        time_critical_seconds: 30,
        ..ExamSettings::default()
    }
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(short_exam())
}

pub fn create_test_app_with(exam: ExamSettings) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let backends = Backends::in_memory(question_catalog());
    let state = Arc::new(AppState::with_backends(test_config(exam), backends));

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

fn question(id: &str, language: ExamLanguage, difficulty: Difficulty) -> Question {
    Question {
        id: id.to_string(),
        language,
        title: format!("Question {}", id),
        description: "Read n and print n * 2".to_string(),
        difficulty,
        topic: Some("arithmetic".to_string()),
        starter_code: "def solve():\n    pass\n".to_string(),
        input_format: Some("n".to_string()),
        output_format: Some("2n".to_string()),
        constraints: None,
        visible_test_cases: vec![TestCase {
            input: "2".to_string(),
            expected_output: "4".to_string(),
        }],
        hidden_test_cases: vec![TestCase {
            input: "21".to_string(),
            expected_output: "42".to_string(),
        }],
        time_limit_ms: 2000,
        memory_limit_mb: 256,
    }
}

/// One python question per difficulty, but only two java questions.
pub fn question_catalog() -> Vec<Question> {
    vec![
        question("py-easy", ExamLanguage::Python, Difficulty::Easy),
        question("py-medium", ExamLanguage::Python, Difficulty::Medium),
        question("py-hard", ExamLanguage::Python, Difficulty::Hard),
        question("java-easy", ExamLanguage::Java, Difficulty::Easy),
        question("java-hard", ExamLanguage::Java, Difficulty::Hard),
    ]
}

pub fn token_for(user_id: &str, role: &str) -> String {
    JwtService::new(TEST_JWT_SECRET)
        .generate_token(&JwtClaims::new(user_id, role, chrono::Duration::hours(1)))
        .unwrap()
}

pub fn candidate_token(user_id: &str) -> String {
    token_for(user_id, "candidate")
}

pub fn admin_token() -> String {
    token_for("admin-1", ADMIN_ROLE)
}

/// Sends a request through the router and returns the status and JSON body
/// (`Value::Null` when the body is empty or not JSON).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn start_exam(app: &Router, token: &str, language: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/api/v1/exams",
        Some(token),
        Some(serde_json::json!({ "language": language })),
    )
    .await
}

pub async fn signal(app: &Router, token: &str, session_id: &str, signal: Value) -> Value {
    let (status, body) = send(
        app,
        "POST",
        &format!("/api/v1/exams/{}/signals", session_id),
        Some(token),
        Some(signal),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "signal failed: {}", body);
    body
}

/// Lets the session tasks and the store writer drain under the paused clock.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
}
