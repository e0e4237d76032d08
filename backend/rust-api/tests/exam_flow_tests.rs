use axum::http::StatusCode;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

mod common;

use common::{admin_token, candidate_token, send, settle, signal, start_exam};

#[tokio::test(start_paused = true)]
async fn test_full_exam_run_is_scored() {
    let app = common::create_test_app();
    let token = candidate_token("alice");

    let (status, started) = start_exam(&app.router, &token, "python").await;
    assert_eq!(status, StatusCode::CREATED, "start failed: {}", started);
    let session_id = started["session_id"].as_str().unwrap().to_string();

    assert_eq!(started["language_name"], "Python");
    assert_eq!(started["lives_remaining"], 3);
    assert_eq!(started["total_seconds"], 120);
    assert_eq!(started["directives"][0]["type"], "request_fullscreen");
    let questions = started["questions"].as_array().unwrap();
    let difficulties: Vec<&str> = questions
        .iter()
        .map(|q| q["difficulty"].as_str().unwrap())
        .collect();
    assert_eq!(difficulties, vec!["easy", "medium", "hard"]);
    assert!(questions[0].get("hidden_test_cases").is_none());
    assert_eq!(questions[0]["hidden_test_count"], 1);

    let base = format!("/api/v1/exams/{}", session_id);

    let (status, answer) = send(
        &app.router,
        "PUT",
        &format!("{}/answers/0", base),
        Some(&token),
        Some(json!({ "code": "print(int(input()) * 2)" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["status"], "attempted");

    let (status, answer) = send(
        &app.router,
        "POST",
        &format!("{}/answers/0/runs", base),
        Some(&token),
        Some(json!({ "tests_passed": 2, "tests_total": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["status"], "completed");
    assert_eq!(answer["run_count"], 1);

    let (status, answer) = send(
        &app.router,
        "POST",
        &format!("{}/answers/1/runs", base),
        Some(&token),
        Some(json!({ "tests_passed": 1, "tests_total": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["status"], "attempted");

    let (status, body) = send(&app.router, "POST", &format!("{}/submit", base), Some(&token), None).await;
    assert_eq!(status, StatusCode::TOO_EARLY);
    assert_eq!(body["status"], 425);

    sleep(Duration::from_secs(65)).await;

    let (status, submitted) =
        send(&app.router, "POST", &format!("{}/submit", base), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "submit failed: {}", submitted);
    assert_eq!(submitted["session"]["status"], "completed");
    assert_eq!(submitted["session"]["auto_submitted"], false);
    assert!(submitted["session"]["time_spent_seconds"].as_u64().unwrap() >= 60);

    settle().await;

    // a second submit returns the final state
    let (status, again) = send(&app.router, "POST", &format!("{}/submit", base), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["session"]["status"], "completed");
    assert_eq!(
        again["session"]["time_spent_seconds"],
        submitted["session"]["time_spent_seconds"]
    );

    let (status, score) = send(&app.router, "GET", &format!("{}/score", base), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(score["total"], 45.0);

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("{}/answers/2", base),
        Some(&token),
        Some(json!({ "code": "late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, detail) = send(&app.router, "GET", &base, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["session"]["status"], "completed");
    assert_eq!(detail["questions"].as_array().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_time_up_auto_submits_with_remaining_lives() {
    let app = common::create_test_app();
    let token = candidate_token("bob");

    let (_, started) = start_exam(&app.router, &token, "python").await;
    let session_id = started["session_id"].as_str().unwrap();

    let outcome = signal(&app.router, &token, session_id, json!({ "type": "copy" })).await;
    assert_eq!(outcome["lives_remaining"], 2);

    signal(
        &app.router,
        &token,
        session_id,
        json!({ "type": "fullscreen_change", "active": false }),
    )
    .await;
    sleep(Duration::from_secs(4)).await;
    let outcome = signal(
        &app.router,
        &token,
        session_id,
        json!({ "type": "fullscreen_change", "active": true }),
    )
    .await;
    assert_eq!(outcome["lives_remaining"], 2);

    sleep(Duration::from_secs(125)).await;
    settle().await;

    let (status, detail) = send(
        &app.router,
        "GET",
        &format!("/api/v1/exams/{}", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["session"]["status"], "completed");
    assert_eq!(detail["session"]["auto_submitted"], true);
    assert_eq!(detail["session"]["lives_remaining"], 2);
    assert_eq!(detail["session"]["time_spent_seconds"], 120);
    assert_eq!(detail["violations"].as_array().unwrap().len(), 1);
    assert_eq!(detail["violations"][0]["violation_type"], "copy");
    assert_eq!(app.state.exams.registry().active_count().await, 0);

    // a late user submit cannot rewrite the automatic completion
    let (status, submitted) = send(
        &app.router,
        "POST",
        &format!("/api/v1/exams/{}/submit", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["session"]["status"], "completed");
    assert_eq!(submitted["session"]["auto_submitted"], true);
    assert_eq!(submitted["session"]["time_spent_seconds"], 120);
    assert_eq!(submitted["session"]["lives_remaining"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_returning_within_grace_costs_no_life() {
    let app = common::create_test_app();
    let token = candidate_token("carol");

    let (_, started) = start_exam(&app.router, &token, "python").await;
    let session_id = started["session_id"].as_str().unwrap();

    let outcome = signal(
        &app.router,
        &token,
        session_id,
        json!({ "type": "fullscreen_change", "active": false }),
    )
    .await;
    assert_eq!(outcome["pending_violation"], "fullscreen_exit");
    assert!(outcome["directives"]
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d["type"] == "show_warning" && d["grace_seconds"] == 10));

    sleep(Duration::from_secs(5)).await;

    let outcome = signal(
        &app.router,
        &token,
        session_id,
        json!({ "type": "fullscreen_change", "active": true }),
    )
    .await;
    assert!(outcome["pending_violation"].is_null());
    assert_eq!(outcome["directives"][0]["type"], "clear_warning");

    sleep(Duration::from_secs(15)).await;

    let (_, detail) = send(
        &app.router,
        "GET",
        &format!("/api/v1/exams/{}", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(detail["session"]["lives_remaining"], 3);
    assert_eq!(detail["session"]["total_violations"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_third_violation_disqualifies_and_blocks_retake() {
    let app = common::create_test_app();
    let token = candidate_token("dave");
    let admin = admin_token();

    let (_, started) = start_exam(&app.router, &token, "python").await;
    let session_id = started["session_id"].as_str().unwrap().to_string();

    signal(
        &app.router,
        &token,
        &session_id,
        json!({ "type": "visibility_change", "hidden": true }),
    )
    .await;
    sleep(Duration::from_secs(11)).await;

    let outcome = signal(
        &app.router,
        &token,
        &session_id,
        json!({ "type": "visibility_change", "hidden": false }),
    )
    .await;
    assert_eq!(outcome["lives_remaining"], 2);

    // blur alone, while visible and in fullscreen
    let outcome = signal(&app.router, &token, &session_id, json!({ "type": "window_blur" })).await;
    assert_eq!(outcome["pending_violation"], "window_blur");
    sleep(Duration::from_secs(11)).await;

    let outcome = signal(&app.router, &token, &session_id, json!({ "type": "window_focus" })).await;
    assert_eq!(outcome["lives_remaining"], 1);

    signal(
        &app.router,
        &token,
        &session_id,
        json!({ "type": "fullscreen_change", "active": false }),
    )
    .await;
    sleep(Duration::from_secs(11)).await;
    settle().await;

    let (_, detail) = send(
        &app.router,
        "GET",
        &format!("/api/v1/exams/{}", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(detail["session"]["status"], "disqualified");
    assert_eq!(detail["session"]["auto_submitted"], true);
    assert_eq!(detail["session"]["lives_remaining"], 0);
    assert_eq!(detail["session"]["total_violations"], 3);
    let kinds: Vec<&str> = detail["violations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["violation_type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["tab_switch", "window_blur", "fullscreen_exit"]);

    // signals after termination are no-ops
    let outcome = signal(&app.router, &token, &session_id, json!({ "type": "paste" })).await;
    assert!(outcome["directives"].as_array().unwrap().is_empty());
    assert_eq!(outcome["session_active"], false);

    let (status, submitted) = send(
        &app.router,
        "POST",
        &format!("/api/v1/exams/{}/submit", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["session"]["status"], "disqualified");
    assert_eq!(submitted["session"]["auto_submitted"], true);
    assert_eq!(
        submitted["session"]["time_spent_seconds"],
        detail["session"]["time_spent_seconds"]
    );
    assert_eq!(submitted["violations"].as_array().unwrap().len(), 3);

    let (status, _) = start_exam(&app.router, &token, "python").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, blocked) = send(&app.router, "GET", "/admin/eligibility/blocked", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(blocked[0]["user_id"], "dave");
    assert_eq!(blocked[0]["blocked_session_id"], session_id.as_str());

    let (status, approval) = send(
        &app.router,
        "POST",
        "/admin/eligibility/dave/approve",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approval["approved"], true);

    let (status, _) = start_exam(&app.router, &token, "python").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test(start_paused = true)]
async fn test_deterrents_never_cost_a_life() {
    let app = common::create_test_app();
    let token = candidate_token("erin");

    let (_, started) = start_exam(&app.router, &token, "python").await;
    let session_id = started["session_id"].as_str().unwrap();

    let outcome = signal(
        &app.router,
        &token,
        session_id,
        json!({ "type": "key_down", "key": "v", "ctrl": true }),
    )
    .await;
    assert_eq!(outcome["directives"][0]["type"], "prevent_default");

    let outcome = signal(&app.router, &token, session_id, json!({ "type": "pop_state" })).await;
    assert!(outcome["directives"]
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d["type"] == "push_history_state"));

    let outcome = signal(&app.router, &token, session_id, json!({ "type": "before_unload" })).await;
    assert!(outcome["directives"]
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d["type"] == "confirm_unload"));

    let outcome = signal(&app.router, &token, session_id, json!({ "type": "context_menu" })).await;
    assert_eq!(outcome["lives_remaining"], 3);
    assert!(outcome["pending_violation"].is_null());
}

#[tokio::test(start_paused = true)]
async fn test_one_running_exam_per_user() {
    let app = common::create_test_app();
    let token = candidate_token("frank");

    let (_, first) = start_exam(&app.router, &token, "python").await;
    let (status, body) = start_exam(&app.router, &token, "python").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains(first["session_id"].as_str().unwrap()));
}

#[tokio::test]
async fn test_short_question_pool_is_rejected() {
    let app = common::create_test_app();
    let token = candidate_token("grace");

    let (status, body) = start_exam(&app.router, &token, "java").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().contains("have 2"));
    assert_eq!(app.state.exams.registry().active_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_are_private_to_their_owner() {
    let app = common::create_test_app();
    let owner = candidate_token("heidi");
    let intruder = candidate_token("ivan");

    let (_, started) = start_exam(&app.router, &owner, "python").await;
    let uri = format!("/api/v1/exams/{}", started["session_id"].as_str().unwrap());

    let (status, _) = send(&app.router, "GET", &uri, Some(&intruder), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app.router, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app.router, "GET", "/api/v1/exams/missing", Some(&owner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_bad_answer_requests_are_rejected() {
    let app = common::create_test_app();
    let token = candidate_token("judy");

    let (_, started) = start_exam(&app.router, &token, "python").await;
    let base = format!("/api/v1/exams/{}", started["session_id"].as_str().unwrap());

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("{}/answers/3", base),
        Some(&token),
        Some(json!({ "code": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("{}/answers/0/runs", base),
        Some(&token),
        Some(json!({ "tests_passed": 5, "tests_total": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/exams",
        Some(&token),
        Some(json!({ "language": "cobol" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
