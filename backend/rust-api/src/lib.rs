use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::ExamError;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest(
            "/api/v1/exams",
            exam_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .nest(
            "/api/v1/lives",
            lives_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::optional_auth_middleware,
            )),
        )
        .nest(
            "/admin",
            admin_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(
                    middlewares::trace::trace_context_middleware,
                ))
                .layer(middleware::from_fn(
                    middlewares::metrics::metrics_middleware,
                ))
                .layer(cors),
        )
}

fn exam_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::exams::start_exam))
        .route("/{id}", get(handlers::exams::get_exam))
        .route(
            "/{id}/answers/{index}",
            put(handlers::exams::update_answer),
        )
        .route(
            "/{id}/answers/{index}/runs",
            post(handlers::exams::record_run),
        )
        .route("/{id}/signals", post(handlers::exams::post_signal))
        .route("/{id}/submit", post(handlers::exams::submit_exam))
        .route("/{id}/score", get(handlers::exams::get_score))
        .route("/{id}/stream", get(handlers::sse::exam_stream))
}

fn lives_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::lives::get_lives))
        .route("/lose", post(handlers::lives::lose_life))
}

fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/exams", get(handlers::admin::list_exams))
        .route("/eligibility/blocked", get(handlers::admin::list_blocked))
        .route(
            "/eligibility/{user_id}/approve",
            post(handlers::admin::approve_retake),
        )
        .route("/lives/{user_id}/reset", post(handlers::admin::reset_lives))
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ))
}
