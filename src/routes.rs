// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, quiz},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, questions, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (repository, enricher, config).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let question_routes = Router::new()
        .route("/", get(quiz::list_questions))
        .route("/random", get(quiz::random_quiz));

    let admin_routes = Router::new()
        .route("/questions", post(admin::create_question))
        .route("/questions/bulk", post(admin::create_questions_bulk))
        .route("/questions/import", post(admin::import_questions))
        .route("/questions/{id}", delete(admin::delete_question))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/questions", question_routes)
        .route("/api/check-answer", post(quiz::check_answer))
        .route("/api/user/{username}/progress", get(quiz::user_progress))
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
