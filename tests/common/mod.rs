// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;

use quizbank::{
    config::{AiConfig, Config},
    handlers::auth::seed_admin_user,
    models::question::{NewQuestion, Question},
    repository::{MemoryRepository, QuestionRepository},
    routes,
    services::mock::{MockEnricher, MockReply},
    state::AppState,
};

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-password";

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub repo: Arc<MemoryRepository>,
    pub enricher: Arc<MockEnricher>,
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        log_dir: "logs".to_string(),
        bind_addr: ([127, 0, 0, 1], 0).into(),
        admin_username: Some(ADMIN_USERNAME.to_string()),
        admin_password: Some(ADMIN_PASSWORD.to_string()),
        ai: AiConfig::default(),
    }
}

/// Builds the app state over in-memory storage and a scripted enricher,
/// with the admin account already seeded.
pub async fn test_state(enricher: MockEnricher) -> (AppState, Arc<MemoryRepository>, Arc<MockEnricher>) {
    let config = test_config();
    let repo = Arc::new(MemoryRepository::new());
    let enricher = Arc::new(enricher);

    seed_admin_user(repo.as_ref(), &config)
        .await
        .expect("Failed to seed admin");

    let state = AppState::new(repo.clone(), enricher.clone(), config);
    (state, repo, enricher)
}

/// Spawns the app on a random port.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(MockEnricher::with_reply(MockReply::answer(
        0,
        "Option 0 is correct.",
    )))
    .await
}

pub async fn spawn_app_with(enricher: MockEnricher) -> TestApp {
    let (state, repo, enricher) = test_state(enricher).await;
    let app = routes::create_router(state);

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        repo,
        enricher,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn login(&self, username: &str, password: &str) -> serde_json::Value {
        self.client
            .post(self.url("/api/auth/login"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Login failed")
            .json()
            .await
            .expect("Failed to parse login json")
    }

    pub async fn admin_token(&self) -> String {
        let body = self.login(ADMIN_USERNAME, ADMIN_PASSWORD).await;
        body["token"].as_str().expect("Token not found").to_string()
    }

    /// Registers a fresh learner and returns its username.
    pub async fn register_learner(&self) -> String {
        // Truncate UUID to keep the username short
        let username = format!("u_{}", &uuid::Uuid::new_v4().to_string()[..8]);
        let response = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&serde_json::json!({ "username": username, "password": "password123" }))
            .send()
            .await
            .expect("Register failed");
        assert_eq!(response.status().as_u16(), 201);
        username
    }

    pub async fn check_answer(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/check-answer"))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Stores a question directly, bypassing enrichment.
    pub async fn seed_question(&self, question: NewQuestion) -> Question {
        self.repo
            .insert_questions(vec![question])
            .await
            .expect("Failed to seed question")
            .remove(0)
    }
}

/// A four-option single-answer question with key 1 and no explanation.
pub fn single_answer_question() -> NewQuestion {
    NewQuestion {
        text: "What does `1 + 1` print?".to_string(),
        options: vec!["1".into(), "2".into(), "11".into(), "error".into()],
        correct_index: Some(1),
        correct_indices: vec![1],
        answer_explanations: vec![String::new(); 4],
        ..Default::default()
    }
}

/// A four-option multi-select question with key {0, 2}.
pub fn multi_select_question() -> NewQuestion {
    NewQuestion {
        text: "Which types are primitives?".to_string(),
        options: vec!["int".into(), "String".into(), "boolean".into(), "List".into()],
        correct_index: Some(0),
        correct_indices: vec![0, 2],
        explanation: Some("int and boolean are primitives.".to_string()),
        answer_explanations: vec![String::new(); 4],
        ..Default::default()
    }
}
