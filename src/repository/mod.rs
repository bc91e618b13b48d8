// src/repository/mod.rs

//! Persistence boundary. Handlers and services only see these traits;
//! `postgres` backs the running server, `memory` backs tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, QuestionStats, Selection},
        question::{NewQuestion, Question},
        user::{Role, User},
    },
};

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    async fn find_question(&self, id: i64) -> Result<Option<Question>, AppError>;

    /// Questions with the given ids, in id order. Unknown ids are ignored.
    async fn find_questions(&self, ids: &[i64]) -> Result<Vec<Question>, AppError>;

    /// One page of questions in id order, plus the total number of questions.
    async fn list_questions(&self, offset: i64, limit: i64)
    -> Result<(Vec<Question>, i64), AppError>;

    /// Up to `limit` random questions whose text matches `pattern` (if any).
    async fn random_questions(
        &self,
        limit: i64,
        pattern: Option<&str>,
    ) -> Result<Vec<Question>, AppError>;

    /// Saves the whole batch or nothing.
    async fn insert_questions(&self, questions: Vec<NewQuestion>)
    -> Result<Vec<Question>, AppError>;

    /// Writes `explanation` only if the stored one is still empty, and returns
    /// whatever the question holds afterwards. `None` if the question is gone.
    async fn set_explanation_if_empty(
        &self,
        id: i64,
        explanation: &str,
    ) -> Result<Option<String>, AppError>;

    /// Deletes the question and its attempts. Returns `false` if it did not exist.
    async fn delete_question(&self, id: i64) -> Result<bool, AppError>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Creates or overwrites the single attempt of `user_id` on `question_id`.
    async fn upsert_attempt(
        &self,
        user_id: i64,
        question_id: i64,
        selection: &Selection,
        is_correct: bool,
    ) -> Result<Attempt, AppError>;

    /// Always appends a new anonymous attempt.
    async fn insert_anonymous_attempt(
        &self,
        question_id: i64,
        selection: &Selection,
        is_correct: bool,
    ) -> Result<Attempt, AppError>;

    async fn attempts_for_user(&self, user_id: i64) -> Result<Vec<Attempt>, AppError>;

    /// Total attempts and per-option selection counts for option slots `0..slots`.
    async fn question_stats(&self, question_id: i64, slots: usize)
    -> Result<QuestionStats, AppError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    /// Fails with `AppError::Conflict` if the username is taken.
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, AppError>;
}

/// Everything the application needs from storage.
pub trait Repository: QuestionRepository + AttemptRepository + UserRepository {}

impl<T> Repository for T where T: QuestionRepository + AttemptRepository + UserRepository {}
