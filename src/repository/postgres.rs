// src/repository/postgres.rs

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};

use super::{AttemptRepository, QuestionRepository, UserRepository};
use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, QuestionStats, Selection},
        question::{NewQuestion, Question},
        user::{Role, User},
    },
};

const QUESTION_COLUMNS: &str = "id, text, code_snippet, options, correct_index, correct_indices, \
     explanation, answer_explanations, low_confidence, created_at";

const ATTEMPT_COLUMNS: &str =
    "id, user_id, question_id, selected_index, selected_indices, is_correct, updated_at";

/// SQLSTATE raised by `~` for a malformed pattern.
const INVALID_REGULAR_EXPRESSION: &str = "2201B";

/// Postgres-backed storage.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionRepository for PgRepository {
    async fn find_question(&self, id: i64) -> Result<Option<Question>, AppError> {
        let question = sqlx::query_as::<_, Question>(&format!(
            "SELECT {} FROM questions WHERE id = $1",
            QUESTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch question {}: {:?}", id, e);
            AppError::from(e)
        })?;

        Ok(question)
    }

    async fn find_questions(&self, ids: &[i64]) -> Result<Vec<Question>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM questions WHERE id IN (", QUESTION_COLUMNS));

        let mut separated = query_builder.separated(",");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

        let questions = query_builder
            .build_query_as::<Question>()
            .fetch_all(&self.pool)
            .await?;

        Ok(questions)
    }

    async fn list_questions(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Question>, i64), AppError> {
        let questions = sqlx::query_as::<_, Question>(&format!(
            "SELECT {} FROM questions ORDER BY id LIMIT $1 OFFSET $2",
            QUESTION_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list questions: {:?}", e);
            AppError::from(e)
        })?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
            .fetch_one(&self.pool)
            .await?;

        Ok((questions, total))
    }

    async fn random_questions(
        &self,
        limit: i64,
        pattern: Option<&str>,
    ) -> Result<Vec<Question>, AppError> {
        let questions = sqlx::query_as::<_, Question>(&format!(
            "SELECT {} FROM questions WHERE ($1::TEXT IS NULL OR text ~ $1) ORDER BY RANDOM() LIMIT $2",
            QUESTION_COLUMNS
        ))
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            // Postgres uses POSIX regexes, which reject some patterns the `regex` crate accepts.
            if e
                .as_database_error()
                .and_then(|db| db.code())
                .is_some_and(|code| code == INVALID_REGULAR_EXPRESSION)
            {
                return AppError::BadRequest(format!("Invalid pattern: {}", e));
            }
            tracing::error!("Failed to fetch random questions: {:?}", e);
            AppError::from(e)
        })?;

        Ok(questions)
    }

    async fn insert_questions(
        &self,
        questions: Vec<NewQuestion>,
    ) -> Result<Vec<Question>, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(questions.len());

        for q in questions {
            let question = sqlx::query_as::<_, Question>(&format!(
                r#"
                INSERT INTO questions
                (text, code_snippet, options, correct_index, correct_indices,
                 explanation, answer_explanations, low_confidence)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {}
                "#,
                QUESTION_COLUMNS
            ))
            .bind(q.text)
            .bind(q.code_snippet)
            .bind(Json(q.options))
            .bind(q.correct_index)
            .bind(Json(q.correct_indices))
            .bind(q.explanation)
            .bind(Json(q.answer_explanations))
            .bind(q.low_confidence)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!("Failed to insert question: {:?}", e);
                AppError::from(e)
            })?;

            saved.push(question);
        }

        tx.commit().await?;

        Ok(saved)
    }

    async fn set_explanation_if_empty(
        &self,
        id: i64,
        explanation: &str,
    ) -> Result<Option<String>, AppError> {
        let written: Option<Option<String>> = sqlx::query_scalar(
            r#"
            UPDATE questions SET explanation = $2
            WHERE id = $1 AND (explanation IS NULL OR btrim(explanation) = '')
            RETURNING explanation
            "#,
        )
        .bind(id)
        .bind(explanation)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to backfill explanation for {}: {:?}", id, e);
            AppError::from(e)
        })?;

        if let Some(stored) = written {
            return Ok(stored);
        }

        // Someone else filled it first (or the question is gone).
        let current: Option<Option<String>> =
            sqlx::query_scalar("SELECT explanation FROM questions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(current.flatten())
    }

    async fn delete_question(&self, id: i64) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM question_attempts WHERE question_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM questions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete question: {:?}", e);
                AppError::from(e)
            })?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AttemptRepository for PgRepository {
    async fn upsert_attempt(
        &self,
        user_id: i64,
        question_id: i64,
        selection: &Selection,
        is_correct: bool,
    ) -> Result<Attempt, AppError> {
        // The partial unique index on (user_id, question_id) makes this a
        // single atomic read-modify-write.
        let attempt = sqlx::query_as::<_, Attempt>(&format!(
            r#"
            INSERT INTO question_attempts
            (user_id, question_id, selected_index, selected_indices, is_correct)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, question_id) WHERE user_id IS NOT NULL DO UPDATE SET
                selected_index = EXCLUDED.selected_index,
                selected_indices = EXCLUDED.selected_indices,
                is_correct = EXCLUDED.is_correct,
                updated_at = CURRENT_TIMESTAMP
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(user_id)
        .bind(question_id)
        .bind(selection.selected_index())
        .bind(Json(selection.selected_indices()))
        .bind(is_correct)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upsert attempt: {:?}", e);
            AppError::from(e)
        })?;

        Ok(attempt)
    }

    async fn insert_anonymous_attempt(
        &self,
        question_id: i64,
        selection: &Selection,
        is_correct: bool,
    ) -> Result<Attempt, AppError> {
        let attempt = sqlx::query_as::<_, Attempt>(&format!(
            r#"
            INSERT INTO question_attempts
            (user_id, question_id, selected_index, selected_indices, is_correct)
            VALUES (NULL, $1, $2, $3, $4)
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(question_id)
        .bind(selection.selected_index())
        .bind(Json(selection.selected_indices()))
        .bind(is_correct)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert anonymous attempt: {:?}", e);
            AppError::from(e)
        })?;

        Ok(attempt)
    }

    async fn attempts_for_user(&self, user_id: i64) -> Result<Vec<Attempt>, AppError> {
        let attempts = sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {} FROM question_attempts WHERE user_id = $1 ORDER BY question_id",
            ATTEMPT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn question_stats(
        &self,
        question_id: i64,
        slots: usize,
    ) -> Result<QuestionStats, AppError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM question_attempts WHERE question_id = $1")
                .bind(question_id)
                .fetch_one(&self.pool)
                .await?;

        let mut stats = QuestionStats {
            total,
            ..QuestionStats::default()
        };

        for slot in 0..slots as i32 {
            let count: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM question_attempts
                WHERE question_id = $1
                  AND (selected_index = $2 OR selected_indices @> jsonb_build_array($2::INT))
                "#,
            )
            .bind(question_id)
            .bind(slot)
            .fetch_one(&self.pool)
            .await?;

            stats.counts.insert(slot, count);
        }

        Ok(stats)
    }
}

#[async_trait]
impl UserRepository for PgRepository {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password, role, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("User lookup failed: {:?}", e);
            AppError::from(e)
        })?;

        Ok(user)
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password, role)
            VALUES ($1, $2, $3)
            RETURNING id, username, password, role, created_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                AppError::Conflict(format!("Username '{}' already exists", username))
            } else {
                tracing::error!("Failed to create user: {:?}", e);
                AppError::from(e)
            }
        })
    }
}
