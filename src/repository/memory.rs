// src/repository/memory.rs

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use regex::Regex;
use sqlx::types::Json;

use super::{AttemptRepository, QuestionRepository, UserRepository};
use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, QuestionStats, Selection},
        question::{NewQuestion, Question},
        user::{Role, User},
    },
};

#[derive(Default)]
struct Store {
    questions: BTreeMap<i64, Question>,
    attempts: Vec<Attempt>,
    users: Vec<User>,
    next_question_id: i64,
    next_attempt_id: i64,
    next_user_id: i64,
}

/// In-process storage with the same semantics as [`super::PgRepository`].
///
/// Every operation runs under one lock, which gives the same atomicity as the
/// conditional writes and upserts of the SQL implementation. `random_questions`
/// is not random: it returns matches in id order.
#[derive(Default)]
pub struct MemoryRepository {
    store: Mutex<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All attempts recorded for `question_id`.
    pub fn attempts_for_question(&self, question_id: i64) -> Vec<Attempt> {
        self.lock()
            .attempts
            .iter()
            .filter(|a| a.question_id == question_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QuestionRepository for MemoryRepository {
    async fn find_question(&self, id: i64) -> Result<Option<Question>, AppError> {
        Ok(self.lock().questions.get(&id).cloned())
    }

    async fn find_questions(&self, ids: &[i64]) -> Result<Vec<Question>, AppError> {
        let store = self.lock();
        Ok(store
            .questions
            .values()
            .filter(|q| ids.contains(&q.id))
            .cloned()
            .collect())
    }

    async fn list_questions(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Question>, i64), AppError> {
        let store = self.lock();
        let page = store
            .questions
            .values()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, store.questions.len() as i64))
    }

    async fn random_questions(
        &self,
        limit: i64,
        pattern: Option<&str>,
    ) -> Result<Vec<Question>, AppError> {
        let filter = pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let store = self.lock();
        Ok(store
            .questions
            .values()
            .filter(|q| filter.as_ref().is_none_or(|re| re.is_match(&q.text)))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_questions(
        &self,
        questions: Vec<NewQuestion>,
    ) -> Result<Vec<Question>, AppError> {
        let mut store = self.lock();
        let mut saved = Vec::with_capacity(questions.len());

        for q in questions {
            store.next_question_id += 1;
            let question = Question {
                id: store.next_question_id,
                text: q.text,
                code_snippet: q.code_snippet,
                options: Json(q.options),
                correct_index: q.correct_index,
                correct_indices: Json(q.correct_indices),
                explanation: q.explanation,
                answer_explanations: Json(q.answer_explanations),
                low_confidence: q.low_confidence,
                created_at: Some(chrono::Utc::now()),
            };
            store.questions.insert(question.id, question.clone());
            saved.push(question);
        }

        Ok(saved)
    }

    async fn set_explanation_if_empty(
        &self,
        id: i64,
        explanation: &str,
    ) -> Result<Option<String>, AppError> {
        let mut store = self.lock();
        let Some(question) = store.questions.get_mut(&id) else {
            return Ok(None);
        };

        if !question.has_explanation() {
            question.explanation = Some(explanation.to_string());
        }
        Ok(question.explanation.clone())
    }

    async fn delete_question(&self, id: i64) -> Result<bool, AppError> {
        let mut store = self.lock();
        store.attempts.retain(|a| a.question_id != id);
        Ok(store.questions.remove(&id).is_some())
    }
}

#[async_trait]
impl AttemptRepository for MemoryRepository {
    async fn upsert_attempt(
        &self,
        user_id: i64,
        question_id: i64,
        selection: &Selection,
        is_correct: bool,
    ) -> Result<Attempt, AppError> {
        let mut store = self.lock();

        if let Some(existing) = store
            .attempts
            .iter_mut()
            .find(|a| a.user_id == Some(user_id) && a.question_id == question_id)
        {
            existing.selected_index = selection.selected_index();
            existing.selected_indices = Json(selection.selected_indices());
            existing.is_correct = is_correct;
            existing.updated_at = Some(chrono::Utc::now());
            return Ok(existing.clone());
        }

        store.next_attempt_id += 1;
        let attempt = Attempt {
            id: store.next_attempt_id,
            user_id: Some(user_id),
            question_id,
            selected_index: selection.selected_index(),
            selected_indices: Json(selection.selected_indices()),
            is_correct,
            updated_at: Some(chrono::Utc::now()),
        };
        store.attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn insert_anonymous_attempt(
        &self,
        question_id: i64,
        selection: &Selection,
        is_correct: bool,
    ) -> Result<Attempt, AppError> {
        let mut store = self.lock();
        store.next_attempt_id += 1;
        let attempt = Attempt {
            id: store.next_attempt_id,
            user_id: None,
            question_id,
            selected_index: selection.selected_index(),
            selected_indices: Json(selection.selected_indices()),
            is_correct,
            updated_at: Some(chrono::Utc::now()),
        };
        store.attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn attempts_for_user(&self, user_id: i64) -> Result<Vec<Attempt>, AppError> {
        let store = self.lock();
        let mut attempts: Vec<Attempt> = store
            .attempts
            .iter()
            .filter(|a| a.user_id == Some(user_id))
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.question_id);
        Ok(attempts)
    }

    async fn question_stats(
        &self,
        question_id: i64,
        slots: usize,
    ) -> Result<QuestionStats, AppError> {
        let store = self.lock();
        let attempts: Vec<Selection> = store
            .attempts
            .iter()
            .filter(|a| a.question_id == question_id)
            .map(Attempt::selection)
            .collect();

        let counts = (0..slots as i32)
            .map(|slot| {
                let count = attempts.iter().filter(|s| s.contains(slot)).count() as i64;
                (slot, count)
            })
            .collect();

        Ok(QuestionStats {
            total: attempts.len() as i64,
            counts,
        })
    }
}

#[async_trait]
impl UserRepository for MemoryRepository {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, AppError> {
        let mut store = self.lock();
        if store.users.iter().any(|u| u.username == username) {
            return Err(AppError::Conflict(format!(
                "Username '{}' already exists",
                username
            )));
        }

        store.next_user_id += 1;
        let user = User {
            id: store.next_user_id,
            username: username.to_string(),
            password: password_hash.to_string(),
            role: role.as_str().to_string(),
            created_at: Some(chrono::Utc::now()),
        };
        store.users.push(user.clone());
        Ok(user)
    }
}
