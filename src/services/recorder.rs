// src/services/recorder.rs

use crate::{
    error::AppError,
    models::attempt::{Attempt, Selection},
    repository::AttemptRepository,
};

/// Stores a learner's attempt at a question.
///
/// An identified learner keeps exactly one attempt per question, overwritten
/// by each new submission. Anonymous submissions always add a new row.
pub async fn record_attempt<R>(
    repo: &R,
    learner_id: Option<i64>,
    question_id: i64,
    selection: &Selection,
    is_correct: bool,
) -> Result<Attempt, AppError>
where
    R: AttemptRepository + ?Sized,
{
    match learner_id {
        Some(user_id) => {
            repo.upsert_attempt(user_id, question_id, selection, is_correct)
                .await
        }
        None => {
            repo.insert_anonymous_attempt(question_id, selection, is_correct)
                .await
        }
    }
}
