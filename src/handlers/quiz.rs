// src/handlers/quiz.rs

use std::collections::{BTreeMap, HashMap};

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use regex::Regex;

use crate::{
    config::{DEFAULT_PAGE_SIZE, DEFAULT_QUIZ_SIZE, MAX_PAGE_SIZE, MAX_QUIZ_SIZE, STATS_OPTION_SLOTS},
    error::AppError,
    models::{
        attempt::{CheckAnswerRequest, CheckAnswerResponse, Feedback, ProgressEntry},
        question::{PageQuery, PublicQuestion, QuestionPage, RandomQuery},
    },
    repository::{AttemptRepository, QuestionRepository, UserRepository},
    services::{evaluator, recorder::record_attempt},
    state::AppState,
};

/// Lists questions page by page, without answer keys.
pub async fn list_questions(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page.unwrap_or(0).max(0);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let offset = page
        .checked_mul(size)
        .ok_or(AppError::BadRequest(format!("Page {} is out of range", page)))?;

    let (questions, total) = state.repo.list_questions(offset, size).await?;

    Ok(Json(QuestionPage {
        content: questions.into_iter().map(PublicQuestion::from).collect(),
        page,
        size,
        total_elements: total,
        total_pages: (total + size - 1) / size,
    }))
}

/// Draws a random quiz, optionally restricted to questions whose text matches `pattern`.
pub async fn random_quiz(
    State(state): State<AppState>,
    Query(query): Query<RandomQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_QUIZ_SIZE).clamp(1, MAX_QUIZ_SIZE);
    let pattern = query.pattern.as_deref().filter(|p| !p.is_empty());

    if let Some(pattern) = pattern {
        Regex::new(pattern).map_err(|e| AppError::BadRequest(format!("Invalid pattern: {}", e)))?;
    }

    let questions = state.repo.random_questions(limit, pattern).await?;

    Ok(Json(
        questions
            .into_iter()
            .map(PublicQuestion::from)
            .collect::<Vec<_>>(),
    ))
}

/// Checks a submitted answer.
///
/// * Evaluates the selection against the stored key.
/// * Backfills the explanation on first use.
/// * Records the attempt (one per learner, unlimited for anonymous users).
/// * Returns the verdict with the current answer distribution.
pub async fn check_answer(
    State(state): State<AppState>,
    Json(req): Json<CheckAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let selection = req.selection()?;

    let question = state
        .repo
        .find_question(req.question_id)
        .await?
        .ok_or(AppError::NotFound("Question not found".to_string()))?;

    let correct = evaluator::is_correct(question.answer_key(), &selection);

    let question = state.backfill.ensure_explanation(question).await?;

    // Unknown usernames are treated as anonymous.
    let learner_id = match req.learner_name() {
        Some(name) => state
            .repo
            .find_user_by_username(name)
            .await?
            .map(|user| user.id),
        None => None,
    };

    record_attempt(
        state.repo.as_ref(),
        learner_id,
        question.id,
        &selection,
        correct,
    )
    .await?;

    let slots = STATS_OPTION_SLOTS.max(question.options.len());
    let stats = state.repo.question_stats(question.id, slots).await?;

    Ok(Json(CheckAnswerResponse {
        correct,
        correct_index: question.legacy_correct_index(),
        correct_indices: question.correct_indices.0,
        explanation: question.explanation,
        answer_explanations: question.answer_explanations.0,
        stats,
    }))
}

/// Returns every stored answer of a learner, keyed by question id.
/// Unknown users simply have no progress.
pub async fn user_progress(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let Some(user) = state.repo.find_user_by_username(&username).await? else {
        return Ok(Json(BTreeMap::new()));
    };

    let attempts = state.repo.attempts_for_user(user.id).await?;
    let ids: Vec<i64> = attempts.iter().map(|a| a.question_id).collect();
    let questions: HashMap<i64, _> = state
        .repo
        .find_questions(&ids)
        .await?
        .into_iter()
        .map(|q| (q.id, q))
        .collect();

    let progress: BTreeMap<i64, ProgressEntry> = attempts
        .into_iter()
        .filter_map(|attempt| {
            let question = questions.get(&attempt.question_id)?;
            Some((
                attempt.question_id,
                ProgressEntry {
                    selected_index: attempt.selected_index,
                    selected_indices: attempt.selected_indices.0,
                    feedback: Feedback {
                        correct: attempt.is_correct,
                        correct_index: question.legacy_correct_index(),
                        correct_indices: question.correct_indices.0.clone(),
                        explanation: question.explanation.clone(),
                    },
                },
            ))
        })
        .collect();

    Ok(Json(progress))
}
