// src/models/attempt.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

use crate::error::AppError;

/// What a learner picked: one option, or a set of options for multi-select questions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Single(i32),
    Multiple(Vec<i32>),
}

impl Selection {
    /// Column value for `selected_index`.
    pub fn selected_index(&self) -> Option<i32> {
        match self {
            Selection::Single(index) => Some(*index),
            Selection::Multiple(_) => None,
        }
    }

    /// Column value for `selected_indices`.
    pub fn selected_indices(&self) -> Vec<i32> {
        match self {
            Selection::Single(_) => Vec::new(),
            Selection::Multiple(indices) => indices.clone(),
        }
    }

    pub fn contains(&self, index: i32) -> bool {
        match self {
            Selection::Single(selected) => *selected == index,
            Selection::Multiple(indices) => indices.contains(&index),
        }
    }
}

/// Represents the 'question_attempts' table in the database.
/// `user_id` is NULL for anonymous submissions.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: i64,
    pub user_id: Option<i64>,
    pub question_id: i64,
    pub selected_index: Option<i32>,
    pub selected_indices: Json<Vec<i32>>,
    pub is_correct: bool,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Attempt {
    pub fn selection(&self) -> Selection {
        match self.selected_index {
            Some(index) => Selection::Single(index),
            None => Selection::Multiple(self.selected_indices.0.clone()),
        }
    }
}

/// DTO for `POST /api/check-answer`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAnswerRequest {
    pub question_id: i64,
    pub username: Option<String>,
    pub selected_option_index: Option<i32>,
    pub selected_indices: Option<Vec<i32>>,
}

impl CheckAnswerRequest {
    /// Exactly one of the two selection fields must be present.
    pub fn selection(&self) -> Result<Selection, AppError> {
        match (self.selected_option_index, &self.selected_indices) {
            (Some(index), None) => Ok(Selection::Single(index)),
            (None, Some(indices)) if !indices.is_empty() => {
                Ok(Selection::Multiple(indices.clone()))
            }
            (None, Some(_)) => Err(AppError::BadRequest(
                "selectedIndices must not be empty".to_string(),
            )),
            (Some(_), Some(_)) => Err(AppError::BadRequest(
                "Send either selectedOptionIndex or selectedIndices, not both".to_string(),
            )),
            (None, None) => Err(AppError::BadRequest("No answer selected".to_string())),
        }
    }

    pub fn learner_name(&self) -> Option<&str> {
        self.username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Aggregate answer distribution for one question.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuestionStats {
    pub total: i64,
    /// Option index -> number of attempts that selected it.
    pub counts: BTreeMap<i32, i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAnswerResponse {
    pub correct: bool,
    pub correct_index: Option<i32>,
    pub correct_indices: Vec<i32>,
    pub explanation: Option<String>,
    pub answer_explanations: Vec<String>,
    pub stats: QuestionStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub correct: bool,
    pub correct_index: Option<i32>,
    pub correct_indices: Vec<i32>,
    pub explanation: Option<String>,
}

/// A learner's stored answer to one question, as shown when they come back.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub selected_index: Option<i32>,
    pub selected_indices: Vec<i32>,
    pub feedback: Feedback,
}
