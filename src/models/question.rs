// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

use crate::{error::AppError, services::evaluator::AnswerKey};

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: i64,

    /// The text of the question.
    pub text: String,

    /// Optional code the question refers to.
    pub code_snippet: Option<String>,

    /// Answer options. Their order defines index addressing everywhere else.
    pub options: Json<Vec<String>>,

    /// Legacy single correct option. Kept for older clients; `correct_indices`
    /// wins whenever it is non-empty.
    pub correct_index: Option<i32>,

    /// Multi-select answer key.
    pub correct_indices: Json<Vec<i32>>,

    /// Question-level explanation. Written once, then never overwritten.
    pub explanation: Option<String>,

    /// Per-option explanations, aligned with `options`.
    pub answer_explanations: Json<Vec<String>>,

    /// Set when the answer key was forced or came from a degraded enrichment.
    pub low_confidence: bool,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Question {
    pub fn has_explanation(&self) -> bool {
        self.explanation
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }

    pub fn answer_key(&self) -> AnswerKey<'_> {
        AnswerKey {
            index: self.correct_index,
            indices: &self.correct_indices,
        }
    }

    /// Value exposed as `correctIndex` to clients that only know single answers.
    pub fn legacy_correct_index(&self) -> Option<i32> {
        self.correct_index
            .or_else(|| self.correct_indices.first().copied())
    }

    pub fn is_multi_select(&self) -> bool {
        self.correct_indices.len() > 1
    }
}

/// A question that has not been persisted yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewQuestion {
    pub text: String,
    pub code_snippet: Option<String>,
    pub options: Vec<String>,
    pub correct_index: Option<i32>,
    pub correct_indices: Vec<i32>,
    pub explanation: Option<String>,
    pub answer_explanations: Vec<String>,
    pub low_confidence: bool,
}

impl NewQuestion {
    pub fn has_key(&self) -> bool {
        self.correct_index.is_some() || !self.correct_indices.is_empty()
    }

    pub fn has_explanation(&self) -> bool {
        self.explanation
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }
}

/// DTO for sending a question to learners (excludes the answer key and explanations).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub id: i64,
    pub text: String,
    pub code_snippet: Option<String>,
    pub options: Vec<String>,
    /// Tells the client to render checkboxes instead of radio buttons.
    pub multi_select: bool,
}

impl From<Question> for PublicQuestion {
    fn from(q: Question) -> Self {
        let multi_select = q.is_multi_select();
        Self {
            id: q.id,
            text: q.text,
            code_snippet: q.code_snippet,
            options: q.options.0,
            multi_select,
        }
    }
}

/// One page of the public question listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPage {
    pub content: Vec<PublicQuestion>,
    pub page: i64,
    pub size: i64,
    pub total_elements: i64,
    pub total_pages: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RandomQuery {
    pub limit: Option<i64>,
    /// Regular expression the question text must match.
    pub pattern: Option<String>,
}

/// DTO for creating a question in the internal format (admin single and bulk create).
/// Any missing key or explanation is completed by the reasoning service.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 1000))]
    pub text: String,
    #[validate(length(max = 5000))]
    pub code_snippet: Option<String>,
    #[validate(custom(function = validate_options))]
    pub options: Vec<String>,
    pub correct_index: Option<i32>,
    #[serde(default)]
    pub correct_indices: Vec<i32>,
    #[validate(length(max = 2000))]
    pub explanation: Option<String>,
    #[serde(default)]
    pub answer_explanations: Vec<String>,
}

fn validate_options(options: &[String]) -> Result<(), validator::ValidationError> {
    if options.is_empty() {
        return Err(validator::ValidationError::new("options_cannot_be_empty"));
    }
    for opt in options {
        if opt.len() > 500 {
            return Err(validator::ValidationError::new("option_too_long"));
        }
    }
    Ok(())
}

impl TryFrom<CreateQuestionRequest> for NewQuestion {
    type Error = AppError;

    fn try_from(req: CreateQuestionRequest) -> Result<Self, Self::Error> {
        req.validate()?;

        let option_count = req.options.len();
        let in_range = |i: i32| usize::try_from(i).is_ok_and(|i| i < option_count);

        if let Some(bad) = req.correct_indices.iter().copied().find(|i| !in_range(*i)) {
            return Err(AppError::BadRequest(format!(
                "correctIndices contains {} but the question has {} options",
                bad, option_count
            )));
        }
        if let Some(bad) = req.correct_index.filter(|i| !in_range(*i)) {
            return Err(AppError::BadRequest(format!(
                "correctIndex {} is out of range for {} options",
                bad, option_count
            )));
        }

        let mut correct_indices = req.correct_indices;
        correct_indices.sort_unstable();
        correct_indices.dedup();

        let mut answer_explanations = req.answer_explanations;
        answer_explanations.resize(option_count, String::new());

        Ok(NewQuestion {
            text: req.text.trim().to_string(),
            code_snippet: req.code_snippet.filter(|c| !c.trim().is_empty()),
            options: req.options,
            correct_index: req.correct_index,
            correct_indices,
            explanation: req.explanation.filter(|e| !e.trim().is_empty()),
            answer_explanations,
            low_confidence: false,
        })
    }
}

/// One answer tuple of the external import format.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportAnswer {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub is_right: bool,
    pub explanation: Option<String>,
}

/// One question of the external import format.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    pub question: Option<String>,
    #[serde(alias = "code_snippet")]
    pub code_snippet: Option<String>,
    pub explanation: Option<String>,
    #[serde(default)]
    pub answers: Vec<ImportAnswer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(options: &[&str]) -> CreateQuestionRequest {
        CreateQuestionRequest {
            text: " What is 2 + 2? ".to_string(),
            code_snippet: Some("   ".to_string()),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct_index: None,
            correct_indices: vec![],
            explanation: None,
            answer_explanations: vec![],
        }
    }

    #[test]
    fn converts_and_pads_explanations() {
        let mut req = request(&["3", "4", "5"]);
        req.correct_indices = vec![1, 1];
        req.answer_explanations = vec!["too small".to_string()];

        let q = NewQuestion::try_from(req).unwrap();
        assert_eq!(q.text, "What is 2 + 2?");
        assert_eq!(q.code_snippet, None);
        assert_eq!(q.correct_indices, vec![1]);
        assert_eq!(q.answer_explanations, vec!["too small", "", ""]);
    }

    #[test]
    fn rejects_out_of_range_key() {
        let mut req = request(&["a", "b"]);
        req.correct_indices = vec![0, 2];
        assert!(matches!(
            NewQuestion::try_from(req),
            Err(AppError::BadRequest(_))
        ));

        let mut req = request(&["a", "b"]);
        req.correct_index = Some(-1);
        assert!(NewQuestion::try_from(req).is_err());
    }

    #[test]
    fn rejects_empty_options() {
        assert!(NewQuestion::try_from(request(&[])).is_err());
    }

    #[test]
    fn legacy_index_falls_back_to_first_correct_index() {
        let q = Question {
            id: 1,
            text: "t".into(),
            code_snippet: None,
            options: Json(vec!["a".into(), "b".into(), "c".into()]),
            correct_index: None,
            correct_indices: Json(vec![2, 0]),
            explanation: Some("  ".into()),
            answer_explanations: Json(vec![]),
            low_confidence: false,
            created_at: None,
        };
        assert_eq!(q.legacy_correct_index(), Some(2));
        assert!(!q.has_explanation());
        assert!(q.is_multi_select());
    }

    #[test]
    fn import_record_accepts_both_snippet_spellings() {
        let a: ImportRecord = serde_json::from_value(serde_json::json!({
            "question": "Q", "codeSnippet": "int x;", "answers": []
        }))
        .unwrap();
        let b: ImportRecord = serde_json::from_value(serde_json::json!({
            "question": "Q", "code_snippet": "int y;",
            "answers": [{ "answer": "A", "is_right": true }]
        }))
        .unwrap();
        assert_eq!(a.code_snippet.as_deref(), Some("int x;"));
        assert_eq!(b.code_snippet.as_deref(), Some("int y;"));
        assert!(b.answers[0].is_right);
        assert_eq!(b.answers[0].explanation, None);
    }
}
