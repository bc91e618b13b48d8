// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::AppError,
    models::question::{CreateQuestionRequest, ImportRecord, NewQuestion, Question},
    repository::QuestionRepository,
    services::importer::{
        ImportError, ImportReport, SkippedRecord, complete_question, import_batch,
        normalize_record,
    },
    state::AppState,
};

/// Result of a batch create or import.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub imported: usize,
    pub questions: Vec<Question>,
    pub skipped: Vec<SkippedRecord>,
}

/// Creates a single question in the internal format.
/// A missing key or explanation is completed by the reasoning service.
/// Admin only.
pub async fn create_question(
    State(state): State<AppState>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let question = NewQuestion::try_from(payload)?;
    let question = complete_question(state.enricher.as_ref(), question).await;

    let mut saved = state.repo.insert_questions(vec![question]).await?;
    let saved = saved
        .pop()
        .ok_or(AppError::InternalServerError("insert returned no row".to_string()))?;

    tracing::info!("Created question {}", saved.id);
    Ok((StatusCode::CREATED, Json(saved)))
}

/// Creates many questions in the internal format. Invalid entries are skipped.
/// Admin only.
pub async fn create_questions_bulk(
    State(state): State<AppState>,
    Json(payload): Json<Vec<Value>>,
) -> Result<impl IntoResponse, AppError> {
    let report = import_batch(state.enricher.as_ref(), payload, |value| {
        let req: CreateQuestionRequest = parse_record(value)?;
        NewQuestion::try_from(req).map_err(|e| ImportError::Invalid(e.to_string()))
    })
    .await;

    persist_report(&state, report).await
}

/// Imports questions from the external `{question, answers}` format.
/// Admin only.
pub async fn import_questions(
    State(state): State<AppState>,
    Json(payload): Json<Vec<Value>>,
) -> Result<impl IntoResponse, AppError> {
    let report = import_batch(state.enricher.as_ref(), payload, |value| {
        normalize_record(parse_record::<ImportRecord>(value)?)
    })
    .await;

    persist_report(&state, report).await
}

/// Decodes one batch entry on its own, so a malformed entry only skips itself.
fn parse_record<T: DeserializeOwned>(value: Value) -> Result<T, ImportError> {
    serde_json::from_value(value).map_err(|e| ImportError::Invalid(format!("malformed record: {}", e)))
}

/// Saves a completed batch in one transaction. An empty batch is rejected.
async fn persist_report(
    state: &AppState,
    report: ImportReport,
) -> Result<(StatusCode, Json<ImportResponse>), AppError> {
    if report.questions.is_empty() {
        return Err(AppError::BadRequest(format!(
            "No valid questions to import ({} records skipped)",
            report.skipped.len()
        )));
    }

    let questions = state.repo.insert_questions(report.questions).await?;

    tracing::info!(
        "Imported {} questions, skipped {}",
        questions.len(),
        report.skipped.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(ImportResponse {
            imported: questions.len(),
            questions,
            skipped: report.skipped,
        }),
    ))
}

/// Deletes a question and every attempt recorded against it.
/// Admin only.
pub async fn delete_question(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !state.repo.delete_question(id).await? {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
