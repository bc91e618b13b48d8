// src/services/importer.rs

//! Turns incoming question records into complete questions ready to persist.
//!
//! Records arrive either in the external import format
//! (`{question, answers: [{answer, is_right, explanation}]}`) or in the
//! internal create format. Both go through [`complete_question`], which asks
//! the reasoning service for whatever key or explanation is missing.

use serde::Serialize;
use thiserror::Error;

use crate::{
    models::question::{ImportRecord, NewQuestion},
    services::enrichment::{EnrichmentOutcome, EnrichmentRequest, Enricher, KnownAnswer, Mode},
};

/// Appended to the explanation when the answer key had to be made up.
pub const FORCED_DEFAULT_NOTE: &str = "Note: the correct answer could not be determined \
     automatically. Option 0 was assigned by default and needs review.";

/// Why a single record was left out of a batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("question text is missing")]
    MissingText,

    #[error("question has no answers")]
    NoAnswers,

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    /// Position of the record in the submitted batch.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub questions: Vec<NewQuestion>,
    pub skipped: Vec<SkippedRecord>,
}

/// Maps one external record onto the internal representation.
///
/// Every flagged answer joins `correct_indices`; the legacy `correct_index`
/// slot keeps the last flagged one.
pub fn normalize_record(record: ImportRecord) -> Result<NewQuestion, ImportError> {
    let text = record
        .question
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ImportError::MissingText)?
        .to_string();

    if record.answers.is_empty() {
        return Err(ImportError::NoAnswers);
    }

    let mut question = NewQuestion {
        text,
        code_snippet: record.code_snippet.filter(|c| !c.trim().is_empty()),
        explanation: record.explanation.filter(|e| !e.trim().is_empty()),
        ..NewQuestion::default()
    };

    for (i, answer) in record.answers.into_iter().enumerate() {
        let index = i as i32;
        question.options.push(answer.answer);
        question
            .answer_explanations
            .push(answer.explanation.unwrap_or_default());

        if answer.is_right {
            question.correct_indices.push(index);
            question.correct_index = Some(index);
        }
    }

    Ok(question)
}

/// Fills in a missing answer key and/or explanation.
///
/// * key and explanation present: returned as is, no service call;
/// * no key: discover mode, and only a confident reply may set the key;
/// * key but no explanation: justify mode; if that fails the explanation stays
///   empty and is backfilled on first answer.
///
/// Never fails: service problems lower the quality of the result instead.
pub async fn complete_question(enricher: &dyn Enricher, mut question: NewQuestion) -> NewQuestion {
    let has_key = question.has_key();
    let has_explanation = question.has_explanation();

    if has_key && has_explanation {
        return finalize(question);
    }

    let mode = match KnownAnswer::from_key(question.correct_index, &question.correct_indices) {
        Some(known) => Mode::Justify(known),
        None => Mode::Discover,
    };

    let request = EnrichmentRequest {
        question_text: question.text.clone(),
        code_snippet: question.code_snippet.clone(),
        options: question.options.clone(),
        mode,
    };

    match enricher.enrich(&request).await {
        Ok(EnrichmentOutcome::Confident(result)) => {
            if !has_key {
                question.correct_index = Some(result.correct_index);
                question.correct_indices = vec![result.correct_index];
            }
            if !has_explanation {
                question.explanation = Some(result.explanation);
            }
        }
        Ok(EnrichmentOutcome::Degraded { result, raw }) => {
            tracing::warn!(
                "Degraded {} reply for imported question {:?}: {}",
                request.mode.label(),
                question.text,
                raw
            );
            if !has_key {
                question.low_confidence = true;
                if !has_explanation {
                    question.explanation = Some(result.explanation);
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                "Enrichment failed for imported question {:?}: {}",
                question.text,
                e
            );
            if !has_key {
                question.low_confidence = true;
            }
        }
    }

    finalize(question)
}

/// Guarantees a legacy `correct_index`, forcing option 0 as a last resort.
fn finalize(mut question: NewQuestion) -> NewQuestion {
    if question.correct_index.is_none() {
        question.correct_index = question.correct_indices.first().copied();
    }

    if question.correct_index.is_none() {
        tracing::warn!(
            "No answer key for question {:?}, defaulting to option 0",
            question.text
        );
        question.correct_index = Some(0);
        question.low_confidence = true;
        question.explanation = Some(match question.explanation.take() {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{}\n\n{}", existing, FORCED_DEFAULT_NOTE)
            }
            _ => FORCED_DEFAULT_NOTE.to_string(),
        });
    }

    question
}

/// Normalizes and completes every record, dropping the ones that fail.
pub async fn import_batch<T, F>(enricher: &dyn Enricher, records: Vec<T>, normalize: F) -> ImportReport
where
    F: Fn(T) -> Result<NewQuestion, ImportError>,
{
    let mut report = ImportReport::default();

    for (index, record) in records.into_iter().enumerate() {
        match normalize(record) {
            Ok(question) => {
                report
                    .questions
                    .push(complete_question(enricher, question).await);
            }
            Err(e) => {
                tracing::warn!("Skipping import record #{}: {}", index, e);
                report.skipped.push(SkippedRecord {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    report
}
