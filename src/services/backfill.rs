// src/services/backfill.rs

//! Lazily fills a question's explanation the first time someone answers it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    error::AppError,
    models::question::Question,
    repository::Repository,
    services::enrichment::{EnrichmentOutcome, EnrichmentRequest, Enricher, KnownAnswer, Mode},
};

/// Shown when the reasoning service could not be reached.
pub const UNAVAILABLE_EXPLANATION: &str =
    "An explanation is not available yet. Please check back later.";

/// Read-through cache for question explanations with write-back to storage.
///
/// Backfill for one question id is serialized in-process, and the final write
/// only succeeds while the stored explanation is still empty, so a filled
/// explanation is never replaced.
pub struct ExplanationBackfill {
    repo: Arc<dyn Repository>,
    enricher: Arc<dyn Enricher>,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ExplanationBackfill {
    pub fn new(repo: Arc<dyn Repository>, enricher: Arc<dyn Enricher>) -> Self {
        Self {
            repo,
            enricher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `question` with a non-empty explanation whenever one can be had.
    ///
    /// Only a confident reply is persisted. Degraded replies and transport
    /// failures produce a placeholder for this response only, so the next
    /// request tries again.
    pub async fn ensure_explanation(&self, question: Question) -> Result<Question, AppError> {
        if question.has_explanation() {
            return Ok(question);
        }

        let Some(known) = KnownAnswer::from_key(question.correct_index, &question.correct_indices)
        else {
            tracing::warn!(
                "Question {} has no answer key, skipping explanation backfill",
                question.id
            );
            return Ok(question);
        };

        let id = question.id;
        let key_lock = self.key_lock(id);
        let result = {
            let _guard = key_lock.lock().await;
            self.fill(id, known).await
        };
        self.release(id, &key_lock);

        result
    }

    async fn fill(&self, id: i64, known: KnownAnswer) -> Result<Question, AppError> {
        // Re-read: another request may have filled it while we waited.
        let mut question = self
            .repo
            .find_question(id)
            .await?
            .ok_or(AppError::NotFound("Question not found".to_string()))?;

        if question.has_explanation() {
            return Ok(question);
        }

        let request = EnrichmentRequest {
            question_text: question.text.clone(),
            code_snippet: question.code_snippet.clone(),
            options: question.options.0.clone(),
            mode: Mode::Justify(known),
        };

        match self.enricher.enrich(&request).await {
            Ok(EnrichmentOutcome::Confident(result)) => {
                let stored = self
                    .repo
                    .set_explanation_if_empty(id, &result.explanation)
                    .await?
                    .ok_or(AppError::NotFound("Question not found".to_string()))?;
                tracing::info!("Backfilled explanation for question {}", id);
                question.explanation = Some(stored);
            }
            Ok(outcome @ EnrichmentOutcome::Degraded { .. }) => {
                tracing::warn!(
                    "Degraded explanation for question {}, not persisting it",
                    id
                );
                question.explanation = Some(outcome.explanation().to_string());
            }
            Err(e) => {
                tracing::warn!("Explanation backfill for question {} failed: {}", id, e);
                question.explanation = Some(UNAVAILABLE_EXPLANATION.to_string());
            }
        }

        Ok(question)
    }

    fn key_lock(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Drops the per-question lock once nobody else is waiting on it.
    fn release(&self, id: i64, key_lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one held by the caller.
        if Arc::strong_count(key_lock) <= 2 {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }
}
