// src/services/mock.rs

//! Scripted enricher for exercising the pipeline without the real service.

use std::{
    collections::VecDeque,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use super::enrichment::{
    EnrichmentError, EnrichmentOutcome, EnrichmentRequest, Enricher, parse_content,
};

/// What the mock answers for one call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A well-formed reply with this index and explanation.
    Answer {
        correct_index: i32,
        explanation: String,
    },
    /// Raw message content, run through the same parser as real replies.
    Raw(String),
    /// The service cannot be reached.
    Unavailable,
}

impl MockReply {
    pub fn answer(correct_index: i32, explanation: &str) -> Self {
        MockReply::Answer {
            correct_index,
            explanation: explanation.to_string(),
        }
    }
}

/// Answers from a queue of scripted replies, then falls back to a fixed one.
pub struct MockEnricher {
    script: Mutex<VecDeque<MockReply>>,
    default_reply: MockReply,
    delay: Option<Duration>,
    call_count: AtomicU32,
    requests: Mutex<Vec<EnrichmentRequest>>,
}

impl MockEnricher {
    /// Create a mock that always returns the same reply.
    pub fn with_reply(reply: MockReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: reply,
            delay: None,
            call_count: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that plays `replies` in order, then repeats `fallback`.
    pub fn scripted(replies: Vec<MockReply>, fallback: MockReply) -> Self {
        let mock = Self::with_reply(fallback);
        *lock(&mock.script) = replies.into();
        mock
    }

    /// Sleep before answering, to widen race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made to this enricher.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<EnrichmentRequest> {
        lock(&self.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Enricher for MockEnricher {
    async fn enrich(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentOutcome, EnrichmentError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        let reply = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            MockReply::Answer {
                correct_index,
                explanation,
            } => {
                let content = serde_json::json!({
                    "correctIndex": correct_index,
                    "explanation": explanation,
                })
                .to_string();
                Ok(parse_content(&content, request))
            }
            MockReply::Raw(content) => Ok(parse_content(&content, request)),
            MockReply::Unavailable => Err(EnrichmentError::Network(
                "mock reasoning service unavailable".to_string(),
            )),
        }
    }
}
