// src/services/enrichment.rs

//! Client for the external reasoning service that determines and explains
//! answers.
//!
//! The service is called in one of two modes:
//! * **discover**: the correct option is unknown and must be determined;
//! * **justify**: the correct option is fixed by a human and only an
//!   explanation is requested.
//!
//! Replies are untrusted text. Anything that cannot be read as the expected
//! JSON object becomes [`EnrichmentOutcome::Degraded`], which callers must
//! never treat as a discovered answer.

use std::{
    sync::LazyLock,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::config::AiConfig;

/// Index reported by a degraded outcome. It carries no information.
pub const DEGRADED_INDEX: i32 = 0;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("code fence regex is valid")
});

/// Errors that prevent the service from answering at all.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    /// No API key is configured.
    #[error("reasoning service is not configured")]
    NotConfigured,

    #[error("failed to build HTTP client: {0}")]
    Setup(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
}

impl EnrichmentError {
    /// Whether a second attempt has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            EnrichmentError::Timeout(_) | EnrichmentError::Network(_) => true,
            EnrichmentError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// The answer a human already fixed for a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownAnswer {
    Single(i32),
    /// Several correct options; the prompt names all of them by text.
    Multiple(Vec<i32>),
}

impl KnownAnswer {
    /// Builds the answer to defend from a question's key, preferring the
    /// multi-select representation. `None` when the key is empty.
    pub fn from_key(correct_index: Option<i32>, correct_indices: &[i32]) -> Option<Self> {
        match correct_indices {
            [] => correct_index.map(KnownAnswer::Single),
            [single] => Some(KnownAnswer::Single(*single)),
            many => Some(KnownAnswer::Multiple(many.to_vec())),
        }
    }

    /// Index reported back to callers in justify mode.
    pub fn primary_index(&self) -> i32 {
        match self {
            KnownAnswer::Single(index) => *index,
            KnownAnswer::Multiple(indices) => indices.first().copied().unwrap_or(DEGRADED_INDEX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Discover,
    Justify(KnownAnswer),
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Discover => "discover",
            Mode::Justify(_) => "justify",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub question_text: String,
    pub code_snippet: Option<String>,
    pub options: Vec<String>,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentResult {
    pub correct_index: i32,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// The service answered in the expected shape.
    Confident(EnrichmentResult),
    /// The reply could not be trusted. `result` is a placeholder with
    /// [`DEGRADED_INDEX`] and an explanation embedding the raw reply.
    Degraded { result: EnrichmentResult, raw: String },
}

impl EnrichmentOutcome {
    pub fn degraded(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        EnrichmentOutcome::Degraded {
            result: EnrichmentResult {
                correct_index: DEGRADED_INDEX,
                explanation: format!("Error parsing AI response: {}", raw),
            },
            raw,
        }
    }

    pub fn explanation(&self) -> &str {
        match self {
            EnrichmentOutcome::Confident(result) => &result.explanation,
            EnrichmentOutcome::Degraded { result, .. } => &result.explanation,
        }
    }
}

/// Anything that can enrich a question. Implemented by [`ReasoningClient`]
/// and by [`crate::services::mock::MockEnricher`].
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentOutcome, EnrichmentError>;
}

/// Builds the deterministic prompt sent for `request`.
pub fn build_prompt(request: &EnrichmentRequest) -> String {
    let mut prompt = String::from(
        "Act as a strict Java compiler and runtime environment.\n\
         Analyze the following multiple-choice question:\n",
    );

    prompt.push_str(&format!("Question: \"{}\"\n", request.question_text));

    if let Some(code) = request
        .code_snippet
        .as_deref()
        .filter(|c| !c.trim().is_empty())
    {
        prompt.push_str(&format!("Code Snippet:\n```java\n{}\n```\n", code));
    }

    prompt.push_str("Options:\n");
    for (i, option) in request.options.iter().enumerate() {
        prompt.push_str(&format!("{}: {}\n", i, option));
    }
    prompt.push('\n');

    let mut rules = String::from(
        "CRITICAL RULES:\n\
         1. Pay extreme attention to string case sensitivity ('Java' != 'java').\n\
         2. Distinguish reference equality (==) from content equality (.equals()).\n\
         3. If the code does not compile, select the option mentioning 'Error' or 'Compilation'.\n",
    );

    let (task, example_index) = match &request.mode {
        Mode::Discover => (
            "Task: Identify the correct option (0-based index) and provide a concise \
             technical explanation.\n"
                .to_string(),
            0,
        ),
        Mode::Justify(known) => {
            let answer = describe_known_answer(known, &request.options);
            rules.push_str(&format!(
                "4. OVERRIDE RULE: You MUST accept {} as the correct answer. \
                 Do not argue with it. Justify it.\n",
                answer
            ));
            (
                format!(
                    "Task: The correct answer IS ABSOLUTELY {}. Your job is ONLY to explain \
                     why it is correct.\n",
                    answer
                ),
                known.primary_index(),
            )
        }
    };

    prompt.push_str(&task);
    prompt.push_str(&rules);
    prompt.push_str(&format!(
        "Output Format: Return strictly a JSON object exactly like this:\n\
         {{ \"correctIndex\": {}, \"explanation\": \"Technical explanation here.\" }}",
        example_index
    ));

    prompt
}

fn describe_known_answer(known: &KnownAnswer, options: &[String]) -> String {
    match known {
        KnownAnswer::Single(index) => format!("OPTION {}", index),
        KnownAnswer::Multiple(indices) => {
            let numbers = indices
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let texts = indices
                .iter()
                .filter_map(|i| usize::try_from(*i).ok().and_then(|i| options.get(i)))
                .map(|text| format!("\"{}\"", text))
                .collect::<Vec<_>>()
                .join(" AND ");
            format!("the combination of OPTIONS {} ({})", numbers, texts)
        }
    }
}

/// Removes a Markdown code fence around the payload, if there is one.
pub fn strip_code_fence(content: &str) -> &str {
    match CODE_FENCE.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => content.trim(),
    }
}

#[derive(Deserialize)]
struct Payload {
    #[serde(rename = "correctIndex", default)]
    correct_index: Option<serde_json::Value>,
    #[serde(default)]
    explanation: Option<String>,
}

fn read_index(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Turns the message content returned by the service into an outcome.
pub fn parse_content(content: &str, request: &EnrichmentRequest) -> EnrichmentOutcome {
    // A bare object may itself contain fences inside the explanation.
    let candidate = if content.trim_start().starts_with('{') {
        content.trim()
    } else {
        strip_code_fence(content)
    };

    let payload: Payload = match serde_json::from_str(candidate) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Unparsable reasoning-service content ({}): {}", e, content);
            return EnrichmentOutcome::degraded(content);
        }
    };

    let Some(explanation) = payload
        .explanation
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
    else {
        tracing::warn!("Reasoning-service content has no explanation: {}", content);
        return EnrichmentOutcome::degraded(content);
    };

    let echoed = payload.correct_index.as_ref().and_then(read_index);

    let correct_index = match &request.mode {
        Mode::Justify(known) => {
            let fixed = known.primary_index();
            if echoed.is_some_and(|i| i != i64::from(fixed)) {
                tracing::debug!(
                    "Reasoning service echoed index {:?} instead of {}; keeping {}",
                    echoed,
                    fixed,
                    fixed
                );
            }
            fixed
        }
        Mode::Discover => {
            let valid = echoed
                .and_then(|i| i32::try_from(i).ok())
                .filter(|i| usize::try_from(*i).is_ok_and(|i| i < request.options.len()));
            match valid {
                Some(index) => index,
                None => {
                    tracing::warn!(
                        "Reasoning service returned unusable index {:?} for {} options",
                        echoed,
                        request.options.len()
                    );
                    return EnrichmentOutcome::degraded(content);
                }
            }
        }
    };

    EnrichmentOutcome::Confident(EnrichmentResult {
        correct_index,
        explanation,
    })
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: [ChatMessage<'a>; 1],
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct ReasoningClient {
    http: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl ReasoningClient {
    pub fn new(config: &AiConfig) -> Result<Self, EnrichmentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EnrichmentError::Setup(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    /// Sends one request and returns the raw response body.
    async fn send(&self, prompt: &str) -> Result<String, EnrichmentError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(EnrichmentError::NotConfigured)?;

        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichmentError::Unauthorized(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichmentError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response.text().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> EnrichmentError {
        if e.is_timeout() {
            EnrichmentError::Timeout(self.timeout_secs)
        } else {
            EnrichmentError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Enricher for ReasoningClient {
    #[instrument(skip(self, request), fields(mode = request.mode.label()))]
    async fn enrich(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentOutcome, EnrichmentError> {
        let prompt = build_prompt(request);
        let start = Instant::now();

        let mut attempt = 0;
        let body = loop {
            match self.send(&prompt).await {
                Ok(body) => break body,
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Reasoning service failed ({}), retrying (attempt {})",
                        e,
                        attempt
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        tracing::debug!("Reasoning service answered in {}ms", start.elapsed().as_millis());

        let content = serde_json::from_str::<ChatResponse>(&body)
            .ok()
            .and_then(|r| r.choices.into_iter().next())
            .and_then(|c| c.message.content);

        match content {
            Some(content) => Ok(parse_content(&content, request)),
            None => {
                tracing::warn!("Reasoning service reply has no message content: {}", body);
                Ok(EnrichmentOutcome::degraded(body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn is_confident(outcome: &EnrichmentOutcome) -> bool {
        matches!(outcome, EnrichmentOutcome::Confident(_))
    }

    fn request(mode: Mode) -> EnrichmentRequest {
        EnrichmentRequest {
            question_text: "Which prints true?".into(),
            code_snippet: Some("String a = \"x\";".into()),
            options: vec!["a == b".into(), "a.equals(b)".into(), "neither".into()],
            mode,
        }
    }

    fn client_for(server: &MockServer) -> ReasoningClient {
        ReasoningClient::new(&AiConfig {
            api_key: Some("test-key".into()),
            base_url: server.uri(),
            max_retries: 1,
            ..AiConfig::default()
        })
        .unwrap()
    }

    fn chat_reply(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    #[test]
    fn prompt_embeds_question_snippet_and_options() {
        let prompt = build_prompt(&request(Mode::Discover));
        assert!(prompt.contains("Question: \"Which prints true?\""));
        assert!(prompt.contains("```java\nString a = \"x\";\n```"));
        assert!(prompt.contains("1: a.equals(b)"));
        assert!(prompt.contains("Identify the correct option"));
        assert!(!prompt.contains("OVERRIDE RULE"));
        assert_eq!(prompt, build_prompt(&request(Mode::Discover)));
    }

    #[test]
    fn justify_prompt_fixes_the_answer() {
        let prompt = build_prompt(&request(Mode::Justify(KnownAnswer::Single(1))));
        assert!(prompt.contains("IS ABSOLUTELY OPTION 1"));
        assert!(prompt.contains("OVERRIDE RULE: You MUST accept OPTION 1"));
        assert!(prompt.contains("\"correctIndex\": 1"));

        let prompt = build_prompt(&request(Mode::Justify(KnownAnswer::Multiple(vec![0, 2]))));
        assert!(prompt.contains("OPTIONS 0, 2 (\"a == b\" AND \"neither\")"));
    }

    #[test]
    fn strips_code_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("Sure:\n```json {\"a\":1} ```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn malformed_content_degrades() {
        let outcome = parse_content("I think it's B", &request(Mode::Discover));
        match outcome {
            EnrichmentOutcome::Degraded { result, raw } => {
                assert_eq!(result.correct_index, DEGRADED_INDEX);
                assert!(result.explanation.contains("I think it's B"));
                assert_eq!(raw, "I think it's B");
            }
            other => panic!("expected degraded outcome, got {:?}", other),
        }
    }

    #[test]
    fn discover_rejects_out_of_range_or_missing_index() {
        let req = request(Mode::Discover);
        assert!(!is_confident(&parse_content(r#"{"correctIndex": 7, "explanation": "x"}"#, &req)));
        assert!(!is_confident(&parse_content(r#"{"explanation": "x"}"#, &req)));
        assert!(!is_confident(&parse_content(r#"{"correctIndex": 1, "explanation": " "}"#, &req)));
        assert!(!is_confident(&parse_content("[1, 2]", &req)));
    }

    #[test]
    fn bare_object_keeps_fences_in_explanation() {
        let content = r#"{"correctIndex": 1, "explanation": "Use ```equals``` here."}"#;
        let outcome = parse_content(content, &request(Mode::Discover));
        assert_eq!(outcome.explanation(), "Use ```equals``` here.");
    }

    #[test]
    fn justify_ignores_echoed_index() {
        let req = request(Mode::Justify(KnownAnswer::Single(2)));
        let outcome = parse_content(r#"{"correctIndex": 0, "explanation": "Because."}"#, &req);
        assert_eq!(
            outcome,
            EnrichmentOutcome::Confident(EnrichmentResult {
                correct_index: 2,
                explanation: "Because.".into()
            })
        );

        // Justify mode does not need the echo at all.
        let outcome = parse_content(r#"{"explanation": "Because."}"#, &req);
        assert!(is_confident(&outcome));
    }

    #[tokio::test]
    async fn discover_call_sends_expected_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama-3.3-70b-versatile",
                "temperature": 0.0,
                "response_format": {"type": "json_object"},
                "messages": [{"role": "user"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
                "```json\n{\"correctIndex\": 1, \"explanation\": \"equals compares content.\"}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .enrich(&request(Mode::Discover))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EnrichmentOutcome::Confident(EnrichmentResult {
                correct_index: 1,
                explanation: "equals compares content.".into()
            })
        );
    }

    #[tokio::test]
    async fn unparsable_content_is_degraded_not_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("no json here")))
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .enrich(&request(Mode::Discover))
            .await
            .unwrap();

        assert!(!is_confident(&outcome));
        assert!(outcome.explanation().contains("no json here"));
    }

    #[tokio::test]
    async fn missing_choices_is_degraded() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .enrich(&request(Mode::Discover))
            .await
            .unwrap();
        assert!(outcome.explanation().contains("<html>gateway</html>"));
    }

    #[tokio::test]
    async fn retries_once_on_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
                r#"{"correctIndex": 2, "explanation": "Neither compiles."}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .enrich(&request(Mode::Discover))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EnrichmentOutcome::Confident(EnrichmentResult { correct_index: 2, .. })
        ));
    }

    #[tokio::test]
    async fn gives_up_after_one_retry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .expect(2)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .enrich(&request(Mode::Discover))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .enrich(&request(Mode::Justify(KnownAnswer::Single(0))))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Unauthorized(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_calling_out() {
        let client = ReasoningClient::new(&AiConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..AiConfig::default()
        })
        .unwrap();

        let err = client.enrich(&request(Mode::Discover)).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::NotConfigured));
    }
}
