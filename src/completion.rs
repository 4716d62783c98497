//! Generative completion client (Gemini `generateContent`) with quota-aware retry.

use crate::config::Settings;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("AI service unavailable in this region or API key invalid")]
    RegionBlocked,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("json error: {0}")]
    Serde(String),
    #[error("empty response")]
    Empty,
    #[error("missing api key: GEMINI_API_KEY is not set")]
    MissingApiKey,
}

impl CompletionError {
    /// Quota exhaustion is the only retried failure.
    pub fn is_quota(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Http { status, body } => *status == 429 || mentions_quota(body),
            Self::Transport(msg) => mentions_quota(msg),
            _ => false,
        }
    }
}

fn mentions_quota(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("429") || lower.contains("quota") || lower.contains("rate limit")
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub temperature: Option<f32>,
    /// Ask the model for `application/json` output.
    pub json: bool,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        CompletionRequest {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json = true;
        self
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Generate and parse the first JSON object or array in the reply.
pub async fn generate_json<T: DeserializeOwned>(
    service: &dyn CompletionService,
    request: &CompletionRequest,
) -> Result<T, CompletionError> {
    let text = service.generate(request).await?;
    parse_json(&text)
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Runs `op`, retrying with doubling jittered delays while it fails with a quota error.
pub async fn with_quota_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, CompletionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CompletionError>>,
{
    op.retry(
        &ExponentialBuilder::default()
            .with_min_delay(policy.initial_delay)
            .with_max_delay(policy.max_delay)
            .with_max_times(policy.max_retries)
            .with_jitter(),
    )
    .when(|e: &CompletionError| e.is_quota())
    .notify(|e, dur| {
        warn!(
            "completion call hit quota, retrying after {:.2}s: {}",
            dur.as_secs_f64(),
            e
        )
    })
    .await
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        Some(text).filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// Client for `GEMINI_API_KEY` / `GEMINI_MODEL` as loaded into `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, CompletionError> {
        let api_key = settings
            .gemini_api_key
            .clone()
            .ok_or(CompletionError::MissingApiKey)?;
        Self::new(api_key, settings.gemini_model.clone())
    }

    pub fn new(api_key: String, model: Option<String>) -> Result<Self, CompletionError> {
        if api_key.trim().is_empty() {
            return Err(CompletionError::MissingApiKey);
        }
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("sekolah-sdk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: GEMINI_API_BASE.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_request(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &request.prompt }],
            }],
            system_instruction: request.system_instruction.as_deref().map(|s| Content {
                role: None,
                parts: vec![Part { text: s }],
            }),
            generation_config: (request.temperature.is_some() || request.json).then(|| GenerationConfig {
                temperature: request.temperature,
                response_mime_type: request.json.then_some("application/json"),
            }),
        };
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let res = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => {
                let parsed = res
                    .json::<GenerateResponse>()
                    .await
                    .map_err(|e| CompletionError::Serde(e.to_string()))?;
                parsed.text().ok_or(CompletionError::Empty)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(CompletionError::RateLimited(res.text().await.unwrap_or_default())),
            StatusCode::FORBIDDEN => Err(CompletionError::RegionBlocked),
            StatusCode::UNAUTHORIZED => Err(CompletionError::InvalidApiKey),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                if body.to_lowercase().contains("location") {
                    return Err(CompletionError::RegionBlocked);
                }
                if body.contains("API key not valid") {
                    return Err(CompletionError::InvalidApiKey);
                }
                Err(CompletionError::Http { status, body })
            }
        }
    }
}

#[async_trait]
impl CompletionService for GeminiClient {
    async fn generate(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        with_quota_retry(&self.retry, || self.send_request(request)).await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Transport(e.to_string())
    }
}

fn control_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\x00-\x1F\x7F-\x9F]").expect("valid control-char regex"))
}

fn code_fences() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)```(json)?").expect("valid fence regex"))
}

/// Clean model output down to its JSON payload: drops control characters and
/// markdown fences, then keeps the span from the first `{`/`[` to the matching last
/// closing bracket. Text without brackets is returned cleaned.
pub fn extract_json(text: &str) -> String {
    let cleaned = control_chars().replace_all(text, "");
    let cleaned = code_fences().replace_all(cleaned.trim(), "");
    let cleaned = cleaned.trim();

    let first_brace = cleaned.find('{');
    let first_bracket = cleaned.find('[');
    let (start, close) = match (first_brace, first_bracket) {
        (Some(b), Some(k)) if b < k => (Some(b), '}'),
        (Some(b), None) => (Some(b), '}'),
        (_, Some(k)) => (Some(k), ']'),
        (None, None) => (None, '}'),
    };
    match (start, start.and_then(|_| cleaned.rfind(close))) {
        (Some(s), Some(e)) if e >= s => cleaned[s..=e].to_string(),
        _ => cleaned.to_string(),
    }
}

pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, CompletionError> {
    let json = extract_json(text);
    if json.is_empty() {
        return Err(CompletionError::Empty);
    }
    serde_json::from_str(&json).map_err(|e| {
        tracing::error!(error = %e, "failed to parse JSON from completion");
        CompletionError::Serde(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn extracts_fenced_object() {
        let raw = "Berikut hasilnya:\n```json\n{\"materi\": \"Pecahan\", \"tp\": \"Siswa mampu\"}\n```\nSemoga membantu";
        let v: Value = parse_json(raw).unwrap();
        assert_eq!(v, json!({ "materi": "Pecahan", "tp": "Siswa mampu" }));
    }

    #[test]
    fn picks_array_when_it_comes_first() {
        let v: Value = parse_json("[{\"a\":1},{\"a\":2}] trailing {junk}").unwrap();
        assert_eq!(v, json!([{ "a": 1 }, { "a": 2 }]));
    }

    #[test]
    fn strips_control_characters() {
        let v: Value = parse_json("{\"a\":\u{0007}\"b\"}").unwrap();
        assert_eq!(v, json!({ "a": "b" }));
    }

    #[test]
    fn unparseable_text_is_a_serde_error() {
        assert!(matches!(parse_json::<Value>("tidak ada json"), Err(CompletionError::Serde(_))));
        assert!(matches!(parse_json::<Value>("   "), Err(CompletionError::Empty)));
    }

    #[test]
    fn quota_detection() {
        assert!(CompletionError::RateLimited(String::new()).is_quota());
        assert!(CompletionError::Http { status: 429, body: String::new() }.is_quota());
        assert!(CompletionError::Http { status: 400, body: "Quota exceeded".into() }.is_quota());
        assert!(!CompletionError::Http { status: 500, body: "boom".into() }.is_quota());
        assert!(!CompletionError::RegionBlocked.is_quota());
        assert!(!CompletionError::Timeout.is_quota());
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn retries_quota_errors_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let out = with_quota_retry(&fast_policy(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CompletionError::RateLimited("quota".into()))
            } else {
                Ok("ok")
            }
        })
        .await
        .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let err = with_quota_retry(&fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CompletionError::RateLimited("quota".into()))
        })
        .await
        .unwrap_err();
        assert!(err.is_quota());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let err = with_quota_retry(&fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CompletionError::RegionBlocked)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CompletionError::RegionBlocked));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn client_is_built_from_settings() {
        let mut settings = Settings::default();
        assert!(matches!(
            GeminiClient::from_settings(&settings),
            Err(CompletionError::MissingApiKey)
        ));
        settings.gemini_api_key = Some("AIzaTEST".into());
        assert_eq!(GeminiClient::from_settings(&settings).unwrap().model(), DEFAULT_MODEL);
        settings.gemini_model = Some("gemini-2.5-pro".into());
        assert_eq!(GeminiClient::from_settings(&settings).unwrap().model(), "gemini-2.5-pro");
    }

    #[test]
    fn blank_api_key_is_rejected() {
        assert!(matches!(
            GeminiClient::new("  ".into(), None),
            Err(CompletionError::MissingApiKey)
        ));
    }
}
