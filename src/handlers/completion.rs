//! Text generation for the teaching-material assistant.

use crate::completion::{parse_json, CompletionError, CompletionRequest};
use crate::error::AppError;
use crate::response::success_one_ok;
use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize)]
pub struct GenerateBody {
    pub prompt: String,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Ask for a JSON reply and return it parsed in `json`.
    #[serde(default)]
    pub json: bool,
}

#[derive(Serialize)]
pub struct GenerateReply {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

/// POST /api/v1/completions
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<impl IntoResponse, AppError> {
    let service = state.completion.clone().ok_or(CompletionError::MissingApiKey)?;
    if body.prompt.trim().is_empty() {
        return Err(AppError::BadRequest("prompt must not be empty".into()));
    }
    let mut request = CompletionRequest::new(body.prompt);
    if let Some(system) = body.system_instruction {
        request = request.with_system(system);
    }
    if let Some(t) = body.temperature {
        request = request.with_temperature(t);
    }
    if body.json {
        request = request.expect_json();
    }
    let text = service.generate(&request).await?;
    let json = if body.json {
        Some(parse_json::<Value>(&text)?)
    } else {
        None
    };
    Ok(success_one_ok(GenerateReply { text, json }))
}
