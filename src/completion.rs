use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::types::OPENROUTER_TITLE;

const SEND_ATTEMPTS: u32 = 3;

/// Curated `(model id, display name)` pairs accepted at creation time.
pub const MODEL_CATALOG: &[(&str, &str)] = &[
  ("meta-llama/llama-3.1-8b-instruct:free", "Llama 3.1 8B (Free)"),
  ("meta-llama/llama-3-8b-instruct:free", "Llama 3 8B (Free)"),
  ("meta-llama/llama-3.2-3b-instruct:free", "Llama 3.2 3B (Free)"),
  ("meta-llama/llama-3.2-1b-instruct:free", "Llama 3.2 1B (Free)"),
  ("mistralai/mistral-7b-instruct:free", "Mistral 7B (Free)"),
  ("google/gemma-2-9b-it:free", "Gemma 2 9B (Free)"),
  ("google/gemma-7b-it:free", "Gemma 7B (Free)"),
  ("microsoft/phi-3-mini-128k-instruct:free", "Phi-3 Mini (Free)"),
  ("microsoft/phi-3-medium-128k-instruct:free", "Phi-3 Medium (Free)"),
  ("nousresearch/nous-hermes-2-mixtral-8x7b-dpo", "Nous Hermes 2 Mixtral (Free)"),
  ("openchat/openchat-7b:free", "OpenChat 7B (Free)"),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
  pub id: String,
  pub name: String,
}

pub fn available_models() -> Vec<ModelInfo> {
  MODEL_CATALOG
    .iter()
    .map(|(id, name)| ModelInfo {
      id: id.to_string(),
      name: name.to_string(),
    })
    .collect()
}

pub fn is_known_model(model: &str) -> bool {
  MODEL_CATALOG.iter().any(|(id, _)| *id == model)
}

#[derive(Debug, Error)]
pub enum CompletionError {
  #[error("request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("empty response from model")]
  EmptyResponse,
  #[error("malformed response: {0}")]
  MalformedResponse(String),
  #[error("unknown model {0}")]
  UnknownModel(String),
}

/// Produces one completion for a (system prompt, model, question) triple.
pub trait CompletionClient: Send + Sync {
  fn complete(
    &self,
    prompt: &str,
    model: &str,
    question: &str,
  ) -> impl Future<Output = Result<String, CompletionError>> + Send;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  temperature: f32,
  max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  #[serde(default)]
  choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
  content: Option<String>,
}

fn chat_request<'a>(
  prompt: &'a str,
  model: &'a str,
  question: &'a str,
  temperature: f32,
  max_tokens: u32,
) -> ChatRequest<'a> {
  ChatRequest {
    model,
    messages: vec![
      ChatMessage { role: "system", content: prompt },
      ChatMessage { role: "user", content: question },
    ],
    temperature,
    max_tokens,
  }
}

fn extract_content(response: ChatResponse) -> Result<String, CompletionError> {
  let content = response
    .choices
    .into_iter()
    .next()
    .and_then(|choice| choice.message)
    .and_then(|message| message.content)
    .ok_or_else(|| CompletionError::MalformedResponse("missing choices[0].message.content".to_string()))?;
  let content = content.trim();
  if content.is_empty() {
    return Err(CompletionError::EmptyResponse);
  }
  Ok(content.to_string())
}

/// OpenRouter chat-completions client.
#[derive(Clone)]
pub struct OpenRouterClient {
  http: reqwest::Client,
  base_url: String,
  api_key: String,
  temperature: f32,
  max_tokens: u32,
}

impl OpenRouterClient {
  pub fn new(config: &AppConfig, api_key: String) -> Result<Self, CompletionError> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()?;
    Ok(OpenRouterClient {
      http,
      base_url: config.openrouter_base_url.trim_end_matches('/').to_string(),
      api_key,
      temperature: config.temperature,
      max_tokens: config.max_tokens,
    })
  }

  fn endpoint(&self) -> String {
    format!("{}/chat/completions", self.base_url)
  }
}

impl CompletionClient for OpenRouterClient {
  async fn complete(&self, prompt: &str, model: &str, question: &str) -> Result<String, CompletionError> {
    if !is_known_model(model) {
      return Err(CompletionError::UnknownModel(model.to_string()));
    }
    let body = chat_request(prompt, model, question, self.temperature, self.max_tokens);
    let url = self.endpoint();

    let mut last_err = None;
    let mut resp = None;
    for attempt in 0..SEND_ATTEMPTS {
      if attempt > 0 {
        tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
      }
      match self
        .http
        .post(&url)
        .bearer_auth(&self.api_key)
        .header("X-Title", OPENROUTER_TITLE)
        .json(&body)
        .send()
        .await
      {
        Ok(r) => {
          resp = Some(r);
          break;
        }
        Err(e) => {
          warn!("OpenRouter request for {model} failed (attempt {}): {e}", attempt + 1);
          last_err = Some(e);
        }
      }
    }
    let resp = match (resp, last_err) {
      (Some(resp), _) => resp,
      (None, Some(e)) => return Err(CompletionError::Http(e)),
      (None, None) => return Err(CompletionError::MalformedResponse("no request attempted".to_string())),
    };

    let status = resp.status();
    debug!("OpenRouter response for {model}: {status}");
    let parsed = resp.error_for_status()?.json::<ChatResponse>().await?;
    extract_content(parsed)
  }
}
