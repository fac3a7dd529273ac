use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;
use crate::models::Mode;

/// Upper bound on suggestions returned by `related`.
pub const MAX_RELATED_TOPICS: usize = 5;

const EXPLANATION_SYSTEM_PROMPT_LONG: &str = "\
You are an educational assistant who explains topics clearly and concisely.
Give the user a solid basic understanding of the requested concept in 3 short paragraphs.
Assume the user already knows the neighbouring topics.
Use plain language without diluting the substance; keep only the points that really matter.
Use examples and analogies to make the material stick.
Do not open with phrases like \"Topic X is...\" or \"You asked about X...\"; start with the explanation itself.";

const EXPLANATION_SYSTEM_PROMPT_SHORT: &str = "\
You are an educational assistant who explains topics as briefly as possible.
Explain the requested concept in a single compact paragraph of at most 4 sentences.
Keep only the core idea and, if it helps, one example.
Do not open with phrases like \"Topic X is...\" or \"You asked about X...\"; start with the explanation itself.";

const RELATED_TOPICS_SYSTEM_PROMPT: &str = "\
You are an educational assistant who suggests related topics to study next.
Suggest 3 closely or logically related topics the user could study next.
Output only short titles of 1-3 words each.
Do not use numbering or list markers.
Put every topic on its own line.";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("LLM API key is not set")]
    MissingApiKey,
    #[error("LLM request timed out")]
    Timeout,
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("LLM rejected the request (status {status}): {body}")]
    ClientStatus { status: u16, body: String },
    #[error("LLM service unavailable (status {status}): {body}")]
    ServerStatus { status: u16, body: String },
    #[error("malformed LLM response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Transport(e.to_string())
        }
    }
}

/// Turns topic titles into prose and follow-up suggestions.
#[async_trait]
pub trait ExplanationGenerator: Send + Sync {
    async fn explain(&self, title: &str, parent_title: Option<&str>, mode: Mode) -> Result<String, GenerationError>;
    /// Best effort: any failure yields an empty list.
    async fn related(&self, title: &str, explanation: Option<&str>) -> Vec<String>;
}

pub fn explanation_system_prompt(mode: Mode) -> &'static str {
    match mode {
        Mode::Long => EXPLANATION_SYSTEM_PROMPT_LONG,
        Mode::Short => EXPLANATION_SYSTEM_PROMPT_SHORT,
    }
}

pub fn explanation_user_prompt(title: &str, parent_title: Option<&str>) -> String {
    match parent_title {
        Some(parent) => format!("{title}\n\nThis topic continues the topic: {parent}"),
        None => title.to_string(),
    }
}

pub fn related_user_prompt(title: &str, explanation: Option<&str>) -> String {
    let base = format!(
        "Based on the topic {title} suggest 3-5 closely or logically related topics the user could study next."
    );
    match explanation {
        Some(text) if !text.trim().is_empty() => format!("{base}\n\nHere is the explanation of the topic for context:\n{text}"),
        _ => base,
    }
}

/// Removes `<think>...</think>` segments; an unterminated opening tag drops the rest.
pub fn strip_think(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        match after_open.find(CLOSE) {
            Some(end) => rest = &after_open[end + CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn strip_list_marker(line: &str) -> &str {
    let mut s = line.trim_start();
    loop {
        let before = s;
        s = s.trim_start_matches(['-', '*', '•', '.']).trim_start();
        // "1." / "2)" / "3 " enumerations; a digit glued to a word ("3D printing") stays
        let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits > 0 {
            let tail = &s[digits..];
            if tail.starts_with(['.', ')']) {
                s = tail[1..].trim_start();
            } else if tail.starts_with(char::is_whitespace) {
                s = tail.trim_start();
            }
        }
        if s == before {
            return s;
        }
    }
}

/// Splits a model reply into topic titles, dropping enumeration and trailing punctuation.
pub fn parse_related_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| strip_list_marker(l.trim()).trim_end_matches([',', '.', ';', ':']).trim())
        .filter(|l| !l.is_empty())
        .take(MAX_RELATED_TOPICS)
        .map(str::to_string)
        .collect()
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

// ---------------- OpenAI-compatible chat completion client ----------------
pub struct LlmGenerator {
    client: reqwest::Client,
    cfg: LlmConfig,
    endpoint: String,
}

impl LlmGenerator {
    pub fn new(cfg: LlmConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| GenerationError::Transport(format!("failed to build http client: {e}")))?;
        let endpoint = format!("{}/chat/completions", cfg.api_base.trim_end_matches('/'));
        info!("LLM client configured endpoint={endpoint} model={} timeout={:?}", cfg.model, cfg.timeout);
        Ok(Self { client, cfg, endpoint })
    }

    pub fn has_api_key(&self) -> bool {
        self.cfg.api_key.is_some()
    }

    /// One system + one user message; returns the reply with think segments removed.
    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let key = self.cfg.api_key.as_deref().ok_or(GenerationError::MissingApiKey)?;
        let body = ChatRequest {
            model: &self.cfg.model,
            temperature: self.cfg.temperature,
            max_tokens: self.cfg.max_tokens,
            messages: [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
        };
        debug!("sending completion request model={} prompt_len={}", self.cfg.model, user.len());
        let resp = self.client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if status.is_client_error() {
                // usually a bad key, model name or quota: operator has to act
                error!("LLM rejected request status={status} body={text} (check LLM_API_KEY / LLM_MODEL)");
                return Err(GenerationError::ClientStatus { status: status.as_u16(), body: text });
            }
            warn!("LLM service error status={status} body={text}");
            return Err(GenerationError::ServerStatus { status: status.as_u16(), body: text });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::MalformedResponse("no message content in choices".into()))?;
        Ok(strip_think(&content))
    }
}

#[async_trait]
impl ExplanationGenerator for LlmGenerator {
    async fn explain(&self, title: &str, parent_title: Option<&str>, mode: Mode) -> Result<String, GenerationError> {
        let user = explanation_user_prompt(title, parent_title);
        let explanation = self.complete(explanation_system_prompt(mode), &user).await.map_err(|e| {
            error!("explanation generation failed mode={mode} error={e}");
            e
        })?;
        if explanation.is_empty() {
            return Err(GenerationError::MalformedResponse("empty explanation".into()));
        }
        info!("received explanation mode={mode} length={}", explanation.len());
        Ok(explanation)
    }

    async fn related(&self, title: &str, explanation: Option<&str>) -> Vec<String> {
        let user = related_user_prompt(title, explanation);
        match self.complete(RELATED_TOPICS_SYSTEM_PROMPT, &user).await {
            Ok(text) => {
                let topics = parse_related_lines(&text);
                info!("received related topics count={}", topics.len());
                topics
            }
            Err(e) => {
                warn!("related topics generation failed, continuing without: {e}");
                Vec::new()
            }
        }
    }
}
