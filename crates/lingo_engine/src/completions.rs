use async_trait::async_trait;
use futures_util::StreamExt;
use lingo_core::Explanation;
use lingo_logging::{lingo_debug, lingo_trace};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{ModelConfig, RequestSettings};
use crate::sse::{FrameDecoder, DONE_SENTINEL};
use crate::transport::{
    map_reqwest_error, ChunkEmitter, LocalBackend, LocalChatRequest, TransportError, WireMessage,
};
use crate::{ExplainError, ExplainFailure};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
const SILICONFLOW_API_URL: &str = "https://api.siliconflow.cn/v1/chat/completions";
const API_302AI_URL: &str = "https://api.302.ai/v1/chat/completions";
const OLLAMA_API_URL: &str = "http://localhost:11434/v1/chat/completions";
const LMSTUDIO_API_URL: &str = "http://localhost:1234/v1/chat/completions";

const EXPLAIN_TEMPERATURE: f32 = 0.3;
const CHAT_TEMPERATURE: f32 = 0.7;

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct CompletionsApi {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl CompletionsApi {
    pub fn new(config: &ModelConfig, settings: &RequestSettings) -> Result<Self, ExplainError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .read_timeout(settings.request_timeout())
            .build()
            .map_err(|err| ExplainError::new(ExplainFailure::Network, err.to_string()))?;
        Ok(Self {
            client,
            url: api_url(&config.api_provider, config.base_url.as_deref()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single non-streaming completion; returns the first choice's content.
    pub async fn complete(
        &self,
        messages: &[WireMessage],
        temperature: f32,
    ) -> Result<String, ExplainError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
        });
        let response = self
            .post(&body)
            .send()
            .await
            .map_err(|err| explain_error(map_reqwest_error(err)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExplainError::new(
                ExplainFailure::HttpStatus(status.as_u16()),
                text,
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| explain_error(map_reqwest_error(err)))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|err| ExplainError::new(ExplainFailure::InvalidResponse, err.to_string()))?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| ExplainError::new(ExplainFailure::InvalidResponse, "no content in response"))
    }

    /// Translation, reading form, and learner notes for one segment.
    pub async fn explain_segment(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<Explanation, ExplainError> {
        lingo_debug!(
            "explaining segment '{}' via {}",
            text.chars().take(50).collect::<String>(),
            self.url
        );
        let messages = [
            WireMessage::text("system", explain_prompt(target_language)),
            WireMessage::text("user", text),
        ];
        let content = self.complete(&messages, EXPLAIN_TEMPERATURE).await?;
        parse_explanation(&content)
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header(AUTHORIZATION, format!("Bearer {}", self.api_key))
        }
    }
}

#[async_trait]
impl LocalBackend for CompletionsApi {
    async fn stream_chat(
        &self,
        request: LocalChatRequest,
        emitter: ChunkEmitter,
        cancel: CancellationToken,
    ) -> Result<String, TransportError> {
        let body = json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(CHAT_TEMPERATURE),
            "stream": true,
        });
        let response = self.post(&body).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let mut full = String::new();
        let mut decoder = FrameDecoder::new();
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    lingo_debug!("completion stream on {} cancelled", emitter.channel());
                    return Ok(full);
                }
                next = stream.next() => next,
            };
            let payloads = match next {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(err)) => return Err(map_reqwest_error(err)),
                None => {
                    for payload in decoder.finish() {
                        let _ = forward_delta(&payload, &emitter, &mut full)?;
                    }
                    return Ok(full);
                }
            };
            for payload in payloads {
                if !forward_delta(&payload, &emitter, &mut full)? {
                    return Ok(full);
                }
            }
        }
    }
}

/// Forwards one streamed payload. Returns false at the end-of-stream sentinel.
fn forward_delta(
    payload: &str,
    emitter: &ChunkEmitter,
    full: &mut String,
) -> Result<bool, TransportError> {
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Ok(false);
    }
    if payload.is_empty() {
        return Ok(true);
    }
    let value: Value = serde_json::from_str(payload)
        .map_err(|err| TransportError::Backend(format!("undecodable stream chunk: {err}")))?;
    if let Some(message) = value["error"]["message"].as_str() {
        return Err(TransportError::Backend(message.to_string()));
    }
    if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
        if !delta.is_empty() {
            lingo_trace!("completion delta of {} bytes", delta.len());
            full.push_str(delta);
            emitter.emit(delta);
        }
    }
    Ok(true)
}

fn explain_error(err: TransportError) -> ExplainError {
    match err {
        TransportError::Timeout => ExplainError::new(ExplainFailure::Timeout, err.to_string()),
        TransportError::HttpStatus { status, body } => {
            ExplainError::new(ExplainFailure::HttpStatus(status), body)
        }
        other => ExplainError::new(ExplainFailure::Network, other.to_string()),
    }
}

pub(crate) fn api_url(provider: &str, base_url: Option<&str>) -> String {
    if let Some(base) = base_url.map(str::trim).filter(|base| !base.is_empty()) {
        return format!("{}/chat/completions", base.trim_end_matches('/'));
    }
    match provider {
        "openrouter" => OPENROUTER_API_URL,
        "deepseek" => DEEPSEEK_API_URL,
        "siliconflow" => SILICONFLOW_API_URL,
        "302ai" => API_302AI_URL,
        "ollama" => OLLAMA_API_URL,
        "lmstudio" => LMSTUDIO_API_URL,
        _ => OPENAI_API_URL,
    }
    .to_string()
}

pub(crate) fn language_name(code: &str) -> &str {
    match code {
        "zh" | "zh-CN" => "Simplified Chinese",
        "zh-TW" => "Traditional Chinese",
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        other => other,
    }
}

fn explain_prompt(target_language: &str) -> String {
    let language = language_name(target_language);
    format!(
        r#"You are a language-learning assistant. The learner's native language is {language}.
Analyse the passage the user sends and answer with a single JSON object, no prose before or after it.
All keys must be in English; every explanation must be written in {language}.
{{
  "translation": "natural, fluent translation of the passage into {language}",
  "explanation": "Markdown walkthrough of the passage: context, tone, cultural background",
  "reading_text": "the passage with pronunciation aids (kana readings, pinyin or IPA), or null",
  "vocabulary": [
    {{"word": "word as it appears", "reading": "pronunciation", "meaning": "meaning in context", "usage": "usage and collocations", "example": "example sentence with translation"}}
  ],
  "grammar_points": [
    {{"point": "name of the grammar point", "explanation": "explanation", "example": "example sentence with translation"}}
  ],
  "cultural_context": "cultural notes, or null",
  "difficulty_level": "beginner | intermediate | advanced",
  "learning_tips": "study advice for this passage"
}}"#
    )
}

/// Decodes the model's explanation, tolerating code fences and surrounding prose.
pub(crate) fn parse_explanation(content: &str) -> Result<Explanation, ExplainError> {
    let json = extract_json(content);
    serde_json::from_str(json).map_err(|err| {
        ExplainError::new(
            ExplainFailure::InvalidResponse,
            format!("failed to parse explanation: {err}. Content: {json}"),
        )
    })
}

fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(start) = trimmed.find("```") {
        let fenced = &trimmed[start + 3..];
        let fenced = fenced.strip_prefix("json").unwrap_or(fenced);
        if let Some(end) = fenced.find("```") {
            return fenced[..end].trim();
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}
