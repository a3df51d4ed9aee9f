use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::{Config, ConfigProvider, DEFAULT_GEMINI_BASE_URL, DEFAULT_OPENAI_BASE_URL};
use crate::error::GenerationError;

/// Messages delivered for one streamed generation.
///
/// `Fragments` always carries every fragment received so far, in order.
/// Exactly one `Complete` or `Error` ends the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingResponse {
    Fragments(Vec<String>),
    Complete,
    Error(GenerationError),
}

/// Producer half of a generation stream.
///
/// `complete` and `fail` take the sender by value, so a stream cannot end
/// twice or receive fragments after it ended.
#[derive(Debug)]
pub struct FragmentSender {
    tx: mpsc::UnboundedSender<StreamingResponse>,
    fragments: Vec<String>,
}

impl FragmentSender {
    /// Record a fragment and send the cumulative snapshot. Returns false once
    /// nobody is listening.
    pub fn push(&mut self, fragment: impl Into<String>) -> bool {
        self.fragments.push(fragment.into());
        self.tx
            .send(StreamingResponse::Fragments(self.fragments.clone()))
            .is_ok()
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn complete(self) {
        let _ = self.tx.send(StreamingResponse::Complete);
    }

    pub fn fail(self, error: GenerationError) {
        let _ = self.tx.send(StreamingResponse::Error(error));
    }
}

pub fn fragment_channel() -> (FragmentSender, mpsc::UnboundedReceiver<StreamingResponse>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        FragmentSender {
            tx,
            fragments: Vec::new(),
        },
        rx,
    )
}

/// Streams generated text for a prompt.
///
/// Never fails synchronously: configuration and provider errors arrive as
/// `StreamingResponse::Error` on the returned receiver.
pub trait StreamClient: Send + Sync {
    fn stream(
        &self,
        provider: &str,
        model: &str,
        prompt: &str,
    ) -> mpsc::UnboundedReceiver<StreamingResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AIProvider {
    OpenAI,
    Gemini,
}

impl AIProvider {
    pub fn parse(provider: &str) -> Option<Self> {
        match provider.to_lowercase().as_str() {
            "openai" => Some(AIProvider::OpenAI),
            "gemini" | "google" => Some(AIProvider::Gemini),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            AIProvider::OpenAI => "openai",
            AIProvider::Gemini => "gemini",
        }
    }
}

/// `StreamClient` talking to the OpenAI and Gemini streaming endpoints.
#[derive(Clone)]
pub struct HttpStreamClient {
    client: Client,
    credentials: Arc<dyn ConfigProvider>,
    openai_base_url: String,
    gemini_base_url: String,
}

impl std::fmt::Debug for HttpStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStreamClient")
            .field("openai_base_url", &self.openai_base_url)
            .field("gemini_base_url", &self.gemini_base_url)
            .finish()
    }
}

impl HttpStreamClient {
    pub fn new(credentials: Arc<dyn ConfigProvider>) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .user_agent("unitgen-cli/0.1")
            .build()
            .map_err(|e| GenerationError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, GenerationError> {
        Ok(Self::new(Arc::new(config.clone()))?
            .with_base_urls(&config.ai.openai_base_url, &config.ai.gemini_base_url))
    }

    pub fn with_base_urls(mut self, openai: &str, gemini: &str) -> Self {
        self.openai_base_url = openai.trim_end_matches('/').to_string();
        self.gemini_base_url = gemini.trim_end_matches('/').to_string();
        self
    }

    async fn stream_openai(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        sender: &mut FragmentSender,
    ) -> Result<(), GenerationError> {
        let request = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": true
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.openai_base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::provider("openai", e.to_string()))?;
        let response = check_status(response, AIProvider::OpenAI).await?;

        read_sse(response, AIProvider::OpenAI, sender, |value| {
            let mut text = String::new();
            if let Some(choices) = value["choices"].as_array() {
                for choice in choices {
                    if let Some(content) = choice["delta"]["content"].as_str() {
                        text.push_str(content);
                    }
                }
            }
            text
        })
        .await
    }

    async fn stream_gemini(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        sender: &mut FragmentSender,
    ) -> Result<(), GenerationError> {
        let request = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        let response = self
            .client
            .post(format!(
                "{}/models/{}:streamGenerateContent",
                self.gemini_base_url, model
            ))
            .query(&[("alt", "sse"), ("key", api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::provider("gemini", e.to_string()))?;
        let response = check_status(response, AIProvider::Gemini).await?;

        read_sse(response, AIProvider::Gemini, sender, |value| {
            let mut text = String::new();
            if let Some(candidates) = value["candidates"].as_array() {
                for candidate in candidates {
                    if let Some(parts) = candidate["content"]["parts"].as_array() {
                        for part in parts {
                            if let Some(t) = part["text"].as_str() {
                                text.push_str(t);
                            }
                        }
                    }
                }
            }
            text
        })
        .await
    }
}

impl StreamClient for HttpStreamClient {
    fn stream(
        &self,
        provider: &str,
        model: &str,
        prompt: &str,
    ) -> mpsc::UnboundedReceiver<StreamingResponse> {
        let (mut sender, rx) = fragment_channel();

        let Some(kind) = AIProvider::parse(provider) else {
            sender.fail(GenerationError::Configuration(format!(
                "unsupported provider: {}",
                provider
            )));
            return rx;
        };

        let Some(api_key) = self.credentials.api_key(kind.id()) else {
            sender.fail(GenerationError::Configuration(format!(
                "{} API key is not configured",
                kind.id()
            )));
            return rx;
        };

        let client = self.clone();
        let model = model.to_string();
        let prompt = prompt.to_string();

        tokio::spawn(async move {
            tracing::debug!(provider = kind.id(), model = %model, "starting generation stream");
            let result = match kind {
                AIProvider::OpenAI => client.stream_openai(&api_key, &model, &prompt, &mut sender).await,
                AIProvider::Gemini => client.stream_gemini(&api_key, &model, &prompt, &mut sender).await,
            };
            match result {
                Ok(()) => {
                    tracing::debug!(
                        provider = kind.id(),
                        fragments = sender.fragments().len(),
                        "generation stream finished"
                    );
                    sender.complete();
                }
                Err(e) => {
                    tracing::warn!(provider = kind.id(), error = %e, "generation stream failed");
                    sender.fail(e);
                }
            }
        });

        rx
    }
}

async fn check_status(response: Response, provider: AIProvider) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or(body);
    Err(GenerationError::provider(
        provider.id(),
        format!("HTTP {}: {}", status.as_u16(), message),
    ))
}

/// Read a server-sent-event body, sending the text of each network chunk as
/// one fragment.
async fn read_sse<F>(
    response: Response,
    provider: AIProvider,
    sender: &mut FragmentSender,
    extract: F,
) -> Result<(), GenerationError>
where
    F: Fn(&Value) -> String,
{
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GenerationError::provider(provider.id(), e.to_string()))?;
        let (text, done) = decode_events(decoder.push(&chunk), provider, &extract)?;
        if !text.is_empty() && !sender.push(text) {
            // Receiver dropped, nobody wants the rest.
            return Ok(());
        }
        if done {
            return Ok(());
        }
    }

    if let Some(data) = decoder.finish() {
        let (text, _) = decode_events(vec![data], provider, &extract)?;
        if !text.is_empty() {
            sender.push(text);
        }
    }
    Ok(())
}

fn decode_events<F>(
    events: Vec<String>,
    provider: AIProvider,
    extract: &F,
) -> Result<(String, bool), GenerationError>
where
    F: Fn(&Value) -> String,
{
    let mut text = String::new();
    for data in events {
        if data == "[DONE]" {
            return Ok((text, true));
        }
        let value: Value = serde_json::from_str(&data).map_err(|e| {
            GenerationError::provider(provider.id(), format!("malformed stream event: {}", e))
        })?;
        if let Some(message) = value["error"]["message"].as_str() {
            return Err(GenerationError::provider(provider.id(), message));
        }
        text.push_str(&extract(&value));
    }
    Ok((text, false))
}

/// Splits a byte stream into SSE `data:` payloads, buffering partial lines.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                events.push(data);
            }
        }
        events
    }

    /// Payload of a final line that had no trailing newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix("data:")
        .map(|d| d.trim_start().to_string())
        .filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_joins_lines_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let events = decoder.push(b"1}\n\ndata: [DONE]\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn decoder_keeps_multibyte_characters_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: é\n".as_bytes();
        assert!(decoder.push(&bytes[..7]).is_empty());
        assert_eq!(decoder.push(&bytes[7..]), vec!["é".to_string()]);
    }

    #[test]
    fn decoder_ignores_comments_and_other_fields() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": keep-alive\nevent: message\r\ndata: x\r\n");
        assert_eq!(events, vec!["x".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn sender_sends_cumulative_snapshots() {
        let (mut sender, mut rx) = fragment_channel();
        assert!(sender.push("a"));
        assert!(sender.push("b"));
        sender.complete();

        assert_eq!(rx.try_recv().unwrap(), StreamingResponse::Fragments(vec!["a".into()]));
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamingResponse::Fragments(vec!["a".into(), "b".into()])
        );
        assert_eq!(rx.try_recv().unwrap(), StreamingResponse::Complete);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn provider_ids_are_case_insensitive() {
        assert_eq!(AIProvider::parse("OpenAI"), Some(AIProvider::OpenAI));
        assert_eq!(AIProvider::parse("gemini"), Some(AIProvider::Gemini));
        assert_eq!(AIProvider::parse("claude"), None);
    }
}
