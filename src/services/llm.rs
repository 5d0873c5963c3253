//! Streaming chat-completion adapter, per spec §4.3/§6.
//!
//! Grounded on `examples/original_source/mate/services/llm/llm_ollama_remote.py`
//! for the wire shape — newline-delimited JSON chunks of
//! `{"message": {"content": "..."}}` from `POST /api/chat`, and
//! `GET /api/tags` returning `{"models": [{"name": ...}]}` for availability
//! — and on the teacher's `fae_llm` provider adapters for the
//! streaming-response-as-an-async-sequence idiom.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{MateError, Result};
use crate::prompt::HistoryEntry;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChatChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunkMessage {
    content: String,
}

/// Streaming chat-completion adapter over an Ollama-style HTTP endpoint,
/// per spec §4.3.
pub struct LlmAdapter {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl LlmAdapter {
    #[must_use]
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            endpoint,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Start a chat completion over `history` and return a channel of raw
    /// text chunks as they stream in. The caller is responsible for
    /// sentence segmentation, per spec §4.3/§4.6.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Llm`] if the request cannot be sent.
    pub async fn chat(&self, history: &[HistoryEntry]) -> Result<mpsc::Receiver<String>> {
        let messages: Vec<ChatMessage> = history
            .iter()
            .map(|h| ChatMessage {
                role: h.role.as_str(),
                content: h.content.as_str(),
            })
            .collect();

        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| MateError::Llm(format!("chat request to {}: {e}", self.endpoint)))?;

        if !response.status().is_success() {
            return Err(MateError::Llm(format!(
                "chat request failed with status {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel::<String>(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buf = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("llm stream error: {e}");
                        break;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buf.find('\n') {
                    let line = buf[..newline].trim().to_string();
                    buf.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ChatChunk>(&line) {
                        Ok(parsed) => {
                            if let Some(message) = parsed.message {
                                if !message.content.is_empty() && tx.send(message.content).await.is_err() {
                                    return;
                                }
                            }
                            if parsed.done {
                                return;
                            }
                        }
                        Err(e) => warn!("llm: malformed chat chunk, skipping: {e}"),
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Fetch the server's model list and check `self.model` is present,
    /// per spec §4.2's LLM-specific probe contract.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Llm`] if the tags endpoint cannot be reached.
    pub async fn check_model_available(&self) -> Result<bool> {
        #[derive(Deserialize)]
        struct Tags {
            models: Vec<Model>,
        }
        #[derive(Deserialize)]
        struct Model {
            name: String,
        }

        let resp: Tags = self
            .client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .map_err(|e| MateError::Llm(format!("model list request: {e}")))?
            .json()
            .await
            .map_err(|e| MateError::Llm(format!("model list parse: {e}")))?;
        Ok(resp.models.iter().any(|m| m.name == self.model))
    }

    #[must_use]
    pub fn config_str(&self) -> String {
        format!("llm endpoint={} model={}", self.endpoint, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn history() -> Vec<HistoryEntry> {
        vec![
            HistoryEntry::system("du bist ein hilfreicher assistent".into()),
            HistoryEntry::user("hallo".into()),
        ]
    }

    #[tokio::test]
    async fn chat_streams_concatenated_content() {
        let server = MockServer::start().await;
        let body = "{\"message\":{\"content\":\"hallo \"},\"done\":false}\n\
                     {\"message\":{\"content\":\"welt\"},\"done\":false}\n\
                     {\"message\":{\"content\":\"\"},\"done\":true}\n";
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let adapter = LlmAdapter::new(server.uri(), "llama3".to_string());
        let mut rx = adapter.chat(&history()).await.expect("chat should start");

        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            out.push_str(&chunk);
        }
        assert_eq!(out, "hallo welt");
    }

    #[tokio::test]
    async fn check_model_available_matches_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3"}, {"name": "mistral"}]
            })))
            .mount(&server)
            .await;

        let adapter = LlmAdapter::new(server.uri(), "llama3".to_string());
        assert!(adapter.check_model_available().await.unwrap());

        let adapter = LlmAdapter::new(server.uri(), "not-present".to_string());
        assert!(!adapter.check_model_available().await.unwrap());
    }

    #[tokio::test]
    async fn chat_surfaces_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = LlmAdapter::new(server.uri(), "llama3".to_string());
        let err = adapter.chat(&history()).await.unwrap_err();
        assert!(matches!(err, MateError::Llm(_)));
    }
}
