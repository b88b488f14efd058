use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticSink;
use crate::error::CompletionError;
use crate::knowledge::KnowledgeDocument;

/// Reply used when the completion endpoint cannot be reached.
pub const TRANSPORT_FALLBACK: &str = "Error: could not communicate with the upstream service.";
/// Reply used when the completion response has no usable content.
pub const EMPTY_FALLBACK: &str = "Sorry, could not generate a response, try again!";

#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Builds the two-turn conversation: a system turn carrying the question and
/// the serialised knowledge document, then the question itself.
pub fn build_messages(question: &str, knowledge: &KnowledgeDocument) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system".into(),
            content: format!(
                "The user asked: '{}'. Reference information: {}. Please answer based on this information.",
                question,
                knowledge.to_json()
            ),
        },
        ChatMessage {
            role: "user".into(),
            content: question.to_string(),
        },
    ]
}

/// Requests a completion for one question.  Single attempt, no retry.
pub struct KnowledgeResponder {
    settings: CompletionSettings,
    client: reqwest::Client,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl KnowledgeResponder {
    pub fn new(
        settings: CompletionSettings,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self {
            settings,
            client,
            diagnostics,
        })
    }

    /// Always yields reply text; failures are replaced by a fixed fallback.
    pub async fn respond(&self, question: &str, knowledge: &KnowledgeDocument) -> String {
        match self.complete(question, knowledge).await {
            Ok(content) => content,
            Err(CompletionError::Transport(err)) => {
                self.diagnostics.record(
                    "knowledge_responder",
                    &format!("completion request failed: {}", err),
                );
                TRANSPORT_FALLBACK.to_string()
            }
            Err(err @ CompletionError::MissingContent) => {
                self.diagnostics
                    .record("knowledge_responder", &err.to_string());
                EMPTY_FALLBACK.to_string()
            }
        }
    }

    /// The raw completion call.  HTTP error statuses are not transport
    /// failures: the body is parsed like any other.
    pub async fn complete(
        &self,
        question: &str,
        knowledge: &KnowledgeDocument,
    ) -> Result<String, CompletionError> {
        let messages = build_messages(question, knowledge);
        let body = CompletionRequest {
            model: &self.settings.model,
            messages: &messages,
            max_tokens: self.settings.max_tokens,
        };
        let resp = self
            .client
            .post(&self.settings.url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        tracing::debug!(status = status.as_u16(), bytes = text.len(), "completion response");
        extract_content(&text).ok_or(CompletionError::MissingContent)
    }
}

/// `choices[0].message.content`, if the body has that shape.
pub fn extract_content(body: &str) -> Option<String> {
    let parsed: CompletionResponse = serde_json::from_str(body).ok()?;
    parsed
        .choices
        .into_iter()
        .next()?
        .message?
        .content
}
