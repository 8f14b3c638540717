//! Retrieval-augmented answering
//!
//! Search hits become a numbered context block; with an LLM configured the
//! context and the question go to a chat-completions endpoint, otherwise
//! the caller gets the context alone.

use crate::config::LlmConfig;
use crate::corpus::EntityKind;
use crate::retrieval::{HybridSearcher, SearchError, SearchHit};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const SYSTEM_PROMPT: &str = "You are a Star Wars expert. Answer the question using only the \
numbered context records. If the context does not contain the answer, say so. Mention the \
names of the characters, films, planets, species, starships or vehicles you rely on.";

#[derive(Error, Debug)]
pub enum AnswerError {
    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("LLM authentication failed: {0}")]
    Authentication(String),

    #[error("LLM unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    #[error("LLM request failed: {0}")]
    Generation(String),
}

impl AnswerError {
    pub fn status_code(&self) -> u16 {
        match self {
            AnswerError::Search(e) => e.status_code(),
            AnswerError::Authentication(_) => 401,
            AnswerError::Unavailable(_) => 503,
            AnswerError::MalformedResponse(_) | AnswerError::Generation(_) => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Numbered context block, one record per entry
pub fn build_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}", i + 1, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_messages(question: &str, hits: &[SearchHit]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion: {}",
            build_context(hits),
            question
        )),
    ]
}

/// Entity ids referenced by `hits`, grouped by type, first-seen order
pub fn referenced_entities(hits: &[SearchHit]) -> BTreeMap<EntityKind, Vec<i64>> {
    let mut entities: BTreeMap<EntityKind, Vec<i64>> = BTreeMap::new();
    for hit in hits {
        let ids = entities.entry(hit.metadata.entity_type).or_default();
        if !ids.contains(&hit.metadata.entity_id) {
            ids.push(hit.metadata.entity_id);
        }
    }
    entities
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completions client
pub struct ChatClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self, AnswerError> {
        if api_key.trim().is_empty() {
            return Err(AnswerError::Authentication("API key is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnswerError::Generation(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Build from config, reading the key from `llm.api_key_env`
    pub fn from_config(config: &LlmConfig) -> Result<Self, AnswerError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AnswerError::Authentication(format!(
                "Environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::new(api_key, config)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AnswerError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnswerError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AnswerError::Unavailable(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Chat completion rejected");
            return Err(classify_status(status.as_u16(), &body));
        }
        parse_completion(&body)
    }
}

fn classify_status(status: u16, body: &str) -> AnswerError {
    let preview: String = body.chars().take(200).collect();
    match status {
        401 | 403 => AnswerError::Authentication(preview),
        429 | 500..=599 => AnswerError::Unavailable(format!("HTTP {}: {}", status, preview)),
        _ => AnswerError::Generation(format!("HTTP {}: {}", status, preview)),
    }
}

fn parse_completion(body: &str) -> Result<String, AnswerError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        tracing::error!(
            line = e.line(),
            column = e.column(),
            byte_len = body.len(),
            "Malformed chat response: {}",
            e
        );
        AnswerError::MalformedResponse(e.to_string())
    })?;
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.trim().to_string())
        .ok_or_else(|| AnswerError::MalformedResponse("No choices in response".to_string()))
}

/// Answer to one question
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    /// Absent when answering offline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub context: Vec<SearchHit>,
    pub entities: BTreeMap<EntityKind, Vec<i64>>,
}

/// Search, then optionally ask the LLM
pub struct Answerer {
    searcher: Arc<HybridSearcher>,
    chat: Option<ChatClient>,
    context_size: usize,
}

impl Answerer {
    pub fn new(searcher: Arc<HybridSearcher>, chat: Option<ChatClient>, context_size: usize) -> Self {
        Self {
            searcher,
            chat,
            context_size,
        }
    }

    /// LLM client when `llm.enabled`; a missing key disables answering with a warning
    pub fn chat_from_config(config: &LlmConfig) -> Option<ChatClient> {
        if !config.enabled {
            return None;
        }
        match ChatClient::from_config(config) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!("LLM disabled: {}", e);
                None
            }
        }
    }

    pub fn has_llm(&self) -> bool {
        self.chat.is_some()
    }

    pub async fn ask(&self, question: &str, offline: bool) -> Result<Answer, AnswerError> {
        let context = self.searcher.search(question, self.context_size).await?;
        let entities = referenced_entities(&context);

        let answer = match (&self.chat, offline) {
            (Some(chat), false) => {
                let messages = build_messages(question, &context);
                tracing::debug!(model = chat.model(), records = context.len(), "Asking LLM");
                Some(chat.complete(&messages).await?)
            }
            _ => None,
        };

        Ok(Answer {
            question: question.trim().to_string(),
            answer,
            context,
            entities,
        })
    }
}
