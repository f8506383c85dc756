use crate::infrastructure::http_retry::{
    build_client, error_body, header_value, send_with_retry, TransportError,
};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const SYSTEM_PROMPT: &str = "Você é Aurora IA, especialista em desenvolvimento infantil de 0-24 \
meses baseada em evidências científicas.

IMPORTANTE: Você NÃO é um médico e não oferece diagnósticos médicos.

Baseie suas respostas em:
- Academia Americana de Pediatria (AAP)
- Sociedade Brasileira de Pediatria (SBP)
- Organização Mundial da Saúde (OMS)

Sempre seja educativa, acolhedora e respeitosa. Use linguagem clara e acessível.

SEMPRE inclua este aviso: \"⚠️ Esta informação é educativa. Para questões médicas, consulte \
sempre um pediatra.\"

Em emergências, oriente para: SAMU (192) ou Bombeiros (193).";

const MAX_TOKENS: u32 = 500;
const TEMPERATURE: f32 = 0.7;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Completion API error: {0}")]
    Api(String),
    #[error("Empty completion")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u32>,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, question: &str) -> Result<Completion, CompletionError>;
}

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: String, model: String) -> Result<Self, CompletionError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header_value(&format!("Bearer {}", api_key))?,
        );

        Ok(Self {
            client: build_client(headers, Duration::from_secs(60))?,
            base_url,
            model,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, question: &str) -> Result<Completion, CompletionError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": question },
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        // Quota is already consumed; a single attempt keeps cost bounded.
        let resp = send_with_retry(
            || {
                self.client
                    .post(format!("{}/chat/completions", self.base_url))
                    .json(&body)
            },
            1,
        )
        .await?;

        if !resp.status().is_success() {
            return Err(CompletionError::Api(error_body(resp).await));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Api(e.to_string()))?;

        parse_completion(chat)
    }
}

fn parse_completion(chat: ChatResponse) -> Result<Completion, CompletionError> {
    let text = chat
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(CompletionError::Empty)?;

    Ok(Completion {
        text,
        tokens_used: chat.usage.map(|u| u.total_tokens),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice_and_usage() {
        let chat: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Olá!  " } }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13 }
        }))
        .unwrap();

        let completion = parse_completion(chat).unwrap();
        assert_eq!(completion.text, "Olá!");
        assert_eq!(completion.tokens_used, Some(13));
    }

    #[test]
    fn empty_choices_are_an_error() {
        let chat: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(parse_completion(chat), Err(CompletionError::Empty)));
    }
}
