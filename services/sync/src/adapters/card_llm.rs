//! services/sync/src/adapters/card_llm.rs
//!
//! This module contains the adapter for the card-generating LLM.
//! It implements the `CardGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use flashforge_core::{
    domain::{Card, CARDS_PER_PAGE},
    ports::{CardGenerationService, PortError, PortResult},
};
use serde::Deserialize;

const CARD_INSTRUCTIONS: &str = "You are a flashcard author. Turn the document you are given \
into exactly 3 flashcard style objects formatted as strict, valid JSON: a top-level array of \
exactly 3 objects, each with 'question' as the first key and the generated question as the \
value, and 'answer' as the second key and the generated answer as the value. Escape any \
characters that would invalidate the JSON. Output nothing except the JSON array.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `CardGenerationService` using an
/// OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiCardAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCardAdapter {
    /// Creates a new `OpenAiCardAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// Reply parsing
//=========================================================================================

/// The wire shape of one generated card. Both keys are mandatory.
#[derive(Deserialize)]
struct CardReply {
    question: String,
    answer: String,
}

/// Strips a fenced-code wrapper (with an optional `json` language tag) that
/// the model sometimes adds around its reply.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = match trimmed.strip_prefix("```") {
        Some(rest) => rest.strip_prefix("json").unwrap_or(rest),
        None => trimmed,
    };
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Parses a generation reply into exactly `expected` cards.
///
/// Any deviation from the contract — unparseable JSON, missing keys, wrong
/// item count — is a `GenerationFormat` error; a malformed reply makes the
/// resulting deck incorrect by construction, so it is never patched up here.
pub(crate) fn parse_card_reply(raw: &str, expected: usize) -> PortResult<Vec<Card>> {
    let replies: Vec<CardReply> = serde_json::from_str(strip_fences(raw))
        .map_err(|e| PortError::GenerationFormat(format!("reply is not a JSON card list: {e}")))?;
    if replies.len() != expected {
        return Err(PortError::GenerationFormat(format!(
            "expected {expected} cards, got {}",
            replies.len()
        )));
    }
    Ok(replies
        .into_iter()
        .map(|reply| Card {
            question: reply.question,
            answer: reply.answer,
        })
        .collect())
}

//=========================================================================================
// `CardGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CardGenerationService for OpenAiCardAdapter {
    /// Generates the fixed-size card set for one page's exported content.
    async fn generate_cards(&self, content: &str) -> PortResult<Vec<Card>> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(CARD_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Source(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(content.to_string())
                .build()
                .map_err(|e| PortError::Source(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Source(e.to_string()))?;

        // Call the API and manually map the error if it occurs.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Source(e.to_string()))?;

        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Source("card generation LLM returned no text content".to_string())
            })?;

        parse_card_reply(&reply, CARDS_PER_PAGE)
    }
}
