//! Chat summaries with a bounded in-memory cache.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::api::{ApiError, BeeperClient};
use crate::generate::{GenerateError, GenerationRequest, TextGenerator};
use crate::models::{Message, MessageSearchOptions};

const SUMMARY_MAX_TOKENS: u32 = 300;
const SUMMARY_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error("chat {0} has no text messages to summarize")]
    NoMessages(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryKey {
    pub chat_id: String,
    pub message_count: u32,
}

/// Least-recently-used cache of generated summaries.
#[derive(Debug)]
pub struct SummaryCache {
    capacity: usize,
    entries: HashMap<SummaryKey, String>,
    order: VecDeque<SummaryKey>,
}

impl SummaryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, key: &SummaryKey) -> Option<String> {
        let value = self.entries.get(key)?.clone();
        self.touch(key);
        Some(value)
    }

    pub fn insert(&mut self, key: SummaryKey, summary: String) {
        if self.entries.insert(key.clone(), summary).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: &SummaryKey) {
        if let Some(position) = self.order.iter().position(|existing| existing == key) {
            if let Some(entry) = self.order.remove(position) {
                self.order.push_back(entry);
            }
        }
    }
}

/// Summaries for chats, cached per `(chat, message count)`.
///
/// The cache lives inside the `Summarizer`, so repeat requests only hit it when the
/// caller keeps one instance around. A one-shot CLI run always generates.
pub struct Summarizer {
    client: BeeperClient,
    generator: Arc<dyn TextGenerator>,
    cache: Mutex<SummaryCache>,
}

impl Summarizer {
    pub fn new(client: BeeperClient, generator: Arc<dyn TextGenerator>, cache: SummaryCache) -> Self {
        Self {
            client,
            generator,
            cache: Mutex::new(cache),
        }
    }

    /// Summarize the latest `message_count` messages of a chat.
    pub async fn summarize_chat(
        &self,
        chat_id: &str,
        message_count: u32,
        token: &str,
    ) -> Result<String, SummaryError> {
        let key = SummaryKey {
            chat_id: chat_id.trim().to_string(),
            message_count,
        };
        if let Some(cached) = self.cached(&key) {
            debug!(chat_id = %key.chat_id, message_count, "summary cache hit");
            return Ok(cached);
        }

        let messages = self
            .client
            .fetch_messages(
                &key.chat_id,
                message_count,
                token,
                &MessageSearchOptions::default(),
                false,
            )
            .await?;
        let transcript = build_transcript(&messages);
        if transcript.is_empty() {
            return Err(SummaryError::NoMessages(key.chat_id));
        }

        let request = GenerationRequest {
            prompt: format!(
                "Summarize the following conversation in a few sentences. \
                 Mention open questions and anything someone is waiting on.\n\n{transcript}"
            ),
            max_tokens: SUMMARY_MAX_TOKENS,
            temperature: SUMMARY_TEMPERATURE,
        };
        let summary = self.generator.generate(&request).await?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, summary.clone());
        }
        Ok(summary)
    }

    fn cached(&self, key: &SummaryKey) -> Option<String> {
        self.cache.lock().ok()?.get(key)
    }
}

/// Oldest first, one "sender: text" line per message with text.
fn build_transcript(messages: &[Message]) -> String {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by_key(|message| message.timestamp_millis());
    ordered
        .into_iter()
        .filter_map(|message| {
            let text = message.text.as_deref()?.trim();
            if text.is_empty() {
                return None;
            }
            Some(format!("{}: {}", message.sender_name(), text))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
