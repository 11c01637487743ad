use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::dates;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(rename = "accountID", deserialize_with = "string_or_number")]
    pub account_id: String,
    #[serde(default)]
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<AccountUser>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Account {
    pub fn display_name(&self) -> String {
        self.user
            .as_ref()
            .and_then(|user| {
                [&user.display_name, &user.full_name, &user.name]
                    .into_iter()
                    .flatten()
                    .map(|value| value.trim())
                    .find(|value| !value.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.account_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "accountID", default)]
    pub account_id: String,
    #[serde(rename = "type", default)]
    pub chat_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Chat {
    pub fn display_name(&self) -> &str {
        [&self.title, &self.name]
            .into_iter()
            .flatten()
            .map(|value| value.as_str())
            .find(|value| !value.trim().is_empty())
            .unwrap_or(self.id.as_str())
    }

    pub fn last_message_preview(&self) -> Option<&str> {
        let last = self.last_message.as_ref()?;
        last.text
            .as_deref()
            .or(last.content.as_deref())
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "chatID", default)]
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<MessageSender>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Milliseconds since the epoch, or `None` when the service sent nothing usable.
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp.as_ref().and_then(RawTimestamp::to_millis)
    }

    pub fn sender_name(&self) -> &str {
        self.sender
            .as_ref()
            .and_then(|sender| sender.display_name.as_deref().or(sender.name.as_deref()))
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Timestamp exactly as the service sent it: seconds or milliseconds, number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Number(serde_json::Number),
    Text(String),
}

impl RawTimestamp {
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            RawTimestamp::Number(number) => number.as_f64().and_then(dates::epoch_number_to_millis),
            RawTimestamp::Text(text) => dates::normalize_timestamp_text(text),
        }
    }
}

/// Either a bare array or the `{items: [...]}` envelope; the service uses both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListPayload<T> {
    Bare(Vec<T>),
    Page(Page<T>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub has_more: Option<bool>,
    #[serde(default)]
    pub oldest_cursor: Option<String>,
}

impl<T> ListPayload<T> {
    pub fn into_page(self) -> Page<T> {
        match self {
            ListPayload::Bare(items) => Page {
                items,
                has_more: None,
                oldest_cursor: None,
            },
            ListPayload::Page(page) => page,
        }
    }

    pub fn into_items(self) -> Vec<T> {
        self.into_page().items
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSearchOptions {
    pub query: Option<String>,
    pub account_ids: Vec<String>,
    pub chat_type: Option<String>,
    pub inbox: Option<String>,
    pub unread_only: Option<bool>,
    pub include_muted: Option<bool>,
    pub last_activity_after: Option<String>,
    pub last_activity_before: Option<String>,
    pub cursor: Option<String>,
    pub direction: Option<String>,
    pub limit: Option<u32>,
}

pub const DEFAULT_CHAT_LIMIT: u32 = 200;

impl ChatSearchOptions {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = QueryBuilder::default();
        query.push("limit", self.limit.unwrap_or(DEFAULT_CHAT_LIMIT));
        query.push_opt("query", self.query.as_deref());
        query.push_all("accountIDs", &self.account_ids);
        query.push_opt("type", self.chat_type.as_deref());
        query.push_opt("inbox", self.inbox.as_deref());
        query.push_opt("unreadOnly", self.unread_only);
        query.push_opt("includeMuted", self.include_muted);
        query.push_opt("lastActivityAfter", self.last_activity_after.as_deref());
        query.push_opt("lastActivityBefore", self.last_activity_before.as_deref());
        query.push_opt("cursor", self.cursor.as_deref());
        query.push_opt("direction", self.direction.as_deref());
        query.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSearchOptions {
    pub query: Option<String>,
    pub account_ids: Vec<String>,
    pub chat_type: Option<String>,
    pub media_types: Vec<String>,
    pub sender: Option<String>,
    pub date_after: Option<String>,
    pub date_before: Option<String>,
    pub cursor: Option<String>,
    pub exclude_low_priority: Option<bool>,
    pub include_muted: Option<bool>,
}

impl MessageSearchOptions {
    /// Pass-through parameters. The paginator appends its own window and paging keys,
    /// so `date_after`/`date_before` only apply to single-page requests.
    pub fn to_query(&self, include_dates: bool) -> Vec<(String, String)> {
        let mut query = QueryBuilder::default();
        query.push_opt("query", self.query.as_deref());
        query.push_all("accountIDs", &self.account_ids);
        query.push_opt("chatType", self.chat_type.as_deref());
        query.push_all("mediaTypes", &self.media_types);
        query.push_opt("sender", self.sender.as_deref());
        if include_dates {
            query.push_opt("dateAfter", self.date_after.as_deref());
            query.push_opt("dateBefore", self.date_before.as_deref());
        }
        query.push_opt("cursor", self.cursor.as_deref());
        query.push_opt("excludeLowPriority", self.exclude_low_priority);
        query.push_opt("includeMuted", self.include_muted);
        query.finish()
    }
}

#[derive(Default)]
struct QueryBuilder {
    pairs: Vec<(String, String)>,
}

impl QueryBuilder {
    fn push(&mut self, key: &str, value: impl ToString) {
        self.pairs.push((key.to_string(), value.to_string()));
    }

    fn push_opt<V: ToString>(&mut self, key: &str, value: Option<V>) {
        if let Some(value) = value {
            self.push(key, value);
        }
    }

    fn push_all(&mut self, key: &str, values: &[String]) {
        for value in values {
            self.push(key, value);
        }
    }

    fn finish(self) -> Vec<(String, String)> {
        self.pairs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageInput {
    pub chat_id: String,
    pub text: String,
    pub reply_to_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(rename = "chatID", default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(
        rename = "pendingMessageID",
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub pending_message_id: Option<String>,
    #[serde(
        rename = "messageID",
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SendResult {
    pub fn has_message_reference(&self) -> bool {
        self.pending_message_id.is_some() || self.message_id.is_some()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(Value::Number(value)) => Ok(Some(value.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
