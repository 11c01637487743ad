use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{
    Account, Chat, ChatSearchOptions, ListPayload, Message, MessageSearchOptions, SendMessageInput,
    SendResult,
};
use crate::paginate::{self, PaginationPolicy};
use crate::resolver::{AttemptError, EndpointResolver};
use crate::transport::{ReqwestTransport, Transport, TransportError};

pub const ACCOUNTS_PATH: &str = "/v0/get-accounts";
pub const SEARCH_CHATS_PATH: &str = "/v0/search-chats";
pub const SEARCH_MESSAGES_PATH: &str = "/v0/search-messages";
pub const SEND_MESSAGE_PATH: &str = "/v0/send-message";

pub const SERVICE_HINT: &str = "ensure the Beeper desktop app is running with its API enabled";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no access token. Run `beeper-assist auth login` or set BEEPER_ACCESS_TOKEN")]
    AuthenticationRequired,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("chat service unreachable ({last_error}); {}", SERVICE_HINT)]
    ServiceUnreachable { last_error: Box<AttemptError> },
    #[error("access token rejected (status {status}): {body}")]
    AuthenticationRejected { status: u16, body: String },
    #[error("unexpected response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// How `fetch_all_chats` treats the service's paging cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatPaging {
    /// One request; whatever fits under the limit is the answer.
    #[default]
    SinglePage,
    /// Keep requesting older pages while the service reports more, up to `max_pages`.
    FollowCursor { max_pages: usize },
}

/// Client for the Beeper desktop API.
///
/// Every call goes through one [`EndpointResolver`], so direct and proxied setups only
/// differ in the candidate list. Sends are never retried: the service takes no
/// idempotency key and a repeated send can deliver the message twice.
#[derive(Clone)]
pub struct BeeperClient {
    resolver: EndpointResolver,
    chat_paging: ChatPaging,
    policy: PaginationPolicy,
}

impl BeeperClient {
    pub fn new(resolver: EndpointResolver) -> Self {
        Self {
            resolver,
            chat_paging: ChatPaging::default(),
            policy: PaginationPolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        let resolver = EndpointResolver::new(config.transport.candidates(), transport);
        Ok(Self::new(resolver)
            .with_chat_paging(config.chat_paging)
            .with_pagination_policy(config.pagination.clone()))
    }

    pub fn with_chat_paging(mut self, chat_paging: ChatPaging) -> Self {
        self.chat_paging = chat_paging;
        self
    }

    pub fn with_pagination_policy(mut self, policy: PaginationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    pub async fn fetch_accounts(&self, token: &str) -> Result<Vec<Account>, ApiError> {
        let token = require_token(token)?;
        let payload: ListPayload<Account> = self.resolver.get(ACCOUNTS_PATH, Vec::new(), token).await?;
        Ok(payload.into_items())
    }

    pub async fn fetch_all_chats(
        &self,
        token: &str,
        options: &ChatSearchOptions,
    ) -> Result<Vec<Chat>, ApiError> {
        let token = require_token(token)?;
        match self.chat_paging {
            ChatPaging::SinglePage => {
                let payload: ListPayload<Chat> = self
                    .resolver
                    .get(SEARCH_CHATS_PATH, options.to_query(), token)
                    .await?;
                Ok(payload.into_items())
            }
            ChatPaging::FollowCursor { max_pages } => {
                self.follow_chat_cursor(token, options, max_pages.max(1)).await
            }
        }
    }

    async fn follow_chat_cursor(
        &self,
        token: &str,
        options: &ChatSearchOptions,
        max_pages: usize,
    ) -> Result<Vec<Chat>, ApiError> {
        let mut chats = Vec::new();
        let mut seen_cursors = HashSet::new();
        let mut request = options.clone();

        for page_number in 1..=max_pages {
            let payload: ListPayload<Chat> = self
                .resolver
                .get(SEARCH_CHATS_PATH, request.to_query(), token)
                .await?;
            let page = payload.into_page();
            chats.extend(page.items);

            let next = match (page.has_more, page.oldest_cursor) {
                (Some(true), Some(cursor)) if seen_cursors.insert(cursor.clone()) => cursor,
                _ => break,
            };
            if page_number == max_pages {
                warn!(max_pages, "stopped following chat pages at the configured limit");
                break;
            }
            debug!(page_number, cursor = %next, "fetching older chats");
            request.cursor = Some(next);
            request.direction = Some("before".to_string());
        }

        Ok(chats)
    }

    /// Chats of one account. The service is asked for every account's chats and the
    /// result is filtered here, so the page limit is shared across all accounts.
    pub async fn fetch_chats(
        &self,
        account_id: &str,
        token: &str,
        options: &ChatSearchOptions,
    ) -> Result<Vec<Chat>, ApiError> {
        let chats = self.fetch_all_chats(token, options).await?;
        Ok(chats
            .into_iter()
            .filter(|chat| chat.account_id == account_id)
            .collect())
    }

    /// Messages of one chat, newest first when `fetch_all` is set.
    ///
    /// With `fetch_all` the history is walked backwards in date windows until the
    /// service runs dry or the [`PaginationPolicy`] says stop. Without it a single page
    /// is returned in service order.
    pub async fn fetch_messages(
        &self,
        chat_id: &str,
        limit: u32,
        token: &str,
        options: &MessageSearchOptions,
        fetch_all: bool,
    ) -> Result<Vec<Message>, ApiError> {
        let token = require_token(token)?;
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return Err(ApiError::Validation("chatID is required".to_string()));
        }

        if fetch_all {
            paginate::fetch_history(
                &self.resolver,
                &self.policy,
                chat_id,
                limit,
                token,
                options,
                chrono::Utc::now(),
            )
            .await
        } else {
            paginate::fetch_single_page(&self.resolver, chat_id, limit, token, options).await
        }
    }

    pub async fn send_message(
        &self,
        input: &SendMessageInput,
        token: &str,
    ) -> Result<SendResult, ApiError> {
        let chat_id = input.chat_id.trim();
        if chat_id.is_empty() {
            return Err(ApiError::Validation("chatID is required".to_string()));
        }
        if input.text.trim().is_empty() {
            return Err(ApiError::Validation("message text is empty".to_string()));
        }
        let token = require_token(token)?;

        let mut payload = Map::new();
        payload.insert("chatID".to_string(), json!(chat_id));
        payload.insert("text".to_string(), json!(input.text));
        if let Some(reply_to) = input
            .reply_to_message_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            payload.insert("replyToMessageID".to_string(), json!(reply_to));
        }

        let result: SendResult = self
            .resolver
            .post(SEND_MESSAGE_PATH, Value::Object(payload), token)
            .await?;
        if !result.has_message_reference() {
            // Some bridges acknowledge without ids; the message may still have gone out.
            warn!(chat_id, "send-message response has neither pendingMessageID nor messageID");
        }
        Ok(result)
    }

    pub async fn send_reply(
        &self,
        chat_id: &str,
        text: &str,
        reply_to_message_id: &str,
        token: &str,
    ) -> Result<SendResult, ApiError> {
        let input = SendMessageInput {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            reply_to_message_id: Some(reply_to_message_id.to_string()),
        };
        self.send_message(&input, token).await
    }
}

fn require_token(token: &str) -> Result<&str, ApiError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::AuthenticationRequired);
    }
    Ok(token)
}
