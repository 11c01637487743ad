//! Full-history retrieval for one chat.
//!
//! The service cannot be asked for "every message of chat X" and caps each page, so
//! history is scanned backwards in fixed date windows. Every window is over-fetched
//! and filtered to the chat locally.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::api::{ApiError, SEARCH_MESSAGES_PATH};
use crate::dates::{self, format_query_date};
use crate::models::{ListPayload, Message, MessageSearchOptions};
use crate::resolver::EndpointResolver;

/// Length of one backward window.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;
/// Each window asks for `limit * OVERFETCH_FACTOR` messages to absorb other chats' messages.
pub const DEFAULT_OVERFETCH_FACTOR: u32 = 2;
/// A window with fewer chat messages than this counts as "thin"...
pub const DEFAULT_EARLY_STOP_MIN_MESSAGES: usize = 10;
/// ...and a thin window ends the scan once more than this many windows were scanned.
pub const DEFAULT_EARLY_STOP_AFTER_WINDOWS: usize = 5;
/// Hard ceiling on windows per call, about 8 years at the default window length.
pub const DEFAULT_MAX_WINDOWS: usize = 100;

/// Tunables for the backward scan.
///
/// The early stop is a heuristic: a chat that was quiet for a month after five busy
/// windows loses everything older than that quiet month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationPolicy {
    pub window: Duration,
    pub overfetch_factor: u32,
    pub early_stop_min_messages: usize,
    pub early_stop_after_windows: usize,
    pub max_windows: usize,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            window: Duration::days(DEFAULT_WINDOW_DAYS),
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            early_stop_min_messages: DEFAULT_EARLY_STOP_MIN_MESSAGES,
            early_stop_after_windows: DEFAULT_EARLY_STOP_AFTER_WINDOWS,
            max_windows: DEFAULT_MAX_WINDOWS,
        }
    }
}

/// Why a backward scan ended. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    EmptyWindow,
    WindowCeiling,
    ThinWindow,
    /// Reached `date_after`, or the epoch when there is none.
    DateFloor,
}

pub(crate) async fn fetch_single_page(
    resolver: &EndpointResolver,
    chat_id: &str,
    limit: u32,
    token: &str,
    options: &MessageSearchOptions,
) -> Result<Vec<Message>, ApiError> {
    let mut query = options.to_query(true);
    query.push(("direction".to_string(), "before".to_string()));
    query.push(("limit".to_string(), limit.to_string()));

    let payload: ListPayload<Message> = resolver.get(SEARCH_MESSAGES_PATH, query, token).await?;
    Ok(payload
        .into_items()
        .into_iter()
        .filter(|message| message.chat_id == chat_id)
        .collect())
}

/// Walk backwards from `now` (or `options.date_before`) one window at a time.
///
/// A failed window fails the whole call; nothing collected so far is returned.
pub(crate) async fn fetch_history(
    resolver: &EndpointResolver,
    policy: &PaginationPolicy,
    chat_id: &str,
    limit: u32,
    token: &str,
    options: &MessageSearchOptions,
    now: DateTime<Utc>,
) -> Result<Vec<Message>, ApiError> {
    let floor = parse_bound(options.date_after.as_deref(), now);
    let mut current = parse_bound(options.date_before.as_deref(), now).unwrap_or(now);
    let page_limit = limit.max(1).saturating_mul(policy.overfetch_factor.max(1));
    let base_query = options.to_query(false);

    let mut collected = Vec::new();
    let mut seen = HashSet::new();
    let mut windows = 0usize;

    // Windows never reach past `date_after` or the Unix epoch.
    let epoch = DateTime::<Utc>::UNIX_EPOCH;
    let earliest = floor.map_or(epoch, |floor| floor.max(epoch));

    let reason = loop {
        let end = current;
        if end <= earliest {
            break StopReason::DateFloor;
        }
        let start = end
            .checked_sub_signed(policy.window)
            .map_or(earliest, |start| start.max(earliest));

        let mut query = base_query.clone();
        query.push(("dateAfter".to_string(), format_query_date(start)));
        query.push(("dateBefore".to_string(), format_query_date(end)));
        query.push(("direction".to_string(), "before".to_string()));
        query.push(("limit".to_string(), page_limit.to_string()));

        let payload: ListPayload<Message> = resolver.get(SEARCH_MESSAGES_PATH, query, token).await?;
        let items = payload.into_items();
        windows += 1;
        if items.is_empty() {
            break StopReason::EmptyWindow;
        }

        let mut in_chat = 0usize;
        for message in items.into_iter().filter(|message| message.chat_id == chat_id) {
            in_chat += 1;
            // Adjacent windows share their boundary instant.
            if seen.insert(message.id.clone()) {
                collected.push(message);
            }
        }
        debug!(window = windows, in_chat, total = collected.len(), "scanned message window");

        if windows >= policy.max_windows {
            warn!(
                chat_id,
                windows, "reached maximum page limit, returning partial history"
            );
            break StopReason::WindowCeiling;
        }
        if in_chat < policy.early_stop_min_messages && windows > policy.early_stop_after_windows {
            break StopReason::ThinWindow;
        }
        if start <= earliest {
            break StopReason::DateFloor;
        }

        current = start;
    };

    sort_newest_first(&mut collected);
    info!(
        chat_id,
        windows,
        messages = collected.len(),
        reason = ?reason,
        "message history fetched"
    );
    Ok(collected)
}

/// Descending by normalized timestamp; messages without a usable timestamp go last.
pub fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by_key(|message| std::cmp::Reverse(message.timestamp_millis()));
}

fn parse_bound(value: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    dates::normalize_timestamp_text(value)
        .and_then(DateTime::from_timestamp_millis)
        .or_else(|| dates::parse_time_expression(value, now).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, ok_json, query_param, refused, status};
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 15, 4, 5)
            .single()
            .expect("valid datetime")
    }

    fn resolver(transport: Arc<ScriptedTransport>) -> EndpointResolver {
        EndpointResolver::new(vec!["http://localhost:23373".to_string()], transport)
    }

    fn message(id: &str, chat_id: &str, timestamp: Value) -> Value {
        json!({"id": id, "chatID": chat_id, "text": format!("text {id}"), "timestamp": timestamp})
    }

    /// Window `n` (0-based) gets `counts[n]` messages for "c1" plus one for another chat.
    fn window_backend(counts: Vec<usize>) -> Arc<ScriptedTransport> {
        let calls = AtomicUsize::new(0);
        ScriptedTransport::new(move |_| {
            let index = calls.fetch_add(1, Ordering::SeqCst);
            let Some(&count) = counts.get(index) else {
                return ok_json(json!({"items": []}));
            };
            if count == 0 {
                return ok_json(json!({"items": []}));
            }
            let base = 1_700_000_000i64 - (index as i64) * 2_592_000;
            let mut items: Vec<Value> = (0..count)
                .map(|n| message(&format!("w{index}-{n}"), "c1", json!(base - n as i64)))
                .collect();
            items.push(message(&format!("other-{index}"), "c2", json!(base)));
            ok_json(json!({"items": items}))
        })
    }

    async fn history(
        transport: Arc<ScriptedTransport>,
        policy: &PaginationPolicy,
    ) -> Result<Vec<Message>, ApiError> {
        fetch_history(
            &resolver(transport),
            policy,
            "c1",
            50,
            "token",
            &MessageSearchOptions::default(),
            now(),
        )
        .await
    }

    #[tokio::test]
    async fn stops_on_first_empty_window() {
        let transport = ScriptedTransport::new({
            let calls = AtomicUsize::new(0);
            move |_| match calls.fetch_add(1, Ordering::SeqCst) {
                0 => ok_json(json!({"items": [
                    message("a", "c1", json!(1_700_000_000)),
                    message("x", "c2", json!(1_700_000_500)),
                ]})),
                1 => ok_json(json!([message("b", "c1", json!("1699000000000"))])),
                2 => ok_json(json!({"items": [message("c", "c1", json!("2023-11-20T00:00:00Z"))]})),
                _ => ok_json(json!({"items": []})),
            }
        });

        let messages = history(transport.clone(), &PaginationPolicy::default())
            .await
            .expect("history");

        assert_eq!(transport.requests().len(), 4);
        assert_eq!(
            messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["c", "a", "b"]
        );
    }

    #[tokio::test]
    async fn windows_move_strictly_backwards() {
        let transport = window_backend(vec![20, 20, 0]);
        history(transport.clone(), &PaginationPolicy::default())
            .await
            .expect("history");

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(query_param(&requests[0], "dateBefore"), Some("2026-01-28T15:04:05.000Z"));
        assert_eq!(query_param(&requests[0], "dateAfter"), Some("2025-12-29T15:04:05.000Z"));
        assert_eq!(
            query_param(&requests[1], "dateBefore"),
            query_param(&requests[0], "dateAfter")
        );
        for request in &requests {
            assert_eq!(query_param(request, "direction"), Some("before"));
            assert_eq!(query_param(request, "limit"), Some("100"));
        }
    }

    #[tokio::test]
    async fn thin_window_after_five_windows_stops_early() {
        let transport = window_backend(vec![50, 50, 50, 50, 50, 2, 50, 50]);
        let messages = history(transport.clone(), &PaginationPolicy::default())
            .await
            .expect("history");

        assert_eq!(transport.requests().len(), 6);
        assert_eq!(messages.len(), 252);
        assert!(messages.iter().all(|m| m.chat_id == "c1"));
    }

    #[tokio::test]
    async fn thin_windows_early_on_do_not_stop() {
        let transport = window_backend(vec![1, 1, 1, 1, 1, 0]);
        let messages = history(transport.clone(), &PaginationPolicy::default())
            .await
            .expect("history");
        assert_eq!(transport.requests().len(), 6);
        assert_eq!(messages.len(), 5);
    }

    #[tokio::test]
    async fn oversized_windows_stop_at_the_epoch() {
        for window in [Duration::MAX, Duration::days(365 * 300_000)] {
            let policy = PaginationPolicy {
                window,
                ..Default::default()
            };
            let transport = window_backend(vec![20; 10]);
            let messages = history(transport.clone(), &policy).await.expect("history");

            let requests = transport.requests();
            assert_eq!(requests.len(), 1);
            assert_eq!(
                query_param(&requests[0], "dateAfter"),
                Some("1970-01-01T00:00:00.000Z")
            );
            assert_eq!(messages.len(), 20);
        }
    }

    #[tokio::test]
    async fn window_ceiling_returns_partial_history() {
        let policy = PaginationPolicy {
            max_windows: 3,
            ..Default::default()
        };
        let transport = window_backend(vec![20; 10]);
        let messages = history(transport.clone(), &policy).await.expect("history");
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(messages.len(), 60);
    }

    #[tokio::test]
    async fn failed_window_discards_collected_messages() {
        let transport = ScriptedTransport::new({
            let calls = AtomicUsize::new(0);
            move |_| match calls.fetch_add(1, Ordering::SeqCst) {
                0 => ok_json(json!([message("a", "c1", json!(1_700_000_000))])),
                1 => status(503, "unavailable"),
                _ => refused(),
            }
        });
        let err = history(transport, &PaginationPolicy::default())
            .await
            .expect_err("second window fails");
        assert!(matches!(err, ApiError::ServiceUnreachable { .. }));
    }

    #[tokio::test]
    async fn boundary_duplicates_are_dropped() {
        let transport = ScriptedTransport::new({
            let calls = AtomicUsize::new(0);
            move |_| match calls.fetch_add(1, Ordering::SeqCst) {
                0 => ok_json(json!([message("a", "c1", json!(1_700_000_000))])),
                1 => ok_json(json!([
                    message("a", "c1", json!(1_700_000_000)),
                    message("b", "c1", json!(1_690_000_000)),
                ])),
                _ => ok_json(json!([])),
            }
        });
        let messages = history(transport, &PaginationPolicy::default())
            .await
            .expect("history");
        assert_eq!(
            messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn date_options_bound_the_scan() {
        let transport = window_backend(vec![20; 10]);
        let options = MessageSearchOptions {
            date_before: Some("2026-01-01T00:00:00Z".to_string()),
            date_after: Some("2025-11-15T00:00:00Z".to_string()),
            ..Default::default()
        };
        fetch_history(
            &resolver(transport.clone()),
            &PaginationPolicy::default(),
            "c1",
            50,
            "token",
            &options,
            now(),
        )
        .await
        .expect("history");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(query_param(&requests[0], "dateBefore"), Some("2026-01-01T00:00:00.000Z"));
        assert_eq!(query_param(&requests[1], "dateAfter"), Some("2025-11-15T00:00:00.000Z"));
        assert_eq!(
            requests[0]
                .query
                .iter()
                .filter(|(key, _)| key == "dateAfter")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn single_page_is_filtered_and_repeatable() {
        let transport = ScriptedTransport::new(|_| {
            ok_json(json!({"items": [
                message("m2", "c1", json!(1_700_000_100)),
                message("x", "c2", json!(1_700_000_050)),
                message("m1", "c1", json!(1_700_000_000)),
            ]}))
        });
        let resolver = resolver(transport.clone());
        let options = MessageSearchOptions {
            query: Some("dinner".to_string()),
            ..Default::default()
        };

        let first = fetch_single_page(&resolver, "c1", 25, "token", &options)
            .await
            .expect("first");
        let second = fetch_single_page(&resolver, "c1", 25, "token", &options)
            .await
            .expect("second");

        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m2", "m1"]
        );
        let requests = transport.requests();
        assert_eq!(query_param(&requests[0], "limit"), Some("25"));
        assert_eq!(query_param(&requests[0], "direction"), Some("before"));
        assert_eq!(query_param(&requests[0], "query"), Some("dinner"));
    }

    #[test]
    fn unknown_timestamps_sort_last() {
        let mut messages: Vec<Message> = serde_json::from_value(json!([
            {"id": "none", "chatID": "c1"},
            {"id": "old", "chatID": "c1", "timestamp": 1_600_000_000},
            {"id": "new", "chatID": "c1", "timestamp": "2024-01-01T00:00:00Z"},
            {"id": "bad", "chatID": "c1", "timestamp": "whenever"}
        ]))
        .expect("messages");
        sort_newest_first(&mut messages);
        assert_eq!(
            messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["new", "old", "none", "bad"]
        );
    }
}
