use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::api::ChatPaging;
use crate::paginate::{self, PaginationPolicy};
use crate::transport::TransportMode;

/// Ports the desktop app has shipped its local API on, in the order they are tried.
pub const DEFAULT_BASE_URLS: &[&str] = &[
    "http://localhost:23373",
    "http://127.0.0.1:23373",
    "http://localhost:23374",
    "http://127.0.0.1:23374",
];

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CHAT_MAX_PAGES: usize = 10;
const DEFAULT_COHERE_API_BASE: &str = "https://api.cohere.com";
const DEFAULT_COHERE_MODEL: &str = "command-r";
const DEFAULT_SUMMARY_CACHE_SIZE: usize = 64;

#[derive(Clone, Debug)]
pub struct Config {
    pub transport: TransportMode,
    pub request_timeout: Duration,
    pub chat_paging: ChatPaging,
    pub pagination: PaginationPolicy,
    pub data_dir: PathBuf,
    pub secrets_path: PathBuf,
    pub state_path: PathBuf,
    pub cohere_api_key: Option<String>,
    pub cohere_api_base: String,
    pub cohere_model: String,
    pub summary_cache_size: usize,
}

impl Config {
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `load` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let transport = match var("BEEPER_PROXY_URL").and_then(|url| normalize_base_url(&url)) {
            Some(proxy_url) => TransportMode::Proxied { proxy_url },
            None => {
                let base_urls = var("BEEPER_API_BASE_URLS")
                    .map(|list| {
                        list.split(',')
                            .filter_map(normalize_base_url)
                            .collect::<Vec<_>>()
                    })
                    .filter(|urls| !urls.is_empty())
                    .unwrap_or_else(|| DEFAULT_BASE_URLS.iter().map(|url| url.to_string()).collect());
                TransportMode::Direct { base_urls }
            }
        };

        let request_timeout = Duration::from_secs(parse_or(
            "BEEPER_REQUEST_TIMEOUT_SECS",
            var("BEEPER_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        ));

        let chat_paging = match var("BEEPER_CHAT_PAGING").map(|mode| mode.to_lowercase()).as_deref() {
            Some("cursor") => ChatPaging::FollowCursor {
                max_pages: parse_or(
                    "BEEPER_CHAT_MAX_PAGES",
                    var("BEEPER_CHAT_MAX_PAGES"),
                    DEFAULT_CHAT_MAX_PAGES,
                ),
            },
            Some("single") | None => ChatPaging::SinglePage,
            Some(other) => {
                warn!(value = other, "unknown BEEPER_CHAT_PAGING, using single-page chats");
                ChatPaging::SinglePage
            }
        };

        let window_days = parse_or(
            "BEEPER_WINDOW_DAYS",
            var("BEEPER_WINDOW_DAYS"),
            paginate::DEFAULT_WINDOW_DAYS,
        );
        let window = chrono::Duration::try_days(window_days).unwrap_or_else(|| {
            warn!(key = "BEEPER_WINDOW_DAYS", value = window_days, "window out of range, using default");
            chrono::Duration::days(paginate::DEFAULT_WINDOW_DAYS)
        });

        let pagination = PaginationPolicy {
            window,
            overfetch_factor: parse_or(
                "BEEPER_OVERFETCH_FACTOR",
                var("BEEPER_OVERFETCH_FACTOR"),
                paginate::DEFAULT_OVERFETCH_FACTOR,
            ),
            early_stop_min_messages: parse_or(
                "BEEPER_EARLY_STOP_MIN_MESSAGES",
                var("BEEPER_EARLY_STOP_MIN_MESSAGES"),
                paginate::DEFAULT_EARLY_STOP_MIN_MESSAGES,
            ),
            early_stop_after_windows: parse_or(
                "BEEPER_EARLY_STOP_AFTER_WINDOWS",
                var("BEEPER_EARLY_STOP_AFTER_WINDOWS"),
                paginate::DEFAULT_EARLY_STOP_AFTER_WINDOWS,
            ),
            max_windows: parse_or(
                "BEEPER_MAX_WINDOWS",
                var("BEEPER_MAX_WINDOWS"),
                paginate::DEFAULT_MAX_WINDOWS,
            ),
        };

        let data_dir = var("BEEPER_ASSIST_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(var("HOME")));
        let secrets_path = var("BEEPER_ASSIST_SECRETS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("secrets.json"));
        let state_path = var("BEEPER_ASSIST_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("state.json"));

        let cohere_api_base = var("COHERE_API_BASE")
            .and_then(|url| normalize_base_url(&url))
            .unwrap_or_else(|| DEFAULT_COHERE_API_BASE.to_string());

        Self {
            transport,
            request_timeout,
            chat_paging,
            pagination,
            data_dir,
            secrets_path,
            state_path,
            cohere_api_key: var("COHERE_API_KEY"),
            cohere_api_base,
            cohere_model: var("COHERE_MODEL").unwrap_or_else(|| DEFAULT_COHERE_MODEL.to_string()),
            summary_cache_size: parse_or(
                "BEEPER_SUMMARY_CACHE_SIZE",
                var("BEEPER_SUMMARY_CACHE_SIZE"),
                DEFAULT_SUMMARY_CACHE_SIZE,
            ),
        }
    }

    /// Identifies the service a stored token belongs to.
    pub fn endpoint_key(&self) -> String {
        self.transport.candidates().join(",")
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            transport_mode: self.transport.label().to_string(),
            candidates: self.transport.candidates(),
            request_timeout_secs: self.request_timeout.as_secs(),
            chat_paging: match self.chat_paging {
                ChatPaging::SinglePage => "single".to_string(),
                ChatPaging::FollowCursor { max_pages } => format!("cursor (max {max_pages} pages)"),
            },
            window_days: self.pagination.window.num_days(),
            overfetch_factor: self.pagination.overfetch_factor,
            early_stop_min_messages: self.pagination.early_stop_min_messages,
            early_stop_after_windows: self.pagination.early_stop_after_windows,
            max_windows: self.pagination.max_windows,
            data_dir: self.data_dir.display().to_string(),
            secrets_path: self.secrets_path.display().to_string(),
            state_path: self.state_path.display().to_string(),
            cohere_configured: self.cohere_api_key.is_some(),
            cohere_model: self.cohere_model.clone(),
            summary_cache_size: self.summary_cache_size,
        }
    }
}

/// Printable view of the configuration, without secrets.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub transport_mode: String,
    pub candidates: Vec<String>,
    pub request_timeout_secs: u64,
    pub chat_paging: String,
    pub window_days: i64,
    pub overfetch_factor: u32,
    pub early_stop_min_messages: usize,
    pub early_stop_after_windows: usize,
    pub max_windows: usize,
    pub data_dir: String,
    pub secrets_path: String,
    pub state_path: String,
    pub cohere_configured: bool,
    pub cohere_model: String,
    pub summary_cache_size: usize,
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = value else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(parsed) if parsed > T::default() => parsed,
        _ => {
            warn!(key, value = %raw, "ignoring invalid numeric setting");
            default
        }
    }
}

fn normalize_base_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
            Some(trimmed.to_string())
        }
        _ => {
            if !trimmed.is_empty() {
                warn!(url = trimmed, "ignoring invalid base url");
            }
            None
        }
    }
}

fn default_data_dir(home: Option<String>) -> PathBuf {
    home.map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("beeper-assist")
}
