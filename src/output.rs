use serde::Serialize;
use thiserror::Error;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::ConfigSummary;
use crate::models::{Account, Chat, Message, SendResult};
use crate::query::{JsonQueryOptions, apply_json_transforms};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid query: {0}")]
    Query(String),
}

#[derive(Clone, Copy, Debug, Default)]
pub enum JsonFormat {
    #[default]
    Pretty,
    Compact,
}

/// How JSON output is rendered: formatting plus optional `--query-path`/`--field` transforms.
#[derive(Clone, Debug, Default)]
pub struct JsonOutput {
    pub format: JsonFormat,
    pub query: JsonQueryOptions,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountListOutput {
    pub items: Vec<AccountSummary>,
    pub default_account_id: Option<String>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    #[serde(flatten)]
    pub account: Account,
    pub display_name: String,
    pub is_default: bool,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListOutput {
    pub items: Vec<ChatListItem>,
    pub account_id: Option<String>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListItem {
    #[serde(flatten)]
    pub chat: Chat,
    pub display_name: String,
    pub last_message_line: Option<String>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListOutput {
    pub chat_id: String,
    pub items: Vec<MessageSummary>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    #[serde(flatten)]
    pub message: Message,
    pub sender_name: String,
    pub preview: String,
    pub relative_date: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryOutput {
    pub chat_id: String,
    pub message_count: u32,
    pub summary: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorOutput {
    pub version: String,
    pub token_present: bool,
    pub default_account_id: Option<String>,
    pub config: ConfigSummary,
}

impl MessageSummary {
    pub fn new(message: Message, now_millis: i64) -> Self {
        let relative_date = message
            .timestamp_millis()
            .map(|ts| crate::dates::format_relative_millis(ts, now_millis))
            .unwrap_or_else(|| "-".to_string());
        let preview = message
            .text
            .as_deref()
            .map(single_line)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "<no text>".to_string());
        Self {
            sender_name: message.sender_name().to_string(),
            message,
            preview,
            relative_date,
        }
    }
}

impl ChatListItem {
    pub fn new(chat: Chat) -> Self {
        Self {
            display_name: chat.display_name().to_string(),
            last_message_line: chat.last_message_preview().map(single_line),
            chat,
        }
    }
}

pub fn json_string<T: Serialize + ?Sized>(value: &T, output: &JsonOutput) -> Result<String, OutputError> {
    let mut value = serde_json::to_value(value)?;
    if output.query.has_transforms() {
        value = apply_json_transforms(value, &output.query).map_err(OutputError::Query)?;
    }
    let payload = match output.format {
        JsonFormat::Pretty => serde_json::to_string_pretty(&value)?,
        JsonFormat::Compact => serde_json::to_string(&value)?,
    };
    Ok(payload)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T, output: &JsonOutput) -> Result<(), OutputError> {
    let payload = json_string(value, output)?;
    println!("{payload}");
    Ok(())
}

pub fn print_accounts(
    output: &AccountListOutput,
    json: bool,
    json_output: &JsonOutput,
) -> Result<(), OutputError> {
    if json {
        return print_json(output, json_output);
    }

    let mut id_width = display_width("account");
    let mut network_width = display_width("network");
    let mut name_width = display_width("name");
    for item in &output.items {
        id_width = id_width.max(display_width(&item.account.account_id));
        network_width = network_width.max(display_width(&item.account.network));
        name_width = name_width.max(display_width(&item.display_name));
    }
    id_width = id_width.min(32);
    network_width = network_width.min(16);
    name_width = name_width.min(28);

    println!(
        "  {}  {}  {}",
        pad_right("account", id_width),
        pad_right("network", network_width),
        pad_right("name", name_width),
    );
    for item in &output.items {
        println!(
            "{} {}  {}  {}",
            if item.is_default { "*" } else { " " },
            pad_right(&truncate_display(&item.account.account_id, id_width), id_width),
            pad_right(&truncate_display(&item.account.network, network_width), network_width),
            pad_right(&truncate_display(&item.display_name, name_width), name_width),
        );
    }
    Ok(())
}

pub fn print_chat_list(
    output: &ChatListOutput,
    json: bool,
    json_output: &JsonOutput,
) -> Result<(), OutputError> {
    if json {
        return print_json(output, json_output);
    }

    let mut id_width = display_width("id");
    let mut name_width = display_width("name");
    let mut account_width = display_width("account");
    let mut last_width = display_width("last message");
    for item in &output.items {
        id_width = id_width.max(display_width(&item.chat.id));
        name_width = name_width.max(display_width(&item.display_name));
        account_width = account_width.max(display_width(&item.chat.account_id));
        if let Some(line) = &item.last_message_line {
            last_width = last_width.max(display_width(line));
        }
    }
    id_width = id_width.min(24);
    name_width = name_width.min(28);
    account_width = account_width.min(18);
    last_width = last_width.min(60);

    println!(
        "{}  {}  {}  {}  {}",
        pad_right("id", id_width),
        pad_right("name", name_width),
        pad_right("account", account_width),
        pad_right("type", 6),
        pad_right("last message", last_width),
    );

    for item in &output.items {
        let preview = item
            .last_message_line
            .as_deref()
            .unwrap_or("<no messages>");
        println!(
            "{}  {}  {}  {}  {}",
            pad_right(&truncate_display(&item.chat.id, id_width), id_width),
            pad_right(&truncate_display(&item.display_name, name_width), name_width),
            pad_right(&truncate_display(&item.chat.account_id, account_width), account_width),
            pad_right(&truncate_display(&item.chat.chat_type, 6), 6),
            pad_right(&truncate_display(preview, last_width), last_width),
        );
    }
    Ok(())
}

pub fn print_messages(
    output: &MessageListOutput,
    json: bool,
    json_output: &JsonOutput,
) -> Result<(), OutputError> {
    if json {
        return print_json(output, json_output);
    }

    println!("Messages for {} ({})", output.chat_id, output.items.len());

    let mut from_width = display_width("from");
    let mut when_width = display_width("when");
    for item in &output.items {
        from_width = from_width.max(display_width(&item.sender_name));
        when_width = when_width.max(display_width(&item.relative_date));
    }
    from_width = from_width.min(18);
    when_width = when_width.min(10);

    println!(
        "{}  {}  {}",
        pad_right("when", when_width),
        pad_right("from", from_width),
        pad_right("text", 72),
    );
    for item in &output.items {
        println!(
            "{}  {}  {}",
            pad_right(&item.relative_date, when_width),
            pad_right(&truncate_display(&item.sender_name, from_width), from_width),
            pad_right(&truncate_display(&item.preview, 72), 72),
        );
    }
    Ok(())
}

pub fn print_send_result(
    result: &SendResult,
    json: bool,
    json_output: &JsonOutput,
) -> Result<(), OutputError> {
    if json {
        return print_json(result, json_output);
    }

    match (&result.message_id, &result.pending_message_id) {
        (Some(id), _) => println!("Sent message {id}"),
        (None, Some(pending)) => println!("Queued message (pending id {pending})"),
        (None, None) => println!("Message submitted; the service returned no message id"),
    }
    if let Some(error) = result.error.as_deref().filter(|error| !error.is_empty()) {
        println!("Service reported: {error}");
    }
    Ok(())
}

pub fn print_summary(
    output: &SummaryOutput,
    json: bool,
    json_output: &JsonOutput,
) -> Result<(), OutputError> {
    if json {
        return print_json(output, json_output);
    }
    println!(
        "Summary of the last {} messages in {}:\n",
        output.message_count, output.chat_id
    );
    println!("{}", output.summary);
    Ok(())
}

pub fn print_doctor(
    output: &DoctorOutput,
    json: bool,
    json_output: &JsonOutput,
) -> Result<(), OutputError> {
    if json {
        return print_json(output, json_output);
    }

    let config = &output.config;
    let rows = [
        ("version", output.version.clone()),
        ("transport", config.transport_mode.clone()),
        ("candidates", config.candidates.join(", ")),
        ("timeout", format!("{}s", config.request_timeout_secs)),
        ("chat paging", config.chat_paging.clone()),
        (
            "history windows",
            format!(
                "{} days, up to {} windows",
                config.window_days, config.max_windows
            ),
        ),
        ("token", if output.token_present { "present" } else { "missing" }.to_string()),
        (
            "default account",
            output.default_account_id.clone().unwrap_or_else(|| "-".to_string()),
        ),
        ("data dir", config.data_dir.clone()),
        (
            "summaries",
            if config.cohere_configured {
                format!("{} (cache {})", config.cohere_model, config.summary_cache_size)
            } else {
                "disabled (COHERE_API_KEY not set)".to_string()
            },
        ),
    ];
    let label_width = rows.iter().map(|(label, _)| display_width(label)).max().unwrap_or(0);
    for (label, value) in rows {
        println!("{}  {}", pad_right(label, label_width), value);
    }
    Ok(())
}

fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn display_width(value: &str) -> usize {
    UnicodeWidthStr::width(value)
}

fn truncate_display(value: &str, max_width: usize) -> String {
    if display_width(value) <= max_width {
        return value.to_string();
    }
    let ellipsis = "...";
    let mut width = 0usize;
    let mut output = String::new();
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + ellipsis.len() > max_width {
            break;
        }
        output.push(ch);
        width += ch_width;
    }
    output.push_str(ellipsis);
    output
}

fn pad_right(value: &str, width: usize) -> String {
    let mut output = value.to_string();
    let current = display_width(value);
    if current < width {
        output.push_str(&" ".repeat(width - current));
    }
    output
}
