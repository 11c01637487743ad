use clap::{ArgAction, Args, Parser, Subcommand};
use dialoguer::Password;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use beeper_assist::api::{ApiError, BeeperClient};
use beeper_assist::auth::{AuthStore, TOKEN_ENV_VAR};
use beeper_assist::config::Config;
use beeper_assist::dates;
use beeper_assist::generate::CohereGenerator;
use beeper_assist::models::{ChatSearchOptions, MessageSearchOptions, SendMessageInput};
use beeper_assist::output::{
    self, AccountListOutput, AccountSummary, ChatListItem, ChatListOutput, DoctorOutput, JsonFormat,
    JsonOutput, MessageListOutput, MessageSummary, SummaryOutput,
};
use beeper_assist::query::JsonQueryOptions;
use beeper_assist::state::LocalDb;
use beeper_assist::summary::{SummaryCache, SummaryError, Summarizer};

const DEFAULT_MESSAGE_LIMIT: u32 = 50;
const DEFAULT_SUMMARY_COUNT: u32 = 50;

#[derive(Parser)]
#[command(
    name = "beeper-assist",
    version,
    about = "Read, search and send Beeper messages from the terminal",
    after_help = "Examples:\n  beeper-assist auth login\n  beeper-assist accounts list\n  beeper-assist chats list --unread-only\n  beeper-assist messages list --chat-id '!abc:beeper.local' --after '2w ago'\n  beeper-assist messages send --chat-id '!abc:beeper.local' --text \"on my way\"\n  beeper-assist summarize --chat-id '!abc:beeper.local' --count 100\n  beeper-assist chats list --json --query-path 'it[].ti'"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, help = "Output JSON instead of a table")]
    json: bool,

    #[arg(long, global = true, help = "Print JSON on a single line")]
    compact: bool,

    #[arg(
        long = "query-path",
        global = true,
        value_name = "PATH",
        action = ArgAction::Append,
        help = "Select a value from the JSON output (repeatable, implies --json)"
    )]
    query_paths: Vec<String>,

    #[arg(
        long = "field",
        global = true,
        value_name = "PATH",
        action = ArgAction::Append,
        help = "Keep only these fields of each item (repeatable, implies --json)"
    )]
    fields: Vec<String>,

    #[arg(long, global = true, value_name = "SECS", help = "Abort the command after this many seconds")]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Store or clear the desktop API token")]
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    #[command(about = "List connected accounts")]
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },
    #[command(about = "List chats")]
    Chats {
        #[command(subcommand)]
        command: ChatsCommand,
    },
    #[command(about = "Read and send messages")]
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },
    #[command(
        about = "Summarize the latest messages of a chat",
        long_about = "Summarize the latest messages of a chat.\n\nEach run generates a fresh summary; the summary cache only applies to long-lived library callers that reuse one Summarizer."
    )]
    Summarize(SummarizeArgs),
    #[command(about = "Show the effective configuration without contacting the service")]
    Doctor,
}

#[derive(Subcommand)]
enum AuthCommand {
    #[command(about = "Save an access token (prompts when --token is omitted)")]
    Login(AuthLoginArgs),
    #[command(about = "Clear the saved token")]
    Logout,
}

#[derive(Args)]
struct AuthLoginArgs {
    #[arg(long, help = "Access token from Beeper Desktop settings")]
    token: Option<String>,
}

#[derive(Subcommand)]
enum AccountsCommand {
    #[command(about = "List accounts connected to Beeper")]
    List,
    #[command(about = "Remember an account as the default for chat listings")]
    Use(AccountsUseArgs),
}

#[derive(Args)]
struct AccountsUseArgs {
    #[arg(value_name = "ACCOUNT_ID", help = "Account id, or \"none\" to clear")]
    account_id: String,
}

#[derive(Subcommand)]
enum ChatsCommand {
    #[command(about = "List chats, optionally for one account")]
    List(ChatsListArgs),
}

#[derive(Args)]
struct ChatsListArgs {
    #[arg(long, help = "Only chats of this account (defaults to `accounts use`)")]
    account_id: Option<String>,

    #[arg(long, help = "Search chat titles and participants")]
    query: Option<String>,

    #[arg(long, help = "Maximum number of chats to request")]
    limit: Option<u32>,

    #[arg(long, help = "Only chats with unread messages")]
    unread_only: bool,
}

#[derive(Subcommand)]
enum MessagesCommand {
    #[command(about = "List messages of a chat, newest first")]
    List(MessagesListArgs),
    #[command(about = "Send a message to a chat")]
    Send(MessagesSendArgs),
}

#[derive(Args)]
struct MessagesListArgs {
    #[arg(long, help = "Chat id")]
    chat_id: String,

    #[arg(long, help = "Maximum number of messages per request")]
    limit: Option<u32>,

    #[arg(long, help = "Fetch a single page instead of walking the whole history")]
    page: bool,

    #[arg(long, value_name = "EXPR", help = "Only messages after this time (e.g. \"2w ago\", 2024-01-15)")]
    after: Option<String>,

    #[arg(long, value_name = "EXPR", help = "Only messages before this time")]
    before: Option<String>,

    #[arg(long, help = "Search message text")]
    query: Option<String>,
}

#[derive(Args)]
struct MessagesSendArgs {
    #[arg(long, help = "Chat id")]
    chat_id: String,

    #[arg(long, help = "Message text")]
    text: Option<String>,

    #[arg(long, help = "Read message text from stdin")]
    stdin: bool,

    #[arg(long, value_name = "MESSAGE_ID", help = "Reply to this message")]
    reply_to: Option<String>,
}

#[derive(Args)]
struct SummarizeArgs {
    #[arg(long, help = "Chat id")]
    chat_id: String,

    #[arg(long, help = "Number of recent messages to summarize")]
    count: Option<u32>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let timeout = cli.timeout.filter(|secs| *secs > 0).map(Duration::from_secs);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run(cli)).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {}s", limit.as_secs()).into()),
        },
        None => run(cli).await,
    };

    if let Err(error) = result {
        report_error(error.as_ref());
        std::process::exit(1);
    }
}

fn report_error(error: &(dyn std::error::Error + 'static)) {
    let api_error = error.downcast_ref::<ApiError>().or_else(|| {
        match error.downcast_ref::<SummaryError>() {
            Some(SummaryError::Api(inner)) => Some(inner),
            _ => None,
        }
    });
    match api_error {
        Some(ApiError::ServiceUnreachable { last_error }) => {
            eprintln!("Could not reach the Beeper desktop API.");
            eprintln!("Last attempt: {last_error}");
            eprintln!("Hint: {}", beeper_assist::api::SERVICE_HINT);
        }
        Some(ApiError::AuthenticationRejected { .. }) => {
            eprintln!("{error}");
            eprintln!("Run `beeper-assist auth login` with a fresh token or update {TOKEN_ENV_VAR}.");
        }
        _ => eprintln!("{error}"),
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let endpoint_key = config.endpoint_key();
    let auth_store = AuthStore::new(config.secrets_path.clone(), endpoint_key.clone())
        .with_env_token(std::env::var(TOKEN_ENV_VAR).ok());
    let local_db = LocalDb::new(config.state_path.clone(), endpoint_key);

    let json_output = JsonOutput {
        format: if cli.compact {
            JsonFormat::Compact
        } else {
            JsonFormat::Pretty
        },
        query: JsonQueryOptions {
            query_paths: cli.query_paths,
            fields: cli.fields,
        },
    };
    let json = cli.json || json_output.query.has_transforms();

    match cli.command {
        Command::Auth { command } => match command {
            AuthCommand::Login(args) => handle_login(args, &auth_store)?,
            AuthCommand::Logout => {
                auth_store.clear_token()?;
                println!("Logged out.");
            }
        },
        Command::Accounts { command } => {
            let client = BeeperClient::from_config(&config)?;
            match command {
                AccountsCommand::List => {
                    let token = require_token(&auth_store)?;
                    let default_account_id = local_db.load()?.default_account_id;
                    let accounts = client.fetch_accounts(&token).await?;
                    let output = AccountListOutput {
                        items: accounts
                            .into_iter()
                            .map(|account| AccountSummary {
                                display_name: account.display_name(),
                                is_default: default_account_id.as_deref()
                                    == Some(account.account_id.as_str()),
                                account,
                            })
                            .collect(),
                        default_account_id,
                    };
                    output::print_accounts(&output, json, &json_output)?;
                }
                AccountsCommand::Use(args) => {
                    let account_id = args.account_id.trim();
                    if account_id.is_empty() || account_id.eq_ignore_ascii_case("none") {
                        local_db.set_default_account(None)?;
                        println!("Cleared the default account.");
                    } else {
                        let token = require_token(&auth_store)?;
                        let accounts = client.fetch_accounts(&token).await?;
                        if !accounts.iter().any(|account| account.account_id == account_id) {
                            return Err(format!(
                                "Unknown account {account_id:?}. Run `beeper-assist accounts list`."
                            )
                            .into());
                        }
                        local_db.set_default_account(Some(account_id.to_string()))?;
                        println!("Default account set to {account_id}.");
                    }
                }
            }
        }
        Command::Chats { command } => match command {
            ChatsCommand::List(args) => {
                let client = BeeperClient::from_config(&config)?;
                let token = require_token(&auth_store)?;
                let account_id = match args.account_id {
                    Some(account_id) => Some(account_id),
                    None => local_db.load()?.default_account_id,
                };
                let options = ChatSearchOptions {
                    query: args.query,
                    limit: args.limit,
                    unread_only: args.unread_only.then_some(true),
                    ..Default::default()
                };
                let chats = match account_id.as_deref() {
                    Some(account_id) => client.fetch_chats(account_id, &token, &options).await?,
                    None => client.fetch_all_chats(&token, &options).await?,
                };
                let output = ChatListOutput {
                    items: chats.into_iter().map(ChatListItem::new).collect(),
                    account_id,
                };
                output::print_chat_list(&output, json, &json_output)?;
            }
        },
        Command::Messages { command } => match command {
            MessagesCommand::List(args) => {
                let client = BeeperClient::from_config(&config)?;
                let token = require_token(&auth_store)?;
                let now = chrono::Utc::now();
                let options = MessageSearchOptions {
                    query: args.query,
                    date_after: args
                        .after
                        .as_deref()
                        .map(|expr| dates::parse_time_expression(expr, now))
                        .transpose()
                        .map_err(|error| format!("--after: {error}"))?
                        .map(dates::format_query_date),
                    date_before: args
                        .before
                        .as_deref()
                        .map(|expr| dates::parse_time_expression(expr, now))
                        .transpose()
                        .map_err(|error| format!("--before: {error}"))?
                        .map(dates::format_query_date),
                    ..Default::default()
                };
                let messages = client
                    .fetch_messages(
                        &args.chat_id,
                        args.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT),
                        &token,
                        &options,
                        !args.page,
                    )
                    .await?;
                let now_millis = now.timestamp_millis();
                let output = MessageListOutput {
                    chat_id: args.chat_id.trim().to_string(),
                    items: messages
                        .into_iter()
                        .map(|message| MessageSummary::new(message, now_millis))
                        .collect(),
                };
                output::print_messages(&output, json, &json_output)?;
            }
            MessagesCommand::Send(args) => {
                let client = BeeperClient::from_config(&config)?;
                let text = resolve_message_text(args.text, args.stdin)?;
                let token = auth_store.load_token()?.unwrap_or_default();
                let input = SendMessageInput {
                    chat_id: args.chat_id,
                    text,
                    reply_to_message_id: args.reply_to,
                };
                let result = client.send_message(&input, &token).await?;
                output::print_send_result(&result, json, &json_output)?;
            }
        },
        Command::Summarize(args) => {
            let client = BeeperClient::from_config(&config)?;
            let token = require_token(&auth_store)?;
            let generator = CohereGenerator::from_config(&config)?;
            let summarizer = Summarizer::new(
                client,
                Arc::new(generator),
                SummaryCache::new(config.summary_cache_size),
            );
            let message_count = args.count.unwrap_or(DEFAULT_SUMMARY_COUNT);
            let summary = summarizer
                .summarize_chat(&args.chat_id, message_count, &token)
                .await?;
            let output = SummaryOutput {
                chat_id: args.chat_id.trim().to_string(),
                message_count,
                summary,
            };
            output::print_summary(&output, json, &json_output)?;
        }
        Command::Doctor => {
            let output = DoctorOutput {
                version: env!("CARGO_PKG_VERSION").to_string(),
                token_present: auth_store.load_token()?.is_some(),
                default_account_id: local_db.load()?.default_account_id,
                config: config.summary(),
            };
            output::print_doctor(&output, json, &json_output)?;
        }
    }

    Ok(())
}

fn handle_login(args: AuthLoginArgs, auth_store: &AuthStore) -> Result<(), Box<dyn std::error::Error>> {
    let token = match args.token {
        Some(token) => token,
        None => prompt_token()?,
    };
    let token = token.trim();
    if token.is_empty() {
        return Err("token is empty".into());
    }
    auth_store.store_token(token)?;
    println!("Token saved.");
    Ok(())
}

fn prompt_token() -> Result<String, Box<dyn std::error::Error>> {
    use std::io::IsTerminal;
    if !std::io::stdin().is_terminal() {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        return Ok(line);
    }
    let token = Password::new().with_prompt("Access token").interact()?;
    Ok(token)
}

fn require_token(auth_store: &AuthStore) -> Result<String, Box<dyn std::error::Error>> {
    match auth_store.load_token()? {
        Some(token) => Ok(token),
        None => Err(ApiError::AuthenticationRequired.into()),
    }
}

fn resolve_message_text(text: Option<String>, stdin: bool) -> Result<String, Box<dyn std::error::Error>> {
    if stdin {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        let trimmed = buffer.trim();
        if trimmed.is_empty() {
            return Err("stdin was empty".into());
        }
        return Ok(trimmed.to_string());
    }

    match text {
        Some(text) => Ok(text),
        None => Err("Provide --text or --stdin".into()),
    }
}
