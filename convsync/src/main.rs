//! `convsync`: line-mode conversation client.
//!
//! Connects to a messaging backend, prints the conversation list and the
//! open thread to stdout, and reads commands and messages from stdin.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/convsync/config.toml`).
//!
//! ```bash
//! cargo run --bin convsync -- --base-url https://example.com/api/ --user 3
//!
//! # REST polling instead of the WebSocket push channel
//! CONVSYNC_BASE_URL=https://example.com/api/ CONVSYNC_USER=3 \
//!     cargo run --bin convsync -- --transport polling
//! ```
//!
//! Commands: `/open <id>`, `/close`, `/list`, `/filter [unread] [query]`,
//! `/read-all`, `/retry`, `/quit`. Any other line is sent to the open
//! conversation.

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use convsync::api::ConversationApi;
use convsync::api::http::HttpApi;
use convsync::config::{CliArgs, ClientConfig, SessionConfig, TransportKind};
use convsync::render::format::truncate_preview;
use convsync::render::render_loop;
use convsync::render::text::TextRenderer;
use convsync::sync::state::{ConversationFilter, ThreadPhase};
use convsync::sync::{SyncClient, SyncError};
use convsync::transport::Transport;
use convsync::transport::polling::PollingTransport;
use convsync::transport::push::PushTransport;
use convsync_proto::message::{ConversationId, MessageStatus, UserId};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // CLI args > config file > defaults.
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let session = match config.to_session_config() {
        Ok(Some(session)) => session,
        Ok(None) => {
            eprintln!("error: a base URL and a user id are required (--base-url, --user)");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(base_url = %session.base_url, transport = ?config.transport, "convsync starting");
    let initial = cli.conversation.map(ConversationId::new);

    let result = match build_api(&config, &session) {
        Ok(api) => match config.transport {
            TransportKind::Push => match PushTransport::spawn(&session.push_url, config.reconnect.clone()) {
                Ok(transport) => run_session(transport, api, &session, &config, initial).await,
                Err(e) => Err(format!("cannot start push channel: {e}")),
            },
            TransportKind::Polling => {
                let transport = PollingTransport::new(api.clone(), config.sync.poll_interval);
                run_session(transport, api, &session, &config, initial).await
            }
        },
        Err(e) => Err(e),
    };

    tracing::info!("convsync exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_api(config: &ClientConfig, session: &SessionConfig) -> Result<HttpApi, String> {
    HttpApi::new(&session.base_url, config.request_timeout)
        .map(|api| api.with_page_size(config.page_size))
        .map_err(|e| format!("invalid base URL: {e}"))
}

/// Initialize file-based logging.
///
/// Logs go to a file since stdout carries the conversation. Returns a
/// [`WorkerGuard`] that must be held until shutdown so buffered entries
/// are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("convsync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Wire a client to `transport` and `api` and serve stdin until `/quit`
/// or end of input.
async fn run_session<T, A>(
    transport: T,
    api: A,
    session: &SessionConfig,
    config: &ClientConfig,
    initial: Option<ConversationId>,
) -> Result<(), String>
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    let user_id = UserId::new(session.user_id.clone());
    let (client, events) = SyncClient::new(transport, api, user_id.clone(), config.sync.clone());
    let client = Arc::new(client);

    let renderer = TextRenderer::new(io::stdout(), user_id)
        .with_timestamp_format(config.timestamp_format.clone())
        .with_preview_chars(config.preview_chars);
    let render_task = tokio::spawn(render_loop(Arc::clone(&client), events, renderer));

    let sync_task = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            if let Err(e) = client.run().await {
                tracing::warn!(err = %e, "sync loop ended");
            }
        })
    };

    if let Err(e) = client.load_conversations().await {
        println!("! {e}");
    }
    if let Some(id) = initial {
        report(client.select_conversation(&id).await);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(err = %e, "stdin read failed");
                break;
            }
        };
        if !handle_line(&client, line.trim(), config.preview_chars).await {
            break;
        }
    }

    client.close_conversation().await;
    sync_task.abort();
    render_task.abort();
    Ok(())
}

/// Apply one input line. Returns `false` on `/quit`.
async fn handle_line<T, A>(client: &Arc<SyncClient<T, A>>, line: &str, preview_chars: usize) -> bool
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
    let argument = argument.trim();
    match command {
        "/quit" => return false,
        "/open" if !argument.is_empty() => {
            report(client.select_conversation(&ConversationId::new(argument)).await);
        }
        "/open" => {
            report(client.retry_load().await);
        }
        "/close" => client.close_conversation().await,
        "/read-all" => client.mark_all_read().await,
        "/list" => print_conversations(client, "", ConversationFilter::All, preview_chars),
        "/filter" => {
            let (filter, query) = match argument.strip_prefix("unread") {
                Some(rest) => (ConversationFilter::Unread, rest.trim()),
                None => (ConversationFilter::All, argument),
            };
            print_conversations(client, query, filter, preview_chars);
        }
        "/retry" => {
            let failed = client
                .thread()
                .entries
                .iter()
                .rev()
                .find(|e| e.status == MessageStatus::Failed)
                .and_then(|e| e.token().cloned());
            match failed {
                Some(token) => report(client.retry_message(&token).await.map(|_| ())),
                None => println!("! nothing to retry"),
            }
        }
        _ if line.starts_with('/') => println!("! unknown command {command}"),
        _ => {
            if matches!(client.thread().phase, ThreadPhase::Idle) {
                println!("! open a conversation first (/open <id>)");
            } else {
                report(client.send_message(line).await.map(|_| ()));
            }
        }
    }
    true
}

fn print_conversations<T, A>(
    client: &SyncClient<T, A>,
    query: &str,
    filter: ConversationFilter,
    preview_chars: usize,
) where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "--- {} unread ---", client.total_unread());
    for conversation in client.filter_conversations(query, filter) {
        let preview = conversation
            .last_message_text()
            .map(|text| truncate_preview(text, preview_chars))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {} {} [{}]: {preview}",
            conversation.id, conversation.other_participant.name, conversation.unread_count
        );
    }
}

fn report(result: Result<(), SyncError>) {
    if let Err(e) = result {
        println!("! {e}");
    }
}
