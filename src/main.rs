//! Hult chat - terminal front-end
//!
//! Reads lines from stdin. Lines starting with `/` are commands; anything
//! else is sent as a chat turn and the response is printed as it streams.

use futures::FutureExt;
use hult_chat::llm::{
    all_models, find_model, ClientEvent, CompletionClient, CompletionError, LlmConfig,
    LoggingBackend, OpenAIBackend, DEFAULT_MODEL,
};
use hult_chat::ChatSession;
use std::future::Future;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = LlmConfig::from_env()?;
    let backend = OpenAIBackend::new(
        config.require_api_key()?,
        config.base_url.as_str(),
        config.request_timeout,
    )?;
    tracing::info!(
        base_url = %config.base_url,
        timeout_secs = config.request_timeout.as_secs(),
        "Completion backend configured"
    );

    let model = config
        .default_model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let backend = backend.with_stream_idle_timeout(config.stream_idle_timeout);
    let mut session = ChatSession::new(CompletionClient::new(LoggingBackend::new(backend)), model);
    let mut notices = BroadcastStream::new(session.subscribe());

    println!("Hult GPT v1.3 - model {}", session.selected_model());
    println!("Type a message, or /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => print_help(),
            Command::Models => {
                let selected = session.selected_model();
                for model in all_models() {
                    let marker = if model.id == selected { '*' } else { ' ' };
                    println!("{marker} {:<14} {}", model.id, model.description);
                }
            }
            Command::Model(id) => match find_model(id) {
                Some(model) => {
                    session.set_model(model.id);
                    println!("Model set to {}", model.id);
                }
                None => println!("Unknown model `{id}`. Use /models to list the available ones."),
            },
            Command::Health => match session.health_check().await {
                Ok(()) => println!("API connection successful"),
                Err(e) => println!("API Error: {e}"),
            },
            Command::History => {
                for message in session.transcript() {
                    println!("[{}] {}", message.role.as_str(), message.content);
                }
            }
            Command::Unknown(name) => println!("Unknown command `{name}`. Type /help for commands."),
            Command::Chat(text) => {
                let turn = session.send(text, |fragment| {
                    print!("{fragment}");
                    let _ = std::io::stdout().flush();
                });
                let result = with_notices(turn, &mut notices, |notice| println!("{notice}")).await;

                match result {
                    Ok(_) => println!(),
                    // Rendered from the event channel
                    Err(CompletionError::Exhausted { .. }) => {}
                    Err(CompletionError::StreamInterrupted(e)) => {
                        println!();
                        println!("Response interrupted: {e}. Nothing was saved; please send again.");
                    }
                }
            }
        }
    }

    Ok(())
}

fn init_logging() {
    // Logs go to stderr so they never interleave with streamed text
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hult_chat=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("HULT_LOG_JSON").is_ok_and(|v| v == "1") {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Drive `turn` to completion, rendering client notices as they arrive.
///
/// Every notice emitted during the turn is rendered before this returns, so
/// none can land after the next prompt.
async fn with_notices<T>(
    turn: impl Future<Output = T>,
    notices: &mut BroadcastStream<ClientEvent>,
    mut render: impl FnMut(String),
) -> T {
    let mut on_event = |event: Result<ClientEvent, BroadcastStreamRecvError>| match event {
        Ok(event) => render(event.notice()),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Client events dropped");
        }
    };

    tokio::pin!(turn);
    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            Some(event) = notices.next() => on_event(event),
        }
    };
    // The exhaustion notice is queued before the turn resolves
    while let Some(Some(event)) = notices.next().now_or_never() {
        on_event(event);
    }
    result
}

fn print_help() {
    println!("/models        list selectable models");
    println!("/model <id>    switch model for the next message");
    println!("/health        check the API connection");
    println!("/history       print the conversation so far");
    println!("/quit          exit");
}

/// One line of input
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Empty,
    Quit,
    Help,
    Models,
    Model(&'a str),
    Health,
    History,
    Unknown(&'a str),
    Chat(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Command::Chat(line.trim_end_matches(['\r', '\n']));
        };

        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));

        match name {
            "quit" | "exit" => Command::Quit,
            "help" => Command::Help,
            "models" => Command::Models,
            "model" if !arg.is_empty() => Command::Model(arg),
            "health" => Command::Health,
            "history" => Command::History,
            _ => Command::Unknown(trimmed),
        }
    }
}
