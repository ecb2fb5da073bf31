use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use client::config::{
    ClientConfig, ConnectionSettings, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_RETRIES, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_SERVER_URL,
};
use client::{ChatClient, ComposeError, ConnectionManager, ConnectionState, DisplayMessage, Outbound, WsConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum ChatError {
    #[error("terminal i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "chat", about = "Terminal client for the realtime chat server")]
struct Cli {
    #[arg(long, env = "CHAT_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    url: String,

    #[arg(long, env = "CHAT_IDENTITY")]
    identity: Option<String>,

    #[arg(long, env = "CHAT_CONNECT_TIMEOUT_MS", default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    connect_timeout_ms: u64,

    #[arg(long, env = "CHAT_RECONNECT_DELAY_MS", default_value_t = DEFAULT_RECONNECT_DELAY_MS)]
    reconnect_delay_ms: u64,

    #[arg(long, env = "CHAT_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
}

impl Cli {
    fn into_config(self) -> ClientConfig {
        let connection =
            ConnectionSettings::from_millis(self.connect_timeout_ms, self.reconnect_delay_ms, self.max_retries);
        ClientConfig::new(self.url).with_identity(self.identity).with_connection(connection)
    }
}

/// One parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Name(&'a str),
    Quit,
    Say(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed == "/quit" {
        return Input::Quit;
    }
    match trimmed.strip_prefix("/name") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => Input::Name(rest),
        _ => Input::Say(line),
    }
}

fn render(message: &DisplayMessage) -> String {
    let marker = if message.is_self { " (you)" } else { "" };
    format!("[{}] {}{}: {}", message.display_time, message.envelope.author_id, marker, message.envelope.text)
}

/// Write every history entry newer than `last_shown`.
fn print_new<O: Outbound>(chat: &ChatClient<O>, last_shown: &mut u64, out: &mut impl Write) -> io::Result<()> {
    let shown = *last_shown;
    for message in chat.messages().filter(|m| m.local_id > shown) {
        writeln!(out, "{}", render(message))?;
        *last_shown = message.local_id;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let config = Cli::parse().into_config();
    let connector = Arc::new(WsConnector::new(config.url.clone()));
    info!(url = %connector.url(), "chat: connecting");

    let (manager, mut inbound) = ConnectionManager::spawn(connector, config.connection);
    let mut state_rx = manager.subscribe();
    let mut chat = ChatClient::new(manager);
    if let Some(identity) = config.identity.as_deref() {
        let _ = chat.set_identity(identity);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();
    let mut last_shown = 0;
    println!("-- {}", ConnectionState::Connecting);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Name(raw) => {
                        if chat.set_identity(raw).is_ok() && !raw.trim().is_empty() {
                            println!("-- you are {}", chat.identity().unwrap_or_default());
                        }
                    }
                    Input::Say(raw) => match chat.submit(raw) {
                        Ok(()) | Err(ComposeError::Empty) => {}
                        Err(e) => info!(error = %e, "chat: message not sent"),
                    },
                }
            }
            Some(envelope) = inbound.recv() => {
                chat.receive(envelope);
            }
            Ok(()) = state_rx.changed() => {
                let state = *state_rx.borrow_and_update();
                println!("-- {state}");
            }
        }
        print_new(&chat, &mut last_shown, &mut stdout)?;
    }

    chat.outbound_mut().shutdown().await;
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
