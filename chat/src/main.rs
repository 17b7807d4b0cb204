use std::io::Write as _;
use std::sync::Arc;

use chat::config::idle_timeout;
use chat::{AgentClient, ClientConfig, ClientError, Conversation, SessionCoordinator, StreamHandlers, TurnReport};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use wire::{DisplayMessage, Payload};

#[derive(Parser, Debug)]
#[command(name = "chat", about = "Interactive chat with an agent through the relay")]
struct Cli {
    /// Base URL of the relay's agent routes. Overrides `CHAT_RELAY_URL`.
    #[arg(long)]
    relay_url: Option<String>,

    /// Overrides `CHAT_ASSISTANT_ID`.
    #[arg(long)]
    assistant_id: Option<String>,

    /// Overrides `CHAT_INSTANCE_ENDPOINT`.
    #[arg(long)]
    instance_endpoint: Option<String>,

    /// Seconds of silence tolerated while reading a reply; 0 waits forever.
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Environment config with command-line flags applied on top.
    fn config(&self) -> Result<ClientConfig, ClientError> {
        let mut config = ClientConfig::from_env()?;
        if let Some(url) = &self.relay_url {
            url.trim_end_matches('/').clone_into(&mut config.relay_url);
        }
        if self.assistant_id.is_some() {
            config.assistant_id.clone_from(&self.assistant_id);
        }
        if let Some(endpoint) = &self.instance_endpoint {
            config.instance_endpoint.clone_from(endpoint);
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.idle_timeout = idle_timeout(secs);
        }
        Ok(config)
    }
}

/// Writes deltas straight to stdout.
#[derive(Default)]
struct Printer {
    printed: bool,
}

impl StreamHandlers for Printer {
    fn on_delta(&mut self, delta: &str, _full_text: &str, _payload: &Payload) {
        if !self.printed {
            print!("agent> ");
        }
        self.printed = true;
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let client = Arc::new(AgentClient::new(cli.config()?)?);
    let coordinator = SessionCoordinator::new(Arc::clone(&client));
    let opened = coordinator.initialize().await?;
    eprintln!("session {} ready; /quit to exit, Ctrl-C cancels a reply", opened.session.id);
    for message in &opened.greeting {
        print_message(message);
    }

    let conversation = Conversation::new(client, opened);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut active: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.map_err(|e| ClientError::Transport { status: None, message: e.to_string() })? else {
                    break;
                };
                if line.trim() == "/quit" {
                    break;
                }
                if line.trim().is_empty() {
                    continue;
                }
                let conversation = conversation.clone();
                active = Some(tokio::spawn(async move {
                    let mut printer = Printer::default();
                    if let Some(report) = conversation.submit(&line, None, &mut printer).await {
                        print_report(&report, printer.printed);
                    }
                }));
            }
            _ = tokio::signal::ctrl_c() => {
                if !conversation.cancel_active() {
                    break;
                }
                eprintln!("\n(cancelled)");
            }
        }
    }

    conversation.cancel_active();
    if let Some(task) = active {
        let _ = task.await;
    }
    Ok(())
}

fn print_message(message: &DisplayMessage) {
    println!("{}> {}", message.role.as_str(), message.text);
}

fn print_report(report: &TurnReport, streamed_to_stdout: bool) {
    if streamed_to_stdout {
        println!();
    } else if !report.text.is_empty() {
        println!("agent> {}", report.text);
    }
    for message in &report.extra {
        print_message(message);
    }
    if let Some(notice) = &report.notice {
        eprintln!("note: {notice}");
    }
}
