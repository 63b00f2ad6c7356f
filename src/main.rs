use std::io::Write as _;
use std::sync::{Arc, Mutex};

use color_eyre::eyre::{eyre, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use ragchat::adapters::ReqwestHttpClient;
use ragchat::api::ApiClient;
use ragchat::config::ClientConfig;
use ragchat::controller::{ChatController, SessionCallbacks};
use ragchat::models::{MessageId, QueryMode, Sender};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = "\
commands:
  :history        list stored conversations
  :load <n>       load conversation <n> from the listing
  :delete <n>     delete conversation <n> from the listing
  :mode <m>       set retrieval mode (docs | nodocs)
  :new            start a fresh conversation
  :help           show this help
  :quit           exit";

/// Outcome of one exchange, signalled from the session callbacks.
#[derive(Debug, PartialEq)]
enum Outcome {
    Complete,
    Error,
}

fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("ragchat {}", VERSION);
        return Ok(());
    }

    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let base_url = arg_value("--base-url")
        .or_else(|| std::env::var("RAGCHAT_BASE_URL").ok())
        .ok_or_else(|| eyre!("no backend configured: pass --base-url or set RAGCHAT_BASE_URL"))?;
    let api_key = arg_value("--api-key")
        .or_else(|| std::env::var("RAGCHAT_API_KEY").ok())
        .ok_or_else(|| eyre!("no API key configured: pass --api-key or set RAGCHAT_API_KEY"))?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(ClientConfig::new(base_url, api_key)))
}

/// Extract `--flag value` or `--flag=value` from argv.
fn arg_value(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
        if let Some(rest) = arg.strip_prefix(&format!("{}=", flag)) {
            return Some(rest.to_string());
        }
    }
    None
}

fn parse_mode(input: &str) -> Option<QueryMode> {
    match input {
        "docs" | "only_documentation" => Some(QueryMode::OnlyDocumentation),
        "nodocs" | "no_documentation" => Some(QueryMode::NoDocumentation),
        _ => None,
    }
}

async fn run(config: ClientConfig) -> Result<()> {
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<Outcome>();

    // Tracks how much of the streaming message has been printed so each
    // progress snapshot emits only the new suffix.
    let printed: Arc<Mutex<(Option<MessageId>, usize)>> = Arc::new(Mutex::new((None, 0)));

    let callbacks = {
        let printed = Arc::clone(&printed);
        let complete_tx = outcome_tx.clone();
        SessionCallbacks {
            on_progress: Box::new(move |transcript| {
                if let Some(message) = transcript.streaming_message() {
                    let mut printed = printed.lock().unwrap_or_else(|e| e.into_inner());
                    if printed.0 != Some(message.id) {
                        *printed = (Some(message.id), 0);
                    }
                    let content: Vec<char> = message.content.chars().collect();
                    if printed.1 < content.len() {
                        let delta: String = content[printed.1..].iter().collect();
                        print!("{}", delta);
                        let _ = std::io::stdout().flush();
                        printed.1 = content.len();
                    }
                }
            }),
            on_complete: Box::new(move || {
                let _ = complete_tx.send(Outcome::Complete);
            }),
            on_error: Box::new(move |message| {
                eprintln!("\n! {}", message);
                let _ = outcome_tx.send(Outcome::Error);
            }),
        }
    };

    let api = ApiClient::new(config, ReqwestHttpClient::new());
    let mut controller = ChatController::new(api, callbacks);
    let mut mode = QueryMode::default();

    println!("ragchat {} - :help for commands", VERSION);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.split_once(' ').unwrap_or((input, "")) {
            (":quit", _) | (":q", _) => break,
            (":help", _) => println!("{}", HELP),
            (":new", _) => {
                controller.new_conversation();
                println!("started a new conversation");
            }
            (":mode", rest) => match parse_mode(rest.trim()) {
                Some(parsed) => {
                    mode = parsed;
                    println!("mode set to {}", mode);
                }
                None => println!("unknown mode; use docs or nodocs"),
            },
            (":history", _) => match controller.refresh_conversations().await {
                Ok(listing) if listing.is_empty() => println!("no stored conversations"),
                Ok(listing) => {
                    for (index, conversation) in listing.iter().enumerate() {
                        println!("{:>3}. {}", index + 1, conversation.label());
                    }
                }
                Err(err) => eprintln!("! {}", err.user_message()),
            },
            (":load", rest) => match pick_conversation(&controller, rest) {
                Some(id) => match controller.load_conversation(&id).await {
                    Ok(()) => print_transcript(&controller),
                    Err(err) => eprintln!("! {}", err.user_message()),
                },
                None => println!("usage: :load <n>  (run :history first)"),
            },
            (":delete", rest) => match pick_conversation(&controller, rest) {
                Some(id) => match controller.delete_conversation(&id).await {
                    Ok(()) => println!("deleted"),
                    Err(err) => eprintln!("! {}", err.user_message()),
                },
                None => println!("usage: :delete <n>  (run :history first)"),
            },
            _ => {
                // Drop stale outcomes from a superseded exchange.
                while outcome_rx.try_recv().is_ok() {}
                controller.send(input, mode);
                if outcome_rx.recv().await == Some(Outcome::Complete) {
                    println!();
                    print_sources(&controller);
                }
            }
        }
    }

    Ok(())
}

/// Resolve a 1-based listing index to a conversation id.
fn pick_conversation(
    controller: &ChatController<ReqwestHttpClient>,
    rest: &str,
) -> Option<String> {
    let index: usize = rest.trim().parse().ok()?;
    let listing = controller.conversations();
    listing
        .get(index.checked_sub(1)?)
        .map(|c| c.conversation_id.clone())
}

fn print_transcript(controller: &ChatController<ReqwestHttpClient>) {
    for message in controller.transcript().messages() {
        match message.sender {
            Sender::User => println!("> {}", message.content),
            Sender::Bot => println!("{}", message.content),
        }
    }
}

fn print_sources(controller: &ChatController<ReqwestHttpClient>) {
    let transcript = controller.transcript();
    let Some(last_bot) = transcript
        .messages()
        .iter()
        .rev()
        .find(|m| m.sender == Sender::Bot)
    else {
        return;
    };
    for source in &last_bot.sources {
        println!("  [{}] {}", source.title, source.url);
    }
}
