//! Banter CLI - interactive chat with a conversational backend.
//!
//! This is the binary entry point. See the `banter` library for the
//! client core.

use std::io::{BufRead, Write};

use anyhow::Result;
use banter::{Client, ClientEvent, Config, ConnectionState, Role};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

// CLI
#[derive(Parser)]
#[command(name = "banter")]
#[command(version)]
#[command(about = "Realtime chat session client with incremental typing reveal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive chat session
    Chat {
        /// Backend server URL (overrides the config file)
        #[arg(long)]
        server: Option<String>,
        /// Re-open an existing session id instead of creating a new one
        #[arg(long)]
        session: Option<String>,
        /// Show replies at once instead of revealing them
        #[arg(long)]
        plain: bool,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    // Log to a file when requested so reveal output on stdout stays clean
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().filter_or("BANTER_LOG", "info"));
    if let Ok(path) = std::env::var("BANTER_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .map_err(|e| anyhow::anyhow!("failed to create log file at {path}: {e}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            server,
            session,
            plain,
        } => {
            let mut config = Config::load()?;
            if let Some(server) = server {
                config.server_url = server;
            }
            if plain {
                config.typing_reveal = false;
            }

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_chat(config, session))?;
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Interactive loop: stdin lines become user messages, client events drive
/// the terminal rendering. Exits on stdin EOF or `/quit`.
async fn run_chat(config: Config, session: Option<String>) -> Result<()> {
    let (client, mut events) = Client::new(config);

    let session_id = match session {
        Some(id) => {
            client.select_session(&id);
            id
        }
        None => client.create_session(),
    };
    client.connect(&session_id);
    println!("session {session_id} (exit with /quit or Ctrl-D)");

    // Blocking stdin reader on its own thread, forwarded over a channel
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if input_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    loop {
        tokio::select! {
            line = input_rx.recv() => {
                let Some(line) = line else { break };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                match client.send_user_message(line) {
                    Some(outcome) if !outcome.delivered => {
                        eprintln!("(offline, message not delivered)");
                    }
                    Some(_) => {}
                    None => eprintln!("(no active session)"),
                }
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                render_event(&client, &event);
            }
        }
    }

    client.disconnect();
    client.dispose();
    Ok(())
}

/// Paint one client event onto the terminal.
fn render_event(client: &Client, event: &ClientEvent) {
    match event {
        ClientEvent::MessageUpdated {
            session_id,
            message_id,
        } => {
            let line = client.with_store(|store| {
                store
                    .session(session_id)
                    .and_then(|s| s.messages.iter().find(|m| m.id == *message_id))
                    .filter(|m| m.role == Role::Agent)
                    .map(|m| (m.text.clone(), m.revealing))
            });
            if let Some((text, revealing)) = line {
                if revealing {
                    print!("\r{text}");
                    let _ = std::io::stdout().flush();
                } else {
                    println!("\r{text}");
                }
            }
        }
        ClientEvent::ConnectionChanged(state) => {
            let badge = match state {
                ConnectionState::Connected => "online",
                ConnectionState::Connecting => "connecting",
                ConnectionState::Disconnected => "offline",
                ConnectionState::Error => "error",
            };
            eprintln!("[{badge}]");
        }
        ClientEvent::NoticeAdded { text, .. } => {
            eprintln!("! {text}");
        }
        ClientEvent::SessionCreated { .. } | ClientEvent::MessageAppended { .. } => {}
    }
}
