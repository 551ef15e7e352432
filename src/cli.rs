//! Engram CLI — headless interface to the agent runtime.
//!
//! Subcommands cover one-shot chat turns, the gateway daemon, session
//! inspection, and memory search.  Run `engram serve` to expose the
//! Session API over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use engram::config::{load_config, load_default_config};
use engram::runtime::Runtime;

// ---------------------------------------------------------------------------
// Top-level CLI struct
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "engram",
    about = "Memory-augmented conversational agent runtime",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to an alternative config file (default: ~/.engram/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output results as JSON.
    #[arg(long, global = true)]
    json: bool,
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one message and print the response.
    Chat(ChatArgs),
    /// Start the HTTP gateway daemon (blocks).
    Serve,
    /// List, inspect, or delete sessions.
    Sessions(SessionsArgs),
    /// Search long-term memory.
    Memory(MemoryArgs),
}

#[derive(Parser, Debug)]
struct ChatArgs {
    /// The message to send.
    message: String,

    /// Session to run the turn in (created on demand).
    #[arg(long, value_name = "SESSION_ID")]
    session: Option<String>,
}

#[derive(Parser, Debug)]
struct SessionsArgs {
    /// Action: list | show | delete.
    #[arg(default_value = "list")]
    action: String,
    id: Option<String>,
}

#[derive(Parser, Debug)]
struct MemoryArgs {
    /// Search query.
    query: String,

    /// Maximum results.
    #[arg(long, default_value_t = 5)]
    limit: usize,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("engram=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_default_config()?,
    };
    let runtime = Runtime::initialize(config)
        .await
        .map_err(|e| e.to_string())?;

    let result = match cli.command {
        Commands::Chat(args) => chat(&runtime, args, cli.json).await,
        Commands::Serve => engram::gateway::start_gateway(runtime.clone()).await,
        Commands::Sessions(args) => sessions(&runtime, args, cli.json).await,
        Commands::Memory(args) => memory(&runtime, args, cli.json).await,
    };

    runtime.shutdown().await;
    result
}

async fn chat(runtime: &Arc<Runtime>, args: ChatArgs, json: bool) -> Result<(), String> {
    let conversation = runtime
        .conversation(args.session.as_deref())
        .await
        .map_err(|e| e.to_string())?;
    let response = conversation
        .run(&args.message, None, None)
        .await
        .map_err(|e| e.to_string())?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "sessionId": conversation.session_id(),
                "response": response,
            })
        );
    } else {
        println!("{response}");
    }

    // Give the fire-and-forget memory pass a moment to land before the
    // process exits; a one-shot CLI would otherwise always lose it.
    let mut waited = 0u64;
    while runtime.memory.pending_tasks() > 0 && waited < 2000 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        waited += 50;
    }
    Ok(())
}

async fn sessions(runtime: &Arc<Runtime>, args: SessionsArgs, json: bool) -> Result<(), String> {
    match args.action.as_str() {
        "list" => {
            let sessions = runtime
                .sessions
                .list_sessions()
                .await
                .map_err(|e| e.to_string())?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&sessions).map_err(|e| e.to_string())?
                );
            } else if sessions.is_empty() {
                println!("no sessions");
            } else {
                for s in sessions {
                    println!(
                        "{}  {} messages  last active {}",
                        s.session_id, s.message_count, s.last_active_at
                    );
                }
            }
            Ok(())
        }
        "show" => {
            let id = args.id.ok_or("usage: engram sessions show <id>")?;
            let metadata = runtime
                .sessions
                .session_metadata(&id)
                .await
                .map_err(|e| e.to_string())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&metadata).map_err(|e| e.to_string())?
            );
            Ok(())
        }
        "delete" => {
            let id = args.id.ok_or("usage: engram sessions delete <id>")?;
            runtime.delete_session(&id).await.map_err(|e| e.to_string())?;
            println!("deleted {id}");
            Ok(())
        }
        other => Err(format!("unknown sessions action '{other}'")),
    }
}

async fn memory(runtime: &Arc<Runtime>, args: MemoryArgs, json: bool) -> Result<(), String> {
    let hits = runtime
        .memory
        .search_memories(&args.query, args.limit, None)
        .await?;
    if json {
        let rendered: Vec<serde_json::Value> = hits
            .iter()
            .map(|h| serde_json::json!({ "id": h.id, "score": h.score, "payload": h.payload }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&rendered).map_err(|e| e.to_string())?
        );
    } else if hits.is_empty() {
        println!("no matching memories");
    } else {
        for h in hits {
            let text = h
                .payload
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            println!("[{:.2}] {text}", h.score);
        }
    }
    Ok(())
}
