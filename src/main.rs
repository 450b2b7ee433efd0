//! # Olive CLI (`olive`)
//!
//! ## Usage
//!
//! ```bash
//! olive --config ./config/olive.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `olive init` | Create the SQLite database and run schema migrations |
//! | `olive import <file>` | Load context documents from a JSON array |
//! | `olive retrieve "<query>"` | Show the context retrieved for a query |
//! | `olive models` | List the configured chat models |
//! | `olive chat` | Chat with Olive in the terminal |
//! | `olive serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! olive init
//! olive import ./data/docs.json
//! olive retrieve "cuaca hari ini" --top-k 5
//! olive chat --user ana --model gpt-4o-mini --mood Senang
//! RUST_LOG=olive_chat=debug olive serve
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use olive_chat::chat::{AppContext, ChatSession};
use olive_chat::config::{self, Config};
use olive_chat::view::TerminalView;
use olive_chat::{migrate, server};

/// Olive: a chat assistant with keyword retrieval and live lookup.
#[derive(Parser)]
#[command(
    name = "olive",
    about = "Olive: chat with a hosted model, grounded in local documents and live answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/olive.toml`. When the file does not exist,
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/olive.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file with the `documents` and `chats`
    /// tables. Safe to run repeatedly.
    Init,

    /// Import context documents.
    ///
    /// Reads a JSON array of `{id?, title?, text}` objects. Documents with
    /// an existing id are replaced.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Show the context retrieved for a query.
    Retrieve {
        query: String,

        /// Maximum number of local documents.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List configured chat models.
    Models,

    /// Chat in the terminal.
    ///
    /// Type a message and press enter. `/new` starts a new conversation,
    /// `/mood <mood>` changes the mood, `/quit` exits.
    Chat {
        /// Username conversations are saved under.
        #[arg(long, default_value = "local")]
        user: String,

        /// Model id (defaults to `[chat].default_model`).
        #[arg(long)]
        model: Option<String>,

        /// Mood (defaults to `[chat].default_mood`).
        #[arg(long)]
        mood: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "olive_chat=debug,tower_http=debug"
    } else {
        "olive_chat=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &std::path::Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found; using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            let ctx = AppContext::from_config(cfg).await?;
            let stored = ctx.store.import_documents(&file).await?;
            println!("Imported {} document(s) from {}", stored, file.display());
        }
        Commands::Retrieve { query, top_k } => {
            let ctx = AppContext::from_config(cfg).await?;
            let results = ctx.retriever.retrieve(&query, top_k).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (idx, result) in results.iter().enumerate() {
                println!("{}. [{}] {} (score {})", idx + 1, result.id, result.title, result.score);
                println!("   {}", result.text.replace('\n', "\n   "));
            }
        }
        Commands::Models => {
            for (id, label) in &cfg.models {
                let marker = if *id == cfg.chat.default_model { " (default)" } else { "" };
                println!("{:<20} {}{}", id, label, marker);
            }
        }
        Commands::Chat { user, model, mood } => {
            let ctx = AppContext::from_config(cfg).await?;
            run_repl(&ctx, user, model, mood).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_repl(
    ctx: &AppContext,
    user: String,
    model: Option<String>,
    mood: Option<String>,
) -> Result<()> {
    let mut session = ChatSession::with_defaults(user, &ctx.config);
    if let Some(model) = model {
        session.set_model(model);
    }
    if let Some(mood) = mood {
        session.set_mood(mood);
    }

    let label = ctx
        .config
        .models
        .get(session.model())
        .cloned()
        .unwrap_or_else(|| "Olive".to_string());
    println!(
        "Chatting with {} as {}. /new starts over, /mood <mood> changes the mood, /quit exits.",
        label,
        session.username()
    );

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"\nyou> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                session.start_new();
                println!("Started a new conversation.");
                continue;
            }
            command if command.starts_with("/mood") => {
                let mood = command["/mood".len()..].trim();
                if mood.is_empty() {
                    println!("Usage: /mood <mood>");
                } else {
                    session.set_mood(mood);
                    println!("Mood set to {}.", mood);
                }
                continue;
            }
            prompt => {
                let view = Arc::new(TerminalView::new("olive"));
                session.send(ctx, prompt, view).await?;
                println!();
            }
        }
    }

    session.flush().await;
    Ok(())
}
