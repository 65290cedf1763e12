//! Lorekeeper CLI - the `lore` binary.
//!
//! Commands:
//! - `list`       - List stored lorebooks
//! - `show`       - Print one lorebook and its entries
//! - `create`     - Create an empty lorebook
//! - `import`     - Import a lorebook JSON file or a PNG character card
//! - `export`     - Write a lorebook as JSON
//! - `set-global` - Designate the global lorebook
//! - `context`    - Preview the lore block a character would receive
//! - `tokens`     - Estimate the token count of some text
//! - `test-key`   - Check whether a trigger key fires on some text

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lore_engine::{ContextAssembler, FileStore, LoreConfig, LorebookRepository};

mod commands;

#[derive(Parser)]
#[command(
    name = "lore",
    about = "Lorekeeper - keyword-triggered world info for LLM prompts",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "LORE_CONFIG", default_value = "lore.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored lorebooks
    List,

    /// Print a lorebook and its entries
    Show {
        /// Lorebook id
        id: String,
    },

    /// Create an empty lorebook
    Create {
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Bind the lorebook to a character
        #[arg(long)]
        character: Option<String>,
    },

    /// Import a lorebook JSON file or a PNG character card
    Import {
        file: PathBuf,
    },

    /// Export a lorebook as JSON
    Export {
        /// Lorebook id
        id: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Designate the global lorebook
    SetGlobal {
        /// Lorebook id
        id: String,
    },

    /// Preview the lore block injected for a character
    Context {
        /// Character id
        #[arg(long)]
        character: String,

        /// Token budget for the lore block
        #[arg(short, long)]
        budget: Option<usize>,

        /// Also print triggered entries and token usage
        #[arg(long)]
        stats: bool,

        /// Recent conversation text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Estimate the token count of some text
    Tokens {
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Check whether a trigger key fires on some text
    TestKey {
        key: String,

        /// Treat the key as a regular expression
        #[arg(long)]
        regex: bool,

        /// Match case exactly
        #[arg(long)]
        case_sensitive: bool,

        #[arg(required = true)]
        text: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = LoreConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let store = FileStore::new(config.storage.data_dir.clone());
    let assembler = ContextAssembler::new(config.context.assembly());
    let mut repo = LorebookRepository::with_assembler(store, assembler);
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::List => commands::list(&repo, &mut out)?,
        Commands::Show { id } => commands::show(&repo, &id, &mut out)?,
        Commands::Create {
            name,
            description,
            character,
        } => commands::create(&mut repo, &config, name, description, character, &mut out)?,
        Commands::Import { file } => commands::import(&mut repo, &file, &mut out)?,
        Commands::Export { id, out: path } => {
            commands::export(&repo, &id, path.as_deref(), &mut out)?
        }
        Commands::SetGlobal { id } => commands::set_global(&mut repo, &id, &mut out)?,
        Commands::Context {
            character,
            budget,
            stats,
            text,
        } => commands::context(
            &repo,
            &config,
            &character,
            &text.join(" "),
            budget,
            stats,
            &mut out,
        )?,
        Commands::Tokens { text } => commands::tokens(&text.join(" "), &mut out)?,
        Commands::TestKey {
            key,
            regex,
            case_sensitive,
            text,
        } => commands::test_key(&key, &text.join(" "), regex, case_sensitive, &mut out)?,
    }

    Ok(())
}
