//! Mulch CLI
//!
//! Operator surface over a Mulch workspace: inspect consolidation state,
//! feed transcript entries, force a sweep, reset a conversation, and view
//! the durable memory files.

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use mulch::memory::evaluate;
use mulch::{
    ConsolidationScheduler, EntryRole, FileOffsetStore, LlmConsolidator, MemoryStore, MulchConfig,
    OffsetStore, OpenAiProvider, StoredOffsets, TranscriptEntry, TranscriptLog, TranscriptStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Mulch - background memory consolidation for chat agents
#[derive(Parser, Debug)]
#[command(name = "mulch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Workspace directory (transcripts, offsets, memory files)
    #[arg(short = 'C', long)]
    workspace: Option<PathBuf>,

    /// Path to the config file (defaults to {workspace}/mulch.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show transcript length, offsets, and backlog for a conversation
    Status { conversation: String },

    /// Append an entry and run consolidation if it is due
    Append {
        conversation: String,
        text: String,

        #[arg(long, value_enum, default_value = "user")]
        role: RoleArg,
    },

    /// Re-check the trigger without appending (picks up elapsed cooldowns)
    Sweep { conversation: String },

    /// Clear a conversation's transcript and zero its offsets
    Reset { conversation: String },

    /// Print the combined memory context (long-term + today's notes)
    Memory,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    User,
    Assistant,
    Tool,
    System,
}

impl From<RoleArg> for EntryRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => EntryRole::User,
            RoleArg::Assistant => EntryRole::Assistant,
            RoleArg::Tool => EntryRole::Tool,
            RoleArg::System => EntryRole::System,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let workspace = match cli.workspace {
        Some(path) => path,
        None => dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?
            .join(".mulch"),
    };
    tokio::fs::create_dir_all(&workspace).await?;

    let config_path = cli
        .config
        .unwrap_or_else(|| workspace.join("mulch.toml"));
    let config = MulchConfig::load_or_default(&config_path).await?;

    let transcripts = Arc::new(TranscriptStore::new(&workspace).await?);
    let offsets = Arc::new(FileOffsetStore::new(&workspace).await?);
    let memory = MemoryStore::new(&workspace).await?;

    match cli.command {
        Command::Status { conversation } => {
            let total = transcripts.length(&conversation).await?;
            let stored = offsets.load(&conversation).await?;
            let decision = evaluate(total, Utc::now(), &stored, &config.consolidation);
            let backlog = decision.compress_end.saturating_sub(stored.last_consolidated);

            println!("conversation:       {}", conversation);
            println!("entries:            {}", total);
            println!("last consolidated:  {}", stored.last_consolidated);
            println!(
                "last run:           {}",
                stored
                    .last_consolidated_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            println!("backlog:            {}", backlog);
            println!("run due:            {}", decision.should_trigger);
        }
        Command::Append {
            conversation,
            text,
            role,
        } => {
            let scheduler = build_scheduler(&config, transcripts.clone(), offsets, memory)?;
            let total = transcripts
                .append(&conversation, TranscriptEntry::new(role.into(), text))
                .await?;
            scheduler.on_entry_appended(&conversation).await?;
            scheduler.wait_until_idle(&conversation).await?;

            let snapshot = scheduler.snapshot(&conversation).await?;
            println!(
                "appended entry {} (consolidated up to {})",
                total, snapshot.last_consolidated
            );
        }
        Command::Sweep { conversation } => {
            let scheduler = build_scheduler(&config, transcripts.clone(), offsets, memory)?;
            scheduler.on_entry_appended(&conversation).await?;
            scheduler.wait_until_idle(&conversation).await?;

            let snapshot = scheduler.snapshot(&conversation).await?;
            println!("consolidated up to {}", snapshot.last_consolidated);
        }
        Command::Reset { conversation } => {
            transcripts.clear(&conversation).await?;
            offsets
                .save(&conversation, &StoredOffsets::default())
                .await?;
            println!("conversation {} reset", conversation);
        }
        Command::Memory => {
            let context = memory.memory_context().await?;
            if context.is_empty() {
                println!("(no memory yet)");
            } else {
                println!("{}", context);
            }
        }
    }

    Ok(())
}

fn build_scheduler(
    config: &MulchConfig,
    transcripts: Arc<TranscriptStore>,
    offsets: Arc<FileOffsetStore>,
    memory: MemoryStore,
) -> anyhow::Result<ConsolidationScheduler> {
    let provider = Arc::new(OpenAiProvider::new(&config.provider)?);
    let consolidator = Arc::new(LlmConsolidator::new(provider, memory));
    Ok(ConsolidationScheduler::new(
        config.consolidation.clone(),
        transcripts,
        consolidator,
        offsets,
    ))
}
