use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use songgen::cli::commands;
use songgen::{config, context, logging};

#[derive(Parser)]
#[command(name = "songgen")]
#[command(about = "Control panel for a SongGeneration studio server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./songgen.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigArgs,
}

/// Flags that override config file and environment values.
#[derive(Args, Serialize)]
struct ConfigArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    server_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    request_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    auto_download: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    json_logs: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the server's current generation and queue
    Watch {
        #[arg(long)]
        exit_when_idle: bool,
    },
    /// Start a song from a TOML or JSON payload, or queue it if busy
    Generate {
        payload: PathBuf,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// Follow progress until the queue drains
        #[arg(long)]
        watch: bool,
    },
    /// Current generation, queue and recent library
    Status,
    /// Estimate how long a payload will take
    Estimate {
        payload: PathBuf,
        /// Skip the server's timing history
        #[arg(long)]
        offline: bool,
    },
    /// Stop a generation (the running one by default)
    Stop { id: Option<String> },
    Delete { id: String },
    Rename { id: String, title: String },
    /// Save an output track to disk
    Download {
        id: String,
        #[arg(long, default_value_t = 0)]
        track: u32,
        /// flac, mp3 or wav
        #[arg(long)]
        format: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    #[command(subcommand)]
    Queue(QueueCommand),
    #[command(subcommand)]
    Models(ModelsCommand),
    /// GPU report from the server
    Gpu,
}

#[derive(Subcommand)]
enum QueueCommand {
    List,
    Remove { id: String },
}

#[derive(Subcommand)]
enum ModelsCommand {
    List,
    Download {
        id: String,
        /// Wait until the download finishes
        #[arg(long)]
        wait: bool,
    },
    Cancel { id: String },
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::AppConfig::load(cli.config.as_deref(), Some(&cli.overrides))
        .context("Failed to load configuration")?;
    logging::init(logging::LogConfig::from(&config));

    let ctx = context::AppContext::new(config).context("Failed to create API client")?;

    match &cli.command {
        Commands::Watch { exit_when_idle } => commands::watch(&ctx, *exit_when_idle).await,
        Commands::Generate {
            payload,
            model,
            title,
            watch,
        } => {
            commands::generate(&ctx, payload, model.as_deref(), title.as_deref(), *watch).await
        }
        Commands::Status => commands::status(&ctx).await,
        Commands::Estimate { payload, offline } => {
            commands::estimate(&ctx, payload, *offline).await
        }
        Commands::Stop { id } => commands::stop(&ctx, id.as_deref()).await,
        Commands::Delete { id } => commands::delete(&ctx, id).await,
        Commands::Rename { id, title } => commands::rename(&ctx, id, title).await,
        Commands::Download {
            id,
            track,
            format,
            output,
        } => commands::download(&ctx, id, *track, format.as_deref(), output.clone()).await,
        Commands::Queue(QueueCommand::List) => commands::queue_list(&ctx).await,
        Commands::Queue(QueueCommand::Remove { id }) => commands::queue_remove(&ctx, id).await,
        Commands::Models(ModelsCommand::List) => commands::models_list(&ctx).await,
        Commands::Models(ModelsCommand::Download { id, wait }) => {
            commands::models_download(&ctx, id, *wait).await
        }
        Commands::Models(ModelsCommand::Cancel { id }) => commands::models_cancel(&ctx, id).await,
        Commands::Models(ModelsCommand::Delete { id }) => commands::models_delete(&ctx, id).await,
        Commands::Gpu => commands::gpu(&ctx).await,
    }
}
