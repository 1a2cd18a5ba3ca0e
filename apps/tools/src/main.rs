use anyhow::{bail, Context, Result};
use case_registry::{CaseRegistry, Dispatcher};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use shared::protocol::Command as WireCommand;
use storage::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/cases.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue a url unless it is already tracked.
    Capture {
        url: String,
        #[arg(long)]
        opened_at: Option<DateTime<Utc>>,
    },
    Classify {
        url: String,
        case_type: String,
    },
    Complete {
        url: String,
    },
    Remove {
        url: String,
    },
    AddType {
        name: String,
    },
    RemoveType {
        name: String,
    },
    /// Irreversibly empties the history.
    ClearHistory {
        #[arg(long)]
        yes: bool,
    },
    /// Print all collections as JSON.
    Dump,
    /// Send a raw JSON command, e.g. '{"type":"GET_DATA"}'.
    Send {
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open {}", cli.database_url))?;
    let registry = CaseRegistry::new(storage);
    registry.initialize().await?;
    let dispatcher = Dispatcher::new(registry);

    let wire = match cli.command {
        Command::Capture { url, opened_at } => WireCommand::CaptureLink { url, opened_at },
        Command::Classify { url, case_type } => WireCommand::UpdateCaseType { url, case_type },
        Command::Complete { url } => WireCommand::MarkCompleted { url },
        Command::Remove { url } => WireCommand::RemoveQueueItem { url },
        Command::AddType { name } => WireCommand::AddCaseType { name },
        Command::RemoveType { name } => WireCommand::RemoveCaseType { name },
        Command::ClearHistory { yes } => {
            if !yes {
                bail!("refusing to clear history without --yes");
            }
            WireCommand::ClearHistory
        }
        Command::Dump => WireCommand::GetData,
        Command::Send { payload } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let response = dispatcher.dispatch_json(payload).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            return Ok(());
        }
    };

    let response = dispatcher.dispatch(wire).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
