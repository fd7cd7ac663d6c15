use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pddikti_sync::config;
use pddikti_sync::db::{self, LedgerFilter};
use pddikti_sync::model::{EntityKind, SyncStatus};

#[derive(Parser, Debug)]
#[command(about = "Inspect or manually classify integration ledger rows")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List ledger rows, most recently synced first
    List {
        #[arg(long)]
        kind: Option<EntityKind>,
        #[arg(long)]
        status: Option<SyncStatus>,
        #[arg(long, default_value = "50")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Show one row in full
    Show { kind: EntityKind, id: i64 },
    /// Set needs_update, data_conflict or not_synced on an existing row
    Mark {
        kind: EntityKind,
        id: i64,
        status: SyncStatus,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::List {
            kind,
            status,
            limit,
            offset,
        } => {
            let filter = LedgerFilter { kind, status };
            for entry in db::list_ledger_entries(&pool, &filter, limit, offset).await? {
                println!(
                    "{:<8} {:>6}  {:<14} attempts={} external_id={} last_synced_at={}",
                    entry.kind,
                    entry.entity_id,
                    entry.status,
                    entry.attempt_count,
                    entry.external_id.as_deref().unwrap_or("-"),
                    entry
                        .last_synced_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".into()),
                );
                if entry.status == SyncStatus::SyncFailed {
                    if let Some(msg) = entry.last_error_message {
                        println!("         error: {}", msg);
                    }
                }
            }
        }
        Command::Show { kind, id } => match db::find_ledger_entry(&pool, kind, id).await? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => bail!("no ledger row for {} {}", kind, id),
        },
        Command::Mark { kind, id, status } => {
            if !db::mark_ledger_status(&pool, kind, id, status).await? {
                bail!("no ledger row for {} {}", kind, id);
            }
            println!("{} {} marked {}", kind, id, status);
        }
    }
    Ok(())
}
