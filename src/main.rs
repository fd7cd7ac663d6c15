use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use pddikti_sync::batch::Coordinator;
use pddikti_sync::config;
use pddikti_sync::db::{self, SqliteRecords};
use pddikti_sync::model::{EntityKind, Selector};
use pddikti_sync::registry::HttpRegistryClient;
use pddikti_sync::sync::Orchestrator;

#[derive(Debug, Parser)]
#[command(author, version, about = "Synchronize local academic records with PDDIKTI")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Synchronize one entity, a group, or everything eligible
    Sync {
        /// student, lecturer, course, grade, or all
        kind: String,

        /// Local id of a single entity
        #[arg(long, conflicts_with_all = ["group", "period", "student"])]
        id: Option<i64>,

        /// Study program (students, courses), faculty (lecturers) or period (grades)
        #[arg(long, conflicts_with_all = ["period", "student"])]
        group: Option<i64>,

        /// Academic period filter for grades
        #[arg(long)]
        period: Option<i64>,

        /// Student filter for grades
        #[arg(long)]
        student: Option<i64>,
    },
    /// Print per-kind progress and recent failures
    Status,
    /// Re-attempt failed entries below the attempt cap
    Retry {
        /// Restrict the sweep to one kind
        #[arg(long)]
        kind: Option<EntityKind>,

        /// Attempt cap; defaults to app.max_attempts
        #[arg(long)]
        max_attempts: Option<i64>,
    },
    /// Print an example configuration file
    ExampleConfig,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn selector_for(
    kind: EntityKind,
    group: Option<i64>,
    period: Option<i64>,
    student: Option<i64>,
) -> Result<Selector> {
    if period.is_some() || student.is_some() {
        if kind != EntityKind::Grade {
            bail!("--period and --student only apply to grades");
        }
        return Ok(Selector::Grades {
            period_id: period,
            student_id: student,
        });
    }
    Ok(group.map(Selector::Group).unwrap_or(Selector::AllEligible))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let client = Arc::new(HttpRegistryClient::from_config(&cfg.registry)?);
    let store = Arc::new(SqliteRecords::new(pool.clone()));
    let orchestrator = Orchestrator::new(pool.clone(), client);
    let coordinator = Coordinator::new(orchestrator, store.clone(), cfg.app.concurrency);

    match args.command {
        Command::Sync {
            kind,
            id,
            group,
            period,
            student,
        } => {
            if kind.eq_ignore_ascii_case("all") {
                if id.is_some() || group.is_some() || period.is_some() || student.is_some() {
                    bail!("filters need a single kind, not all");
                }
                let report = coordinator.sync_every_kind().await?;
                print_json(&report)?;
                return Ok(());
            }

            let kind: EntityKind = kind.parse()?;
            if let Some(id) = id {
                let outcome = coordinator
                    .orchestrator()
                    .sync_entity(store.as_ref(), kind, id)
                    .await?
                    .ok_or_else(|| anyhow!("{} {} not found", kind, id))?;
                print_json(&outcome)?;
            } else {
                let selector = selector_for(kind, group, period, student)?;
                let report = coordinator.sync_all(kind, selector).await?;
                info!(run_id = %report.run_id, "{}", report.summary());
                print_json(&report)?;
            }
        }
        Command::Status => {
            let status = coordinator.get_sync_status().await?;
            print_json(&status)?;
        }
        Command::Retry { kind, max_attempts } => {
            let max_attempts = max_attempts.unwrap_or(cfg.app.max_attempts);
            let report = coordinator.retry_failed(kind, max_attempts).await?;
            print_json(&report)?;
        }
        // Printed before the config was loaded.
        Command::ExampleConfig => {}
    }

    Ok(())
}
