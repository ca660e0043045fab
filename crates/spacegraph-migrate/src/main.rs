//! CLI entry point for spacegraph-migrate.

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use spacegraph_core::{EntityKind, RunId};
use spacegraph_graph::{GraphClient, GraphConfig};

use spacegraph_migrate::config::load_settings;
use spacegraph_migrate::rollback::check_confirmation;
use spacegraph_migrate::{MigrationRunner, RunState};

#[derive(Parser)]
#[command(name = "spacegraph-migrate")]
#[command(about = "Ownership-graph migrations: schema, backfill, link, verify, rollback")]
struct Cli {
    /// Config file prefix (default: spacegraph).
    #[arg(short, long, default_value = "spacegraph", global = true)]
    config: String,

    /// Provenance id for this run (default: mig-<UTC timestamp>).
    #[arg(long, global = true)]
    run_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply uniqueness constraints and indexes.
    Schema,
    /// Fill missing canonical tenant/space fields.
    Backfill {
        /// Restrict to one entity type: users, organizations, spaces, notebooks,
        /// documents or chunks.
        #[arg(long)]
        entity: Option<String>,
    },
    /// Create relationship edges from scalar foreign keys.
    Link,
    /// Count invariant violations without writing anything.
    Verify,
    /// Run schema, backfill, link and verify in order.
    Run,
    /// Remove everything a previous run created.
    Rollback {
        /// Run to roll back.
        #[arg(value_name = "RUN_ID")]
        target: String,

        /// Must be exactly "ROLLBACK <RUN_ID>".
        #[arg(long)]
        confirm: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli.config)?;
    let run_id = match cli.run_id.as_deref() {
        Some(raw) => RunId::parse(raw)?,
        None => RunId::generate(),
    };

    // Refuse an unconfirmed rollback before touching the store.
    if let Command::Rollback { target, confirm } = &cli.command {
        check_confirmation(&RunId::parse(target)?, confirm.as_deref())?;
    }

    let graph = GraphClient::connect(&GraphConfig::from(&settings.neo4j)).await?;
    let runner = MigrationRunner::new(graph, run_id, settings.migrate);
    runner.verify_connectivity().await?;

    match cli.command {
        Command::Schema => print_report(&runner.apply_schema().await?)?,
        Command::Backfill { entity } => {
            let only = entity
                .as_deref()
                .map(str::parse::<EntityKind>)
                .transpose()?;
            print_report(&runner.backfill(only).await?)?;
        }
        Command::Link => print_report(&runner.link().await?)?,
        Command::Verify => print_report(&runner.verify().await?)?,
        Command::Run => {
            let report = runner.run_all().await;
            print_report(&report)?;
            if let RunState::Failed { stage, reason } = &report.state {
                anyhow::bail!("Migration run {} failed at {stage}: {reason}", report.run_id);
            }
        }
        Command::Rollback { target, confirm } => {
            let target = RunId::parse(&target)?;
            print_report(&runner.rollback(&target, confirm.as_deref()).await?)?;
        }
    }

    Ok(())
}

fn print_report<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
