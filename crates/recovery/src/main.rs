//! Operator tool for incomplete transaction sets.
//!
//! A set left `draft` past the grace window belongs to an operation whose main
//! transaction never committed. The fix is to re-invoke the original request
//! with the same idempotency key; this tool only finds the candidates.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use forgeledger_events::{ActionRegistry, TracingAuditSink};
use forgeledger_infra::{EngineConfig, LedgerEngine, PostgresEngineStore};
use forgeledger_observability::ObservabilityConfig;

#[derive(Debug, Parser)]
#[command(name = "forgeledger-recovery", version, about = "Inspect incomplete ledger operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List draft transaction sets older than the grace window, one JSON object per line.
    Stale {
        /// Grace window in seconds; defaults to FORGELEDGER_DRAFT_GRACE_SECS.
        #[arg(long, env = "FORGELEDGER_RECOVERY_GRACE_SECS")]
        grace_secs: Option<u64>,
    },
    /// Create the engine tables if they do not exist.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    forgeledger_observability::init_with(&ObservabilityConfig::from_env()?);

    let config = EngineConfig::from_env().context("reading engine configuration")?;
    config.require_database_url()?;
    let store = PostgresEngineStore::connect(&config)
        .await
        .context("connecting to the database")?;

    match cli.command {
        Command::Migrate => {
            store.ensure_schema().await.context("applying schema")?;
            tracing::info!("schema is up to date");
        }
        Command::Stale { grace_secs } => {
            let engine = LedgerEngine::new(
                Arc::new(store),
                Arc::new(ActionRegistry::standard()),
                Arc::new(TracingAuditSink),
                config,
            );
            let sets = engine
                .stale_draft_sets(grace_secs.map(Duration::from_secs))
                .await
                .context("listing stale transaction sets")?;
            tracing::info!(count = sets.len(), "stale draft transaction sets");

            let mut out = std::io::stdout().lock();
            for set in &sets {
                serde_json::to_writer(&mut out, set)?;
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_accepts_a_grace_window() {
        let cli = Cli::try_parse_from(["forgeledger-recovery", "stale", "--grace-secs", "30"]).unwrap();
        match cli.command {
            Command::Stale { grace_secs } => assert_eq!(grace_secs, Some(30)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn grace_must_be_a_number() {
        assert!(Cli::try_parse_from(["forgeledger-recovery", "stale", "--grace-secs", "soon"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
