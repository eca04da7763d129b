//! Reconciliation Runner CLI
//!
//! Entrypoint for recomputing daily reconciled metrics over a date window.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin recon_run -- run \
//!   --events-db events.sqlite \
//!   --platform-db platform.sqlite \
//!   --metrics-db metrics.sqlite \
//!   --start 2025-07-01 --end 2025-07-07
//! ```
//!
//! # Exit Codes
//!
//! - 0: Run complete, every partition committed
//! - 1: Run finished but one or more partitions failed
//! - 2: Configuration or validation error
//! - 3: Runtime error (database, I/O, etc.)

use adrecon_backend::recon::{
    DateWindow, Day, EntityDayKey, EntityType, MetricLookup, MetricStore, Orchestrator,
    ReconConfig, RunSummary, SqliteEventStore, SqlitePlatformStore,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "recon_run")]
#[command(about = "Daily ad-spend reconciliation and aggregation runner")]
struct Args {
    /// Optional TOML config file (retry budget, breakdowns, parallelism)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recompute every partition of the window and commit the results
    Run {
        /// SQLite path of the internal event stream
        #[arg(long)]
        events_db: String,

        /// SQLite path of the platform-reported metrics
        #[arg(long)]
        platform_db: String,

        /// SQLite path of the output metric store
        #[arg(long)]
        metrics_db: String,

        /// First day of the window (inclusive, YYYY-MM-DD)
        #[arg(long)]
        start: Day,

        /// Last day of the window (inclusive, YYYY-MM-DD)
        #[arg(long)]
        end: Day,

        /// Restrict the run to one entity type (campaign | adset | ad)
        #[arg(long)]
        entity_type: Option<String>,

        /// Force sequential partition processing
        #[arg(long)]
        sequential: bool,
    },

    /// Print one committed metric row (or the not-computed signal)
    Show {
        #[arg(long)]
        metrics_db: String,

        #[arg(long)]
        entity_type: String,

        #[arg(long)]
        entity_id: String,

        #[arg(long)]
        date: Day,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("recon_run=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            3
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> Result<i32> {
    let config = match &args.config {
        Some(path) => match ReconConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {:#}", e);
                return Ok(2);
            }
        },
        None => ReconConfig::default(),
    };

    match args.command {
        Commands::Run {
            events_db,
            platform_db,
            metrics_db,
            start,
            end,
            entity_type,
            sequential,
        } => {
            let window = match DateWindow::new(start, end) {
                Some(window) => window,
                None => {
                    eprintln!("error: start {} is after end {}", start, end);
                    return Ok(2);
                }
            };
            let scope = match entity_type.as_deref() {
                None => None,
                Some(s) => match EntityType::parse(s) {
                    Some(t) => Some(t),
                    None => {
                        eprintln!("error: unknown entity type {:?} (campaign | adset | ad)", s);
                        return Ok(2);
                    }
                },
            };
            let config = ReconConfig {
                parallel: config.parallel && !sequential,
                ..config
            };

            let events = SqliteEventStore::open(&events_db)?;
            let platform = SqlitePlatformStore::open(&platform_db)?;
            let metrics = MetricStore::open(&metrics_db)?;

            let orchestrator = Orchestrator::new(&events, &platform, &metrics, &config);
            let summary = orchestrator.recompute_scope(scope, window)?;
            print_summary(&summary);

            Ok(if summary.is_complete() { 0 } else { 1 })
        }

        Commands::Show {
            metrics_db,
            entity_type,
            entity_id,
            date,
        } => {
            let entity_type = EntityType::parse(&entity_type)
                .with_context(|| format!("unknown entity type {:?}", entity_type))?;
            let metrics = MetricStore::open(&metrics_db)?;
            let key = EntityDayKey {
                entity_type,
                entity_id,
                date,
            };
            match metrics.fetch_entity_daily(&key)? {
                MetricLookup::NotComputed => {
                    println!("{}: not computed (no partition commit)", key);
                }
                MetricLookup::ZeroActivity => {
                    println!("{}: zero activity (partition committed, no row)", key);
                }
                MetricLookup::Computed(row) => {
                    println!("{}", serde_json::to_string_pretty(&row)?);
                }
            }
            Ok(0)
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("run        {}", summary.run_id);
    println!("window     {}", summary.window);
    println!("duration   {} ms", summary.duration_ms);
    println!(
        "partitions {}/{} committed, {} failed",
        summary.quality.partitions_committed,
        summary.quality.partitions_expected,
        summary.quality.partitions_failed,
    );
    println!(
        "events     {} seen, {} rejected",
        summary.quality.events_seen, summary.quality.events_rejected,
    );
    if summary.quality.resolver_faults > 0 {
        println!("resolver faults: {} (ran with empty name/hierarchy snapshots)", summary.quality.resolver_faults);
    }
    if summary.quality.consistency_faults > 0 {
        println!("consistency faults: {}", summary.quality.consistency_faults);
    }
    if summary.quality.ambiguous_hierarchy_edges > 0 {
        println!(
            "ambiguous hierarchy edges: {}",
            summary.quality.ambiguous_hierarchy_edges
        );
    }
    for outcome in summary.partitions.iter().filter(|o| !o.committed) {
        println!(
            "  FAILED {} after {} attempt(s): {}",
            outcome.partition,
            outcome.attempts,
            outcome.error.as_deref().unwrap_or("unknown"),
        );
    }
}
