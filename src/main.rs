//! nbn-lookup: command-line front end for the broadband technology lookup.
//!
//! Resolves a suburb snapshot (cached or fetched), prints the per-technology
//! summary, and reports the exact street match when one is requested.

mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};

use common::config::LookupConfig;
use lookup::{categorize, CacheStore, LocationReport, LookupService, PropertyKeys};
use snapshot_client::SnapshotClient;

#[derive(Parser)]
#[command(name = "nbn-lookup", about = "Look up NBN connection technology by suburb")]
struct Cli {
    /// TOML configuration file (optional).
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a suburb and optionally match a street address.
    Lookup {
        suburb: String,
        /// State or territory code, e.g. QLD.
        state: String,
        #[arg(long)]
        street: Option<String>,
        /// Ignore a fresh cached entry and refetch.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        json: bool,
    },
    /// Drop the cached snapshot for a suburb.
    Invalidate { suburb: String, state: String },
    /// Run the eviction sweep now.
    Sweep,
    /// List cached snapshots.
    Entries,
}

fn open_store(cfg: &LookupConfig) -> Result<CacheStore, common::Error> {
    match CacheStore::open(&cfg.cache.path) {
        Ok(store) => Ok(store),
        Err(e) => {
            warn!(
                "Cache at {} unavailable ({}), continuing without persistence",
                cfg.cache.path.display(),
                e
            );
            CacheStore::open_in_memory()
        }
    }
}

fn category_width(report: &LocationReport) -> usize {
    report
        .summary
        .counts_by_category
        .keys()
        .map(|c| c.label().len())
        .max()
        .unwrap_or(0)
}

fn print_text(report: &LocationReport, street: Option<&str>) {
    let entry = &report.outcome.entry;
    println!(
        "{} ({} features, {} as of {})",
        entry.key,
        report.summary.total,
        report.outcome.origin,
        entry.generated_at.as_deref().unwrap_or("unknown date"),
    );

    let width = category_width(report);
    for (category, count) in &report.summary.counts_by_category {
        let example = report
            .summary
            .example_address_by_category
            .get(category)
            .map(String::as_str)
            .unwrap_or("");
        println!("  {:<width$}  {:>5}  e.g. {}", category.label(), count, example);
    }

    if let Some(street) = street {
        match &report.matched {
            Some(record) => {
                let keys = PropertyKeys::default();
                let category = categorize(record, &keys);
                let address = keys.address(record).unwrap_or_else(|| street.to_string());
                println!("{}: {}", address, category);
            }
            None => println!("{}: no exact match, see suburb summary above", street),
        }
    }
}

fn print_json(report: &LocationReport) -> Result<(), common::Error> {
    let keys = PropertyKeys::default();
    let matched = report.matched.as_ref().map(|record| {
        json!({
            "address": keys.address(record),
            "technology": categorize(record, &keys),
            "properties": record.properties,
        })
    });
    let entry = &report.outcome.entry;
    let body = json!({
        "key": entry.key,
        "origin": report.outcome.origin,
        "fetched_at": entry.fetched_at,
        "generated_at": entry.generated_at,
        "source_url": entry.source_url,
        "summary": report.summary,
        "matched": matched,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn run(cli: Cli, cfg: LookupConfig) -> Result<(), common::Error> {
    let store = open_store(&cfg)?;
    let client = SnapshotClient::new(&cfg.source)?;
    let service = LookupService::new(client, store, &cfg);

    match cli.command {
        Command::Lookup {
            suburb,
            state,
            street,
            force,
            json,
        } => {
            // One sweep per session keeps the store bounded.
            service.sweep().await;

            match service.locate(&suburb, &state, street.as_deref(), force).await {
                Ok(report) => {
                    if json {
                        print_json(&report)?;
                    } else {
                        print_text(&report, street.as_deref());
                    }
                }
                Err(e) => {
                    println!("{}: unknown", service.resolve_location(&suburb, &state));
                    return Err(e);
                }
            }
        }
        Command::Invalidate { suburb, state } => {
            let key = service.invalidate(&suburb, &state).await;
            info!("Invalidated {}", key);
        }
        Command::Sweep => {
            let report = service.sweep().await;
            println!(
                "removed {} expired, {} over bound; {} remain",
                report.expired.len(),
                report.trimmed.len(),
                report.remaining
            );
        }
        Command::Entries => {
            let mut cursor = service.store().iterate();
            while let Some(entry) = cursor.next().await {
                println!(
                    "{}\t{}\t{} features\t{}",
                    entry.key,
                    entry.fetched_at.to_rfc3339(),
                    entry.payload.len(),
                    entry.source_url
                );
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "nbn_lookup=info,lookup=info,snapshot_client=info".into()
            }),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Snapshots from {}, cache at {} (ttl {}s, max {} entries)",
        cfg.source.base_url,
        cfg.cache.path.display(),
        cfg.cache.ttl_secs,
        cfg.cache.max_entries
    );

    if let Err(e) = run(cli, cfg).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
