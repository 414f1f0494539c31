mod config;
mod db;
mod ingest;
mod parser;
mod source;
mod sweep;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::db::Store;
use crate::source::HtmlSource;
use crate::sweep::probe::Prober;
use crate::sweep::{Pass, SweepOptions};

#[derive(Parser)]
#[command(name = "ipb_directory", about = "IPB church directory scraper")]
struct Cli {
    /// SQLite database (overrides IPB_DATABASE_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the directory page and store churches and pastors
    Ingest {
        /// Read the page from a local file instead of the network
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Write the fetched page to this file
        #[arg(long)]
        save_cache: Option<PathBuf>,
    },
    /// Probe and classify stored websites
    Sweep {
        /// Passes to run (default: all, in order)
        #[arg(long = "pass", value_enum)]
        passes: Vec<Pass>,
        /// Use the old "inradar" marker for sistema prover and eklesia
        #[arg(long)]
        legacy_signatures: bool,
        /// Max requests in flight
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Ingest, then sweep
    Run {
        #[arg(long)]
        cache: Option<PathBuf>,
        #[arg(long)]
        legacy_signatures: bool,
    },
    /// Show directory statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }

    let store = Store::open(settings.database_path())?;
    store.init_schema()?;

    match cli.command {
        Commands::Ingest { cache, save_cache } => {
            ingest(&store, &settings, cache, save_cache).await?;
        }
        Commands::Sweep {
            passes,
            legacy_signatures,
            concurrency,
        } => {
            let opts = SweepOptions {
                passes,
                concurrency: concurrency.unwrap_or(settings.probe_concurrency),
                legacy_signatures,
            };
            sweep(&store, &settings, &opts).await?;
        }
        Commands::Run {
            cache,
            legacy_signatures,
        } => {
            let t_ingest = Instant::now();
            ingest(&store, &settings, cache, None).await?;
            println!("Ingested in {}", format_duration(t_ingest.elapsed()));

            let opts = SweepOptions {
                passes: Vec::new(),
                concurrency: settings.probe_concurrency,
                legacy_signatures,
            };
            sweep(&store, &settings, &opts).await?;
        }
        Commands::Stats => print_stats(&store)?,
    }

    println!("\nTotal time: {}", format_duration(t0.elapsed()));
    Ok(())
}

async fn ingest(
    store: &Store,
    settings: &Settings,
    cache: Option<PathBuf>,
    save_cache: Option<PathBuf>,
) -> anyhow::Result<()> {
    let source = match cache {
        Some(path) => HtmlSource::Cache(path),
        None => HtmlSource::Remote {
            url: settings.source_url.clone(),
            timeout: settings.source_timeout(),
        },
    };
    let html = source
        .provide_html()
        .await
        .with_context(|| format!("Failed to load directory from {}", source.describe()))?;

    if let Some(path) = save_cache {
        source::save_cache(&path, &html)
            .with_context(|| format!("Failed to write {:?}", path))?;
        println!("Saved page to {}", path.display());
    }

    let counts = ingest::ingest_html(store, &html)?;
    counts.print();
    Ok(())
}

async fn sweep(store: &Store, settings: &Settings, opts: &SweepOptions) -> anyhow::Result<()> {
    let prober = Prober::new(&settings.probe_config())?;
    println!("Sweeping websites ({} concurrent requests)...", opts.concurrency);
    let reports = sweep::run_sweep(store, &prober, opts).await?;
    for r in &reports {
        println!("  {}", r);
    }
    Ok(())
}

fn print_stats(store: &Store) -> anyhow::Result<()> {
    let s = store.get_stats()?;

    println!("=== IPB Directory Stats ===\n");
    println!("Churches:           {}", s.organizations);
    println!("Pastors:            {}", s.persons);
    println!("Pastor links:       {}", s.memberships);
    println!("With website:       {}", s.with_website);

    println!("\nWebsite status:");
    for (status, n) in &s.by_status {
        println!("  {:<2} {:<18} {}", status.code(), status.label(), n);
    }

    if !s.by_platform.is_empty() {
        println!("\nPlatforms:");
        for (platform, n) in &s.by_platform {
            println!("  {:<20} {}", platform, n);
        }
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
