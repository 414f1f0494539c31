pub mod probe;
pub mod rules;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::db::{Store, WebsiteFilter, WebsiteRow, WebsiteStatus};
use probe::{ProbeOutcome, Prober};
use rules::VendorSignature;

/// Sweep passes, declared in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum Pass {
    Cleanup,
    Platforms,
    Liveness,
    Vendors,
}

impl Pass {
    pub const ALL: [Pass; 4] = [Pass::Cleanup, Pass::Platforms, Pass::Liveness, Pass::Vendors];
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Passes to run; empty means all of them.
    pub passes: Vec<Pass>,
    pub concurrency: usize,
    pub legacy_signatures: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub pass: String,
    pub scanned: usize,
    pub changed: usize,
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} scanned, {} changed", self.pass, self.scanned, self.changed)
    }
}

#[derive(Debug, Clone, Copy)]
enum ProbeKind {
    Head,
    Get,
}

/// Run the selected passes in their fixed order.
pub async fn run_sweep(store: &Store, prober: &Prober, opts: &SweepOptions) -> Result<Vec<PassReport>> {
    let mut passes = if opts.passes.is_empty() {
        Pass::ALL.to_vec()
    } else {
        opts.passes.clone()
    };
    passes.sort();
    passes.dedup();

    let concurrency = opts.concurrency.max(1);
    let mut reports = Vec::new();
    for pass in passes {
        match pass {
            Pass::Cleanup => reports.push(cleanup(store)?),
            Pass::Platforms => reports.extend(platforms(store)?),
            Pass::Liveness => reports.push(liveness(store, prober, concurrency).await?),
            Pass::Vendors => {
                for sig in rules::vendor_signatures(opts.legacy_signatures) {
                    reports.push(vendor_pass(store, prober, &sig, concurrency).await?);
                }
            }
        }
    }
    Ok(reports)
}

pub fn cleanup(store: &Store) -> Result<PassReport> {
    let scanned = store.get_stats()?.with_website;
    let changed = store.clear_denied_websites(rules::DENIED_WEBSITES, rules::SOCIAL_PATTERNS)?;
    let report = PassReport {
        pass: "cleanup".into(),
        scanned,
        changed,
    };
    info!("{}", report);
    Ok(report)
}

pub fn platforms(store: &Store) -> Result<Vec<PassReport>> {
    let scanned = store.get_stats()?.with_website;
    let hosted = store.flag_websites(rules::HOSTED_PLATFORM_PATTERNS, WebsiteStatus::HostedPlatform)?;
    let redirectors = store.flag_websites(rules::REDIRECTOR_PATTERNS, WebsiteStatus::LinkRedirector)?;
    let reports = vec![
        PassReport {
            pass: "hosted platforms".into(),
            scanned,
            changed: hosted,
        },
        PassReport {
            pass: "link redirectors".into(),
            scanned,
            changed: redirectors,
        },
    ];
    for r in &reports {
        info!("{}", r);
    }
    Ok(reports)
}

/// HEAD every unset or unreachable website; 2xx marks it reachable.
pub async fn liveness(store: &Store, prober: &Prober, concurrency: usize) -> Result<PassReport> {
    let rows = store.fetch_websites(WebsiteFilter::Unprobed)?;
    let scanned = rows.len();
    info!("Checking {} websites", scanned);

    let pb = pass_bar(scanned, "reachable")?;
    let mut rx = spawn_probes(prober, rows, concurrency, ProbeKind::Head);

    let mut reachable = 0usize;
    let mut changed = 0usize;
    while let Some((row, outcome)) = rx.recv().await {
        let status = if outcome.is_success() {
            reachable += 1;
            WebsiteStatus::Reachable
        } else {
            if let ProbeOutcome::Failed(e) = &outcome {
                warn!("{} unreachable: {}", row.website, e);
            }
            WebsiteStatus::Unreachable
        };
        if store.set_liveness(row.id, status)? {
            changed += 1;
        }
        pb.set_message(format!("reachable: {}", reachable));
        pb.inc(1);
    }
    pb.finish_and_clear();

    let report = PassReport {
        pass: "liveness".into(),
        scanned,
        changed,
    };
    info!("{} ({} reachable)", report, reachable);
    Ok(report)
}

/// GET each website in the signature's scope and tag the ones whose body
/// carries its marker.
pub async fn vendor_pass(
    store: &Store,
    prober: &Prober,
    sig: &VendorSignature,
    concurrency: usize,
) -> Result<PassReport> {
    let rows = store.fetch_websites(sig.scope)?;
    let scanned = rows.len();
    info!("Looking for {} on {} websites", sig.vendor, scanned);

    let pb = pass_bar(scanned, sig.vendor)?;
    let mut rx = spawn_probes(prober, rows, concurrency, ProbeKind::Get);

    let mut changed = 0usize;
    while let Some((row, outcome)) = rx.recv().await {
        let matched = outcome.body().is_some_and(|body| sig.matches(body));
        if matched && store.set_vendor(row.id, sig.vendor)? {
            changed += 1;
        }
        pb.set_message(format!("{}: {}", sig.vendor, changed));
        pb.inc(1);
    }
    pb.finish_and_clear();

    let report = PassReport {
        pass: sig.vendor.to_string(),
        scanned,
        changed,
    };
    info!("{}", report);
    Ok(report)
}

/// Probe rows with at most `concurrency` requests in flight. Results arrive
/// in completion order; the caller owns all database writes.
fn spawn_probes(
    prober: &Prober,
    rows: Vec<WebsiteRow>,
    concurrency: usize,
    kind: ProbeKind,
) -> mpsc::Receiver<(WebsiteRow, ProbeOutcome)> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (tx, rx) = mpsc::channel(concurrency * 2);

    for row in rows {
        let prober = prober.clone();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let outcome = match kind {
                ProbeKind::Head => prober.head(&row.website).await,
                ProbeKind::Get => prober.get(&row.website).await,
            };
            let _ = tx.send((row, outcome)).await;
        });
    }

    rx
}

fn pass_bar(len: usize, label: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta}) {msg}")?
            .progress_chars("=> "),
    );
    pb.set_message(format!("{}: 0", label));
    Ok(pb)
}
