use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::db::{MembershipRow, Store, StoreError};
use crate::parser::{self, ParsedBlock};

const CHUNK_SIZE: usize = 500;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestCounts {
    pub blocks: usize,
    pub organizations: usize,
    pub persons: usize,
    pub memberships: usize,
    pub skipped: usize,
}

impl IngestCounts {
    pub fn print(&self) {
        println!(
            "Processed {} blocks: {} organizations, {} pastors, {} links ({} skipped).",
            self.blocks, self.organizations, self.persons, self.memberships, self.skipped,
        );
    }
}

/// Extract every directory block from `html` and persist it, in source order.
pub fn ingest_html(store: &Store, html: &str) -> Result<IngestCounts> {
    let blocks = parser::split_blocks(html);
    info!("Found {} directory blocks", blocks.len());

    let pb = ProgressBar::new(blocks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} blocks")?
            .progress_chars("#>-"),
    );

    let mut counts = IngestCounts {
        blocks: blocks.len(),
        ..Default::default()
    };

    for (c, chunk) in blocks.chunks(CHUNK_SIZE).enumerate() {
        let parsed: Vec<Option<ParsedBlock>> = chunk.par_iter().map(|b| parser::parse_block(b)).collect();

        for (i, entry) in parsed.into_iter().enumerate() {
            let Some(entry) = entry else {
                warn!("Block {} has no organization, skipping", c * CHUNK_SIZE + i);
                counts.skipped += 1;
                pb.inc(1);
                continue;
            };
            match save_block(store, &entry) {
                Ok(saved_person) => {
                    counts.organizations += 1;
                    if saved_person {
                        counts.persons += 1;
                        counts.memberships += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to save {:?}: {}", entry.organization.name, e);
                    counts.skipped += 1;
                }
            }
            pb.inc(1);
        }
    }

    pb.finish_and_clear();
    Ok(counts)
}

/// Persist one block: organization, then pastor and link. Returns whether a
/// pastor was linked.
fn save_block(store: &Store, entry: &ParsedBlock) -> Result<bool, StoreError> {
    let organization_id = store.save(&entry.organization)?;
    let Some(person) = &entry.person else {
        return Ok(false);
    };
    let person_id = store.save(person)?;
    store.save(&MembershipRow {
        organization_id,
        person_id,
    })?;
    Ok(true)
}
