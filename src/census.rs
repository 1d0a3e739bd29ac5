//! Sender census
//!
//! Counts messages per sender address in one folder. The folder is
//! opened read-only, the `From` header is fetched chunk by chunk across
//! the worker pool, and per-chunk tallies are merged into one
//! [`SenderTable`].

use crate::batch::{Chunk, plan};
use crate::config::{BatchConfig, ImapConfig};
use crate::error::{Error, Result};
use crate::operation::{FetchHeaders, Search};
use crate::pool::{ChunkTask, WorkerPool};
use crate::session::{MailboxSession, RetryPolicy, Selection};
use crate::shutdown::Shutdown;
use mailparse::{MailAddr, MailHeaderMap, addrparse_header};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extract the sender address from a raw header block.
///
/// Accepts both `Display Name <addr>` and bare forms. For a group the
/// first member wins. The result is lower-cased.
///
/// # Errors
///
/// Returns [`Error::Parse`] if there is no `From` header or its value
/// holds no usable address.
pub fn extract_sender(header: &[u8]) -> Result<String> {
    let (headers, _) =
        mailparse::parse_headers(header).map_err(|e| Error::Parse(e.to_string()))?;
    let from = headers
        .get_first_header("From")
        .ok_or_else(|| Error::Parse("missing From header".into()))?;
    let list = addrparse_header(from).map_err(|e| Error::Parse(e.to_string()))?;

    let addr = list
        .iter()
        .find_map(|entry| match entry {
            MailAddr::Single(single) => Some(single.addr.as_str()),
            MailAddr::Group(group) => group.addrs.first().map(|s| s.addr.as_str()),
        })
        .map(str::trim)
        .filter(|a| a.contains('@'))
        .ok_or_else(|| Error::Parse(format!("no address in From: {}", from.get_value())))?;

    Ok(addr.to_lowercase())
}

/// One row of the census report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderRecord {
    pub address: String,
    pub count: usize,
}

/// Occurrence counts keyed by normalized address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderTable {
    counts: HashMap<String, usize>,
}

impl SenderTable {
    pub fn record(&mut self, address: impl Into<String>) {
        *self.counts.entry(address.into()).or_default() += 1;
    }

    /// Fold another table into this one. Order of merges does not
    /// affect the result.
    pub fn merge(&mut self, other: Self) {
        for (address, count) in other.counts {
            *self.counts.entry(address).or_default() += count;
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    #[must_use]
    pub fn get(&self, address: &str) -> usize {
        self.counts.get(address).copied().unwrap_or_default()
    }

    /// Senders with at least `min_count` messages, most frequent first,
    /// ties broken by address.
    #[must_use]
    pub fn report(&self, min_count: usize) -> Vec<SenderRecord> {
        let mut rows: Vec<SenderRecord> = self
            .counts
            .iter()
            .filter(|(_, count)| **count >= min_count)
            .map(|(address, count)| SenderRecord {
                address: address.clone(),
                count: *count,
            })
            .collect();
        rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.address.cmp(&b.address)));
        rows
    }
}

/// Tally for one chunk.
#[derive(Debug, Default)]
pub struct ChunkTally {
    pub table: SenderTable,
    pub parsed: usize,
    pub unparsed: usize,
}

/// Fetches `From` headers for a chunk and tallies them.
pub struct CensusTask {
    folder: String,
}

impl CensusTask {
    #[must_use]
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

impl ChunkTask for CensusTask {
    type Output = ChunkTally;

    fn selection(&self) -> Selection {
        Selection::read_only(self.folder.clone())
    }

    fn run<'a>(
        &'a self,
        session: &'a mut MailboxSession,
        chunk: &'a Chunk,
    ) -> impl Future<Output = Result<ChunkTally>> + Send + 'a {
        async move {
            let uid_set = chunk.uid_set();
            let headers = session.execute(&FetchHeaders { uid_set: &uid_set }).await?;

            let mut tally = ChunkTally::default();
            for (uid, raw) in &headers {
                match extract_sender(raw) {
                    Ok(address) => {
                        tally.table.record(address);
                        tally.parsed += 1;
                    }
                    Err(e) => {
                        warn!(uid, error = %e, "Skipping message");
                        tally.unparsed += 1;
                    }
                }
            }
            let missing = chunk.len().saturating_sub(headers.len());
            if missing > 0 {
                debug!(chunk = chunk.index(), missing, "Server returned no header for some UIDs");
                tally.unparsed += missing;
            }
            Ok(tally)
        }
    }
}

/// Outcome of a census run.
#[derive(Debug, Clone, Serialize)]
pub struct CensusReport {
    pub folder: String,
    pub min_count: usize,
    /// Messages found in the folder.
    pub messages: usize,
    pub parsed: usize,
    pub unparsed: usize,
    pub failed_batches: usize,
    pub senders: Vec<SenderRecord>,
    pub cancelled: bool,
}

impl fmt::Display for CensusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.senders.is_empty() {
            writeln!(
                f,
                "No senders with at least {} messages in {}",
                self.min_count, self.folder
            )?;
        }
        for row in &self.senders {
            writeln!(f, "{:4} | {}", row.count, row.address)?;
        }
        if self.failed_batches > 0 {
            writeln!(f, "{} batches failed; counts are partial", self.failed_batches)?;
        }
        if self.cancelled {
            writeln!(f, "Interrupted; counts are partial")?;
        }
        Ok(())
    }
}

/// Count senders in `folder`, keeping those with at least `min_count`
/// messages.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the folder does not exist, or a
/// connectivity error if the initial search cannot be completed.
/// Failures of individual chunks are counted, not returned.
pub async fn run_census(
    config: Arc<ImapConfig>,
    batch: &BatchConfig,
    folder: &str,
    min_count: usize,
    shutdown: &Shutdown,
) -> Result<CensusReport> {
    let mut planner = MailboxSession::new(0, Arc::clone(&config), RetryPolicy::from(batch));
    let searched = async {
        planner.select(folder, true).await?;
        planner
            .execute(&Search {
                query: "ALL".to_string(),
            })
            .await
    }
    .await;
    planner.logout().await;
    let uids = searched?;
    info!(%folder, messages = uids.len(), "Starting sender census");

    let messages = uids.len();
    let pool = WorkerPool::new(config, batch, shutdown.clone());
    let report = pool
        .run(Arc::new(CensusTask::new(folder)), plan(uids, batch.chunk_size))
        .await;

    let failed_batches = report.failed();
    let mut table = SenderTable::default();
    let mut parsed = 0;
    let mut unparsed = 0;
    for outcome in report.outcomes {
        if let Ok(tally) = outcome.result {
            table.merge(tally.table);
            parsed += tally.parsed;
            unparsed += tally.unparsed;
        }
    }

    info!(
        %folder,
        parsed,
        unparsed,
        failed_batches,
        senders = table.counts.len(),
        "Sender census finished"
    );

    Ok(CensusReport {
        folder: folder.to_string(),
        min_count,
        messages,
        parsed,
        unparsed,
        failed_batches,
        senders: table.report(min_count),
        cancelled: report.cancelled,
    })
}
