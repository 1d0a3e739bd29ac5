//! Bulk move-to-trash
//!
//! Messages from a set of senders are copied to a destination folder
//! and flagged `\Deleted` chunk by chunk, then removed from the source
//! with a single `EXPUNGE` once every chunk has been handled.
//!
//! `FROM` searches match substrings, so every candidate's `From` header
//! is fetched and only exact sender matches are kept.
//!
//! A chunk only counts as moved when both its copy and its flag update
//! were acknowledged. The expunge is skipped when nothing was moved or
//! when shutdown was requested.

use crate::batch::{Chunk, Uid, plan};
use crate::census::extract_sender;
use crate::config::{BatchConfig, ImapConfig, normalize_addresses};
use crate::error::{Error, Result};
use crate::operation::{FetchHeaders, MoveChunk, Purge, Search, search_from};
use crate::pool::{ChunkTask, WorkerPool};
use crate::session::{MailboxSession, RetryPolicy, Selection};
use crate::shutdown::Shutdown;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What to move, from where, to where.
#[derive(Debug, Clone)]
pub struct SweepRequest {
    pub source: String,
    pub destination: String,
    /// Normalized sender addresses.
    pub senders: Vec<String>,
}

/// Copies a chunk to the destination and flags it in the source.
pub struct MoveTask {
    source: String,
    destination: String,
}

impl MoveTask {
    #[must_use]
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl ChunkTask for MoveTask {
    /// Messages moved.
    type Output = usize;

    fn selection(&self) -> Selection {
        Selection::read_write(self.source.clone())
    }

    fn run<'a>(
        &'a self,
        session: &'a mut MailboxSession,
        chunk: &'a Chunk,
    ) -> impl Future<Output = Result<usize>> + Send + 'a {
        async move {
            let uid_set = chunk.uid_set();
            session
                .execute(&MoveChunk {
                    uid_set: &uid_set,
                    destination: &self.destination,
                })
                .await?;
            Ok(chunk.len())
        }
    }
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub source: String,
    pub destination: String,
    /// Live messages whose `From` address is one of the senders.
    pub matched: usize,
    /// Messages copied and flagged.
    pub moved: usize,
    /// Messages removed by the final expunge, if it ran.
    pub purged: Option<usize>,
    pub failed_batches: usize,
    pub dry_run: bool,
    pub cancelled: bool,
    pub purge_error: Option<String>,
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            return writeln!(
                f,
                "Dry run: {} would be moved from {} to {}",
                self.matched, self.source, self.destination
            );
        }
        writeln!(
            f,
            "Moved {} of {} messages from {} to {}",
            self.moved, self.matched, self.source, self.destination
        )?;
        match (self.purged, &self.purge_error) {
            (Some(n), _) => writeln!(f, "Purged {n} messages")?,
            (None, Some(e)) => writeln!(f, "Purge failed: {e}")?,
            (None, None) if self.moved > 0 => writeln!(f, "Purge skipped")?,
            (None, None) => {}
        }
        if self.failed_batches > 0 {
            writeln!(f, "{} batches failed", self.failed_batches)?;
        }
        if self.cancelled {
            writeln!(f, "Interrupted before all batches were dispatched")?;
        }
        Ok(())
    }
}

/// Move every live message from `request.senders` out of
/// `request.source`.
///
/// # Errors
///
/// Returns [`Error::Setup`] for an empty or malformed sender list,
/// [`Error::Cancelled`] if shutdown was requested before any work
/// started, [`Error::Protocol`] if the source folder does not exist, or
/// a connectivity error if the search cannot be completed. Per-chunk
/// and purge failures are reported in the summary.
pub async fn run_sweep(
    config: Arc<ImapConfig>,
    batch: &BatchConfig,
    request: &SweepRequest,
    shutdown: &Shutdown,
) -> Result<SweepSummary> {
    let senders = normalize_addresses(&request.senders)?;
    if shutdown.is_triggered() {
        return Err(Error::Cancelled);
    }

    let mut summary = SweepSummary {
        source: request.source.clone(),
        destination: request.destination.clone(),
        dry_run: batch.dry_run,
        ..SweepSummary::default()
    };

    let mut planner = MailboxSession::new(0, Arc::clone(&config), RetryPolicy::from(batch));
    let searched = find_matches(&mut planner, request, &senders, batch, shutdown).await;
    planner.logout().await;
    let uids = searched?;
    summary.matched = uids.len();

    if batch.dry_run {
        info!(
            source = %request.source,
            matched = summary.matched,
            "Dry run, nothing moved"
        );
        return Ok(summary);
    }
    if uids.is_empty() {
        info!(source = %request.source, "No matching messages");
        return Ok(summary);
    }

    info!(
        source = %request.source,
        destination = %request.destination,
        matched = summary.matched,
        "Starting sweep"
    );
    let pool = WorkerPool::new(config, batch, shutdown.clone());
    let task = Arc::new(MoveTask::new(&request.source, &request.destination));
    let report = pool.run(task, plan(uids, batch.chunk_size)).await;

    summary.moved = report.succeeded().map(|(_, moved)| moved).sum();
    summary.failed_batches = report.failed();
    summary.cancelled = report.cancelled || shutdown.is_triggered();

    if summary.moved == 0 {
        warn!(
            failed_batches = summary.failed_batches,
            "No batch succeeded, skipping purge"
        );
    } else if shutdown.is_triggered() {
        warn!("Shutdown requested, skipping purge; flagged messages stay until the next expunge");
    } else {
        match planner.execute(&Purge).await {
            Ok(n) => {
                info!(purged = n, "Purge complete");
                summary.purged = Some(n);
            }
            Err(e) => {
                error!(error = %e, "Purge failed; moved messages remain flagged");
                summary.purge_error = Some(e.to_string());
            }
        }
        planner.logout().await;
    }

    Ok(summary)
}

/// UIDs in the source whose sender is exactly one of `senders`, ascending.
async fn find_matches(
    planner: &mut MailboxSession,
    request: &SweepRequest,
    senders: &[String],
    batch: &BatchConfig,
    shutdown: &Shutdown,
) -> Result<Vec<Uid>> {
    planner.select(&request.source, batch.dry_run).await?;

    let mut candidates = BTreeSet::new();
    for sender in senders {
        if shutdown.is_triggered() {
            return Err(Error::Cancelled);
        }
        let found = planner
            .execute(&Search {
                query: search_from(sender),
            })
            .await?;
        info!(%sender, found = found.len(), "Searched sender");
        candidates.extend(found);
    }

    let mut matches = Vec::with_capacity(candidates.len());
    let candidates: Vec<Uid> = candidates.into_iter().collect();
    for chunk in plan(candidates, batch.chunk_size) {
        if shutdown.is_triggered() {
            return Err(Error::Cancelled);
        }
        let uid_set = chunk.uid_set();
        let headers = planner.execute(&FetchHeaders { uid_set: &uid_set }).await?;
        for (uid, raw) in headers {
            match extract_sender(&raw) {
                Ok(address) if senders.contains(&address) => matches.push(uid),
                Ok(address) => debug!(uid, %address, "Sender only matched as a substring"),
                Err(e) => debug!(uid, error = %e, "Dropping candidate without a usable sender"),
            }
        }
    }
    Ok(matches)
}
