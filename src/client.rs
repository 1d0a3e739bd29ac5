//! Mailbox client

use crate::census::{CensusReport, run_census};
use crate::config::{BatchConfig, ImapConfig};
use crate::error::Result;
use crate::operation::ListFolders;
use crate::session::{MailboxSession, RetryPolicy};
use crate::shutdown::Shutdown;
use crate::sweep::{SweepRequest, SweepSummary, run_sweep};
use std::sync::Arc;

/// Bulk IMAP client: one account, one batch configuration.
pub struct MailboxClient {
    config: Arc<ImapConfig>,
    batch: BatchConfig,
}

impl MailboxClient {
    #[must_use]
    pub fn new(config: ImapConfig, batch: BatchConfig) -> Self {
        Self {
            config: Arc::new(config),
            batch,
        }
    }

    #[must_use]
    pub const fn batch(&self) -> &BatchConfig {
        &self.batch
    }

    /// List all available IMAP folders
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or LIST command fails.
    pub async fn list_folders(&self) -> Result<Vec<String>> {
        let mut session =
            MailboxSession::new(0, Arc::clone(&self.config), RetryPolicy::from(&self.batch));
        let names = session.execute(&ListFolders).await;
        session.logout().await;
        names
    }

    /// Count messages per sender in `folder`
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be opened or searched.
    pub async fn sender_census(
        &self,
        folder: &str,
        min_count: usize,
        shutdown: &Shutdown,
    ) -> Result<CensusReport> {
        run_census(
            Arc::clone(&self.config),
            &self.batch,
            folder,
            min_count,
            shutdown,
        )
        .await
    }

    /// Move every message from the requested senders to the destination
    /// folder (or only count them in dry-run mode)
    ///
    /// # Errors
    ///
    /// Returns an error if the request is empty, the run was cancelled
    /// before it started, or the source folder cannot be opened or
    /// searched.
    pub async fn sweep(&self, request: &SweepRequest, shutdown: &Shutdown) -> Result<SweepSummary> {
        run_sweep(Arc::clone(&self.config), &self.batch, request, shutdown).await
    }
}
