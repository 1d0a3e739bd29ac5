//! Resilient mailbox session
//!
//! [`MailboxSession`] owns one connection and remembers which folder
//! (and in which mode) it has selected. Every protocol action goes
//! through [`MailboxSession::execute`], which bounds the call with the
//! configured timeout and, on connection-level failure, reconnects,
//! reselects and retries the whole action up to the attempt budget.

use crate::config::{BatchConfig, ImapConfig};
use crate::connection::{self, ImapSession, bounded};
use crate::error::{Error, Result};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempt budget and timing shared by every protocol call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub attempts: NonZeroU32,
    /// Fixed pause before each reconnect.
    pub delay: Duration,
    /// Upper bound on a single network call.
    pub timeout: Duration,
}

impl From<&BatchConfig> for RetryPolicy {
    fn from(config: &BatchConfig) -> Self {
        Self {
            attempts: config.retries,
            delay: config.retry_delay,
            timeout: config.timeout,
        }
    }
}

/// A folder together with the mode it is opened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub folder: String,
    pub read_only: bool,
}

impl Selection {
    #[must_use]
    pub fn read_only(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            read_only: true,
        }
    }

    #[must_use]
    pub fn read_write(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            read_only: false,
        }
    }
}

/// One protocol action that can be replayed on a fresh connection.
///
/// Implementations must be safe to run again from the start after a
/// connection failure: the retry wrapper restarts the whole action.
pub trait Operation: Sync {
    type Output: Send;

    /// Short label used in logs and error messages.
    fn name(&self) -> &'static str;

    fn run<'a>(
        &'a self,
        session: &'a mut ImapSession,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a;
}

/// SELECT or EXAMINE, returning the message count.
struct Open<'s> {
    selection: &'s Selection,
}

impl Operation for Open<'_> {
    type Output = u32;

    fn name(&self) -> &'static str {
        if self.selection.read_only {
            "EXAMINE"
        } else {
            "SELECT"
        }
    }

    fn run<'a>(
        &'a self,
        session: &'a mut ImapSession,
    ) -> impl Future<Output = Result<u32>> + Send + 'a {
        async move { open_folder(session, self.selection).await }
    }
}

async fn open_folder(session: &mut ImapSession, selection: &Selection) -> Result<u32> {
    let folder = selection.folder.as_str();
    let mailbox = if selection.read_only {
        session
            .examine(folder)
            .await
            .map_err(|e| Error::from_imap(&format!("EXAMINE {folder}"), e))?
    } else {
        session
            .select(folder)
            .await
            .map_err(|e| Error::from_imap(&format!("SELECT {folder}"), e))?
    };
    Ok(mailbox.exists)
}

/// One authenticated connection bound to at most one selected folder.
///
/// Owned by exactly one worker. A reconnect replaces the underlying
/// handle but keeps the remembered selection, so the next call
/// reselects automatically.
pub struct MailboxSession {
    id: usize,
    config: Arc<ImapConfig>,
    policy: RetryPolicy,
    selection: Option<Selection>,
    handle: Option<ImapSession>,
}

impl MailboxSession {
    /// Create a disconnected session; nothing touches the network yet.
    #[must_use]
    pub const fn new(id: usize, config: Arc<ImapConfig>, policy: RetryPolicy) -> Self {
        Self {
            id,
            config,
            policy,
            selection: None,
            handle: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// The folder this session is bound to, if any.
    #[must_use]
    pub const fn selected(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// (Re)establish the connection, replacing any existing handle,
    /// and reselect the remembered folder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if the server cannot be reached
    /// or the handshake fails, and [`Error::Protocol`] if the server
    /// rejects the credentials or the remembered folder.
    pub async fn connect(&mut self) -> Result<()> {
        self.discard_handle().await;

        let mut handle = connection::connect(&self.config, self.policy.timeout).await?;
        if let Some(selection) = &self.selection {
            let reopened = bounded(
                self.policy.timeout,
                "reselect",
                open_folder(&mut handle, selection),
            )
            .await;
            if let Err(e) = reopened {
                // Already logged in, so log out before giving up.
                self.handle = Some(handle);
                self.discard_handle().await;
                return Err(e);
            }
            debug!(session = self.id, folder = %selection.folder, "Reselected folder");
        }
        self.handle = Some(handle);
        info!(session = self.id, host = %self.config.host, "Session connected");
        Ok(())
    }

    /// Bind the session to `folder`, remembering it for reconnects.
    ///
    /// Returns the number of messages in the folder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the folder does not exist, or the
    /// last connectivity error once the retry budget is spent.
    pub async fn select(&mut self, folder: &str, read_only: bool) -> Result<u32> {
        let selection = Selection {
            folder: folder.to_string(),
            read_only,
        };
        // Cleared first so a reconnect inside execute() does not
        // reselect the previous folder before the new one is opened.
        self.selection = None;
        let exists = self.execute(&Open { selection: &selection }).await?;
        info!(
            session = self.id,
            %folder,
            read_only,
            exists,
            "Folder selected"
        );
        self.selection = Some(selection);
        Ok(exists)
    }

    /// Run `op`, reconnecting and retrying on connection-level failure.
    ///
    /// # Errors
    ///
    /// Non-retryable errors surface immediately; retryable ones surface
    /// once `policy.attempts` attempts have failed.
    pub async fn execute<O: Operation>(&mut self, op: &O) -> Result<O::Output> {
        let attempts = self.policy.attempts.get();
        let mut attempt = 1;
        loop {
            match self.attempt(op).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() => {
                    self.handle = None;
                    if attempt >= attempts {
                        warn!(
                            session = self.id,
                            op = op.name(),
                            attempts,
                            error = %e,
                            "Retry budget exhausted"
                        );
                        return Err(e);
                    }
                    warn!(
                        session = self.id,
                        op = op.name(),
                        attempt,
                        attempts,
                        error = %e,
                        "Connection failure, reconnecting"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt<O: Operation>(&mut self, op: &O) -> Result<O::Output> {
        if self.handle.is_none() {
            self.connect().await?;
        }
        let limit = self.policy.timeout;
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::Connectivity("no connection".into()))?;
        bounded(limit, op.name(), op.run(handle)).await
    }

    /// Best-effort LOGOUT; teardown errors are absorbed.
    ///
    /// CLOSE is deliberately never sent: in read-write mode it expunges
    /// flagged messages as a side effect.
    pub async fn logout(&mut self) {
        if self.handle.is_some() {
            self.discard_handle().await;
            info!(session = self.id, "Session logged out");
        }
    }

    async fn discard_handle(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        let limit = self.policy.timeout.min(Duration::from_secs(5));
        match tokio::time::timeout(limit, handle.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = self.id, error = %e, "Ignoring LOGOUT failure"),
            Err(_) => debug!(session = self.id, "Ignoring LOGOUT timeout"),
        }
    }
}
