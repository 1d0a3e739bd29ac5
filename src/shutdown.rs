//! Cooperative cancellation
//!
//! A [`Shutdown`] is a one-way flag shared by every worker of a run.
//! Workers check it between chunks; a call already on the wire is left
//! to finish or fail on its own.

use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A shutdown that fires on the first Ctrl-C.
    ///
    /// The listener task lives until the signal arrives or the runtime
    /// stops.
    #[must_use]
    pub fn on_ctrl_c() -> Self {
        let shutdown = Self::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight batches");
                trigger.trigger();
            }
        });
        shutdown
    }

    /// Set the flag. Idempotent; it is never cleared.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the flag is set.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }
}
