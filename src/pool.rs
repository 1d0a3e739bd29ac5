//! Worker coordination
//!
//! A [`WorkerPool`] hands planned chunks to a fixed number of workers.
//! Each worker owns exactly one [`MailboxSession`], created on its first
//! chunk and reused for every chunk after that. Workers pull chunks in
//! plan order from a shared queue and check the [`Shutdown`] flag before
//! every pull; whatever happens, each worker logs its session out before
//! the pool returns.
//!
//! With a single worker the pool runs on the calling task, which is the
//! plain sequential path: one session, one chunk loop.

use crate::batch::{Chunk, Chunks};
use crate::config::{BatchConfig, ImapConfig};
use crate::error::Result;
use crate::session::{MailboxSession, RetryPolicy, Selection};
use crate::shutdown::Shutdown;
use std::collections::BTreeSet;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Work applied to each chunk by a pool worker.
pub trait ChunkTask: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Folder and mode every worker session must be bound to.
    fn selection(&self) -> Selection;

    fn run<'a>(
        &'a self,
        session: &'a mut MailboxSession,
        chunk: &'a Chunk,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a;
}

/// Result of one dispatched chunk.
#[derive(Debug)]
pub struct ChunkOutcome<T> {
    pub index: usize,
    pub size: usize,
    pub worker: usize,
    pub result: Result<T>,
}

/// Everything a pool run produced.
#[derive(Debug)]
pub struct PoolReport<T> {
    /// One entry per dispatched chunk, ordered by chunk index.
    pub outcomes: Vec<ChunkOutcome<T>>,
    pub planned: usize,
    /// Dispatch stopped early because of the shutdown flag.
    pub cancelled: bool,
}

impl<T> PoolReport<T> {
    pub fn succeeded(&self) -> impl Iterator<Item = (&ChunkOutcome<T>, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (o, v)))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    #[must_use]
    pub const fn dispatched(&self) -> usize {
        self.outcomes.len()
    }
}

/// Ids of sessions that have been opened and not yet logged out.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    open: Arc<Mutex<BTreeSet<usize>>>,
}

impl SessionRegistry {
    pub fn register(&self, id: usize) {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    pub fn release(&self, id: usize) {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    #[must_use]
    pub fn open_sessions(&self) -> Vec<usize> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

struct Shared<T> {
    queue: Mutex<Chunks>,
    outcomes: Mutex<Vec<ChunkOutcome<T>>>,
    registry: SessionRegistry,
    planned: usize,
}

impl<T> Shared<T> {
    fn next_chunk(&self) -> Option<Chunk> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next()
    }

    fn record(&self, outcome: ChunkOutcome<T>) -> usize {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        outcomes.push(outcome);
        outcomes.len()
    }
}

/// Fixed-size pool of workers, each driving its own session.
///
/// Worker sessions are numbered from 1; id 0 is left to the caller's
/// own planning session.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: Arc<ImapConfig>,
    policy: RetryPolicy,
    workers: NonZeroUsize,
    shutdown: Shutdown,
    registry: SessionRegistry,
}

impl WorkerPool {
    #[must_use]
    pub fn new(config: Arc<ImapConfig>, batch: &BatchConfig, shutdown: Shutdown) -> Self {
        Self {
            config,
            policy: RetryPolicy::from(batch),
            workers: batch.workers,
            shutdown,
            registry: SessionRegistry::default(),
        }
    }

    /// Registry of sessions opened by this pool's workers.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Apply `task` to every chunk, returning once all workers have
    /// stopped and logged out.
    pub async fn run<T: ChunkTask>(&self, task: Arc<T>, chunks: Chunks) -> PoolReport<T::Output> {
        let planned = chunks.len();
        let shared = Arc::new(Shared {
            queue: Mutex::new(chunks),
            outcomes: Mutex::new(Vec::with_capacity(planned)),
            registry: self.registry.clone(),
            planned,
        });
        let workers = self.workers.get().min(planned);

        if workers <= 1 {
            if planned > 0 {
                self.worker(1, task).drive(&shared).await;
            }
        } else {
            info!(workers, chunks = planned, "Starting worker pool");
            let mut set = JoinSet::new();
            for id in 1..=workers {
                let worker = self.worker(id, Arc::clone(&task));
                let shared = Arc::clone(&shared);
                set.spawn(async move { worker.drive(&shared).await });
            }
            while let Some(joined) = set.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Worker task ended abnormally");
                }
            }
        }

        let leaked = self.registry.open_sessions();
        if !leaked.is_empty() {
            warn!(sessions = ?leaked, "Sessions still open after pool shutdown");
        }

        let mut outcomes = std::mem::take(
            &mut *shared
                .outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        outcomes.sort_by_key(|o| o.index);
        let cancelled = outcomes.len() < planned && self.shutdown.is_triggered();
        if cancelled {
            warn!(
                dispatched = outcomes.len(),
                planned, "Shutdown stopped dispatch early"
            );
        }

        PoolReport {
            outcomes,
            planned,
            cancelled,
        }
    }

    fn worker<T: ChunkTask>(&self, id: usize, task: Arc<T>) -> Worker<T> {
        Worker {
            id,
            task,
            config: Arc::clone(&self.config),
            policy: self.policy,
            shutdown: self.shutdown.clone(),
        }
    }
}

struct Worker<T> {
    id: usize,
    task: Arc<T>,
    config: Arc<ImapConfig>,
    policy: RetryPolicy,
    shutdown: Shutdown,
}

impl<T: ChunkTask> Worker<T> {
    async fn drive(self, shared: &Shared<T::Output>) {
        let mut session: Option<MailboxSession> = None;

        loop {
            if self.shutdown.is_triggered() {
                debug!(worker = self.id, "Shutdown observed, no further chunks");
                break;
            }
            let Some(chunk) = shared.next_chunk() else {
                break;
            };

            let session = session.get_or_insert_with(|| {
                shared.registry.register(self.id);
                MailboxSession::new(self.id, Arc::clone(&self.config), self.policy)
            });

            let result = self.process(session, &chunk).await;
            match &result {
                Ok(_) => debug!(
                    worker = self.id,
                    chunk = chunk.index(),
                    size = chunk.len(),
                    "Batch complete"
                ),
                Err(e) => warn!(
                    worker = self.id,
                    chunk = chunk.index(),
                    size = chunk.len(),
                    error = %e,
                    "Batch failed"
                ),
            }
            let done = shared.record(ChunkOutcome {
                index: chunk.index(),
                size: chunk.len(),
                worker: self.id,
                result,
            });
            info!(done, total = shared.planned, "Progress");
        }

        if let Some(mut session) = session {
            session.logout().await;
            shared.registry.release(self.id);
        }
    }

    async fn process(&self, session: &mut MailboxSession, chunk: &Chunk) -> Result<T::Output> {
        let wanted = self.task.selection();
        if session.selected() != Some(&wanted) {
            session.select(&wanted.folder, wanted.read_only).await?;
        }
        self.task.run(session, chunk).await
    }
}
