//! Bulk IMAP mailbox operations
//!
//! Counts messages per sender and moves whole senders to the trash over
//! plain IMAP, tens of thousands of messages at a time. Work is split
//! into fixed-size chunks of UIDs and spread over a small pool of
//! workers, each with its own connection. Connection failures are
//! retried with a fresh login; a Ctrl-C stops dispatch and logs every
//! session out.
//!
//! Moves are `UID COPY` followed by `UID STORE +FLAGS (\Deleted)` per
//! chunk and a single `EXPUNGE` at the end, so a message is never
//! flagged before its copy was acknowledged.

pub mod batch;
pub mod census;
mod client;
pub mod config;
mod connection;
mod error;
pub mod operation;
pub mod pool;
pub mod session;
pub mod shutdown;
pub mod sweep;

pub use batch::{Chunk, Chunks, Uid, plan};
pub use census::{CensusReport, SenderRecord, SenderTable, extract_sender};
pub use client::MailboxClient;
pub use config::{BatchConfig, ImapConfig, Security};
pub use connection::ImapSession;
pub use error::{Error, Result};
pub use session::{MailboxSession, Operation, RetryPolicy, Selection};
pub use shutdown::Shutdown;
pub use sweep::{SweepRequest, SweepSummary};
