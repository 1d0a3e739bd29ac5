//! Protocol actions run through [`MailboxSession::execute`]
//!
//! Each action drains its response stream before returning so the
//! connection is ready for the next command.
//!
//! [`MailboxSession::execute`]: crate::session::MailboxSession::execute

use crate::batch::Uid;
use crate::connection::ImapSession;
use crate::error::{Error, Result};
use crate::session::Operation;
use futures::TryStreamExt;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::debug;

/// Header section fetched for the sender census.
pub const FROM_HEADER_QUERY: &str = "(UID BODY.PEEK[HEADER.FIELDS (FROM)])";

/// Flag update applied after a successful copy.
pub const MARK_DELETED: &str = "+FLAGS.SILENT (\\Deleted)";

/// Build a search for live (not yet flagged) messages from `address`.
#[must_use]
pub fn search_from(address: &str) -> String {
    format!("UNDELETED FROM {}", quote(address))
}

/// Quote a value as an IMAP quoted string.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// `UID SEARCH` returning matching UIDs in ascending order.
pub struct Search {
    pub query: String,
}

impl Operation for Search {
    type Output = Vec<Uid>;

    fn name(&self) -> &'static str {
        "UID SEARCH"
    }

    fn run<'a>(
        &'a self,
        session: &'a mut ImapSession,
    ) -> impl Future<Output = Result<Vec<Uid>>> + Send + 'a {
        async move {
            let uids = session
                .uid_search(&self.query)
                .await
                .map_err(|e| Error::from_imap(&format!("UID SEARCH {}", self.query), e))?;
            let mut uids: Vec<Uid> = uids.into_iter().collect();
            uids.sort_unstable();
            Ok(uids)
        }
    }
}

/// `UID FETCH` of the `From` header for a UID set.
///
/// Keyed by UID so a server repeating a FETCH line (or slipping in an
/// unsolicited one) cannot inflate the result.
pub struct FetchHeaders<'s> {
    pub uid_set: &'s str,
}

impl Operation for FetchHeaders<'_> {
    type Output = BTreeMap<Uid, Vec<u8>>;

    fn name(&self) -> &'static str {
        "UID FETCH"
    }

    fn run<'a>(
        &'a self,
        session: &'a mut ImapSession,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a {
        async move {
            let fetches: Vec<_> = session
                .uid_fetch(self.uid_set, FROM_HEADER_QUERY)
                .await
                .map_err(|e| Error::from_imap("UID FETCH", e))?
                .try_collect()
                .await
                .map_err(|e| Error::from_imap("UID FETCH", e))?;

            let mut headers = BTreeMap::new();
            for fetch in &fetches {
                let Some(uid) = fetch.uid else {
                    continue;
                };
                if let Some(bytes) = fetch.header().or_else(|| fetch.body()) {
                    headers.insert(uid, bytes.to_vec());
                }
            }
            Ok(headers)
        }
    }
}

/// `UID COPY` to `destination`, then `UID STORE +FLAGS (\Deleted)` on
/// the same set.
///
/// The store only runs once the copy has been acknowledged, and a
/// retry replays both steps, so no message is flagged without a copy.
pub struct MoveChunk<'s> {
    pub uid_set: &'s str,
    pub destination: &'s str,
}

impl Operation for MoveChunk<'_> {
    type Output = ();

    fn name(&self) -> &'static str {
        "UID COPY+STORE"
    }

    fn run<'a>(
        &'a self,
        session: &'a mut ImapSession,
    ) -> impl Future<Output = Result<()>> + Send + 'a {
        async move {
            session
                .uid_copy(self.uid_set, self.destination)
                .await
                .map_err(|e| Error::from_imap(&format!("UID COPY to {}", self.destination), e))?;

            let updates: Vec<_> = session
                .uid_store(self.uid_set, MARK_DELETED)
                .await
                .map_err(|e| Error::from_imap("UID STORE", e))?
                .try_collect()
                .await
                .map_err(|e| Error::from_imap("UID STORE", e))?;
            debug!(updates = updates.len(), "Flagged chunk as deleted");
            Ok(())
        }
    }
}

/// `EXPUNGE`, returning how many messages were removed.
pub struct Purge;

impl Operation for Purge {
    type Output = usize;

    fn name(&self) -> &'static str {
        "EXPUNGE"
    }

    fn run<'a>(
        &'a self,
        session: &'a mut ImapSession,
    ) -> impl Future<Output = Result<usize>> + Send + 'a {
        async move {
            let removed: Vec<_> = session
                .expunge()
                .await
                .map_err(|e| Error::from_imap("EXPUNGE", e))?
                .try_collect()
                .await
                .map_err(|e| Error::from_imap("EXPUNGE", e))?;
            Ok(removed.len())
        }
    }
}

/// `LIST "" "*"`, returning folder names in server order.
pub struct ListFolders;

impl Operation for ListFolders {
    type Output = Vec<String>;

    fn name(&self) -> &'static str {
        "LIST"
    }

    fn run<'a>(
        &'a self,
        session: &'a mut ImapSession,
    ) -> impl Future<Output = Result<Vec<String>>> + Send + 'a {
        async move {
            let names: Vec<_> = session
                .list(Some(""), Some("*"))
                .await
                .map_err(|e| Error::from_imap("LIST", e))?
                .try_collect()
                .await
                .map_err(|e| Error::from_imap("LIST", e))?;
            Ok(names.iter().map(|n| n.name().to_string()).collect())
        }
    }
}
