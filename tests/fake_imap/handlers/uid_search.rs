//! UID SEARCH command handler.
//!
//! Matches emails against parsed `SearchKey` criteria from imap-types.
//! Supported keys:
//!
//! - `ALL`
//! - `FROM <string>` -- case-insensitive substring of the From header
//! - `DELETED` / `UNDELETED` -- `\Deleted` flag filtering
//! - `AND`, `OR`, `NOT` -- logical combinators
//!
//! Anything else matches nothing. The response format (RFC 3501
//! Section 7.2.5):
//!
//! ```text
//! * SEARCH 1 2 3
//! A0003 OK SEARCH completed
//! ```

use crate::fake_imap::io::{reply, write_line};
use crate::fake_imap::mailbox::{Mailbox, TestEmail};
use imap_codec::imap_types::search::SearchKey;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_uid_search<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    criteria: &[SearchKey<'_>],
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        reply(stream, tag, "BAD No folder selected").await;
        return;
    };
    let Some(folder) = mailbox.get_folder(folder_name) else {
        reply(stream, tag, "BAD Folder not found").await;
        return;
    };

    let uids: Vec<String> = folder
        .emails
        .iter()
        .filter(|e| criteria.iter().all(|key| matches_key(e, key)))
        .map(|e| e.uid.to_string())
        .collect();

    let line = if uids.is_empty() {
        "* SEARCH\r\n".to_string()
    } else {
        format!("* SEARCH {}\r\n", uids.join(" "))
    };
    if write_line(stream, &line).await.is_err() {
        return;
    }
    reply(stream, tag, "OK SEARCH completed").await;
}

fn matches_key(email: &TestEmail, key: &SearchKey<'_>) -> bool {
    match key {
        SearchKey::All => true,
        SearchKey::Deleted => email.deleted,
        SearchKey::Undeleted => !email.deleted,
        SearchKey::From(needle) => {
            let needle = String::from_utf8_lossy(needle.as_ref());
            email.from_matches(&needle)
        }
        SearchKey::And(keys) => keys.as_ref().iter().all(|k| matches_key(email, k)),
        SearchKey::Or(a, b) => matches_key(email, a) || matches_key(email, b),
        SearchKey::Not(k) => !matches_key(email, k),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::test_support::output;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use imap_codec::imap_types::core::AString;

    async fn run(criteria: &[SearchKey<'_>], mailbox: &Mailbox, selected: Option<&str>) -> String {
        let (client, server) = tokio::io::duplex(8192);
        let mut stream = BufReader::new(server);
        handle_uid_search("A1", criteria, mailbox, selected, &mut stream).await;
        drop(stream);
        output(client).await
    }

    fn from(address: &'static str) -> SearchKey<'static> {
        SearchKey::From(AString::try_from(address).unwrap())
    }

    fn mailbox() -> Mailbox {
        let mut mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .from_sender("a@x.com", 2)
            .from_sender("b@y.com", 2)
            .build();
        mailbox.get_folder_mut("INBOX").unwrap().emails[0].deleted = true;
        mailbox
    }

    #[tokio::test]
    async fn all_returns_every_uid() {
        let output = run(&[SearchKey::All], &mailbox(), Some("INBOX")).await;
        assert!(output.contains("* SEARCH 1 2 3 4\r\n"));
        assert!(output.ends_with("A1 OK SEARCH completed\r\n"));
    }

    #[tokio::test]
    async fn from_is_case_insensitive_substring() {
        let output = run(&[from("B@Y.COM")], &mailbox(), Some("INBOX")).await;
        assert!(output.contains("* SEARCH 3 4\r\n"));
    }

    #[tokio::test]
    async fn undeleted_from_skips_flagged() {
        let output = run(
            &[SearchKey::Undeleted, from("a@x.com")],
            &mailbox(),
            Some("INBOX"),
        )
        .await;
        assert!(output.contains("* SEARCH 2\r\n"));
    }

    #[tokio::test]
    async fn deleted_only() {
        let output = run(&[SearchKey::Deleted], &mailbox(), Some("INBOX")).await;
        assert!(output.contains("* SEARCH 1\r\n"));
    }

    #[tokio::test]
    async fn no_match_is_empty_search() {
        let output = run(&[from("nobody@z.com")], &mailbox(), Some("INBOX")).await;
        assert!(output.contains("* SEARCH\r\n"));
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let output = run(&[SearchKey::All], &mailbox(), None).await;
        assert_eq!(output, "A1 BAD No folder selected\r\n");
    }
}
