//! UID FETCH command handler.
//!
//! Message data travels as **counted literals**:
//!
//! ```text
//! * <seq> FETCH (UID <uid> BODY[HEADER.FIELDS (FROM)] {<length>}
//! <exactly length bytes>
//! )
//! ```
//!
//! The `{length}\r\n` marker tells the client that the next `length`
//! bytes are raw data, not protocol text. The sequence number is the
//! 1-based position of the message in the folder.

use crate::fake_imap::handlers::extract_uids;
use crate::fake_imap::io::{reply, write_bytes, write_line};
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::SequenceSet;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Which part of each message is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// `BODY[]`
    Full,
    /// `BODY[HEADER.FIELDS (FROM)]`
    FromHeader,
}

pub async fn handle_uid_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    kind: FetchKind,
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

    for uid in extract_uids(sequence_set, folder.max_uid()) {
        let Some((idx, email)) = folder.emails.iter().enumerate().find(|(_, e)| e.uid == uid)
        else {
            continue;
        };
        let (section, data) = match kind {
            FetchKind::Full => ("BODY[]", email.raw.clone()),
            FetchKind::FromHeader => ("BODY[HEADER.FIELDS (FROM)]", email.from_header()),
        };
        let seq = idx + 1;
        let header = format!("* {seq} FETCH (UID {uid} {section} {{{}}}\r\n", data.len());
        if write_line(stream, &header).await.is_err()
            || write_bytes(stream, &data).await.is_err()
            || write_line(stream, ")\r\n").await.is_err()
        {
            return;
        }
    }

    reply(stream, tag, "OK FETCH completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::test_support::{output, uid_range, uid_set};
    use crate::fake_imap::mailbox::MailboxBuilder;

    async fn run(set: &SequenceSet, kind: FetchKind, mailbox: &Mailbox) -> String {
        let (client, server) = tokio::io::duplex(16384);
        let mut stream = BufReader::new(server);
        handle_uid_fetch("A1", set, kind, mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);
        output(client).await
    }

    fn mailbox() -> Mailbox {
        MailboxBuilder::new()
            .folder("INBOX")
            .email(42, b"Subject: Hi\r\nFrom: a@b.com\r\n\r\nBody")
            .build()
    }

    #[tokio::test]
    async fn from_header_only() {
        let output = run(&uid_set(&[42]), FetchKind::FromHeader, &mailbox()).await;

        assert!(output.contains("* 1 FETCH (UID 42 BODY[HEADER.FIELDS (FROM)] {17}\r\n"));
        assert!(output.contains("From: a@b.com\r\n\r\n)"));
        assert!(!output.contains("Subject"));
        assert!(output.ends_with("A1 OK FETCH completed\r\n"));
    }

    #[tokio::test]
    async fn full_body_literal_length() {
        let raw_len = mailbox().folders[0].emails[0].raw.len();
        let output = run(&uid_set(&[42]), FetchKind::Full, &mailbox()).await;
        assert!(output.contains(&format!("BODY[] {{{raw_len}}}")));
        assert!(output.contains("Subject: Hi"));
    }

    #[tokio::test]
    async fn range_skips_missing_uids() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .from_sender("a@x.com", 3)
            .build();
        let output = run(&uid_range(2, 9), FetchKind::FromHeader, &mailbox).await;
        assert_eq!(output.matches(" FETCH (UID ").count(), 2);
        assert!(output.contains("UID 2 "));
        assert!(output.contains("UID 3 "));
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        handle_uid_fetch("A1", &uid_set(&[1]), FetchKind::Full, &mailbox(), None, &mut stream)
            .await;
        drop(stream);
        assert_eq!(output(client).await, "A1 BAD No folder selected\r\n");
    }
}
