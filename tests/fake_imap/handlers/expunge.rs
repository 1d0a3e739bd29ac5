//! EXPUNGE command handler.
//!
//! Permanently removes every `\Deleted` message from the selected
//! folder and sends `* N EXPUNGE` for each, where N is the sequence
//! number at the moment of removal (so it shifts down as earlier
//! messages go).

use crate::fake_imap::io::{reply, write_line};
use crate::fake_imap::mailbox::Mailbox;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Remove flagged messages under the lock, returning the sequence
/// numbers to report.
fn expunge(mailbox: &Mutex<Mailbox>, folder_name: &str) -> Option<Vec<usize>> {
    let mut mb = mailbox.lock().unwrap();
    let folder = mb.get_folder_mut(folder_name)?;

    let mut seqs = Vec::new();
    let mut removed = 0;
    for (idx, email) in folder.emails.iter().enumerate() {
        if email.deleted {
            seqs.push(idx + 1 - removed);
            removed += 1;
        }
    }
    folder.emails.retain(|e| !e.deleted);
    drop(mb);
    Some(seqs)
}

pub async fn handle_expunge<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    read_only: bool,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        reply(stream, tag, "BAD No folder selected").await;
        return;
    };
    if read_only {
        reply(stream, tag, "NO Folder is read-only").await;
        return;
    }
    let Some(seqs) = expunge(mailbox, folder_name) else {
        reply(stream, tag, "BAD Folder not found").await;
        return;
    };

    for seq in &seqs {
        if write_line(stream, &format!("* {seq} EXPUNGE\r\n")).await.is_err() {
            return;
        }
    }
    reply(stream, tag, "OK EXPUNGE completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::test_support::output;
    use crate::fake_imap::mailbox::MailboxBuilder;

    async fn run(mailbox: &Mutex<Mailbox>, read_only: bool) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);
        handle_expunge("A1", mailbox, Some("INBOX"), read_only, &mut stream).await;
        drop(stream);
        output(client).await
    }

    fn mailbox_with_flags(flags: &[bool]) -> Mutex<Mailbox> {
        let mut mb = MailboxBuilder::new()
            .folder("INBOX")
            .from_sender("a@x.com", flags.len())
            .build();
        let inbox = mb.get_folder_mut("INBOX").unwrap();
        for (email, flag) in inbox.emails.iter_mut().zip(flags) {
            email.deleted = *flag;
        }
        Mutex::new(mb)
    }

    #[tokio::test]
    #[allow(clippy::significant_drop_tightening)]
    async fn sequence_numbers_shift_as_messages_go() {
        let mb = mailbox_with_flags(&[true, false, true, true]);

        let output = run(&mb, false).await;

        assert_eq!(
            output,
            "* 1 EXPUNGE\r\n* 2 EXPUNGE\r\n* 2 EXPUNGE\r\nA1 OK EXPUNGE completed\r\n"
        );
        let locked = mb.lock().unwrap();
        let left: Vec<u32> = locked.get_folder("INBOX").unwrap().emails.iter().map(|e| e.uid).collect();
        assert_eq!(left, vec![2]);
    }

    #[tokio::test]
    async fn nothing_flagged_is_noop() {
        let mb = mailbox_with_flags(&[false, false]);
        let output = run(&mb, false).await;
        assert_eq!(output, "A1 OK EXPUNGE completed\r\n");
        assert_eq!(mb.lock().unwrap().get_folder("INBOX").unwrap().emails.len(), 2);
    }

    #[tokio::test]
    async fn read_only_folder_refuses_expunge() {
        let mb = mailbox_with_flags(&[true]);
        let output = run(&mb, true).await;
        assert!(output.starts_with("A1 NO"));
        assert_eq!(mb.lock().unwrap().get_folder("INBOX").unwrap().emails.len(), 1);
    }
}
