//! LOGOUT command handler.
//!
//! The server sends a BYE untagged response (indicating the connection
//! is ending) followed by the tagged OK.

use crate::fake_imap::io::{reply, write_line};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the LOGOUT command. Sends BYE + tagged OK.
pub async fn handle_logout<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) {
    let _ = write_line(stream, "* BYE Logging out\r\n").await;
    reply(stream, tag, "OK LOGOUT completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::test_support::output;

    #[tokio::test]
    async fn bye_comes_before_ok() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        handle_logout("X1", &mut stream).await;
        drop(stream);

        let output = output(client).await;
        let bye_pos = output.find("* BYE").unwrap();
        let ok_pos = output.find("X1 OK LOGOUT completed").unwrap();
        assert!(bye_pos < ok_pos);
    }
}
