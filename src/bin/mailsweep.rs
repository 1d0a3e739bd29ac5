#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for bulk IMAP cleanup: sender census and move-to-trash

use clap::{Parser, Subcommand};
use mailsweep::config::{load_address_file, normalize_addresses};
use mailsweep::{BatchConfig, Error, ImapConfig, MailboxClient, Shutdown, SweepRequest};
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailsweep")]
#[command(about = "Batched, retrying bulk operations against an IMAP mailbox")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Messages per batch
    #[arg(long, global = true, default_value = "100")]
    chunk_size: NonZeroUsize,

    /// Concurrent connections
    #[arg(long, global = true, default_value = "5")]
    workers: NonZeroUsize,

    /// Attempts per IMAP command, the first one included
    #[arg(long, global = true, default_value = "3")]
    retries: NonZeroU32,

    /// Seconds to wait before reconnecting
    #[arg(long, global = true, default_value = "2", value_parser = parse_secs)]
    retry_delay: Duration,

    /// Seconds before a network call is abandoned
    #[arg(long, global = true, default_value = "60", value_parser = parse_secs)]
    timeout: Duration,
}

#[derive(Subcommand)]
enum Command {
    /// List available IMAP folders
    Folders,

    /// Count messages per sender
    Senders {
        /// Folder to scan
        #[arg(default_value = "INBOX")]
        folder: String,

        /// Only show senders with at least this many messages
        #[arg(long, default_value = "10")]
        min_count: usize,
    },

    /// Move all messages from the given senders to the trash
    Sweep {
        /// Folder to clean up
        #[arg(long, default_value = "INBOX")]
        folder: String,

        /// Sender address (repeatable)
        #[arg(long, required_unless_present = "from_file", conflicts_with = "from_file")]
        from: Vec<String>,

        /// JSON file with sender addresses (`[...]` or `{"addresses": [...]}`)
        #[arg(long)]
        from_file: Option<PathBuf>,

        /// Destination folder
        #[arg(long, default_value = "[Gmail]/Trash")]
        trash: String,

        /// Only count what would be moved
        #[arg(long)]
        dry_run: bool,
    },
}

impl Args {
    const fn batch_config(&self, dry_run: bool) -> BatchConfig {
        BatchConfig {
            chunk_size: self.chunk_size,
            workers: self.workers,
            retries: self.retries,
            retry_delay: self.retry_delay,
            timeout: self.timeout,
            dry_run,
        }
    }
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|e| format!("Invalid number of seconds '{s}': {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid duration '{s}': {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ImapConfig::from_env()?;
    let shutdown = Shutdown::on_ctrl_c();

    match &args.command {
        Command::Folders => {
            let client = MailboxClient::new(config, args.batch_config(false));
            cmd_folders(&client, &args).await?;
        }
        Command::Senders { folder, min_count } => {
            let client = MailboxClient::new(config, args.batch_config(false));
            cmd_senders(&client, &args, folder, *min_count, &shutdown).await?;
        }
        Command::Sweep {
            folder,
            from,
            from_file,
            trash,
            dry_run,
        } => {
            let senders = match from_file {
                Some(path) => load_address_file(path)?,
                None => normalize_addresses(from)?,
            };
            let request = SweepRequest {
                source: folder.clone(),
                destination: trash.clone(),
                senders,
            };
            let client = MailboxClient::new(config, args.batch_config(*dry_run));
            cmd_sweep(&client, &args, &request, &shutdown).await?;
        }
    }

    Ok(())
}

async fn cmd_folders(client: &MailboxClient, args: &Args) -> anyhow::Result<()> {
    let folders = client.list_folders().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&folders)?);
    } else {
        for folder in &folders {
            println!("{folder}");
        }
    }

    Ok(())
}

async fn cmd_senders(
    client: &MailboxClient,
    args: &Args,
    folder: &str,
    min_count: usize,
    shutdown: &Shutdown,
) -> anyhow::Result<()> {
    let report = client.sender_census(folder, min_count, shutdown).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    Ok(())
}

async fn cmd_sweep(
    client: &MailboxClient,
    args: &Args,
    request: &SweepRequest,
    shutdown: &Shutdown,
) -> anyhow::Result<()> {
    let summary = match client.sweep(request, shutdown).await {
        Ok(summary) => summary,
        Err(Error::Cancelled) => {
            eprintln!("Interrupted before any message was moved");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{summary}");
    }

    Ok(())
}
