//! Connection and batch configuration

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::Path;
use std::time::Duration;

/// How the TCP connection is secured before LOGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (IMAPS, usually port 993).
    Tls,
    /// Plain connection upgraded with `STARTTLS` (usually port 143).
    StartTls,
}

impl Security {
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Tls => 993,
            Self::StartTls => 143,
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tls" | "imaps" | "ssl" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            other => Err(Error::Setup(format!(
                "Invalid IMAP_SECURITY '{other}' (expected tls or starttls)"
            ))),
        }
    }
}

/// IMAP account configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub security: Security,
    /// Skip certificate verification (self-signed bridges, test servers).
    pub accept_invalid_certs: bool,
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME` (or `GMAIL_ACCT`)
    /// - `IMAP_PASSWORD` (or `GMAIL_PASS`)
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `imap.gmail.com`)
    /// - `IMAP_SECURITY` (default: `tls`)
    /// - `IMAP_PORT` (default: `993`, or `143` with `starttls`)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let security = lookup("IMAP_SECURITY")
            .map_or(Ok(Security::Tls), |v| Security::parse(&v))?;

        let port = match lookup("IMAP_PORT") {
            Some(v) => v
                .parse()
                .map_err(|e| Error::Setup(format!("Invalid IMAP_PORT: {e}")))?,
            None => security.default_port(),
        };

        let accept_invalid_certs = match lookup("IMAP_ACCEPT_INVALID_CERTS") {
            Some(v) => parse_bool(&v).ok_or_else(|| {
                Error::Setup(format!("Invalid IMAP_ACCEPT_INVALID_CERTS: {v}"))
            })?,
            None => false,
        };

        Ok(Self {
            host: lookup("IMAP_HOST").unwrap_or_else(|| "imap.gmail.com".to_string()),
            port,
            username: lookup("IMAP_USERNAME")
                .or_else(|| lookup("GMAIL_ACCT"))
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Setup("IMAP_USERNAME not set".into()))?,
            password: lookup("IMAP_PASSWORD")
                .or_else(|| lookup("GMAIL_PASS"))
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Setup("IMAP_PASSWORD not set".into()))?,
            security,
            accept_invalid_certs,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

const DEFAULT_CHUNK_SIZE: NonZeroUsize = NonZeroUsize::new(100).unwrap();
const DEFAULT_WORKERS: NonZeroUsize = NonZeroUsize::new(5).unwrap();
const DEFAULT_RETRIES: NonZeroU32 = NonZeroU32::new(3).unwrap();

/// Tuning for the batch engine.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Identifiers per chunk; one chunk is one protocol command and one retry unit.
    pub chunk_size: NonZeroUsize,
    /// Concurrent workers, each with its own connection.
    pub workers: NonZeroUsize,
    /// Attempts per protocol operation, the first one included.
    pub retries: NonZeroU32,
    /// Pause before each reconnect.
    pub retry_delay: Duration,
    /// Upper bound on every network call.
    pub timeout: Duration,
    /// Search and count only; never COPY, STORE or EXPUNGE.
    pub dry_run: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
            dry_run: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressDocument {
    List(Vec<String>),
    Object { addresses: Vec<String> },
}

/// Normalize sender addresses: trim, lower-case, drop blanks and
/// duplicates while keeping first-seen order.
///
/// # Errors
///
/// Returns [`Error::Setup`] if an address is malformed or no address
/// remains.
pub fn normalize_addresses<I, S>(addresses: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for addr in addresses {
        let addr = addr.as_ref().trim().to_lowercase();
        if addr.is_empty() {
            continue;
        }
        check_address(&addr)?;
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    if out.is_empty() {
        return Err(Error::Setup("No sender addresses given".into()));
    }
    Ok(out)
}

/// Addresses end up inside IMAP command lines, so they must be a single
/// `local@domain` token with no whitespace, quotes or control characters.
fn check_address(addr: &str) -> Result<()> {
    let bad = |reason: &str| {
        Err(Error::Setup(format!("Invalid sender address {addr:?}: {reason}")))
    };
    if addr.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return bad("contains whitespace or control characters");
    }
    if addr.contains(['"', '\\', '<', '>']) {
        return bad("contains quoting characters");
    }
    match addr.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => bad("expected local@domain"),
    }
}

/// Parse a JSON sender list: either `["a@x.com", ...]` or
/// `{"addresses": ["a@x.com", ...]}`.
///
/// # Errors
///
/// Returns [`Error::Setup`] for malformed JSON or an empty list.
pub fn parse_address_document(json: &str) -> Result<Vec<String>> {
    let doc: AddressDocument = serde_json::from_str(json)
        .map_err(|e| Error::Setup(format!("Invalid sender list: {e}")))?;
    let list = match doc {
        AddressDocument::List(list) | AddressDocument::Object { addresses: list } => list,
    };
    normalize_addresses(list)
}

/// Read a JSON sender list from disk.
///
/// # Errors
///
/// Returns [`Error::Setup`] if the file cannot be read or parsed.
pub fn load_address_file(path: &Path) -> Result<Vec<String>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| Error::Setup(format!("Cannot read {}: {e}", path.display())))?;
    parse_address_document(&json)
}
