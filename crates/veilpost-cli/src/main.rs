//! Veilpost command-line front end.
//!
//! # Usage
//!
//! ```bash
//! # Show what a payload contains without decrypting it
//! veilpost inspect --network example.net '🎼4/4|...:||'
//!
//! # Decrypt against a local key store, reading the payload from stdin
//! veilpost decrypt --db keys.redb \
//!     --author person:example.net/alice --me person:example.net/bob -
//! ```
//!
//! Progress is logged; the result is printed to stdout as JSON.

mod offline;

use std::{
    error::Error,
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use veilpost_core::{
    DEFAULT_MAX_ATTEMPTS, DecryptionEvent, DecryptionRequest, Decryptor, DecryptorConfig,
    DiscoveryConfig, SystemEnv,
};
use veilpost_proto::{Payload, PersonIdentifier};
use veilpost_store::RedbStore;

use crate::offline::OfflineChannel;

/// Veilpost encrypted post tool
#[derive(Parser, Debug)]
#[command(name = "veilpost")]
#[command(about = "Inspect and decrypt veilpost payloads")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a payload and print its structure
    Inspect {
        /// Network the post was found on, to derive its post identifier
        #[arg(long)]
        network: Option<String>,

        /// Encoded payload, or `-` for stdin
        payload: String,
    },

    /// Decrypt a payload with the keys in a local store
    Decrypt(DecryptArgs),
}

#[derive(ClapArgs, Debug)]
struct DecryptArgs {
    /// Path to the key store
    #[arg(long)]
    db: PathBuf,

    /// Claimed author, e.g. `person:example.net/alice`
    #[arg(long)]
    author: PersonIdentifier,

    /// Local identity to decrypt as
    #[arg(long)]
    me: PersonIdentifier,

    /// Author key lookups before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Seconds to wait for a key announcement between lookups
    #[arg(long, default_value = "2")]
    wait_secs: u64,

    /// Encoded payload, or `-` for stdin
    payload: String,
}

/// JSON view of a decoded payload.
#[derive(Serialize)]
struct PayloadSummary {
    version: i8,
    read_only: bool,
    live_updates: bool,
    owner_keys: usize,
    iv: String,
    encrypted_bytes: usize,
    signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    post: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    match args.command {
        Command::Inspect { network, payload } => {
            inspect(&read_payload(payload)?, network.as_deref())
        },
        Command::Decrypt(decrypt_args) => decrypt(decrypt_args).await,
    }
}

fn read_payload(arg: String) -> io::Result<String> {
    if arg == "-" {
        Ok(io::read_to_string(io::stdin())?.trim().to_string())
    } else {
        Ok(arg)
    }
}

fn inspect(text: &str, network: Option<&str>) -> Result<(), Box<dyn Error>> {
    let payload = Payload::decode(text)?;
    let version = payload.version();
    let post = match network {
        Some(network) => Some(payload.post_identifier(network)?.to_string()),
        None => None,
    };

    let summary = PayloadSummary {
        version: version.number(),
        read_only: version.is_read_only(),
        live_updates: version.supports_live_updates(),
        owner_keys: payload.owner_key().blobs().count(),
        iv: hex::encode(payload.iv()),
        encrypted_bytes: payload.encrypted_text().len(),
        signed: payload.signature().is_some(),
        post,
    };

    writeln!(io::stdout().lock(), "{}", serde_json::to_string_pretty(&summary)?)?;
    Ok(())
}

async fn decrypt(args: DecryptArgs) -> Result<(), Box<dyn Error>> {
    let store = RedbStore::open(&args.db)?;
    let config = DecryptorConfig {
        discovery: DiscoveryConfig {
            max_attempts: args.max_attempts,
            wakeup_timeout: Some(Duration::from_secs(args.wait_secs)),
        },
    };
    let payload = read_payload(args.payload)?;
    let request = DecryptionRequest { payload, author: args.author, me: args.me };

    tracing::info!(author = %request.author, me = %request.me, "decrypting");

    let decryptor = Decryptor::new(store, OfflineChannel, SystemEnv::new(), config);
    let mut task = decryptor.spawn(request);

    while let Some(event) = task.next_event().await? {
        match event {
            DecryptionEvent::Progress(progress) => tracing::info!(?progress, "progress"),
            DecryptionEvent::Finished(result) => {
                writeln!(io::stdout().lock(), "{}", serde_json::to_string(&result)?)?;
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn decrypt_arguments_parse_identities() {
        let args = Args::try_parse_from([
            "veilpost",
            "decrypt",
            "--db",
            "keys.redb",
            "--author",
            "person:example.net/alice",
            "--me",
            "person:example.net/bob",
            "-",
        ])
        .unwrap();

        let Command::Decrypt(decrypt) = args.command else { panic!("expected decrypt") };
        assert_eq!(decrypt.author.user_id(), "alice");
        assert_eq!(decrypt.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(decrypt.wait_secs, 2);
    }

    #[test]
    fn malformed_identity_is_rejected() {
        let parsed = Args::try_parse_from([
            "veilpost", "decrypt", "--db", "k", "--author", "alice", "--me", "bob", "x",
        ]);
        assert!(parsed.is_err());
    }
}
