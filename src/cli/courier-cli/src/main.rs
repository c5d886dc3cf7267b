//! Courier CLI - Field encryption and key version operations.

use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

use courier_crypto::random::{generate_passphrase, generate_salt};
use courier_keyring::config::DEFAULT_SECRET_NAME;
use courier_keyring::{FieldProtector, KeyResolver, KeyRingConfig, Recovered};
use courier_storage::{KeyVersionRow, KeyVersionStore};
use courier_storage_sqlite::SqliteBackend;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier CLI - Encrypt, decrypt and blind-index field values")]
#[command(version)]
struct Cli {
    /// Directory holding tenant key stores
    #[arg(long, default_value = "data", env = "COURIER_DATA_DIR")]
    data_dir: PathBuf,

    /// Tenant whose key store is used
    #[arg(long, default_value = "default", env = "COURIER_TENANT")]
    tenant: String,

    /// Name of the secret holding the key version payload
    #[arg(long, default_value = DEFAULT_SECRET_NAME, env = "COURIER_SECRET_NAME")]
    secret_name: String,

    /// Timeout for each key source, in milliseconds
    #[arg(long, default_value = "10000", env = "COURIER_SOURCE_TIMEOUT_MS")]
    source_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a value under the active key version
    Encrypt {
        /// Plaintext
        text: String,
    },
    /// Decrypt an envelope
    Decrypt {
        /// Envelope (or legacy plaintext with --best-effort)
        text: String,
        /// Try retired key versions and pass plaintext through
        #[arg(long)]
        best_effort: bool,
        /// Caller reported in orphaned-value warnings
        #[arg(long, default_value = "courier-cli")]
        caller: String,
        /// Subject id reported in orphaned-value warnings
        #[arg(long, default_value = "-")]
        subject: String,
    },
    /// Compute the blind index of a value
    BlindIndex {
        /// Value to index
        text: String,
    },
    /// Re-encrypt an envelope under the active key version
    Rewrap {
        /// Envelope
        text: String,
        /// Caller reported in orphaned-value warnings
        #[arg(long, default_value = "courier-cli")]
        caller: String,
        /// Subject id reported in orphaned-value warnings
        #[arg(long, default_value = "-")]
        subject: String,
    },
    /// Show key ring status as JSON
    Status,
    /// Key version management
    Keys {
        #[command(subcommand)]
        command: KeysCommands,
    },
}

#[derive(Subcommand)]
enum KeysCommands {
    /// Add a key version with a fresh random salt
    Add {
        /// Version id (defaults to the highest existing id + 1)
        #[arg(long)]
        id: Option<u32>,
        /// Passphrase (or read from stdin if not provided)
        #[arg(long, conflicts_with = "generate")]
        passphrase: Option<String>,
        /// Generate a random passphrase instead of reading one
        #[arg(long)]
        generate: bool,
        /// Make the new version the active one
        #[arg(long)]
        activate: bool,
    },
    /// Make an existing key version the active one
    Activate {
        /// Version id
        id: u32,
    },
    /// Delete a key version; data encrypted under it becomes orphaned
    Remove {
        /// Version id
        id: u32,
    },
    /// List key version ids
    List,
    /// Store the secret store payload (JSON read from stdin)
    PutSecret,
}

// ============================================================================
// Wiring
// ============================================================================

async fn open_store(cli: &Cli) -> Result<Arc<SqliteBackend>> {
    let store = SqliteBackend::open(&cli.data_dir, &cli.tenant)
        .await
        .with_context(|| format!("Failed to open key store for tenant '{}'", cli.tenant))?;

    tracing::debug!(tenant = %cli.tenant, path = %store.db_path().display(), "Using key store");

    Ok(Arc::new(store))
}

fn protector(cli: &Cli, store: &Arc<SqliteBackend>) -> FieldProtector {
    let config = KeyRingConfig::new()
        .with_secret_name(cli.secret_name.clone())
        .with_source_timeout(Duration::from_millis(cli.source_timeout_ms));

    FieldProtector::new(
        KeyResolver::new(config)
            .with_secret_store(store.clone())
            .with_key_store(store.clone()),
    )
}

/// One past the highest existing key version id, or 1 for an empty store.
fn next_key_version_id(ids: impl IntoIterator<Item = u32>) -> Result<u32> {
    match ids.into_iter().max() {
        None => Ok(1),
        Some(max) => match max.checked_add(1) {
            Some(next) => Ok(next),
            None => bail!("Key version id {max} is the highest possible, pass --id explicitly"),
        },
    }
}

fn read_line(prompt: &str) -> Result<Zeroizing<String>> {
    eprint!("{prompt}");
    io::stderr().flush()?;

    let mut line = Zeroizing::new(String::new());
    io::stdin().lock().read_line(&mut line)?;
    Ok(Zeroizing::new(line.trim().to_string()))
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn cmd_encrypt(protector: &FieldProtector, text: &str) -> Result<()> {
    let envelope = protector.encrypt(text).await.context("Encryption failed")?;
    let version = protector.active_key_version_id().await?;

    println!("{envelope}");
    eprintln!("key version: {version}");

    Ok(())
}

async fn cmd_decrypt(
    protector: &FieldProtector,
    text: &str,
    best_effort: bool,
    caller: &str,
    subject: &str,
) -> Result<()> {
    if !best_effort {
        let plaintext = protector.decrypt(text).await.context("Decryption failed")?;
        println!("{plaintext}");
        return Ok(());
    }

    match protector.decrypt_or_default(text, caller, subject).await? {
        Recovered::Plain(text) => {
            println!("{text}");
            eprintln!("value is not encrypted, returned as is");
        },
        Recovered::Decrypted {
            plaintext,
            key_version,
        } => {
            println!("{plaintext}");
            eprintln!("key version: {key_version}");
        },
        Recovered::Orphaned(_) => {
            bail!("No known key version decrypts the value");
        },
    }

    Ok(())
}

async fn cmd_blind_index(protector: &FieldProtector, text: &str) -> Result<()> {
    let token = protector.blind_index(text).await.context("Blind index failed")?;
    println!("{token}");
    Ok(())
}

async fn cmd_rewrap(protector: &FieldProtector, text: &str, caller: &str, subject: &str) -> Result<()> {
    let rewrapped = protector
        .rewrap(text, caller, subject)
        .await
        .context("Rewrap failed")?;

    println!("{}", rewrapped.envelope);
    eprintln!(
        "key version: {} -> {}",
        rewrapped.from_version, rewrapped.to_version
    );

    Ok(())
}

async fn cmd_status(protector: &FieldProtector) -> Result<()> {
    let warm_up = protector.warm_up().await;

    println!("{}", serde_json::to_string_pretty(&protector.status())?);

    warm_up.context("Key ring is not ready")
}

async fn cmd_keys_add(
    store: &SqliteBackend,
    id: Option<u32>,
    passphrase: Option<String>,
    generate: bool,
    activate: bool,
) -> Result<()> {
    let id = match id {
        Some(id) => id,
        None => {
            let existing = store.list_key_versions().await?;
            next_key_version_id(existing.iter().map(|row| row.id))?
        },
    };

    let passphrase = match passphrase {
        Some(p) => Zeroizing::new(p),
        None if generate => generate_passphrase(),
        None => read_line("Enter passphrase: ")?,
    };

    if passphrase.is_empty() {
        bail!("Passphrase cannot be empty");
    }

    let row = KeyVersionRow::new(id, passphrase.as_str(), generate_salt(), false);
    store
        .insert_key_version(&row)
        .await
        .with_context(|| format!("Failed to add key version {id}"))?;

    if activate {
        store.set_active_key_version(id).await?;
        println!("Key version {id} added and activated");
    } else {
        println!("Key version {id} added");
    }

    Ok(())
}

async fn cmd_keys_activate(store: &SqliteBackend, id: u32) -> Result<()> {
    store
        .set_active_key_version(id)
        .await
        .with_context(|| format!("Failed to activate key version {id}"))?;
    println!("Key version {id} is now active");
    Ok(())
}

async fn cmd_keys_remove(store: &SqliteBackend, id: u32) -> Result<()> {
    store.delete_key_version(id).await?;
    println!("Key version {id} removed");
    println!("Values still encrypted under it can no longer be decrypted.");
    Ok(())
}

async fn cmd_keys_list(store: &SqliteBackend) -> Result<()> {
    let rows = store.list_key_versions().await?;

    if rows.is_empty() {
        println!("No key versions found");
    } else {
        println!("Key versions:");
        for row in &rows {
            let marker = if row.active { " (active)" } else { "" };
            println!("  {}{}", row.id, marker);
        }
    }

    Ok(())
}

async fn cmd_keys_put_secret(store: &SqliteBackend, name: &str) -> Result<()> {
    let mut payload = Zeroizing::new(String::new());
    io::stdin()
        .read_to_string(&mut payload)
        .context("Failed to read payload from stdin")?;

    // Reject payloads the keyring could not use before storing them.
    let versions = courier_keyring::key_version::parse_secret_payload(&payload)?;
    if versions.is_empty() {
        bail!("Payload holds no key versions");
    }

    store.put_secret(name, &payload).await?;
    println!("Secret '{}' written ({} key versions)", name, versions.len());

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = open_store(&cli).await?;
    let protector = protector(&cli, &store);

    match &cli.command {
        Commands::Encrypt { text } => cmd_encrypt(&protector, text).await,
        Commands::Decrypt {
            text,
            best_effort,
            caller,
            subject,
        } => cmd_decrypt(&protector, text, *best_effort, caller, subject).await,
        Commands::BlindIndex { text } => cmd_blind_index(&protector, text).await,
        Commands::Rewrap {
            text,
            caller,
            subject,
        } => cmd_rewrap(&protector, text, caller, subject).await,
        Commands::Status => cmd_status(&protector).await,
        Commands::Keys { command } => match command {
            KeysCommands::Add {
                id,
                passphrase,
                generate,
                activate,
            } => cmd_keys_add(&store, *id, passphrase.clone(), *generate, *activate).await,
            KeysCommands::Activate { id } => cmd_keys_activate(&store, *id).await,
            KeysCommands::Remove { id } => cmd_keys_remove(&store, *id).await,
            KeysCommands::List => cmd_keys_list(&store).await,
            KeysCommands::PutSecret => cmd_keys_put_secret(&store, &cli.secret_name).await,
        },
    }
}
