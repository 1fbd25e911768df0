//! cfold: end-to-end encrypted folder metadata CLI
//!
//! Commands:
//!   config show                      - display current configuration
//!   identity import / check          - store or verify the account key pair
//!   recovery-phrase                  - print a fresh recovery phrase
//!   e2e-errors                       - show and clear the E2E failure counter
//!   folder ls|add|rm|merge-filedrop|delete <id> - edit a folder's encrypted metadata

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cfold_core::config::{expand_tilde, CfoldConfig};
use cfold_core::FolderId;
use cfold_crypto::{generate_recovery_phrase, private_key_from_pem, Wordlist};
use cfold_secrets::{find_recovery_phrase, AccountStore, JsonFileStore};
use cfold_sync::{DecryptedFileEntry, DirRemote, FilePayload, FolderMetadataCoordinator};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "cfold",
    version,
    about = "cryptfold encrypted folder client",
    long_about = "cfold: manage the E2E identity and encrypted folder metadata of a cryptfold account"
)]
struct Cli {
    /// Path to cfold.toml configuration file
    #[arg(long, short = 'c', env = "CFOLD_CONFIG", default_value = "~/.config/cfold/cfold.toml")]
    config: PathBuf,

    /// Account to operate on (overrides store.account)
    #[arg(long, short = 'a', env = "CFOLD_ACCOUNT")]
    account: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Account key pair management
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Print a newly generated recovery phrase
    #[command(name = "recovery-phrase")]
    RecoveryPhrase {
        /// Number of words (overrides crypto.recovery_words)
        #[arg(long, short = 'w')]
        words: Option<usize>,
    },

    /// Show and clear the count of failed E2E verifications
    #[command(name = "e2e-errors")]
    E2eErrors,

    /// Encrypted folder metadata
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum IdentityAction {
    /// Store a certificate and private key, protected by a new recovery phrase
    ///
    /// The phrase is printed once; without it the private key cannot be unlocked.
    Import {
        /// PEM X.509 certificate
        #[arg(long)]
        certificate: PathBuf,
        /// PEM PKCS#8 private key
        #[arg(long)]
        private_key: PathBuf,
        /// Replace an identity that is already stored
        #[arg(long)]
        force: bool,
    },

    /// Unlock the private key and check it against the certificate
    Check,

    /// Delete the stored key pair and recovery phrase
    Remove,
}

#[derive(Subcommand, Debug)]
enum FolderAction {
    /// List the files in a folder
    Ls { folder: FolderId },

    /// Add or replace a file entry
    Add {
        folder: FolderId,
        file_id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "application/octet-stream")]
        mimetype: String,
    },

    /// Remove a file entry
    Rm { folder: FolderId, file_id: String },

    /// Move pending filedrop entries into the folder's files
    #[command(name = "merge-filedrop")]
    MergeFiledrop { folder: FolderId },

    /// Delete the folder's metadata
    Delete { folder: FolderId },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = CfoldConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;
    init_logging(&config.logging.log_level, &config.logging.log_format);

    let account_name = cli
        .account
        .clone()
        .unwrap_or_else(|| config.store.account.clone());

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        Commands::Identity { action } => {
            let account = open_account(&config, &account_name);
            match action {
                IdentityAction::Import { certificate, private_key, force } => {
                    cmd_identity_import(&config, &account, &certificate, &private_key, force)
                }
                IdentityAction::Check => cmd_identity_check(&account),
                IdentityAction::Remove => {
                    account.remove_e2e().context("removing identity")?;
                    println!("Removed E2E identity for {account_name}");
                    Ok(())
                }
            }
        }
        Commands::RecoveryPhrase { words } => cmd_recovery_phrase(&config, words),
        Commands::E2eErrors => cmd_e2e_errors(&open_account(&config, &account_name)),
        Commands::Folder { action } => {
            let coordinator = open_coordinator(&config, &account_name)?;
            cmd_folder(&coordinator, action)
        }
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output (and recovery phrases); logs go to stderr
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

fn open_account(config: &CfoldConfig, account: &str) -> AccountStore {
    let store = JsonFileStore::new(expand_tilde(&config.store.path));
    AccountStore::new(Arc::new(store), account)
}

/// Recovery phrase from credentials/env, else ask on the terminal.
fn recovery_phrase() -> Result<SecretString> {
    if let Some(provider) = find_recovery_phrase().context("looking up recovery phrase")? {
        tracing::debug!(source = %provider.source, "using recovery phrase");
        return Ok(provider.phrase);
    }
    let phrase = rpassword::prompt_password("Recovery phrase: ")
        .context("reading recovery phrase from terminal")?;
    Ok(SecretString::from(phrase))
}

fn open_coordinator(config: &CfoldConfig, account: &str) -> Result<FolderMetadataCoordinator> {
    let account = open_account(config, account);
    if !account.has_identity()? {
        anyhow::bail!(
            "no E2E identity stored for {}\n\
             Import one first:\n\
             \tcfold identity import --certificate cert.pem --private-key key.pem",
            account.account()
        );
    }
    let phrase = recovery_phrase()?;
    let remote = DirRemote::new(expand_tilde(&config.remote.root));
    FolderMetadataCoordinator::unlock(Arc::new(remote), account, &phrase)
        .context("unlocking E2E identity")
}

fn wordlist(config: &CfoldConfig) -> Result<Wordlist> {
    match &config.crypto.wordlist {
        Some(path) => {
            let path = expand_tilde(path);
            Wordlist::from_file(&path)
                .with_context(|| format!("loading wordlist: {}", path.display()))
        }
        None => Ok(Wordlist::default()),
    }
}

// ── `cfold config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &CfoldConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `cfold identity` ──────────────────────────────────────────────────────────

fn cmd_identity_import(
    config: &CfoldConfig,
    account: &AccountStore,
    certificate: &Path,
    private_key: &Path,
    force: bool,
) -> Result<()> {
    if account.has_identity()? && !force {
        anyhow::bail!(
            "an identity is already stored for {}; pass --force to replace it",
            account.account()
        );
    }

    let cert_pem = std::fs::read_to_string(certificate)
        .with_context(|| format!("reading certificate: {}", certificate.display()))?;
    let key_pem = std::fs::read_to_string(private_key)
        .with_context(|| format!("reading private key: {}", private_key.display()))?;
    let key = private_key_from_pem(&key_pem).context("parsing private key")?;

    let phrase = generate_recovery_phrase(&wordlist(config)?, config.crypto.recovery_words)?;
    account
        .store_identity(&cert_pem, &key, &phrase)
        .context("storing identity")?;

    println!("Stored E2E identity for {}", account.account());
    println!();
    println!("Recovery phrase (write it down, it is not shown again):");
    println!();
    println!("  {}", phrase.expose_secret());
    Ok(())
}

fn cmd_identity_check(account: &AccountStore) -> Result<()> {
    let phrase = recovery_phrase()?;
    let identity = account
        .unlock_identity(&phrase)
        .context("unlocking E2E identity")?;
    println!("account:     {}", account.account());
    println!("key pair:    ok");
    println!("certificate: {} bytes", identity.certificate.len());
    println!("migrated:    {} folder(s)", account.migrated_folders()?.len());
    Ok(())
}

// ── `cfold recovery-phrase` / `cfold e2e-errors` ──────────────────────────────

fn cmd_recovery_phrase(config: &CfoldConfig, words: Option<usize>) -> Result<()> {
    let count = words.unwrap_or(config.crypto.recovery_words);
    let phrase = generate_recovery_phrase(&wordlist(config)?, count)?;
    println!("{}", phrase.expose_secret());
    Ok(())
}

fn cmd_e2e_errors(account: &AccountStore) -> Result<()> {
    match account.take_e2e_error_report()? {
        Some(report) => {
            println!("E2E verification failures: {}", report.count);
            println!("first seen (unix):         {}", report.first_seen);
        }
        None => println!("No E2E verification failures recorded"),
    }
    Ok(())
}

// ── `cfold folder` ────────────────────────────────────────────────────────────

fn cmd_folder(coordinator: &FolderMetadataCoordinator, action: FolderAction) -> Result<()> {
    match action {
        FolderAction::Ls { folder } => {
            let open = coordinator
                .open(folder)
                .with_context(|| format!("opening folder {folder}"))?;
            if !open.existed() {
                println!("Folder {folder} has no encrypted metadata yet");
                return Ok(());
            }
            let metadata = open.metadata();
            for (file_id, entry) in metadata.files() {
                println!(
                    "{file_id:<24} {:<32} {}",
                    entry.payload.filename().unwrap_or("-"),
                    entry.payload.mimetype().unwrap_or("-"),
                );
            }
            let pending = metadata.pending_filedrop().len();
            if pending > 0 {
                println!();
                println!("{pending} filedrop entr(y/ies) pending; run `cfold folder merge-filedrop {folder}`");
            }
        }
        FolderAction::Add { folder, file_id, name, mimetype } => {
            let entry = DecryptedFileEntry::new(
                FilePayload::new().with("filename", name).with("mimetype", mimetype),
            );
            let metadata = coordinator
                .add_file(folder, &file_id, entry)
                .with_context(|| format!("adding {file_id} to folder {folder}"))?;
            println!("Folder {folder}: {} file(s)", metadata.files().len());
        }
        FolderAction::Rm { folder, file_id } => {
            let metadata = coordinator
                .remove_file(folder, &file_id)
                .with_context(|| format!("removing {file_id} from folder {folder}"))?;
            println!("Folder {folder}: {} file(s)", metadata.files().len());
        }
        FolderAction::MergeFiledrop { folder } => {
            let merged = coordinator
                .migrate_filedrop(folder)
                .with_context(|| format!("merging filedrop of folder {folder}"))?;
            println!("Merged {merged} filedrop entr(y/ies) into folder {folder}");
        }
        FolderAction::Delete { folder } => {
            coordinator
                .delete(folder)
                .with_context(|| format!("deleting metadata of folder {folder}"))?;
            println!("Deleted metadata of folder {folder}");
        }
    }
    Ok(())
}
