//! CLI definition and command dispatch for Vix.
//!
//! This module defines the command-line interface using `clap` and provides
//! the `run()` function that dispatches commands to the engine.
//!
//! ## Configuration Precedence
//!
//! Configuration is resolved with the following precedence (highest to lowest):
//! 1. CLI flags (e.g., `--config`, `--vault`, `--profiles`)
//! 2. Environment variables (`VIX_CONFIG`, `VIX_VERBOSE`, `VIX_PROFILES`, `VIX_VAULT`)
//! 3. Config file (`~/.vix/config.yaml` or path from `--config`/`VIX_CONFIG`)
//! 4. Built-in defaults

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use crate::ui::table::{self, SecretRow};
use crate::ui::{format, ColorMode, MessageType, Progress, ProgressMode, Style};

use vix_core::{
    list_backups, AppConfig, BackupRequest, ConnectionId, Credential, EndpointConfig, Event,
    MigrationRequest, MigrationState, NewProfile, ProfileId, ProviderKind, ProviderRegistry,
    RestoreRequest, Topic, VaultBackend, VixEngine, VixError, WriteMode,
};
use vix_db::{ConnectError, QueryError};

type CliResult = anyhow::Result<()>;

/// Per-item failures listed after a migration or restore.
const MAX_LISTED_FAILURES: usize = 10;

// ============================================================================
// CLI Definition
// ============================================================================

/// Vix – manage vector database connections and copy collections between them
#[derive(Parser, Debug)]
#[command(name = "vix")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "VIX_VERBOSE")]
    pub verbose: bool,

    /// Suppress progress indicators
    #[arg(short, long, global = true, env = "VIX_QUIET")]
    pub quiet: bool,

    /// Path to configuration file (default: ~/.vix/config.yaml)
    #[arg(long, global = true, env = "VIX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the profile store (default: ~/.vix/profiles.json)
    #[arg(long, global = true, env = "VIX_PROFILES")]
    pub profiles: Option<PathBuf>,

    /// Secret storage: auto, native, or memory
    #[arg(long, global = true, env = "VIX_VAULT")]
    pub vault: Option<VaultBackend>,

    /// Color output mode: always, never, or auto
    #[arg(long, global = true, env = "VIX_COLOR", default_value = "auto")]
    pub color: ColorMode,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage saved connection profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Connect with a profile and list its collections
    #[command(after_help = r#"EXAMPLES:
    # List collections of a saved profile
    vix collections "Local dev"

    # As JSON
    vix collections prod --json
"#)]
    Collections {
        /// Profile name or id
        profile: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Copy a collection from one profile's backend to another's
    #[command(after_help = r#"EXAMPLES:
    # Copy 'docs' from a local store into Qdrant
    vix migrate --from "Local dev" --collection docs --to prod

    # Rename on the way and skip vectors
    vix migrate --from a --collection docs --to b --target-collection docs_v2 --no-vectors

    # Never overwrite existing ids in the target
    vix migrate --from a --collection docs --to b --write-mode insert-only
"#)]
    Migrate(MigrateArgs),

    /// Back up a collection to a JSON Lines file
    #[command(after_help = r#"EXAMPLES:
    # Write docs_backup_<timestamp>.jsonl into ./backups
    vix backup "Local dev" docs -o backups

    # Ids, documents and metadata only
    vix backup prod docs --no-vectors
"#)]
    Backup(BackupArgs),

    /// Restore a collection from a backup file
    #[command(after_help = r#"EXAMPLES:
    # Recreate the collection named in the backup
    vix restore prod backups/docs_backup_20260101_120000.jsonl

    # Under another name, replacing it if it exists
    vix restore prod backups/docs_backup_20260101_120000.jsonl --collection docs_old --overwrite
"#)]
    Restore(RestoreArgs),

    /// List backup files in a directory, newest first
    Backups {
        /// Directory to scan
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List providers available in this build
    Providers,

    /// Inspect the credential vault
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },

    /// Inspect Vix configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Profile subcommands
#[derive(Subcommand, Debug)]
pub enum ProfileAction {
    /// List saved profiles
    #[command(name = "list", visible_alias = "ls")]
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Save a new profile
    #[command(after_help = r#"EXAMPLES:
    # Local directory store
    vix profile add "Local dev" --provider local -e path=/data/vectors

    # Qdrant with an API key taken from the environment
    vix profile add prod --provider qdrant -e url=https://qdrant.example:6333 --api-key-env QDRANT_KEY
"#)]
    Add(AddProfileArgs),

    /// Delete a profile and its stored secret
    #[command(name = "rm", visible_alias = "remove")]
    Rm {
        /// Profile name or id
        profile: String,
    },

    /// Rename a profile
    Rename {
        /// Profile name or id
        profile: String,
        /// New name
        name: String,
    },

    /// Copy a profile, including its secret
    Duplicate {
        /// Profile name or id
        profile: String,
        /// Name of the copy (default: "<name> (copy)")
        #[arg(long)]
        name: Option<String>,
    },

    /// Export profiles as JSON (secrets are never exported)
    Export {
        /// Profiles to export (all when omitted)
        #[arg(id = "export_profiles", value_name = "PROFILES")]
        profiles: Vec<String>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import profiles from an export file
    Import {
        /// File produced by `vix profile export`
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct AddProfileArgs {
    /// Profile name (must be unique)
    pub name: String,

    /// Backend kind: memory, local, qdrant, pinecone, lancedb
    #[arg(long)]
    pub provider: ProviderKind,

    /// Endpoint field as key=value (repeatable)
    #[arg(short = 'e', long = "endpoint", value_name = "KEY=VALUE")]
    pub endpoint: Vec<String>,

    /// API key
    #[arg(long, conflicts_with = "api_key_env")]
    pub api_key: Option<String>,

    /// Read the API key from this environment variable
    #[arg(long, value_name = "VAR")]
    pub api_key_env: Option<String>,

    /// Username for basic authentication
    #[arg(long, requires = "password_env")]
    pub username: Option<String>,

    /// Read the password from this environment variable
    #[arg(long, value_name = "VAR", requires = "username")]
    pub password_env: Option<String>,

    /// Read a bearer token from this environment variable
    #[arg(long, value_name = "VAR")]
    pub token_env: Option<String>,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Source profile name or id
    #[arg(long)]
    pub from: String,

    /// Source collection
    #[arg(long)]
    pub collection: String,

    /// Target profile name or id
    #[arg(long)]
    pub to: String,

    /// Target collection (default: same as the source)
    #[arg(long)]
    pub target_collection: Option<String>,

    /// Items per batch (default from config: migration.batchSize)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Copy ids, documents and metadata only
    #[arg(long)]
    pub no_vectors: bool,

    /// upsert or insert-only
    #[arg(long)]
    pub write_mode: Option<WriteMode>,

    /// Fail instead of creating a missing target collection
    #[arg(long)]
    pub no_create: bool,

    /// Output the final job as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Profile name or id
    pub profile: String,

    /// Collection to back up
    pub collection: String,

    /// Directory receiving the backup file
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Leave vectors out of the backup
    #[arg(long)]
    pub no_vectors: bool,

    /// Items per page (default from config: migration.batchSize)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Output the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Profile name or id
    pub profile: String,

    /// File written by `vix backup`
    pub file: PathBuf,

    /// Target collection (default: the name stored in the backup)
    #[arg(long)]
    pub collection: Option<String>,

    /// Replace the collection if it already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Restore ids, documents and metadata only
    #[arg(long)]
    pub no_vectors: bool,

    /// Items per batch (default from config: migration.batchSize)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// upsert or insert-only
    #[arg(long)]
    pub write_mode: Option<WriteMode>,

    /// Output the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Vault subcommands
#[derive(Subcommand, Debug)]
pub enum VaultAction {
    /// Show the active backend and which profiles have a stored secret
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration and report warnings
    Check,

    /// Show the resolved configuration (file, environment and flags merged)
    Show,
}

// ============================================================================
// Run function
// ============================================================================

/// Run the CLI application.
///
/// Parses command-line arguments, creates a `VixEngine`, dispatches to the
/// command handler and closes every connection before returning.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Warnings always, debug with --verbose
    let log_level = if cli.verbose { "debug" } else { "warn" };
    let filter = format!(
        "vix_core={lvl},vix_db={lvl},vix_cli={lvl}",
        lvl = log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let style = Style::new(cli.color);

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            let hint = match &cli.config {
                Some(path) => format!("Check your config at {}", path.display()),
                None => "Check your global config at ~/.vix/config.yaml".to_string(),
            };
            eprintln!(
                "{}",
                style.error_with_context("Failed to load configuration", Some(&e.to_string()), Some(&hint))
            );
            return ExitCode::FAILURE;
        }
    };

    // `config` never needs a vault or profile store
    if let Command::Config { action } = &cli.command {
        return finish(&style, handle_config(&style, &config, action));
    }

    let engine = match VixEngine::from_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!(
                "{}",
                style.error_with_context(
                    "Failed to initialize Vix",
                    Some(&e.to_string()),
                    hint_for(&e).as_deref(),
                )
            );
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Profile { action } => handle_profile(&style, &engine, action),
        Command::Collections { profile, json } => handle_collections(&style, &engine, &profile, json),
        Command::Migrate(args) => {
            let mode = ProgressMode::detect(cli.quiet, args.json);
            handle_migrate(&style, &engine, args, mode)
        }
        Command::Backup(args) => {
            let mode = ProgressMode::detect(cli.quiet, args.json);
            handle_backup(&style, &engine, args, mode)
        }
        Command::Restore(args) => {
            let mode = ProgressMode::detect(cli.quiet, args.json);
            handle_restore(&style, &engine, args, mode)
        }
        Command::Backups { dir, json } => handle_backups(&style, &dir, json),
        Command::Providers => handle_providers(),
        Command::Vault { action } => handle_vault(&style, &engine, action),
        Command::Config { .. } => Ok(()),
    };

    engine.shutdown();
    finish(&style, result)
}

/// Load the config file and apply flag/environment overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig, VixError> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::load_default()?,
    };
    if let Some(path) = &cli.profiles {
        config.profiles_path = Some(path.clone());
    }
    if let Some(backend) = cli.vault {
        config.vault.backend = backend;
    }
    tracing::debug!(
        "Resolved config: vault={}, maxConnections={}",
        config.vault.backend,
        config.connections.max_connections
    );
    Ok(config)
}

fn finish(style: &Style, result: CliResult) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render_error(style, &e));
            ExitCode::FAILURE
        }
    }
}

/// Render an error chain: top message, causes, and a hint for known failures.
fn render_error(style: &Style, err: &anyhow::Error) -> String {
    let causes: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
    let cause = (!causes.is_empty()).then(|| causes.join(": "));
    let hint = err
        .chain()
        .find_map(|c| c.downcast_ref::<VixError>())
        .and_then(hint_for);
    style.error_with_context(&err.to_string(), cause.as_deref(), hint.as_deref())
}

/// Actionable next step for errors users can fix themselves.
fn hint_for(err: &VixError) -> Option<String> {
    let hint = match err {
        VixError::ResourceExhausted { .. } => {
            "Close a connection or raise connections.maxConnections"
        }
        VixError::ProfileNotFound(_) => "Run `vix profile list` to see saved profiles",
        VixError::InvalidConfiguration { hint, .. } => return Some(hint.clone()),
        VixError::InvalidConfigFile(_) => "Check your config at ~/.vix/config.yaml",
        VixError::Connect(ConnectError::Auth { .. }) => {
            "Check the profile's credentials; re-add it with a new key if needed"
        }
        VixError::Connect(ConnectError::Network { .. } | ConnectError::Timeout { .. }) => {
            "Check that the server is reachable"
        }
        VixError::Connect(ConnectError::MalformedEndpoint { .. }) => {
            "Check the endpoint fields with `vix profile list`"
        }
        VixError::Connect(ConnectError::Unavailable { .. }) => {
            "Run `vix providers` to see what this build supports"
        }
        VixError::Query(QueryError::CollectionNotFound { .. }) => {
            "Run `vix collections <profile>` to list collections"
        }
        VixError::Vault(_) => "Use --vault memory to keep secrets for this run only",
        VixError::CollectionExists { .. } => {
            "Pass --overwrite to replace it, or --collection to restore under another name"
        }
        VixError::InvalidBackup { .. } => "Restore only files written by `vix backup`",
        _ => return None,
    };
    Some(hint.to_string())
}

// ============================================================================
// Profile commands
// ============================================================================

fn handle_profile(style: &Style, engine: &VixEngine, action: ProfileAction) -> CliResult {
    let profiles = engine.profiles();
    match action {
        ProfileAction::List { json } => {
            let list = profiles.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!(
                    "{}",
                    style.message(
                        MessageType::Info,
                        "No profiles saved. Add one with `vix profile add`."
                    )
                );
            } else {
                println!("{}", table::render_profiles_table(&list));
            }
        }

        ProfileAction::Add(args) => {
            let endpoint = EndpointConfig::from_pairs(args.endpoint.iter().map(String::as_str))
                .context("Invalid endpoint")?;
            match ProviderRegistry::builtin().adapter(args.provider) {
                Ok(adapter) => adapter
                    .validate_endpoint(&endpoint)
                    .map_err(VixError::from)
                    .with_context(|| format!("Invalid endpoint for {}", args.provider))?,
                Err(e) => println!("{}", style.message(MessageType::Warn, &e.to_string())),
            }

            let mut new = NewProfile::new(args.name.clone(), args.provider, endpoint);
            if let Some(credential) = credential_from(&args)? {
                new = new.with_credential(credential);
            }
            let profile = profiles.create(new)?;

            println!(
                "{}",
                style.message(
                    MessageType::Ok,
                    &format!(
                        "Saved profile {} ({})",
                        style.name(&profile.name),
                        style.id(profile.id.as_str())
                    )
                )
            );
            if profile.credential_ref.is_some() && !engine.vault().is_persistent() {
                println!(
                    "{}",
                    style.message(
                        MessageType::Warn,
                        "The secret is kept in memory only and is lost when vix exits"
                    )
                );
            }
        }

        ProfileAction::Rm { profile } => {
            let found = profiles.find(&profile)?;
            profiles.delete(&found.id)?;
            println!(
                "{}",
                style.message(
                    MessageType::Ok,
                    &format!("Deleted profile {}", style.name(&found.name))
                )
            );
        }

        ProfileAction::Rename { profile, name } => {
            let found = profiles.find(&profile)?;
            let renamed = profiles.rename(&found.id, &name)?;
            println!(
                "{}",
                style.message(
                    MessageType::Ok,
                    &format!(
                        "Renamed {} to {}",
                        style.name(&found.name),
                        style.name(&renamed.name)
                    )
                )
            );
        }

        ProfileAction::Duplicate { profile, name } => {
            let found = profiles.find(&profile)?;
            let copy = profiles.duplicate(&found.id, name.as_deref())?;
            println!(
                "{}",
                style.message(
                    MessageType::Ok,
                    &format!(
                        "Copied {} to {} ({})",
                        style.name(&found.name),
                        style.name(&copy.name),
                        style.id(copy.id.as_str())
                    )
                )
            );
        }

        ProfileAction::Export { profiles: names, output } => {
            let ids = names
                .iter()
                .map(|name| profiles.find(name).map(|p| p.id))
                .collect::<Result<Vec<ProfileId>, _>>()?;
            let json = profiles.export_json(&ids)?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    let count = if ids.is_empty() { profiles.len()? } else { ids.len() };
                    println!(
                        "{}",
                        style.message(
                            MessageType::Ok,
                            &format!("Exported {} profiles to {}", count, path.display())
                        )
                    );
                }
                None => println!("{}", json),
            }
        }

        ProfileAction::Import { file } => {
            let json = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let report = profiles.import_json(&json)?;
            println!(
                "{}",
                style.message(
                    MessageType::Ok,
                    &format!("Imported {} profiles", report.imported.len())
                )
            );
            if report.renamed > 0 {
                println!(
                    "{}",
                    style.message_detail("Renamed", &format!("{} (name already taken)", report.renamed))
                );
            }
            if report.reassigned_ids > 0 {
                println!(
                    "{}",
                    style.message_detail("New ids", &report.reassigned_ids.to_string())
                );
            }
            println!(
                "{}",
                style.message(
                    MessageType::Hint,
                    "Imported profiles carry no secrets; re-add credentials where needed"
                )
            );
        }
    }
    Ok(())
}

/// Build the credential from flags and environment variables.
fn credential_from(args: &AddProfileArgs) -> anyhow::Result<Option<Credential>> {
    let api_key = match (&args.api_key, &args.api_key_env) {
        (Some(key), _) => Some(key.clone()),
        (None, Some(var)) => Some(read_env(var)?),
        (None, None) => None,
    };
    let password = args.password_env.as_deref().map(read_env).transpose()?;
    let token = args.token_env.as_deref().map(read_env).transpose()?;

    let credential = Credential {
        api_key,
        username: args.username.clone(),
        password,
        token,
    };
    Ok((!credential.is_empty()).then_some(credential))
}

fn read_env(var: &str) -> anyhow::Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => bail!("Environment variable {} is not set", var),
    }
}

// ============================================================================
// Connection commands
// ============================================================================

fn handle_collections(style: &Style, engine: &VixEngine, profile: &str, json: bool) -> CliResult {
    let id = engine
        .open_profile(profile)
        .with_context(|| format!("Could not connect with profile '{}'", profile))?;
    let instance = engine.manager().get(&id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instance.known_collections)?);
        return Ok(());
    }

    println!(
        "{}",
        style.section(&format!(
            "{} ({})",
            instance.display_name.to_uppercase(),
            instance.provider
        ))
    );
    println!();
    if instance.known_collections.is_empty() {
        println!("{}", style.message(MessageType::Info, "No collections found."));
    } else {
        println!("{}", table::render_collections_table(&instance.known_collections));
    }
    Ok(())
}

fn handle_providers() -> CliResult {
    let registry = ProviderRegistry::builtin();
    let providers = registry
        .kinds()
        .into_iter()
        .map(|kind| Ok((kind, registry.adapter(kind)?.capabilities())))
        .collect::<Result<Vec<_>, ConnectError>>()?;
    println!("{}", table::render_providers_table(&providers));
    Ok(())
}

// ============================================================================
// Migration
// ============================================================================

fn handle_migrate(style: &Style, engine: &VixEngine, args: MigrateArgs, mode: ProgressMode) -> CliResult {
    let same_profile = engine.profiles().find(&args.from)?.id == engine.profiles().find(&args.to)?.id;
    let source = open_with_spinner(engine, &args.from, mode)?;
    let target = if same_profile {
        source.clone()
    } else {
        open_with_spinner(engine, &args.to, mode)?
    };

    let target_collection = args
        .target_collection
        .clone()
        .unwrap_or_else(|| args.collection.clone());

    let total = engine
        .manager()
        .session(&source)?
        .describe_collection(&args.collection)
        .with_context(|| format!("Cannot read source collection '{}'", args.collection))?
        .item_count;

    let mut request = MigrationRequest::new(
        source.clone(),
        args.collection.clone(),
        target.clone(),
        target_collection.clone(),
    )
    .with_vectors(!args.no_vectors);
    if let Some(batch_size) = args.batch_size {
        request = request.with_batch_size(batch_size);
    }
    if let Some(write_mode) = args.write_mode {
        request = request.with_write_mode(write_mode);
    }
    if args.no_create {
        request = request.with_create_missing_target(false);
    }

    let label = format!("Copying '{}' to '{}'", args.collection, target_collection);
    let progress = match total {
        Some(total) => Progress::bar(total, &label, mode),
        None => Progress::spinner(&label, mode),
    };
    let bar = progress.clone();
    let subscription = engine.events().subscribe(Topic::MigrationProgress, move |event| {
        if let Event::MigrationProgress {
            batch,
            items_read,
            items_failed,
            ..
        } = event
        {
            bar.ensure_length(*items_read);
            bar.set_position(*items_read);
            if *items_failed > 0 {
                bar.set_message(&format!("batch {}, {} failed", batch, items_failed));
            }
        }
        Ok(())
    });

    let handle = engine.migrations().start_migration(request);
    let summary = handle.and_then(|h| h.wait());
    engine.events().unsubscribe(subscription);
    progress.finish_clear();
    let summary = summary?;

    if args.json {
        let job = engine.migrations().job(&summary.job)?;
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        let headline = format!(
            "Migration {} {}",
            style.id(summary.job.as_str()),
            style.migration_state(summary.state)
        );
        let kind = match summary.state {
            MigrationState::Completed if summary.items_failed == 0 => MessageType::Ok,
            MigrationState::Completed | MigrationState::Cancelled => MessageType::Warn,
            _ => MessageType::Err,
        };
        println!("{}", style.message(kind, &headline));
        println!(
            "{}",
            style.message_detail("Read", &format::format_thousands(summary.items_read))
        );
        println!(
            "{}",
            style.message_detail("Copied", &format::format_thousands(summary.items_copied))
        );
        println!(
            "{}",
            style.message_detail("Failed", &format::format_thousands(summary.items_failed))
        );
        println!(
            "{}",
            style.message_detail(
                "Batches",
                &format!(
                    "{} in {}",
                    summary.batches,
                    format::format_duration(summary.elapsed)
                )
            )
        );
        for failure in summary.failures.iter().take(MAX_LISTED_FAILURES) {
            println!(
                "{}",
                style.list_item("-", &format!("{}: {}", failure.id, failure.reason))
            );
        }
        if summary.items_failed as usize > MAX_LISTED_FAILURES {
            println!(
                "{}",
                style.list_item(
                    " ",
                    &format!(
                        "... and {} more",
                        summary.items_failed as usize - MAX_LISTED_FAILURES.min(summary.failures.len())
                    )
                )
            );
        }
    }

    if summary.state == MigrationState::Failed {
        let cause = summary
            .first_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("Migration {} failed: {}", summary.job, cause);
    }
    Ok(())
}

// ============================================================================
// Backup / restore
// ============================================================================

fn handle_backup(style: &Style, engine: &VixEngine, args: BackupArgs, mode: ProgressMode) -> CliResult {
    let source = open_with_spinner(engine, &args.profile, mode)?;
    let mut request = BackupRequest::new(source, args.collection.clone(), args.output.clone())
        .with_vectors(!args.no_vectors);
    if let Some(batch_size) = args.batch_size {
        request = request.with_batch_size(batch_size);
    }

    let spinner = Progress::spinner(&format!("Backing up '{}'", args.collection), mode);
    let summary = engine.backups().backup(request).and_then(|task| task.wait());
    spinner.finish_clear();
    let summary = summary.with_context(|| format!("Backup of '{}' failed", args.collection))?;

    if args.json {
        let report = serde_json::json!({
            "path": summary.path,
            "header": summary.header,
            "batches": summary.batches,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{}",
        style.message(
            MessageType::Ok,
            &format!(
                "Backed up {} items of {}",
                format::format_thousands(summary.header.item_count),
                style.name(&args.collection)
            )
        )
    );
    println!(
        "{}",
        style.message_detail("File", &summary.path.display().to_string())
    );
    println!(
        "{}",
        style.message_detail(
            "Batches",
            &format!(
                "{} in {}",
                summary.batches,
                format::format_duration(summary.elapsed)
            )
        )
    );
    if !summary.header.include_vectors {
        println!("{}", style.message_detail("Vectors", "not included"));
    }
    Ok(())
}

fn handle_restore(style: &Style, engine: &VixEngine, args: RestoreArgs, mode: ProgressMode) -> CliResult {
    let header = vix_core::read_header(&args.file)?;
    let target = open_with_spinner(engine, &args.profile, mode)?;

    let mut request = RestoreRequest::new(target, args.file.clone())
        .with_overwrite(args.overwrite)
        .with_vectors(!args.no_vectors);
    if let Some(name) = &args.collection {
        request = request.with_collection(name.clone());
    }
    if let Some(batch_size) = args.batch_size {
        request = request.with_batch_size(batch_size);
    }
    if let Some(write_mode) = args.write_mode {
        request = request.with_write_mode(write_mode);
    }

    let name = args
        .collection
        .clone()
        .unwrap_or_else(|| header.collection.name.clone());
    let spinner = Progress::spinner(&format!("Restoring '{}'", name), mode);
    let summary = engine.backups().restore(request).and_then(|task| task.wait());
    spinner.finish_clear();
    let summary = summary.with_context(|| format!("Restore of '{}' failed", name))?;

    if args.json {
        let report = serde_json::json!({
            "collection": summary.collection,
            "replaced": summary.replaced,
            "itemsRead": summary.items_read,
            "itemsRestored": summary.items_restored,
            "itemsFailed": summary.items_failed,
            "failures": summary.failures,
            "batches": summary.batches,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let kind = if summary.items_failed == 0 {
        MessageType::Ok
    } else {
        MessageType::Warn
    };
    let verb = if summary.replaced { "Replaced" } else { "Restored" };
    println!(
        "{}",
        style.message(
            kind,
            &format!(
                "{} {} from {}",
                verb,
                style.name(&summary.collection),
                args.file.display()
            )
        )
    );
    println!(
        "{}",
        style.message_detail("Restored", &format::format_thousands(summary.items_restored))
    );
    println!(
        "{}",
        style.message_detail("Failed", &format::format_thousands(summary.items_failed))
    );
    for failure in summary.failures.iter().take(MAX_LISTED_FAILURES) {
        println!(
            "{}",
            style.list_item("-", &format!("{}: {}", failure.id, failure.reason))
        );
    }
    Ok(())
}

fn handle_backups(style: &Style, dir: &std::path::Path, json: bool) -> CliResult {
    let backups = list_backups(dir)?;
    if json {
        let entries: Vec<serde_json::Value> = backups
            .iter()
            .map(|b| serde_json::json!({ "path": b.path, "sizeBytes": b.size_bytes, "header": b.header }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if backups.is_empty() {
        println!(
            "{}",
            style.message(
                MessageType::Info,
                &format!("No backups in {}", dir.display())
            )
        );
    } else {
        println!("{}", table::render_backups_table(&backups));
    }
    Ok(())
}

fn open_with_spinner(engine: &VixEngine, profile: &str, mode: ProgressMode) -> anyhow::Result<ConnectionId> {
    let spinner = Progress::spinner(&format!("Connecting to '{}'", profile), mode);
    let result = engine
        .open_profile(profile)
        .with_context(|| format!("Could not connect with profile '{}'", profile));
    spinner.finish_clear();
    result
}

// ============================================================================
// Vault / config
// ============================================================================

fn handle_vault(style: &Style, engine: &VixEngine, action: VaultAction) -> CliResult {
    let VaultAction::Status { json } = action;
    let vault = engine.vault();

    let mut rows = Vec::new();
    for profile in engine.profiles().list()? {
        if let Some(key) = &profile.credential_ref {
            rows.push(SecretRow {
                profile: profile.name.clone(),
                key: key.to_string(),
                present: vault.exists(key)?,
            });
        }
    }

    if json {
        let secrets: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| serde_json::json!({ "profile": r.profile, "key": r.key, "present": r.present }))
            .collect();
        let status = serde_json::json!({
            "mode": vault.mode().to_string(),
            "namespace": vault.namespace(),
            "persistent": vault.is_persistent(),
            "secrets": secrets,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", style.section("VAULT"));
    println!();
    println!("  {}", style.key_value("Backend", &vault.mode().to_string()));
    println!("  {}", style.key_value("Namespace", vault.namespace()));
    println!(
        "  {}",
        style.key_value("Persistent", if vault.is_persistent() { "yes" } else { "no" })
    );
    if rows.is_empty() {
        println!();
        println!("{}", style.message(MessageType::Info, "No profiles have stored secrets."));
    } else {
        println!();
        println!("{}", table::render_secrets_table(&rows));
        let missing = rows.iter().filter(|r| !r.present).count();
        if missing > 0 {
            println!();
            println!(
                "{}",
                style.message(
                    MessageType::Warn,
                    &format!("{} profiles reference a secret that is not stored", missing)
                )
            );
        }
    }
    Ok(())
}

fn handle_config(style: &Style, config: &AppConfig, action: &ConfigAction) -> CliResult {
    match action {
        ConfigAction::Check => {
            let warnings = config.validate()?;
            for warning in &warnings {
                println!("{}", style.message(MessageType::Warn, warning));
            }
            let text = if warnings.is_empty() {
                "Configuration is valid"
            } else {
                "Configuration is valid with warnings"
            };
            println!("{}", style.message(MessageType::Ok, text));
        }
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
    }
    Ok(())
}
