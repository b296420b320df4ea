use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use stratus::logging::{init_console_logging, init_logging};
use stratus::{secure_error, secure_info, secure_warn, AppConfig};
use stratus_backends::{BackendRegistry, TargetUrl};
use stratus_backup::{
    bundle, BackupRegistryCoordinator, CreateOptions, DatabaseLocator, ExportOptions, ImportMode,
    ImportOptions, ImportOutcome,
};
use stratus_core::{ImportExportBundle, JsonFileStore, KeyInstance};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List storage backends, or the options of one backend
    Backends {
        /// Show the options understood by this protocol key
        #[arg(short, long)]
        protocol: Option<String>,
    },
    /// Create a backup from a definition file
    Create {
        /// JSON file with `Backup` and optional `Schedule`
        #[arg(short, long)]
        file: PathBuf,
        /// Reuse the local database already recorded for the target URL
        #[arg(long)]
        existing_db: bool,
    },
    /// Replace a stored backup; the file's backup must carry its ID
    Update {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List stored backups
    List {
        /// Show target, schedule and settings
        #[arg(short, long)]
        detailed: bool,
    },
    /// Check a definition file without storing it
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Export a stored backup
    Export {
        /// Backup ID
        id: String,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        include_metadata: bool,
        /// Encrypt passwords with the settings encryption key
        #[arg(long)]
        encrypt_secrets: bool,
        /// Seal the exported file with this passphrase
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Import an exported backup
    Import {
        file: PathBuf,
        /// Rename instead of failing when the name is taken
        #[arg(long, conflicts_with = "preview")]
        direct: bool,
        /// Show what would be imported without storing it
        #[arg(long)]
        preview: bool,
        #[arg(long)]
        import_metadata: bool,
        /// Passphrase for sealed files (prompted when needed)
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Check that a stored backup's target (or a target URL) is reachable
    Test {
        /// Backup ID or target URL
        target: String,
    },
    /// Generate default configuration
    Config {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn read_definition(path: &Path) -> Result<ImportExportBundle> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(bundle::decode(&data)?)
}

fn build_coordinator(config: &AppConfig, registry: Arc<BackendRegistry>) -> Result<BackupRegistryCoordinator> {
    let key = KeyInstance::from_environment().context("Failed to load the settings encryption key")?;
    let store = JsonFileStore::open(&config.store_path)
        .with_context(|| format!("Failed to open {}", config.store_path.display()))?;
    let locator = DatabaseLocator::open(&config.data_dir)?;
    debug!("Using definitions from {}", config.store_path.display());

    Ok(BackupRegistryCoordinator::new(Box::new(store), registry, Arc::new(key), locator))
}

fn show_backends(registry: &BackendRegistry, protocol: Option<String>) -> Result<()> {
    let Some(protocol) = protocol else {
        for resolved in registry.profiles() {
            let profile = resolved.profile();
            let alias = if resolved.is_alias() {
                format!(" (alias of {})", resolved.descriptor().protocol_key).dimmed().to_string()
            } else {
                String::new()
            };
            println!("{:<10} {}{}", profile.protocol_key.bright_cyan(), profile.display_name, alias);
            println!("           {}", profile.description);
        }
        return Ok(());
    };

    let resolved = registry.resolve(&protocol)?;
    println!("{} ({})", resolved.profile().display_name.bold(), protocol);
    for option in resolved.supported_options() {
        let required = if option.required { " required".red().to_string() } else { String::new() };
        println!("  --{:<36} {:?}{}", option.name.bright_cyan(), option.kind, required);
        println!("      {}", option.short_description);
        if let Some(default) = &option.default_value {
            println!("      default: {}", default);
        }
        if !option.allowed_values.is_empty() {
            println!("      values: {}", option.allowed_values.join(", "));
        }
    }
    Ok(())
}

fn list_backups(coordinator: &BackupRegistryCoordinator, detailed: bool) -> Result<()> {
    let listings = coordinator.list()?;
    if listings.is_empty() {
        println!("No backups configured");
        return Ok(());
    }

    for listing in listings {
        let backup = &listing.backup;
        let id = backup.id.as_deref().unwrap_or("-");
        let target = TargetUrl::parse(&backup.target_url)
            .map(|u| u.without_credentials())
            .unwrap_or_else(|_| "<invalid target>".to_string());

        println!("{:>4}  {:<30} {}", id.bright_cyan(), backup.name.bold(), target);
        if detailed {
            if !backup.description.is_empty() {
                println!("      {}", backup.description);
            }
            if let Some(db_path) = &backup.db_path {
                println!("      database: {}", db_path);
            }
            match &listing.schedule {
                Some(schedule) => println!(
                    "      schedule: every {}",
                    schedule.repeat.as_deref().unwrap_or("(manual)")
                ),
                None => println!("      schedule: none"),
            }
            if !listing.is_unencrypted_or_passphrase_stored {
                println!("      {}", "passphrase is not stored".yellow());
            }
            let names: Vec<&str> = backup.settings.iter().map(|s| s.name.as_str()).collect();
            println!("      settings: {}", names.join(", "));
        }
    }
    Ok(())
}

async fn test_target(
    coordinator: &BackupRegistryCoordinator,
    registry: &BackendRegistry,
    target: &str,
) -> Result<()> {
    let (url, settings) = match coordinator.get(target) {
        Ok(listing) => {
            let settings = listing.backup.settings_map();
            (listing.backup.target_url, settings)
        }
        Err(_) => (target.to_string(), Default::default()),
    };

    let backend = registry.open(&url, settings)?;
    println!("Testing {} target...", backend.display_name());
    match backend.test().await {
        Ok(()) => {
            println!("{}", "Connection successful".green());
            Ok(())
        }
        Err(e) => {
            secure_error!("Connection test for {} failed: {}", url, e);
            Err(anyhow!("Connection test failed: {}", e))
        }
    }
}

fn export_backup(
    coordinator: &BackupRegistryCoordinator,
    id: &str,
    output: Option<PathBuf>,
    options: ExportOptions,
) -> Result<()> {
    let data = coordinator.export(id, &options)?;
    match output {
        Some(path) => {
            std::fs::write(&path, &data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported backup {} to {}", id, path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }
    }
    Ok(())
}

fn import_backup(
    coordinator: &BackupRegistryCoordinator,
    file: &Path,
    options: ImportOptions,
    passphrase: Option<String>,
) -> Result<()> {
    let prompt = || {
        passphrase.or_else(|| rpassword::prompt_password("Passphrase for the exported file: ").ok())
    };

    match coordinator.import_file(file, &options, prompt)? {
        ImportOutcome::Preview(bundle) => {
            println!("{}", String::from_utf8_lossy(&bundle::encode(&bundle)?));
        }
        ImportOutcome::Created { id, name } => {
            println!("{} Imported {} as backup {}", "✔".green(), name.bold(), id);
        }
    }
    Ok(())
}

fn write_default_config(output: Option<PathBuf>) -> Result<()> {
    let path = output.unwrap_or_else(AppConfig::default_path);
    AppConfig::default().save(&path)?;
    println!("Configuration file created at: {}", path.display());
    Ok(())
}

async fn handle_command(command: Commands, config: AppConfig) -> Result<()> {
    let registry = Arc::new(BackendRegistry::bootstrap()?);

    match command {
        Commands::Backends { protocol } => show_backends(&registry, protocol),
        Commands::Config { output } => write_default_config(output),
        command => {
            let coordinator = build_coordinator(&config, registry.clone())?;
            match command {
                Commands::Create { file, existing_db } => {
                    let ImportExportBundle { backup, schedule } = read_definition(&file)?;
                    let backup = backup.ok_or_else(|| anyhow!("{} has no Backup", file.display()))?;
                    let target = backup.target_url.clone();
                    let id = coordinator.create(backup, schedule, CreateOptions { existing_db })?;
                    secure_info!("Created backup {} for {}", id, target);
                    println!("{} Created backup {}", "✔".green(), id);
                    Ok(())
                }
                Commands::Update { file } => {
                    let ImportExportBundle { backup, schedule } = read_definition(&file)?;
                    let backup = backup.ok_or_else(|| anyhow!("{} has no Backup", file.display()))?;
                    coordinator.update(backup, schedule)?;
                    println!("{} Backup updated", "✔".green());
                    Ok(())
                }
                Commands::Validate { file } => {
                    let ImportExportBundle { backup, schedule } = read_definition(&file)?;
                    let backup = backup.ok_or_else(|| anyhow!("{} has no Backup", file.display()))?;
                    match coordinator.validate(&backup, schedule.as_ref()) {
                        Ok(()) => {
                            println!("{} Definition is valid", "✔".green());
                            Ok(())
                        }
                        Err(message) => Err(anyhow!(message)),
                    }
                }
                Commands::List { detailed } => list_backups(&coordinator, detailed),
                Commands::Export { id, output, include_metadata, encrypt_secrets, passphrase } => {
                    let options = ExportOptions { include_metadata, encrypt_secrets, passphrase };
                    export_backup(&coordinator, &id, output, options)
                }
                Commands::Import { file, direct, preview, import_metadata, passphrase } => {
                    let mode = if preview {
                        ImportMode::Preview
                    } else if direct {
                        ImportMode::Direct
                    } else {
                        ImportMode::Strict
                    };
                    import_backup(&coordinator, &file, ImportOptions { import_metadata, mode }, passphrase)
                }
                Commands::Test { target } => test_target(&coordinator, &registry, &target).await,
                Commands::Backends { .. } | Commands::Config { .. } => Ok(()),
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    // Keep the guard alive so buffered log lines reach the file
    let _log_guard = match init_logging(config.log_dir.clone(), &config.log_level) {
        Ok(guard) => Some(guard),
        Err(e) => {
            init_console_logging(&config.log_level);
            secure_warn!(
                "Failed to initialize file logging in {}: {}; continuing with console-only logging",
                config.log_dir.display(),
                e
            );
            None
        }
    };
    debug!("Stratus starting, logs in {}", config.log_dir.display());

    if let Err(e) = handle_command(cli.command, config).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}
