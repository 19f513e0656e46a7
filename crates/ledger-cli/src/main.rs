use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::config::CONFIG_FILE;
use ledger_core::paths::data_dir;
use ledger_core::{
    BootstrapConfig, BootstrapListener, BootstrapOutcome, BootstrapRegistry, BootstrapTask,
    ConfigPassphraseStore, KeyBackend, KeyBroker, LegacyMigrator, PassphraseStore, Progress,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ledger", author, version, about = "Encrypted ledger store", long_about = None)]
struct Cli {
    /// Application data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file (default: <data-dir>/ledger.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where the wrapping key lives: keyring or file
    #[arg(long, global = true)]
    key_backend: Option<KeyBackend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bootstrap secure storage and print a summary
    Open,
    /// Report what secure storage state exists on disk
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Delete the wrapping key, the wrapped passphrase and the database
    Reset {
        /// Confirm that all stored data may be destroyed
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Open => open_command(&config).await,
        Commands::Status { json } => status_command(&config, json),
        Commands::Reset { yes } => reset_command(&config, yes),
    }
}

fn load_config(cli: &Cli) -> Result<BootstrapConfig> {
    let data = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => data_dir()?,
    };
    let config_path = cli.config.clone().unwrap_or_else(|| data.join(CONFIG_FILE));
    let overrides = BootstrapConfig::load_overrides(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let mut config = BootstrapConfig::new(&data).apply(overrides);
    if let Some(backend) = cli.key_backend {
        config.key_backend = backend;
    }
    Ok(config)
}

struct PrintProgress;

impl BootstrapListener for PrintProgress {
    fn on_progress(&self, progress: &Progress) {
        println!("{progress}");
    }

    fn on_complete(&self, _outcome: &BootstrapOutcome) {}
}

async fn open_command(config: &BootstrapConfig) -> Result<()> {
    let registry = BootstrapRegistry::init_global(config);
    let store = registry
        .connect_with(Arc::new(PrintProgress))
        .wait()
        .await
        .map_err(anyhow::Error::from)?;
    info!(path = %store.path().display(), "store open");
    println!("database: {}", store.path().display());
    println!("accounts: {}", store.count_accounts());
    println!("categories: {}", store.categories().len());
    println!("transactions: {}", store.transactions().len());
    Ok(())
}

fn presence(present: bool) -> &'static str {
    if present {
        "present"
    } else {
        "absent"
    }
}

fn status_command(config: &BootstrapConfig, json: bool) -> Result<()> {
    let key = config
        .key_broker()
        .key_exists()
        .context("querying wrapping key")?;
    let passphrase = ConfigPassphraseStore::new(config.config_store())
        .get()
        .context("reading preferences")?
        .is_some();
    let database = config.database_path().is_file();
    let legacy = LegacyMigrator::new(config.legacy_database_path()).exists();

    if json {
        let status = serde_json::json!({
            "dataDir": config.data_dir,
            "keyBackend": config.key_backend,
            "key": key,
            "passphrase": passphrase,
            "database": database,
            "legacy": legacy,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("data dir: {}", config.data_dir.display());
        println!("key: {}", presence(key));
        println!("passphrase: {}", presence(passphrase));
        println!("database: {}", presence(database));
        println!("legacy: {}", presence(legacy));
    }
    Ok(())
}

fn reset_command(config: &BootstrapConfig, yes: bool) -> Result<()> {
    if !yes {
        return Err(anyhow!(
            "reset destroys the key and every stored row; pass --yes to continue"
        ));
    }
    BootstrapTask::from_config(config)
        .coordinator()
        .reset_secure_storage()?;
    println!("secure storage reset");
    Ok(())
}
