//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use catalog_service::config::Config;
use catalog_service::preview::{FileHandle, PackageHandle};
use catalog_service::session::CatalogSession;
use catalog_service::settings::{CatalogSettings, format_settings};

use crate::logging;

/// A command line client for catalog services.
#[derive(Debug, Parser)]
#[command(version, about, bin_name = "catalog")]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Catalog commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Read or write the catalog settings.
    #[command(subcommand)]
    Settings(SettingsCommand),

    /// Load file previews.
    #[command(subcommand)]
    Preview(PreviewCommand),
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    /// Print the catalog settings as JSON, or `null` if there are none.
    Get,
    /// Replace the catalog settings with the contents of a JSON file.
    Set {
        /// The settings document.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum PreviewCommand {
    /// Render a notebook with Voila and wait until the page has loaded.
    Voila(VoilaArgs),
}

#[derive(Debug, Args)]
struct VoilaArgs {
    /// The bucket of the notebook.
    #[arg(long)]
    bucket: String,

    /// The key of the notebook.
    #[arg(long)]
    key: String,

    /// The version of the notebook, defaults to the latest.
    #[arg(long)]
    version: Option<String>,

    /// The bucket of the package the notebook is viewed in.
    #[arg(long, requires_all = ["package_name", "package_hash"])]
    package_bucket: Option<String>,

    /// The name of the package the notebook is viewed in.
    #[arg(long, requires = "package_bucket")]
    package_name: Option<String>,

    /// The top hash of the package revision.
    #[arg(long, requires = "package_bucket")]
    package_hash: Option<String>,
}

impl VoilaArgs {
    fn into_handle(self) -> FileHandle {
        let package = match (self.package_bucket, self.package_name, self.package_hash) {
            (Some(bucket), Some(name), Some(hash)) => Some(PackageHandle { bucket, name, hash }),
            _ => None,
        };
        FileHandle {
            bucket: self.bucket,
            key: self.key,
            version: self.version,
            package,
        }
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: Some(env!("CARGO_PKG_VERSION").into()),
        enable_logs: true,
        ..Default::default()
    });

    // SAFETY: The runtime has not been started yet, so there are no other threads.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        catalog_cache::metrics::configure_statsd(
            &config.metrics.prefix,
            statsd,
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("catalog")
        .build()
        .context("failed to create the runtime")?;

    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, config: Config) -> Result<()> {
    let session = CatalogSession::create(config)
        .await
        .context("failed to create the session")?;

    let result = match command {
        Command::Settings(command) => settings(&session, command).await,
        Command::Preview(PreviewCommand::Voila(args)) => voila(&session, args).await,
    };

    session.teardown();
    result
}

async fn settings(session: &CatalogSession, command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Get => {
            let settings = session
                .settings()
                .get()
                .await
                .context("failed to load settings")?;
            match settings {
                Some(settings) => println!("{}", format_settings(&settings)?),
                None => println!("null"),
            }
        }
        SettingsCommand::Set { path } => {
            let contents = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let settings: CatalogSettings =
                serde_json::from_slice(&contents).context("invalid settings document")?;
            session
                .settings()
                .write(settings)
                .await
                .context("failed to write settings")?;
        }
    }

    Ok(())
}

async fn voila(session: &CatalogSession, args: VoilaArgs) -> Result<()> {
    let loader = session.voila()?;
    let handle = args.into_handle();

    tracing::info!(bucket = %handle.bucket, key = %handle.key, "Loading Voila preview");
    let data = loader
        .load(&handle)
        .await
        .context("failed to load Voila preview")?;
    println!("{}", serde_json::to_string_pretty(&data)?);

    Ok(())
}
