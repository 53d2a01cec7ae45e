//! nextop: a terminal dashboard for live MySQL and MariaDB instances.
//!
//! ```bash
//! # Persisted instances only
//! nextop
//!
//! # Add (or update) one instance for this and later runs
//! nextop mysql 'monitor:secret@tcp(db1:3306)/' db1 prod
//!
//! # Debug logging into a custom directory
//! nextop -v --log-dir /tmp/nextop-logs
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use nextop_adapters::MysqlBackend;
use nextop_core::config::{default_config_path, ConfigError, ConfigStore, FileConfigStore};
use nextop_core::dashboard::{Dashboard, StartupReport};
use nextop_core::instance::{DbmsKind, Instance};
use nextop_core::logging::{init_logging, LogGuard, LoggingError};
use nextop_core::shutdown::ShutdownToken;
use tracing::{error, info, warn};

/// Live MySQL / MariaDB monitoring dashboard.
#[derive(Parser, Debug)]
#[command(name = "nextop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// `<dbms> <dsn> [connection-name] [group]`; dbms is mysql or mariadb
    #[arg(value_name = "INSTANCE", num_args = 0..=4)]
    instance: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for log files (defaults to <config dir>/logs)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Config file (defaults to <config dir>/nextop.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Positional tokens after arity and DBMS checks.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InstanceArgs {
    dbms: DbmsKind,
    dsn: String,
    name: Option<String>,
    group: Option<String>,
}

impl Cli {
    fn instance_args(&self) -> Result<Option<InstanceArgs>, clap::Error> {
        let (dbms, dsn, rest) = match self.instance.as_slice() {
            [] => return Ok(None),
            [_] => {
                return Err(usage_error(
                    ErrorKind::WrongNumberOfValues,
                    "expected `<dbms> <dsn> [connection-name] [group]`",
                ))
            }
            [dbms, dsn, rest @ ..] => (dbms, dsn, rest),
        };

        let dbms = dbms
            .parse::<DbmsKind>()
            .map_err(|error| usage_error(ErrorKind::InvalidValue, &error.to_string()))?;
        Ok(Some(InstanceArgs {
            dbms,
            dsn: dsn.clone(),
            name: rest.first().cloned(),
            group: rest.get(1).cloned(),
        }))
    }
}

impl InstanceArgs {
    /// A missing group falls back to `default-group` from the config.
    fn into_instance(self, default_group: Option<&str>) -> Result<Instance, String> {
        let group = self.group.as_deref().or(default_group);
        Instance::parse(
            self.name.as_deref().unwrap_or_default(),
            self.dbms.as_str(),
            &self.dsn,
            group,
        )
        .map_err(|error| error.to_string())
    }
}

fn usage_error(kind: ErrorKind, message: &str) -> clap::Error {
    Cli::command().error(kind, message)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let instance_args = match cli.instance_args() {
        Ok(args) => args,
        Err(error) => error.exit(),
    };

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("Failed to initialize logging: {error}");
            return ExitCode::from(1);
        }
    };

    nextop_tui::install_panic_hook();
    info!("starting nextop");

    match run_app(&cli, instance_args) {
        Ok(()) => {
            info!("nextop exited normally");
            ExitCode::SUCCESS
        }
        Err(message) => {
            error!(error = %message, "nextop failed");
            eprintln!("Error: {message}");
            ExitCode::from(1)
        }
    }
}

fn setup_logging(cli: &Cli) -> Result<LogGuard, LoggingError> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0)
}

fn run_app(cli: &Cli, instance_args: Option<InstanceArgs>) -> Result<(), String> {
    let (store, mut notes) = load_config(cli.config.as_deref()).map_err(|error| error.to_string())?;
    let cli_instance = instance_args
        .map(|args| args.into_instance(store.settings().default_group()))
        .transpose()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("nextop-worker")
        .build()
        .map_err(|error| format!("failed to start async runtime: {error}"))?;

    let dashboard = Arc::new(Dashboard::new(MysqlBackend, Box::new(store)));
    let report = runtime.block_on(dashboard.startup(cli_instance));
    notes.extend(startup_notes(&report));

    let shutdown = ShutdownToken::new();
    let polling = {
        let _entered = runtime.enter();
        dashboard.spawn_polling(shutdown.clone())
    };

    let ui_result = nextop_tui::run(Arc::clone(&dashboard), runtime.handle().clone(), notes);

    shutdown.cancel();
    runtime.block_on(async {
        if let Err(error) = polling.await {
            warn!(error = %error, "polling task ended abnormally");
        }
        dashboard.shutdown().await;
    });

    ui_result.map_err(|error| error.to_string())
}

/// Falls back to an empty, backup-on-save store when the file cannot be read.
fn load_config(path: Option<&Path>) -> Result<(FileConfigStore, Vec<String>), ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    match FileConfigStore::load_from_path(&path) {
        Ok(store) => Ok((store, Vec::new())),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "config unreadable, starting empty");
            let note = format!(
                "Config could not be loaded ({error}); starting empty, the next save keeps a .bak copy"
            );
            Ok((FileConfigStore::recovering(path), vec![note]))
        }
    }
}

fn startup_notes(report: &StartupReport) -> Vec<String> {
    let mut notes = Vec::new();
    for name in &report.rejected {
        notes.push(format!("Skipped invalid connection {name}"));
    }
    if let Some(error) = &report.persist_error {
        notes.push(format!("Could not save connections: {error}"));
    }
    if let Some(error) = &report.view_error {
        notes.push(format!("Stayed on connection setup: {error}"));
    }
    if !report.failed.is_empty() {
        let failed = report
            .failed
            .iter()
            .map(|(name, error)| format!("{name}: {error}"))
            .collect::<Vec<_>>();
        notes.push(format!(
            "{} of {} instance(s) offline: {}",
            report.failed.len(),
            report.failed.len() + report.connected.len(),
            failed.join("; ")
        ));
    }
    notes
}
