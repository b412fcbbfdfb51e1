//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use apalis_cron::Schedule;
use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stampa";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_UPLOAD_BODY_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_WORKER_CONCURRENCY: u32 = 2;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 60;
const DEFAULT_RESULT_RETENTION_SECS: u64 = 3600;
const DEFAULT_TEMPLATES_DIR: &str = "templates";
const DEFAULT_STORAGE_ROOT: &str = "storage";
const DEFAULT_SWEEP_SCHEDULE: &str = "0 */10 * * * *";
const DEFAULT_SWEEP_WINDOW_HOURS: u64 = 24;
const DEFAULT_SWEEP_LIMIT: u32 = 10;

/// Command-line arguments for the Stampa binary.
#[derive(Debug, Parser)]
#[command(name = "stampa", version, about = "Stampa document generation service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STAMPA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service, render workers, and retry scheduler.
    Serve(Box<ServeArgs>),
    /// Re-enqueue recently failed jobs once and exit.
    #[command(name = "sweep-failed")]
    SweepFailed(SweepFailedArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listen address.
    #[arg(long = "server-listen-addr", value_name = "ADDR")]
    pub listen_addr: Option<String>,

    /// Override the maximum upload request size in bytes.
    #[arg(long = "server-upload-body-limit-bytes", value_name = "BYTES")]
    pub upload_body_limit_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Override the log output format (json|compact).
    #[arg(long = "log-format", value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Toggle running migrations on startup.
    #[arg(
        long = "database-run-migrations",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub database_run_migrations: Option<bool>,

    /// Override the render worker concurrency.
    #[arg(long = "jobs-worker-concurrency", value_name = "COUNT")]
    pub jobs_worker_concurrency: Option<u32>,

    /// Override the automatic retry budget per job.
    #[arg(long = "jobs-max-retries", value_name = "COUNT")]
    pub jobs_max_retries: Option<u32>,

    /// Override the delay between automatic retries.
    #[arg(long = "jobs-retry-delay-seconds", value_name = "SECONDS")]
    pub jobs_retry_delay_seconds: Option<u64>,

    /// Override the template directory.
    #[arg(long = "templates-dir", value_name = "PATH")]
    pub templates_dir: Option<PathBuf>,

    /// Override the artifact storage root.
    #[arg(long = "storage-root", value_name = "PATH")]
    pub storage_root: Option<PathBuf>,

    /// Toggle the scheduled retry sweep.
    #[arg(
        long = "scheduler-sweep-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub scheduler_sweep_enabled: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SweepFailedArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Maximum number of failed jobs to retry.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<u32>,

    /// Retry jobs that failed within the last N hours.
    #[arg(long, value_name = "HOURS")]
    pub hours: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub jobs: JobsSettings,
    pub templates: TemplateSettings,
    pub storage: StorageSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
    pub upload_body_limit: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub worker_concurrency: NonZeroU32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Advisory: logged at startup, artifact expiry is a deployment concern.
    pub result_retention: Duration,
    /// Advisory: enforcement is delegated to the deployment.
    pub time_limit: Option<Duration>,
    /// Advisory: enforcement is delegated to the deployment.
    pub soft_time_limit: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub dir: PathBuf,
    pub map: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub sweep_enabled: bool,
    pub sweep_schedule: Schedule,
    pub sweep_window: Duration,
    pub sweep_limit: u32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("STAMPA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::SweepFailed(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    jobs: RawJobsSettings,
    templates: RawTemplateSettings,
    storage: RawStorageSettings,
    scheduler: RawSchedulerSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(addr) = overrides.listen_addr.as_ref() {
            self.server.listen_addr = Some(addr.clone());
        }
        if let Some(limit) = overrides.upload_body_limit_bytes {
            self.server.upload_body_limit_bytes = Some(limit);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(format) = overrides.log_format.as_ref() {
            self.logging.format = Some(format.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(run) = overrides.database_run_migrations {
            self.database.run_migrations = Some(run);
        }
        if let Some(value) = overrides.jobs_worker_concurrency {
            self.jobs.worker_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_max_retries {
            self.jobs.max_retries = Some(value);
        }
        if let Some(value) = overrides.jobs_retry_delay_seconds {
            self.jobs.retry_delay_seconds = Some(value);
        }
        if let Some(dir) = overrides.templates_dir.as_ref() {
            self.templates.dir = Some(dir.clone());
        }
        if let Some(root) = overrides.storage_root.as_ref() {
            self.storage.root = Some(root.clone());
        }
        if let Some(enabled) = overrides.scheduler_sweep_enabled {
            self.scheduler.sweep_enabled = Some(enabled);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            jobs,
            templates,
            storage,
            scheduler,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let jobs = build_jobs_settings(jobs)?;
        let templates = build_template_settings(templates)?;
        let storage = build_storage_settings(storage)?;
        let scheduler = build_scheduler_settings(scheduler)?;

        Ok(Self {
            server,
            logging,
            database,
            jobs,
            templates,
            storage,
            scheduler,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let addr = server
        .listen_addr
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
    let listen_addr: SocketAddr = addr
        .parse()
        .map_err(|err| LoadError::invalid("server.listen_addr", format!("`{addr}`: {err}")))?;

    let limit_value = server
        .upload_body_limit_bytes
        .unwrap_or(DEFAULT_UPLOAD_BODY_LIMIT_BYTES);
    if limit_value == 0 {
        return Err(LoadError::invalid(
            "server.upload_body_limit_bytes",
            "must be greater than zero",
        ));
    }
    let upload_body_limit = usize::try_from(limit_value).map_err(|_| {
        LoadError::invalid(
            "server.upload_body_limit_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ServerSettings {
        listen_addr,
        upload_body_limit,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = match logging.format.as_deref() {
        None => LogFormat::Compact,
        Some(raw) if raw.eq_ignore_ascii_case("compact") => LogFormat::Compact,
        Some(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
        Some(other) => {
            return Err(LoadError::invalid(
                "logging.format",
                format!("`{other}` is not one of json|compact"),
            ));
        }
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_value.into(), "database.max_connections")?;
    let run_migrations = database.run_migrations.unwrap_or(true);

    Ok(DatabaseSettings {
        url,
        max_connections,
        run_migrations,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let concurrency = jobs
        .worker_concurrency
        .unwrap_or(DEFAULT_WORKER_CONCURRENCY);
    let worker_concurrency = non_zero_u32(concurrency.into(), "jobs.worker_concurrency")?;

    let max_retries = jobs.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
    let retry_delay =
        Duration::from_secs(jobs.retry_delay_seconds.unwrap_or(DEFAULT_RETRY_DELAY_SECS));
    let result_retention = Duration::from_secs(
        jobs.result_retention_seconds
            .unwrap_or(DEFAULT_RESULT_RETENTION_SECS),
    );
    let time_limit = jobs.time_limit_seconds.map(Duration::from_secs);
    let soft_time_limit = jobs.soft_time_limit_seconds.map(Duration::from_secs);

    Ok(JobsSettings {
        worker_concurrency,
        max_retries,
        retry_delay,
        result_retention,
        time_limit,
        soft_time_limit,
    })
}

fn build_template_settings(templates: RawTemplateSettings) -> Result<TemplateSettings, LoadError> {
    let dir = templates
        .dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATES_DIR));
    if dir.as_os_str().is_empty() {
        return Err(LoadError::invalid("templates.dir", "path must not be empty"));
    }

    let map = templates.map.unwrap_or_else(default_template_map);
    for (id, filename) in &map {
        if id.trim().is_empty() || filename.trim().is_empty() {
            return Err(LoadError::invalid(
                "templates.map",
                "identifiers and filenames must not be empty",
            ));
        }
    }

    Ok(TemplateSettings { dir, map })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let root = storage
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("storage.root", "path must not be empty"));
    }

    Ok(StorageSettings { root })
}

fn build_scheduler_settings(
    scheduler: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let sweep_enabled = scheduler.sweep_enabled.unwrap_or(true);

    let expression = scheduler
        .sweep_schedule
        .unwrap_or_else(|| DEFAULT_SWEEP_SCHEDULE.to_string());
    let sweep_schedule = Schedule::from_str(&expression).map_err(|err| {
        LoadError::invalid(
            "scheduler.sweep_schedule",
            format!("`{expression}` is not a valid cron expression: {err}"),
        )
    })?;

    let window_hours = scheduler
        .sweep_window_hours
        .unwrap_or(DEFAULT_SWEEP_WINDOW_HOURS);
    if window_hours == 0 {
        return Err(LoadError::invalid(
            "scheduler.sweep_window_hours",
            "must be greater than zero",
        ));
    }

    let sweep_limit = scheduler.sweep_limit.unwrap_or(DEFAULT_SWEEP_LIMIT);
    if sweep_limit == 0 {
        return Err(LoadError::invalid(
            "scheduler.sweep_limit",
            "must be greater than zero",
        ));
    }

    Ok(SchedulerSettings {
        sweep_enabled,
        sweep_schedule,
        sweep_window: Duration::from_secs(window_hours * 3600),
        sweep_limit,
    })
}

fn default_template_map() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("contract".to_string(), "contract.html".to_string()),
        ("invoice".to_string(), "invoice.html".to_string()),
        ("certificate".to_string(), "certificate.html".to_string()),
        ("docx_contract".to_string(), "contract.docx".to_string()),
    ])
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    listen_addr: Option<String>,
    upload_body_limit_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    run_migrations: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    worker_concurrency: Option<u32>,
    max_retries: Option<u32>,
    retry_delay_seconds: Option<u64>,
    result_retention_seconds: Option<u64>,
    time_limit_seconds: Option<u64>,
    soft_time_limit_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    dir: Option<PathBuf>,
    map: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    sweep_enabled: Option<bool>,
    sweep_schedule: Option<String>,
    sweep_window_hours: Option<u64>,
    sweep_limit: Option<u32>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
