//! Configuration loading for the project sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PROJECT_SYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::sync_job::JobKind;

const ENV_PREFIX: &str = "PROJECT_SYNC_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `PROJECT_SYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub issue_tracker: IssueTrackerConfig,
    #[serde(default)]
    pub resourcing: ResourcingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub availability: AvailabilityConfig,
}

/// Issue tracker (Jira Cloud) credentials. All three values are required for
/// the integration to count as configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct IssueTrackerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

/// Resourcing system (Precursive on Salesforce) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ResourcingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_resourcing_api_version")]
    pub api_version: String,
}

/// Worker execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerConfig {
    /// Upper bound on a single external sync, in seconds (default: 600)
    ///
    /// Environment variable: `PROJECT_SYNC_WORKER_MAX_RUN_SECONDS`
    #[serde(default = "default_worker_max_run_seconds")]
    pub max_run_seconds: u64,

    /// Number of jobs allowed to execute at the same time (default: 4)
    ///
    /// Environment variable: `PROJECT_SYNC_WORKER_CONCURRENCY`
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: u32,
}

/// Stuck-job reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ReconcilerConfig {
    /// Sweep interval in seconds (default: 30, range 1-300)
    #[serde(default = "default_reconciler_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    /// A job `running` longer than this is forced to `failed` (default: 1800)
    #[serde(default = "default_reconciler_running_timeout_seconds")]
    pub running_timeout_seconds: u64,

    /// A job still `queued` after this long is forced to `failed` (default: 900)
    #[serde(default = "default_reconciler_queued_timeout_seconds")]
    pub queued_timeout_seconds: u64,
}

/// Cooldown applied to an integration after a rate-limited or unreachable sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AvailabilityConfig {
    #[serde(default = "default_availability_default_cooldown_seconds")]
    pub default_cooldown_seconds: u64,
    #[serde(default = "default_availability_max_cooldown_seconds")]
    pub max_cooldown_seconds: u64,
    /// Random factor applied to the cooldown: cooldown * (1 +/- jitter_factor)
    #[serde(default = "default_availability_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            issue_tracker: IssueTrackerConfig::default(),
            resourcing: ResourcingConfig::default(),
            worker: WorkerConfig::default(),
            reconciler: ReconcilerConfig::default(),
            availability: AvailabilityConfig::default(),
        }
    }
}

impl Default for ResourcingConfig {
    fn default() -> Self {
        Self {
            instance_url: None,
            access_token: None,
            api_version: default_resourcing_api_version(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_run_seconds: default_worker_max_run_seconds(),
            concurrency: default_worker_concurrency(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_reconciler_tick_interval_seconds(),
            running_timeout_seconds: default_reconciler_running_timeout_seconds(),
            queued_timeout_seconds: default_reconciler_queued_timeout_seconds(),
        }
    }
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            default_cooldown_seconds: default_availability_default_cooldown_seconds(),
            max_cooldown_seconds: default_availability_max_cooldown_seconds(),
            jitter_factor: default_availability_jitter_factor(),
        }
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn validate_url(integration: &'static str, value: &Option<String>) -> Result<(), ConfigError> {
    if let Some(raw) = value.as_deref().filter(|v| !v.trim().is_empty()) {
        url::Url::parse(raw).map_err(|source| ConfigError::InvalidIntegrationUrl {
            integration,
            value: raw.to_string(),
            source,
        })?;
    }
    Ok(())
}

impl IssueTrackerConfig {
    /// True when every credential needed to call the issue tracker is present.
    pub fn is_configured(&self) -> bool {
        present(&self.base_url) && present(&self.email) && present(&self.api_token)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("BASE_URL", present(&self.base_url)),
            ("EMAIL", present(&self.email)),
            ("API_TOKEN", present(&self.api_token)),
        ];
        check_partial("issue_tracker", &fields)?;
        validate_url("issue_tracker", &self.base_url)
    }
}

impl ResourcingConfig {
    /// True when the resourcing instance URL and access token are both present.
    pub fn is_configured(&self) -> bool {
        present(&self.instance_url) && present(&self.access_token)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("INSTANCE_URL", present(&self.instance_url)),
            ("ACCESS_TOKEN", present(&self.access_token)),
        ];
        check_partial("resourcing", &fields)?;
        if self.api_version.trim().is_empty() {
            return Err(ConfigError::MissingIntegrationSetting {
                integration: "resourcing",
                setting: "API_VERSION".to_string(),
            });
        }
        validate_url("resourcing", &self.instance_url)
    }
}

/// Either all settings of an integration are present or none are.
fn check_partial(integration: &'static str, fields: &[(&str, bool)]) -> Result<(), ConfigError> {
    let any = fields.iter().any(|(_, set)| *set);
    if !any {
        return Ok(());
    }
    if let Some((name, _)) = fields.iter().find(|(_, set)| !*set) {
        return Err(ConfigError::MissingIntegrationSetting {
            integration,
            setting: (*name).to_string(),
        });
    }
    Ok(())
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidWorkerConcurrency {
                value: self.concurrency,
            });
        }
        if self.max_run_seconds == 0 {
            return Err(ConfigError::InvalidWorkerMaxRun {
                value: self.max_run_seconds,
            });
        }
        Ok(())
    }
}

impl ReconcilerConfig {
    pub fn validate(&self, worker: &WorkerConfig) -> Result<(), ConfigError> {
        if !(1..=300).contains(&self.tick_interval_seconds) {
            return Err(ConfigError::InvalidReconcilerTickInterval {
                value: self.tick_interval_seconds,
            });
        }
        // A running job needs at least one sweep of slack past the worker's own deadline.
        let min_running_timeout = worker
            .max_run_seconds
            .saturating_add(self.tick_interval_seconds);
        if self.running_timeout_seconds <= min_running_timeout {
            return Err(ConfigError::InvalidRunningTimeout {
                value: self.running_timeout_seconds,
                max_run: worker.max_run_seconds,
                tick: self.tick_interval_seconds,
            });
        }
        if self.queued_timeout_seconds == 0 {
            return Err(ConfigError::InvalidQueuedTimeout {
                value: self.queued_timeout_seconds,
            });
        }
        Ok(())
    }
}

impl AvailabilityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_cooldown_seconds > self.max_cooldown_seconds {
            return Err(ConfigError::InvalidCooldownBounds {
                base: self.default_cooldown_seconds,
                max: self.max_cooldown_seconds,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidCooldownJitter {
                value: self.jitter_factor,
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Whether the integration behind `kind` has its credentials configured.
    pub fn integration_configured(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::IssueTracker => self.issue_tracker.is_configured(),
            JobKind::Resourcing => self.resourcing.is_configured(),
        }
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.issue_tracker.api_token.is_some() {
            config.issue_tracker.api_token = Some(REDACTED.to_string());
        }
        if config.resourcing.access_token.is_some() {
            config.resourcing.access_token = Some(REDACTED.to_string());
        }
        if let Ok(mut url) = url::Url::parse(&config.database_url)
            && url.password().is_some()
            && url.set_password(Some(REDACTED)).is_ok()
        {
            config.database_url = url.to_string();
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.issue_tracker.validate()?;
        self.resourcing.validate()?;
        self.worker.validate()?;
        self.reconciler.validate(&self.worker)?;
        self.availability.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/project_sync".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_resourcing_api_version() -> String {
    "v59.0".to_string()
}

fn default_worker_max_run_seconds() -> u64 {
    600 // 10 minutes
}

fn default_worker_concurrency() -> u32 {
    4
}

fn default_reconciler_tick_interval_seconds() -> u64 {
    30
}

fn default_reconciler_running_timeout_seconds() -> u64 {
    1800 // 30 minutes
}

fn default_reconciler_queued_timeout_seconds() -> u64 {
    900 // 15 minutes
}

fn default_availability_default_cooldown_seconds() -> u64 {
    60
}

fn default_availability_max_cooldown_seconds() -> u64 {
    900
}

fn default_availability_jitter_factor() -> f64 {
    0.1
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error(
        "{integration} integration is partially configured; set PROJECT_SYNC_{}_{setting}",
        integration.to_uppercase()
    )]
    MissingIntegrationSetting {
        integration: &'static str,
        setting: String,
    },
    #[error("{integration} url '{value}' is invalid: {source}")]
    InvalidIntegrationUrl {
        integration: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[error("worker concurrency must be between 1 and 64, got {value}")]
    InvalidWorkerConcurrency { value: u32 },
    #[error("worker max run seconds must be positive, got {value}")]
    InvalidWorkerMaxRun { value: u64 },
    #[error("reconciler tick interval must be between 1 and 300 seconds, got {value}")]
    InvalidReconcilerTickInterval { value: u64 },
    #[error(
        "reconciler running timeout ({value}s) must exceed max run ({max_run}s) plus one tick ({tick}s)"
    )]
    InvalidRunningTimeout { value: u64, max_run: u64, tick: u64 },
    #[error("reconciler queued timeout must be positive, got {value}")]
    InvalidQueuedTimeout { value: u64 },
    #[error("availability default cooldown ({base}) cannot be greater than max cooldown ({max})")]
    InvalidCooldownBounds { base: u64, max: u64 },
    #[error("availability jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidCooldownJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `PROJECT_SYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|val| {
        let trimmed = val.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parsed<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: fn() -> T,
) -> T {
    layered
        .remove(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(default)
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads, validates and returns the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = parsed(
            &mut layered,
            "DB_MAX_CONNECTIONS",
            default_db_max_connections,
        );
        let db_acquire_timeout_ms = parsed(
            &mut layered,
            "DB_ACQUIRE_TIMEOUT_MS",
            default_db_acquire_timeout_ms,
        );

        let issue_tracker = IssueTrackerConfig {
            base_url: non_blank(layered.remove("ISSUE_TRACKER_BASE_URL")),
            email: non_blank(layered.remove("ISSUE_TRACKER_EMAIL")),
            api_token: non_blank(layered.remove("ISSUE_TRACKER_API_TOKEN")),
        };

        let resourcing = ResourcingConfig {
            instance_url: non_blank(layered.remove("RESOURCING_INSTANCE_URL")),
            access_token: non_blank(layered.remove("RESOURCING_ACCESS_TOKEN")),
            api_version: non_blank(layered.remove("RESOURCING_API_VERSION"))
                .unwrap_or_else(default_resourcing_api_version),
        };

        let worker = WorkerConfig {
            max_run_seconds: parsed(
                &mut layered,
                "WORKER_MAX_RUN_SECONDS",
                default_worker_max_run_seconds,
            ),
            concurrency: parsed(
                &mut layered,
                "WORKER_CONCURRENCY",
                default_worker_concurrency,
            ),
        };

        let reconciler = ReconcilerConfig {
            tick_interval_seconds: parsed(
                &mut layered,
                "RECONCILER_TICK_INTERVAL_SECONDS",
                default_reconciler_tick_interval_seconds,
            ),
            running_timeout_seconds: parsed(
                &mut layered,
                "RECONCILER_RUNNING_TIMEOUT_SECONDS",
                default_reconciler_running_timeout_seconds,
            ),
            queued_timeout_seconds: parsed(
                &mut layered,
                "RECONCILER_QUEUED_TIMEOUT_SECONDS",
                default_reconciler_queued_timeout_seconds,
            ),
        };

        let availability = AvailabilityConfig {
            default_cooldown_seconds: parsed(
                &mut layered,
                "AVAILABILITY_DEFAULT_COOLDOWN_SECONDS",
                default_availability_default_cooldown_seconds,
            ),
            max_cooldown_seconds: parsed(
                &mut layered,
                "AVAILABILITY_MAX_COOLDOWN_SECONDS",
                default_availability_max_cooldown_seconds,
            ),
            jitter_factor: parsed(
                &mut layered,
                "AVAILABILITY_JITTER_FACTOR",
                default_availability_jitter_factor,
            ),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            issue_tracker,
            resourcing,
            worker,
            reconciler,
            availability,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
