use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use utilities::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub comm_port: u16,
    pub scope_port: u16,

    /// Per-attempt bound on opening a socket.
    pub connect_timeout_ms: u64,
    /// Bound on the liveness query right after connecting.
    pub healthcheck_timeout_ms: u64,
    /// Bound on every single command reply.
    pub response_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            comm_port: ensemble::DEFAULT_COMMAND_PORT,
            scope_port: ensemble::DEFAULT_SCOPE_PORT,
            connect_timeout_ms: 2000,
            healthcheck_timeout_ms: 2000,
            response_timeout_ms: 5000,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        millis(self.connect_timeout_ms)
    }

    pub fn healthcheck_timeout(&self) -> Duration {
        millis(self.healthcheck_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        millis(self.response_timeout_ms)
    }
}

/// What to do when the axis does not report in-position after the reset.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotInPositionAction {
    /// Log a warning and carry on with the capture.
    #[default]
    Proceed,
    /// Fail the attempt so that the offset is retried.
    Fail,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProcedureConfig {
    pub axis: String,

    /// Start and end of the scan [mm].
    pub reference_position: f64,
    /// Far end of the scan [mm].
    pub far_position: f64,
    pub speed: f64,
    pub move_poll_ms: u64,

    pub commit_delay_ms: u64,
    pub reset_delay_ms: u64,
    pub reconnect_settle_ms: u64,

    pub in_position_poll_ms: u64,
    pub in_position_timeout_ms: u64,
    pub not_in_position: NotInPositionAction,

    pub pre_motion_delay_ms: u64,

    pub scope_points: u32,
    pub scope_period_ms: u32,
    pub scope_settle_ms: u64,
    pub scope_poll_ms: u64,
    pub scope_read_timeout_ms: u64,
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        Self {
            axis: "@0".to_string(),

            reference_position: 2.2,
            far_position: 42.0,
            speed: 5.0,
            move_poll_ms: 100,

            commit_delay_ms: 1000,
            reset_delay_ms: 9000,
            reconnect_settle_ms: 2000,

            in_position_poll_ms: 100,
            in_position_timeout_ms: 30_000,
            not_in_position: NotInPositionAction::Proceed,

            pre_motion_delay_ms: 2000,

            scope_points: 2000,
            scope_period_ms: 10,
            scope_settle_ms: 150,
            scope_poll_ms: 100,
            scope_read_timeout_ms: 10_000,
        }
    }
}

impl ProcedureConfig {
    pub fn move_poll(&self) -> Duration {
        millis(self.move_poll_ms)
    }

    pub fn commit_delay(&self) -> Duration {
        millis(self.commit_delay_ms)
    }

    pub fn reset_delay(&self) -> Duration {
        millis(self.reset_delay_ms)
    }

    pub fn reconnect_settle(&self) -> Duration {
        millis(self.reconnect_settle_ms)
    }

    pub fn in_position_poll(&self) -> Duration {
        millis(self.in_position_poll_ms)
    }

    pub fn in_position_timeout(&self) -> Duration {
        millis(self.in_position_timeout_ms)
    }

    pub fn pre_motion_delay(&self) -> Duration {
        millis(self.pre_motion_delay_ms)
    }

    pub fn scope_settle(&self) -> Duration {
        millis(self.scope_settle_ms)
    }

    pub fn scope_poll(&self) -> Duration {
        millis(self.scope_poll_ms)
    }

    pub fn scope_read_timeout(&self) -> Duration {
        millis(self.scope_read_timeout_ms)
    }
}

/// Every retry loop of the procedure, by name.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Opening the command socket after refusal or connect timeout.
    pub connect: RetryPolicy,
    /// Full reconnect after the liveness query timed out or was reset.
    pub healthcheck: RetryPolicy,
    /// Polling the axis fault word until it reads zero.
    pub fault_clear: RetryPolicy,
    /// Reading back the scope buffer.
    pub scope_read: RetryPolicy,
    /// Re-running the whole per-offset procedure after any failure.
    pub offset_attempt: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connect: RetryPolicy::unbounded(Duration::ZERO),
            healthcheck: RetryPolicy::unbounded(Duration::from_secs(1)),
            fault_clear: RetryPolicy::unbounded(Duration::from_millis(500)),
            scope_read: RetryPolicy::bounded(5, Duration::from_secs(1)),
            offset_attempt: RetryPolicy::unbounded(Duration::from_secs(1)),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Offsets below this many degrees are shifted by a full turn.
    pub wrap_threshold: i32,
    /// Feedback counts per millimetre.
    pub position_scale: f64,
    /// Samples at or below this position [mm] are dropped.
    pub min_position: f64,
    /// Position window [mm] the current is averaged over.
    pub window_low: f64,
    pub window_high: f64,
    /// A trace must reach this position [mm] to count as full travel.
    pub full_travel: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            wrap_threshold: 180,
            position_scale: 1000.0,
            min_position: 2.0,
            window_low: 5.0,
            window_high: 41.0,
            full_travel: 41.1,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PlotConfig {
    pub output_dir: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("plots"),
            width: 1280,
            height: 960,
        }
    }
}

#[derive(Default, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub procedure: ProcedureConfig,
    pub retry: RetryConfig,
    pub analysis: AnalysisConfig,
    pub plot: PlotConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| {
            Err(ConfigError::ValidationError {
                message: message.to_string(),
            })
        };

        if self.procedure.axis.trim().is_empty() {
            return fail("procedure.axis must not be empty");
        }
        if self.procedure.speed <= 0.0 {
            return fail("procedure.speed must be positive");
        }
        if self.procedure.scope_points == 0 {
            return fail("procedure.scope_points must be positive");
        }
        if self.analysis.window_low >= self.analysis.window_high {
            return fail("analysis.window_low must be below analysis.window_high");
        }
        if self.analysis.position_scale == 0.0 {
            return fail("analysis.position_scale must not be zero");
        }
        if self.plot.width == 0 || self.plot.height == 0 {
            return fail("plot.width and plot.height must be positive");
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("commutation_search.toml"))
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl ConfigManager {
    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn load(&self) -> anyhow::Result<Config> {
        let config_path = self.options.config_path.clone();

        if !config_path.exists() {
            if self.options.create_if_missing {
                let default_config = Config::default();
                self.save(&default_config)
                    .context("Failed to save default config")?;
                return Ok(default_config);
            } else {
                return Err(ConfigError::FileNotFound {
                    path: config_path.clone(),
                }
                .into());
            }
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &Config) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
            }
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn init_config_with_options(options: ConfigOptions) -> anyhow::Result<(ConfigManager, Config)> {
    let manager = ConfigManager::with_options(options);
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<()> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    let options = ConfigOptions {
        config_path,
        create_if_missing: true,
    };

    ConfigManager::with_options(options).save(&Config::default())
}

pub fn should_create_config() -> bool {
    std::env::var("CREATE_CONFIG")
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}
