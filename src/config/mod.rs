use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub oracle: OracleConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub pipeline: PipelineConfig,
    pub pipes: PipeConfig,
}

/// Reasoning service (oracle) configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Which state store backs the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// JSON file per record with atomic rename.
    File,
    /// SQLite `records` table.
    Sqlite,
    /// Process memory; nothing survives a restart.
    Memory,
}

/// State store configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory of the file backend.
    pub path: PathBuf,
    pub database: DatabaseConfig,
}

/// SQLite configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

/// Retry schedule for one dependency class.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    /// Multiplicative jitter fraction (0.0-1.0).
    pub jitter: f64,
    /// Fixed delay used when the failure carries a retry-after hint.
    pub rate_limit_delay_ms: u64,
}

/// Retry policies per dependency class
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub reasoning: RetryPolicy,
    pub data_source: RetryPolicy,
}

/// Circuit breaker configuration, shared by every named dependency
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
}

/// Round loop and session limits
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_rounds: u32,
    pub round_timeout_secs: u64,
    pub coverage_threshold: f64,
    pub max_brief_turns: usize,
    /// Fail on malformed collaborator output instead of degrading.
    pub strict_mode: bool,
}

/// Reasoning service pipe names per collaborator
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub context: String,
    pub brief: String,
    pub planner: String,
    pub data: String,
    pub research: String,
    pub aggregator: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let oracle = OracleConfig {
            api_key: env::var("ORACLE_API_KEY").map_err(|_| AppError::Config {
                message: "ORACLE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("ORACLE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "file".to_string())
            .to_lowercase()
            .as_str()
        {
            "file" => StorageBackend::File,
            "sqlite" => StorageBackend::Sqlite,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(AppError::Config {
                    message: format!("Unknown STORAGE_BACKEND: {}", other),
                })
            }
        };

        let storage = StorageConfig {
            backend,
            path: PathBuf::from(
                env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/sessions".to_string()),
            ),
            database: DatabaseConfig {
                path: PathBuf::from(
                    env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/research.db".to_string()),
                ),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
            },
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30000),
        };

        let retry = RetryConfig {
            reasoning: RetryPolicy::from_env("REASONING", RetryPolicy::reasoning()),
            data_source: RetryPolicy::from_env("DATA_SOURCE", RetryPolicy::data_source()),
        };

        let defaults = CircuitBreakerConfig::default();
        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: env_or("CIRCUIT_FAILURE_THRESHOLD", defaults.failure_threshold),
            success_threshold: env_or("CIRCUIT_SUCCESS_THRESHOLD", defaults.success_threshold),
            recovery_timeout_ms: env_or("CIRCUIT_RECOVERY_TIMEOUT_MS", defaults.recovery_timeout_ms),
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            max_rounds: env_or("MAX_ROUNDS", defaults.max_rounds),
            round_timeout_secs: env_or("ROUND_TIMEOUT_SECS", defaults.round_timeout_secs),
            coverage_threshold: env_or("COVERAGE_THRESHOLD", defaults.coverage_threshold),
            max_brief_turns: env_or("MAX_BRIEF_TURNS", defaults.max_brief_turns),
            strict_mode: env::var("STRICT_MODE")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(defaults.strict_mode),
        };
        pipeline.validate()?;

        let defaults = PipeConfig::default();
        let pipes = PipeConfig {
            context: env::var("PIPE_CONTEXT").unwrap_or(defaults.context),
            brief: env::var("PIPE_BRIEF").unwrap_or(defaults.brief),
            planner: env::var("PIPE_PLANNER").unwrap_or(defaults.planner),
            data: env::var("PIPE_DATA").unwrap_or(defaults.data),
            research: env::var("PIPE_RESEARCH").unwrap_or(defaults.research),
            aggregator: env::var("PIPE_AGGREGATOR").unwrap_or(defaults.aggregator),
        };

        Ok(Config {
            oracle,
            storage,
            logging,
            request,
            retry,
            circuit_breaker,
            pipeline,
            pipes,
        })
    }
}

impl RetryPolicy {
    /// Defaults for calls to the reasoning service.
    pub fn reasoning() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            exponential_base: 2.0,
            jitter: 0.1,
            rate_limit_delay_ms: 10000,
        }
    }

    /// Defaults for data-source connector calls.
    pub fn data_source() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10000,
            exponential_base: 2.0,
            jitter: 0.2,
            rate_limit_delay_ms: 5000,
        }
    }

    /// Read `RETRY_<CLASS>_*` overrides on top of `defaults`.
    pub fn from_env(class: &str, defaults: Self) -> Self {
        let key = |name: &str| format!("RETRY_{}_{}", class, name);
        Self {
            max_attempts: env_or(&key("MAX_ATTEMPTS"), defaults.max_attempts).max(1),
            base_delay_ms: env_or(&key("BASE_DELAY_MS"), defaults.base_delay_ms),
            max_delay_ms: env_or(&key("MAX_DELAY_MS"), defaults.max_delay_ms),
            exponential_base: env_or(&key("EXPONENTIAL_BASE"), defaults.exponential_base),
            jitter: env_or(&key("JITTER"), defaults.jitter).clamp(0.0, 1.0),
            rate_limit_delay_ms: env_or(&key("RATE_LIMIT_DELAY_MS"), defaults.rate_limit_delay_ms),
        }
    }

    /// Single attempt, no delays.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            exponential_base: 1.0,
            jitter: 0.0,
            rate_limit_delay_ms: 0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            reasoning: RetryPolicy::reasoning(),
            data_source: RetryPolicy::data_source(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_ms: 30000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Recovery timeout as a duration.
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            round_timeout_secs: 600,
            coverage_threshold: 0.8,
            max_brief_turns: 20,
            strict_mode: false,
        }
    }
}

impl PipelineConfig {
    /// Round deadline as a duration.
    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.round_timeout_secs)
    }

    /// Reject values the round loop cannot work with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_rounds == 0 {
            return Err(AppError::Config {
                message: "MAX_ROUNDS must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.coverage_threshold) {
            return Err(AppError::Config {
                message: format!(
                    "COVERAGE_THRESHOLD must be within 0.0-1.0, got {}",
                    self.coverage_threshold
                ),
            });
        }
        if self.round_timeout_secs == 0 {
            return Err(AppError::Config {
                message: "ROUND_TIMEOUT_SECS must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 30000 }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            context: "research-context-v1".to_string(),
            brief: "research-brief-v1".to_string(),
            planner: "research-planner-v1".to_string(),
            data: "research-data-agent-v1".to_string(),
            research: "research-agent-v1".to_string(),
            aggregator: "research-aggregator-v1".to_string(),
        }
    }
}
