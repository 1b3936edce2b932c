//! Environment-variable driven configuration, following the `EnvParser`
//! error-collection pattern: every variable is parsed even if earlier ones
//! failed, so a misconfigured deployment gets one full report instead of a
//! whack-a-mole sequence of restarts.

use std::env;

use thiserror::Error;

use crate::domain::device::Environment;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },
    #[error("value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Type-safe environment variable parser. Collects errors instead of
/// bailing on the first bad value.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self {
            prefix: "RCP_",
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> String {
        let var_name = self.var_name(name);
        env::var(&var_name).unwrap_or_else(|_| default.to_string())
    }

    pub fn get_bool(&mut self, name: &str, default: bool) -> bool {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "boolean (true/false/1/0/yes/no)".to_string(),
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }

    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> u64 {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.parse::<u64>() {
                Ok(n) if n >= min && n <= max => n,
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name,
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    default
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "unsigned 64-bit integer".to_string(),
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }

    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> u32 {
        self.get_u64_range(name, default as u64, min as u64, max as u64) as u32
    }

    pub fn get_f64(&mut self, name: &str, default: f64) -> f64 {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => value.parse::<f64>().unwrap_or_else(|_| {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "floating-point number".to_string(),
                    value,
                });
                default
            }),
            Err(_) => default,
        }
    }

    fn get_environment(&mut self, name: &str, default: Environment) -> Environment {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.to_lowercase().as_str() {
                "lab" => Environment::Lab,
                "staging" => Environment::Staging,
                "prod" => Environment::Prod,
                _ => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "one of lab|staging|prod".to_string(),
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Service-wide settings: environment, crypto, snapshot and rollout/health
/// tuning, all sourced from `RCP_`-prefixed environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub encryption_key: String,
    pub allow_prod_writes: bool,

    pub snapshot_capture_enabled: bool,
    pub snapshot_capture_interval_seconds: u64,
    pub snapshot_max_size_bytes: u64,
    pub snapshot_compression_level: u32,
    pub snapshot_retention_count: usize,
    pub snapshot_use_shell_fallback: bool,

    pub routeros_verify_ssl: bool,
    pub session_ttl_seconds: u64,

    pub approval_token_ttl_seconds: i64,
    pub default_batch_size: usize,
    pub transport_semaphore_permits: usize,
    pub health_cpu_threshold_default: f64,
    pub health_memory_threshold_default: f64,
    pub rollout_health_cpu_threshold: f64,
    pub rollout_health_memory_threshold: f64,
}

/// The sentinel key that must never be used outside `lab`; see
/// `crate::crypto`.
pub const INSECURE_LAB_KEY: &str = "INSECURE_LAB_KEY_DO_NOT_USE_IN_PRODUCTION";

impl Settings {
    /// Loads settings from `RCP_*` environment variables, returning every
    /// parse error accumulated along the way.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::new();
        let settings = Self {
            environment: parser.get_environment("ENVIRONMENT", Environment::Lab),
            encryption_key: parser.get_string("ENCRYPTION_KEY", INSECURE_LAB_KEY),
            allow_prod_writes: parser.get_bool("ALLOW_PROD_WRITES", false),

            snapshot_capture_enabled: parser.get_bool("SNAPSHOT_CAPTURE_ENABLED", true),
            snapshot_capture_interval_seconds: parser.get_u64_range("SNAPSHOT_CAPTURE_INTERVAL_SECONDS", 3600, 1, u64::MAX),
            snapshot_max_size_bytes: parser.get_u64_range("SNAPSHOT_MAX_SIZE_BYTES", 10 * 1024 * 1024, 1, u64::MAX),
            snapshot_compression_level: parser.get_u32_range("SNAPSHOT_COMPRESSION_LEVEL", 6, 0, 9),
            snapshot_retention_count: parser.get_u32_range("SNAPSHOT_RETENTION_COUNT", 5, 1, 1000) as usize,
            snapshot_use_shell_fallback: parser.get_bool("SNAPSHOT_USE_SHELL_FALLBACK", true),

            routeros_verify_ssl: parser.get_bool("ROUTEROS_VERIFY_SSL", true),
            session_ttl_seconds: parser.get_u64_range("SESSION_TTL_SECONDS", 8 * 3600, 60, u64::MAX),

            approval_token_ttl_seconds: 15 * 60,
            default_batch_size: parser.get_u32_range("DEFAULT_BATCH_SIZE", 5, 1, 50) as usize,
            transport_semaphore_permits: parser.get_u32_range("TRANSPORT_SEMAPHORE_PERMITS", 5, 1, 1000) as usize,
            health_cpu_threshold_default: parser.get_f64("HEALTH_CPU_THRESHOLD", 90.0),
            health_memory_threshold_default: parser.get_f64("HEALTH_MEMORY_THRESHOLD", 90.0),
            rollout_health_cpu_threshold: parser.get_f64("ROLLOUT_HEALTH_CPU_THRESHOLD", 80.0),
            rollout_health_memory_threshold: parser.get_f64("ROLLOUT_HEALTH_MEMORY_THRESHOLD", 85.0),
        };

        if parser.has_errors() {
            return Err(parser.errors);
        }
        Ok(settings)
    }

    pub fn is_insecure_lab_key(&self) -> bool {
        self.encryption_key == INSECURE_LAB_KEY
    }
}
