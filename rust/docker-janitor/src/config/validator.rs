//! Configuration validation.
//!
//! Every rule is checked and all violations are reported together.

use url::Url;

use super::error::{ConfigResult, ConfigurationError};
use super::{CleanerConfig, DockerConfig, JanitorConfig, LoggingConfig, OracleConfig};
use crate::scheduler::CronParser;

/// Log formats understood by [`crate::logging::init_tracing`].
pub const LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Configuration validator.
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire configuration.
    ///
    /// Returns `Ok(())` if valid, or a `ConfigurationError` with all issues.
    pub fn validate(config: &JanitorConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if config.launcher.worker_threads == 0 {
            errors.push(ConfigurationError::invalid(
                "launcher.worker_threads",
                "the worker pool needs at least one thread",
                "Set launcher.worker_threads (or JANITOR__LAUNCHER__WORKER_THREADS) to 1 or more",
            ));
        }

        for result in [
            Self::validate_docker(&config.docker),
            Self::validate_oracle(&config.oracle),
            Self::validate_cleaner(&config.cleaner),
            Self::validate_logging(&config.logging),
        ] {
            match result {
                Ok(()) => {}
                Err(ConfigurationError::Multiple(errs)) => errors.extend(errs),
                Err(e) => errors.push(e),
            }
        }

        ConfigurationError::from_errors(errors)
    }

    /// Validate the docker client settings.
    pub fn validate_docker(config: &DockerConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if config.binary.trim().is_empty() {
            errors.push(ConfigurationError::invalid(
                "docker.binary",
                "the docker binary is empty",
                "Set docker.binary to `docker` or an absolute path to the client",
            ));
        }
        if config.command_timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "docker.command_timeout_secs",
                "a zero timeout would fail every docker command",
                "Set docker.command_timeout_secs to a positive number of seconds",
            ));
        }

        ConfigurationError::from_errors(errors)
    }

    /// Validate the ownership oracle settings.
    pub fn validate_oracle(config: &OracleConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        match Url::parse(&config.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ConfigurationError::invalid(
                "oracle.base_url",
                format!("unsupported scheme `{}`", url.scheme()),
                "Use an http:// or https:// URL, e.g. http://localhost:8080/api",
            )),
            Err(e) => errors.push(ConfigurationError::invalid(
                "oracle.base_url",
                format!("'{}' is not a URL: {e}", config.base_url),
                "Use an http:// or https:// URL, e.g. http://localhost:8080/api",
            )),
        }
        if config.timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "oracle.timeout_secs",
                "a zero timeout would fail every ownership lookup",
                "Set oracle.timeout_secs to a positive number of seconds",
            ));
        }

        ConfigurationError::from_errors(errors)
    }

    /// Validate the cleaner schedule and exclusions.
    pub fn validate_cleaner(config: &CleanerConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        match &config.cron {
            Some(expression) => {
                if let Err(e) = CronParser::parse(expression) {
                    errors.push(ConfigurationError::invalid(
                        "cleaner.cron",
                        e.to_string(),
                        "Use `minute hour day-of-month month day-of-week`, e.g. `0 * * * *`",
                    ));
                }
            }
            None => {
                if config.interval_secs == 0 {
                    errors.push(ConfigurationError::invalid(
                        "cleaner.interval_secs",
                        "a zero interval never schedules the cleaner",
                        "Set cleaner.interval_secs to a positive number of seconds or set cleaner.cron",
                    ));
                }
            }
        }

        for (index, group) in config.additional_networks.iter().enumerate() {
            if group.is_empty() || group.iter().any(|name| name.trim().is_empty()) {
                errors.push(ConfigurationError::invalid(
                    format!("cleaner.additional_networks[{index}]"),
                    "exclusion groups must list at least one non-empty network name",
                    "Remove the empty group or fill in the network names to protect",
                ));
            }
        }

        ConfigurationError::from_errors(errors)
    }

    /// Validate logging settings.
    pub fn validate_logging(config: &LoggingConfig) -> ConfigResult<()> {
        if LOG_FORMATS.contains(&config.format.as_str()) {
            Ok(())
        } else {
            Err(ConfigurationError::invalid(
                "logging.format",
                format!("unknown log format '{}'", config.format),
                format!("Set logging.format to one of: {}", LOG_FORMATS.join(", ")),
            ))
        }
    }
}
