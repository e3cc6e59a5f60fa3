//! Configuration loading from timebox.toml
//!
//! The file is discovered by walking up from the current directory. Command
//! line flags override whatever it sets.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timebox configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimeboxConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Where case actions execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// Fresh worker process per case, killed on timeout (default)
    #[default]
    Process,
    /// Dedicated thread in this process, abandoned on timeout
    Thread,
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Isolation mode: "process" or "thread"
    #[serde(default)]
    pub isolation: IsolationMode,
    /// Enforce time limits
    #[serde(default = "default_true")]
    pub check_time_limit: bool,
    /// Time a new worker gets to finish its handshake (e.g. "10s")
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: String,
    /// Exit with an error when any case fails
    #[serde(default = "default_true")]
    pub fail_on_failure: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationMode::default(),
            check_time_limit: true,
            startup_timeout: default_startup_timeout(),
            fail_on_failure: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_startup_timeout() -> String {
    "10s".to_string()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
    /// Print full result messages instead of short tags
    #[serde(default)]
    pub verbose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            verbose: false,
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}

impl TimeboxConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join("timebox.toml");
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!(path = %config_path.display(), "ignoring config: {e:#}");
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# Timebox Configuration

[runner]
# Where case actions run: "process" (killed on timeout) or "thread"
isolation = "process"
# Enforce time limits; when false, unexpected faults abort the run
check_time_limit = true
# Time a freshly spawned worker gets to report in
startup_timeout = "10s"
# Exit non-zero when any case fails
fail_on_failure = true

[output]
# Output format: human or json
format = "human"
# Print full result messages instead of short tags
verbose = false
"#
        .to_string()
    }

    /// Parse duration string (e.g., "10s", "500ms", "2m")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration number: {}", num_part));
        }

        let seconds_per_unit = match unit_part.to_lowercase().as_str() {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" | "" => 1.0,
            "m" | "min" => 60.0,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_secs_f64(value * seconds_per_unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TimeboxConfig::default();
        assert_eq!(config.runner.isolation, IsolationMode::Process);
        assert!(config.runner.check_time_limit);
        assert!(config.runner.fail_on_failure);
        assert_eq!(config.runner.startup_timeout, "10s");
        assert_eq!(config.output.format, "human");
    }

    #[test]
    fn test_parse_duration() {
        let parse = |s| TimeboxConfig::parse_duration(s).unwrap();
        assert_eq!(parse("3s"), Duration::from_secs(3));
        assert_eq!(parse("500ms"), Duration::from_millis(500));
        assert_eq!(parse("100us"), Duration::from_micros(100));
        assert_eq!(parse("2m"), Duration::from_secs(120));
        assert_eq!(parse("1.5s"), Duration::from_millis(1500));
        assert_eq!(parse("7"), Duration::from_secs(7));
        assert!(TimeboxConfig::parse_duration("").is_err());
        assert!(TimeboxConfig::parse_duration("5 parsecs").is_err());
        assert!(TimeboxConfig::parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [runner]
            isolation = "thread"
            check_time_limit = false

            [output]
            verbose = true
        "#;

        let config: TimeboxConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runner.isolation, IsolationMode::Thread);
        assert!(!config.runner.check_time_limit);
        assert!(config.output.verbose);
        // Defaults should still apply
        assert!(config.runner.fail_on_failure);
        assert_eq!(config.output.format, "human");
    }

    #[test]
    fn test_default_toml_parses() {
        let config: TimeboxConfig = toml::from_str(&TimeboxConfig::default_toml()).unwrap();
        assert_eq!(config.runner.isolation, IsolationMode::Process);
        assert_eq!(
            TimeboxConfig::parse_duration(&config.runner.startup_timeout).unwrap(),
            Duration::from_secs(10)
        );
    }
}
