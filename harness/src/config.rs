use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on the termination grace window.
const MAX_GRACE_PERIOD_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shell program; `None` picks the host default.
    pub shell: Option<String>,
    /// Flag that makes the shell run its next argument as a script.
    pub shell_flag: Option<String>,
    /// Seconds between the graceful terminate and the forced kill.
    pub grace_period_secs: u64,
    /// Screen every command with the safety validator before running it.
    pub enforce_safety: bool,
    /// Timeout given to planner items that do not specify one.
    pub default_timeout_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shell: None,
            shell_flag: None,
            grace_period_secs: 5,
            enforce_safety: true,
            default_timeout_secs: model::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>, flag: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self.shell_flag = Some(flag.into());
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period_secs = grace_period.as_secs();
        self
    }

    pub fn with_enforce_safety(mut self, enforce: bool) -> Self {
        self.enforce_safety = enforce;
        self
    }

    pub fn with_default_timeout(mut self, timeout_secs: i64) -> Self {
        self.default_timeout_secs = timeout_secs;
        self
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Shell program and flag actually used to launch commands.
    pub fn shell_invocation(&self) -> (String, String) {
        let shell = self.shell.clone().unwrap_or_else(default_shell);
        let flag = self.shell_flag.clone().unwrap_or_else(|| default_flag().to_string());
        (shell, flag)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(shell) = &self.shell {
            if shell.trim().is_empty() {
                return Err("Shell cannot be empty".to_string());
            }
        }

        if self.grace_period_secs > MAX_GRACE_PERIOD_SECS {
            return Err(format!(
                "Grace period must be at most {} seconds",
                MAX_GRACE_PERIOD_SECS
            ));
        }

        if self.default_timeout_secs <= 0 {
            return Err("Default timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config
            .validate()
            .map_err(|message| ConfigError::Invalid { message })?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(unix)]
fn default_shell() -> String {
    if Path::new("/bin/bash").exists() {
        "/bin/bash".to_string()
    } else {
        "/bin/sh".to_string()
    }
}

#[cfg(not(unix))]
fn default_shell() -> String {
    "cmd".to_string()
}

#[cfg(unix)]
fn default_flag() -> &'static str {
    "-c"
}

#[cfg(not(unix))]
fn default_flag() -> &'static str {
    "/C"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert!(config.enforce_safety);
        assert_eq!(config.default_timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_default_shell_invocation() {
        let (shell, flag) = EngineConfig::default().shell_invocation();
        assert!(shell == "/bin/bash" || shell == "/bin/sh");
        assert_eq!(flag, "-c");
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_shell("/bin/sh", "-c")
            .with_grace_period(Duration::from_secs(1))
            .with_enforce_safety(false)
            .with_default_timeout(60);

        assert_eq!(
            config.shell_invocation(),
            ("/bin/sh".to_string(), "-c".to_string())
        );
        assert_eq!(config.grace_period_secs, 1);
        assert!(!config.enforce_safety);
        assert_eq!(config.default_timeout_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.shell = Some("  ".to_string());
        assert!(config.validate().is_err());

        config.shell = None;
        config.grace_period_secs = 301;
        assert!(config.validate().is_err());

        config.grace_period_secs = 5;
        config.default_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("grace_period_secs = 2\n").unwrap();
        assert_eq!(config.grace_period_secs, 2);
        assert!(config.enforce_safety);
        assert!(config.shell.is_none());
    }

    #[test]
    fn test_invalid_toml_values_rejected() {
        let err = EngineConfig::from_toml_str("default_timeout_secs = -1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = EngineConfig::from_toml_str("grace_period_secs = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "shell = \"/bin/sh\"").unwrap();
        writeln!(file, "shell_flag = \"-c\"").unwrap();
        writeln!(file, "enforce_safety = false").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.shell.as_deref(), Some("/bin/sh"));
        assert!(!config.enforce_safety);

        let missing = EngineConfig::load(Path::new("/nonexistent/engine.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
