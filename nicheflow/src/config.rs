//! Configuration for the analysis service, scheduler and progress stream.

use crate::errors::NicheflowError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the niche analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisServiceConfig {
    /// Base URL of the service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path prefix of the niche API.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Whole-request timeout in seconds. Applies to the fallback and export
    /// requests, not to the push channel.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_api_prefix() -> String {
    "/api/niche".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("nicheflow/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for AnalysisServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_prefix: default_api_prefix(),
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl AnalysisServiceConfig {
    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the API prefix.
    #[must_use]
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Resolves an endpoint path under the API prefix.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// The trigger and fallback endpoint.
    #[must_use]
    pub fn analyze_url(&self) -> String {
        self.endpoint("analyze")
    }

    /// The push channel endpoint.
    #[must_use]
    pub fn stream_url(&self) -> String {
        self.endpoint("analyze/stream")
    }

    /// The CSV export endpoint.
    #[must_use]
    pub fn export_url(&self) -> String {
        self.endpoint("export/csv")
    }

    /// Request timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Connect timeout as a Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Configuration for the auto-mode scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Initial value of the auto-mode flag.
    #[serde(default)]
    pub auto_mode: bool,
    /// Delay between a stage completing and the automatic `advance()`.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

fn default_settle_delay() -> u64 {
    2000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_mode: false,
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl SchedulerConfig {
    /// Sets the initial auto-mode flag.
    #[must_use]
    pub fn with_auto_mode(mut self, enabled: bool) -> Self {
        self.auto_mode = enabled;
        self
    }

    /// Sets the settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Settle delay as a Duration.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Configuration for progress streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Whether a server-reported `error` event triggers the fallback request.
    #[serde(default = "default_fallback_on_server_error")]
    pub fallback_on_server_error: bool,
}

fn default_fallback_on_server_error() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fallback_on_server_error: default_fallback_on_server_error(),
        }
    }
}

impl StreamConfig {
    /// Sets the server-error fallback policy.
    #[must_use]
    pub fn with_fallback_on_server_error(mut self, enabled: bool) -> Self {
        self.fallback_on_server_error = enabled;
        self
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicheflowConfig {
    /// Analysis service settings.
    #[serde(default)]
    pub analysis: AnalysisServiceConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Stream settings.
    #[serde(default)]
    pub stream: StreamConfig,
}

impl NicheflowConfig {
    /// Parses configuration from a JSON string. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, NicheflowError> {
        serde_json::from_str(json).map_err(|e| NicheflowError::Config(e.to_string()))
    }

    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Config` if it is malformed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, NicheflowError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Defaults overridden from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a variable holds a malformed value.
    pub fn from_env() -> Result<Self, NicheflowError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `NICHEFLOW_*` overrides from a variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a variable holds a malformed value.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, NicheflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NICHEFLOW_ANALYSIS_URL") {
            self.analysis.base_url = url;
        }
        if let Some(prefix) = lookup("NICHEFLOW_API_PREFIX") {
            self.analysis.api_prefix = prefix;
        }
        if let Some(value) = lookup("NICHEFLOW_AUTO_MODE") {
            self.scheduler.auto_mode = parse_bool("NICHEFLOW_AUTO_MODE", &value)?;
        }
        if let Some(value) = lookup("NICHEFLOW_SETTLE_DELAY_MS") {
            self.scheduler.settle_delay_ms = value.trim().parse().map_err(|_| {
                NicheflowError::Config(format!("NICHEFLOW_SETTLE_DELAY_MS: expected milliseconds, got '{value}'"))
            })?;
        }
        if let Some(value) = lookup("NICHEFLOW_STREAM_FALLBACK_ON_ERROR") {
            self.stream.fallback_on_server_error = parse_bool("NICHEFLOW_STREAM_FALLBACK_ON_ERROR", &value)?;
        }
        Ok(self)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, NicheflowError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(NicheflowError::Config(format!("{key}: expected a boolean, got '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NicheflowConfig::default();
        assert_eq!(config.analysis.base_url, "http://localhost:5000");
        assert_eq!(config.analysis.analyze_url(), "http://localhost:5000/api/niche/analyze");
        assert_eq!(config.analysis.stream_url(), "http://localhost:5000/api/niche/analyze/stream");
        assert_eq!(config.analysis.export_url(), "http://localhost:5000/api/niche/export/csv");
        assert!(!config.scheduler.auto_mode);
        assert_eq!(config.scheduler.settle_delay(), Duration::from_secs(2));
        assert!(config.stream.fallback_on_server_error);
    }

    #[test]
    fn test_endpoint_tolerates_slashes() {
        let config = AnalysisServiceConfig::default()
            .with_base_url("https://analysis.example.com/")
            .with_api_prefix("v2/niche/");
        assert_eq!(config.analyze_url(), "https://analysis.example.com/v2/niche/analyze");
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = NicheflowConfig::from_json_str(r#"{"scheduler": {"auto_mode": true}}"#).unwrap();
        assert!(config.scheduler.auto_mode);
        assert_eq!(config.scheduler.settle_delay_ms, 2000);
        assert_eq!(config.analysis, AnalysisServiceConfig::default());
    }

    #[test]
    fn test_malformed_json() {
        let err = NicheflowConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, NicheflowError::Config(_)));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"analysis": {{"base_url": "http://10.0.0.5:8080"}}, "stream": {{"fallback_on_server_error": false}}}}"#
        )
        .unwrap();

        let config = NicheflowConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.analysis.base_url, "http://10.0.0.5:8080");
        assert!(!config.stream.fallback_on_server_error);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = NicheflowConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, NicheflowError::Io(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("NICHEFLOW_ANALYSIS_URL", "http://analysis:5000"),
            ("NICHEFLOW_AUTO_MODE", "yes"),
            ("NICHEFLOW_SETTLE_DELAY_MS", "0"),
        ]
        .into_iter()
        .collect();

        let config = NicheflowConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.analysis.base_url, "http://analysis:5000");
        assert!(config.scheduler.auto_mode);
        assert_eq!(config.scheduler.settle_delay_ms, 0);
        assert!(config.stream.fallback_on_server_error);
    }

    #[test]
    fn test_bad_env_value() {
        let err = NicheflowConfig::default()
            .with_overrides(|key| (key == "NICHEFLOW_SETTLE_DELAY_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("NICHEFLOW_SETTLE_DELAY_MS"));
    }
}
