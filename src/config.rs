use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AnalystError, Result};
use crate::progress::ProgressConfig;
use crate::telemetry::LogFormat;
use crate::tools::{DuckDuckGoConfig, YFinanceConfig};

pub const API_KEY_VAR: &str = "AZURE_OPENAI_KEY";
pub const ENDPOINT_VAR: &str = "AZURE_OPENAI_ENDPOINT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Sessions untouched for this long are dropped along with their history.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8501
}

fn default_session_idle_secs() -> u64 {
    3600
}

/// Hosted model settings. Credentials are carried as-is and only checked by
/// the remote service.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            endpoint: None,
            api_version: default_api_version(),
            request_timeout_secs: None,
            max_steps: default_max_steps(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_api_version() -> String {
    "2024-10-21".into()
}

fn default_max_steps() -> usize {
    6
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default)]
    pub duckduckgo: DuckDuckGoConfig,
    #[serde(default)]
    pub yfinance: YFinanceConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentPreset {
    #[default]
    FinanceExpert,
    InvestmentAnalyst,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    #[serde(default)]
    pub preset: AgentPreset,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_prefix() -> String {
    "investment_analysis".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AnalystError::Config(format!("failed to read `{}`: {err}", path.display()))
        })?;
        toml::from_str(&raw)
            .map_err(|err| AnalystError::Config(format!("failed to parse configuration: {err}")))
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg
    }

    pub fn from_env_or_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::from_env());
        };
        let mut cfg = Self::from_file(path)?;
        cfg.apply_overrides(|key| env::var(key).ok());
        Ok(cfg)
    }

    /// Applies overrides from `lookup`. Unparseable numeric or boolean values
    /// are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_VAR) {
            self.model.api_key = Some(key);
        }
        if let Some(endpoint) = lookup(ENDPOINT_VAR) {
            self.model.endpoint = Some(endpoint);
        }
        if let Some(model) = lookup("ANALYST_MODEL") {
            self.model.model = model;
        }
        if let Some(version) = lookup("ANALYST_API_VERSION") {
            self.model.api_version = version;
        }
        if let Some(host) = lookup("ANALYST_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("ANALYST_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Some(idle) = lookup("ANALYST_SESSION_IDLE_SECS") {
            if let Ok(parsed) = idle.parse::<u64>() {
                self.server.session_idle_secs = parsed;
            }
        }
        if let Some(dir) = lookup("ANALYST_EXPORT_DIR") {
            self.export.dir = PathBuf::from(dir);
        }
        if let Some(progress) = lookup("ANALYST_PROGRESS") {
            if let Ok(parsed) = progress.parse::<bool>() {
                self.progress.enabled = parsed;
            }
        }
        if let Some(format) = lookup("ANALYST_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "pretty" => self.logging.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_need_no_file() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.model.model, "gpt-4o-mini");
        assert_eq!(cfg.server.port, 8501);
        assert_eq!(cfg.server.session_idle_secs, 3600);
        assert_eq!(cfg.export.file_prefix, "investment_analysis");
        assert!(cfg.model.api_key.is_none());
        assert!(cfg.tools.yfinance.stock_price);
    }

    #[test]
    fn loads_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport=9000\n[model]\nmodel='gpt-4o'\n[agent]\npreset='investment_analyst'\n[tools.yfinance]\nstock_fundamentals=false"
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).unwrap();

        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.model.model, "gpt-4o");
        assert_eq!(cfg.agent.preset, AgentPreset::InvestmentAnalyst);
        assert!(!cfg.tools.yfinance.stock_fundamentals);
        assert!(cfg.tools.yfinance.analyst_recommendations);
    }

    #[test]
    fn overrides_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (API_KEY_VAR, "secret"),
            (ENDPOINT_VAR, "https://example.openai.azure.com"),
            ("ANALYST_PORT", "not-a-port"),
            ("ANALYST_PROGRESS", "false"),
            ("ANALYST_LOG_FORMAT", "JSON"),
            ("ANALYST_SESSION_IDLE_SECS", "90"),
        ]);
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.model.api_key.as_deref(), Some("secret"));
        assert_eq!(
            cfg.model.endpoint.as_deref(),
            Some("https://example.openai.azure.com")
        );
        assert_eq!(cfg.server.port, 8501);
        assert!(!cfg.progress.enabled);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.server.session_idle_secs, 90);
    }

    #[test]
    fn without_file_reads_environment_only() {
        assert_eq!(
            AppConfig::from_env_or_file(None).unwrap(),
            AppConfig::from_env()
        );
    }

    #[test]
    fn debug_output_hides_api_key() {
        let model = ModelConfig {
            api_key: Some("hunter2".into()),
            ..ModelConfig::default()
        };
        let rendered = format!("{model:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn reports_unparseable_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport=").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AnalystError::Config(_)));
    }
}
