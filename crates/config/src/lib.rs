//! Configuration loading, validation, and management for lorekeep.
//!
//! Loads configuration from `$LOREKEEP_CONFIG` or `~/.lorekeep/config.toml`
//! with environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.lorekeep/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tool-calling language model
    #[serde(default)]
    pub model: ModelConfig,

    /// Multimodal extraction model
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Persistence / event backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Third-party tool integration (mail, drive, sheets)
    #[serde(default)]
    pub external_tools: ExternalToolsConfig,

    /// Phase orchestration knobs
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Command execution and workspace limits
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Stuck-loop detection
    #[serde(default)]
    pub loop_detection: LoopDetectionConfig,

    /// HTTP entry point
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    8192
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            api_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

fn default_extractor_model() -> String {
    "gemini-2.5-pro".into()
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            model: default_extractor_model(),
            api_key: None,
            api_url: None,
        }
    }
}

impl std::fmt::Debug for ExtractorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorConfig")
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Retries for transient failures (critical calls escalate after these)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_backend_timeout() -> u64 {
    30
}
/// Upper bound for `backend.max_retries`; backoff doubles per attempt.
pub const MAX_BACKEND_RETRIES: u32 = 10;

fn default_max_retries() -> u32 {
    3
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            timeout_secs: default_backend_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("token", &redact(&self.token))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ExternalToolsConfig {
    /// The integration is active only when a key is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_external_url")]
    pub api_url: String,

    /// External user ids are `{user_prefix}_{client_id}`
    #[serde(default = "default_user_prefix")]
    pub user_prefix: String,

    /// Tool-name prefixes routed to the integration
    #[serde(default = "default_tool_prefixes")]
    pub tool_prefixes: Vec<String>,

    #[serde(default = "default_result_char_cap")]
    pub result_char_cap: usize,
}

fn default_external_url() -> String {
    "https://backend.composio.dev/api/v3".into()
}
fn default_user_prefix() -> String {
    "lorekeep".into()
}
fn default_tool_prefixes() -> Vec<String> {
    vec!["GMAIL_".into(), "GOOGLEDRIVE_".into(), "GOOGLESHEETS_".into()]
}
fn default_result_char_cap() -> usize {
    30_000
}

impl Default for ExternalToolsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_external_url(),
            user_prefix: default_user_prefix(),
            tool_prefixes: default_tool_prefixes(),
            result_char_cap: default_result_char_cap(),
        }
    }
}

impl ExternalToolsConfig {
    pub fn is_active(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// The external identity used for a pipeline client.
    pub fn user_id(&self, client_id: &str) -> String {
        format!("{}_{client_id}", self.user_prefix)
    }
}

impl std::fmt::Debug for ExternalToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalToolsConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("user_prefix", &self.user_prefix)
            .field("tool_prefixes", &self.tool_prefixes)
            .field("result_char_cap", &self.result_char_cap)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_explorer_turns")]
    pub explorer_max_turns: usize,

    #[serde(default = "default_structurer_turns")]
    pub structurer_max_turns: usize,

    /// Budget for the tree-design and questionnaire agents
    #[serde(default = "default_coordinator_turns")]
    pub coordinator_max_turns: usize,

    #[serde(default = "default_writer_turns")]
    pub writer_max_turns: usize,

    /// How many concurrent structurers the file references are split across
    #[serde(default = "default_structurer_batches")]
    pub structurer_batches: usize,

    /// Overall wait for questionnaire responses
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,

    #[serde(default = "default_poll_initial")]
    pub verify_poll_initial_secs: u64,

    #[serde(default = "default_poll_max")]
    pub verify_poll_max_secs: u64,

    /// Sources used when the backend lists none
    #[serde(default = "default_sources")]
    pub default_sources: Vec<DefaultSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub label: String,
}

fn default_explorer_turns() -> usize {
    15
}
fn default_structurer_turns() -> usize {
    20
}
fn default_coordinator_turns() -> usize {
    20
}
fn default_writer_turns() -> usize {
    25
}
fn default_structurer_batches() -> usize {
    3
}
fn default_verify_timeout() -> u64 {
    120
}
fn default_poll_initial() -> u64 {
    5
}
fn default_poll_max() -> u64 {
    15
}
fn default_sources() -> Vec<DefaultSource> {
    vec![
        DefaultSource {
            source_type: "gmail".into(),
            label: "Gmail".into(),
        },
        DefaultSource {
            source_type: "drive".into(),
            label: "Google Drive".into(),
        },
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            explorer_max_turns: default_explorer_turns(),
            structurer_max_turns: default_structurer_turns(),
            coordinator_max_turns: default_coordinator_turns(),
            writer_max_turns: default_writer_turns(),
            structurer_batches: default_structurer_batches(),
            verify_timeout_secs: default_verify_timeout(),
            verify_poll_initial_secs: default_poll_initial(),
            verify_poll_max_secs: default_poll_max(),
            default_sources: default_sources(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_command_timeout")]
    pub default_timeout_secs: u64,

    /// Upper clamp for any command timeout
    #[serde(default = "default_max_timeout")]
    pub max_timeout_secs: u64,

    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,

    /// Cap on `run_command` output shown to the model
    #[serde(default = "default_output_cap")]
    pub output_char_cap: usize,

    /// Default cap for `read_local_file`
    #[serde(default = "default_read_cap")]
    pub read_char_cap: usize,

    /// Parent directory for workspaces; system temp dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
}

fn default_command_timeout() -> u64 {
    60
}
fn default_max_timeout() -> u64 {
    300
}
fn default_install_timeout() -> u64 {
    120
}
fn default_output_cap() -> usize {
    10_000
}
fn default_read_cap() -> usize {
    50_000
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_command_timeout(),
            max_timeout_secs: default_max_timeout(),
            install_timeout_secs: default_install_timeout(),
            output_char_cap: default_output_cap(),
            read_char_cap: default_read_cap(),
            workspace_root: None,
        }
    }
}

impl SandboxConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDetectionConfig {
    #[serde(default = "default_history")]
    pub history: usize,

    #[serde(default = "default_repeat_threshold")]
    pub repeat_threshold: usize,

    #[serde(default = "default_name_multiplier")]
    pub name_frequency_multiplier: usize,
}

fn default_history() -> usize {
    20
}
fn default_repeat_threshold() -> usize {
    3
}
fn default_name_multiplier() -> usize {
    4
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            history: default_history(),
            repeat_threshold: default_repeat_threshold(),
            name_frequency_multiplier: default_name_multiplier(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required on pipeline start when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_token: None,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_token", &redact(&self.auth_token))
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from `$LOREKEEP_CONFIG` or `~/.lorekeep/config.toml`,
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("LOREKEEP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (usually `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("ANTHROPIC_API_KEY") {
            self.model.api_key = Some(v);
        }
        if let Some(v) = non_empty("LOREKEEP_MODEL") {
            self.model.model = v;
        }
        if let Some(v) = non_empty("GEMINI_API_KEY") {
            self.extractor.api_key = Some(v);
        }
        if let Some(v) = non_empty("BACKEND_URL") {
            self.backend.url = v;
        }
        if let Some(v) = non_empty("BACKEND_TOKEN") {
            self.backend.token = Some(v);
        }
        if let Some(v) = non_empty("EXTERNAL_TOOLS_API_KEY") {
            self.external_tools.api_key = Some(v);
        }
        if let Some(v) = non_empty("EXTERNAL_TOOLS_USER_PREFIX") {
            self.external_tools.user_prefix = v;
        }
        if let Some(v) = non_empty("GATEWAY_AUTH_TOKEN") {
            self.gateway.auth_token = Some(v);
        }
        match non_empty("VERIFY_TIMEOUT").map(|v| v.parse::<u64>()) {
            Some(Ok(secs)) => self.pipeline.verify_timeout_secs = secs,
            Some(Err(e)) => tracing::warn!("Ignoring VERIFY_TIMEOUT: {e}"),
            None => {}
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lorekeep")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let p = &self.pipeline;
        if p.explorer_max_turns == 0
            || p.structurer_max_turns == 0
            || p.coordinator_max_turns == 0
            || p.writer_max_turns == 0
        {
            return Err(ConfigError::ValidationError(
                "pipeline turn budgets must be at least 1".into(),
            ));
        }
        if p.structurer_batches == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.structurer_batches must be at least 1".into(),
            ));
        }
        if p.verify_poll_initial_secs == 0 || p.verify_poll_initial_secs > p.verify_poll_max_secs {
            return Err(ConfigError::ValidationError(
                "pipeline.verify_poll_initial_secs must be in 1..=verify_poll_max_secs".into(),
            ));
        }

        if !(1..=MAX_BACKEND_RETRIES).contains(&self.backend.max_retries) {
            return Err(ConfigError::ValidationError(format!(
                "backend.max_retries must be between 1 and {MAX_BACKEND_RETRIES}"
            )));
        }

        if self.sandbox.max_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sandbox.max_timeout_secs must be at least 1".into(),
            ));
        }

        if self.loop_detection.repeat_threshold == 0 || self.loop_detection.name_frequency_multiplier == 0 {
            return Err(ConfigError::ValidationError(
                "loop_detection thresholds must be at least 1".into(),
            ));
        }

        if self.external_tools.is_active() && self.external_tools.tool_prefixes.is_empty() {
            return Err(ConfigError::ValidationError(
                "external_tools.tool_prefixes must not be empty when the integration is active".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.model, "claude-sonnet-4-20250514");
        assert_eq!(config.pipeline.structurer_batches, 3);
        assert_eq!(config.sandbox.max_timeout_secs, 300);
        assert!(!config.external_tools.is_active());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.provider, config.model.provider);
        assert_eq!(parsed.pipeline.default_sources, config.pipeline.default_sources);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[pipeline]
verify_timeout_secs = 30

[backend]
url = "https://example.convex.site"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.pipeline.verify_timeout_secs, 30);
        assert_eq!(config.pipeline.verify_poll_max_secs, 15);
        assert_eq!(config.backend.url, "https://example.convex.site");
        assert_eq!(config.backend.max_retries, 3);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline\nbroken").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model.provider, "anthropic");
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("BACKEND_URL", "https://b.example"),
            ("EXTERNAL_TOOLS_API_KEY", "ext"),
            ("EXTERNAL_TOOLS_USER_PREFIX", "acme"),
            ("VERIFY_TIMEOUT", "45"),
            ("GEMINI_API_KEY", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.model.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.backend.url, "https://b.example");
        assert!(config.external_tools.is_active());
        assert_eq!(config.external_tools.user_id("client42"), "acme_client42");
        assert_eq!(config.pipeline.verify_timeout_secs, 45);
        assert!(config.extractor.api_key.is_none());
    }

    #[test]
    fn bad_verify_timeout_env_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(|k| (k == "VERIFY_TIMEOUT").then(|| "soon".to_string()));
        assert_eq!(config.pipeline.verify_timeout_secs, 120);
    }

    #[test]
    fn invalid_settings_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.structurer_batches = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.verify_poll_initial_secs = 30;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.loop_detection.repeat_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.temperature = 5.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.backend.max_retries = 40;
        assert!(config.validate().is_err());
        config.backend.max_retries = MAX_BACKEND_RETRIES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-very-secret".into());
        config.backend.token = Some("tok-secret".into());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-very-secret"));
        assert!(!dbg.contains("tok-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("claude-sonnet-4-20250514"));
        assert!(toml_str.contains("GOOGLEDRIVE_"));
    }
}
