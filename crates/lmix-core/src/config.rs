use crate::renderer::RenderMode;
use crate::selection::{Preset, ProcessingMode, UserTier};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "levelmix";
const CONFIG_FILE_NAME: &str = "config.toml";
const CURRENT_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_500;
pub const DEFAULT_COMPLETION_DELAY_MS: u64 = 1_000;
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;

const POLL_INTERVAL_RANGE_MS: (u64, u64) = (250, 60_000);
const FRAME_INTERVAL_RANGE_MS: (u64, u64) = (10, 1_000);
const MAX_COMPLETION_DELAY_MS: u64 = 10_000;

/// Result returned by [`load_config`], capturing the source and any non-fatal issues.
#[derive(Debug, Clone)]
pub struct ConfigLoadResult {
    pub config: ClientConfig,
    pub warnings: Vec<String>,
    pub source: ConfigSource,
}

/// Indicates where the configuration was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// No persisted configuration was found or usable; defaults were synthesized.
    Default,
    /// Configuration was read from `config.toml`.
    File,
}

/// Errors that can occur when persisting configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Ser(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {err}"),
            ConfigError::Ser(err) => write!(f, "TOML serialization error: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Ser(value)
    }
}

/// Disk-backed configuration schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "ClientConfig::schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub server: ServerPreferences,
    #[serde(default)]
    pub polling: PollingPreferences,
    #[serde(default)]
    pub upload: UploadPreferences,
    #[serde(default)]
    pub account: AccountPreferences,
    #[serde(default)]
    pub ui: UiPreferences,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            server: ServerPreferences::default(),
            polling: PollingPreferences::default(),
            upload: UploadPreferences::default(),
            account: AccountPreferences::default(),
            ui: UiPreferences::default(),
        }
    }
}

impl ClientConfig {
    const fn schema_version() -> u32 {
        CURRENT_SCHEMA_VERSION
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.polling.completion_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.ui.frame_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerPreferences {
    #[serde(default = "ServerPreferences::default_base_url")]
    pub base_url: String,
    /// Opaque session cookie forwarded on every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

impl Default for ServerPreferences {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            cookie: None,
        }
    }
}

impl ServerPreferences {
    fn default_base_url() -> String {
        DEFAULT_BASE_URL.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingPreferences {
    #[serde(default = "PollingPreferences::default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "PollingPreferences::default_completion_delay_ms")]
    pub completion_delay_ms: u64,
}

impl Default for PollingPreferences {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            completion_delay_ms: DEFAULT_COMPLETION_DELAY_MS,
        }
    }
}

impl PollingPreferences {
    const fn default_interval_ms() -> u64 {
        DEFAULT_POLL_INTERVAL_MS
    }

    const fn default_completion_delay_ms() -> u64 {
        DEFAULT_COMPLETION_DELAY_MS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadPreferences {
    #[serde(default)]
    pub default_preset: Preset,
    #[serde(default)]
    pub default_mode: ProcessingMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountPreferences {
    #[serde(default)]
    pub tier: UserTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiPreferences {
    #[serde(default)]
    pub render_mode: RenderMode,
    #[serde(default = "UiPreferences::default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::default(),
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
        }
    }
}

impl UiPreferences {
    const fn default_frame_interval_ms() -> u64 {
        DEFAULT_FRAME_INTERVAL_MS
    }
}

/// Per-invocation overrides (environment and command-line flags).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeOverrides {
    pub base_url: Option<String>,
    pub cookie: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub tier: Option<UserTier>,
    pub render_mode: Option<RenderMode>,
}

impl RuntimeOverrides {
    pub fn is_empty(&self) -> bool {
        self.base_url.is_none()
            && self.cookie.is_none()
            && self.poll_interval_ms.is_none()
            && self.tier.is_none()
            && self.render_mode.is_none()
    }

    /// Read `LEVELMIX_BASE_URL`, `LEVELMIX_COOKIE` and `LEVELMIX_POLL_INTERVAL_MS`.
    pub fn from_env(warnings: &mut Vec<String>) -> Self {
        let mut overrides = RuntimeOverrides {
            base_url: non_empty_env("LEVELMIX_BASE_URL"),
            cookie: non_empty_env("LEVELMIX_COOKIE"),
            ..RuntimeOverrides::default()
        };
        if let Some(raw) = non_empty_env("LEVELMIX_POLL_INTERVAL_MS") {
            match raw.parse::<u64>() {
                Ok(value) => overrides.poll_interval_ms = Some(value),
                Err(err) => warnings.push(format!(
                    "Ignoring invalid LEVELMIX_POLL_INTERVAL_MS '{raw}': {err}"
                )),
            }
        }
        overrides
    }

    /// Layer `other` on top of `self`; values present in `other` win.
    pub fn merged_with(self, other: RuntimeOverrides) -> RuntimeOverrides {
        RuntimeOverrides {
            base_url: other.base_url.or(self.base_url),
            cookie: other.cookie.or(self.cookie),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            tier: other.tier.or(self.tier),
            render_mode: other.render_mode.or(self.render_mode),
        }
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Apply overrides to a loaded configuration and re-run sanitization.
pub fn apply_runtime_overrides(
    config: &mut ClientConfig,
    overrides: &RuntimeOverrides,
    warnings: &mut Vec<String>,
) {
    if let Some(base_url) = overrides.base_url.as_ref() {
        config.server.base_url = base_url.clone();
    }
    if let Some(cookie) = overrides.cookie.as_ref() {
        config.server.cookie = Some(cookie.clone());
    }
    if let Some(interval) = overrides.poll_interval_ms {
        config.polling.interval_ms = interval;
    }
    if let Some(tier) = overrides.tier {
        config.account.tier = tier;
    }
    if let Some(mode) = overrides.render_mode {
        config.ui.render_mode = mode;
    }

    let (sanitized, mut sanitize_warnings) = sanitize_config(config.clone());
    *config = sanitized;
    warnings.append(&mut sanitize_warnings);
}

/// Directory containing `config.toml` and the `logs/` folder.
pub fn config_directory() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Path to `config.toml`.
pub fn config_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Load the configuration from the default location, falling back to defaults.
pub fn load_config() -> ConfigLoadResult {
    load_config_from(&config_path())
}

/// Load the configuration from an explicit path.
pub fn load_config_from(path: &std::path::Path) -> ConfigLoadResult {
    let mut warnings = Vec::new();

    if path.exists() {
        match fs::read_to_string(path) {
            Ok(raw) => match toml::from_str::<ClientConfig>(&raw) {
                Ok(cfg) => {
                    let (cfg, mut sanitize_warnings) = sanitize_config(cfg);
                    warnings.append(&mut sanitize_warnings);
                    return ConfigLoadResult {
                        config: cfg,
                        warnings,
                        source: ConfigSource::File,
                    };
                }
                Err(err) => {
                    warnings.push(format!(
                        "Failed to parse {} as TOML: {}. Falling back to defaults.",
                        path.display(),
                        err
                    ));
                }
            },
            Err(err) => {
                warnings.push(format!(
                    "Failed to read {}: {}. Falling back to defaults.",
                    path.display(),
                    err
                ));
            }
        }
    }

    ConfigLoadResult {
        config: ClientConfig::default(),
        warnings,
        source: ConfigSource::Default,
    }
}

/// Persist the configuration to the default location.
pub fn save_config(config: &ClientConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &ClientConfig, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let serialized = toml::to_string_pretty(config)?;
    fs::write(path, serialized)?;
    Ok(())
}

fn sanitize_config(mut config: ClientConfig) -> (ClientConfig, Vec<String>) {
    let mut warnings = Vec::new();

    if config.schema_version != CURRENT_SCHEMA_VERSION {
        warnings.push(format!(
            "Unknown config schema version {}. Resetting to {}.",
            config.schema_version, CURRENT_SCHEMA_VERSION
        ));
        return (ClientConfig::default(), warnings);
    }

    let trimmed = config.server.base_url.trim().trim_end_matches('/').to_string();
    if trimmed.is_empty() {
        warnings.push(format!(
            "Empty server base_url. Using {}.",
            DEFAULT_BASE_URL
        ));
        config.server.base_url = DEFAULT_BASE_URL.to_string();
    } else if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        warnings.push(format!(
            "Server base_url '{}' must start with http:// or https://. Using {}.",
            trimmed, DEFAULT_BASE_URL
        ));
        config.server.base_url = DEFAULT_BASE_URL.to_string();
    } else {
        config.server.base_url = trimmed;
    }

    if let Some(cookie) = config.server.cookie.as_ref() {
        if cookie.trim().is_empty() {
            config.server.cookie = None;
        }
    }

    let (min_poll, max_poll) = POLL_INTERVAL_RANGE_MS;
    if !(min_poll..=max_poll).contains(&config.polling.interval_ms) {
        let clamped = config.polling.interval_ms.clamp(min_poll, max_poll);
        warnings.push(format!(
            "Poll interval {} ms is out of range. Using {} ms.",
            config.polling.interval_ms, clamped
        ));
        config.polling.interval_ms = clamped;
    }

    if config.polling.completion_delay_ms > MAX_COMPLETION_DELAY_MS {
        warnings.push(format!(
            "Completion delay {} ms is too long. Using {} ms.",
            config.polling.completion_delay_ms, MAX_COMPLETION_DELAY_MS
        ));
        config.polling.completion_delay_ms = MAX_COMPLETION_DELAY_MS;
    }

    let (min_frame, max_frame) = FRAME_INTERVAL_RANGE_MS;
    if !(min_frame..=max_frame).contains(&config.ui.frame_interval_ms) {
        let clamped = config.ui.frame_interval_ms.clamp(min_frame, max_frame);
        warnings.push(format!(
            "Frame interval {} ms is out of range. Using {} ms.",
            config.ui.frame_interval_ms, clamped
        ));
        config.ui.frame_interval_ms = clamped;
    }

    if config.account.tier.0 > UserTier::PROFESSIONAL.0 {
        warnings.push(format!(
            "Unknown account tier {}. Treating as free.",
            config.account.tier.0
        ));
        config.account.tier = UserTier::FREE;
    }

    (config, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_observed_polling() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(1_500));
        assert_eq!(config.completion_delay(), Duration::from_millis(1_000));
        assert_eq!(config.upload.default_preset, Preset::Dj);
        assert_eq!(config.upload.default_mode, ProcessingMode::Fast);
    }

    #[test]
    fn test_sanitize_clamps_intervals() {
        let mut config = ClientConfig::default();
        config.polling.interval_ms = 10;
        config.ui.frame_interval_ms = 5_000;
        config.polling.completion_delay_ms = 60_000;

        let (sanitized, warnings) = sanitize_config(config);

        assert_eq!(sanitized.polling.interval_ms, 250);
        assert_eq!(sanitized.ui.frame_interval_ms, 1_000);
        assert_eq!(sanitized.polling.completion_delay_ms, 10_000);
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn test_sanitize_base_url() {
        let mut config = ClientConfig::default();
        config.server.base_url = " https://levelmix.example/ ".to_string();
        let (sanitized, warnings) = sanitize_config(config);
        assert_eq!(sanitized.server.base_url, "https://levelmix.example");
        assert!(warnings.is_empty());

        let mut config = ClientConfig::default();
        config.server.base_url = "ftp://nope".to_string();
        let (sanitized, warnings) = sanitize_config(config);
        assert_eq!(sanitized.server.base_url, DEFAULT_BASE_URL);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_sanitize_unknown_schema_resets() {
        let mut config = ClientConfig::default();
        config.schema_version = 99;
        config.polling.interval_ms = 2_000;
        let (sanitized, warnings) = sanitize_config(config);
        assert_eq!(sanitized, ClientConfig::default());
        assert!(warnings[0].contains("schema version"));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ClientConfig::default();
        config.server.base_url = "https://levelmix.example".to_string();
        config.account.tier = UserTier::PREMIUM;
        config.upload.default_mode = ProcessingMode::Precise;
        config.ui.render_mode = RenderMode::Direct;
        save_config_to(&config, &path).expect("save");

        let load = load_config_from(&path);
        assert_eq!(load.source, ConfigSource::File);
        assert!(load.warnings.is_empty(), "{:?}", load.warnings);
        assert_eq!(load.config, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[polling]\ninterval_ms = 2000\n").expect("write");

        let load = load_config_from(&path);
        assert_eq!(load.config.polling.interval_ms, 2_000);
        assert_eq!(load.config.polling.completion_delay_ms, 1_000);
        assert_eq!(load.config.server.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_bad_toml_falls_back() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[polling\ninterval_ms = ").expect("write");

        let load = load_config_from(&path);
        assert_eq!(load.source, ConfigSource::Default);
        assert_eq!(load.warnings.len(), 1);
    }

    #[test]
    fn test_overrides_apply_and_sanitize() {
        let mut config = ClientConfig::default();
        let mut warnings = Vec::new();
        let overrides = RuntimeOverrides {
            base_url: Some("https://api.levelmix.example/".to_string()),
            poll_interval_ms: Some(1),
            tier: Some(UserTier::PROFESSIONAL),
            ..RuntimeOverrides::default()
        };
        apply_runtime_overrides(&mut config, &overrides, &mut warnings);
        assert_eq!(config.server.base_url, "https://api.levelmix.example");
        assert_eq!(config.polling.interval_ms, 250);
        assert!(config.account.tier.is_premium());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_override_merge_prefers_later_layer() {
        let env_layer = RuntimeOverrides {
            base_url: Some("https://env".to_string()),
            poll_interval_ms: Some(2_000),
            ..RuntimeOverrides::default()
        };
        let cli_layer = RuntimeOverrides {
            base_url: Some("https://cli".to_string()),
            ..RuntimeOverrides::default()
        };
        let merged = env_layer.merged_with(cli_layer);
        assert_eq!(merged.base_url.as_deref(), Some("https://cli"));
        assert_eq!(merged.poll_interval_ms, Some(2_000));
        assert!(!merged.is_empty());
        assert!(RuntimeOverrides::default().is_empty());
    }
}
