//! Configuration for the criteria parsers and matcher.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (LLM_PARSER_ENABLED, OPENAI_API_KEY, ...)
//! 2. Config file (.trialmatch/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .trialmatch/config.yaml
//! - Falls back to ~/.trialmatch/config.yaml
//!
//! The API credential is read from the environment only, never from the file.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, Serializer};

use crate::core::QualityLimits;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<Settings, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".trialmatch";
const CONFIG_FILE: &str = "config.yaml";

pub const ENV_LLM_ENABLED: &str = "LLM_PARSER_ENABLED";
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_LLM_ENDPOINT: &str = "LLM_PARSER_ENDPOINT";
pub const ENV_LLM_MODEL: &str = "LLM_PARSER_MODEL";
pub const ENV_LLM_TIMEOUT: &str = "LLM_PARSER_TIMEOUT_SECONDS";
pub const ENV_TOP_K: &str = "TRIALMATCH_TOP_K";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmConfig {
    pub enabled: Option<bool>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GateConfig {
    pub unknown_ratio_trigger: Option<f64>,
    pub min_llm_coverage_ratio: Option<f64>,
    pub reject_empty_llm_output: Option<bool>,
    pub max_rules: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchingConfig {
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchConfig {
    pub concurrency: Option<usize>,
}

/// LLM parser settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmSettings {
    pub enabled: bool,
    #[serde(serialize_with = "redact")]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_output_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_seconds: 30,
            max_output_tokens: 2000,
        }
    }
}

impl LlmSettings {
    /// Credential, if set to something non-blank
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

fn redact<S: Serializer>(key: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match key {
        Some(_) => serializer.serialize_str("***"),
        None => serializer.serialize_none(),
    }
}

/// Fallback gate settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateSettings {
    /// Unknown-rule share above which a rule_v1 result warrants re-parsing
    pub unknown_ratio_trigger: f64,
    pub quality: QualityLimits,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            unknown_ratio_trigger: 0.5,
            quality: QualityLimits::default(),
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub llm: LlmSettings,
    pub gate: GateSettings,
    /// Maximum results returned by ranking
    pub top_k: usize,
    /// Parallel parses in `parse-batch`
    pub batch_concurrency: usize,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            gate: GateSettings::default(),
            top_k: 20,
            batch_concurrency: 4,
            config_file: None,
        }
    }
}

/// Find config file by searching `start` and its parents, then the home directory
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
        .filter(|path| path.exists())
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("Invalid boolean for {}: '{}'", key, other),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: '{}'", key, raw))
}

/// Merge a parsed config file with environment overrides
pub fn resolve(
    file: ConfigFile,
    config_file: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let defaults = Settings::default();

    let enabled = match env(ENV_LLM_ENABLED) {
        Some(raw) => parse_bool(ENV_LLM_ENABLED, &raw)?,
        None => file.llm.enabled.unwrap_or(defaults.llm.enabled),
    };
    let timeout_seconds = match env(ENV_LLM_TIMEOUT) {
        Some(raw) => parse_env(ENV_LLM_TIMEOUT, &raw)?,
        None => file
            .llm
            .timeout_seconds
            .unwrap_or(defaults.llm.timeout_seconds),
    };
    let top_k = match env(ENV_TOP_K) {
        Some(raw) => parse_env(ENV_TOP_K, &raw)?,
        None => file.matching.top_k.unwrap_or(defaults.top_k),
    };

    let llm = LlmSettings {
        enabled,
        api_key: env(ENV_API_KEY).filter(|k| !k.trim().is_empty()),
        endpoint: env(ENV_LLM_ENDPOINT)
            .or(file.llm.endpoint)
            .unwrap_or(defaults.llm.endpoint),
        model: env(ENV_LLM_MODEL)
            .or(file.llm.model)
            .unwrap_or(defaults.llm.model),
        timeout_seconds,
        max_output_tokens: file
            .llm
            .max_output_tokens
            .unwrap_or(defaults.llm.max_output_tokens),
    };

    let quality_defaults = defaults.gate.quality;
    let gate = GateSettings {
        unknown_ratio_trigger: file
            .gate
            .unknown_ratio_trigger
            .unwrap_or(defaults.gate.unknown_ratio_trigger),
        quality: QualityLimits {
            reject_empty_output: file
                .gate
                .reject_empty_llm_output
                .unwrap_or(quality_defaults.reject_empty_output),
            max_rules: file.gate.max_rules.unwrap_or(quality_defaults.max_rules),
            min_coverage_ratio: file
                .gate
                .min_llm_coverage_ratio
                .unwrap_or(quality_defaults.min_coverage_ratio),
        },
    };

    Ok(Settings {
        llm,
        gate,
        top_k,
        batch_concurrency: file
            .batch
            .concurrency
            .unwrap_or(defaults.batch_concurrency)
            .max(1),
        config_file,
    })
}

/// Load configuration starting the file search at `start`
pub fn load_config_from(start: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let config_file = find_config_file(start);
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };
    resolve(file, config_file, env)
}

/// Load configuration from all sources
fn load_config() -> Result<Settings> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    load_config_from(&cwd, |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static Settings> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<Settings> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let settings = resolve(ConfigFile::default(), None, env_from(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(!settings.llm.enabled);
        assert!(settings.llm.api_key().is_none());
        assert_eq!(settings.top_k, 20);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
llm:
  enabled: true
  model: gpt-4o
  max_output_tokens: 1500
gate:
  min_llm_coverage_ratio: 0.25
  max_rules: 80
matching:
  top_k: 5
batch:
  concurrency: 8
"#
        )
        .unwrap();

        // Discovered from a nested directory
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let settings = load_config_from(&nested, env_from(&[])).unwrap();

        assert_eq!(settings.config_file.as_deref(), Some(config_path.as_path()));
        assert!(settings.llm.enabled);
        assert_eq!(settings.llm.model, "gpt-4o");
        assert_eq!(settings.llm.max_output_tokens, 1500);
        assert_eq!(settings.gate.quality.min_coverage_ratio, 0.25);
        assert_eq!(settings.gate.quality.max_rules, 80);
        assert!(settings.gate.quality.reject_empty_output);
        assert_eq!(settings.top_k, 5);
        assert_eq!(settings.batch_concurrency, 8);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str("llm:\n  enabled: true\n  model: a\n").unwrap();
        let settings = resolve(
            file,
            None,
            env_from(&[
                (ENV_LLM_ENABLED, "false"),
                (ENV_LLM_MODEL, "b"),
                (ENV_API_KEY, "sk-test"),
                (ENV_TOP_K, "3"),
            ]),
        )
        .unwrap();
        assert!(!settings.llm.enabled);
        assert_eq!(settings.llm.model, "b");
        assert_eq!(settings.llm.api_key(), Some("sk-test"));
        assert_eq!(settings.top_k, 3);
    }

    #[test]
    fn test_invalid_env_value_is_error() {
        let result = resolve(
            ConfigFile::default(),
            None,
            env_from(&[(ENV_LLM_ENABLED, "maybe")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let settings = resolve(ConfigFile::default(), None, env_from(&[(ENV_API_KEY, "  ")])).unwrap();
        assert!(settings.llm.api_key().is_none());
    }

    #[test]
    fn test_api_key_is_redacted_when_serialized() {
        let settings = resolve(
            ConfigFile::default(),
            None,
            env_from(&[(ENV_API_KEY, "sk-secret")]),
        )
        .unwrap();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("***"));
    }
}
