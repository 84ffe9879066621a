//! Configuration for the agent engine
//!
//! Settings are loaded from a json5/toml file when one exists, with
//! environment variables (via `.env`) as the fallback. Every section has a
//! `Default` so the engine can run with no configuration at all.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// LLM adapter settings (absent when the host injects its own client)
    pub llm: Option<LlmConfig>,
    /// Outer execution-loop limits
    pub engine: EngineLimits,
    /// Specialist inner-loop limits
    pub specialist: SpecialistLimits,
    /// History compressor budget
    pub compression: CompressionConfig,
    /// MCP tool import settings
    pub mcp: McpConfig,
}

/// Settings for the HTTP LLM adapter
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// API key for the chat-completions endpoint
    pub api_key: SecretString,
    /// Default model identifier
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Base URL of the OpenRouter-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

/// Limits governing the outer agent execution loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Maximum planning iterations per user turn
    pub max_iterations: u32,
    /// History length that triggers trimming
    pub history_trim_threshold: usize,
    /// Entries kept (most recent) after a trim
    pub history_trim_keep: usize,
    /// Window within which an identical tool call counts as a duplicate
    pub duplicate_window_secs: i64,
    /// How many recent tool calls the infinite-loop detector inspects
    pub loop_window: usize,
    /// Identical tool names within the window that count as a loop
    pub loop_threshold: usize,
    /// Advisory timeout for pending user interactions, in seconds
    pub interaction_timeout_secs: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        EngineLimits {
            max_iterations: 15,
            history_trim_threshold: 100,
            history_trim_keep: 50,
            duplicate_window_secs: 30,
            loop_window: 5,
            loop_threshold: 3,
            interaction_timeout_secs: 300,
        }
    }
}

/// Limits governing a specialist's inner tool-calling loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpecialistLimits {
    /// Maximum LLM round-trips inside one specialist invocation
    pub max_internal_iterations: u32,
}

impl Default for SpecialistLimits {
    fn default() -> Self {
        SpecialistLimits {
            max_internal_iterations: 5,
        }
    }
}

/// Token budget for the history compressor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Total token budget for the compressed history
    pub budget_tokens: usize,
    /// Budget share for the immediate tier
    pub immediate_share: f64,
    /// Budget share for the recent tier
    pub recent_share: f64,
    /// Budget share for the milestone tier
    pub milestone_share: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            budget_tokens: 40_000,
            immediate_share: 0.90,
            recent_share: 0.07,
            milestone_share: 0.03,
        }
    }
}

/// Settings controlling which host-discovered tools are imported
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct McpConfig {
    /// Substring blacklist; a discovered tool whose name contains any of
    /// these keywords is not registered
    pub exclude_keywords: Vec<String>,
}

/// Default configuration file path (`$CONFIG_DIR/srsagent/config.toml`)
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("srsagent")
        .join("config.toml")
}

/// Load configuration from the default path, falling back to the environment
pub fn load_config() -> Result<Config> {
    let path = match std::env::var("SRSAGENT_CONFIG") {
        Ok(p) => PathBuf::from(p),
        Err(_) => config_path(),
    };

    if path.exists() {
        load_config_from_path(&path)
    } else {
        load_config_from_env()
    }
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Load configuration from environment variables
pub fn load_config_from_env() -> Result<Config> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let mut config = Config::default();

    if let Ok(api_key) = std::env::var("SRSAGENT_API_KEY") {
        config.llm = Some(LlmConfig {
            api_key: SecretString::from(api_key),
            default_model: std::env::var("SRSAGENT_MODEL").unwrap_or_else(|_| default_model()),
            base_url: std::env::var("SRSAGENT_BASE_URL").unwrap_or_else(|_| default_base_url()),
            timeout_secs: std::env::var("SRSAGENT_LLM_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_llm_timeout),
        });
    }

    if let Ok(keywords) = std::env::var("SRSAGENT_MCP_EXCLUDE_KEYWORDS") {
        config.mcp.exclude_keywords = keywords
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_engine_contract() {
        let config = Config::default();
        assert_eq!(config.engine.max_iterations, 15);
        assert_eq!(config.engine.history_trim_threshold, 100);
        assert_eq!(config.engine.history_trim_keep, 50);
        assert_eq!(config.specialist.max_internal_iterations, 5);
        assert_eq!(config.compression.budget_tokens, 40_000);
        assert!(config.mcp.exclude_keywords.is_empty());
    }

    #[test]
    fn loads_toml_config() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[engine]
max_iterations = 20

[mcp]
exclude_keywords = ["browser", "screenshot"]
"#
        )
        .unwrap();

        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.engine.max_iterations, 20);
        // Unspecified fields keep their defaults
        assert_eq!(config.engine.loop_window, 5);
        assert_eq!(config.mcp.exclude_keywords, vec!["browser", "screenshot"]);
    }

    #[test]
    fn loads_json5_config() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        // JSON5 tolerates trailing commas
        writeln!(
            file,
            r#"{{ "compression": {{ "budget_tokens": 8000, }}, }}"#
        )
        .unwrap();

        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.compression.budget_tokens, 8000);
    }
}
