//! Configuration loading and validation.
//!
//! All thresholds governing consolidation live in a TOML file inside the
//! workspace. Constraint violations are rejected at load time; nothing in
//! here can fail at runtime.

use crate::{MulchError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Trigger thresholds for memory consolidation. Immutable per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationPolicy {
    /// Maximum number of transcript entries ever presented to the model
    pub context_size: usize,

    /// Most-recent entries always excluded from consolidation
    pub tail_keep_size: usize,

    /// Backlog size that triggers a consolidation run
    pub window_size: usize,

    /// Maximum seconds between runs while any backlog exists
    pub cooldown_seconds: u64,

    /// Absolute backlog ceiling forcing a run regardless of window/cooldown
    pub hard_limit: usize,
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self {
            context_size: 75,
            tail_keep_size: 40,
            window_size: 12,
            cooldown_seconds: 900,
            hard_limit: 30,
        }
    }
}

impl ConsolidationPolicy {
    /// Check all policy constraints. Called at config load.
    pub fn validate(&self) -> Result<()> {
        if self.context_size == 0 {
            return Err(MulchError::Config("context_size must be > 0".into()));
        }
        if self.window_size == 0 {
            return Err(MulchError::Config("window_size must be > 0".into()));
        }
        if self.cooldown_seconds == 0 {
            return Err(MulchError::Config("cooldown_seconds must be > 0".into()));
        }
        if self.hard_limit == 0 {
            return Err(MulchError::Config("hard_limit must be > 0".into()));
        }
        if self.tail_keep_size >= self.context_size {
            return Err(MulchError::Config(format!(
                "tail_keep_size ({}) must be smaller than context_size ({})",
                self.tail_keep_size, self.context_size
            )));
        }
        Ok(())
    }
}

/// LLM endpoint settings for the consolidation summarizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// OpenAI-compatible API base URL (no trailing slash)
    pub base_url: String,

    /// Model used for consolidation prompts
    pub model: String,

    /// Environment variable holding the API key. The key itself never
    /// appears in the config file.
    pub api_key_env: String,

    /// Completion token budget per consolidation call
    pub max_tokens: u32,

    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(MulchError::Config("provider.base_url must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(MulchError::Config("provider.model must not be empty".into()));
        }
        if self.api_key_env.trim().is_empty() {
            return Err(MulchError::Config(
                "provider.api_key_env must not be empty".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(MulchError::Config("provider.max_tokens must be > 0".into()));
        }
        Ok(())
    }
}

/// Top-level configuration, loaded from `mulch.toml` in the workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MulchConfig {
    pub consolidation: ConsolidationPolicy,
    pub provider: ProviderConfig,
}

impl MulchConfig {
    /// Load and validate a config file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: MulchConfig = toml::from_str(&content)
            .map_err(|e| MulchError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.consolidation.validate()?;
        self.provider.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MulchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consolidation.window_size, 12);
        assert_eq!(config.consolidation.hard_limit, 30);
    }

    #[test]
    fn test_tail_must_stay_below_context() {
        let policy = ConsolidationPolicy {
            context_size: 40,
            tail_keep_size: 40,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        for policy in [
            ConsolidationPolicy {
                window_size: 0,
                ..Default::default()
            },
            ConsolidationPolicy {
                hard_limit: 0,
                ..Default::default()
            },
            ConsolidationPolicy {
                cooldown_seconds: 0,
                ..Default::default()
            },
        ] {
            assert!(policy.validate().is_err());
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MulchConfig = toml::from_str(
            r#"
            [consolidation]
            window_size = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.consolidation.window_size, 6);
        assert_eq!(config.consolidation.tail_keep_size, 40);
        assert_eq!(config.provider.api_key_env, "OPENAI_API_KEY");
    }

    #[tokio::test]
    async fn test_load_missing_file_falls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = MulchConfig::load_or_default(&dir.path().join("mulch.toml"))
            .await
            .unwrap();
        assert_eq!(config, MulchConfig::default());
    }
}
