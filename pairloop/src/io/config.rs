//! Project configuration stored under `.pairloop/config.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{ModelInfo, ModelRef, Pricing};
use crate::error::UnknownModel;

/// Pairloop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PairloopConfig {
    /// Consecutive non-passing steps before the loop gives up.
    pub max_fails: u32,

    /// Tokens kept free in the model context on top of the chat estimate.
    pub context_margin_tokens: u64,

    pub default_model: String,
    pub default_provider: String,

    /// Commit the working tree when tests pass.
    pub commit_on_done: bool,

    pub test: TestConfig,
    pub provider: ProviderConfig,
    pub pack: PackConfig,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    /// Command that runs the full test suite (e.g. `["pnpm","test:all"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate captured test output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: vec!["pnpm".to_string(), "test:all".to_string()],
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl TestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Streaming bridge argv. Empty means no live provider is configured.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 600,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PackConfig {
    /// Directory names never descended into while expanding globs.
    pub ignore: Vec<String>,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            ignore: [".git", "node_modules", "target", ".pairloop"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for PairloopConfig {
    fn default() -> Self {
        Self {
            max_fails: 9,
            context_margin_tokens: 4_096,
            default_model: "gpt-oss-120b".to_string(),
            default_provider: "cerebras".to_string(),
            commit_on_done: true,
            test: TestConfig::default(),
            provider: ProviderConfig::default(),
            pack: PackConfig::default(),
            models: default_models(),
        }
    }
}

impl PairloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_fails == 0 {
            return Err(anyhow!("max_fails must be > 0"));
        }
        if self.test.timeout_secs == 0 {
            return Err(anyhow!("test.timeout_secs must be > 0"));
        }
        if self.test.output_limit_bytes == 0 {
            return Err(anyhow!("test.output_limit_bytes must be > 0"));
        }
        if self.test.command.is_empty() || self.test.command[0].trim().is_empty() {
            return Err(anyhow!("test.command must be a non-empty array"));
        }
        if self.provider.timeout_secs == 0 {
            return Err(anyhow!("provider.timeout_secs must be > 0"));
        }
        if self.models.is_empty() {
            return Err(anyhow!("models must list at least one model"));
        }
        let mut seen = BTreeSet::new();
        for model in &self.models {
            if model.context_length == 0 {
                return Err(anyhow!(
                    "model {} has context_length 0",
                    model.model_ref()
                ));
            }
            if !seen.insert(model.model_ref()) {
                return Err(anyhow!("duplicate model {}", model.model_ref()));
            }
        }
        Ok(())
    }

    pub fn default_model_ref(&self) -> ModelRef {
        ModelRef::new(&self.default_model, &self.default_provider)
    }

    /// Catalog entry for `model`.
    pub fn find_model(&self, model: &ModelRef) -> Result<&ModelInfo, UnknownModel> {
        self.models
            .iter()
            .find(|info| info.matches(model))
            .ok_or_else(|| UnknownModel {
                id: model.id.clone(),
                provider: model.provider.clone(),
            })
    }

    /// Resolve a `--model`/`--provider` pair. A missing provider picks the
    /// first catalog entry with that id.
    pub fn resolve_model(&self, id: &str, provider: Option<&str>) -> Result<ModelRef, UnknownModel> {
        let found = match provider {
            Some(provider) => self
                .models
                .iter()
                .find(|m| m.id == id && m.provider == provider),
            None => self.models.iter().find(|m| m.id == id),
        };
        found.map(ModelInfo::model_ref).ok_or_else(|| UnknownModel {
            id: id.to_string(),
            provider: provider.unwrap_or_default().to_string(),
        })
    }
}

fn model(id: &str, provider: &str, context_length: u64, prompt: f64, completion: f64) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        provider: provider.to_string(),
        context_length,
        modality: "text".to_string(),
        pricing: Pricing {
            prompt: prompt / 1e6,
            completion: completion / 1e6,
            ..Pricing::default()
        },
    }
}

/// Every model the default selection strategy can return.
pub fn default_models() -> Vec<ModelInfo> {
    vec![
        model("qwen-3-235b-a22b-instruct-2507", "cerebras", 65_536, 0.6, 1.2),
        model("gpt-oss-120b", "cerebras", 65_536, 0.35, 0.75),
        model("qwen-3-32b", "cerebras", 65_536, 0.4, 0.8),
        model("zai-glm-4.6", "cerebras", 65_536, 2.25, 2.75),
        model("Qwen/Qwen3-32B", "huggingface/cerebras", 262_144, 0.4, 0.8),
        model("openai/gpt-oss-120b", "huggingface/cerebras", 262_144, 0.35, 0.75),
        model(
            "Qwen/Qwen3-235B-A22B-Thinking-2507",
            "huggingface/cerebras",
            262_144,
            0.6,
            1.2,
        ),
        model("zai-org/GLM-4.6", "huggingface/cerebras", 262_144, 2.25, 2.75),
        model("grok-4-fast", "openrouter", 2_000_000, 0.2, 0.5),
    ]
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PairloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<PairloopConfig> {
    if !path.exists() {
        let cfg = PairloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PairloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PairloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strategy::FastestStrategy;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PairloopConfig::default());
        assert_eq!(cfg.max_fails, 9);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".pairloop").join("config.toml");
        let cfg = PairloopConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    /// A hand-written file only overriding one nested key keeps every other default.
    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_fails = 2\n[test]\ncommand = [\"cargo\", \"test\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_fails, 2);
        assert_eq!(cfg.test.command, vec!["cargo", "test"]);
        assert_eq!(cfg.test.timeout_secs, 1_800);
        assert_eq!(cfg.models, default_models());
    }

    #[test]
    fn rejects_duplicate_models_and_zero_budget() {
        let mut cfg = PairloopConfig::default();
        cfg.models.push(cfg.models[0].clone());
        assert!(cfg.validate().unwrap_err().to_string().contains("duplicate"));

        let cfg = PairloopConfig {
            max_fails: 0,
            ..PairloopConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_catalog_covers_strategy_candidates() {
        let cfg = PairloopConfig::default();
        for candidate in FastestStrategy::default().candidates() {
            cfg.find_model(&candidate).expect("candidate in catalog");
        }
        cfg.find_model(&cfg.default_model_ref()).expect("default model");
    }

    #[test]
    fn resolves_model_with_or_without_provider() {
        let cfg = PairloopConfig::default();
        let found = cfg.resolve_model("grok-4-fast", None).expect("resolve");
        assert_eq!(found.provider, "openrouter");
        let err = cfg
            .resolve_model("gpt-oss-120b", Some("nowhere"))
            .expect_err("unknown");
        assert_eq!(err.provider, "nowhere");
    }
}
