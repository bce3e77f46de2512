//! Story generation configuration stored as TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Story generation configuration (TOML).
///
/// Missing fields default to the values the generator was tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoryConfig {
    /// Whole-document generation attempts before giving up.
    pub max_document_attempts: u32,

    /// Byte budget for a rendered prompt; only quoted model output is truncated.
    pub prompt_budget_bytes: usize,

    /// Theme used when the caller does not pick one.
    pub default_theme: String,

    pub generator: GeneratorConfig,

    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command that reads a prompt on stdin and prints the completion
    /// (e.g. `["ollama","run","mistral"]`).
    pub command: Vec<String>,

    /// Wall-clock limit for a single generation call in seconds.
    pub timeout_secs: u64,

    /// Discard generator stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file holding stories and nodes.
    pub database_path: PathBuf,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "ollama".to_string(),
                "run".to_string(),
                "mistral".to_string(),
            ],
            timeout_secs: 120,
            output_limit_bytes: 200_000,
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("stories.db"),
        }
    }
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            max_document_attempts: 3,
            prompt_budget_bytes: 40_000,
            default_theme: "fantasy".to_string(),
            generator: GeneratorConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl StoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_document_attempts == 0 {
            return Err(anyhow!("max_document_attempts must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.default_theme.trim().is_empty() {
            return Err(anyhow!("default_theme must not be empty"));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.storage.database_path.as_os_str().is_empty() {
            return Err(anyhow!("storage.database_path must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StoryConfig::default()`.
pub fn load_config(path: &Path) -> Result<StoryConfig> {
    if !path.exists() {
        let cfg = StoryConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StoryConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StoryConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, StoryConfig::default());
        assert_eq!(cfg.max_document_attempts, 3);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("storygen.toml");
        let cfg = StoryConfig {
            default_theme: "space opera".to_string(),
            ..StoryConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("storygen.toml");
        fs::write(
            &path,
            "max_document_attempts = 5\n\n[generator]\ncommand = [\"llm\", \"-m\", \"local\"]\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_document_attempts, 5);
        assert_eq!(cfg.generator.command, vec!["llm", "-m", "local"]);
        assert_eq!(cfg.generator.timeout_secs, 120);
        assert_eq!(cfg.default_theme, "fantasy");
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let cfg = StoryConfig {
            max_document_attempts: 0,
            ..StoryConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_document_attempts"));
    }
}
