use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conflict::{ConflictAction, ConflictPolicy};
use crate::prompts::DEFAULT_PROMPT;
use crate::session::SessionSettings;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ai: AiConfig,
    #[serde(default)]
    pub naming: NamingConvention,
    #[serde(default)]
    pub ignore: IgnoreList,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
}

/// Where generated tests go and how they are named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConvention {
    pub source_root: String,
    pub output_root: String,
    pub suffix: String,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            source_root: "src".to_string(),
            output_root: "tests".to_string(),
            suffix: "test".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreList {
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl Default for IgnoreList {
    fn default() -> Self {
        Self {
            folders: ["node_modules", "target", ".git", "dist", "build"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub prompt: String,
    pub auto_write: bool,
    pub conflict_action: ConflictAction,
    pub throttle_ms: u64,
    pub strip_code_fences: bool,
    pub extensions: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            auto_write: false,
            conflict_action: ConflictAction::Ask,
            throttle_ms: 1000,
            strip_code_fences: true,
            extensions: [
                "ts", "tsx", "js", "jsx", "py", "rs", "go", "java", "kt", "cs", "rb", "php",
                "swift", "c", "cpp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_gemini_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.to_string()
}

/// Read-only view of the settings the orchestrator and stream client need.
pub trait ConfigProvider: Send + Sync {
    /// Credential for a provider id, `None` when not configured.
    fn api_key(&self, provider: &str) -> Option<String>;

    fn ignore_list(&self) -> IgnoreList;

    fn naming_convention(&self) -> NamingConvention;
}

impl ConfigProvider for Config {
    fn api_key(&self, provider: &str) -> Option<String> {
        let (configured, env_var) = match provider.to_lowercase().as_str() {
            "openai" => (&self.ai.openai_api_key, "OPENAI_API_KEY"),
            "gemini" => (&self.ai.gemini_api_key, "GEMINI_API_KEY"),
            _ => return None,
        };
        if !configured.trim().is_empty() {
            return Some(configured.clone());
        }
        std::env::var(env_var).ok().filter(|k| !k.trim().is_empty())
    }

    fn ignore_list(&self) -> IgnoreList {
        self.ignore.clone()
    }

    fn naming_convention(&self) -> NamingConvention {
        self.naming.clone()
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".unitgen")
    }

    pub fn get_config_path() -> PathBuf {
        Self::config_dir().join("config.yaml")
    }

    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match Self::load_from_file(&config_path) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!(path = %config_path.display(), error = %e, "ignoring unreadable config");
                }
            }
        }

        Ok(Self::default())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_file(Self::get_config_path())
    }

    /// Base URL used for a provider's API.
    pub fn base_url(&self, provider: &str) -> Option<&str> {
        match provider.to_lowercase().as_str() {
            "openai" => Some(self.ai.openai_base_url.as_str()),
            "gemini" => Some(self.ai.gemini_base_url.as_str()),
            _ => None,
        }
    }

    /// Capture the run settings, resolving relative naming roots against
    /// `project_root`.
    pub fn session_settings(&self, project_root: &Path) -> SessionSettings {
        let resolve = |p: &str| {
            let path = Path::new(p);
            let full = if path.is_absolute() {
                path.to_path_buf()
            } else {
                project_root.join(path)
            };
            full.to_string_lossy().replace('\\', "/")
        };

        SessionSettings {
            prompt_template: self.generation.prompt.clone(),
            provider: self.ai.provider.clone(),
            model: self.ai.model.clone(),
            source_root: resolve(&self.naming.source_root),
            output_root: resolve(&self.naming.output_root),
            naming_suffix: self.naming.suffix.clone(),
            policy: ConflictPolicy {
                auto_write: self.generation.auto_write,
                conflict_action: self.generation.conflict_action,
            },
            strip_code_fences: self.generation.strip_code_fences,
            throttle: Duration::from_millis(self.generation.throttle_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ai: AiConfig {
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                openai_api_key: String::new(),
                gemini_api_key: String::new(),
                openai_base_url: default_openai_base_url(),
                gemini_base_url: default_gemini_base_url(),
            },
            naming: NamingConvention::default(),
            ignore: IgnoreList::default(),
            generation: GenerationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");

        let mut config = Config::default();
        config.ai.provider = "gemini".to_string();
        config.generation.conflict_action = ConflictAction::Append;
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.ai.provider, "gemini");
        assert_eq!(loaded.generation.conflict_action, ConflictAction::Append);
        assert_eq!(loaded.naming, NamingConvention::default());
    }

    #[test]
    fn minimal_yaml_fills_defaults() {
        let yaml = "ai:\n  provider: openai\n  model: gpt-4o\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ai.openai_base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(config.generation.conflict_action, ConflictAction::Ask);
        assert!(config.ignore.folders.contains(&"node_modules".to_string()));
    }

    #[test]
    fn configured_key_wins_and_unknown_provider_has_none() {
        let mut config = Config::default();
        config.ai.gemini_api_key = "g-key".to_string();
        assert_eq!(config.api_key("gemini").as_deref(), Some("g-key"));
        assert_eq!(config.api_key("mistral"), None);
    }

    #[test]
    fn session_settings_resolve_relative_roots() {
        let config = Config::default();
        let settings = config.session_settings(Path::new("/work/app"));
        assert_eq!(settings.source_root, "/work/app/src");
        assert_eq!(settings.output_root, "/work/app/tests");
        assert_eq!(settings.naming_suffix, "test");
        assert!(!settings.policy.auto_write);
        assert_eq!(settings.throttle, Duration::from_millis(1000));
    }
}
