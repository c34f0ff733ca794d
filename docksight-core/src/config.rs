use crate::ai_provider::ProviderOptions;
use crate::filter::{FilterError, FilterSet};
use crate::pipeline::DEFAULT_MODEL_CONTEXT_LIMIT;
use crate::prompts::{PromptError, PromptTemplates, TemplatePrompts};
use crate::tokens::DEFAULT_CHARS_PER_TOKEN;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const PROJECT_CONFIG_FILE: &str = ".docksight.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub defaults: DefaultConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    /// Container name → regex patterns whose matching lines are dropped.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub prompts: PromptTemplates,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DefaultConfig {
    pub provider: Option<String>,
    pub context_limit: Option<usize>,
    pub chars_per_token: Option<f64>,
    pub tail: Option<usize>,
    /// Per-request timeout for the pipeline, in seconds.
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub openrouter: Option<ProviderSettings>,
    pub openai: Option<ProviderSettings>,
    pub claude: Option<ProviderSettings>,
    pub anthropic: Option<ProviderSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<u64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeConfig {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,
    pub max_entries: Option<usize>,
    pub max_age_days: Option<u32>,
}

fn provider_defaults(model: &str) -> ProviderSettings {
    ProviderSettings {
        model: Some(model.to_string()),
        api_key: None,
        base_url: None,
        timeout: Some(120),
        max_tokens: Some(2000),
        temperature: Some(0.1),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: DefaultConfig {
                provider: Some("openrouter".to_string()),
                context_limit: Some(DEFAULT_MODEL_CONTEXT_LIMIT),
                chars_per_token: Some(DEFAULT_CHARS_PER_TOKEN),
                tail: Some(5000),
                timeout: Some(180),
            },
            providers: ProviderConfig {
                openrouter: Some(provider_defaults("deepseek/deepseek-chat-v3.1:free")),
                openai: Some(provider_defaults("gpt-4o-mini")),
                claude: Some(provider_defaults("claude-3-5-haiku-latest")),
                anthropic: None,
            },
            filters: BTreeMap::new(),
            prompts: PromptTemplates::default(),
            knowledge: KnowledgeConfig {
                enabled: Some(true),
                dir: None,
                max_entries: Some(20),
                max_age_days: Some(30),
            },
        }
    }
}

impl Config {
    /// Load from `explicit` if given, else from the first config file found,
    /// else fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        match Self::find_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Config::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        info!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.merge_with_defaults(&Config::default());
        Ok(config)
    }

    /// `./.docksight.toml`, then `~/.config/docksight/config.toml`.
    pub fn find_config_path() -> Option<PathBuf> {
        if let Ok(current_dir) = env::current_dir() {
            let project_config = current_dir.join(PROJECT_CONFIG_FILE);
            if project_config.exists() {
                return Some(project_config);
            }
        }

        Self::user_config_path().filter(|path| path.exists())
    }

    pub fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("docksight").join("config.toml"))
    }

    fn merge_with_defaults(&mut self, defaults: &Config) {
        if self.providers.openrouter.is_none() {
            self.providers.openrouter = defaults.providers.openrouter.clone();
        }
        if self.providers.openai.is_none() {
            self.providers.openai = defaults.providers.openai.clone();
        }
        if self.providers.claude.is_none() && self.providers.anthropic.is_none() {
            self.providers.claude = defaults.providers.claude.clone();
        }

        let d = &defaults.defaults;
        self.defaults.provider = self.defaults.provider.take().or_else(|| d.provider.clone());
        self.defaults.context_limit = self.defaults.context_limit.or(d.context_limit);
        self.defaults.chars_per_token = self.defaults.chars_per_token.or(d.chars_per_token);
        self.defaults.tail = self.defaults.tail.or(d.tail);
        self.defaults.timeout = self.defaults.timeout.or(d.timeout);

        let k = &defaults.knowledge;
        self.knowledge.enabled = self.knowledge.enabled.or(k.enabled);
        self.knowledge.max_entries = self.knowledge.max_entries.or(k.max_entries);
        self.knowledge.max_age_days = self.knowledge.max_age_days.or(k.max_age_days);
    }

    pub fn get_provider_settings(&self, provider: &str) -> Option<&ProviderSettings> {
        match provider.to_lowercase().as_str() {
            "openrouter" => self.providers.openrouter.as_ref(),
            "openai" => self.providers.openai.as_ref(),
            "claude" | "anthropic" => self
                .providers
                .claude
                .as_ref()
                .or(self.providers.anthropic.as_ref()),
            _ => None,
        }
    }

    /// Priority: `<PROVIDER>_API_KEY` environment variable, then config file.
    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        let from_env = env::var(format!("{}_API_KEY", provider.to_uppercase())).ok();
        self.resolve_api_key(provider, from_env)
    }

    fn resolve_api_key(&self, provider: &str, from_env: Option<String>) -> Option<String> {
        from_env.filter(|key| !key.is_empty()).or_else(|| {
            self.get_provider_settings(provider)
                .and_then(|p| p.api_key.clone())
                .filter(|key| !key.is_empty())
        })
    }

    /// Provider options from the config, with an optional model override.
    pub fn provider_options(&self, provider: &str, model_override: Option<String>) -> ProviderOptions {
        let settings = self.get_provider_settings(provider).cloned().unwrap_or_default();
        ProviderOptions {
            model: model_override.or(settings.model),
            base_url: settings.base_url,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout: settings.timeout.map(Duration::from_secs),
        }
    }

    pub fn default_provider(&self) -> String {
        self.defaults.provider.as_deref().unwrap_or("openrouter").to_string()
    }

    pub fn context_limit(&self) -> usize {
        self.defaults.context_limit.unwrap_or(DEFAULT_MODEL_CONTEXT_LIMIT)
    }

    pub fn chars_per_token(&self) -> f64 {
        self.defaults.chars_per_token.unwrap_or(DEFAULT_CHARS_PER_TOKEN)
    }

    pub fn tail(&self) -> Option<usize> {
        self.defaults.tail
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.defaults.timeout.filter(|secs| *secs > 0).map(Duration::from_secs)
    }

    pub fn build_filter_set(&self) -> Result<FilterSet, FilterError> {
        FilterSet::from_patterns(&self.filters)
    }

    /// Prompt renderer with the configured overrides, checked up front.
    pub fn prompt_builder(&self) -> Result<TemplatePrompts, PromptError> {
        let prompts = TemplatePrompts::new().with_templates(&self.prompts);
        prompts.validate()?;
        Ok(prompts)
    }

    pub fn knowledge_enabled(&self) -> bool {
        self.knowledge.enabled.unwrap_or(true)
    }

    pub fn knowledge_dir(&self) -> PathBuf {
        match &self.knowledge.dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .map(|dir| dir.join("docksight").join("knowledge"))
                .unwrap_or_else(|| PathBuf::from(".docksight").join("knowledge")),
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }

        let toml_content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(path, toml_content).with_context(|| format!("Failed to write config file {}", path.display()))?;

        info!("Configuration written to {}", path.display());
        Ok(())
    }
}
