use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("batch concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("active model {0} is not among the configured models")]
    UnknownActiveModel(String),
}

/// One saved model configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    /// "openai", "openrouter", "deepseek", "siliconflow", "302ai",
    /// "openai-compatible", "ollama" or "lmstudio".
    pub api_provider: String,
    pub model: String,
    #[serde(default)]
    pub is_default: bool,
    /// Base URL for OpenAI-compatible services, Ollama, LM Studio.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Backend that hosts assistant sessions over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub endpoint: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_stream_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl RemoteSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_stream_timeout_secs(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The endpoint as a base URL that relative paths can be joined onto.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let mut url = Url::parse(&self.endpoint).map_err(|err| invalid(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub concurrency: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Timeouts for model provider requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_stream_timeout_secs(),
        }
    }
}

impl RequestSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Language explanations and replies are written in.
    pub target_language: String,
    pub interface_language: String,
    /// Falls back to the first model when unset.
    pub active_model_id: Option<String>,
    pub model_configs: Vec<ModelConfig>,
    pub remote: Option<RemoteSettings>,
    pub batch: BatchSettings,
    pub request: RequestSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_language: "zh-CN".to_string(),
            interface_language: "en".to_string(),
            active_model_id: None,
            model_configs: Vec::new(),
            remote: None,
            batch: BatchSettings::default(),
            request: RequestSettings::default(),
        }
    }
}

impl EngineConfig {
    /// The active model config, or the first one, or None.
    pub fn active_model(&self) -> Option<&ModelConfig> {
        match &self.active_model_id {
            Some(id) => self.model(id),
            None => self.model_configs.first(),
        }
    }

    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.model_configs.iter().find(|config| config.id == id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if let Some(id) = &self.active_model_id {
            if self.model(id).is_none() {
                return Err(ConfigError::UnknownActiveModel(id.clone()));
            }
        }
        if let Some(remote) = &self.remote {
            remote.endpoint_url()?;
        }
        Ok(())
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_stream_timeout_secs() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, ModelConfig, RemoteSettings};

    fn model(id: &str) -> ModelConfig {
        ModelConfig {
            id: id.into(),
            name: id.into(),
            api_key: String::new(),
            api_provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            is_default: false,
            base_url: None,
        }
    }

    #[test]
    fn active_model_falls_back_to_first() {
        let mut config = EngineConfig {
            model_configs: vec![model("a"), model("b")],
            ..EngineConfig::default()
        };
        assert_eq!(config.active_model().unwrap().id, "a");
        config.active_model_id = Some("b".into());
        assert_eq!(config.active_model().unwrap().id, "b");
        config.active_model_id = Some("zzz".into());
        assert!(config.active_model().is_none());
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownActiveModel("zzz".into()))
        );
    }

    #[test]
    fn endpoint_gets_trailing_slash_and_checked_scheme() {
        let url = RemoteSettings::new("https://api.example.com/v1")
            .endpoint_url()
            .unwrap();
        assert_eq!(url.join("sessions").unwrap().as_str(), "https://api.example.com/v1/sessions");

        let err = RemoteSettings::new("ftp://example.com").endpoint_url().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = EngineConfig::default();
        config.batch.concurrency = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidConcurrency));
    }
}
