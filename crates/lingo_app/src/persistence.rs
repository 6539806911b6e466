use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use lingo_core::Segment;
use lingo_engine::EngineConfig;
use lingo_logging::{lingo_info, lingo_warn};
use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_CONFIG_FILENAME: &str = "lingo.ron";

/// A segmented document as exported by the reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Document {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub segments: Vec<Segment>,
}

/// Loads the engine configuration.
///
/// An explicitly given file must exist. The default file is optional; when it
/// is missing the built-in defaults are used.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    let path = explicit.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILENAME));
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound && explicit.is_none() => {
            lingo_info!("No {:?} found, using default configuration", path);
            return Ok(EngineConfig::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("reading config {}", path.display()));
        }
    };

    let config: EngineConfig = ron::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    if config.active_model().is_none() {
        lingo_warn!("No model configured in {:?}; explanations are unavailable", path);
    }
    lingo_info!("Loaded configuration from {:?}", path);
    Ok(config)
}

pub(crate) fn save_config(path: &Path, config: &EngineConfig) -> Result<()> {
    let pretty = ron::ser::PrettyConfig::new();
    let content = ron::ser::to_string_pretty(config, pretty).context("serializing config")?;
    fs::write(path, content).with_context(|| format!("writing config {}", path.display()))?;
    lingo_info!("Wrote configuration to {:?}", path);
    Ok(())
}

pub(crate) fn load_document(path: &Path) -> Result<Document> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading document {}", path.display()))?;
    let document: Document = serde_json::from_str(&content)
        .with_context(|| format!("parsing document {}", path.display()))?;
    lingo_info!(
        "Loaded document {} with {} segments",
        document.id,
        document.segments.len()
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use lingo_engine::{EngineConfig, ModelConfig};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::{load_config, load_document, save_config};

    #[test]
    fn config_round_trips_through_ron() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lingo.ron");
        let mut config = EngineConfig::default();
        config.model_configs.push(ModelConfig {
            id: "m1".into(),
            name: "Local Ollama".into(),
            api_key: String::new(),
            api_provider: "ollama".into(),
            model: "qwen2.5".into(),
            is_default: true,
            base_url: None,
        });
        config.batch.concurrency = 5;

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.ron");
        fs::write(&path, "(target_language: \"ja\")").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.target_language, "ja");
        assert_eq!(config.batch.concurrency, 3);
    }

    #[test]
    fn explicit_missing_or_invalid_config_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("missing.ron"))).is_err());

        let path = dir.path().join("bad.ron");
        fs::write(&path, "(batch: (concurrency: 0))").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn document_json_is_parsed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(
            &path,
            r#"{"id":"doc-1","segments":[{"id":"a","order":0,"text":"猫がいる","is_new_paragraph":true}]}"#,
        )
        .unwrap();

        let document = load_document(&path).unwrap();
        assert_eq!(document.id, "doc-1");
        assert_eq!(document.title, None);
        assert!(document.segments[0].is_new_paragraph);
    }
}
