use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lingo_core::{Explanation, Segment, SegmentId};
use lingo_logging::lingo_debug;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid explanations file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("background write failed: {0}")]
    Join(String),
}

/// Storage half of an explanation job: a job only counts as done once its
/// explanation has been saved.
#[async_trait]
pub trait SegmentPersister: Send + Sync {
    async fn save(&self, segment_id: &str, explanation: &Explanation) -> Result<(), PersistError>;
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Atomically write content to `{dir}/{filename}` by writing a temp file then renaming.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &str) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExplanationsFile {
    document_id: String,
    #[serde(default)]
    explanations: BTreeMap<SegmentId, Explanation>,
}

/// Keeps every explanation of one document in `{dir}/{document_id}.explanations.json`.
///
/// Saves are serialised so a slower write can never replace a newer file.
pub struct FileSegmentPersister {
    writer: AtomicFileWriter,
    filename: String,
    state: Mutex<ExplanationsFile>,
}

impl FileSegmentPersister {
    /// Opens the store for `document_id`, loading explanations saved earlier.
    pub fn open(dir: PathBuf, document_id: &str) -> Result<Self, PersistError> {
        let filename = explanations_filename(document_id);
        let path = dir.join(&filename);
        let state = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => ExplanationsFile {
                document_id: document_id.to_string(),
                explanations: BTreeMap::new(),
            },
            Err(err) => return Err(err.into()),
        };
        lingo_debug!(
            "opened {:?} with {} saved explanations",
            path,
            state.explanations.len()
        );
        Ok(Self {
            writer: AtomicFileWriter::new(dir),
            filename,
            state: Mutex::new(state),
        })
    }

    pub async fn saved(&self) -> BTreeMap<SegmentId, Explanation> {
        self.state.lock().await.explanations.clone()
    }

    /// Copies saved explanations onto the matching segments.
    pub async fn restore(&self, segments: &mut [Segment]) -> usize {
        let state = self.state.lock().await;
        let mut restored = 0;
        for segment in segments.iter_mut() {
            if let Some(explanation) = state.explanations.get(&segment.id) {
                segment.translation = Some(explanation.translation.clone());
                if explanation.reading_text.is_some() {
                    segment.reading_text = explanation.reading_text.clone();
                }
                segment.explanation = Some(explanation.clone());
                restored += 1;
            }
        }
        restored
    }
}

#[async_trait]
impl SegmentPersister for FileSegmentPersister {
    async fn save(&self, segment_id: &str, explanation: &Explanation) -> Result<(), PersistError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.explanations
            .insert(segment_id.to_string(), explanation.clone());
        let content = serde_json::to_string_pretty(&next)?;

        let writer = self.writer.clone();
        let filename = self.filename.clone();
        tokio::task::spawn_blocking(move || writer.write(&filename, &content))
            .await
            .map_err(|err| PersistError::Join(err.to_string()))??;

        *state = next;
        Ok(())
    }
}

fn explanations_filename(document_id: &str) -> String {
    let safe: String = document_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{safe}.explanations.json")
}
