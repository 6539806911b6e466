use serde::{Deserialize, Serialize};

pub type SegmentId = String;

/// One sentence or subtitle unit of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub order: i32,
    pub text: String,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub explanation: Option<Explanation>,
    #[serde(default)]
    pub reading_text: Option<String>,
    /// Start time in seconds (subtitles only).
    #[serde(default)]
    pub start_time: Option<f64>,
    /// End time in seconds (subtitles only).
    #[serde(default)]
    pub end_time: Option<f64>,
    /// Starts a new paragraph instead of continuing the previous one.
    #[serde(default)]
    pub is_new_paragraph: bool,
}

impl Segment {
    pub fn new(id: impl Into<SegmentId>, order: i32, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order,
            text: text.into(),
            translation: None,
            explanation: None,
            reading_text: None,
            start_time: None,
            end_time: None,
            is_new_paragraph: false,
        }
    }

    pub fn has_explanation(&self) -> bool {
        self.explanation.is_some()
    }

    /// Copy of `self` with every field present in `patch` overwritten.
    pub fn patched(&self, patch: &SegmentPatch) -> Self {
        let mut next = self.clone();
        if let Some(explanation) = &patch.explanation {
            next.explanation = Some(explanation.clone());
        }
        if let Some(translation) = &patch.translation {
            next.translation = Some(translation.clone());
        }
        if let Some(reading) = &patch.reading_text {
            next.reading_text = Some(reading.clone());
        }
        next
    }
}

/// AI-generated reading aid for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Explanation {
    pub translation: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub reading_text: Option<String>,
    #[serde(default)]
    pub vocabulary: Vec<VocabularyItem>,
    #[serde(default)]
    pub grammar_points: Vec<GrammarPoint>,
    #[serde(default)]
    pub cultural_context: Option<String>,
    #[serde(default)]
    pub difficulty_level: Option<String>,
    #[serde(default)]
    pub learning_tips: Option<String>,
}

impl Explanation {
    pub fn with_translation(translation: impl Into<String>) -> Self {
        Self {
            translation: translation.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub word: String,
    pub meaning: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub reading: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarPoint {
    pub point: String,
    pub explanation: String,
    #[serde(default)]
    pub example: Option<String>,
}

/// Fields a successful explanation job writes back onto a segment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SegmentPatch {
    pub explanation: Option<Explanation>,
    pub translation: Option<String>,
    pub reading_text: Option<String>,
}

impl SegmentPatch {
    /// Patch that stores the explanation and lifts its translation and
    /// reading form onto the segment.
    pub fn from_explanation(explanation: &Explanation) -> Self {
        Self {
            explanation: Some(explanation.clone()),
            translation: Some(explanation.translation.clone()),
            reading_text: explanation.reading_text.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.explanation.is_none() && self.translation.is_none() && self.reading_text.is_none()
    }
}
