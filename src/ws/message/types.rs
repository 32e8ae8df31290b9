use serde::{Deserialize, Serialize};

use crate::ws::assembler::Section;

/// A util structure to hold only generation id field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRef {
    /// generation job id
    pub generation_id: String,
}

/// A util structure to hold only timestamp field
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// milliseconds since unix epoch
    pub timestamp: u64,
}

/// Connection status message data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// status name, like `connected`
    pub status: String,
    /// human readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Phase of a running generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// reading the brief
    Analyzing,
    /// writing sections
    Generating,
    /// polishing sections
    Optimizing,
    /// persisting result
    Saving,
    /// done
    Completed,
}

/// Stage update message data, superseded entirely by the next one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
    /// current phase
    pub stage: Stage,
    /// status line for display
    #[serde(default)]
    pub message: String,
    /// overall progress, 0 to 100
    pub progress: f64,
    /// estimated seconds left
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<f64>,
}

impl StageInfo {
    /// Stage reported once a generation completes
    pub fn completed() -> Self {
        Self {
            stage: Stage::Completed,
            message: "Generation completed".to_string(),
            progress: 100.0,
            estimated_time_remaining: None,
        }
    }
}

/// Section-scoped content chunk message data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChunk {
    /// target section
    pub section: Section,
    /// full section text so far, not a delta
    pub content: String,
    /// section finished
    #[serde(default)]
    pub is_complete: bool,
    /// overall progress, 0 to 100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_progress: Option<f64>,
}

/// Final content of a completed generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalGeneration {
    /// generation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// title text
    #[serde(default)]
    pub title: String,
    /// hook text
    #[serde(default)]
    pub hook: String,
    /// script text
    #[serde(default)]
    pub script: String,
    /// cta text
    #[serde(default)]
    pub cta: String,
    /// any other field sent by server
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FinalGeneration {
    /// final text of `section`
    pub fn content(&self, section: Section) -> &str {
        match section {
            Section::Title => &self.title,
            Section::Hook => &self.hook,
            Section::Script => &self.script,
            Section::Cta => &self.cta,
        }
    }
}

/// Generation completed message data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationCompleted {
    /// final content
    pub final_generation: FinalGeneration,
}

/// Generation error message data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationError {
    /// reason for human read
    pub message: String,
}
