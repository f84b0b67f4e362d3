//! Scene and per-scene artifact types shared by every stage.
//!
//! Artifact lists are always parallel to the scene list: slot `i` belongs to
//! scene `i`, including scenes whose generation failed.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One narration/caption unit of the script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// Stable position in the script (0-based)
    pub index: usize,
    /// Narration text, also used as caption text
    pub text: String,
    /// Optional prompt for the illustrative image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_description: Option<String>,
}

impl Scene {
    /// Create a scene without a visual description
    #[must_use]
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            visual_description: None,
        }
    }

    /// Set the visual description
    #[must_use]
    pub fn with_visual(mut self, description: impl Into<String>) -> Self {
        self.visual_description = Some(description.into());
        self
    }

    /// Number of non-whitespace characters in the narration text
    #[must_use]
    pub fn weight(&self) -> usize {
        self.text.chars().filter(|c| !c.is_whitespace()).count()
    }
}

/// Allocated playback time for one scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDuration {
    pub scene_index: usize,
    pub milliseconds: u64,
}

/// Pair an allocator result with scene indices
#[must_use]
pub fn scene_durations(durations_ms: &[u64]) -> Vec<SceneDuration> {
    durations_ms
        .iter()
        .enumerate()
        .map(|(scene_index, &milliseconds)| SceneDuration {
            scene_index,
            milliseconds,
        })
        .collect()
}

/// Synthesized narration for one scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub scene_index: usize,
    pub file_path: PathBuf,
    /// Result of the last existence probe
    pub exists: bool,
}

impl AudioArtifact {
    /// Re-run the existence probe without mutating the artifact
    pub async fn verify(&self) -> bool {
        file_exists(&self.file_path).await
    }
}

/// Generated illustration for one scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub scene_index: usize,
    /// `None` when generation or download failed after all retries
    pub local_path: Option<PathBuf>,
    pub source_url: Option<String>,
    pub provider: String,
    pub error: Option<String>,
}

impl ImageArtifact {
    /// Artifact for a scene that could not be illustrated
    #[must_use]
    pub fn failed(scene_index: usize, provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            scene_index,
            local_path: None,
            source_url: None,
            provider: provider.into(),
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.local_path.is_some()
    }
}

/// Filesystem probe used by every stage
pub async fn file_exists(path: &std::path::Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
