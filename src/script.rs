//! Script loading
//!
//! A `.json` script is either `{"scenes": [...]}` or a bare array of
//! `{"text": ..., "visual_description": ...}` objects. Anything else is read
//! as plain text with one scene per blank-line-separated paragraph.

use serde::Deserialize;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::scene::Scene;

#[derive(Debug, Deserialize)]
struct ScriptScene {
    text: String,
    #[serde(default, alias = "visualDescription")]
    visual_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptDocument {
    Wrapped { scenes: Vec<ScriptScene> },
    Bare(Vec<ScriptScene>),
}

/// Read and parse a script file
pub async fn load_script(path: &Path) -> Result<Vec<Scene>> {
    let content = tokio::fs::read_to_string(path).await?;
    let is_json = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        parse_json(&content)
    } else {
        parse_text(&content)
    }
}

/// Parse a JSON script document
pub fn parse_json(content: &str) -> Result<Vec<Scene>> {
    let document: ScriptDocument = serde_json::from_str(content)
        .map_err(|e| PipelineError::InvalidScript(e.to_string()))?;

    let raw = match document {
        ScriptDocument::Wrapped { scenes } | ScriptDocument::Bare(scenes) => scenes,
    };

    let scenes: Vec<Scene> = raw
        .into_iter()
        .enumerate()
        .map(|(index, s)| Scene {
            index,
            text: s.text,
            visual_description: s.visual_description.filter(|d| !d.trim().is_empty()),
        })
        .collect();

    non_empty(scenes)
}

/// Split plain text into scenes on blank lines
pub fn parse_text(content: &str) -> Result<Vec<Scene>> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    let scenes = paragraphs
        .into_iter()
        .enumerate()
        .map(|(index, text)| Scene::new(index, text))
        .collect();

    non_empty(scenes)
}

fn non_empty(scenes: Vec<Scene>) -> Result<Vec<Scene>> {
    if scenes.iter().all(|s| s.text.trim().is_empty()) {
        return Err(PipelineError::EmptyScript);
    }
    Ok(scenes)
}
