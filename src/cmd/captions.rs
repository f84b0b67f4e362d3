use std::path::Path;

use anyhow::{Context, Result};

use storyreel::script::load_script;
use storyreel::subtitle::{build_cues, SubtitleFormat};
use storyreel::timing::allocate_for_scenes;

pub async fn cmd_captions(
    script: &Path,
    total_ms: u64,
    min_ms: u64,
    format: SubtitleFormat,
) -> Result<()> {
    let scenes = load_script(script)
        .await
        .with_context(|| format!("failed to load {}", script.display()))?;

    let durations = allocate_for_scenes(&scenes, total_ms, min_ms);
    let cues = build_cues(&scenes, &durations);
    let content = format.generator().generate(&cues)?;

    print!("{content}");
    Ok(())
}
