use std::path::Path;

use anyhow::{bail, Result};

use storyreel::config::{config_path, Settings};
use storyreel::services::check_dependencies;

pub async fn cmd_doctor(config: Option<&Path>) -> Result<()> {
    let settings = Settings::load(config)?;
    let services = &settings.services;

    eprintln!("🩺 storyreel {}", storyreel::VERSION);
    match config {
        Some(path) => eprintln!("   Config: {}", path.display()),
        None => eprintln!("   Config: {} (optional)", config_path().display()),
    }
    eprintln!("   Synthesis: {}", services.synthesis_url);
    eprintln!("   Images: {}", services.image_url);
    if services.api_key().is_some() {
        eprintln!("   API key: set (${})", services.api_key_env);
    } else {
        eprintln!("   API key: not set (${})", services.api_key_env);
    }

    let report = check_dependencies(&services.ffmpeg(), &services.ffprobe()).await;
    let mut missing = Vec::new();
    for (tool, ok) in &report {
        if *ok {
            eprintln!("   ✅ {tool}");
        } else {
            eprintln!("   ❌ {tool}");
            missing.push(tool.as_str());
        }
    }

    if !missing.is_empty() {
        bail!("missing tools: {}", missing.join(", "));
    }
    Ok(())
}
