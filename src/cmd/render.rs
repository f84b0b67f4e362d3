use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use tokio::sync::mpsc;

use storyreel::progress::{event_channel, PipelineEvent, DEFAULT_EVENT_CAPACITY};
use storyreel::script::load_script;
use storyreel::services::{
    FfmpegCompositor, FfprobeDurationProbe, HttpImageGenerator, HttpSpeechSynthesizer, Services,
};
use storyreel::{LogLevel, Pipeline, Settings, Step};

#[derive(Args)]
pub struct RenderArgs {
    /// Script file (.json or plain text)
    script: PathBuf,

    /// Config file (default: ~/.config/storyreel/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Parent directory for run output
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Video file name inside the run directory
    #[arg(short, long)]
    output: Option<String>,

    /// Voice identifier
    #[arg(long)]
    voice: Option<String>,

    /// Narration speed multiplier
    #[arg(long)]
    speed: Option<f32>,

    /// Image style phrase
    #[arg(long)]
    style: Option<String>,

    /// Render 9:16 portrait video
    #[arg(long)]
    portrait: bool,

    /// Continue an earlier run, reusing its images
    #[arg(long, value_name = "RUN_ID")]
    resume: Option<String>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl RenderArgs {
    fn apply(&self, settings: &mut Settings) {
        let pipeline = &mut settings.pipeline;
        if let Some(dir) = &self.work_dir {
            pipeline.work_dir.clone_from(dir);
        }
        if let Some(name) = &self.output {
            pipeline.output_name.clone_from(name);
        }
        if let Some(voice) = &self.voice {
            pipeline.voice.voice_id.clone_from(voice);
        }
        if let Some(speed) = self.speed {
            pipeline.voice.speed = speed;
        }
        if let Some(style) = &self.style {
            pipeline.style.style.clone_from(style);
        }
        if self.portrait {
            pipeline.style = std::mem::take(&mut pipeline.style).portrait();
        }
        if self.resume.is_some() {
            pipeline.style.skip_existing = true;
        }
    }
}

fn build_services(settings: &Settings) -> Result<Services> {
    let retry = settings.pipeline.retry;
    Ok(Services {
        synthesizer: Arc::new(
            HttpSpeechSynthesizer::new(&settings.services, retry)
                .context("failed to create synthesis client")?,
        ),
        images: Arc::new(
            HttpImageGenerator::new(&settings.services, retry)
                .context("failed to create image client")?,
        ),
        probe: Arc::new(FfprobeDurationProbe::new(settings.services.ffprobe())),
        compositor: Arc::new(FfmpegCompositor::new(settings.services.ffmpeg())),
    })
}

pub async fn cmd_render(args: RenderArgs) -> Result<()> {
    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);

    let scenes = load_script(&args.script)
        .await
        .with_context(|| format!("failed to load {}", args.script.display()))?;

    eprintln!("🎬 Rendering: {}", args.script.display());
    eprintln!("   Scenes: {}", scenes.len());
    eprintln!("   Voice: {} ({}x)", settings.pipeline.voice.voice_id, settings.pipeline.voice.speed);
    eprintln!("   Work dir: {}", settings.pipeline.work_dir.display());

    let services = build_services(&settings)?;
    let (tx, rx) = event_channel(DEFAULT_EVENT_CAPACITY);
    let mut pipeline = Pipeline::new(services, settings.pipeline).with_events(tx);
    if let Some(run_id) = &args.resume {
        eprintln!("   Resuming: {run_id}");
        pipeline = pipeline.with_run_id(run_id);
    }

    let printer = tokio::spawn(print_events(rx));

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⏹️  Cancelling...");
            token.cancel();
        }
    });

    let result = pipeline.run(&scenes).await;
    let state = pipeline.state();
    // Closes the event channel so the printer finishes
    drop(pipeline);
    let _ = printer.await;

    match result {
        Ok(output) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                eprintln!("\n✅ Video ready in {:.1}s", output.elapsed_secs);
                eprintln!("   Duration: {:.1}s", output.duration_ms as f64 / 1000.0);
                for scene in &output.scene_durations {
                    eprintln!(
                        "     scene {:>3}: {:.1}s",
                        scene.scene_index + 1,
                        scene.milliseconds as f64 / 1000.0
                    );
                }
                eprintln!("   Size: {} bytes", output.size_bytes);
                eprintln!("   Captions: {}", output.caption_path.display());
                eprintln!("   Run: {}", output.run_id);
                println!("{}", output.video_path.display());
            }
            Ok(())
        }
        Err(e) => {
            let step = state.error.as_ref().map_or(Step::Error, |info| info.step);
            Err(anyhow!("{} [{}] during {}", e, e.reason_code(), step))
        }
    }
}

/// Render pipeline events as one line per step change or log record
async fn print_events(mut rx: mpsc::Receiver<PipelineEvent>) {
    let mut last: Option<(Step, u8)> = None;

    while let Some(event) = rx.recv().await {
        match event.percent {
            Some(pct) => {
                // Only print in 10% steps
                let bucket = pct / 10;
                if last != Some((event.step, bucket)) {
                    eprintln!("   [{:>6}] {:>3}%", event.step.as_str(), pct);
                    last = Some((event.step, bucket));
                }
            }
            None if event.level == LogLevel::Success => {
                eprintln!("   ✓ {}", event.message);
            }
            None => {}
        }
    }
}
