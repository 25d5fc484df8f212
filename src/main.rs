use anyhow::Result;
use clap::Parser;
use horror_narrator::config::Config;
use horror_narrator::generator::{GenerationRequest, run_generation};
use horror_narrator::{init, init_tracing};

/// Writes a horror story, narrates it and mixes the narration over background music.
#[derive(Parser, Debug)]
#[clap(name = "horror-narrator", version)]
struct Args {
    #[clap(long, default_value = "Unknown Story")]
    title: String,

    /// Target story length; defaults to `story_word_count` from the config.
    #[clap(long)]
    words: Option<u32>,

    #[clap(long, default_value = "config.json")]
    config: String,

    /// Seed for background track selection.
    #[clap(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let cfg = Config::load(&args.config).await?;
    init::ensure_directories(&cfg.mixing).await?;

    if !init::check_ffmpeg().await {
        tracing::warn!("FFmpeg not found in PATH. Only WAV audio can be processed.");
    }

    let request = GenerationRequest {
        title: args.title,
        word_count: args.words.unwrap_or(cfg.story_word_count),
    };
    let output = run_generation(&cfg, &request, args.seed).await?;

    tracing::info!(status = "ok", "Story: {}", output.story_path.display());
    tracing::info!(status = "ok", "Narration: {}", output.narration_path.display());
    tracing::info!(
        status = "ok",
        "Final mix ({}): {}",
        output.mime_type(),
        output.mixed_path.display()
    );
    Ok(())
}
