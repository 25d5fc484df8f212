use anyhow::{Context, Result};
use clap::Parser;
use horror_narrator::audio::Codec;
use horror_narrator::config::MixSettings;
use horror_narrator::generator::now_seed;
use horror_narrator::mixer::Mixer;
use horror_narrator::{init, init_tracing};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;

/// Mixes an existing narration file over a random background track.
#[derive(Parser, Debug)]
#[clap(name = "horror-mix", version)]
struct Args {
    narration: PathBuf,

    /// Overrides `background_music_dir` from the config.
    #[clap(long)]
    music_dir: Option<PathBuf>,

    /// Output file; defaults to `<output_dir>/<narration stem>_mixed.<output_extension>`.
    #[clap(long)]
    out: Option<PathBuf>,

    #[clap(long)]
    offset_db: Option<f64>,

    #[clap(long)]
    tail_ms: Option<u64>,

    #[clap(long)]
    fade_ms: Option<u64>,

    #[clap(long)]
    seed: Option<u64>,

    #[clap(long, default_value = "config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut settings = MixSettings::load(&args.config).await?;
    if let Some(dir) = args.music_dir {
        settings.background_music_dir = dir;
    }
    if let Some(offset) = args.offset_db {
        settings.mix.target_gain_offset_db = offset;
    }
    if let Some(tail) = args.tail_ms {
        settings.mix.tail_padding_ms = tail;
    }
    if let Some(fade) = args.fade_ms {
        settings.mix.fade_out_ms = fade;
    }

    if !init::check_ffmpeg().await {
        tracing::warn!("FFmpeg not found in PATH. Only WAV audio can be processed.");
    }

    let out = match args.out {
        Some(path) => path,
        None => {
            let stem = args
                .narration
                .file_stem()
                .and_then(|s| s.to_str())
                .context("narration path has no file name")?;
            settings
                .output_dir
                .join(format!("{stem}_mixed.{}", settings.output_extension))
        }
    };

    let codec = Codec::new(settings.format, settings.codec_timeout());
    let mixer = Mixer::new(codec, settings.mix);
    let mut rng = StdRng::seed_from_u64(args.seed.unwrap_or_else(now_seed));
    let written = mixer
        .mix(&args.narration, &settings.background_music_dir, &out, &mut rng)
        .await?;

    tracing::info!(status = "ok", "Final mix: {}", written.display());
    Ok(())
}
