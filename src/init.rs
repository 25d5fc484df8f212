use crate::config::MixSettings;
use crate::logi;
use anyhow::{Context, Result};
use tokio::fs;

/// Creates the music, output and work directories named in `settings`.
pub async fn ensure_directories(settings: &MixSettings) -> Result<()> {
    for dir in [
        &settings.background_music_dir,
        &settings.output_dir,
        &settings.work_dir,
    ] {
        if fs::metadata(dir).await.is_err() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

pub async fn check_ffmpeg() -> bool {
    tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .is_ok_and(|output| output.status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let settings = MixSettings {
            background_music_dir: dir.path().join("music"),
            output_dir: dir.path().join("out/final"),
            work_dir: dir.path().join("work"),
            ..MixSettings::default()
        };

        ensure_directories(&settings).await.unwrap();
        ensure_directories(&settings).await.unwrap();

        assert!(settings.background_music_dir.is_dir());
        assert!(settings.output_dir.is_dir());
        assert!(settings.work_dir.is_dir());
    }
}
