use crate::audio::PcmFormat;
use crate::mixer::MixPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.98,
            similarity_boost: 0.95,
            style: 0.0,
            use_speaker_boost: true,
        }
    }
}

/// The part of the configuration the mixer needs. Usable on its own for
/// mix-only runs, which don't need API keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSettings {
    pub background_music_dir: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    /// Extension of the final mixed file; decides the encoder.
    pub output_extension: String,
    pub codec_timeout_secs: u64,
    pub format: PcmFormat,
    pub mix: MixPolicy,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            background_music_dir: PathBuf::from("background_music"),
            output_dir: PathBuf::from("output"),
            work_dir: PathBuf::from("work"),
            output_extension: "mp3".to_owned(),
            codec_timeout_secs: 300,
            format: PcmFormat::default(),
            mix: MixPolicy::default(),
        }
    }
}

impl MixSettings {
    /// Reads the mixing section of `path`, or defaults when the file is absent.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if fs::metadata(path).await.is_err() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn codec_timeout(&self) -> Duration {
        Duration::from_secs(self.codec_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "openai_api_key", default)]
    pub openai_key: String,
    #[serde(rename = "elevenlabs_api_key", default)]
    pub elevenlabs_key: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_word_count")]
    pub story_word_count: u32,
    #[serde(default = "default_voice_id")]
    pub eleven_voice_id: String,
    #[serde(default = "default_model_id")]
    pub eleven_model_id: String,
    #[serde(default)]
    pub voice_settings: VoiceSettings,
    #[serde(default = "default_api_attempts")]
    pub api_attempts: u32,
    #[serde(flatten)]
    pub mixing: MixSettings,
}

fn default_openai_model() -> String {
    "gpt-4o".to_owned()
}

fn default_temperature() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_word_count() -> u32 {
    700
}

fn default_voice_id() -> String {
    "t7VcunDELSXwqBUqGfc7".to_owned()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_owned()
}

fn default_api_attempts() -> u32 {
    3
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with(path, |name| std::env::var(name).ok()).await
    }

    /// Reads `path`, or starts from defaults when it is absent, then fills
    /// missing keys through `lookup` and validates.
    pub async fn load_with<P: AsRef<Path>>(
        path: P,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Config = if fs::metadata(path).await.is_err() {
            serde_json::from_value(serde_json::json!({}))?
        } else {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        };
        config.fill_keys_from(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Fills empty API keys from `OPENAI_API_KEY` / `XI_API_KEY` via `lookup`.
    pub fn fill_keys_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.openai_key.is_empty() {
            self.openai_key = lookup("OPENAI_API_KEY").unwrap_or_default();
        }
        if self.elevenlabs_key.is_empty() {
            self.elevenlabs_key = lookup("XI_API_KEY").unwrap_or_default();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.openai_key.is_empty() {
            anyhow::bail!("config.json: openai_api_key missing (or set OPENAI_API_KEY)");
        }
        if self.elevenlabs_key.is_empty() {
            anyhow::bail!("config.json: elevenlabs_api_key missing (or set XI_API_KEY)");
        }
        if self.story_word_count == 0 {
            anyhow::bail!("config.json: story_word_count must be positive");
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn for_keys(openai: &str, elevenlabs: &str) -> Self {
        let json = serde_json::json!({
            "openai_api_key": openai,
            "elevenlabs_api_key": elevenlabs,
        });
        serde_json::from_value(json).expect("minimal config parses")
    }
}
