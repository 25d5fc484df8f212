pub mod elevenlabs;
pub mod openai;

pub use elevenlabs::ElevenLabsVoice;
pub use openai::OpenAiStoryWriter;

use crate::error::GenerationError;
use crate::logw;
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

const RETRY_BACKOFF_MS: u64 = 250;

/// Writes the story text for a title.
#[async_trait]
pub trait StoryWriter: Send + Sync {
    async fn write_story(&self, title: &str, word_count: u32) -> Result<String, GenerationError>;
}

/// Renders narration text to an encoded audio file.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, out_path: &Path) -> Result<(), GenerationError>;

    /// Extension of the files [`SpeechSynthesizer::synthesize`] writes.
    fn file_extension(&self) -> &str {
        "mp3"
    }
}

/// Runs `op` up to `attempts` times, backing off linearly between tries.
/// The last error is returned when every attempt fails.
pub async fn with_retries<T, F, Fut>(
    label: &str,
    attempts: u32,
    mut op: F,
) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                logw(format!("{label} attempt {attempt}/{attempts} failed: {err}"));
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
