use crate::api::SpeechSynthesizer;
use crate::config::{Config, VoiceSettings};
use crate::error::GenerationError;
use crate::logw;
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const ELEVENLABS_BASE: &str = "https://api.elevenlabs.io";
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// ElevenLabs streaming text-to-speech. The response body is written to disk
/// chunk by chunk as it arrives.
#[derive(Debug, Clone)]
pub struct ElevenLabsVoice {
    client: Client,
    api_key: String,
    voice_id: String,
    model_id: String,
    settings: VoiceSettings,
}

fn synthesis_failed(status: Option<u16>, payload: impl Into<String>) -> GenerationError {
    GenerationError::SpeechSynthesisFailed {
        status,
        payload: payload.into(),
    }
}

impl ElevenLabsVoice {
    pub fn new(client: Client, cfg: &Config) -> Self {
        Self {
            client,
            api_key: cfg.elevenlabs_key.clone(),
            voice_id: cfg.eleven_voice_id.clone(),
            model_id: cfg.eleven_model_id.clone(),
            settings: cfg.voice_settings,
        }
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": self.settings,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsVoice {
    async fn synthesize(&self, text: &str, out_path: &Path) -> Result<(), GenerationError> {
        let url = format!("{ELEVENLABS_BASE}/v1/text-to-speech/{}/stream", self.voice_id);

        let mut resp = self
            .client
            .post(url)
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", &self.api_key)
            .json(&self.request_body(text))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| synthesis_failed(None, format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let payload = resp.text().await.unwrap_or_default();
            logw(format!("ElevenLabs TTS failed HTTP {}", status.as_u16()));
            return Err(synthesis_failed(Some(status.as_u16()), payload));
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| synthesis_failed(None, format!("create {}: {e}", parent.display())))?;
        }
        let mut file = fs::File::create(out_path)
            .await
            .map_err(|e| synthesis_failed(None, format!("create {}: {e}", out_path.display())))?;

        let mut written = 0usize;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| synthesis_failed(Some(status.as_u16()), format!("stream interrupted: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| synthesis_failed(None, format!("write {}: {e}", out_path.display())))?;
            written += chunk.len();
        }
        file.flush()
            .await
            .map_err(|e| synthesis_failed(None, format!("flush {}: {e}", out_path.display())))?;

        if written == 0 {
            return Err(synthesis_failed(Some(status.as_u16()), "empty audio stream"));
        }
        Ok(())
    }
}
