use crate::api::StoryWriter;
use crate::config::Config;
use crate::error::GenerationError;
use crate::{logi, logw};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const OPENAI_BASE: &str = "https://api.openai.com";
const SYSTEM_PROMPT: &str =
    "You are a creative and imaginative writer specializing in horror stories.";
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Story writer backed by the OpenAI chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiStoryWriter {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

pub fn build_prompt(title: &str, word_count: u32) -> String {
    format!(
        "Write a first-person, bone-chilling, atmospheric horror story titled \"{title}\" \
         about a paranormal occurrence, in exactly {word_count} words. Open on an ordinary, \
         relatable moment such as settling in for the night after a long day or arriving at a \
         remote cabin for a weekend away. Then let something sinister intrude: footsteps in the \
         attic, a shadow passing the window. Keep the setting quiet and isolated so every creak \
         and shadow feeds the narrator's fear, and use sensory detail like footsteps in the dark, \
         light glinting off unfamiliar objects, or whispers from unseen corners. The intruder's \
         presence should be felt throughout. The narrator finally confronts it in a chilling \
         climax, survives and reports it to the police, but the intruder is never caught and is \
         said to still be out there waiting for the next victim. Write for audio narration: \
         every word should build suspense."
    )
}

/// Pulls the story text out of a chat completions response body, logging the
/// provider's error fields when the body is an error object.
pub fn extract_story_text(resp_json: &str) -> Result<String, GenerationError> {
    let root: serde_json::Value = serde_json::from_str(resp_json)
        .map_err(|e| GenerationError::StoryGenerationFailed(format!("malformed response: {e}")))?;

    if let Some(err) = root.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        if let Some(typ) = err.get("type").and_then(|v| v.as_str()) {
            logw(format!("OpenAI error type: {typ}"));
        }
        if let Some(code) = err.get("code").and_then(|v| v.as_str()) {
            logw(format!("OpenAI error code: {code}"));
        }
        return Err(GenerationError::StoryGenerationFailed(message.to_owned()));
    }

    root.get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| GenerationError::StoryGenerationFailed("response had no story text".to_owned()))
}

impl OpenAiStoryWriter {
    pub fn new(client: Client, cfg: &Config) -> Self {
        Self {
            client,
            api_key: cfg.openai_key.clone(),
            model: cfg.openai_model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        }
    }

    fn request_body(&self, title: &str, word_count: u32) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(title, word_count)},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }
}

#[async_trait]
impl StoryWriter for OpenAiStoryWriter {
    async fn write_story(&self, title: &str, word_count: u32) -> Result<String, GenerationError> {
        let url = format!("{OPENAI_BASE}/v1/chat/completions");
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(title, word_count))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| GenerationError::StoryGenerationFailed(format!("request failed: {e}")))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            logw(format!("OpenAI HTTP {}", status.as_u16()));
            if !raw.is_empty() {
                let snippet = raw.chars().take(800).collect::<String>();
                logw(format!("OpenAI raw body: {snippet}"));
            }
        }

        let story = extract_story_text(&raw)?;
        logi(format!(
            "OpenAI story received: {} words",
            story.split_whitespace().count()
        ));
        Ok(story)
    }
}
