use crate::core::config::{ImageConfig, VideoConfig};
use crate::core::project::Character;
use crate::services::script::language_name;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::multipart;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Receives human-readable status text while a long-running generation is
/// in flight.
pub type ProgressSink<'a> = &'a (dyn Fn(String) + Send + Sync);

#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn character_image(
        &self,
        character: &Character,
        style: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn storyboard_image(
        &self,
        prompt: &str,
        style: &str,
        language: &str,
        character_context: &str,
        references: &[String],
        cancel: &CancellationToken,
    ) -> Result<String>;
}

#[async_trait]
pub trait VideoClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        style: &str,
        language: &str,
        anchor_image: Option<&str>,
        on_progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

pub fn create_image_client(config: &ImageConfig) -> Result<Box<dyn ImageClient>> {
    match config.provider.as_str() {
        "nanobanana" => {
            let cfg = config
                .nanobanana
                .as_ref()
                .context("Nanobanana config missing")?;
            Ok(Box::new(NanobananaClient::new(
                &cfg.api_key,
                cfg.base_url.as_deref(),
            )))
        }
        _ => Err(anyhow!("Unknown image provider: {}", config.provider)),
    }
}

pub fn create_video_client(config: &VideoConfig) -> Result<Box<dyn VideoClient>> {
    match config.provider.as_str() {
        "sora" => {
            let cfg = config.sora.as_ref().context("Sora config missing")?;
            Ok(Box::new(SoraClient::new(
                &cfg.api_key,
                cfg.base_url.as_deref(),
            )))
        }
        _ => Err(anyhow!("Unknown video provider: {}", config.provider)),
    }
}

fn cultural_context(language: &str) -> &str {
    match language {
        "zh" => "Chinese context",
        "en" => "Western context",
        "ja" => "Japanese context",
        "ko" => "Korean context",
        other => other,
    }
}

/// Providers wrap the result URL in wildly different shapes. All the shape
/// probing lives in this one helper; everything else sees a plain URL.
fn extract_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.starts_with("http") || s.starts_with("data:image") => {
            Some(s.clone())
        }
        Value::Array(items) => items.iter().find_map(extract_url),
        Value::Object(map) => {
            for key in ["url", "image_url", "video_url"] {
                if let Some(Value::String(s)) = map.get(key) {
                    return Some(s.clone());
                }
            }
            for key in ["output", "data", "artifacts", "image", "generations"] {
                if let Some(nested) = map.get(key) {
                    if let Some(found) = extract_url(nested) {
                        return Some(found);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

// --- Nanobanana (images) ---

pub struct NanobananaClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl NanobananaClient {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://api.nanobanana.com")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_bytes(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let resp = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("request cancelled"),
            resp = self.client.get(url).send() => resp?,
        };
        if !resp.status().is_success() {
            anyhow::bail!("Failed to fetch image {}: {}", url, resp.status());
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn post_json(&self, path: &str, body: Value, cancel: &CancellationToken) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("request cancelled"),
            resp = send => resp?,
        };
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            anyhow::bail!("Nanobanana API error: {}", error_text);
        }
        Ok(resp.json().await?)
    }

    async fn post_form(
        &self,
        path: &str,
        form: multipart::Form,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("request cancelled"),
            resp = send => resp?,
        };
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            anyhow::bail!("Nanobanana API error: {}", error_text);
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ImageClient for NanobananaClient {
    async fn character_image(
        &self,
        character: &Character,
        style: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = format!(
            "Character Design Sheet (Three Views: Front, Side, Back) for {}.\n\
             Visual features: {}.\n\
             Clothing: {}.\n\
             Style: {}.\n\
             Cultural Context: {}.\n\
             High quality, detailed character reference sheet, white background.",
            character.name,
            character.visual_features,
            character.clothing,
            style,
            cultural_context(language),
        );

        let data = if let Some(reference) = &character.reference_image {
            // Image-to-image against the user's reference.
            let bytes = self.fetch_bytes(reference, cancel).await?;
            let form = multipart::Form::new()
                .text("model", "nano-banana")
                .text("prompt", prompt)
                .text("n", "1")
                .text("size", "1024x1024")
                .text("response_format", "url")
                .part(
                    "image",
                    multipart::Part::bytes(bytes).file_name("reference.png"),
                );
            self.post_form("/v1/images/edits", form, cancel).await?
        } else {
            self.post_json(
                "/v1/images/generations",
                serde_json::json!({
                    "model": "nano-banana",
                    "prompt": prompt,
                    "n": 1,
                    "size": "1024x1024",
                    "response_format": "url",
                }),
                cancel,
            )
            .await?
        };

        extract_url(&data).context("No image URL found in Nanobanana response")
    }

    async fn storyboard_image(
        &self,
        prompt: &str,
        style: &str,
        language: &str,
        character_context: &str,
        references: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut full_prompt = format!(
            "*** Six-Panel Storyboard Sheet, 2 rows x 3 columns layout, 2x3 grid ***\n\
             Visual Style: {}. {}.\n\n\
             [Panel Content]\n{}",
            style,
            cultural_context(language),
            prompt,
        );
        if !character_context.is_empty() {
            full_prompt.push_str(&format!("\n\n[Characters]\n{}", character_context));
        }

        if !references.is_empty() {
            let mut form = multipart::Form::new()
                .text("model", "nano-banana")
                .text("prompt", full_prompt.clone())
                .text("image_size", "4K")
                .text("response_format", "url");

            let mut appended = 0usize;
            for reference in references {
                if cancel.is_cancelled() {
                    anyhow::bail!("request cancelled");
                }
                match self.fetch_bytes(reference, cancel).await {
                    Ok(bytes) => {
                        form = form.part(
                            "image",
                            multipart::Part::bytes(bytes).file_name(format!("ref_{}.png", appended)),
                        );
                        appended += 1;
                    }
                    Err(e) => {
                        // Consistency degrades without the reference, but the
                        // shot can still be drawn from text.
                        warn!("Failed to download reference image {}: {:#}", reference, e);
                    }
                }
            }

            if appended > 0 {
                let data = self.post_form("/v1/images/edits", form, cancel).await?;
                return extract_url(&data).context("No image URL found in Nanobanana response");
            }
            warn!("No character reference images could be loaded, falling back to text-only generation");
        }

        let data = self
            .post_json(
                "/v1/images/generations",
                serde_json::json!({
                    "model": "nano-banana",
                    "prompt": full_prompt,
                    "n": 1,
                    "size": "1024x1024",
                    "aspect_ratio": "16:9",
                    "response_format": "url",
                }),
                cancel,
            )
            .await?;
        extract_url(&data).context("No image URL found in Nanobanana response")
    }
}

// --- Sora (video, submit then poll) ---

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLLS: usize = 720; // one hour at 5s

pub struct SoraClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl SoraClient {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://api.sora.com")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn poll(
        &self,
        task_id: &str,
        on_progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let url = format!("{}/v2/videos/generations/{}", self.base_url, task_id);
        info!("Polling video task {}", task_id);

        for attempt in 0..MAX_POLLS {
            tokio::select! {
                _ = cancel.cancelled() => anyhow::bail!("polling cancelled"),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let resp = tokio::select! {
                _ = cancel.cancelled() => anyhow::bail!("polling cancelled"),
                resp = self.client.get(&url).bearer_auth(&self.api_key).send() => resp,
            };
            let resp = match resp {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("Video poll #{} transport error (retrying): {}", attempt + 1, e);
                    continue;
                }
            };

            let status_code = resp.status();
            if status_code.is_client_error() && status_code.as_u16() != 404 {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Video poll rejected ({}): {}", status_code, body);
            }
            if !status_code.is_success() {
                // 404 can be eventual consistency right after submit; 5xx is
                // transient either way.
                warn!("Video poll #{} got {} (retrying)", attempt + 1, status_code);
                continue;
            }

            let data: Value = match resp.json().await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Video poll #{} unparseable body (retrying): {}", attempt + 1, e);
                    continue;
                }
            };

            let status = data
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_uppercase();

            if status == "FAILED" || status == "FAILURE" {
                let detail = data
                    .get("fail_reason")
                    .and_then(Value::as_str)
                    .or_else(|| data.pointer("/error/message").and_then(Value::as_str))
                    .or_else(|| data.get("message").and_then(Value::as_str))
                    .unwrap_or("Video generation task failed.");
                anyhow::bail!("Video generation failed: {}", detail);
            }

            let mut status_text = status.clone();
            if let Some(progress) = data.get("progress") {
                let progress = progress
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| progress.to_string());
                if !progress.is_empty() {
                    status_text = format!("{} ({}%)", status_text, progress.trim_matches('"'));
                }
            }
            on_progress(status_text);

            if status == "SUCCESS" || status == "COMPLETED" {
                let video_url = data
                    .pointer("/data/output")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| {
                        data.get("video_url")
                            .or_else(|| data.get("url"))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .or_else(|| extract_url(&data));
                if let Some(video_url) = video_url {
                    return Ok(video_url);
                }
                warn!("Task {} completed but no video URL in response yet", task_id);
            }
        }

        anyhow::bail!("Video generation timed out after one hour of polling")
    }
}

#[async_trait]
impl VideoClient for SoraClient {
    async fn generate(
        &self,
        prompt: &str,
        style: &str,
        language: &str,
        anchor_image: Option<&str>,
        on_progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let final_prompt = match anchor_image {
            Some(_) => format!(
                "Visual Style: {}.\nCultural Context: {}.\n{}\n\n\
                 [REFERENCE] Use the attached six-grid storyboard image as a strict visual \
                 reference for characters, composition, and timeline.",
                style,
                cultural_context(language),
                prompt,
            ),
            None => format!(
                "Visual Style: {}.\nCultural Context: {}.\n{}",
                style,
                cultural_context(language),
                prompt,
            ),
        };

        let images: Vec<&str> = anchor_image.into_iter().collect();
        let body = serde_json::json!({
            "prompt": final_prompt,
            "model": "sora-2",
            "aspect_ratio": "16:9",
            "hd": true,
            "duration": "15",
            "watermark": false,
            "private": true,
            "images": images,
        });

        let url = format!("{}/v2/videos/generations", self.base_url);
        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("request cancelled"),
            resp = send => resp?,
        };
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            anyhow::bail!("Sora API error: {}", error_text);
        }

        let data: Value = resp.json().await?;
        let task_id = data
            .get("task_id")
            .or_else(|| data.pointer("/data/task_id"))
            .and_then(Value::as_str)
            .context("Video provider response did not contain a task_id")?
            .to_string();

        self.poll(&task_id, on_progress, cancel).await
    }
}
