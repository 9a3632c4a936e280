use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::project::Mode;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    /// When set, no confirmation prompts between stages in manual mode.
    #[serde(default)]
    pub unattended: bool,

    pub llm: LlmConfig,

    pub image: ImageConfig,

    pub video: VideoConfig,

    #[serde(default)]
    pub defaults: ProjectDefaults,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini" or "openai"
    pub gemini: Option<GeminiConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_provider")]
    pub provider: String,
    pub nanobanana: Option<NanobananaConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NanobananaConfig {
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VideoConfig {
    #[serde(default = "default_video_provider")]
    pub provider: String,
    pub sora: Option<SoraConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SoraConfig {
    pub api_key: String,
    pub base_url: Option<String>,
}

/// Settings applied to every project the CLI creates.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProjectDefaults {
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_mode")]
    pub mode: Mode,
}

impl Default for ProjectDefaults {
    fn default() -> Self {
        Self {
            style: default_style(),
            language: default_language(),
            mode: default_mode(),
        }
    }
}

fn default_input() -> String {
    "input".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_language() -> String {
    "zh".to_string()
}
fn default_style() -> String {
    "Cinematic Realistic".to_string()
}
fn default_mode() -> Mode {
    Mode::Auto
}
fn default_gemini_model() -> String {
    "gemini-3-pro-preview".to_string()
}
fn default_image_provider() -> String {
    "nanobanana".to_string()
}
fn default_video_provider() -> String {
    "sora".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}
