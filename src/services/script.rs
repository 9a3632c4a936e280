use crate::core::project::{new_id, Analysis, Character, Scene, Sequence};
use crate::services::llm::{ChatRequest, LlmClient};
use crate::services::prompts::{
    CONTINUE_STORY_PROMPT, PREMISE_EXPANSION_PROMPT, PROMPT_OPTIMIZATION_PROMPT,
    SCRIPT_SYSTEM_PROMPT, TEXT_PREPROCESS_PROMPT,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Typed text operations over the chat transport. Response-shape handling
/// stays in here; callers only see model types.
pub struct ScriptService {
    llm: Box<dyn LlmClient>,
}

#[derive(Debug)]
pub struct ScriptOutput {
    pub analysis: Analysis,
    pub characters: Vec<Character>,
    pub scenes: Vec<Scene>,
    pub sequences: Vec<Sequence>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisDraft {
    #[serde(default)]
    analysis: AnalysisDraft,
    #[serde(default)]
    characters: Vec<CharacterDraft>,
    #[serde(default)]
    script: Vec<Scene>,
    #[serde(default)]
    sequences: Vec<SequenceDraft>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AnalysisDraft {
    #[serde(default)]
    core_plot: String,
    #[serde(default)]
    mood: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharacterDraft {
    name: String,
    #[serde(default)]
    visual_features: String,
    #[serde(default)]
    clothing: String,
    #[serde(default)]
    voice: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SequenceDraft {
    #[serde(default)]
    included_dialogues: Vec<String>,
    #[serde(default)]
    environment_anchor: Option<String>,
    #[serde(default)]
    characters_involved: Vec<String>,
    #[serde(default)]
    storyboard_prompt: String,
    #[serde(default)]
    video_prompt: String,
}

impl ScriptService {
    pub fn new(llm: Box<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Expand a short premise into full narrative prose.
    pub async fn expand(
        &self,
        premise: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let system = format!(
            "targetlang:{}\n{}",
            language_name(language),
            PREMISE_EXPANSION_PROMPT
        );
        self.llm
            .chat(
                ChatRequest {
                    system: &system,
                    user: premise,
                    json: false,
                    temperature: Some(0.85),
                },
                cancel,
            )
            .await
            .context("premise expansion failed")
    }

    /// Format-only cleanup of a raw text; never adds content.
    pub async fn preprocess(&self, raw_text: &str, cancel: &CancellationToken) -> Result<String> {
        self.llm
            .chat(
                ChatRequest {
                    system: TEXT_PREPROCESS_PROMPT,
                    user: raw_text,
                    json: false,
                    temperature: Some(0.1),
                },
                cancel,
            )
            .await
            .context("text preprocessing failed")
    }

    /// Append a continuation to an existing story body.
    pub async fn continue_story(
        &self,
        current_text: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        // Tail context is enough; whole novels blow the window.
        let context: String = tail_chars(current_text, 15_000);
        self.llm
            .chat(
                ChatRequest {
                    system: CONTINUE_STORY_PROMPT,
                    user: &context,
                    json: false,
                    temperature: Some(0.7),
                },
                cancel,
            )
            .await
            .context("story continuation failed")
    }

    /// One-shot structured decomposition of the full text into analysis,
    /// characters, scenes and sequences. Sequences get fresh ids here.
    pub async fn synthesize(
        &self,
        text: &str,
        style: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<ScriptOutput> {
        let system = format!(
            "{}\n\nIMPORTANT CONFIGURATION:\n\
             1. TARGET LANGUAGE: All output (character names, descriptions, script dialogue, analysis) MUST be in {}.\n\
             2. VISUAL STYLE: The storyboard descriptions and character visual features MUST reflect the style \"{}\".",
            SCRIPT_SYSTEM_PROMPT,
            language_name(language),
            style
        );
        let response = self
            .llm
            .chat(
                ChatRequest {
                    system: &system,
                    user: text,
                    json: true,
                    temperature: Some(0.7),
                },
                cancel,
            )
            .await?;

        let clean_json = strip_code_blocks(&response);
        let draft: SynthesisDraft = serde_json::from_str(&clean_json)
            .with_context(|| format!("Failed to parse synthesis JSON: {}", clean_json))?;

        Ok(ScriptOutput {
            analysis: Analysis {
                core_plot: draft.analysis.core_plot,
                mood: draft.analysis.mood,
            },
            characters: draft
                .characters
                .into_iter()
                .map(|c| Character {
                    name: c.name,
                    visual_features: c.visual_features,
                    clothing: c.clothing,
                    voice: c.voice,
                    ..Default::default()
                })
                .collect(),
            scenes: draft.script,
            sequences: draft
                .sequences
                .into_iter()
                .map(|s| Sequence {
                    id: new_id("shot"),
                    included_dialogues: s.included_dialogues,
                    environment_anchor: s.environment_anchor,
                    characters_involved: s.characters_involved,
                    storyboard_prompt: s.storyboard_prompt,
                    video_prompt: s.video_prompt,
                    ..Default::default()
                })
                .collect(),
        })
    }

    /// Rewrite a raw video prompt into the structured time-coded form.
    pub async fn optimize_prompt(
        &self,
        raw_prompt: &str,
        style: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let system = format!(
            "{}\n\nIMPORTANT CONFIGURATION:\n\
             1. TARGET LANGUAGE: The structured output (Action, Subject, Scene, etc.) MUST be written in {}.\n\
             2. VISUAL STYLE: The prompt descriptions MUST reflect the style \"{}\".",
            PROMPT_OPTIMIZATION_PROMPT,
            language_name(language),
            style
        );
        let user = format!("Original Prompt: {}", raw_prompt);
        self.llm
            .chat(
                ChatRequest {
                    system: &system,
                    user: &user,
                    json: false,
                    temperature: None,
                },
                cancel,
            )
            .await
            .context("prompt optimization failed")
    }
}

pub fn language_name(code: &str) -> &str {
    match code {
        "zh" => "Chinese (Simplified)",
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        other => other,
    }
}

fn tail_chars(text: &str, count: usize) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(count)).collect()
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}
