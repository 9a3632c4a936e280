use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Pipeline stage, doubling as the project status. `Failed` and `Cancelled`
/// are absorbing; everything between `Preprocessing` and `VideoGeneration`
/// is a runnable stage.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    Preprocessing,
    ScriptSynthesis,
    CharacterDesign,
    Storyboarding,
    PromptOptimization,
    VideoGeneration,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Idle => Some(Stage::Preprocessing),
            Stage::Preprocessing => Some(Stage::ScriptSynthesis),
            Stage::ScriptSynthesis => Some(Stage::CharacterDesign),
            Stage::CharacterDesign => Some(Stage::Storyboarding),
            Stage::Storyboarding => Some(Stage::PromptOptimization),
            Stage::PromptOptimization => Some(Stage::VideoGeneration),
            _ => None,
        }
    }

    /// Fixed project progress after this stage completes.
    pub fn progress(self) -> u8 {
        match self {
            Stage::Preprocessing => 15,
            Stage::ScriptSynthesis => 40,
            Stage::CharacterDesign => 60,
            Stage::Storyboarding => 80,
            Stage::PromptOptimization => 90,
            Stage::VideoGeneration | Stage::Completed => 100,
            _ => 0,
        }
    }

    /// Batch width used by this stage's handler.
    pub fn concurrency(self) -> usize {
        match self {
            Stage::PromptOptimization => 5,
            _ => 3,
        }
    }

    pub fn is_runnable(self) -> bool {
        matches!(
            self,
            Stage::Preprocessing
                | Stage::ScriptSynthesis
                | Stage::CharacterDesign
                | Stage::Storyboarding
                | Stage::PromptOptimization
                | Stage::VideoGeneration
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Cancelled)
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Preprocessing => "preprocessing",
            Stage::ScriptSynthesis => "script synthesis",
            Stage::CharacterDesign => "character design",
            Stage::Storyboarding => "storyboarding",
            Stage::PromptOptimization => "prompt optimization",
            Stage::VideoGeneration => "video generation",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StepState {
    #[default]
    Idle,
    Processing,
    Completed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Auto,
    Manual,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    FullText,
    Premise,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Analysis {
    pub core_plot: String,
    pub mood: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DialogueLine {
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub emotion: String,
}

/// One scene of the adapted script. Informational only; later stages work
/// on sequences.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Scene {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Character {
    pub name: String,
    pub visual_features: String,
    pub clothing: String,
    pub voice: String,
    /// Generated design sheet URL, once character design has run.
    pub portrait: Option<String>,
    /// User supplied reference image; switches generation to image-to-image.
    pub reference_image: Option<String>,
    /// Transient label while a generation is in flight.
    pub generation_status: Option<String>,
}

impl Character {
    /// Blank character added through the edit surface.
    pub fn placeholder(ordinal: usize) -> Self {
        Self {
            name: format!("New Character {}", ordinal),
            visual_features: "Description here...".to_string(),
            clothing: "Clothing here...".to_string(),
            voice: "Voice description...".to_string(),
            ..Default::default()
        }
    }
}

/// A single shot: dialogue lines, a storyboard image, a video prompt and
/// eventually the generated clip.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Sequence {
    pub id: String,
    pub included_dialogues: Vec<String>,
    pub environment_anchor: Option<String>,
    pub storyboard_prompt: String,
    pub storyboard_image: Option<String>,
    pub characters_involved: Vec<String>,
    pub video_prompt: String,
    pub optimized_prompt: Option<String>,
    pub video_url: Option<String>,
    pub generation_status: Option<String>,
}

impl Sequence {
    /// Blank sequence added through the edit surface.
    pub fn placeholder() -> Self {
        Self {
            id: new_id("shot"),
            included_dialogues: vec!["New dialogue...".to_string()],
            storyboard_prompt: "Describe scene here...".to_string(),
            video_prompt: "Video prompt here...".to_string(),
            ..Default::default()
        }
    }
}

/// Slice of the source text, produced once by preprocessing and kept for
/// traceability.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Segment {
    pub id: String,
    pub name: String,
    pub content: String,
    pub index: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub style: String,
    pub language: String,
    pub mode: Mode,
    pub source_kind: SourceKind,
    pub created_at: u64,
    pub status: Stage,
    pub step_state: StepState,
    pub progress: u8,
    pub error: Option<String>,
    pub failed_stage: Option<Stage>,
    /// The working text body: the original novel, or the expanded premise.
    pub raw_text: String,
    pub original_premise: Option<String>,
    pub cover_image: Option<String>,
    pub analysis: Option<Analysis>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub sequences: Vec<Sequence>,
}

impl Project {
    pub fn new(
        name: &str,
        style: &str,
        language: &str,
        mode: Mode,
        source_kind: SourceKind,
        content: &str,
    ) -> Self {
        let (raw_text, original_premise) = match source_kind {
            SourceKind::FullText => (content.to_string(), None),
            SourceKind::Premise => (String::new(), Some(content.to_string())),
        };
        Self {
            id: new_id("proj"),
            name: name.to_string(),
            style: style.to_string(),
            language: language.to_string(),
            mode,
            source_kind,
            created_at: epoch_millis(),
            status: Stage::Idle,
            step_state: StepState::Idle,
            progress: 0,
            error: None,
            failed_stage: None,
            raw_text,
            original_premise,
            cover_image: None,
            analysis: None,
            segments: Vec::new(),
            characters: Vec::new(),
            scenes: Vec::new(),
            sequences: Vec::new(),
        }
    }

    pub fn sequence(&self, sequence_id: &str) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.id == sequence_id)
    }

    pub fn character(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    /// Characters believed to appear in the shot, resolved by name matching.
    /// Exact matches win; containment matches fill in behind them.
    pub fn involved_characters(&self, involved: &[String]) -> Vec<&Character> {
        let mut exact = Vec::new();
        let mut fuzzy = Vec::new();
        for character in &self.characters {
            let key = normalize(&character.name);
            if key.is_empty() {
                continue;
            }
            if involved.iter().any(|n| normalize(n) == key) {
                exact.push(character);
            } else if involved.iter().any(|n| names_match(n, &character.name)) {
                fuzzy.push(character);
            }
        }
        exact.extend(fuzzy);
        exact
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Loose name equality: trimmed, case-insensitive, and a containment match
/// in either direction counts. "Ann" therefore matches "Anna"; shot
/// toggling and reference lookup both rely on exactly this rule.
pub fn names_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    !a.is_empty() && !b.is_empty() && (a == b || a.contains(&b) || b.contains(&a))
}

pub fn new_id(prefix: &str) -> String {
    format!("{}_{:012x}", prefix, rand::random::<u64>() & 0xffff_ffff_ffff)
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
