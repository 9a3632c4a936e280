pub mod batch;
pub mod cancel;
pub mod driver;
pub mod segment;

use crate::core::project::{
    Character, Mode, Project, Sequence, SourceKind, Stage, StepState,
};
use crate::core::store::ProjectStore;
use crate::services::media::{ImageClient, VideoClient};
use crate::services::script::ScriptService;
use anyhow::{Context, Result};
use batch::run_batch;
use cancel::{CancellationRegistry, RunHandle};
use log::{error, info, warn};
use segment::partition_text;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// What a stage handler reports back to the controller.
enum StageOutcome {
    Success,
    Cancelled,
    Fatal(String),
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ProjectCreated { project_id: String },
    ProjectDeleted { project_id: String },
    StageStarted { project_id: String, stage: Stage },
    StageCompleted { project_id: String, stage: Stage },
    StageFailed { project_id: String, stage: Stage, error: String },
    RunCancelled { project_id: String },
}

pub struct NewProject {
    pub name: String,
    pub style: String,
    pub language: String,
    pub mode: Mode,
    pub source_kind: SourceKind,
    pub content: String,
}

#[derive(Default)]
pub struct SequenceEdit {
    pub included_dialogues: Option<Vec<String>>,
    pub storyboard_prompt: Option<String>,
    pub video_prompt: Option<String>,
    pub optimized_prompt: Option<String>,
    pub characters_involved: Option<Vec<String>>,
}

/// Owns the stage state machine. Runs one stage at a time per project;
/// starting a stage supersedes whatever run was in flight for that project.
pub struct PipelineController {
    store: ProjectStore,
    cancels: CancellationRegistry,
    script: ScriptService,
    image: Box<dyn ImageClient>,
    video: Box<dyn VideoClient>,
    events: broadcast::Sender<PipelineEvent>,
}

impl PipelineController {
    pub fn new(
        script: ScriptService,
        image: Box<dyn ImageClient>,
        video: Box<dyn VideoClient>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            store: ProjectStore::new(),
            cancels: CancellationRegistry::new(),
            script,
            image,
            video,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    // --- Project management ---

    pub fn create_project(&self, spec: NewProject) -> Project {
        let project = Project::new(
            &spec.name,
            &spec.style,
            &spec.language,
            spec.mode,
            spec.source_kind,
            &spec.content,
        );
        self.store.insert(project.clone());
        self.emit(PipelineEvent::ProjectCreated {
            project_id: project.id.clone(),
        });
        project
    }

    pub fn delete_project(&self, project_id: &str) -> bool {
        self.cancels.remove(project_id);
        let removed = self.store.remove(project_id).is_some();
        if removed {
            self.emit(PipelineEvent::ProjectDeleted {
                project_id: project_id.to_string(),
            });
        }
        removed
    }

    pub fn project(&self, project_id: &str) -> Option<Project> {
        self.store.get(project_id)
    }

    pub fn snapshot(&self) -> Vec<Project> {
        self.store.snapshot()
    }

    // --- Pipeline operations ---

    /// Run one stage. Defaults to the project's current status (or the
    /// first stage from idle). Always supersedes a run already in flight.
    pub async fn run_stage(&self, project_id: &str, target: Option<Stage>) -> Result<()> {
        let current = self
            .store
            .with(project_id, |p| p.status)
            .with_context(|| format!("unknown project: {}", project_id))?;
        let mut stage = target.unwrap_or(current);
        if stage == Stage::Idle {
            stage = Stage::Preprocessing;
        }
        anyhow::ensure!(
            stage.is_runnable(),
            "{} is not a runnable stage",
            stage.label()
        );

        // Token swap and status flip happen before the handler is entered;
        // any older handler for this project is superseded from here on.
        let run = self.cancels.begin(project_id);
        self.store.update(project_id, |p| {
            p.status = stage;
            p.step_state = StepState::Processing;
            p.error = None;
            p.failed_stage = None;
        });
        self.emit(PipelineEvent::StageStarted {
            project_id: project_id.to_string(),
            stage,
        });
        info!("Running {} for project {}", stage.label(), project_id);

        let outcome = match stage {
            Stage::Preprocessing => self.run_preprocessing(project_id, &run).await,
            Stage::ScriptSynthesis => self.run_script_synthesis(project_id, &run).await,
            Stage::CharacterDesign => self.run_character_design(project_id, &run).await,
            Stage::Storyboarding => self.run_storyboarding(project_id, &run).await,
            Stage::PromptOptimization => self.run_prompt_optimization(project_id, &run).await,
            Stage::VideoGeneration => self.run_video_generation(project_id, &run).await,
            _ => unreachable!("non-runnable stage dispatched"),
        };

        match outcome {
            StageOutcome::Success => {
                let folded = self.fold(project_id, &run, |p| {
                    p.step_state = StepState::Completed;
                    p.progress = stage.progress();
                    if stage == Stage::VideoGeneration {
                        p.status = Stage::Completed;
                    }
                });
                if folded {
                    info!("{} completed for project {}", stage.label(), project_id);
                    self.emit(PipelineEvent::StageCompleted {
                        project_id: project_id.to_string(),
                        stage,
                    });
                }
            }
            StageOutcome::Cancelled => {
                let folded = self.fold(project_id, &run, |p| {
                    p.status = Stage::Cancelled;
                    p.step_state = StepState::Completed;
                });
                if folded {
                    info!("{} cancelled for project {}", stage.label(), project_id);
                    self.emit(PipelineEvent::RunCancelled {
                        project_id: project_id.to_string(),
                    });
                }
            }
            StageOutcome::Fatal(message) => {
                let folded = self.fold(project_id, &run, |p| {
                    p.status = Stage::Failed;
                    p.failed_stage = Some(stage);
                    p.error = Some(message.clone());
                    p.step_state = StepState::Idle;
                });
                if folded {
                    error!(
                        "{} failed for project {}: {}",
                        stage.label(),
                        project_id,
                        message
                    );
                    self.emit(PipelineEvent::StageFailed {
                        project_id: project_id.to_string(),
                        stage,
                        error: message,
                    });
                }
            }
        }
        Ok(())
    }

    /// Move to the stage after the current one. Only valid once the current
    /// stage has completed and the project is not in a terminal state.
    pub async fn advance(&self, project_id: &str) -> Result<()> {
        let (status, step_state) = self
            .store
            .with(project_id, |p| (p.status, p.step_state))
            .with_context(|| format!("unknown project: {}", project_id))?;
        anyhow::ensure!(
            step_state == StepState::Completed,
            "project {} has not completed its current stage",
            project_id
        );
        anyhow::ensure!(
            !status.is_terminal(),
            "project {} is in a terminal state",
            project_id
        );
        let next = status
            .next()
            .with_context(|| format!("no stage follows {}", status.label()))?;
        self.run_stage(project_id, Some(next)).await
    }

    /// Re-run the stage that failed. Items that already carry a result are
    /// skipped by the stage's own pending-item selection.
    pub async fn retry(&self, project_id: &str) -> Result<()> {
        let failed_stage = self
            .store
            .with(project_id, |p| p.failed_stage)
            .with_context(|| format!("unknown project: {}", project_id))?
            .context("project has no failed stage to retry")?;
        self.run_stage(project_id, Some(failed_stage)).await
    }

    /// Signal the project's token and mark it cancelled immediately. The
    /// in-flight handler observes the token on its own time; nothing blocks
    /// on it here.
    pub fn cancel(&self, project_id: &str) {
        self.cancels.cancel(project_id);
        let updated = self
            .store
            .update(project_id, |p| {
                p.status = Stage::Cancelled;
                p.step_state = StepState::Completed;
            })
            .is_some();
        if updated {
            self.emit(PipelineEvent::RunCancelled {
                project_id: project_id.to_string(),
            });
        }
    }

    // --- Stage handlers ---

    async fn run_preprocessing(&self, project_id: &str, run: &RunHandle) -> StageOutcome {
        let Some(project) = self.store.get(project_id) else {
            return StageOutcome::Fatal("project no longer exists".to_string());
        };

        let mut text = project.raw_text.clone();
        if project.source_kind == SourceKind::Premise {
            let premise = project.original_premise.clone().unwrap_or_default();
            if premise.trim().is_empty() {
                return StageOutcome::Fatal("premise project has no premise text".to_string());
            }
            match self
                .script
                .expand(&premise, &project.language, &run.token)
                .await
            {
                Ok(prose) => text = prose,
                Err(e) => return self.failure_outcome(run, e),
            }
        }

        if run.token.is_cancelled() {
            return StageOutcome::Cancelled;
        }
        let segments = partition_text(&text);
        info!(
            "Partitioned text into {} segment(s) for project {}",
            segments.len(),
            project_id
        );
        self.fold(project_id, run, |p| {
            p.raw_text = text;
            p.segments = segments;
        });
        StageOutcome::Success
    }

    async fn run_script_synthesis(&self, project_id: &str, run: &RunHandle) -> StageOutcome {
        let Some(project) = self.store.get(project_id) else {
            return StageOutcome::Fatal("project no longer exists".to_string());
        };
        if project.raw_text.trim().is_empty() {
            return StageOutcome::Fatal("no source text to synthesize a script from".to_string());
        }

        match self
            .script
            .synthesize(
                &project.raw_text,
                &project.style,
                &project.language,
                &run.token,
            )
            .await
        {
            Ok(output) => {
                if run.token.is_cancelled() {
                    return StageOutcome::Cancelled;
                }
                info!(
                    "Synthesized {} characters and {} sequences for project {}",
                    output.characters.len(),
                    output.sequences.len(),
                    project_id
                );
                self.fold(project_id, run, move |p| {
                    p.analysis = Some(output.analysis);
                    p.characters = output.characters;
                    p.scenes = output.scenes;
                    p.sequences = output.sequences;
                });
                StageOutcome::Success
            }
            Err(e) => self.failure_outcome(run, e),
        }
    }

    async fn run_character_design(&self, project_id: &str, run: &RunHandle) -> StageOutcome {
        let Some(project) = self.store.get(project_id) else {
            return StageOutcome::Fatal("project no longer exists".to_string());
        };
        // Characters that already hold a portrait are done; that is what
        // makes a retry of this stage safe.
        let pending: Vec<Character> = project
            .characters
            .iter()
            .filter(|c| c.portrait.is_none())
            .cloned()
            .collect();
        if pending.is_empty() {
            return StageOutcome::Success;
        }

        let store = &self.store;
        let cancels = &self.cancels;
        let image = self.image.as_ref();
        let token = &run.token;
        let generation = run.generation;
        let style = project.style.as_str();
        let language = project.language.as_str();

        let outcome = run_batch(
            pending,
            Stage::CharacterDesign.concurrency(),
            token,
            |character: Character| {
                let (store, cancels, image, token) = (store, cancels, image, token);
                let (style, language, project_id, generation) =
                    (style, language, project_id, generation);
                async move {
                    if cancels.is_current(project_id, generation) {
                        store.update_character(project_id, &character.name, |c| {
                            c.generation_status = Some("Generating...".to_string())
                        });
                    }
                    image
                        .character_image(&character, style, language, token)
                        .await
                }
            },
            |character: Character, result: Result<String>| {
                if !cancels.is_current(project_id, generation) {
                    return;
                }
                match result {
                    Ok(url) => {
                        store.update_character(project_id, &character.name, |c| {
                            c.portrait = Some(url);
                            c.generation_status = None;
                        });
                    }
                    Err(e) => {
                        warn!("Portrait for {} failed: {:#}", character.name, e);
                        store.update_character(project_id, &character.name, |c| {
                            c.generation_status = None
                        });
                    }
                }
            },
        )
        .await;

        self.batch_outcome(Stage::CharacterDesign, outcome, run)
    }

    async fn run_storyboarding(&self, project_id: &str, run: &RunHandle) -> StageOutcome {
        let Some(project) = self.store.get(project_id) else {
            return StageOutcome::Fatal("project no longer exists".to_string());
        };
        let pending: Vec<Sequence> = project
            .sequences
            .iter()
            .filter(|s| s.storyboard_image.is_none())
            .cloned()
            .collect();
        if pending.is_empty() {
            return StageOutcome::Success;
        }

        let store = &self.store;
        let cancels = &self.cancels;
        let image = self.image.as_ref();
        let token = &run.token;
        let generation = run.generation;
        let style = project.style.as_str();
        let language = project.language.as_str();
        let project_ref = &project;

        let outcome = run_batch(
            pending,
            Stage::Storyboarding.concurrency(),
            token,
            |sequence: Sequence| {
                let (store, cancels, image, token, project_ref) =
                    (store, cancels, image, token, project_ref);
                let (style, language, project_id, generation) =
                    (style, language, project_id, generation);
                async move {
                    if cancels.is_current(project_id, generation) {
                        store.update_sequence(project_id, &sequence.id, |s| {
                            s.generation_status = Some("Generating Storyboard...".to_string())
                        });
                    }
                    let involved = project_ref.involved_characters(&sequence.characters_involved);
                    let context = involved
                        .iter()
                        .map(|c| format!("{}: {}", c.name, c.visual_features))
                        .collect::<Vec<_>>()
                        .join("; ");
                    let references: Vec<String> =
                        involved.iter().filter_map(|c| c.portrait.clone()).collect();
                    image
                        .storyboard_image(
                            &sequence.storyboard_prompt,
                            style,
                            language,
                            &context,
                            &references,
                            token,
                        )
                        .await
                }
            },
            |sequence: Sequence, result: Result<String>| {
                if !cancels.is_current(project_id, generation) {
                    return;
                }
                match result {
                    Ok(url) => {
                        store.update(project_id, |p| {
                            if let Some(s) = p.sequences.iter_mut().find(|s| s.id == sequence.id) {
                                s.storyboard_image = Some(url.clone());
                                s.generation_status = None;
                            }
                            // First finished storyboard doubles as the cover.
                            if p.cover_image.is_none() {
                                p.cover_image = Some(url);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Storyboard for {} failed: {:#}", sequence.id, e);
                        store.update_sequence(project_id, &sequence.id, |s| {
                            s.generation_status = Some("Failed".to_string())
                        });
                    }
                }
            },
        )
        .await;

        self.batch_outcome(Stage::Storyboarding, outcome, run)
    }

    async fn run_prompt_optimization(&self, project_id: &str, run: &RunHandle) -> StageOutcome {
        let Some(project) = self.store.get(project_id) else {
            return StageOutcome::Fatal("project no longer exists".to_string());
        };
        let pending: Vec<Sequence> = project
            .sequences
            .iter()
            .filter(|s| s.optimized_prompt.is_none())
            .cloned()
            .collect();
        if pending.is_empty() {
            return StageOutcome::Success;
        }

        let store = &self.store;
        let cancels = &self.cancels;
        let script = &self.script;
        let token = &run.token;
        let generation = run.generation;
        let style = project.style.as_str();
        let language = project.language.as_str();

        let outcome = run_batch(
            pending,
            Stage::PromptOptimization.concurrency(),
            token,
            |sequence: Sequence| {
                let (script, token) = (script, token);
                let (style, language) = (style, language);
                async move {
                    let raw = if sequence.video_prompt.trim().is_empty() {
                        "Scene"
                    } else {
                        sequence.video_prompt.as_str()
                    };
                    script.optimize_prompt(raw, style, language, token).await
                }
            },
            |sequence: Sequence, result: Result<String>| {
                if !cancels.is_current(project_id, generation) {
                    return;
                }
                match result {
                    Ok(optimized) => {
                        store.update_sequence(project_id, &sequence.id, |s| {
                            s.optimized_prompt = Some(optimized)
                        });
                    }
                    Err(e) => warn!("Prompt optimization for {} failed: {:#}", sequence.id, e),
                }
            },
        )
        .await;

        self.batch_outcome(Stage::PromptOptimization, outcome, run)
    }

    async fn run_video_generation(&self, project_id: &str, run: &RunHandle) -> StageOutcome {
        let Some(project) = self.store.get(project_id) else {
            return StageOutcome::Fatal("project no longer exists".to_string());
        };
        let pending: Vec<Sequence> = project
            .sequences
            .iter()
            .filter(|s| s.video_url.is_none())
            .cloned()
            .collect();
        if pending.is_empty() {
            return StageOutcome::Success;
        }

        let store = &self.store;
        let cancels = &self.cancels;
        let video = self.video.as_ref();
        let token = &run.token;
        let generation = run.generation;
        let style = project.style.as_str();
        let language = project.language.as_str();

        let outcome = run_batch(
            pending,
            Stage::VideoGeneration.concurrency(),
            token,
            |sequence: Sequence| {
                let (store, cancels, video, token) = (store, cancels, video, token);
                let (style, language, project_id, generation) =
                    (style, language, project_id, generation);
                async move {
                    if cancels.is_current(project_id, generation) {
                        store.update_sequence(project_id, &sequence.id, |s| {
                            s.generation_status = Some("Starting...".to_string())
                        });
                    }
                    let prompt = sequence
                        .optimized_prompt
                        .clone()
                        .filter(|p| !p.trim().is_empty())
                        .unwrap_or_else(|| sequence.video_prompt.clone());
                    let sequence_id = sequence.id.clone();
                    let on_progress = move |status: String| {
                        // Stale runs must not scribble progress into a
                        // project that has moved on.
                        if cancels.is_current(project_id, generation) {
                            store.update_sequence(project_id, &sequence_id, |s| {
                                s.generation_status = Some(status)
                            });
                        }
                    };
                    video
                        .generate(
                            &prompt,
                            style,
                            language,
                            sequence.storyboard_image.as_deref(),
                            &on_progress,
                            token,
                        )
                        .await
                }
            },
            |sequence: Sequence, result: Result<String>| {
                if !cancels.is_current(project_id, generation) {
                    return;
                }
                match result {
                    Ok(url) => {
                        store.update_sequence(project_id, &sequence.id, |s| {
                            s.video_url = Some(url);
                            s.generation_status = Some("Completed".to_string());
                        });
                    }
                    Err(e) => {
                        warn!("Video for {} failed: {:#}", sequence.id, e);
                        store.update_sequence(project_id, &sequence.id, |s| {
                            s.generation_status = Some(format!("Failed: {:#}", e))
                        });
                    }
                }
            },
        )
        .await;

        self.batch_outcome(Stage::VideoGeneration, outcome, run)
    }

    // --- Single-item operations ---

    /// Regenerate one character's portrait outside a pipeline run.
    pub async fn regenerate_character(&self, project_id: &str, name: &str) -> Result<()> {
        let (character, style, language) = self
            .store
            .with(project_id, |p| {
                (p.character(name).cloned(), p.style.clone(), p.language.clone())
            })
            .with_context(|| format!("unknown project: {}", project_id))?;
        let character = character.with_context(|| format!("unknown character: {}", name))?;

        self.store.update_character(project_id, name, |c| {
            c.generation_status = Some("Regenerating...".to_string())
        });
        match self
            .image
            .character_image(&character, &style, &language, &CancellationToken::new())
            .await
        {
            Ok(url) => {
                self.store.update_character(project_id, name, |c| {
                    c.portrait = Some(url);
                    c.generation_status = None;
                });
                Ok(())
            }
            Err(e) => {
                self.store
                    .update_character(project_id, name, |c| c.generation_status = None);
                Err(e.context(format!("failed to regenerate character {}", name)))
            }
        }
    }

    /// Redraw one sequence's storyboard outside a pipeline run.
    pub async fn regenerate_storyboard(&self, project_id: &str, sequence_id: &str) -> Result<()> {
        let project = self
            .store
            .get(project_id)
            .with_context(|| format!("unknown project: {}", project_id))?;
        let sequence = project
            .sequence(sequence_id)
            .with_context(|| format!("unknown sequence: {}", sequence_id))?
            .clone();

        self.store.update_sequence(project_id, sequence_id, |s| {
            s.generation_status = Some("Generating Storyboard...".to_string())
        });
        let involved = project.involved_characters(&sequence.characters_involved);
        let context = involved
            .iter()
            .map(|c| format!("{}: {}", c.name, c.visual_features))
            .collect::<Vec<_>>()
            .join("; ");
        let references: Vec<String> = involved.iter().filter_map(|c| c.portrait.clone()).collect();

        match self
            .image
            .storyboard_image(
                &sequence.storyboard_prompt,
                &project.style,
                &project.language,
                &context,
                &references,
                &CancellationToken::new(),
            )
            .await
        {
            Ok(url) => {
                self.store.update(project_id, |p| {
                    if let Some(s) = p.sequences.iter_mut().find(|s| s.id == sequence_id) {
                        s.storyboard_image = Some(url.clone());
                        s.generation_status = None;
                    }
                    if p.cover_image.is_none() {
                        p.cover_image = Some(url);
                    }
                });
                Ok(())
            }
            Err(e) => {
                self.store.update_sequence(project_id, sequence_id, |s| {
                    s.generation_status = Some("Regeneration Failed".to_string())
                });
                Err(e.context(format!("failed to regenerate storyboard {}", sequence_id)))
            }
        }
    }

    /// Generate (or retry) one sequence's video outside a pipeline run.
    /// Requires the storyboard image to exist already.
    pub async fn regenerate_video(&self, project_id: &str, sequence_id: &str) -> Result<()> {
        let project = self
            .store
            .get(project_id)
            .with_context(|| format!("unknown project: {}", project_id))?;
        let sequence = project
            .sequence(sequence_id)
            .with_context(|| format!("unknown sequence: {}", sequence_id))?
            .clone();
        anyhow::ensure!(
            sequence.storyboard_image.is_some(),
            "sequence {} has no storyboard image yet",
            sequence_id
        );

        self.store.update_sequence(project_id, sequence_id, |s| {
            s.generation_status = Some("Starting Video Gen...".to_string())
        });
        let prompt = sequence
            .optimized_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| sequence.video_prompt.clone());
        let on_progress = |status: String| {
            self.store.update_sequence(project_id, sequence_id, |s| {
                s.generation_status = Some(status)
            });
        };

        match self
            .video
            .generate(
                &prompt,
                &project.style,
                &project.language,
                sequence.storyboard_image.as_deref(),
                &on_progress,
                &CancellationToken::new(),
            )
            .await
        {
            Ok(url) => {
                self.store.update_sequence(project_id, sequence_id, |s| {
                    s.video_url = Some(url);
                    s.generation_status = Some("Completed".to_string());
                });
                Ok(())
            }
            Err(e) => {
                self.store.update_sequence(project_id, sequence_id, |s| {
                    s.generation_status = Some(format!("Failed: {:#}", e))
                });
                Err(e.context(format!("failed to generate video for {}", sequence_id)))
            }
        }
    }

    /// Append an AI-written continuation to the project's text body.
    pub async fn continue_story(&self, project_id: &str) -> Result<()> {
        let text = self
            .store
            .with(project_id, |p| p.raw_text.clone())
            .with_context(|| format!("unknown project: {}", project_id))?;
        anyhow::ensure!(!text.trim().is_empty(), "project has no text to continue");

        let continuation = self
            .script
            .continue_story(&text, &CancellationToken::new())
            .await?;
        self.store.update(project_id, |p| {
            p.raw_text.push_str("\n\n");
            p.raw_text.push_str(&continuation);
        });
        Ok(())
    }

    // --- Edit operations ---

    /// Replace a character wholesale. A rename rewrites every sequence that
    /// referenced the old name.
    pub fn edit_character(
        &self,
        project_id: &str,
        original_name: &str,
        updated: Character,
    ) -> Result<()> {
        let renamed = original_name != updated.name;
        let new_name = updated.name.clone();
        self.store
            .update(project_id, |p| {
                if let Some(slot) = p.characters.iter_mut().find(|c| c.name == original_name) {
                    *slot = updated;
                }
                if renamed {
                    for sequence in &mut p.sequences {
                        for name in &mut sequence.characters_involved {
                            if name == original_name {
                                *name = new_name.clone();
                            }
                        }
                    }
                }
            })
            .with_context(|| format!("unknown project: {}", project_id))?;
        Ok(())
    }

    pub fn edit_sequence(
        &self,
        project_id: &str,
        sequence_id: &str,
        edit: SequenceEdit,
    ) -> Result<()> {
        let applied = self.store.update_sequence(project_id, sequence_id, |s| {
            if let Some(dialogues) = edit.included_dialogues {
                s.included_dialogues = dialogues;
            }
            if let Some(prompt) = edit.storyboard_prompt {
                s.storyboard_prompt = prompt;
            }
            if let Some(prompt) = edit.video_prompt {
                s.video_prompt = prompt;
            }
            if let Some(prompt) = edit.optimized_prompt {
                s.optimized_prompt = Some(prompt);
            }
            if let Some(involved) = edit.characters_involved {
                s.characters_involved = involved;
            }
        });
        anyhow::ensure!(
            applied,
            "unknown project {} or sequence {}",
            project_id,
            sequence_id
        );
        Ok(())
    }

    pub fn add_character(&self, project_id: &str) -> Result<Character> {
        self.store
            .update(project_id, |p| {
                let character = Character::placeholder(p.characters.len() + 1);
                p.characters.push(character.clone());
                character
            })
            .with_context(|| format!("unknown project: {}", project_id))
    }

    pub fn add_sequence(&self, project_id: &str) -> Result<Sequence> {
        self.store
            .update(project_id, |p| {
                let sequence = Sequence::placeholder();
                p.sequences.push(sequence.clone());
                sequence
            })
            .with_context(|| format!("unknown project: {}", project_id))
    }

    pub fn delete_character(&self, project_id: &str, name: &str) -> Result<()> {
        self.store
            .update(project_id, |p| p.characters.retain(|c| c.name != name))
            .with_context(|| format!("unknown project: {}", project_id))?;
        Ok(())
    }

    pub fn delete_sequence(&self, project_id: &str, sequence_id: &str) -> Result<()> {
        self.store
            .update(project_id, |p| p.sequences.retain(|s| s.id != sequence_id))
            .with_context(|| format!("unknown project: {}", project_id))?;
        Ok(())
    }

    pub fn set_reference_image(&self, project_id: &str, name: &str, url: &str) -> Result<()> {
        let applied = self.store.update_character(project_id, name, |c| {
            c.reference_image = Some(url.to_string())
        });
        anyhow::ensure!(applied, "unknown project {} or character {}", project_id, name);
        Ok(())
    }

    // --- Internals ---

    /// Apply a mutation only if this run is still the project's current
    /// one. Late results from superseded runs fall on the floor here.
    fn fold(&self, project_id: &str, run: &RunHandle, f: impl FnOnce(&mut Project)) -> bool {
        if !self.cancels.is_current(project_id, run.generation) {
            return false;
        }
        self.store.update(project_id, f).is_some()
    }

    fn failure_outcome(&self, run: &RunHandle, error: anyhow::Error) -> StageOutcome {
        if run.token.is_cancelled() {
            StageOutcome::Cancelled
        } else {
            StageOutcome::Fatal(format!("{:#}", error))
        }
    }

    /// Batch failure policy: everything failed is fatal, anything less
    /// completes the stage and leaves the failed items pending.
    fn batch_outcome(
        &self,
        stage: Stage,
        outcome: batch::BatchOutcome,
        run: &RunHandle,
    ) -> StageOutcome {
        if run.token.is_cancelled() {
            return StageOutcome::Cancelled;
        }
        if outcome.total() > 0 && outcome.failed == outcome.total() {
            return StageOutcome::Fatal(format!(
                "{} failed: all {} items failed to generate",
                stage.label(),
                outcome.failed
            ));
        }
        if outcome.failed > 0 {
            warn!(
                "{} finished with {} succeeded, {} failed; failed items stay pending for retry",
                stage.label(),
                outcome.succeeded,
                outcome.failed
            );
        }
        StageOutcome::Success
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::{ChatRequest, LlmClient};
    use crate::services::media::ProgressSink;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    fn synthesis_json(characters: &[&str], sequences: usize) -> String {
        let chars: Vec<serde_json::Value> = characters
            .iter()
            .map(|name| {
                serde_json::json!({
                    "name": name,
                    "visualFeatures": format!("{} features", name),
                    "clothing": "plain coat",
                    "voice": "steady"
                })
            })
            .collect();
        let seqs: Vec<serde_json::Value> = (0..sequences)
            .map(|i| {
                let involved = if i == 0 {
                    vec![characters[0]]
                } else {
                    characters.iter().skip(1).take(2).copied().collect()
                };
                serde_json::json!({
                    "includedDialogues": [format!("line {}", i)],
                    "charactersInvolved": involved,
                    "storyboardPrompt": format!("Slot 1 (Buffer Frame):\nPure black image;\nSlot 2: shot {};", i),
                    "videoPrompt": format!("Grid prompt {}", i)
                })
            })
            .collect();
        serde_json::json!({
            "analysis": { "corePlot": "a short drama", "mood": "tense" },
            "characters": chars,
            "script": [ { "location": "street", "time": "dusk", "environment": "rain",
                          "dialogue": [ { "speaker": characters[0], "line": "go", "action": "runs", "emotion": "urgent" } ] } ],
            "sequences": seqs
        })
        .to_string()
    }

    #[derive(Debug)]
    struct StageLlm {
        synthesis: String,
    }

    #[async_trait]
    impl LlmClient for StageLlm {
        async fn chat(
            &self,
            request: ChatRequest<'_>,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            if request.user.starts_with("Original Prompt:") {
                return Ok(format!("OPTIMIZED {}", request.user));
            }
            if request.json {
                return Ok(self.synthesis.clone());
            }
            Ok("Expanded prose body for the premise, with scenes and dialogue.".to_string())
        }
    }

    #[derive(Clone, Default)]
    struct MockImage {
        calls: Arc<StdMutex<Vec<String>>>,
        board_inputs: Arc<StdMutex<Vec<(String, Vec<String>)>>>,
        fail_names: Arc<StdMutex<Vec<String>>>,
        fail_all: Arc<AtomicBool>,
    }

    #[async_trait]
    impl crate::services::media::ImageClient for MockImage {
        async fn character_image(
            &self,
            character: &Character,
            _style: &str,
            _language: &str,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("char:{}", character.name));
            if self.fail_all.load(Ordering::SeqCst)
                || self.fail_names.lock().unwrap().contains(&character.name)
            {
                return Err(anyhow!("image backend unavailable"));
            }
            Ok(format!("http://img/{}.png", character.name))
        }

        async fn storyboard_image(
            &self,
            prompt: &str,
            _style: &str,
            _language: &str,
            character_context: &str,
            references: &[String],
            _cancel: &CancellationToken,
        ) -> Result<String> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(format!("board:{}", prompt));
                calls.len()
            };
            self.board_inputs
                .lock()
                .unwrap()
                .push((character_context.to_string(), references.to_vec()));
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(anyhow!("image backend unavailable"));
            }
            Ok(format!("http://img/board_{}.png", n))
        }
    }

    #[derive(Clone)]
    struct MockVideo {
        calls: Arc<StdMutex<Vec<String>>>,
        delay_ms: Arc<AtomicU64>,
        fail_all: Arc<AtomicBool>,
    }

    impl Default for MockVideo {
        fn default() -> Self {
            Self {
                calls: Arc::new(StdMutex::new(Vec::new())),
                delay_ms: Arc::new(AtomicU64::new(0)),
                fail_all: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl crate::services::media::VideoClient for MockVideo {
        async fn generate(
            &self,
            prompt: &str,
            _style: &str,
            _language: &str,
            _anchor_image: Option<&str>,
            on_progress: ProgressSink<'_>,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(prompt.to_string());
                calls.len()
            };
            on_progress("PROCESSING (50%)".to_string());
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(anyhow!("video backend unavailable"));
            }
            Ok(format!("http://video/clip_{}.mp4", n))
        }
    }

    fn controller_with(
        synthesis: String,
        image: MockImage,
        video: MockVideo,
    ) -> Arc<PipelineController> {
        PipelineController::new(
            ScriptService::new(Box::new(StageLlm { synthesis })),
            Box::new(image),
            Box::new(video),
        )
    }

    fn premise_project(controller: &PipelineController, mode: Mode) -> Project {
        controller.create_project(NewProject {
            name: "test drama".to_string(),
            style: "Cinematic Realistic".to_string(),
            language: "en".to_string(),
            mode,
            source_kind: SourceKind::Premise,
            content: "a courier finds a sealed letter".to_string(),
        })
    }

    #[tokio::test]
    async fn test_manual_premise_runs_to_completion() {
        let image = MockImage::default();
        image
            .fail_names
            .lock()
            .unwrap()
            .push("Cole".to_string());
        let video = MockVideo::default();
        let controller = controller_with(
            synthesis_json(&["Anna", "Ben", "Cole", "Dana"], 2),
            image.clone(),
            video.clone(),
        );
        let project = premise_project(&controller, Mode::Manual);

        // Preprocessing: premise is expanded, one segment named Full Text.
        controller.run_stage(&project.id, None).await.unwrap();
        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.status, Stage::Preprocessing);
        assert_eq!(p.step_state, StepState::Completed);
        assert_eq!(p.progress, 15);
        assert_eq!(p.segments.len(), 1);
        assert_eq!(p.segments[0].name, "Full Text");
        assert!(p.raw_text.contains("Expanded prose"));

        // Script synthesis.
        controller.advance(&project.id).await.unwrap();
        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.status, Stage::ScriptSynthesis);
        assert_eq!(p.progress, 40);
        assert_eq!(p.characters.len(), 4);
        assert_eq!(p.sequences.len(), 2);
        assert!(p.analysis.is_some());
        assert_ne!(p.sequences[0].id, p.sequences[1].id);

        // Character design: one of four fails, stage still completes.
        controller.advance(&project.id).await.unwrap();
        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.status, Stage::CharacterDesign);
        assert_eq!(p.step_state, StepState::Completed);
        assert_eq!(p.progress, 60);
        assert!(p.character("Anna").unwrap().portrait.is_some());
        assert!(p.character("Ben").unwrap().portrait.is_some());
        assert!(p.character("Dana").unwrap().portrait.is_some());
        assert!(p.character("Cole").unwrap().portrait.is_none());
        assert!(p.characters.iter().all(|c| c.generation_status.is_none()));

        // Storyboarding: existing portraits travel as references, first
        // storyboard becomes the cover.
        controller.advance(&project.id).await.unwrap();
        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.progress, 80);
        assert!(p.sequences.iter().all(|s| s.storyboard_image.is_some()));
        assert!(p.cover_image.is_some());
        let boards = image.board_inputs.lock().unwrap();
        let seq2_input = boards
            .iter()
            .find(|(context, _)| context.contains("Ben"))
            .unwrap();
        assert!(seq2_input.0.contains("Cole"));
        assert_eq!(seq2_input.1, vec!["http://img/Ben.png".to_string()]);

        // Prompt optimization.
        controller.advance(&project.id).await.unwrap();
        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.progress, 90);
        assert!(p
            .sequences
            .iter()
            .all(|s| s.optimized_prompt.as_deref().unwrap().starts_with("OPTIMIZED")));

        // Video generation completes the project.
        controller.advance(&project.id).await.unwrap();
        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.status, Stage::Completed);
        assert_eq!(p.progress, 100);
        assert!(p.sequences.iter().all(|s| s.video_url.is_some()));
        assert!(p
            .sequences
            .iter()
            .all(|s| s.generation_status.as_deref() == Some("Completed")));
        assert!(video.calls.lock().unwrap()[0].starts_with("OPTIMIZED"));

        assert!(controller.advance(&project.id).await.is_err());
    }

    #[tokio::test]
    async fn test_all_failures_mark_project_failed() {
        let image = MockImage::default();
        image.fail_all.store(true, Ordering::SeqCst);
        let controller = controller_with(
            synthesis_json(&["Anna", "Ben"], 1),
            image.clone(),
            MockVideo::default(),
        );
        let project = premise_project(&controller, Mode::Manual);

        controller.run_stage(&project.id, None).await.unwrap();
        controller.advance(&project.id).await.unwrap();
        controller.advance(&project.id).await.unwrap();

        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.status, Stage::Failed);
        assert_eq!(p.failed_stage, Some(Stage::CharacterDesign));
        assert_eq!(p.step_state, StepState::Idle);
        let error = p.error.unwrap();
        assert!(error.contains("all 2 items failed"), "got: {}", error);
    }

    #[tokio::test]
    async fn test_retry_skips_characters_with_portraits() {
        let image = MockImage::default();
        image.fail_all.store(true, Ordering::SeqCst);
        let controller = controller_with(
            synthesis_json(&["Anna", "Ben", "Cole", "Dana"], 1),
            image.clone(),
            MockVideo::default(),
        );
        let project = premise_project(&controller, Mode::Manual);

        controller.run_stage(&project.id, None).await.unwrap();
        controller.advance(&project.id).await.unwrap();
        controller.advance(&project.id).await.unwrap();
        assert_eq!(
            controller.project(&project.id).unwrap().status,
            Stage::Failed
        );

        // Give two characters portraits by hand, then retry with a healthy
        // backend: only the two still-pending characters are resubmitted.
        for name in ["Anna", "Ben"] {
            let mut character = controller
                .project(&project.id)
                .unwrap()
                .character(name)
                .unwrap()
                .clone();
            character.portrait = Some(format!("http://img/manual_{}.png", name));
            controller
                .edit_character(&project.id, name, character)
                .unwrap();
        }
        image.fail_all.store(false, Ordering::SeqCst);
        let calls_before = image.calls.lock().unwrap().len();

        controller.retry(&project.id).await.unwrap();

        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.status, Stage::CharacterDesign);
        assert_eq!(p.step_state, StepState::Completed);
        assert!(p.characters.iter().all(|c| c.portrait.is_some()));
        let calls = image.calls.lock().unwrap();
        let retried: Vec<&String> = calls[calls_before..].iter().collect();
        assert_eq!(retried.len(), 2);
        assert!(!retried.contains(&&"char:Anna".to_string()));
        assert!(!retried.contains(&&"char:Ben".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_mid_video_stops_after_first_group() {
        let video = MockVideo::default();
        video.delay_ms.store(100, Ordering::SeqCst);
        let controller = controller_with(
            synthesis_json(&["Anna"], 5),
            MockImage::default(),
            video.clone(),
        );
        let project = premise_project(&controller, Mode::Manual);

        controller.run_stage(&project.id, None).await.unwrap();
        for _ in 0..3 {
            controller.advance(&project.id).await.unwrap();
        }
        controller.advance(&project.id).await.unwrap(); // prompt optimization
        assert_eq!(controller.project(&project.id).unwrap().progress, 90);

        let runner = controller.clone();
        let id = project.id.clone();
        let handle = tokio::spawn(async move {
            runner
                .run_stage(&id, Some(Stage::VideoGeneration))
                .await
                .unwrap();
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        controller.cancel(&project.id);
        handle.await.unwrap();

        // Only the first group of three was ever launched.
        assert_eq!(video.calls.lock().unwrap().len(), 3);
        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.status, Stage::Cancelled);
        assert_eq!(p.step_state, StepState::Completed);
        assert!(p.error.is_none());
        assert!(p.failed_stage.is_none());
        // The launched group still folded its results.
        let finished = p.sequences.iter().filter(|s| s.video_url.is_some()).count();
        assert_eq!(finished, 3);
    }

    #[tokio::test]
    async fn test_new_run_supersedes_stale_folds() {
        let video = MockVideo::default();
        video.delay_ms.store(80, Ordering::SeqCst);
        let controller = controller_with(
            synthesis_json(&["Anna"], 2),
            MockImage::default(),
            video.clone(),
        );
        let project = premise_project(&controller, Mode::Manual);

        controller.run_stage(&project.id, None).await.unwrap();
        for _ in 0..4 {
            controller.advance(&project.id).await.unwrap();
        }

        let runner = controller.clone();
        let id = project.id.clone();
        let old_run = tokio::spawn(async move {
            runner
                .run_stage(&id, Some(Stage::VideoGeneration))
                .await
                .unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Superseding run: prompt optimization has nothing pending and
        // completes immediately.
        controller
            .run_stage(&project.id, Some(Stage::PromptOptimization))
            .await
            .unwrap();
        old_run.await.unwrap();

        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.status, Stage::PromptOptimization);
        assert_eq!(p.step_state, StepState::Completed);
        assert_eq!(p.progress, 90);
        // The superseded video run's late results never landed.
        assert!(p.sequences.iter().all(|s| s.video_url.is_none()));
    }

    #[tokio::test]
    async fn test_rename_propagates_to_sequences() {
        let controller = controller_with(
            synthesis_json(&["Anna", "Ben", "Cole"], 2),
            MockImage::default(),
            MockVideo::default(),
        );
        let project = premise_project(&controller, Mode::Manual);
        controller.run_stage(&project.id, None).await.unwrap();
        controller.advance(&project.id).await.unwrap();

        let mut renamed = controller
            .project(&project.id)
            .unwrap()
            .character("Ben")
            .unwrap()
            .clone();
        renamed.name = "Benedict".to_string();
        controller
            .edit_character(&project.id, "Ben", renamed)
            .unwrap();

        let p = controller.project(&project.id).unwrap();
        assert!(p.character("Benedict").is_some());
        assert!(p.character("Ben").is_none());
        let second = &p.sequences[1];
        assert!(second
            .characters_involved
            .contains(&"Benedict".to_string()));
        assert!(!second.characters_involved.contains(&"Ben".to_string()));
        // The new name resolves through the same matching rule.
        let involved = p.involved_characters(&second.characters_involved);
        assert!(involved.iter().any(|c| c.name == "Benedict"));
    }

    #[tokio::test]
    async fn test_regenerate_video_requires_storyboard() {
        let controller = controller_with(
            synthesis_json(&["Anna"], 1),
            MockImage::default(),
            MockVideo::default(),
        );
        let project = premise_project(&controller, Mode::Manual);
        controller.run_stage(&project.id, None).await.unwrap();
        controller.advance(&project.id).await.unwrap();

        let sequence_id = controller.project(&project.id).unwrap().sequences[0]
            .id
            .clone();
        let err = controller
            .regenerate_video(&project.id, &sequence_id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no storyboard image"));
    }

    #[tokio::test]
    async fn test_regenerate_single_character() {
        let image = MockImage::default();
        let controller = controller_with(
            synthesis_json(&["Anna", "Ben"], 1),
            image.clone(),
            MockVideo::default(),
        );
        let project = premise_project(&controller, Mode::Manual);
        controller.run_stage(&project.id, None).await.unwrap();
        controller.advance(&project.id).await.unwrap();

        controller
            .regenerate_character(&project.id, "Anna")
            .await
            .unwrap();
        let p = controller.project(&project.id).unwrap();
        let anna = p.character("Anna").unwrap();
        assert_eq!(anna.portrait.as_deref(), Some("http://img/Anna.png"));
        assert!(anna.generation_status.is_none());
        // Only Anna was submitted.
        assert_eq!(&*image.calls.lock().unwrap(), &["char:Anna".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_clears_nothing_but_marks_cancelled() {
        let controller = controller_with(
            synthesis_json(&["Anna"], 1),
            MockImage::default(),
            MockVideo::default(),
        );
        let project = premise_project(&controller, Mode::Manual);
        controller.run_stage(&project.id, None).await.unwrap();
        controller.cancel(&project.id);

        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.status, Stage::Cancelled);
        assert_eq!(p.step_state, StepState::Completed);
        assert!(p.error.is_none());
        assert_eq!(p.segments.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_project_and_bad_transitions() {
        let controller = controller_with(
            synthesis_json(&["Anna"], 1),
            MockImage::default(),
            MockVideo::default(),
        );
        assert!(controller.run_stage("ghost", None).await.is_err());
        assert!(controller.advance("ghost").await.is_err());

        let project = premise_project(&controller, Mode::Manual);
        // Nothing completed yet, advancing is invalid.
        assert!(controller.advance(&project.id).await.is_err());
        // Nothing failed yet, retrying is invalid.
        assert!(controller.retry(&project.id).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_project_cancels_run() {
        let video = MockVideo::default();
        video.delay_ms.store(60, Ordering::SeqCst);
        let controller = controller_with(
            synthesis_json(&["Anna"], 1),
            MockImage::default(),
            video.clone(),
        );
        let project = premise_project(&controller, Mode::Manual);
        controller.run_stage(&project.id, None).await.unwrap();
        for _ in 0..4 {
            controller.advance(&project.id).await.unwrap();
        }

        let runner = controller.clone();
        let id = project.id.clone();
        let handle = tokio::spawn(async move {
            let _ = runner.run_stage(&id, Some(Stage::VideoGeneration)).await;
        });
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(controller.delete_project(&project.id));
        handle.await.unwrap();

        assert!(controller.project(&project.id).is_none());
        assert!(controller.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_auto_driver_runs_project_to_completion() {
        let controller = controller_with(
            synthesis_json(&["Anna", "Ben"], 2),
            MockImage::default(),
            MockVideo::default(),
        );
        let driver = driver::AutoAdvanceDriver::new(
            controller.clone(),
            Duration::from_millis(1),
        );
        let events = controller.subscribe();
        tokio::spawn(driver.run(events));

        let project = premise_project(&controller, Mode::Auto);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let p = controller.project(&project.id).unwrap();
            if p.status == Stage::Completed {
                assert_eq!(p.progress, 100);
                assert!(p.sequences.iter().all(|s| s.video_url.is_some()));
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "auto project stuck at {:?}",
                p.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_continue_story_appends() {
        let controller = controller_with(
            synthesis_json(&["Anna"], 1),
            MockImage::default(),
            MockVideo::default(),
        );
        let project = controller.create_project(NewProject {
            name: "novel".to_string(),
            style: "Watercolor".to_string(),
            language: "en".to_string(),
            mode: Mode::Manual,
            source_kind: SourceKind::FullText,
            content: "Once upon a time.".to_string(),
        });
        controller.continue_story(&project.id).await.unwrap();
        let p = controller.project(&project.id).unwrap();
        assert!(p.raw_text.starts_with("Once upon a time."));
        assert!(p.raw_text.contains("Expanded prose"));
    }

    #[tokio::test]
    async fn test_edit_surface_operations() {
        let controller = controller_with(
            synthesis_json(&["Anna"], 1),
            MockImage::default(),
            MockVideo::default(),
        );
        let project = premise_project(&controller, Mode::Manual);
        controller.run_stage(&project.id, None).await.unwrap();
        controller.advance(&project.id).await.unwrap();

        let added = controller.add_character(&project.id).unwrap();
        assert_eq!(added.name, "New Character 2");
        controller
            .set_reference_image(&project.id, &added.name, "http://ref/img.png")
            .unwrap();

        let sequence = controller.add_sequence(&project.id).unwrap();
        controller
            .edit_sequence(
                &project.id,
                &sequence.id,
                SequenceEdit {
                    storyboard_prompt: Some("a rooftop at dawn".to_string()),
                    characters_involved: Some(vec!["Anna".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();

        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.characters.len(), 2);
        assert_eq!(
            p.character("New Character 2").unwrap().reference_image.as_deref(),
            Some("http://ref/img.png")
        );
        assert_eq!(p.sequences.len(), 2);
        let edited = p.sequence(&sequence.id).unwrap();
        assert_eq!(edited.storyboard_prompt, "a rooftop at dawn");
        assert_eq!(edited.characters_involved, vec!["Anna".to_string()]);

        controller
            .delete_sequence(&project.id, &sequence.id)
            .unwrap();
        controller
            .delete_character(&project.id, "New Character 2")
            .unwrap();
        let p = controller.project(&project.id).unwrap();
        assert_eq!(p.characters.len(), 1);
        assert_eq!(p.sequences.len(), 1);
    }
}
