use anyhow::{Context, Result};
use dramaforge::core::config::Config;
use dramaforge::core::project::{Mode, SourceKind};
use dramaforge::services::llm::create_llm;
use dramaforge::services::media::{create_image_client, create_video_client};
use dramaforge::services::pipeline::driver::AutoAdvanceDriver;
use dramaforge::services::pipeline::{NewProject, PipelineController};
use dramaforge::services::script::ScriptService;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Inputs shorter than this are treated as premises and expanded first.
const PREMISE_THRESHOLD: usize = 400;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid provider settings.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let llm = create_llm(&config.llm)?;
    let image = create_image_client(&config.image)?;
    let video = create_video_client(&config.video)?;
    let controller = PipelineController::new(ScriptService::new(llm), image, video);

    let driver = AutoAdvanceDriver::new(controller.clone(), Duration::from_millis(800));
    tokio::spawn(driver.run(controller.subscribe()));

    // Serialize the full project list after every pipeline event.
    let snapshot_controller = controller.clone();
    let snapshot_path = Path::new(&config.output_folder).join("projects.json");
    let mut snapshot_events = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match snapshot_events.recv().await {
                Ok(_) => {
                    let snapshot = snapshot_controller.snapshot();
                    match serde_json::to_string_pretty(&snapshot) {
                        Ok(content) => {
                            if let Err(e) = tokio::fs::write(&snapshot_path, content).await {
                                log::warn!("Failed to write project snapshot: {}", e);
                            }
                        }
                        Err(e) => log::warn!("Failed to serialize project snapshot: {}", e),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // One project per input text file.
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(&config.input_folder).await?;
    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "txt") {
            entries.push(path);
        }
    }
    entries.sort();
    if entries.is_empty() {
        println!("No .txt files found in '{}'.", config.input_folder);
        return Ok(());
    }

    for path in entries {
        let name = path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let content = tokio::fs::read_to_string(&path).await?;
        let source_kind = if content.chars().count() < PREMISE_THRESHOLD {
            SourceKind::Premise
        } else {
            SourceKind::FullText
        };

        println!("Creating project '{}'", name);
        let project = controller.create_project(NewProject {
            name,
            style: config.defaults.style.clone(),
            language: config.defaults.language.clone(),
            mode: config.defaults.mode,
            source_kind,
            content,
        });

        match config.defaults.mode {
            Mode::Auto => watch_until_terminal(&controller, &project.id).await?,
            Mode::Manual => drive_manually(&controller, &project.id, config.unattended).await?,
        }
    }

    println!("All projects processed.");
    Ok(())
}

/// Auto mode: the driver does the advancing; show a progress bar until the
/// project reaches a terminal state.
async fn watch_until_terminal(controller: &PipelineController, project_id: &str) -> Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );

    loop {
        let Some(project) = controller.project(project_id) else {
            bar.finish_and_clear();
            return Ok(());
        };
        bar.set_position(project.progress as u64);
        bar.set_message(project.status.label().to_string());

        if project.status.is_terminal() {
            bar.finish_with_message(project.status.label().to_string());
            match project.error {
                Some(error) => println!(
                    "Project failed at {}: {}",
                    project
                        .failed_stage
                        .map(|s| s.label())
                        .unwrap_or("unknown stage"),
                    error
                ),
                None => println!("Project finished: {}", project.status.label()),
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Manual mode: run stage by stage, asking before each advance unless
/// unattended.
async fn drive_manually(
    controller: &PipelineController,
    project_id: &str,
    unattended: bool,
) -> Result<()> {
    controller.run_stage(project_id, None).await?;

    loop {
        let project = controller
            .project(project_id)
            .context("project disappeared mid-run")?;

        match project.status {
            status if status.is_terminal() => {
                match project.error {
                    Some(error) => {
                        println!(
                            "Stage {} failed: {}",
                            project
                                .failed_stage
                                .map(|s| s.label())
                                .unwrap_or("unknown"),
                            error
                        );
                        if unattended {
                            return Ok(());
                        }
                        let retry = inquire::Confirm::new("Retry the failed stage?")
                            .with_default(true)
                            .prompt()
                            .unwrap_or(false);
                        if !retry {
                            return Ok(());
                        }
                        controller.retry(project_id).await?;
                    }
                    None => {
                        println!("Project finished: {}", project.status.label());
                        return Ok(());
                    }
                }
            }
            status => {
                let Some(next) = status.next() else {
                    return Ok(());
                };
                if !unattended {
                    let proceed =
                        inquire::Confirm::new(&format!("Continue to {}?", next.label()))
                            .with_default(true)
                            .prompt()
                            .unwrap_or(false);
                    if !proceed {
                        println!("Stopping as requested.");
                        return Ok(());
                    }
                }
                controller.advance(project_id).await?;
            }
        }
    }
}
