use crate::core::project::{Mode, StepState};
use crate::services::pipeline::{PipelineController, PipelineEvent};
use log::warn;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Drives projects in auto mode: starts the pipeline when such a project is
/// created and schedules the next stage after each completed one. Everything
/// else (manual projects, failures, cancellations) is left to the operator.
pub struct AutoAdvanceDriver {
    controller: Arc<PipelineController>,
    delay: Duration,
}

impl AutoAdvanceDriver {
    pub fn new(controller: Arc<PipelineController>, delay: Duration) -> Self {
        Self { controller, delay }
    }

    /// Consume pipeline events until the channel closes.
    pub async fn run(self, mut events: broadcast::Receiver<PipelineEvent>) {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::ProjectCreated { project_id }) => self.start(project_id),
                Ok(PipelineEvent::StageCompleted { project_id, .. }) => {
                    self.schedule_advance(project_id)
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Auto-advance driver lagged, {} event(s) dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn start(&self, project_id: String) {
        let controller = self.controller.clone();
        tokio::spawn(async move {
            let Some(project) = controller.project(&project_id) else {
                return;
            };
            if project.mode != Mode::Auto {
                return;
            }
            if let Err(e) = controller.run_stage(&project_id, None).await {
                warn!("Auto start for {} failed: {:#}", project_id, e);
            }
        });
    }

    fn schedule_advance(&self, project_id: String) {
        let controller = self.controller.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(project) = controller.project(&project_id) else {
                return;
            };
            if project.mode != Mode::Auto
                || project.step_state != StepState::Completed
                || project.status.is_terminal()
                || project.status.next().is_none()
            {
                return;
            }
            if let Err(e) = controller.advance(&project_id).await {
                warn!("Auto advance for {} failed: {:#}", project_id, e);
            }
        });
    }
}
