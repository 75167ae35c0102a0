//! Runs the steps of a section in order, show then do.

use crate::action::ExecutionMode;
use crate::analytics::{AnalyticsSink, InteractionEvent};
use crate::config::EngineConfig;
use crate::coordinator::StepCoordinator;
use crate::errors::GuideError;
use crate::executor::{ActionExecutor, RequirementFixer};
use crate::requirements::{explanation_for, CheckContext, RequirementEvaluator, RequirementsResult};
use crate::signals::Signal;
use crate::step::{CompletionReason, Section, Step, StepId, StepUpdate};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SectionRunOutcome {
    Completed {
        steps_completed: usize,
        steps_skipped: usize,
    },
    /// A step failed and could not be skipped. `step_id` is `None` when the
    /// section's own requirements failed.
    Halted {
        index: usize,
        step_id: Option<StepId>,
        reason: String,
    },
    /// Waiting for the user to perform a guided step.
    Paused { index: usize, step_id: StepId },
    Cancelled { index: usize },
}

enum StepProgress {
    Done,
    AwaitUser,
}

/// Text shown when a step fails. Requirement failures already carry a
/// user-facing explanation.
fn failure_reason(error: &GuideError) -> String {
    match error {
        GuideError::RequirementFailed(explanation) => explanation.clone(),
        other => other.to_string(),
    }
}

pub struct SectionRunner {
    coordinator: StepCoordinator,
    evaluator: Arc<RequirementEvaluator>,
    fixer: Arc<RequirementFixer>,
    executor: Arc<ActionExecutor>,
    analytics: Arc<dyn AnalyticsSink>,
    settle_delay: Duration,
    inter_step_delay: Duration,
    fix_settle: Duration,
}

impl SectionRunner {
    pub fn new(
        coordinator: StepCoordinator,
        evaluator: Arc<RequirementEvaluator>,
        fixer: Arc<RequirementFixer>,
        executor: Arc<ActionExecutor>,
        analytics: Arc<dyn AnalyticsSink>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            coordinator,
            evaluator,
            fixer,
            executor,
            analytics,
            settle_delay: config.timing.settle_delay(),
            inter_step_delay: config.timing.inter_step_delay(),
            fix_settle: config.timing.fix_settle(),
        }
    }

    /// Run a registered section from its first incomplete step.
    #[instrument(skip(self, section, cancel), fields(section_id = %section.id))]
    pub async fn run(
        &self,
        section: &Section,
        cancel: &CancellationToken,
    ) -> Result<SectionRunOutcome, GuideError> {
        let state = self.coordinator.section_state(&section.id).ok_or_else(|| {
            GuideError::InvalidArgument(format!("section {} is not mounted", section.id))
        })?;

        self.coordinator.set_section_running(&section.id, true);
        let outcome = self.run_from(section, state.resume_index, cancel).await;
        self.coordinator.set_section_running(&section.id, false);

        match &outcome {
            Ok(outcome) => info!(?outcome, "Section run finished"),
            Err(e) => warn!("Section run failed: {e}"),
        }
        outcome
    }

    async fn run_from(
        &self,
        section: &Section,
        start: usize,
        cancel: &CancellationToken,
    ) -> Result<SectionRunOutcome, GuideError> {
        if cancel.is_cancelled() {
            return Ok(SectionRunOutcome::Cancelled { index: start });
        }

        if let Some(objectives) = section.objectives() {
            if self.evaluate(objectives, &CheckContext::default()).await.pass {
                info!("Section objectives already met");
                let state = self
                    .coordinator
                    .complete_section(&section.id, CompletionReason::Objectives)?;
                self.report_section_completed(&section.id);
                return Ok(SectionRunOutcome::Completed {
                    steps_completed: state.completed_steps.len(),
                    steps_skipped: 0,
                });
            }
        }

        if let Some(requirements) = section.requirements() {
            let result = self.evaluate(requirements, &CheckContext::default()).await;
            if !result.pass {
                return Ok(SectionRunOutcome::Halted {
                    index: start,
                    step_id: None,
                    reason: explanation_for(None, &result),
                });
            }
        }

        let mut steps_completed = 0;
        let mut steps_skipped = 0;
        for (index, step) in section.steps.iter().enumerate().skip(start) {
            if cancel.is_cancelled() {
                return Ok(SectionRunOutcome::Cancelled { index });
            }
            if self
                .coordinator
                .get_step(&step.id)
                .is_some_and(|s| s.is_completed)
            {
                continue;
            }

            self.analytics.report(InteractionEvent::StepStarted {
                section_id: Some(section.id.clone()),
                step_id: step.id.clone(),
            });

            if let Some(objectives) = step.objectives() {
                if self.evaluate(objectives, &CheckContext::for_step(step)).await.pass {
                    debug!("Objectives already met for {}", step.id);
                    self.complete_step(step, CompletionReason::Objectives)?;
                    steps_completed += 1;
                    continue;
                }
            }

            match self.run_step(step, cancel).await {
                Ok(StepProgress::Done) => {
                    self.complete_step(step, CompletionReason::Manual)?;
                    steps_completed += 1;
                }
                Ok(StepProgress::AwaitUser) => {
                    self.coordinator.update_step(&step.id, StepUpdate::enabled())?;
                    info!("Waiting for the user to perform step {}", step.id);
                    return Ok(SectionRunOutcome::Paused {
                        index,
                        step_id: step.id.clone(),
                    });
                }
                Err(GuideError::Cancelled(during)) => {
                    debug!("Cancelled during {during}");
                    return Ok(SectionRunOutcome::Cancelled { index });
                }
                Err(e) if step.skippable => {
                    let reason = failure_reason(&e);
                    warn!("Skipping step {}: {reason}", step.id);
                    self.coordinator.update_step(&step.id, StepUpdate::skipped())?;
                    self.coordinator.signals().publish(Signal::StepAutoSkipped {
                        step_id: step.id.clone(),
                        reason: reason.clone(),
                    });
                    self.analytics.report(InteractionEvent::StepSkipped {
                        step_id: step.id.clone(),
                        reason,
                    });
                    steps_skipped += 1;
                }
                Err(e) => {
                    let reason = failure_reason(&e);
                    warn!("Step {} failed: {reason}", step.id);
                    self.coordinator.update_step(
                        &step.id,
                        StepUpdate::new()
                            .explanation(reason.clone())
                            .error(Some(reason.clone())),
                    )?;
                    return Ok(SectionRunOutcome::Halted {
                        index,
                        step_id: Some(step.id.clone()),
                        reason,
                    });
                }
            }

            if index + 1 < section.steps.len() && !self.pause(self.inter_step_delay, cancel).await {
                return Ok(SectionRunOutcome::Cancelled { index: index + 1 });
            }
        }

        self.coordinator
            .complete_section(&section.id, CompletionReason::Manual)?;
        self.report_section_completed(&section.id);
        Ok(SectionRunOutcome::Completed {
            steps_completed,
            steps_skipped,
        })
    }

    async fn run_step(
        &self,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<StepProgress, GuideError> {
        let context = CheckContext::for_step(step);
        let cancelled = || GuideError::Cancelled(format!("step {}", step.id));

        if let Some(requirements) = step.requirements() {
            let mut result = self.evaluate(requirements, &context).await;
            if !result.pass {
                if let Some(failure) = result.fixable_failure().cloned() {
                    let fixed = self.fixer.fix(&failure).await;
                    self.analytics.report(InteractionEvent::FixAttempted {
                        step_id: step.id.clone(),
                        fix_type: failure.fix_type,
                        success: fixed.is_ok(),
                    });
                    match fixed {
                        Ok(()) => {
                            if !self.pause(self.fix_settle, cancel).await {
                                return Err(cancelled());
                            }
                            result = self.evaluate(requirements, &context).await;
                        }
                        Err(e) => debug!("Automatic fix failed: {e}"),
                    }
                }
            }
            if !result.pass {
                return Err(GuideError::RequirementFailed(explanation_for(
                    step.hint(),
                    &result,
                )));
            }
        }

        if step.is_guided() {
            return Ok(StepProgress::AwaitUser);
        }

        for action in step.actions() {
            if step.show_enabled {
                self.executor.execute(action, ExecutionMode::Show).await?;
                if !self.pause(self.settle_delay, cancel).await {
                    return Err(cancelled());
                }
            }
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            self.executor.execute(action, ExecutionMode::Do).await?;
        }

        // a cancel that lands after `do` still leaves the step unresolved
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        if let Some(verify) = step.verify() {
            let result = self.evaluate(verify, &context).await;
            if !result.pass {
                return Err(GuideError::RequirementFailed(format!(
                    "Verification failed: {}",
                    explanation_for(None, &result)
                )));
            }
        }
        Ok(StepProgress::Done)
    }

    async fn evaluate(&self, requirements: &str, context: &CheckContext) -> RequirementsResult {
        self.evaluator.evaluate(requirements, context).await
    }

    fn complete_step(&self, step: &Step, reason: CompletionReason) -> Result<(), GuideError> {
        let state = self.coordinator.update_step(&step.id, StepUpdate::completed(reason))?;
        self.analytics.report(InteractionEvent::StepCompleted {
            step_id: step.id.clone(),
            reason: state.completion_reason,
        });
        Ok(())
    }

    fn report_section_completed(&self, section_id: &str) {
        self.analytics.report(InteractionEvent::SectionCompleted {
            section_id: section_id.to_string(),
        });
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
