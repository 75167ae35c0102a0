use crate::analytics::{AnalyticsSink, InteractionEvent};
use crate::config::{EngineConfig, RetryConfig};
use crate::coordinator::{ReactiveCheck, StepCoordinator, BLOCKED_EXPLANATION};
use crate::errors::GuideError;
use crate::executor::RequirementFixer;
use crate::requirements::{explanation_for, CheckContext, RequirementEvaluator, RequirementsResult};
use crate::signals::Signal;
use crate::step::{CompletionReason, SectionId, Step, StepState, StepUpdate};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Per-step controller deciding whether a step is completed, blocked or enabled.
pub struct StepChecker {
    step: Step,
    section_id: Option<SectionId>,
    coordinator: StepCoordinator,
    evaluator: Arc<RequirementEvaluator>,
    fixer: Arc<RequirementFixer>,
    analytics: Arc<dyn AnalyticsSink>,
    retry: RetryConfig,
    fix_settle: Duration,
    // serializes this step's own checks
    guard: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StepChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepChecker")
            .field("step", &self.step.id)
            .field("section", &self.section_id)
            .finish()
    }
}

impl StepChecker {
    pub fn new(
        step: Step,
        section_id: Option<SectionId>,
        coordinator: StepCoordinator,
        evaluator: Arc<RequirementEvaluator>,
        fixer: Arc<RequirementFixer>,
        analytics: Arc<dyn AnalyticsSink>,
        config: &EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            step,
            section_id,
            coordinator,
            evaluator,
            fixer,
            analytics,
            retry: config.retry.clone(),
            fix_settle: config.timing.fix_settle(),
            guard: tokio::sync::Mutex::new(()),
            listener: Mutex::new(None),
        })
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    /// Register with the coordinator for reactive re-checks and listen for
    /// auto-skip signals addressed to this step.
    pub fn attach(self: &Arc<Self>) {
        let weak: Weak<StepChecker> = Arc::downgrade(self);
        let reactive: Weak<dyn ReactiveCheck> = weak.clone();
        self.coordinator.register_checker(&self.step.id, reactive);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, auto-skip listener not started for {}", self.step.id);
            return;
        };
        let mut signals = self.coordinator.signals().subscribe();
        let step_id = self.step.id.clone();
        let task = handle.spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(Signal::StepAutoSkipped { step_id: skipped, reason }) if skipped == step_id => {
                        let Some(checker) = weak.upgrade() else {
                            break;
                        };
                        if let Err(e) = checker.mark_skipped(&reason) {
                            warn!("Failed to auto-skip step {step_id}: {e}");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        debug!("Auto-skip listener for {step_id} missed {missed} signals");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn detach(&self) {
        self.coordinator.unregister_checker(&self.step.id);
        if let Some(task) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    pub fn state(&self) -> Result<StepState, GuideError> {
        self.coordinator
            .get_step(&self.step.id)
            .ok_or_else(|| GuideError::Internal(format!("step {} is not registered", self.step.id)))
    }

    fn context(&self) -> CheckContext {
        CheckContext::for_step(&self.step)
    }

    fn update(&self, update: StepUpdate) -> Result<StepState, GuideError> {
        self.coordinator.update_step(&self.step.id, update)
    }

    /// Run the full check: objectives, eligibility, then requirements with retries.
    #[instrument(skip(self), fields(step_id = %self.step.id))]
    pub async fn check(&self) -> Result<StepState, GuideError> {
        let _guard = self.guard.lock().await;
        self.check_locked(self.retry.max_retries).await
    }

    async fn check_locked(&self, max_retries: u32) -> Result<StepState, GuideError> {
        let current = self.state()?;
        if current.is_completed {
            return Ok(current);
        }
        self.update(StepUpdate::checking(true))?;

        if let Some(objectives) = self.step.objectives() {
            let result = self.evaluator.evaluate(objectives, &self.context()).await;
            if result.pass {
                info!("Objectives already met for step {}", self.step.id);
                let state = self.update(StepUpdate::completed(CompletionReason::Objectives))?;
                self.analytics.report(InteractionEvent::StepCompleted {
                    step_id: self.step.id.clone(),
                    reason: CompletionReason::Objectives,
                });
                return Ok(state);
            }
        }

        if !self.coordinator.is_eligible(&self.step.id) {
            return self.update(StepUpdate::blocked(BLOCKED_EXPLANATION));
        }

        let Some(requirements) = self.step.requirements() else {
            return self.update(StepUpdate::enabled());
        };

        let mut attempt = 0;
        loop {
            let result = self.evaluator.evaluate(requirements, &self.context()).await;
            if result.pass {
                return self.update(StepUpdate::enabled());
            }
            if attempt >= max_retries {
                return self.record_failure(&result, attempt);
            }

            attempt += 1;
            debug!(
                "Requirements for {} not met, retry {attempt}/{max_retries}",
                self.step.id
            );
            self.update(StepUpdate::retrying(attempt, max_retries))?;
            tokio::time::sleep(self.retry.retry_delay()).await;

            // the user may have completed the step while we waited
            let current = self.state()?;
            if current.is_completed {
                return Ok(current);
            }
        }
    }

    fn record_failure(&self, result: &RequirementsResult, attempts: u32) -> Result<StepState, GuideError> {
        let explanation = explanation_for(self.step.hint(), result);
        let error = result.first_failure().and_then(|f| f.error.clone());
        let fixable = result.fixable_failure();
        debug!("Step {} blocked: {explanation}", self.step.id);

        let update = StepUpdate {
            is_enabled: Some(false),
            is_checking: Some(false),
            is_retrying: Some(false),
            ..StepUpdate::new()
        }
        .explanation(explanation)
        .error(error)
        .fix(
            fixable.and_then(|f| f.fix_type),
            fixable.and_then(|f| f.target_href.clone()),
        )
        .can_skip(self.step.skippable)
        .retry_count(attempts);
        self.update(update)
    }

    /// Apply the automatic fix for the first fixable failure, then re-check once.
    #[instrument(skip(self), fields(step_id = %self.step.id))]
    pub async fn fix_requirement(&self) -> Result<StepState, GuideError> {
        let _guard = self.guard.lock().await;
        let requirements = self.step.requirements().ok_or_else(|| {
            GuideError::FixFailed(format!("step {} has no requirements", self.step.id))
        })?;

        let result = self.evaluator.evaluate(requirements, &self.context()).await;
        if result.pass {
            return self.check_locked(0).await;
        }
        let failure = result.fixable_failure().cloned().ok_or_else(|| {
            GuideError::FixFailed(format!(
                "no automatic fix for step {}: {}",
                self.step.id,
                explanation_for(None, &result)
            ))
        })?;

        let outcome = self.fixer.fix(&failure).await;
        self.analytics.report(InteractionEvent::FixAttempted {
            step_id: self.step.id.clone(),
            fix_type: failure.fix_type,
            success: outcome.is_ok(),
        });
        outcome?;

        tokio::time::sleep(self.fix_settle).await;
        self.check_locked(0).await
    }

    /// Try the automatic fix when one is offered, otherwise skip if allowed.
    pub async fn auto_fix_or_skip(&self) -> Result<StepState, GuideError> {
        let state = self.state()?;
        if state.is_completed || state.is_enabled {
            return Ok(state);
        }

        if state.can_fix_requirement {
            match self.fix_requirement().await {
                Ok(state) if state.is_enabled || state.is_completed => return Ok(state),
                Ok(_) => debug!("Fix for {} did not unblock the step", self.step.id),
                Err(e) => warn!("Automatic fix for {} failed: {e}", self.step.id),
            }
        }

        if self.step.skippable {
            self.mark_skipped("requirements not met")
        } else {
            self.state()
        }
    }

    pub fn mark_completed(&self) -> Result<StepState, GuideError> {
        let before = self.state()?;
        let state = self.update(StepUpdate::completed(CompletionReason::Manual))?;
        if !before.is_completed {
            self.analytics.report(InteractionEvent::StepCompleted {
                step_id: self.step.id.clone(),
                reason: state.completion_reason,
            });
        }
        Ok(state)
    }

    /// Skip the step. Terminal, and unlocks the steps after it.
    pub fn mark_skipped(&self, reason: &str) -> Result<StepState, GuideError> {
        let before = self.state()?;
        if before.is_completed {
            return Ok(before);
        }
        if !self.coordinator.is_eligible(&self.step.id) {
            return Err(GuideError::InvalidArgument(format!(
                "step {} cannot be skipped before earlier steps complete",
                self.step.id
            )));
        }
        info!("Skipping step {}: {reason}", self.step.id);
        let state = self.update(StepUpdate::skipped())?;
        self.analytics.report(InteractionEvent::StepSkipped {
            step_id: self.step.id.clone(),
            reason: reason.to_string(),
        });
        Ok(state)
    }

    /// Return to the initial state and check again.
    pub async fn reset(&self) -> Result<StepState, GuideError> {
        self.coordinator.reset_step(&self.step.id)?;
        self.check().await
    }
}

#[async_trait]
impl ReactiveCheck for StepChecker {
    async fn recheck(&self) {
        let Ok(_guard) = self.guard.try_lock() else {
            return;
        };
        if let Err(e) = self.check_locked(self.retry.max_retries).await {
            debug!("Reactive check for {} failed: {e}", self.step.id);
        }
    }
}

impl Drop for StepChecker {
    fn drop(&mut self) {
        if let Some(task) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionDescriptor;
    use crate::analytics::RecordingAnalytics;
    use crate::environment::StaticEnvironment;
    use crate::platforms::{MemoryPage, PageEngine, PageNode};
    use crate::requirements::FixType;
    use crate::step::Section;

    struct Harness {
        page: MemoryPage,
        environment: Arc<StaticEnvironment>,
        coordinator: StepCoordinator,
        analytics: Arc<RecordingAnalytics>,
        config: EngineConfig,
    }

    impl Harness {
        fn new(page: MemoryPage) -> Self {
            Self {
                page,
                environment: Arc::new(StaticEnvironment::default()),
                coordinator: StepCoordinator::new(&EngineConfig::fast(), None),
                analytics: Arc::new(RecordingAnalytics::default()),
                config: EngineConfig::fast(),
            }
        }

        fn checker(&self, section: &Section, id: &str) -> Arc<StepChecker> {
            self.coordinator.register_section("guide", section);
            let page: Arc<dyn PageEngine> = Arc::new(self.page.clone());
            let evaluator = RequirementEvaluator::new(page.clone(), self.environment.clone(), &self.config)
                .with_sections(Arc::new(self.coordinator.clone()));
            StepChecker::new(
                section.step(id).cloned().unwrap(),
                Some(section.id.clone()),
                self.coordinator.clone(),
                Arc::new(evaluator),
                Arc::new(RequirementFixer::new(page, &self.config)),
                self.analytics.clone(),
                &self.config,
            )
        }
    }

    fn nav_page() -> MemoryPage {
        let page = MemoryPage::from_nodes([
            PageNode::new("button")
                .test_id("data-testid Toggle menu")
                .text("Menu"),
            PageNode::new("a").attr("href", "/dashboards").text("Dashboards"),
        ]);
        page.on_click("button", |page, _| {
            let root = page.root();
            let _ = page.append_child(
                &root,
                PageNode::new("nav").test_id("data-testid navigation mega-menu"),
            );
        });
        page
    }

    #[tokio::test]
    async fn objectives_complete_the_step() {
        let harness = Harness::new(MemoryPage::from_nodes([]).with_path("/dashboards"));
        let section = Section::new(
            "s",
            vec![Step::simple("a", ActionDescriptor::navigate("/dashboards"))
                .with_objectives("on-page:/dashboards")],
        );
        let checker = harness.checker(&section, "a");
        let state = checker.check().await.unwrap();
        assert!(state.is_completed);
        assert_eq!(state.completion_reason, CompletionReason::Objectives);
    }

    #[tokio::test]
    async fn ineligible_steps_are_blocked() {
        let harness = Harness::new(MemoryPage::from_nodes([]));
        let section = Section::new(
            "s",
            vec![
                Step::simple("a", ActionDescriptor::button("One")),
                Step::simple("b", ActionDescriptor::button("Two")),
            ],
        );
        let checker = harness.checker(&section, "b");
        let state = checker.check().await.unwrap();
        assert!(!state.is_enabled);
        assert!(!state.can_skip);
        assert_eq!(state.explanation.as_deref(), Some(BLOCKED_EXPLANATION));
    }

    #[tokio::test]
    async fn failed_requirements_surface_explanation_and_fix() {
        let harness = Harness::new(nav_page());
        let section = Section::new(
            "s",
            vec![Step::simple("a", ActionDescriptor::button("Dashboards"))
                .with_requirements("navmenu-open")
                .skippable(true)],
        );
        let checker = harness.checker(&section, "a");
        let state = checker.check().await.unwrap();
        assert!(!state.is_enabled);
        assert!(!state.is_checking);
        assert!(state.can_fix_requirement);
        assert!(state.can_skip);
        assert_eq!(state.fix_type, Some(FixType::Navigation));
        assert_eq!(state.retry_count, 1);
        assert!(state.explanation.is_some());

        let state = checker.fix_requirement().await.unwrap();
        assert!(state.is_enabled, "{state:?}");
        assert!(harness
            .analytics
            .events()
            .iter()
            .any(|e| matches!(e, InteractionEvent::FixAttempted { success: true, .. })));
    }

    #[tokio::test]
    async fn auto_fix_or_skip_skips_when_no_fix_exists() {
        let harness = Harness::new(MemoryPage::from_nodes([]));
        let section = Section::new(
            "s",
            vec![
                Step::simple("a", ActionDescriptor::button("One"))
                    .with_requirements("has-datasources")
                    .skippable(true),
                Step::simple("b", ActionDescriptor::button("Two")),
            ],
        );
        let checker = harness.checker(&section, "a");
        checker.check().await.unwrap();
        let state = checker.auto_fix_or_skip().await.unwrap();
        assert!(state.is_skipped);
        assert_eq!(state.completion_reason, CompletionReason::Skipped);
        assert!(harness.coordinator.is_eligible("b"));
    }

    #[tokio::test]
    async fn auto_skip_signal_marks_step_skipped() {
        let harness = Harness::new(MemoryPage::from_nodes([]));
        let section = Section::new("s", vec![Step::simple("a", ActionDescriptor::button("One"))]);
        let checker = harness.checker(&section, "a");
        checker.attach();
        let mut changes = harness.coordinator.subscribe();

        harness.coordinator.signals().publish(Signal::StepAutoSkipped {
            step_id: "a".into(),
            reason: "not applicable".into(),
        });
        let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(change.state.is_skipped);
        checker.detach();
    }
}
