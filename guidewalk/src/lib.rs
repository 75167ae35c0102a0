//! Step orchestration and requirements engine for interactive guides
//!
//! A guide is a list of sections, each a list of steps. Every step is gated by
//! a requirements predicate, can be shown (highlighted) and done (clicked,
//! filled, navigated) against a live page, and is reconciled with what the
//! user does by hand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub mod action;
pub mod analytics;
pub mod checker;
pub mod config;
pub mod coordinator;
pub mod element;
pub mod environment;
pub mod errors;
pub mod executor;
pub mod locator;
pub mod observation;
pub mod persistence;
pub mod platforms;
pub mod requirements;
pub mod section;
pub mod selector;
pub mod signals;
pub mod step;
#[cfg(test)]
mod tests;

pub use action::{ActionDescriptor, ActionKind, DetectedActionType, ExecutionMode};
pub use analytics::{AnalyticsSink, InteractionEvent, NoopAnalytics, RecordingAnalytics, TracingAnalytics};
pub use checker::StepChecker;
pub use config::{EngineConfig, NavigationSelectors, RetryConfig, TimingConfig};
pub use coordinator::{ReactiveCheck, StepCoordinator, StepStateChange};
pub use element::{ElementSnapshot, PageElement};
pub use environment::{Environment, StaticEnvironment};
pub use errors::GuideError;
pub use executor::{ActionExecutor, RequirementFixer};
pub use locator::Locator;
pub use observation::{manual_change_source, ChangeInjector, ChangeSource, EnvironmentChange};
pub use persistence::{CompletionStore, JsonFileCompletionStore, MemoryCompletionStore};
pub use platforms::{MemoryPage, PageEngine, PageNode};
pub use requirements::{CheckContext, CheckResult, FixType, RequirementEvaluator, RequirementsResult};
pub use section::{SectionRunOutcome, SectionRunner};
pub use selector::Selector;
pub use signals::{Signal, SignalBus};
pub use step::{
    CompletionReason, Section, SectionId, SectionState, Step, StepId, StepKind, StepState,
    StepStatus, StepUpdate,
};

use observation::{MutationSource, UrlPoller};

struct MountedSection {
    content_key: String,
    steps: Vec<StepId>,
}

/// Builder for [`GuideEngine`].
#[derive(Default)]
pub struct GuideEngineBuilder {
    page: Option<Arc<dyn PageEngine>>,
    environment: Option<Arc<dyn Environment>>,
    config: EngineConfig,
    store: Option<Arc<dyn CompletionStore>>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
}

impl GuideEngineBuilder {
    pub fn page(mut self, page: Arc<dyn PageEngine>) -> Self {
        self.page = Some(page);
        self
    }

    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist completed steps. Without a store progress lives in memory only.
    pub fn store(mut self, store: Arc<dyn CompletionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn build(self) -> Result<GuideEngine, GuideError> {
        let page = self
            .page
            .ok_or_else(|| GuideError::InvalidArgument("a page engine is required".to_string()))?;
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(StaticEnvironment::default()));
        let analytics = self.analytics.unwrap_or_else(|| Arc::new(TracingAnalytics));
        let config = self.config;

        let coordinator = StepCoordinator::new(&config, self.store);
        let evaluator = Arc::new(
            RequirementEvaluator::new(page.clone(), environment.clone(), &config)
                .with_sections(Arc::new(coordinator.clone())),
        );
        let fixer = Arc::new(RequirementFixer::new(page.clone(), &config));
        let executor = Arc::new(ActionExecutor::new(page.clone(), analytics.clone(), &config));
        let runner = SectionRunner::new(
            coordinator.clone(),
            evaluator.clone(),
            fixer.clone(),
            executor.clone(),
            analytics.clone(),
            &config,
        );

        Ok(GuideEngine {
            page,
            environment,
            config,
            coordinator,
            evaluator,
            fixer,
            executor,
            analytics,
            runner,
            checkers: Mutex::new(HashMap::new()),
            sections: Mutex::new(HashMap::new()),
        })
    }
}

/// The main entry point: wires the page, environment and state together.
pub struct GuideEngine {
    page: Arc<dyn PageEngine>,
    environment: Arc<dyn Environment>,
    config: EngineConfig,
    coordinator: StepCoordinator,
    evaluator: Arc<RequirementEvaluator>,
    fixer: Arc<RequirementFixer>,
    executor: Arc<ActionExecutor>,
    analytics: Arc<dyn AnalyticsSink>,
    runner: SectionRunner,
    checkers: Mutex<HashMap<StepId, Arc<StepChecker>>>,
    sections: Mutex<HashMap<SectionId, MountedSection>>,
}

impl GuideEngine {
    pub fn builder() -> GuideEngineBuilder {
        GuideEngineBuilder::default()
    }

    /// Engine over `page` and `environment` with default config and no persistence.
    pub fn new(page: Arc<dyn PageEngine>, environment: Arc<dyn Environment>) -> Result<Self, GuideError> {
        Self::builder().page(page).environment(environment).build()
    }

    pub fn page(&self) -> &Arc<dyn PageEngine> {
        &self.page
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.environment
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &StepCoordinator {
        &self.coordinator
    }

    pub fn evaluator(&self) -> &Arc<RequirementEvaluator> {
        &self.evaluator
    }

    pub fn executor(&self) -> &Arc<ActionExecutor> {
        &self.executor
    }

    pub fn fixer(&self) -> &Arc<RequirementFixer> {
        &self.fixer
    }

    pub fn signals(&self) -> &SignalBus {
        self.coordinator.signals()
    }

    fn checkers(&self) -> MutexGuard<'_, HashMap<StepId, Arc<StepChecker>>> {
        self.checkers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mounted(&self) -> MutexGuard<'_, HashMap<SectionId, MountedSection>> {
        self.sections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a section, restore its persisted progress and attach a
    /// checker to every step.
    #[instrument(skip(self, section), fields(section_id = %section.id))]
    pub fn mount_section(&self, content_key: &str, section: &Section) -> Result<SectionState, GuideError> {
        for step in &section.steps {
            for action in step.actions() {
                action.validate().map_err(|e| {
                    GuideError::InvalidArgument(format!("step {}: {e}", step.id))
                })?;
            }
            for predicate in [step.requirements(), step.objectives(), step.verify()]
                .into_iter()
                .flatten()
            {
                let unknown = requirements::unknown_requirements(predicate);
                if !unknown.is_empty() {
                    warn!("Step {} uses unknown requirements {unknown:?}", step.id);
                }
            }
        }

        let state = self.coordinator.register_section(content_key, section);

        let mut checkers = self.checkers();
        for step in &section.steps {
            if let Some(previous) = checkers.remove(&step.id) {
                previous.detach();
            }
            let checker = StepChecker::new(
                step.clone(),
                Some(section.id.clone()),
                self.coordinator.clone(),
                self.evaluator.clone(),
                self.fixer.clone(),
                self.analytics.clone(),
                &self.config,
            );
            checker.attach();
            checkers.insert(step.id.clone(), checker);
        }
        drop(checkers);

        self.mounted().insert(
            section.id.clone(),
            MountedSection {
                content_key: content_key.to_string(),
                steps: section.step_ids(),
            },
        );
        info!(
            "Mounted section with {} step(s), resuming at {}",
            state.total_steps, state.resume_index
        );
        Ok(state)
    }

    pub fn checker(&self, step_id: &str) -> Option<Arc<StepChecker>> {
        self.checkers().get(step_id).cloned()
    }

    pub async fn check_step(&self, step_id: &str) -> Result<StepState, GuideError> {
        let checker = self
            .checker(step_id)
            .ok_or_else(|| GuideError::InvalidArgument(format!("unknown step: {step_id}")))?;
        checker.check().await
    }

    /// Check every step of a section in order.
    pub async fn check_section(&self, section_id: &str) -> Result<Vec<(StepId, StepState)>, GuideError> {
        let steps = self
            .mounted()
            .get(section_id)
            .map(|m| m.steps.clone())
            .ok_or_else(|| GuideError::InvalidArgument(format!("unknown section: {section_id}")))?;

        let mut states = Vec::with_capacity(steps.len());
        for step_id in steps {
            let state = self.check_step(&step_id).await?;
            states.push((step_id, state));
        }
        Ok(states)
    }

    /// Check every mounted step.
    #[instrument(skip(self))]
    pub async fn check_all(&self) -> Result<Vec<(StepId, StepState)>, GuideError> {
        let mut section_ids: Vec<SectionId> = self.mounted().keys().cloned().collect();
        section_ids.sort();

        let mut states = Vec::new();
        for section_id in section_ids {
            states.extend(self.check_section(&section_id).await?);
        }
        debug!("Checked {} step(s)", states.len());
        Ok(states)
    }

    /// Run a mounted section until it completes, halts, pauses or is cancelled.
    pub async fn run_section(
        &self,
        section: &Section,
        cancel: &CancellationToken,
    ) -> Result<SectionRunOutcome, GuideError> {
        self.runner.run(section, cancel).await
    }

    pub fn section_state(&self, section_id: &str) -> Option<SectionState> {
        self.coordinator.section_state(section_id)
    }

    pub fn step_state(&self, step_id: &str) -> Option<StepState> {
        self.coordinator.get_step(step_id)
    }

    /// Watch page mutations in navigation subtrees and the current path.
    pub fn start_observation(&self) -> bool {
        let sources: Vec<Box<dyn ChangeSource>> = vec![
            Box::new(MutationSource::new(
                self.page.as_ref(),
                &self.config.observed_subtree_keywords,
            )),
            Box::new(UrlPoller::new(
                self.page.clone(),
                self.config.timing.url_poll_interval(),
            )),
        ];
        self.coordinator.start_observation(sources)
    }

    /// Start observation with custom change sources.
    pub fn start_observation_with(&self, sources: Vec<Box<dyn ChangeSource>>) -> bool {
        self.coordinator.start_observation(sources)
    }

    pub fn stop_observation(&self) -> bool {
        self.coordinator.stop_observation()
    }

    /// Unmount every section mounted under `content_key`.
    pub fn teardown(&self, content_key: &str) -> usize {
        let removed: Vec<MountedSection> = {
            let mut mounted = self.mounted();
            let ids: Vec<SectionId> = mounted
                .iter()
                .filter(|(_, m)| m.content_key == content_key)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| mounted.remove(id)).collect()
        };

        let mut checkers = self.checkers();
        for step_id in removed.iter().flat_map(|m| m.steps.iter()) {
            if let Some(checker) = checkers.remove(step_id) {
                checker.detach();
            }
        }
        drop(checkers);

        self.coordinator.teardown(content_key)
    }
}

impl Drop for GuideEngine {
    fn drop(&mut self) {
        self.coordinator.stop_observation();
    }
}
