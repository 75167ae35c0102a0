//! Shared step/section state.
//!
//! The coordinator is the single source of truth for step state. Every
//! change goes through [`StepCoordinator::update_step`] (or the explicit
//! reset/complete operations), which enforce:
//!
//! - a completed step is never enabled,
//! - completion by objectives is permanent,
//! - in a sequential section a step is enabled only once every earlier
//!   sibling is completed.

use crate::config::EngineConfig;
use crate::errors::GuideError;
use crate::observation::ChangeSource;
use crate::persistence::CompletionStore;
use crate::requirements::SectionCompletionSource;
use crate::signals::{Signal, SignalBus};
use crate::step::{
    CompletionReason, Section, SectionId, SectionState, StepId, StepState, StepUpdate,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const BLOCKED_EXPLANATION: &str = "Complete previous steps first";

/// Re-check hook registered by each step's checker.
#[async_trait]
pub trait ReactiveCheck: Send + Sync {
    async fn recheck(&self);
}

/// Broadcast whenever a step's state changes.
#[derive(Debug, Clone, PartialEq)]
pub struct StepStateChange {
    pub step_id: StepId,
    pub section_id: Option<SectionId>,
    pub state: StepState,
}

#[derive(Debug)]
struct SectionRecord {
    content_key: String,
    steps: Vec<StepId>,
    sequential: bool,
    completed: bool,
    running: bool,
}

#[derive(Debug)]
struct StepEntry {
    state: StepState,
    section_id: Option<SectionId>,
}

#[derive(Default)]
struct Registry {
    steps: HashMap<StepId, StepEntry>,
    sections: HashMap<SectionId, SectionRecord>,
    checkers: HashMap<StepId, Weak<dyn ReactiveCheck>>,
}

impl Registry {
    fn is_completed(&self, step_id: &str) -> bool {
        self.steps
            .get(step_id)
            .is_some_and(|e| e.state.is_completed)
    }

    fn is_eligible(&self, step_id: &str) -> bool {
        let Some(entry) = self.steps.get(step_id) else {
            return false;
        };
        let Some(section) = entry
            .section_id
            .as_ref()
            .and_then(|id| self.sections.get(id))
        else {
            return true;
        };
        if !section.sequential {
            return true;
        }
        section
            .steps
            .iter()
            .take_while(|id| id.as_str() != step_id)
            .all(|id| self.is_completed(id))
    }

    fn completed_steps(&self, section_id: &str) -> BTreeSet<StepId> {
        self.sections
            .get(section_id)
            .map(|record| {
                record
                    .steps
                    .iter()
                    .filter(|id| self.is_completed(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn section_state(&self, section_id: &str) -> Option<SectionState> {
        let record = self.sections.get(section_id)?;
        Some(SectionState {
            section_id: section_id.to_string(),
            completed_steps: self.completed_steps(section_id),
            total_steps: record.steps.len(),
            resume_index: record
                .steps
                .iter()
                .position(|id| !self.is_completed(id))
                .unwrap_or(record.steps.len()),
            is_completed: record.completed,
            is_running: record.running,
        })
    }
}

/// Coalesces re-check requests into one pass per window.
#[derive(Debug)]
struct ReactiveScheduler {
    dirty: AtomicBool,
    draining: AtomicBool,
    window: Duration,
    passes: AtomicU64,
}

struct Observation {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    registry: Mutex<Registry>,
    changes: broadcast::Sender<StepStateChange>,
    signals: SignalBus,
    store: Option<Arc<dyn CompletionStore>>,
    scheduler: ReactiveScheduler,
    observation: Mutex<Option<Observation>>,
    max_retries: u32,
}

/// Explicitly constructed, cheaply cloneable coordinator handle.
#[derive(Clone)]
pub struct StepCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StepCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("StepCoordinator")
            .field("steps", &registry.steps.len())
            .field("sections", &registry.sections.len())
            .field("checkers", &registry.checkers.len())
            .finish()
    }
}

impl StepCoordinator {
    pub fn new(config: &EngineConfig, store: Option<Arc<dyn CompletionStore>>) -> Self {
        let (changes, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                changes,
                signals: SignalBus::new(config.channel_capacity),
                store,
                scheduler: ReactiveScheduler {
                    dirty: AtomicBool::new(false),
                    draining: AtomicBool::new(false),
                    window: config.timing.reactive_check_window(),
                    passes: AtomicU64::new(0),
                },
                observation: Mutex::new(None),
                max_retries: config.retry.max_retries,
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn signals(&self) -> &SignalBus {
        &self.inner.signals
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StepStateChange> {
        self.inner.changes.subscribe()
    }

    fn initial_state(&self) -> StepState {
        StepState {
            max_retries: self.inner.max_retries,
            ..StepState::default()
        }
    }

    /// Register a section and its steps, restoring persisted completions.
    pub fn register_section(&self, content_key: &str, section: &Section) -> SectionState {
        let ids = section.step_ids();
        let restored: BTreeSet<StepId> = match &self.inner.store {
            Some(store) => match store.get_completed(content_key, &section.id) {
                Ok(saved) => saved.into_iter().filter(|id| ids.contains(id)).collect(),
                Err(e) => {
                    warn!("Failed to restore progress for section {}: {e}", section.id);
                    BTreeSet::new()
                }
            },
            None => BTreeSet::new(),
        };

        let mut registry = self.registry();
        for id in &ids {
            let initial = self.initial_state();
            let entry = registry.steps.entry(id.clone()).or_insert_with(|| StepEntry {
                state: initial,
                section_id: None,
            });
            entry.section_id = Some(section.id.clone());
            if restored.contains(id) && !entry.state.is_completed {
                StepUpdate::completed(CompletionReason::Manual).apply(&mut entry.state);
            }
        }
        let completed = ids.iter().all(|id| registry.is_completed(id));
        registry.sections.insert(
            section.id.clone(),
            SectionRecord {
                content_key: content_key.to_string(),
                steps: ids,
                sequential: section.sequential,
                completed,
                running: false,
            },
        );

        if !restored.is_empty() {
            info!(
                "Restored {} completed step(s) for section {}",
                restored.len(),
                section.id
            );
        }
        registry
            .section_state(&section.id)
            .unwrap_or_default()
    }

    /// Register a step outside of any section.
    pub fn register_step(&self, step_id: &str) {
        let initial = self.initial_state();
        self.registry()
            .steps
            .entry(step_id.to_string())
            .or_insert_with(|| StepEntry {
                state: initial,
                section_id: None,
            });
    }

    pub fn register_checker(&self, step_id: &str, checker: Weak<dyn ReactiveCheck>) {
        self.registry().checkers.insert(step_id.to_string(), checker);
    }

    pub fn unregister_checker(&self, step_id: &str) {
        self.registry().checkers.remove(step_id);
    }

    pub fn get_step(&self, step_id: &str) -> Option<StepState> {
        self.registry().steps.get(step_id).map(|e| e.state.clone())
    }

    pub fn is_eligible(&self, step_id: &str) -> bool {
        self.registry().is_eligible(step_id)
    }

    pub fn section_state(&self, section_id: &str) -> Option<SectionState> {
        self.registry().section_state(section_id)
    }

    pub fn set_section_running(&self, section_id: &str, running: bool) {
        if let Some(record) = self.registry().sections.get_mut(section_id) {
            record.running = running;
        }
    }

    /// Apply `update` to a step, enforcing the state invariants.
    pub fn update_step(&self, step_id: &str, update: StepUpdate) -> Result<StepState, GuideError> {
        let (next, section_id, newly_completed) = {
            let mut registry = self.registry();
            let eligible = registry.is_eligible(step_id);
            let entry = registry
                .steps
                .get_mut(step_id)
                .ok_or_else(|| GuideError::InvalidArgument(format!("unknown step: {step_id}")))?;

            let before = entry.state.clone();
            let mut next = before.clone();
            update.apply(&mut next);

            if before.is_completed {
                if !next.is_completed {
                    warn!("Ignoring attempt to un-complete step {step_id} without reset");
                }
                next.is_completed = true;
                next.is_skipped = before.is_skipped;
                next.completion_reason = match next.completion_reason {
                    CompletionReason::Objectives => CompletionReason::Objectives,
                    _ => before.completion_reason,
                };
            }
            if before.completion_reason == CompletionReason::Objectives {
                next.completion_reason = CompletionReason::Objectives;
                next.is_skipped = false;
            }

            if next.is_completed {
                next.is_enabled = false;
                next.is_checking = false;
                next.is_retrying = false;
                if next.completion_reason == CompletionReason::None {
                    next.completion_reason = CompletionReason::Manual;
                }
            } else {
                next.completion_reason = CompletionReason::None;
                next.is_skipped = false;
                if next.is_enabled && !eligible {
                    debug!("Step {step_id} is not eligible yet, keeping it disabled");
                    next.is_enabled = false;
                    next.explanation = Some(BLOCKED_EXPLANATION.to_string());
                }
            }

            entry.state = next.clone();
            let newly_completed = !before.is_completed && next.is_completed;
            (next, entry.section_id.clone(), newly_completed)
        };

        let _ = self.inner.changes.send(StepStateChange {
            step_id: step_id.to_string(),
            section_id: section_id.clone(),
            state: next.clone(),
        });

        if newly_completed {
            debug!(
                "Step {step_id} completed ({:?})",
                next.completion_reason
            );
            self.after_completion(section_id.as_deref());
        }
        Ok(next)
    }

    fn after_completion(&self, section_id: Option<&str>) {
        if let Some(section_id) = section_id {
            let outcome = {
                let mut registry = self.registry();
                let completed = registry.completed_steps(section_id);
                registry.sections.get_mut(section_id).map(|record| {
                    let all_done = completed.len() == record.steps.len();
                    let newly = all_done && !record.completed;
                    if all_done {
                        record.completed = true;
                    }
                    (record.content_key.clone(), completed, newly)
                })
            };

            if let Some((content_key, completed, newly)) = outcome {
                self.persist(&content_key, section_id, &completed);
                if newly {
                    info!("Section {section_id} completed");
                    self.inner.signals.publish(Signal::SectionCompleted {
                        section_id: section_id.to_string(),
                    });
                }
            }
        }
        self.trigger_reactive_check();
    }

    fn persist(&self, content_key: &str, section_id: &str, completed: &BTreeSet<StepId>) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.set_completed(content_key, section_id, completed) {
                warn!("Failed to persist progress for section {section_id}: {e}");
            }
        }
    }

    /// Mark every incomplete step of a section completed in one pass.
    pub fn complete_section(
        &self,
        section_id: &str,
        reason: CompletionReason,
    ) -> Result<SectionState, GuideError> {
        let (changes, content_key, completed, newly, state) = {
            let mut registry = self.registry();
            let step_ids = registry
                .sections
                .get(section_id)
                .map(|r| r.steps.clone())
                .ok_or_else(|| {
                    GuideError::InvalidArgument(format!("unknown section: {section_id}"))
                })?;

            let mut changes = Vec::new();
            for id in &step_ids {
                if let Some(entry) = registry.steps.get_mut(id) {
                    if !entry.state.is_completed {
                        StepUpdate::completed(reason).apply(&mut entry.state);
                        changes.push(StepStateChange {
                            step_id: id.clone(),
                            section_id: Some(section_id.to_string()),
                            state: entry.state.clone(),
                        });
                    }
                }
            }

            let completed = registry.completed_steps(section_id);
            let (content_key, newly) = match registry.sections.get_mut(section_id) {
                Some(record) => {
                    let newly = !record.completed;
                    record.completed = true;
                    (record.content_key.clone(), newly)
                }
                None => (String::new(), false),
            };
            let state = registry.section_state(section_id).unwrap_or_default();
            (changes, content_key, completed, newly, state)
        };

        for change in changes {
            let _ = self.inner.changes.send(change);
        }
        self.persist(&content_key, section_id, &completed);
        if newly {
            info!("Section {section_id} completed ({reason:?})");
            self.inner.signals.publish(Signal::SectionCompleted {
                section_id: section_id.to_string(),
            });
        }
        self.trigger_reactive_check();
        Ok(state)
    }

    /// Return a step to its initial state, blocking later steps that depended on it.
    pub fn reset_step(&self, step_id: &str) -> Result<StepState, GuideError> {
        let (changes, persist) = {
            let mut registry = self.registry();
            let initial = self.initial_state();
            let entry = registry
                .steps
                .get_mut(step_id)
                .ok_or_else(|| GuideError::InvalidArgument(format!("unknown step: {step_id}")))?;
            entry.state = initial;
            let section_id = entry.section_id.clone();

            let mut changes = vec![StepStateChange {
                step_id: step_id.to_string(),
                section_id: section_id.clone(),
                state: entry.state.clone(),
            }];

            let mut persist = None;
            if let Some(section_id) = section_id {
                let completed = registry.completed_steps(&section_id);
                let blocked: Vec<StepId> = match registry.sections.get_mut(&section_id) {
                    Some(record) => {
                        record.completed = false;
                        persist = Some((record.content_key.clone(), section_id.clone(), completed));
                        if record.sequential {
                            record
                                .steps
                                .iter()
                                .skip_while(|id| id.as_str() != step_id)
                                .skip(1)
                                .cloned()
                                .collect()
                        } else {
                            Vec::new()
                        }
                    }
                    None => Vec::new(),
                };
                for id in blocked {
                    if let Some(later) = registry.steps.get_mut(&id) {
                        if !later.state.is_completed && later.state.is_enabled {
                            StepUpdate::blocked(BLOCKED_EXPLANATION).apply(&mut later.state);
                            changes.push(StepStateChange {
                                step_id: id.clone(),
                                section_id: Some(section_id.clone()),
                                state: later.state.clone(),
                            });
                        }
                    }
                }
            }
            (changes, persist)
        };

        let state = changes[0].state.clone();
        for change in changes {
            let _ = self.inner.changes.send(change);
        }
        if let Some((content_key, section_id, completed)) = persist {
            self.persist(&content_key, &section_id, &completed);
        }
        self.trigger_reactive_check();
        Ok(state)
    }

    /// Reset every step of a section and forget its persisted progress.
    pub fn reset_section(&self, section_id: &str) -> Result<SectionState, GuideError> {
        let (changes, content_key, state) = {
            let mut registry = self.registry();
            let initial = self.initial_state();
            let record = registry.sections.get_mut(section_id).ok_or_else(|| {
                GuideError::InvalidArgument(format!("unknown section: {section_id}"))
            })?;
            record.completed = false;
            record.running = false;
            let content_key = record.content_key.clone();
            let step_ids = record.steps.clone();

            let mut changes = Vec::new();
            for id in step_ids {
                if let Some(entry) = registry.steps.get_mut(&id) {
                    entry.state = initial.clone();
                    changes.push(StepStateChange {
                        step_id: id,
                        section_id: Some(section_id.to_string()),
                        state: entry.state.clone(),
                    });
                }
            }
            let state = registry.section_state(section_id).unwrap_or_default();
            (changes, content_key, state)
        };

        for change in changes {
            let _ = self.inner.changes.send(change);
        }
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.clear(&content_key, section_id) {
                warn!("Failed to clear progress for section {section_id}: {e}");
            }
        }
        self.trigger_reactive_check();
        Ok(state)
    }

    /// Forget all sections (and their steps and checkers) mounted under `content_key`.
    pub fn teardown(&self, content_key: &str) -> usize {
        let mut registry = self.registry();
        let sections: Vec<SectionId> = registry
            .sections
            .iter()
            .filter(|(_, r)| r.content_key == content_key)
            .map(|(id, _)| id.clone())
            .collect();
        for section_id in &sections {
            if let Some(record) = registry.sections.remove(section_id) {
                for step_id in record.steps {
                    registry.steps.remove(&step_id);
                    registry.checkers.remove(&step_id);
                }
            }
        }
        debug!("Tore down {} section(s) for {content_key}", sections.len());
        sections.len()
    }

    /// Request a re-check of every step that is neither completed nor checking.
    ///
    /// Requests arriving while a pass is pending coalesce into that pass.
    pub fn trigger_reactive_check(&self) {
        let scheduler = &self.inner.scheduler;
        scheduler.dirty.store(true, Ordering::SeqCst);
        if scheduler
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let coordinator = self.clone();
                handle.spawn(async move { coordinator.drain_reactive_checks().await });
            }
            Err(_) => {
                scheduler.draining.store(false, Ordering::SeqCst);
                debug!("No async runtime, reactive check skipped");
            }
        }
    }

    /// Number of reactive passes run so far.
    pub fn reactive_passes(&self) -> u64 {
        self.inner.scheduler.passes.load(Ordering::SeqCst)
    }

    async fn drain_reactive_checks(&self) {
        let scheduler = &self.inner.scheduler;
        loop {
            tokio::time::sleep(scheduler.window).await;
            if scheduler.dirty.swap(false, Ordering::SeqCst) {
                self.run_reactive_pass().await;
                continue;
            }
            scheduler.draining.store(false, Ordering::SeqCst);
            // a request may have landed between the swap and the store
            if scheduler.dirty.load(Ordering::SeqCst)
                && scheduler
                    .draining
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                continue;
            }
            break;
        }
    }

    async fn run_reactive_pass(&self) {
        let targets: Vec<Arc<dyn ReactiveCheck>> = {
            let mut registry = self.registry();
            registry.checkers.retain(|_, checker| checker.strong_count() > 0);
            registry
                .checkers
                .iter()
                .filter(|(id, _)| {
                    registry
                        .steps
                        .get(id.as_str())
                        .map_or(true, |e| !e.state.is_completed && !e.state.is_checking)
                })
                .filter_map(|(_, checker)| checker.upgrade())
                .collect()
        };

        debug!("Reactive pass over {} step(s)", targets.len());
        join_all(targets.iter().map(|checker| checker.recheck())).await;
        self.inner.scheduler.passes.fetch_add(1, Ordering::SeqCst);
    }

    /// Start forwarding environment changes into the reactive scheduler.
    ///
    /// Returns false (and drops `sources`) when observation is already running.
    pub fn start_observation(&self, sources: Vec<Box<dyn ChangeSource>>) -> bool {
        let mut observation = self
            .inner
            .observation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if observation.is_some() {
            debug!("Observation already running");
            return false;
        }

        let token = CancellationToken::new();
        let tasks = sources
            .into_iter()
            .map(|mut source| {
                let coordinator = self.clone();
                let token = token.child_token();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            change = source.next_change() => match change {
                                Some(change) => {
                                    debug!(source = source.name(), ?change, "Environment changed");
                                    coordinator.trigger_reactive_check();
                                }
                                None => {
                                    debug!(source = source.name(), "Change source closed");
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        info!("Started environment observation");
        *observation = Some(Observation { token, tasks });
        true
    }

    /// Stop observation. Returns false when it was not running.
    pub fn stop_observation(&self) -> bool {
        let observation = self
            .inner
            .observation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match observation {
            Some(observation) => {
                observation.token.cancel();
                for task in observation.tasks {
                    task.abort();
                }
                info!("Stopped environment observation");
                true
            }
            None => false,
        }
    }

    pub fn is_observing(&self) -> bool {
        self.inner
            .observation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl SectionCompletionSource for StepCoordinator {
    fn is_section_completed(&self, section_id: &str) -> bool {
        self.registry()
            .sections
            .get(section_id)
            .is_some_and(|r| r.completed)
    }
}
