//! Completes steps from the actions a person performs by hand.

use crate::events::DetectedAction;
use crate::matcher;
use crate::Result;
use futures::{Stream, StreamExt};
use guidewalk::locator::find_buttons_by_text;
use guidewalk::{
    ActionDescriptor, CompletionReason, PageElement, PageEngine, Section, SectionId, Selector,
    Step, StepCoordinator, StepId, StepUpdate,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct WatchedSection {
    id: SectionId,
    steps: Vec<Step>,
}

/// One action a person has to perform, with the sequence containers it
/// belongs to, outermost first.
struct Expected<'a> {
    action: &'a ActionDescriptor,
    containers: Vec<&'a str>,
}

/// The actions of a step in the order they must be observed. Sequences are
/// replaced by their nested actions.
fn expected_actions(actions: &[ActionDescriptor]) -> Vec<Expected<'_>> {
    fn walk<'a>(
        actions: &'a [ActionDescriptor],
        containers: &[&'a str],
        out: &mut Vec<Expected<'a>>,
    ) {
        for action in actions {
            match action {
                ActionDescriptor::Sequence { target, steps, .. } => {
                    let mut nested = containers.to_vec();
                    nested.push(target.as_str());
                    walk(steps, &nested, out);
                }
                other => out.push(Expected {
                    action: other,
                    containers: containers.to_vec(),
                }),
            }
        }
    }

    let mut out = Vec::new();
    walk(actions, &[], &mut out);
    out
}

/// Matches detected actions against the steps of watched sections.
///
/// Steps with several actions, including the nested actions of a sequence,
/// advance one action at a time in declared order and complete once the last
/// one has been observed.
pub struct AutoCompleter {
    coordinator: StepCoordinator,
    page: Arc<dyn PageEngine>,
    sections: Mutex<Vec<WatchedSection>>,
    progress: Mutex<HashMap<StepId, usize>>,
}

impl AutoCompleter {
    pub fn new(coordinator: StepCoordinator, page: Arc<dyn PageEngine>) -> Self {
        Self {
            coordinator,
            page,
            sections: Mutex::new(Vec::new()),
            progress: Mutex::new(HashMap::new()),
        }
    }

    pub fn watch_section(&self, section: &Section) {
        let mut sections = self.sections();
        sections.retain(|s| s.id != section.id);
        sections.push(WatchedSection {
            id: section.id.clone(),
            steps: section.steps.clone(),
        });
        debug!("Auto-completing steps of section {}", section.id);
    }

    pub fn unwatch_section(&self, section_id: &str) {
        let removed: Vec<StepId> = {
            let mut sections = self.sections();
            let ids = sections
                .iter()
                .filter(|s| s.id == section_id)
                .flat_map(|s| s.steps.iter().map(|step| step.id.clone()))
                .collect();
            sections.retain(|s| s.id != section_id);
            ids
        };
        let mut progress = self.progress_map();
        for id in removed {
            progress.remove(&id);
        }
    }

    /// Number of actions of `step_id` observed so far.
    pub fn progress(&self, step_id: &str) -> usize {
        self.progress_map().get(step_id).copied().unwrap_or(0)
    }

    fn sections(&self) -> MutexGuard<'_, Vec<WatchedSection>> {
        self.sections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn progress_map(&self) -> MutexGuard<'_, HashMap<StepId, usize>> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one detected action. Returns the steps it completed.
    ///
    /// Only the first enabled, incomplete step whose next expected action
    /// matches consumes the action.
    pub fn handle(&self, action: &DetectedAction) -> Result<Vec<StepId>> {
        let candidates: Vec<Step> = self
            .sections()
            .iter()
            .flat_map(|s| s.steps.iter().cloned())
            .collect();

        for step in candidates {
            let Some(state) = self.coordinator.get_step(&step.id) else {
                continue;
            };
            if state.is_completed || !state.is_enabled {
                continue;
            }
            let actions = expected_actions(step.actions());
            let index = self.progress(&step.id);
            let Some(expected) = actions.get(index) else {
                continue;
            };

            if !expected
                .containers
                .iter()
                .all(|container| matcher::inside_container(action, container))
            {
                continue;
            }
            let resolved = self.resolve(expected);
            if !matcher::matches(action, expected.action, resolved.as_ref()) {
                continue;
            }

            self.coordinator
                .signals()
                .publish(action.signal(Some(step.id.clone())));

            let observed = index + 1;
            if observed < actions.len() {
                debug!(
                    "Step {} advanced to action {}/{}",
                    step.id,
                    observed + 1,
                    actions.len()
                );
                self.progress_map().insert(step.id.clone(), observed);
                return Ok(Vec::new());
            }

            self.progress_map().remove(&step.id);
            self.coordinator
                .update_step(&step.id, StepUpdate::completed(CompletionReason::Manual))?;
            info!("Step {} completed from user action", step.id);
            return Ok(vec![step.id.clone()]);
        }
        Ok(Vec::new())
    }

    /// Consume `actions` until the stream ends.
    pub fn spawn<S>(self: Arc<Self>, actions: S) -> JoinHandle<()>
    where
        S: Stream<Item = DetectedAction> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut actions = Box::pin(actions);
            while let Some(action) = actions.next().await {
                if let Err(e) = self.handle(&action) {
                    warn!("Failed to apply detected action {}: {e}", action.identity);
                }
            }
            debug!("Auto-completion stream ended");
        })
    }

    /// Element the expected action currently resolves to, if any, searching
    /// inside its innermost sequence container.
    fn resolve(&self, expected: &Expected<'_>) -> Option<PageElement> {
        let scope = match expected.containers.last() {
            Some(container) => Some(self.first_match(&Selector::from(*container), None)?),
            None => None,
        };
        match expected.action {
            ActionDescriptor::Navigate { .. } | ActionDescriptor::Sequence { .. } => None,
            ActionDescriptor::Button { target, .. } => {
                find_buttons_by_text(self.page.as_ref(), target, scope.as_ref())
                    .ok()?
                    .into_iter()
                    .next()
            }
            other => self.first_match(&other.selector()?, scope.as_ref()),
        }
    }

    fn first_match(&self, selector: &Selector, scope: Option<&PageElement>) -> Option<PageElement> {
        self.page
            .query_all(selector, scope)
            .ok()
            .and_then(|elements| elements.into_iter().next())
    }
}

impl std::fmt::Debug for AutoCompleter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoCompleter")
            .field("sections", &self.sections().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_flatten_into_their_nested_actions() {
        let actions = vec![
            ActionDescriptor::highlight("#start"),
            ActionDescriptor::sequence(
                "#f",
                vec![
                    ActionDescriptor::form_fill("#name", "x"),
                    ActionDescriptor::sequence("#footer", vec![ActionDescriptor::button("Create")]),
                ],
            ),
        ];
        let expected = expected_actions(&actions);
        let flat: Vec<(&str, Vec<&str>)> = expected
            .iter()
            .map(|e| (e.action.target(), e.containers.clone()))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("#start", vec![]),
                ("#name", vec!["#f"]),
                ("Create", vec!["#f", "#footer"]),
            ]
        );
    }
}
