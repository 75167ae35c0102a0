use crate::action::ActionDescriptor;
use crate::requirements::FixType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type StepId = String;
pub type SectionId = String;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepKind {
    /// One action.
    Simple { action: ActionDescriptor },
    /// Several actions executed as one unit.
    Composite { actions: Vec<ActionDescriptor> },
    /// Actions the user performs; the engine only watches.
    Guided { actions: Vec<ActionDescriptor> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<String>,
    /// Post-condition checked after the `do` phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub skippable: bool,
    #[serde(default = "default_true")]
    pub show_enabled: bool,
}

impl Step {
    fn with_kind(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            requirements: None,
            objectives: None,
            verify: None,
            hint: None,
            skippable: false,
            show_enabled: true,
        }
    }

    pub fn simple(id: impl Into<String>, action: ActionDescriptor) -> Self {
        Self::with_kind(id, StepKind::Simple { action })
    }

    pub fn composite(id: impl Into<String>, actions: Vec<ActionDescriptor>) -> Self {
        Self::with_kind(id, StepKind::Composite { actions })
    }

    pub fn guided(id: impl Into<String>, actions: Vec<ActionDescriptor>) -> Self {
        Self::with_kind(id, StepKind::Guided { actions })
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.requirements = Some(requirements.into());
        self
    }

    pub fn with_objectives(mut self, objectives: impl Into<String>) -> Self {
        self.objectives = Some(objectives.into());
        self
    }

    pub fn with_verify(mut self, verify: impl Into<String>) -> Self {
        self.verify = Some(verify.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn skippable(mut self, skippable: bool) -> Self {
        self.skippable = skippable;
        self
    }

    pub fn show_enabled(mut self, show_enabled: bool) -> Self {
        self.show_enabled = show_enabled;
        self
    }

    pub fn actions(&self) -> &[ActionDescriptor] {
        match &self.kind {
            StepKind::Simple { action } => std::slice::from_ref(action),
            StepKind::Composite { actions } | StepKind::Guided { actions } => actions,
        }
    }

    /// The action whose target `exists-reftarget` checks.
    pub fn primary_action(&self) -> Option<&ActionDescriptor> {
        self.actions().first()
    }

    pub fn is_guided(&self) -> bool {
        matches!(self.kind, StepKind::Guided { .. })
    }

    pub fn requirements(&self) -> Option<&str> {
        non_empty(self.requirements.as_deref())
    }

    pub fn objectives(&self) -> Option<&str> {
        non_empty(self.objectives.as_deref())
    }

    pub fn verify(&self) -> Option<&str> {
        non_empty(self.verify.as_deref())
    }

    pub fn hint(&self) -> Option<&str> {
        non_empty(self.hint.as_deref())
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Steps unlock strictly in order when true.
    #[serde(default = "default_true")]
    pub sequential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Section {
    pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            title: None,
            sequential: true,
            requirements: None,
            objectives: None,
            steps,
        }
    }

    pub fn independent(mut self) -> Self {
        self.sequential = false;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.requirements = Some(requirements.into());
        self
    }

    pub fn with_objectives(mut self, objectives: impl Into<String>) -> Self {
        self.objectives = Some(objectives.into());
        self
    }

    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn requirements(&self) -> Option<&str> {
        non_empty(self.requirements.as_deref())
    }

    pub fn objectives(&self) -> Option<&str> {
        non_empty(self.objectives.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionReason {
    #[default]
    None,
    Objectives,
    Manual,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub is_enabled: bool,
    pub is_completed: bool,
    pub is_checking: bool,
    pub is_skipped: bool,
    pub completion_reason: CompletionReason,
    pub retry_count: u32,
    pub max_retries: u32,
    pub is_retrying: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub can_fix_requirement: bool,
    pub can_skip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_type: Option<FixType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_href: Option<String>,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            is_enabled: false,
            is_completed: false,
            is_checking: false,
            is_skipped: false,
            completion_reason: CompletionReason::None,
            retry_count: 0,
            max_retries: 3,
            is_retrying: false,
            explanation: None,
            error: None,
            can_fix_requirement: false,
            can_skip: false,
            fix_type: None,
            target_href: None,
        }
    }
}

/// Coarse view of a step's state for display and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Checking,
    Blocked,
    Enabled,
    Completed,
    Skipped,
}

impl StepState {
    pub fn status(&self) -> StepStatus {
        if self.is_skipped {
            StepStatus::Skipped
        } else if self.is_completed {
            StepStatus::Completed
        } else if self.is_checking {
            StepStatus::Checking
        } else if self.is_enabled {
            StepStatus::Enabled
        } else {
            StepStatus::Blocked
        }
    }
}

/// Partial update applied to a [`StepState`] through the coordinator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepUpdate {
    pub is_enabled: Option<bool>,
    pub is_completed: Option<bool>,
    pub is_checking: Option<bool>,
    pub is_skipped: Option<bool>,
    pub completion_reason: Option<CompletionReason>,
    pub retry_count: Option<u32>,
    pub max_retries: Option<u32>,
    pub is_retrying: Option<bool>,
    pub explanation: Option<Option<String>>,
    pub error: Option<Option<String>>,
    pub can_fix_requirement: Option<bool>,
    pub can_skip: Option<bool>,
    pub fix_type: Option<Option<FixType>>,
    pub target_href: Option<Option<String>>,
}

impl StepUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requirements met: enabled with failure details cleared.
    pub fn enabled() -> Self {
        Self {
            is_enabled: Some(true),
            is_checking: Some(false),
            is_retrying: Some(false),
            retry_count: Some(0),
            explanation: Some(None),
            error: Some(None),
            can_fix_requirement: Some(false),
            can_skip: Some(false),
            fix_type: Some(None),
            target_href: Some(None),
            ..Default::default()
        }
    }

    /// Waiting on earlier steps.
    pub fn blocked(explanation: impl Into<String>) -> Self {
        Self {
            is_enabled: Some(false),
            is_checking: Some(false),
            is_retrying: Some(false),
            explanation: Some(Some(explanation.into())),
            error: Some(None),
            can_fix_requirement: Some(false),
            can_skip: Some(false),
            fix_type: Some(None),
            target_href: Some(None),
            ..Default::default()
        }
    }

    pub fn completed(reason: CompletionReason) -> Self {
        Self {
            is_completed: Some(true),
            is_enabled: Some(false),
            is_checking: Some(false),
            is_retrying: Some(false),
            completion_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn skipped() -> Self {
        Self {
            is_skipped: Some(true),
            ..Self::completed(CompletionReason::Skipped)
        }
    }

    pub fn checking(checking: bool) -> Self {
        Self {
            is_checking: Some(checking),
            ..Default::default()
        }
    }

    pub fn retrying(retry_count: u32, max_retries: u32) -> Self {
        Self {
            is_retrying: Some(true),
            retry_count: Some(retry_count),
            max_retries: Some(max_retries),
            ..Default::default()
        }
    }

    pub fn explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(Some(explanation.into()));
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn fix(mut self, fix_type: Option<FixType>, target_href: Option<String>) -> Self {
        self.can_fix_requirement = Some(fix_type.is_some());
        self.fix_type = Some(fix_type);
        self.target_href = Some(target_href);
        self
    }

    pub fn can_skip(mut self, can_skip: bool) -> Self {
        self.can_skip = Some(can_skip);
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn apply(&self, state: &mut StepState) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(value) = &self.$field {
                    state.$field = value.clone();
                })*
            };
        }
        set!(
            is_enabled,
            is_completed,
            is_checking,
            is_skipped,
            completion_reason,
            retry_count,
            max_retries,
            is_retrying,
            explanation,
            error,
            can_fix_requirement,
            can_skip,
            fix_type,
            target_href
        );
    }
}

/// Runtime state of a registered section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionState {
    pub section_id: SectionId,
    pub completed_steps: BTreeSet<StepId>,
    pub total_steps: usize,
    /// Index of the first incomplete step.
    pub resume_index: usize,
    pub is_completed: bool,
    pub is_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_json_uses_flattened_kind() {
        let json = r#"{
            "id": "open-menu",
            "type": "simple",
            "action": {"kind": "button", "target": "Menu"},
            "requirements": "navmenu-open",
            "skippable": true
        }"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.id, "open-menu");
        assert!(step.show_enabled);
        assert!(step.skippable);
        assert_eq!(step.primary_action(), Some(&ActionDescriptor::button("Menu")));
        assert_eq!(step.requirements(), Some("navmenu-open"));
    }

    #[test]
    fn section_defaults_to_sequential() {
        let section: Section = serde_json::from_str(r#"{"id": "intro", "steps": []}"#).unwrap();
        assert!(section.sequential);
    }

    #[test]
    fn skipped_update_marks_completion() {
        let mut state = StepState {
            is_enabled: true,
            ..Default::default()
        };
        StepUpdate::skipped().apply(&mut state);
        assert!(state.is_completed);
        assert!(state.is_skipped);
        assert!(!state.is_enabled);
        assert_eq!(state.completion_reason, CompletionReason::Skipped);
        assert_eq!(state.status(), StepStatus::Skipped);
    }
}
