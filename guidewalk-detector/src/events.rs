use guidewalk::{DetectedActionType, ElementSnapshot, PageElement, Signal, StepId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// An interaction the user performed, classified into a guide-level action.
#[derive(Debug, Clone)]
pub struct DetectedAction {
    pub id: Uuid,
    pub action_type: DetectedActionType,
    /// The element acted on. `None` for navigation.
    pub element: Option<PageElement>,
    /// Stable identity of the element, or the path for navigation
    pub identity: String,
    /// Typed value for form fills, target path for navigation
    pub value: Option<String>,
    pub timestamp: SystemTime,
}

impl DetectedAction {
    pub fn new(
        action_type: DetectedActionType,
        element: Option<PageElement>,
        value: Option<String>,
    ) -> Self {
        let identity = match &element {
            Some(element) => element.stable_identity(),
            None => format!("path:{}", value.as_deref().unwrap_or_default()),
        };
        Self {
            id: Uuid::new_v4(),
            action_type,
            element,
            identity,
            value,
            timestamp: SystemTime::now(),
        }
    }

    /// Signal announcing this action, optionally attributed to a step.
    pub fn signal(&self, step_id: Option<StepId>) -> Signal {
        Signal::UserActionDetected {
            step_id,
            action_type: self.action_type,
            element: self.identity.clone(),
            value: self.value.clone(),
        }
    }

    pub fn record(&self) -> DetectedActionRecord {
        DetectedActionRecord {
            id: self.id,
            action_type: self.action_type,
            identity: self.identity.clone(),
            element: self.element.as_ref().map(PageElement::snapshot),
            value: self.value.clone(),
            timestamp_ms: self
                .timestamp
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }
}

/// Serializable form of a [`DetectedAction`] for logs and transcripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedActionRecord {
    pub id: Uuid,
    pub action_type: DetectedActionType,
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub timestamp_ms: u64,
}

impl DetectedActionRecord {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
