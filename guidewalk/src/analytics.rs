use crate::action::{ActionKind, ExecutionMode};
use crate::requirements::FixType;
use crate::step::{CompletionReason, SectionId, StepId};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Interaction events reported while a guide runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InteractionEvent {
    StepStarted {
        #[serde(skip_serializing_if = "Option::is_none")]
        section_id: Option<SectionId>,
        step_id: StepId,
    },
    StepCompleted {
        step_id: StepId,
        reason: CompletionReason,
    },
    StepSkipped {
        step_id: StepId,
        reason: String,
    },
    SectionCompleted {
        section_id: SectionId,
    },
    ActionExecuted {
        action: ActionKind,
        target: String,
        mode: ExecutionMode,
        success: bool,
    },
    FixAttempted {
        step_id: StepId,
        #[serde(skip_serializing_if = "Option::is_none")]
        fix_type: Option<FixType>,
        success: bool,
    },
}

/// Fire-and-forget destination for interaction events.
pub trait AnalyticsSink: Send + Sync {
    fn report(&self, event: InteractionEvent);
}

/// Logs every event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalytics;

impl AnalyticsSink for TracingAnalytics {
    fn report(&self, event: InteractionEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "guidewalk::analytics", "{json}"),
            Err(_) => info!(target: "guidewalk::analytics", ?event),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn report(&self, _event: InteractionEvent) {}
}

/// Keeps events in memory, for hosts that batch uploads and for tests.
#[derive(Debug, Default)]
pub struct RecordingAnalytics {
    events: Mutex<Vec<InteractionEvent>>,
}

impl RecordingAnalytics {
    pub fn events(&self) -> Vec<InteractionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take(&self) -> Vec<InteractionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl AnalyticsSink for RecordingAnalytics {
    fn report(&self, event: InteractionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
