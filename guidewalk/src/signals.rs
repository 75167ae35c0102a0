use crate::action::DetectedActionType;
use crate::step::{SectionId, StepId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Cross-component notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum Signal {
    SectionCompleted {
        section_id: SectionId,
    },
    UserActionDetected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<StepId>,
        action_type: DetectedActionType,
        /// Stable identity of the element the user acted on
        element: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    StepAutoSkipped {
        step_id: StepId,
        #[serde(default)]
        reason: String,
    },
}

/// Broadcast bus for [`Signal`]s.
///
/// Producers call `publish` and subscribers call `subscribe` to receive every
/// signal sent afterwards.
#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<Signal>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a signal to all subscribers. Errors (e.g., no subscribers) are ignored.
    pub fn publish(&self, signal: Signal) {
        trace!(?signal, "publishing signal");
        let _ = self.sender.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_signals() {
        let bus = SignalBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Signal::SectionCompleted {
            section_id: "intro".into(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            Signal::SectionCompleted {
                section_id: "intro".into()
            }
        );
    }

    #[test]
    fn signals_serialize_with_kebab_tags() {
        let json = serde_json::to_value(Signal::StepAutoSkipped {
            step_id: "s2".into(),
            reason: "missing".into(),
        })
        .unwrap();
        assert_eq!(json["signal"], "step-auto-skipped");
    }
}
