use crate::element::PageElement;
use crate::errors::GuideError;
use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

pub mod memory;

pub use memory::{MemoryPage, PageNode};

/// CSS class applied to an outlined element while it is highlighted.
pub const HIGHLIGHT_CLASS: &str = "guide-highlight";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomEventKind {
    Click,
    Input,
    Change,
    Focus,
    Blur,
    #[serde(rename = "mouseenter")]
    MouseEnter,
    Navigate,
}

/// A DOM event as observed on the page
#[derive(Debug, Clone)]
pub struct DomEvent {
    pub kind: DomEventKind,
    /// `None` for navigation events.
    pub target: Option<PageElement>,
    pub value: Option<String>,
    /// False for events produced by the engine itself.
    pub is_trusted: bool,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MutationKind {
    Attributes { name: String },
    ChildList { added: usize, removed: usize },
    CharacterData,
}

/// A structural or attribute change on the page
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: PageElement,
}

/// Handle for an active highlight. Closing it removes the outline early.
#[derive(Debug, Clone)]
pub struct HighlightHandle {
    pub id: Uuid,
    element: PageElement,
}

impl HighlightHandle {
    pub fn new(element: PageElement) -> Self {
        Self {
            id: Uuid::new_v4(),
            element,
        }
    }

    pub fn element(&self) -> &PageElement {
        &self.element
    }

    pub fn close(&self) {
        if let Err(e) = self.element.remove_class(HIGHLIGHT_CLASS) {
            debug!("Failed to remove highlight from {}: {e}", self.element.describe());
        }
    }
}

/// The common trait that all page backends must implement
#[async_trait::async_trait]
pub trait PageEngine: Send + Sync {
    /// Get the document root element
    fn root(&self) -> PageElement;

    /// Find all elements matching a selector, in document order.
    ///
    /// The search covers the descendants of `root` (the document root when
    /// `None`), not `root` itself.
    fn query_all(
        &self,
        selector: &Selector,
        root: Option<&PageElement>,
    ) -> Result<Vec<PageElement>, GuideError> {
        if let Selector::Invalid(reason) = selector {
            return Err(GuideError::InvalidSelector(reason.clone()));
        }
        if !selector.is_valid() {
            return Err(GuideError::InvalidSelector(selector.to_string()));
        }
        let scope = match root {
            Some(element) => element.clone(),
            None => self.root(),
        };
        Ok(scope
            .descendants()
            .into_iter()
            .filter(|element| selector.matches(element))
            .collect())
    }

    /// Current in-app path, e.g. `/dashboards`
    fn current_path(&self) -> String;

    /// In-app route push for relative paths
    fn push_route(&self, path: &str) -> Result<(), GuideError>;

    /// Open an absolute URL in a new tab
    fn open_new_tab(&self, url: &str) -> Result<(), GuideError>;

    /// Outline an element for `duration`
    async fn highlight(
        &self,
        element: &PageElement,
        duration: Duration,
    ) -> Result<HighlightHandle, GuideError>;

    fn subscribe_mutations(&self) -> broadcast::Receiver<MutationRecord>;

    fn subscribe_events(&self) -> broadcast::Receiver<DomEvent>;

    /// Enable downcasting to concrete engine types
    fn as_any(&self) -> &dyn std::any::Any;
}
