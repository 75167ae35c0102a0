use crate::errors::GuideError;
use crate::platforms::DomEventKind;
use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

const SNAPSHOT_TEXT_LIMIT: usize = 120;

const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "menuitem", "tab", "checkbox", "radio", "option", "switch", "treeitem",
    "combobox",
];

/// Represents an element on the live page
#[derive(Clone)]
pub struct PageElement {
    inner: Arc<dyn PageElementImpl>,
}

/// Serializable snapshot of a page element.
///
/// Carries the identifying properties of an element at the moment it was
/// observed. It cannot perform any actions; detected user actions and
/// analytics events carry it instead of a live handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag: String,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub value: Option<String>,
}

fn is_empty_string(opt: &Option<String>) -> bool {
    match opt {
        Some(s) => s.is_empty(),
        None => true,
    }
}

/// Interface for platform-specific element implementations
pub trait PageElementImpl: Send + Sync + Debug {
    fn object_id(&self) -> usize;
    fn tag_name(&self) -> String;
    fn attributes(&self) -> BTreeMap<String, String>;
    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes().get(name).cloned()
    }
    /// Full descendant text, whitespace-normalized.
    fn text_content(&self) -> String;
    fn parent(&self) -> Option<PageElement>;
    fn children(&self) -> Vec<PageElement>;
    fn is_visible(&self) -> bool;
    fn value(&self) -> Option<String>;
    fn is_checked(&self) -> bool;

    fn click(&self) -> Result<(), GuideError>;
    fn hover(&self) -> Result<(), GuideError>;
    fn focus(&self) -> Result<(), GuideError>;
    fn blur(&self) -> Result<(), GuideError>;
    fn set_value(&self, value: &str) -> Result<(), GuideError>;
    fn set_checked(&self, checked: bool) -> Result<(), GuideError>;
    fn dispatch_event(&self, kind: DomEventKind) -> Result<(), GuideError>;
    fn add_class(&self, class: &str) -> Result<(), GuideError>;
    fn remove_class(&self, class: &str) -> Result<(), GuideError>;

    fn as_any(&self) -> &dyn std::any::Any;
}

impl PageElement {
    pub fn new(inner: Arc<dyn PageElementImpl>) -> Self {
        Self { inner }
    }

    pub fn object_id(&self) -> usize {
        self.inner.object_id()
    }

    pub fn tag_name(&self) -> String {
        self.inner.tag_name().to_lowercase()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.inner.attribute(name)
    }

    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.inner.attributes()
    }

    pub fn id(&self) -> Option<String> {
        self.attribute("id").filter(|id| !id.is_empty())
    }

    pub fn classes(&self) -> Vec<String> {
        self.attribute("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|c| c.split_whitespace().any(|x| x == class))
    }

    pub fn test_id(&self) -> Option<String> {
        self.attribute("data-testid").filter(|v| !v.is_empty())
    }

    pub fn aria_label(&self) -> Option<String> {
        self.attribute("aria-label").filter(|v| !v.is_empty())
    }

    pub fn href(&self) -> Option<String> {
        self.attribute("href").filter(|v| !v.is_empty())
    }

    pub fn role(&self) -> Option<String> {
        self.attribute("role").filter(|v| !v.is_empty())
    }

    pub fn text_content(&self) -> String {
        self.inner.text_content()
    }

    pub fn parent(&self) -> Option<PageElement> {
        self.inner.parent()
    }

    pub fn children(&self) -> Vec<PageElement> {
        self.inner.children()
    }

    /// Ancestors from the nearest parent up to the root.
    pub fn ancestors(&self) -> Vec<PageElement> {
        let mut result = Vec::new();
        let mut current = self.parent();
        while let Some(element) = current {
            current = element.parent();
            result.push(element);
        }
        result
    }

    /// All descendants in document order, excluding this element.
    pub fn descendants(&self) -> Vec<PageElement> {
        let mut result = Vec::new();
        let mut stack: Vec<PageElement> = self.children().into_iter().rev().collect();
        while let Some(element) = stack.pop() {
            stack.extend(element.children().into_iter().rev());
            result.push(element);
        }
        result
    }

    pub fn matches(&self, selector: &Selector) -> bool {
        selector.matches(self)
    }

    /// This element or its nearest ancestor matching `selector`.
    pub fn closest(&self, selector: &Selector) -> Option<PageElement> {
        if selector.matches(self) {
            return Some(self.clone());
        }
        self.ancestors().into_iter().find(|a| selector.matches(a))
    }

    /// True when `other` is this element or one of its descendants.
    pub fn contains(&self, other: &PageElement) -> bool {
        self == other || other.ancestors().iter().any(|a| a == self)
    }

    pub fn is_visible(&self) -> bool {
        self.inner.is_visible()
    }

    pub fn value(&self) -> Option<String> {
        self.inner.value()
    }

    pub fn is_checked(&self) -> bool {
        self.inner.is_checked()
    }

    pub fn is_button_like(&self) -> bool {
        let tag = self.tag_name();
        if tag == "button" || self.role().as_deref() == Some("button") {
            return true;
        }
        tag == "input"
            && matches!(
                self.attribute("type").as_deref(),
                Some("submit") | Some("button") | Some("reset")
            )
    }

    pub fn is_link(&self) -> bool {
        (self.tag_name() == "a" && self.href().is_some()) || self.role().as_deref() == Some("link")
    }

    pub fn is_form_control(&self) -> bool {
        matches!(self.tag_name().as_str(), "input" | "textarea" | "select")
            || self.attribute("contenteditable").as_deref() == Some("true")
    }

    pub fn is_checkable(&self) -> bool {
        self.tag_name() == "input"
            && matches!(self.attribute("type").as_deref(), Some("checkbox") | Some("radio"))
    }

    pub fn is_interactive(&self) -> bool {
        if self.is_button_like() || self.is_link() || self.is_form_control() {
            return true;
        }
        if self
            .role()
            .is_some_and(|role| INTERACTIVE_ROLES.contains(&role.as_str()))
        {
            return true;
        }
        matches!(self.tag_name().as_str(), "summary" | "option" | "label")
            || self.attribute("tabindex").is_some()
            || self.attribute("onclick").is_some()
    }

    /// Text a user would read as this element's label.
    pub fn label_text(&self) -> String {
        let text = self.text_content();
        if !text.is_empty() {
            return text;
        }
        if self.tag_name() == "input" {
            if let Some(value) = self.attribute("value") {
                return value;
            }
        }
        self.aria_label().unwrap_or_default()
    }

    /// Identity that stays the same across handles to the same node.
    ///
    /// Prefers `data-testid`, then `id`, then the child-index path from the root.
    pub fn stable_identity(&self) -> String {
        if let Some(test_id) = self.test_id() {
            return format!("testid:{test_id}");
        }
        if let Some(id) = self.id() {
            return format!("id:{id}");
        }

        let mut segments = Vec::new();
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            let index = parent
                .children()
                .iter()
                .position(|c| c == &current)
                .unwrap_or(0);
            segments.push(format!("{}:{}", current.tag_name(), index));
            current = parent;
        }
        segments.push(current.tag_name());
        segments.reverse();
        format!("path:{}", segments.join(">"))
    }

    /// Short human-readable description used in log lines.
    pub fn describe(&self) -> String {
        let mut out = self.tag_name();
        if let Some(id) = self.id() {
            out.push('#');
            out.push_str(&id);
        }
        if let Some(test_id) = self.test_id() {
            out.push_str(&format!("[data-testid=\"{test_id}\"]"));
        }
        let text = self.text_content();
        if !text.is_empty() {
            out.push_str(&format!(" \"{}\"", truncate(&text, 40)));
        }
        out
    }

    pub fn snapshot(&self) -> ElementSnapshot {
        ElementSnapshot {
            tag: self.tag_name(),
            id: self.id(),
            classes: self.classes(),
            test_id: self.test_id(),
            aria_label: self.aria_label(),
            href: self.href(),
            role: self.role(),
            text: truncate(&self.text_content(), SNAPSHOT_TEXT_LIMIT),
            value: self.value(),
        }
    }

    pub fn click(&self) -> Result<(), GuideError> {
        self.inner.click()
    }

    pub fn hover(&self) -> Result<(), GuideError> {
        self.inner.hover()
    }

    pub fn focus(&self) -> Result<(), GuideError> {
        self.inner.focus()
    }

    pub fn blur(&self) -> Result<(), GuideError> {
        self.inner.blur()
    }

    pub fn set_value(&self, value: &str) -> Result<(), GuideError> {
        self.inner.set_value(value)
    }

    pub fn set_checked(&self, checked: bool) -> Result<(), GuideError> {
        self.inner.set_checked(checked)
    }

    pub fn dispatch_event(&self, kind: DomEventKind) -> Result<(), GuideError> {
        self.inner.dispatch_event(kind)
    }

    pub fn add_class(&self, class: &str) -> Result<(), GuideError> {
        self.inner.add_class(class)
    }

    pub fn remove_class(&self, class: &str) -> Result<(), GuideError> {
        self.inner.remove_class(class)
    }

    pub fn as_any(&self) -> &dyn std::any::Any {
        self.inner.as_any()
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push('…');
    out
}

impl Debug for PageElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageElement")
            .field("object_id", &self.object_id())
            .field("element", &self.describe())
            .finish()
    }
}

impl PartialEq for PageElement {
    fn eq(&self, other: &Self) -> bool {
        self.inner.object_id() == other.inner.object_id()
    }
}

impl Eq for PageElement {}

impl std::hash::Hash for PageElement {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.object_id().hash(state);
    }
}
