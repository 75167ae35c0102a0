//! In-memory page backend.
//!
//! A small DOM arena used by tests, the CLI and hosts that drive the engine
//! without a browser. Programmatic actions produce untrusted events; the
//! `user_*` helpers simulate a real person and produce trusted ones.

use super::{
    DomEvent, DomEventKind, HighlightHandle, MutationKind, MutationRecord, PageEngine,
    HIGHLIGHT_CLASS,
};
use crate::element::{PageElement, PageElementImpl};
use crate::errors::GuideError;
use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{debug, trace};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const HIGHLIGHT_TOKEN_ATTR: &str = "data-guide-highlight";

static PAGE_SEQUENCE: AtomicUsize = AtomicUsize::new(1);

type ClickHandler = Arc<dyn Fn(&MemoryPage, &PageElement) + Send + Sync>;

/// Declarative description of a DOM subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageNode {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PageNode>,
}

impl PageNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.attr("id", id)
    }

    pub fn class(self, class: impl Into<String>) -> Self {
        self.attr("class", class)
    }

    pub fn test_id(self, test_id: impl Into<String>) -> Self {
        self.attr("data-testid", test_id)
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn child(mut self, child: PageNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = PageNode>) -> Self {
        self.children.extend(children);
        self
    }
}

/// A page description loadable from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFixture {
    #[serde(default = "default_path")]
    pub path: String,
    pub root: PageNode,
}

fn default_path() -> String {
    "/".to_string()
}

/// Entry of the page's event log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub object_id: usize,
    pub kind: DomEventKind,
    pub value: Option<String>,
    pub is_trusted: bool,
}

#[derive(Debug)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    children: Vec<usize>,
    parent: Option<usize>,
    value: Option<String>,
    checked: bool,
    attached: bool,
}

#[derive(Debug, Default)]
struct DomState {
    nodes: Vec<Node>,
    path: String,
    opened_tabs: Vec<String>,
    focused: Option<usize>,
    event_log: Vec<LoggedEvent>,
}

impl DomState {
    fn insert(&mut self, node: &PageNode, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        let tag = node.tag.to_lowercase();
        let value = if matches!(tag.as_str(), "input" | "textarea" | "select") {
            Some(node.attributes.get("value").cloned().unwrap_or_default())
        } else {
            None
        };
        self.nodes.push(Node {
            checked: node.attributes.contains_key("checked"),
            tag,
            attributes: node.attributes.clone(),
            text: node.text.clone(),
            children: Vec::new(),
            parent,
            value,
            attached: true,
        });
        for child in &node.children {
            let child_index = self.insert(child, Some(index));
            self.nodes[index].children.push(child_index);
        }
        index
    }

    fn collect_text(&self, index: usize, out: &mut Vec<String>) {
        let node = &self.nodes[index];
        if !node.text.trim().is_empty() {
            out.push(node.text.clone());
        }
        for &child in &node.children {
            self.collect_text(child, out);
        }
    }

    fn is_hidden(node: &Node) -> bool {
        if node.attributes.contains_key("hidden") {
            return true;
        }
        if node.attributes.get("aria-hidden").map(String::as_str) == Some("true") {
            return true;
        }
        node.attributes
            .get("style")
            .map(|style| style.replace(' ', "").contains("display:none"))
            .unwrap_or(false)
    }

    fn is_visible(&self, index: usize) -> bool {
        let mut current = Some(index);
        while let Some(i) = current {
            let node = &self.nodes[i];
            if !node.attached || Self::is_hidden(node) {
                return false;
            }
            current = node.parent;
        }
        true
    }
}

struct PageShared {
    page_id: usize,
    state: Mutex<DomState>,
    click_handlers: Mutex<Vec<(Selector, ClickHandler)>>,
    mutations: broadcast::Sender<MutationRecord>,
    events: broadcast::Sender<DomEvent>,
}

/// In-memory page engine.
#[derive(Clone)]
pub struct MemoryPage {
    shared: Arc<PageShared>,
}

impl std::fmt::Debug for MemoryPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryPage")
            .field("page_id", &self.shared.page_id)
            .field("path", &state.path)
            .field("nodes", &state.nodes.len())
            .finish()
    }
}

impl MemoryPage {
    pub fn new(root: PageNode) -> Self {
        let mut state = DomState {
            path: default_path(),
            ..Default::default()
        };
        state.insert(&root, None);
        let (mutations, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(PageShared {
                page_id: PAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(state),
                click_handlers: Mutex::new(Vec::new()),
                mutations,
                events,
            }),
        }
    }

    /// Wrap `children` in a `body` root.
    pub fn from_nodes(children: impl IntoIterator<Item = PageNode>) -> Self {
        Self::new(PageNode::new("body").children(children))
    }

    pub fn from_fixture(fixture: PageFixture) -> Self {
        Self::new(fixture.root).with_path(&fixture.path)
    }

    pub fn with_path(self, path: &str) -> Self {
        self.lock().path = path.to_string();
        self
    }

    fn lock(&self) -> MutexGuard<'_, DomState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn element(&self, index: usize) -> PageElement {
        PageElement::new(Arc::new(MemoryElement {
            page: self.clone(),
            index,
        }))
    }

    fn index_of(&self, element: &PageElement) -> Result<usize, GuideError> {
        element
            .as_any()
            .downcast_ref::<MemoryElement>()
            .filter(|e| Arc::ptr_eq(&e.page.shared, &self.shared))
            .map(|e| e.index)
            .ok_or_else(|| {
                GuideError::InvalidArgument(format!(
                    "{} does not belong to this page",
                    element.describe()
                ))
            })
    }

    fn object_id(&self, index: usize) -> usize {
        (self.shared.page_id << 20) ^ index
    }

    fn emit(&self, index: Option<usize>, kind: DomEventKind, value: Option<String>, trusted: bool) {
        self.lock().event_log.push(LoggedEvent {
            object_id: index.map(|i| self.object_id(i)).unwrap_or_default(),
            kind,
            value: value.clone(),
            is_trusted: trusted,
        });
        trace!(?kind, trusted, "dom event");
        let _ = self.shared.events.send(DomEvent {
            kind,
            target: index.map(|i| self.element(i)),
            value,
            is_trusted: trusted,
            timestamp: SystemTime::now(),
        });
    }

    fn mutated(&self, index: usize, kind: MutationKind) {
        let _ = self.shared.mutations.send(MutationRecord {
            kind,
            target: self.element(index),
        });
    }

    /// First element matching `selector`, searching the whole document.
    pub fn find(&self, selector: &str) -> Option<PageElement> {
        self.find_all(selector).into_iter().next()
    }

    pub fn find_all(&self, selector: &str) -> Vec<PageElement> {
        self.query_all(&Selector::from(selector), None)
            .unwrap_or_default()
    }

    /// Register a page behaviour run after any click on an element matching `selector`.
    pub fn on_click<F>(&self, selector: &str, handler: F)
    where
        F: Fn(&MemoryPage, &PageElement) + Send + Sync + 'static,
    {
        self.shared
            .click_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Selector::from(selector), Arc::new(handler)));
    }

    pub fn append_child(&self, parent: &PageElement, node: PageNode) -> Result<PageElement, GuideError> {
        let parent_index = self.index_of(parent)?;
        let index = {
            let mut state = self.lock();
            let index = state.insert(&node, Some(parent_index));
            state.nodes[parent_index].children.push(index);
            index
        };
        self.mutated(parent_index, MutationKind::ChildList { added: 1, removed: 0 });
        Ok(self.element(index))
    }

    pub fn remove_element(&self, element: &PageElement) -> Result<(), GuideError> {
        let index = self.index_of(element)?;
        let parent = {
            let mut state = self.lock();
            let parent = state.nodes[index].parent.take();
            if let Some(p) = parent {
                state.nodes[p].children.retain(|&c| c != index);
            }
            state.nodes[index].attached = false;
            parent
        };
        if let Some(p) = parent {
            self.mutated(p, MutationKind::ChildList { added: 0, removed: 1 });
        }
        Ok(())
    }

    pub fn set_attribute(&self, element: &PageElement, name: &str, value: &str) -> Result<(), GuideError> {
        let index = self.index_of(element)?;
        self.lock().nodes[index]
            .attributes
            .insert(name.to_string(), value.to_string());
        self.mutated(index, MutationKind::Attributes { name: name.to_string() });
        Ok(())
    }

    pub fn remove_attribute(&self, element: &PageElement, name: &str) -> Result<(), GuideError> {
        let index = self.index_of(element)?;
        let removed = self.lock().nodes[index].attributes.remove(name).is_some();
        if removed {
            self.mutated(index, MutationKind::Attributes { name: name.to_string() });
        }
        Ok(())
    }

    pub fn set_text(&self, element: &PageElement, text: &str) -> Result<(), GuideError> {
        let index = self.index_of(element)?;
        self.lock().nodes[index].text = text.to_string();
        self.mutated(index, MutationKind::CharacterData);
        Ok(())
    }

    /// Simulate a person clicking `element`.
    pub fn user_click(&self, element: &PageElement) -> Result<(), GuideError> {
        let index = self.index_of(element)?;
        self.perform_click(index, true)
    }

    /// Simulate a person typing `value` into `element`.
    pub fn user_input(&self, element: &PageElement, value: &str) -> Result<(), GuideError> {
        let index = self.index_of(element)?;
        self.assign_value(index, value);
        self.emit(Some(index), DomEventKind::Input, Some(value.to_string()), true);
        Ok(())
    }

    /// Simulate a committed change on `element` (e.g. the field losing focus).
    pub fn user_change(&self, element: &PageElement) -> Result<(), GuideError> {
        let index = self.index_of(element)?;
        let value = self.lock().nodes[index].value.clone();
        self.emit(Some(index), DomEventKind::Change, value, true);
        Ok(())
    }

    pub fn user_hover(&self, element: &PageElement) -> Result<(), GuideError> {
        let index = self.index_of(element)?;
        self.emit(Some(index), DomEventKind::MouseEnter, None, true);
        Ok(())
    }

    pub fn user_navigate(&self, path: &str) {
        self.route(path, true);
    }

    pub fn opened_tabs(&self) -> Vec<String> {
        self.lock().opened_tabs.clone()
    }

    pub fn event_log(&self) -> Vec<LoggedEvent> {
        self.lock().event_log.clone()
    }

    /// Kinds of the events dispatched on `element`, oldest first.
    pub fn events_for(&self, element: &PageElement) -> Vec<DomEventKind> {
        let id = element.object_id();
        self.lock()
            .event_log
            .iter()
            .filter(|e| e.object_id == id)
            .map(|e| e.kind)
            .collect()
    }

    pub fn clear_event_log(&self) {
        self.lock().event_log.clear();
    }

    pub fn focused(&self) -> Option<PageElement> {
        let focused = self.lock().focused;
        focused.map(|i| self.element(i))
    }

    fn route(&self, path: &str, trusted: bool) {
        let changed = {
            let mut state = self.lock();
            let changed = state.path != path;
            state.path = path.to_string();
            changed
        };
        if changed {
            debug!("Routed to {path}");
        }
        self.emit(None, DomEventKind::Navigate, Some(path.to_string()), trusted);
    }

    fn assign_value(&self, index: usize, value: &str) {
        self.lock().nodes[index].value = Some(value.to_string());
        self.mutated(index, MutationKind::Attributes { name: "value".to_string() });
    }

    fn perform_click(&self, index: usize, trusted: bool) -> Result<(), GuideError> {
        let (tag, href, input_type, disabled, visible) = {
            let state = self.lock();
            let node = &state.nodes[index];
            (
                node.tag.clone(),
                node.attributes.get("href").cloned(),
                node.attributes.get("type").cloned(),
                node.attributes.contains_key("disabled"),
                state.is_visible(index),
            )
        };

        if !visible {
            return Err(GuideError::ActionFailed(format!(
                "cannot click hidden element {}",
                self.element(index).describe()
            )));
        }
        if disabled {
            return Err(GuideError::ActionFailed(format!(
                "cannot click disabled element {}",
                self.element(index).describe()
            )));
        }

        self.emit(Some(index), DomEventKind::Click, None, trusted);

        if tag == "input" {
            match input_type.as_deref() {
                Some("checkbox") => {
                    let checked = !self.lock().nodes[index].checked;
                    self.apply_checked(index, checked, trusted);
                }
                Some("radio") => self.apply_checked(index, true, trusted),
                _ => {}
            }
        }

        if tag == "a" {
            if let Some(href) = href.filter(|h| h.starts_with('/')) {
                self.route(&href, trusted);
            }
        }

        let element = self.element(index);
        let handlers: Vec<ClickHandler> = self
            .shared
            .click_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(selector, _)| selector.matches(&element))
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(self, &element);
        }

        Ok(())
    }

    fn apply_checked(&self, index: usize, checked: bool, trusted: bool) {
        let changed = {
            let mut state = self.lock();
            let changed = state.nodes[index].checked != checked;
            state.nodes[index].checked = checked;
            changed
        };
        if changed {
            self.mutated(index, MutationKind::Attributes { name: "checked".to_string() });
            let value = Some(checked.to_string());
            self.emit(Some(index), DomEventKind::Input, value.clone(), trusted);
            self.emit(Some(index), DomEventKind::Change, value, trusted);
        }
    }

    fn update_classes(&self, index: usize, class: &str, add: bool) {
        let changed = {
            let mut state = self.lock();
            let attributes = &mut state.nodes[index].attributes;
            let mut classes: Vec<String> = attributes
                .get("class")
                .map(|c| c.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            let present = classes.iter().any(|c| c == class);
            if add && !present {
                classes.push(class.to_string());
            } else if !add && present {
                classes.retain(|c| c != class);
            } else {
                return;
            }
            attributes.insert("class".to_string(), classes.join(" "));
            true
        };
        if changed {
            self.mutated(index, MutationKind::Attributes { name: "class".to_string() });
        }
    }
}

#[async_trait::async_trait]
impl PageEngine for MemoryPage {
    fn root(&self) -> PageElement {
        self.element(0)
    }

    fn current_path(&self) -> String {
        self.lock().path.clone()
    }

    fn push_route(&self, path: &str) -> Result<(), GuideError> {
        if !path.starts_with('/') {
            return Err(GuideError::InvalidArgument(format!(
                "route must be an in-app path: {path}"
            )));
        }
        self.route(path, false);
        Ok(())
    }

    fn open_new_tab(&self, url: &str) -> Result<(), GuideError> {
        debug!("Opening new tab: {url}");
        self.lock().opened_tabs.push(url.to_string());
        Ok(())
    }

    async fn highlight(
        &self,
        element: &PageElement,
        duration: Duration,
    ) -> Result<HighlightHandle, GuideError> {
        let index = self.index_of(element)?;
        let handle = HighlightHandle::new(element.clone());
        let token = handle.id.to_string();

        self.lock().nodes[index]
            .attributes
            .insert(HIGHLIGHT_TOKEN_ATTR.to_string(), token.clone());
        self.update_classes(index, HIGHLIGHT_CLASS, true);

        let page = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let current = page.lock().nodes[index]
                .attributes
                .get(HIGHLIGHT_TOKEN_ATTR)
                .cloned();
            // a newer highlight on the same element owns the class now
            if current.as_deref() == Some(token.as_str()) {
                page.lock().nodes[index].attributes.remove(HIGHLIGHT_TOKEN_ATTR);
                page.update_classes(index, HIGHLIGHT_CLASS, false);
            }
        });

        Ok(handle)
    }

    fn subscribe_mutations(&self) -> broadcast::Receiver<MutationRecord> {
        self.shared.mutations.subscribe()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DomEvent> {
        self.shared.events.subscribe()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Handle to a node in a [`MemoryPage`].
pub struct MemoryElement {
    page: MemoryPage,
    index: usize,
}

impl std::fmt::Debug for MemoryElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.page.lock();
        f.debug_struct("MemoryElement")
            .field("index", &self.index)
            .field("tag", &state.nodes[self.index].tag)
            .finish()
    }
}

impl MemoryElement {
    fn require_visible(&self, action: &str) -> Result<(), GuideError> {
        if self.page.lock().is_visible(self.index) {
            Ok(())
        } else {
            Err(GuideError::ActionFailed(format!(
                "cannot {action} hidden element {}",
                self.page.element(self.index).describe()
            )))
        }
    }
}

impl PageElementImpl for MemoryElement {
    fn object_id(&self) -> usize {
        self.page.object_id(self.index)
    }

    fn tag_name(&self) -> String {
        self.page.lock().nodes[self.index].tag.clone()
    }

    fn attributes(&self) -> BTreeMap<String, String> {
        self.page.lock().nodes[self.index].attributes.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.page.lock().nodes[self.index].attributes.get(name).cloned()
    }

    fn text_content(&self) -> String {
        let mut pieces = Vec::new();
        self.page.lock().collect_text(self.index, &mut pieces);
        pieces
            .iter()
            .flat_map(|p| p.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn parent(&self) -> Option<PageElement> {
        let parent = self.page.lock().nodes[self.index].parent;
        parent.map(|p| self.page.element(p))
    }

    fn children(&self) -> Vec<PageElement> {
        let children = self.page.lock().nodes[self.index].children.clone();
        children.into_iter().map(|c| self.page.element(c)).collect()
    }

    fn is_visible(&self) -> bool {
        self.page.lock().is_visible(self.index)
    }

    fn value(&self) -> Option<String> {
        self.page.lock().nodes[self.index].value.clone()
    }

    fn is_checked(&self) -> bool {
        self.page.lock().nodes[self.index].checked
    }

    fn click(&self) -> Result<(), GuideError> {
        self.page.perform_click(self.index, false)
    }

    fn hover(&self) -> Result<(), GuideError> {
        self.require_visible("hover")?;
        self.page
            .emit(Some(self.index), DomEventKind::MouseEnter, None, false);
        Ok(())
    }

    fn focus(&self) -> Result<(), GuideError> {
        self.require_visible("focus")?;
        self.page.lock().focused = Some(self.index);
        self.page.emit(Some(self.index), DomEventKind::Focus, None, false);
        Ok(())
    }

    fn blur(&self) -> Result<(), GuideError> {
        {
            let mut state = self.page.lock();
            if state.focused == Some(self.index) {
                state.focused = None;
            }
        }
        self.page.emit(Some(self.index), DomEventKind::Blur, None, false);
        Ok(())
    }

    fn set_value(&self, value: &str) -> Result<(), GuideError> {
        self.page.assign_value(self.index, value);
        Ok(())
    }

    fn set_checked(&self, checked: bool) -> Result<(), GuideError> {
        let changed = {
            let mut state = self.page.lock();
            let changed = state.nodes[self.index].checked != checked;
            state.nodes[self.index].checked = checked;
            changed
        };
        if changed {
            self.page
                .mutated(self.index, MutationKind::Attributes { name: "checked".to_string() });
        }
        Ok(())
    }

    fn dispatch_event(&self, kind: DomEventKind) -> Result<(), GuideError> {
        let value = match kind {
            DomEventKind::Input | DomEventKind::Change => self.value(),
            _ => None,
        };
        self.page.emit(Some(self.index), kind, value, false);
        Ok(())
    }

    fn add_class(&self, class: &str) -> Result<(), GuideError> {
        self.page.update_classes(self.index, class, true);
        Ok(())
    }

    fn remove_class(&self, class: &str) -> Result<(), GuideError> {
        self.page.update_classes(self.index, class, false);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryPage {
        MemoryPage::from_nodes([
            PageNode::new("nav").test_id("nav").child(
                PageNode::new("a")
                    .attr("href", "/dashboards")
                    .text("Dashboards"),
            ),
            PageNode::new("main").child(
                PageNode::new("button")
                    .class("primary")
                    .text("Save")
                    .child(PageNode::new("span").text("dashboard")),
            ),
            PageNode::new("input").attr("type", "checkbox").id("agree"),
            PageNode::new("div").attr("hidden", "").child(PageNode::new("button").text("Hidden")),
        ])
    }

    #[test]
    fn text_content_includes_descendants() {
        let page = sample();
        let button = page.find("button.primary").unwrap();
        assert_eq!(button.text_content(), "Save dashboard");
    }

    #[test]
    fn visibility_inherits_from_ancestors() {
        let page = sample();
        let hidden = page.find("button:contains(\"Hidden\")").unwrap();
        assert!(!hidden.is_visible());
        assert!(hidden.click().is_err());
    }

    #[tokio::test]
    async fn anchor_click_routes_page() {
        let page = sample();
        let mut events = page.subscribe_events();
        let link = page.find("a[href=\"/dashboards\"]").unwrap();
        link.click().unwrap();
        assert_eq!(page.current_path(), "/dashboards");

        let click = events.recv().await.unwrap();
        assert_eq!(click.kind, DomEventKind::Click);
        assert!(!click.is_trusted);
        let navigate = events.recv().await.unwrap();
        assert_eq!(navigate.kind, DomEventKind::Navigate);
    }

    #[tokio::test]
    async fn user_click_is_trusted_and_toggles_checkbox() {
        let page = sample();
        let mut events = page.subscribe_events();
        let checkbox = page.find("#agree").unwrap();
        page.user_click(&checkbox).unwrap();
        assert!(checkbox.is_checked());
        assert!(events.recv().await.unwrap().is_trusted);
    }

    #[tokio::test]
    async fn mutations_are_broadcast() {
        let page = sample();
        let mut mutations = page.subscribe_mutations();
        let main = page.find("main").unwrap();
        page.append_child(&main, PageNode::new("p").text("hello")).unwrap();
        let record = mutations.recv().await.unwrap();
        assert_eq!(record.target, main);
        assert_eq!(record.kind, MutationKind::ChildList { added: 1, removed: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn highlight_clears_after_duration() {
        let page = sample();
        let button = page.find("button.primary").unwrap();
        page.highlight(&button, Duration::from_millis(200)).await.unwrap();
        assert!(button.has_class(HIGHLIGHT_CLASS));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!button.has_class(HIGHLIGHT_CLASS));
    }

    #[test]
    fn click_handlers_run_after_click() {
        let page = sample();
        page.on_click("button.primary", |page, _| {
            let main = page.find("main").unwrap();
            page.append_child(&main, PageNode::new("div").id("saved")).unwrap();
        });
        page.find("button.primary").unwrap().click().unwrap();
        assert!(page.find("#saved").is_some());
    }
}
