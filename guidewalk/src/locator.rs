use crate::element::PageElement;
use crate::errors::GuideError;
use crate::platforms::PageEngine;
use crate::selector::Selector;
use std::sync::Arc;
use tracing::trace;

/// Elements that can be targeted by a `button` action.
pub const BUTTON_CANDIDATES: &str =
    "button, [role=\"button\"], input[type=\"submit\"], input[type=\"button\"]";

/// A high-level API for finding elements on the page
#[derive(Clone)]
pub struct Locator {
    engine: Arc<dyn PageEngine>,
    selector: Selector,
    root: Option<PageElement>,
}

impl Locator {
    pub fn new(engine: Arc<dyn PageEngine>, selector: impl Into<Selector>) -> Self {
        Self {
            engine,
            selector: selector.into(),
            root: None,
        }
    }

    /// Set the root element for this locator
    pub fn within(mut self, element: PageElement) -> Self {
        self.root = Some(element);
        self
    }

    /// All elements currently matching, in document order.
    pub fn all(&self) -> Result<Vec<PageElement>, GuideError> {
        self.engine.query_all(&self.selector, self.root.as_ref())
    }

    /// The single element matching this locator.
    ///
    /// Zero matches is `ElementNotFound`, more than one is `SelectorAmbiguity`.
    pub fn exactly_one(&self) -> Result<PageElement, GuideError> {
        let mut matches = self.all()?;
        match matches.len() {
            0 => Err(GuideError::ElementNotFound(self.selector_string())),
            1 => Ok(matches.remove(0)),
            count => Err(GuideError::SelectorAmbiguity {
                selector: self.selector_string(),
                count,
            }),
        }
    }

    pub fn selector_string(&self) -> String {
        format!("{:?}", self.selector)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Find button-like elements whose label matches `text`.
///
/// Matching is case-insensitive over the full descendant text. Exact matches
/// win over substring matches among the candidates under `scope` (the whole
/// document when `None`). Only visible candidates are returned.
pub fn find_buttons_by_text(
    engine: &dyn PageEngine,
    text: &str,
    scope: Option<&PageElement>,
) -> Result<Vec<PageElement>, GuideError> {
    let needle = normalize(text);
    if needle.is_empty() {
        return Err(GuideError::InvalidArgument(
            "button text must not be empty".to_string(),
        ));
    }

    let candidates: Vec<PageElement> = engine
        .query_all(&Selector::from(BUTTON_CANDIDATES), scope)?
        .into_iter()
        .filter(PageElement::is_visible)
        .collect();

    let (exact, partial): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .map(|element| (normalize(&element.label_text()), element))
        .filter(|(label, _)| label.contains(&needle))
        .partition(|(label, _)| *label == needle);

    let chosen = if exact.is_empty() { partial } else { exact };
    trace!("{} button(s) labelled \"{text}\"", chosen.len());
    Ok(chosen.into_iter().map(|(_, element)| element).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{MemoryPage, PageNode};

    fn page() -> Arc<MemoryPage> {
        Arc::new(MemoryPage::from_nodes([
            PageNode::new("button").text("Save dashboard now"),
            PageNode::new("div").attr("role", "button").text("Save"),
            PageNode::new("input").attr("type", "submit").attr("value", "Submit form"),
            PageNode::new("li").class("item").text("one"),
            PageNode::new("li").class("item").text("two"),
        ]))
    }

    #[test]
    fn substring_button_match_is_case_insensitive() {
        let page = page();
        let found = find_buttons_by_text(page.as_ref(), "save DASHBOARD", None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text_content(), "Save dashboard now");
    }

    #[test]
    fn exact_button_match_is_preferred() {
        let page = page();
        let found = find_buttons_by_text(page.as_ref(), "save", None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tag_name(), "div");
    }

    #[test]
    fn input_buttons_match_on_value() {
        let page = page();
        let found = find_buttons_by_text(page.as_ref(), "Submit form", None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tag_name(), "input");
    }

    #[test]
    fn exactly_one_reports_ambiguity_and_absence() {
        let page = page();
        let engine: Arc<dyn PageEngine> = page;
        let err = Locator::new(engine.clone(), "li.item").exactly_one().unwrap_err();
        assert_eq!(
            err,
            GuideError::SelectorAmbiguity {
                selector: format!("{:?}", Selector::from("li.item")),
                count: 2
            }
        );
        let err = Locator::new(engine.clone(), "#missing").exactly_one().unwrap_err();
        assert!(matches!(err, GuideError::ElementNotFound(_)));
        let err = Locator::new(engine, "div[").all().unwrap_err();
        assert!(matches!(err, GuideError::InvalidSelector(_)));
    }

    #[test]
    fn exact_match_outside_scope_does_not_hide_scoped_match() {
        let page = Arc::new(MemoryPage::from_nodes([
            PageNode::new("button").id("outer").text("Save"),
            PageNode::new("form")
                .id("f")
                .child(PageNode::new("button").id("inner").text("Save changes")),
        ]));
        let form = page.find("#f").unwrap();
        let found = find_buttons_by_text(page.as_ref(), "save", Some(&form)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id().as_deref(), Some("inner"));

        let everywhere = find_buttons_by_text(page.as_ref(), "save", None).unwrap();
        assert_eq!(everywhere[0].id().as_deref(), Some("outer"));
    }
}
