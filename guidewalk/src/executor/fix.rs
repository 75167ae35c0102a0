use crate::config::{EngineConfig, NavigationSelectors};
use crate::element::PageElement;
use crate::errors::GuideError;
use crate::platforms::PageEngine;
use crate::requirements::{CheckResult, FixType};
use crate::selector::{AttributeOperator, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Applies the automatic remedy attached to a failed requirement.
pub struct RequirementFixer {
    page: Arc<dyn PageEngine>,
    navigation: NavigationSelectors,
    settle: Duration,
}

impl RequirementFixer {
    pub fn new(page: Arc<dyn PageEngine>, config: &EngineConfig) -> Self {
        Self {
            page,
            navigation: config.navigation.clone(),
            settle: config.timing.fix_settle(),
        }
    }

    #[instrument(skip(self, failure), fields(requirement = %failure.requirement, fix = ?failure.fix_type))]
    pub async fn fix(&self, failure: &CheckResult) -> Result<(), GuideError> {
        match failure.fix_type {
            Some(FixType::Navigation) => self.open_navigation().await,
            Some(FixType::ExpandParentNavigation) => {
                let href = self.target_href(failure)?;
                self.expand_parent_navigation(href).await
            }
            Some(FixType::Location) => {
                let href = self.target_href(failure)?;
                info!("Fixing location by routing to {href}");
                self.page
                    .push_route(href)
                    .map_err(|e| GuideError::FixFailed(format!("cannot route to {href}: {e}")))
            }
            None => Err(GuideError::FixFailed(format!(
                "'{}' has no automatic fix",
                failure.requirement
            ))),
        }
    }

    fn target_href<'a>(&self, failure: &'a CheckResult) -> Result<&'a str, GuideError> {
        failure.target_href.as_deref().ok_or_else(|| {
            GuideError::FixFailed(format!("'{}' carries no target href", failure.requirement))
        })
    }

    fn visible_matches(&self, selector: &Selector, root: Option<&PageElement>) -> Vec<PageElement> {
        self.page
            .query_all(selector, root)
            .map(|found| found.into_iter().filter(PageElement::is_visible).collect())
            .unwrap_or_default()
    }

    fn is_present(&self, selector: &str) -> bool {
        !self.visible_matches(&Selector::from(selector), None).is_empty()
    }

    /// Click the first visible match. Returns whether anything was clicked.
    fn click_first(&self, selector: &Selector, root: Option<&PageElement>) -> Result<bool, GuideError> {
        match self.visible_matches(selector, root).into_iter().next() {
            Some(element) => {
                debug!("Clicking {}", element.describe());
                element
                    .click()
                    .map_err(|e| GuideError::FixFailed(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Open the navigation menu if needed, then dock it.
    pub async fn open_navigation(&self) -> Result<(), GuideError> {
        if !self.is_present(&self.navigation.menu) {
            if !self.click_first(&Selector::from(&self.navigation.toggle), None)? {
                return Err(GuideError::FixFailed("navigation toggle not found".to_string()));
            }
            tokio::time::sleep(self.settle).await;
            if !self.is_present(&self.navigation.menu) {
                return Err(GuideError::FixFailed("navigation menu did not open".to_string()));
            }
        }

        if !self.is_present(&self.navigation.docked) {
            if self.click_first(&Selector::from(&self.navigation.dock), None)? {
                tokio::time::sleep(self.settle).await;
            } else {
                debug!("No dock control, leaving menu undocked");
            }
        }
        Ok(())
    }

    /// Reveal the menu item linking to `href` by expanding its parent section.
    pub async fn expand_parent_navigation(&self, href: &str) -> Result<(), GuideError> {
        self.open_navigation().await?;

        let target = href_selector(href);
        if !self.visible_matches(&target, None).is_empty() {
            return Ok(());
        }

        let expand = Selector::from(&self.navigation.expand_section);
        let item = Selector::Tag("li".to_string());
        for parent in parent_paths(href) {
            let links = self
                .page
                .query_all(&href_selector(&parent), None)
                .unwrap_or_default();
            for link in links {
                let Some(container) = link.closest(&item).or_else(|| link.parent()) else {
                    continue;
                };
                if self.click_first(&expand, Some(&container))? {
                    debug!("Expanded navigation section {parent}");
                    tokio::time::sleep(self.settle).await;
                    if !self.visible_matches(&target, None).is_empty() {
                        return Ok(());
                    }
                }
            }
        }

        Err(GuideError::FixFailed(format!(
            "could not reveal navigation item {href}"
        )))
    }
}

fn href_selector(href: &str) -> Selector {
    Selector::Attribute {
        name: "href".to_string(),
        op: AttributeOperator::Equals,
        value: href.to_string(),
    }
}

/// Ancestor paths of `href`, nearest first: `/a/b/c` gives `/a/b`, `/a`.
fn parent_paths(href: &str) -> Vec<String> {
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    (1..segments.len())
        .rev()
        .map(|n| format!("/{}", segments[..n].join("/")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_paths_walk_up() {
        assert_eq!(
            parent_paths("/connections/datasources/new?x=1"),
            vec!["/connections/datasources".to_string(), "/connections".to_string()]
        );
        assert!(parent_paths("/home").is_empty());
    }
}
