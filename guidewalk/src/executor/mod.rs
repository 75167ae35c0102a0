//! Show/do execution of action descriptors against the live page.

mod fix;

pub use fix::RequirementFixer;

use crate::action::{ActionDescriptor, ExecutionMode};
use crate::analytics::{AnalyticsSink, InteractionEvent};
use crate::config::EngineConfig;
use crate::element::PageElement;
use crate::errors::GuideError;
use crate::locator::{find_buttons_by_text, Locator};
use crate::platforms::{DomEventKind, PageEngine};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const RUNNING_CLASS: &str = "guide-action-running";
pub const COMPLETED_CLASS: &str = "guide-action-completed";
pub const ERROR_CLASS: &str = "guide-action-error";

pub struct ActionExecutor {
    page: Arc<dyn PageEngine>,
    analytics: Arc<dyn AnalyticsSink>,
    highlight_duration: Duration,
    settle_delay: Duration,
}

impl ActionExecutor {
    pub fn new(page: Arc<dyn PageEngine>, analytics: Arc<dyn AnalyticsSink>, config: &EngineConfig) -> Self {
        Self {
            page,
            analytics,
            highlight_duration: config.timing.highlight_duration(),
            settle_delay: config.timing.settle_delay(),
        }
    }

    pub fn page(&self) -> &Arc<dyn PageEngine> {
        &self.page
    }

    /// Run one action in `mode`.
    ///
    /// `Show` only outlines the target. `Do` performs the interaction.
    #[instrument(skip(self, descriptor), fields(action = %descriptor))]
    pub async fn execute(&self, descriptor: &ActionDescriptor, mode: ExecutionMode) -> Result<(), GuideError> {
        self.execute_in(descriptor, mode, None).await
    }

    /// Run an action while reflecting progress on the control that triggered it.
    pub async fn execute_with_feedback(
        &self,
        descriptor: &ActionDescriptor,
        mode: ExecutionMode,
        control: Option<&PageElement>,
    ) -> Result<(), GuideError> {
        if let Some(control) = control {
            set_feedback(control, RUNNING_CLASS);
        }
        let result = self.execute(descriptor, mode).await;
        if let Some(control) = control {
            set_feedback(
                control,
                if result.is_ok() { COMPLETED_CLASS } else { ERROR_CLASS },
            );
        }
        result
    }

    fn execute_in<'a>(
        &'a self,
        descriptor: &'a ActionDescriptor,
        mode: ExecutionMode,
        scope: Option<&'a PageElement>,
    ) -> BoxFuture<'a, Result<(), GuideError>> {
        async move {
            let result = self.perform(descriptor, mode, scope).await;
            if let Err(e) = &result {
                warn!("{mode:?} {descriptor} failed: {e}");
            }
            self.analytics.report(InteractionEvent::ActionExecuted {
                action: descriptor.kind(),
                target: descriptor.target().to_string(),
                mode,
                success: result.is_ok(),
            });
            result
        }
        .boxed()
    }

    async fn perform(
        &self,
        descriptor: &ActionDescriptor,
        mode: ExecutionMode,
        scope: Option<&PageElement>,
    ) -> Result<(), GuideError> {
        match descriptor {
            ActionDescriptor::Navigate { target, .. } => match mode {
                ExecutionMode::Show => {
                    info!("Next: navigate to {target}");
                    Ok(())
                }
                ExecutionMode::Do => self.navigate(target),
            },
            ActionDescriptor::Button { target, .. } => {
                let element = self.resolve_button(target, scope)?;
                match mode {
                    ExecutionMode::Show => self.show(&element).await,
                    ExecutionMode::Do => element.click(),
                }
            }
            ActionDescriptor::Highlight { target, .. } => {
                let element = self.resolve_single(target, scope)?;
                match mode {
                    ExecutionMode::Show => self.show(&element).await,
                    ExecutionMode::Do => element.click(),
                }
            }
            ActionDescriptor::FormFill { target, value, .. } => {
                let element = self.resolve_single(target, scope)?;
                match mode {
                    ExecutionMode::Show => self.show(&element).await,
                    ExecutionMode::Do => fill(&element, value),
                }
            }
            ActionDescriptor::Hover { target, .. } => {
                let element = self.resolve_single(target, scope)?;
                match mode {
                    ExecutionMode::Show => self.show(&element).await,
                    ExecutionMode::Do => element.hover(),
                }
            }
            ActionDescriptor::Sequence { target, steps, .. } => {
                let container = self.resolve_single(target, scope)?;
                match mode {
                    ExecutionMode::Show => self.show(&container).await,
                    ExecutionMode::Do => {
                        for (index, step) in steps.iter().enumerate() {
                            if index > 0 {
                                tokio::time::sleep(self.settle_delay).await;
                            }
                            debug!("Sequence step {}/{}: {step}", index + 1, steps.len());
                            self.execute_in(step, ExecutionMode::Show, Some(&container))
                                .await?;
                            tokio::time::sleep(self.settle_delay).await;
                            self.execute_in(step, ExecutionMode::Do, Some(&container))
                                .await?;
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    /// Resolve a selector target that must match exactly one element.
    pub fn resolve_single(&self, target: &str, scope: Option<&PageElement>) -> Result<PageElement, GuideError> {
        let mut locator = Locator::new(self.page.clone(), target);
        if let Some(scope) = scope {
            locator = locator.within(scope.clone());
        }
        locator.exactly_one()
    }

    /// Resolve a button under `scope` by its text; exact matches first, then
    /// the first substring match.
    pub fn resolve_button(&self, text: &str, scope: Option<&PageElement>) -> Result<PageElement, GuideError> {
        find_buttons_by_text(self.page.as_ref(), text, scope)?
            .into_iter()
            .next()
            .ok_or_else(|| GuideError::ElementNotFound(format!("button with text \"{text}\"")))
    }

    async fn show(&self, element: &PageElement) -> Result<(), GuideError> {
        debug!("Highlighting {}", element.describe());
        self.page
            .highlight(element, self.highlight_duration)
            .await
            .map(|_| ())
    }

    fn navigate(&self, target: &str) -> Result<(), GuideError> {
        let target = target.trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            info!("Opening {target} in a new tab");
            return self.page.open_new_tab(target);
        }
        let path = if target.starts_with('/') {
            target.to_string()
        } else {
            format!("/{target}")
        };
        info!("Navigating to {path}");
        self.page.push_route(&path)
    }
}

fn fill(element: &PageElement, value: &str) -> Result<(), GuideError> {
    if element.is_checkable() {
        let checked = !matches!(
            value.trim().to_lowercase().as_str(),
            "false" | "off" | "no" | "0" | "unchecked"
        );
        element.set_checked(checked)?;
        element.dispatch_event(DomEventKind::Input)?;
        return element.dispatch_event(DomEventKind::Change);
    }

    element.focus()?;
    element.set_value(value)?;
    element.dispatch_event(DomEventKind::Input)?;
    element.dispatch_event(DomEventKind::Change)?;
    element.blur()
}

fn set_feedback(control: &PageElement, active: &str) {
    for class in [RUNNING_CLASS, COMPLETED_CLASS, ERROR_CLASS] {
        let result = if class == active {
            control.add_class(class)
        } else {
            control.remove_class(class)
        };
        if let Err(e) = result {
            debug!("Failed to update feedback class {class}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::analytics::{NoopAnalytics, RecordingAnalytics};
    use crate::platforms::{MemoryPage, PageNode, HIGHLIGHT_CLASS};

    fn page() -> MemoryPage {
        MemoryPage::from_nodes([
            PageNode::new("button").id("outer").text("Save"),
            PageNode::new("form").id("f").children([
                PageNode::new("input").id("name").attr("type", "text"),
                PageNode::new("input").id("default").attr("type", "checkbox"),
                PageNode::new("button").id("inner").text("Save changes"),
            ]),
            PageNode::new("button").id("do-it").text("Do it"),
            PageNode::new("li").class("item").text("one"),
            PageNode::new("li").class("item").text("two"),
        ])
        .with_path("/home")
    }

    fn executor(page: &MemoryPage, analytics: Arc<dyn AnalyticsSink>) -> ActionExecutor {
        ActionExecutor::new(Arc::new(page.clone()), analytics, &EngineConfig::fast())
    }

    #[tokio::test(start_paused = true)]
    async fn show_outlines_without_touching_the_page() {
        let page = page();
        let executor = executor(&page, Arc::new(NoopAnalytics));

        for action in [
            ActionDescriptor::button("Save"),
            ActionDescriptor::form_fill("#name", "grafana"),
            ActionDescriptor::hover("#f"),
            ActionDescriptor::navigate("/connections"),
        ] {
            executor.execute(&action, ExecutionMode::Show).await.unwrap();
        }

        assert!(page.event_log().is_empty());
        assert_eq!(page.current_path(), "/home");
        assert_eq!(page.find("#name").unwrap().value(), None);
        assert!(page.find("#outer").unwrap().has_class(HIGHLIGHT_CLASS));
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_runs_show_then_do_for_each_nested_action() {
        let page = page();
        let analytics = Arc::new(RecordingAnalytics::default());
        let executor = executor(&page, analytics.clone());

        let sequence = ActionDescriptor::sequence(
            "#f",
            vec![
                ActionDescriptor::form_fill("#name", "prometheus"),
                ActionDescriptor::button("Save"),
            ],
        );
        executor.execute(&sequence, ExecutionMode::Do).await.unwrap();

        let executed: Vec<(ActionKind, ExecutionMode)> = analytics
            .events()
            .into_iter()
            .filter_map(|event| match event {
                InteractionEvent::ActionExecuted { action, mode, success, .. } => {
                    assert!(success);
                    Some((action, mode))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            executed,
            vec![
                (ActionKind::FormFill, ExecutionMode::Show),
                (ActionKind::FormFill, ExecutionMode::Do),
                (ActionKind::Button, ExecutionMode::Show),
                (ActionKind::Button, ExecutionMode::Do),
                (ActionKind::Sequence, ExecutionMode::Do),
            ]
        );

        assert_eq!(page.find("#name").unwrap().value().as_deref(), Some("prometheus"));
        let inner = page.find("#inner").unwrap();
        assert_eq!(page.events_for(&inner), vec![DomEventKind::Click]);
        assert!(page.events_for(&page.find("#outer").unwrap()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn selector_targets_must_match_exactly_one_element() {
        let page = page();
        let executor = executor(&page, Arc::new(NoopAnalytics));

        let err = executor
            .execute(&ActionDescriptor::form_fill("input", "x"), ExecutionMode::Do)
            .await
            .unwrap_err();
        assert!(matches!(err, GuideError::SelectorAmbiguity { count: 2, .. }), "{err:?}");

        let err = executor
            .execute(&ActionDescriptor::highlight("li.item"), ExecutionMode::Show)
            .await
            .unwrap_err();
        assert!(matches!(err, GuideError::SelectorAmbiguity { count: 2, .. }), "{err:?}");

        let err = executor
            .execute(&ActionDescriptor::hover("#missing"), ExecutionMode::Do)
            .await
            .unwrap_err();
        assert!(matches!(err, GuideError::ElementNotFound(_)), "{err:?}");

        let err = executor
            .execute(&ActionDescriptor::button("Publish"), ExecutionMode::Do)
            .await
            .unwrap_err();
        assert!(matches!(err, GuideError::ElementNotFound(_)), "{err:?}");
    }

    #[tokio::test]
    async fn absolute_urls_open_a_tab_and_paths_push_a_route() {
        let page = page();
        let executor = executor(&page, Arc::new(NoopAnalytics));

        executor
            .execute(&ActionDescriptor::navigate("https://grafana.com/docs"), ExecutionMode::Do)
            .await
            .unwrap();
        assert_eq!(page.opened_tabs(), vec!["https://grafana.com/docs".to_string()]);
        assert_eq!(page.current_path(), "/home");

        executor
            .execute(&ActionDescriptor::navigate("connections"), ExecutionMode::Do)
            .await
            .unwrap();
        assert_eq!(page.current_path(), "/connections");
        assert_eq!(page.opened_tabs().len(), 1);
    }

    #[tokio::test]
    async fn form_fill_dispatches_focus_input_change_blur() {
        let page = page();
        let executor = executor(&page, Arc::new(NoopAnalytics));

        let name = page.find("#name").unwrap();
        executor
            .execute(&ActionDescriptor::form_fill("#name", "grafana"), ExecutionMode::Do)
            .await
            .unwrap();
        assert_eq!(
            page.events_for(&name),
            vec![
                DomEventKind::Focus,
                DomEventKind::Input,
                DomEventKind::Change,
                DomEventKind::Blur
            ]
        );
        assert_eq!(name.value().as_deref(), Some("grafana"));
        assert!(page.focused().is_none());

        let checkbox = page.find("#default").unwrap();
        executor
            .execute(&ActionDescriptor::form_fill("#default", "true"), ExecutionMode::Do)
            .await
            .unwrap();
        assert!(checkbox.is_checked());
        assert_eq!(
            page.events_for(&checkbox),
            vec![DomEventKind::Input, DomEventKind::Change]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_classes_follow_the_result() {
        let page = page();
        let executor = executor(&page, Arc::new(NoopAnalytics));
        let control = page.find("#do-it").unwrap();

        executor
            .execute_with_feedback(
                &ActionDescriptor::button("Save changes"),
                ExecutionMode::Do,
                Some(&control),
            )
            .await
            .unwrap();
        assert!(control.has_class(COMPLETED_CLASS));
        assert!(!control.has_class(RUNNING_CLASS));
        assert!(!control.has_class(ERROR_CLASS));

        executor
            .execute_with_feedback(
                &ActionDescriptor::highlight("#missing"),
                ExecutionMode::Show,
                Some(&control),
            )
            .await
            .unwrap_err();
        assert!(control.has_class(ERROR_CLASS));
        assert!(!control.has_class(COMPLETED_CLASS));
        assert!(!control.has_class(RUNNING_CLASS));
    }
}
