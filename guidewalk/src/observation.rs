//! Sources of environment changes that should trigger reactive re-checks.

use crate::element::PageElement;
use crate::platforms::{MutationRecord, PageEngine};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentChange {
    /// A relevant part of the page changed.
    Mutation { description: String },
    /// The in-app location changed.
    UrlChanged { from: String, to: String },
    /// Host-reported change (data source created, plugin enabled...).
    Manual(String),
}

/// A stream of environment changes.
#[async_trait]
pub trait ChangeSource: Send {
    fn name(&self) -> &str;

    /// Wait for the next change. `None` once the source is exhausted.
    async fn next_change(&mut self) -> Option<EnvironmentChange>;
}

/// Page mutations inside navigation-like subtrees.
pub struct MutationSource {
    receiver: broadcast::Receiver<MutationRecord>,
    keywords: Vec<String>,
}

impl MutationSource {
    pub fn new(page: &dyn PageEngine, keywords: &[String]) -> Self {
        Self {
            receiver: page.subscribe_mutations(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn is_relevant(&self, target: &PageElement) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        std::iter::once(target.clone())
            .chain(target.ancestors())
            .any(|element| self.element_matches(&element))
    }

    fn element_matches(&self, element: &PageElement) -> bool {
        if element.tag_name() == "nav" {
            return true;
        }
        let mut haystack: Vec<String> = element.classes();
        haystack.extend(element.id());
        haystack.extend(element.test_id());
        haystack.extend(element.href());
        haystack.extend(element.aria_label());
        haystack.iter().any(|value| {
            let value = value.to_lowercase();
            self.keywords.iter().any(|k| value.contains(k.as_str()))
        })
    }
}

#[async_trait]
impl ChangeSource for MutationSource {
    fn name(&self) -> &str {
        "mutations"
    }

    async fn next_change(&mut self) -> Option<EnvironmentChange> {
        loop {
            match self.receiver.recv().await {
                Ok(record) => {
                    if self.is_relevant(&record.target) {
                        return Some(EnvironmentChange::Mutation {
                            description: format!("{:?} on {}", record.kind, record.target.describe()),
                        });
                    }
                    trace!("Ignoring mutation on {}", record.target.describe());
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("Mutation observer lagged by {missed} records");
                    return Some(EnvironmentChange::Mutation {
                        description: format!("{missed} mutations missed"),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Polls the current path and reports changes.
pub struct UrlPoller {
    page: Arc<dyn PageEngine>,
    interval: Duration,
    last: String,
}

impl UrlPoller {
    pub fn new(page: Arc<dyn PageEngine>, interval: Duration) -> Self {
        let last = page.current_path();
        Self {
            page,
            interval,
            last,
        }
    }
}

#[async_trait]
impl ChangeSource for UrlPoller {
    fn name(&self) -> &str {
        "url"
    }

    async fn next_change(&mut self) -> Option<EnvironmentChange> {
        loop {
            tokio::time::sleep(self.interval).await;
            let current = self.page.current_path();
            if current != self.last {
                let from = std::mem::replace(&mut self.last, current.clone());
                return Some(EnvironmentChange::UrlChanged { from, to: current });
            }
        }
    }
}

/// Receiving end of [`manual_change_source`].
pub struct ManualChangeSource {
    receiver: mpsc::UnboundedReceiver<EnvironmentChange>,
}

/// Lets the host report changes the engine cannot observe itself.
#[derive(Debug, Clone)]
pub struct ChangeInjector {
    sender: mpsc::UnboundedSender<EnvironmentChange>,
}

impl ChangeInjector {
    /// Returns false when the paired source has been dropped.
    pub fn notify(&self, reason: impl Into<String>) -> bool {
        self.sender
            .send(EnvironmentChange::Manual(reason.into()))
            .is_ok()
    }
}

pub fn manual_change_source() -> (ChangeInjector, ManualChangeSource) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChangeInjector { sender }, ManualChangeSource { receiver })
}

#[async_trait]
impl ChangeSource for ManualChangeSource {
    fn name(&self) -> &str {
        "manual"
    }

    async fn next_change(&mut self) -> Option<EnvironmentChange> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{MemoryPage, PageNode};

    fn page() -> MemoryPage {
        MemoryPage::from_nodes([
            PageNode::new("nav").id("mega-menu").child(PageNode::new("ul").id("items")),
            PageNode::new("main").child(PageNode::new("div").id("content")),
        ])
    }

    #[tokio::test]
    async fn only_reports_mutations_in_observed_subtrees() {
        let page = page();
        let mut source = MutationSource::new(&page, &["menu".to_string()]);

        let content = page.find("#content").unwrap();
        page.set_attribute(&content, "data-x", "1").unwrap();
        let items = page.find("#items").unwrap();
        page.append_child(&items, PageNode::new("li").text("Connections"))
            .unwrap();

        match source.next_change().await {
            Some(EnvironmentChange::Mutation { description }) => {
                assert!(description.contains("ChildList"), "{description}");
            }
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn url_poller_reports_path_changes() {
        let page = Arc::new(page());
        let mut poller = UrlPoller::new(page.clone(), Duration::from_millis(100));
        page.user_navigate("/connections");
        assert_eq!(
            poller.next_change().await,
            Some(EnvironmentChange::UrlChanged {
                from: "/".into(),
                to: "/connections".into()
            })
        );
    }

    #[tokio::test]
    async fn manual_source_ends_when_injector_drops() {
        let (injector, mut source) = manual_change_source();
        assert!(injector.notify("datasource created"));
        drop(injector);
        assert_eq!(
            source.next_change().await,
            Some(EnvironmentChange::Manual("datasource created".into()))
        );
        assert_eq!(source.next_change().await, None);
    }
}
