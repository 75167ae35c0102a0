use crate::events::DetectedAction;
use crate::{DetectorError, Result};
use guidewalk::platforms::{DomEvent, DomEventKind};
use guidewalk::{DetectedActionType, PageElement, PageEngine, Section, Selector, SignalBus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::Stream;
use tracing::{debug, info, trace, warn};

/// Configuration for the action detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Window in milliseconds. Repeated clicks and hovers on the same element
    /// inside it are dropped; form input is emitted once the field has been
    /// quiet this long.
    pub debounce_ms: u64,

    /// Selectors of containers whose events never count as user actions
    /// (the guide's own panel)
    pub ignored_containers: Vec<String>,

    /// Drop events the engine produced itself
    pub ignore_untrusted: bool,

    /// Buffer size of the detected action channel
    pub channel_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            ignored_containers: vec![
                "[data-guide-panel]".to_string(),
                ".guide-panel".to_string(),
            ],
            ignore_untrusted: true,
            channel_capacity: 100,
        }
    }
}

impl DetectorConfig {
    /// Short debounce window for headless hosts and tests.
    pub fn fast() -> Self {
        Self {
            debounce_ms: 30,
            ..Self::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Classify a raw DOM event into a guide-level action.
///
/// Returns the action type and the element it applies to. Hovers only count
/// when the element (or an ancestor) matches one of `hover_targets`.
pub fn classify(
    event: &DomEvent,
    hover_targets: &[Selector],
) -> Option<(DetectedActionType, Option<PageElement>)> {
    match event.kind {
        DomEventKind::Navigate => Some((DetectedActionType::Navigate, None)),
        DomEventKind::Click => {
            let target = event.target.as_ref()?;
            let mut chain = vec![target.clone()];
            chain.extend(target.ancestors());
            if let Some(button) = chain.iter().find(|el| el.is_button_like() || el.is_link()) {
                return Some((DetectedActionType::Button, Some(button.clone())));
            }
            chain
                .into_iter()
                .find(PageElement::is_interactive)
                .map(|el| (DetectedActionType::Highlight, Some(el)))
        }
        DomEventKind::Input | DomEventKind::Change => {
            let target = event.target.as_ref()?;
            target
                .is_form_control()
                .then(|| (DetectedActionType::FormFill, Some(target.clone())))
        }
        DomEventKind::MouseEnter => {
            let target = event.target.as_ref()?;
            hover_targets.iter().find_map(|selector| {
                target
                    .closest(selector)
                    .map(|el| (DetectedActionType::Hover, Some(el)))
            })
        }
        DomEventKind::Focus | DomEventKind::Blur => None,
    }
}

#[derive(Default)]
struct DebounceState {
    /// Leading-edge: last emission per (type, identity)
    last_emitted: HashMap<(DetectedActionType, String), Instant>,
    /// Trailing-edge: latest pending generation per field identity
    pending_fills: HashMap<String, u64>,
    generation: u64,
}

struct DetectorInner {
    page: Arc<dyn PageEngine>,
    config: DetectorConfig,
    ignored: Vec<Selector>,
    hover_targets: RwLock<Vec<Selector>>,
    event_tx: broadcast::Sender<DetectedAction>,
    signals: Option<SignalBus>,
    debounce: Mutex<DebounceState>,
}

/// Watches a page's DOM events and publishes the user actions they represent.
pub struct ActionDetector {
    inner: Arc<DetectorInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ActionDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDetector")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ActionDetector {
    pub fn new(
        page: Arc<dyn PageEngine>,
        config: DetectorConfig,
        signals: Option<SignalBus>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.channel_capacity.max(1));
        let ignored = config
            .ignored_containers
            .iter()
            .map(Selector::from)
            .filter(|selector| {
                let valid = selector.is_valid();
                if !valid {
                    warn!("Ignoring invalid container selector: {selector}");
                }
                valid
            })
            .collect();

        Self {
            inner: Arc::new(DetectorInner {
                page,
                config,
                ignored,
                hover_targets: RwLock::new(Vec::new()),
                event_tx,
                signals,
                debounce: Mutex::new(DebounceState::default()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.inner.config
    }

    /// Make mouse-enter events on elements matching `selector` count as hovers.
    pub fn register_hover_target(&self, selector: &str) -> Result<()> {
        let parsed = Selector::parse(selector)
            .map_err(|e| DetectorError::InvalidPattern(format!("{selector}: {e}")))?;
        let mut targets = self
            .inner
            .hover_targets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !targets.contains(&parsed) {
            debug!("Watching hover target {selector}");
            targets.push(parsed);
        }
        Ok(())
    }

    /// Register every hover action declared in `section` as a hover target.
    ///
    /// Returns how many targets were registered.
    pub fn watch_hover_targets(&self, section: &Section) -> Result<usize> {
        let mut count = 0;
        for step in &section.steps {
            for action in step.actions() {
                let nested = match action {
                    guidewalk::ActionDescriptor::Sequence { steps, .. } => steps.as_slice(),
                    other => std::slice::from_ref(other),
                };
                for action in nested {
                    if let guidewalk::ActionDescriptor::Hover { target, .. } = action {
                        self.register_hover_target(target)?;
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }

    /// Get a stream of detected actions
    pub fn event_stream(&self) -> impl Stream<Item = DetectedAction> {
        let mut rx = self.inner.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(action) => yield action,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Detected action stream lagged, skipped {} actions", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectedAction> {
        self.inner.event_tx.subscribe()
    }

    /// Start listening to the page's DOM events.
    pub fn start(&self) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(DetectorError::AlreadyRunning);
        }

        info!("Starting action detection");
        let inner = self.inner.clone();
        let mut events = inner.page.subscribe_events();
        *task = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => inner.process(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Detector lagged behind the page, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Action detection task ended");
        }));
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => {
                task.abort();
                info!("Action detection stopped");
                Ok(())
            }
            None => Err(DetectorError::NotRunning),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Feed one DOM event through classification and debouncing.
    pub fn process(&self, event: DomEvent) {
        self.inner.process(event);
    }
}

impl Drop for ActionDetector {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl DetectorInner {
    fn debounce_state(&self) -> MutexGuard<'_, DebounceState> {
        self.debounce.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_ignored(&self, element: &PageElement) -> bool {
        self.ignored
            .iter()
            .any(|selector| element.closest(selector).is_some())
    }

    fn process(self: &Arc<Self>, event: DomEvent) {
        if self.config.ignore_untrusted && !event.is_trusted {
            trace!(kind = ?event.kind, "dropping untrusted event");
            return;
        }
        if event.target.as_ref().is_some_and(|el| self.is_ignored(el)) {
            trace!(kind = ?event.kind, "dropping event inside ignored container");
            return;
        }

        let classified = {
            let hover_targets = self
                .hover_targets
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            classify(&event, &hover_targets)
        };
        let Some((action_type, element)) = classified else {
            return;
        };

        match action_type {
            DetectedActionType::FormFill => {
                let Some(element) = element else { return };
                let value = if element.is_checkable() {
                    Some(element.is_checked().to_string())
                } else {
                    event.value.or_else(|| element.value())
                };
                self.schedule_fill(DetectedAction::new(action_type, Some(element), value));
            }
            _ => {
                let value = match action_type {
                    DetectedActionType::Navigate => event.value,
                    _ => None,
                };
                let action = DetectedAction::new(action_type, element, value);
                if self.leading_edge(&action) {
                    self.emit(action);
                } else {
                    trace!("Debounced {:?} on {}", action.action_type, action.identity);
                }
            }
        }
    }

    /// True when the action is the first of its kind on this element inside
    /// the debounce window.
    fn leading_edge(&self, action: &DetectedAction) -> bool {
        let now = Instant::now();
        let window = self.config.debounce();
        let mut state = self.debounce_state();
        state
            .last_emitted
            .retain(|_, at| now.duration_since(*at) < window);

        let key = (action.action_type, action.identity.clone());
        if state.last_emitted.contains_key(&key) {
            return false;
        }
        state.last_emitted.insert(key, now);
        true
    }

    /// Emit the latest value of a field once it has been quiet for the window.
    fn schedule_fill(self: &Arc<Self>, action: DetectedAction) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                self.emit(action);
                return;
            }
        };

        let generation = {
            let mut state = self.debounce_state();
            state.generation += 1;
            let generation = state.generation;
            state
                .pending_fills
                .insert(action.identity.clone(), generation);
            generation
        };

        let inner = self.clone();
        let window = self.config.debounce();
        handle.spawn(async move {
            tokio::time::sleep(window).await;
            let latest = {
                let mut state = inner.debounce_state();
                let latest = state.pending_fills.get(&action.identity) == Some(&generation);
                if latest {
                    state.pending_fills.remove(&action.identity);
                }
                latest
            };
            if latest {
                inner.emit(action);
            }
        });
    }

    fn emit(&self, action: DetectedAction) {
        debug!(
            "Detected {:?} on {} (value: {:?})",
            action.action_type, action.identity, action.value
        );
        if let Some(signals) = &self.signals {
            signals.publish(action.signal(None));
        }
        // No subscribers is fine
        let _ = self.event_tx.send(action);
    }
}
