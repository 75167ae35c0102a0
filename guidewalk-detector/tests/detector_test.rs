use guidewalk::{
    ActionDescriptor, DetectedActionType, EngineConfig, GuideEngine, MemoryPage, NoopAnalytics,
    PageNode, Section, Signal, SignalBus, StaticEnvironment, Step,
};
use guidewalk_detector::{
    matches, ActionDetector, AutoCompleter, DetectedAction, DetectorConfig, DetectorError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn page() -> MemoryPage {
    MemoryPage::from_nodes([
        PageNode::new("button").id("save").text("Save dashboard"),
        PageNode::new("div").id("card").attr("tabindex", "0").text("Card"),
        PageNode::new("input").id("name"),
        PageNode::new("div")
            .attr("data-guide-panel", "")
            .child(PageNode::new("button").id("panel-next").text("Next")),
        PageNode::new("div")
            .id("menu")
            .child(PageNode::new("span").id("menu-label").text("Menu")),
    ])
    .with_path("/home")
}

fn drain(rx: &mut broadcast::Receiver<DetectedAction>) -> Vec<DetectedAction> {
    let mut out = Vec::new();
    while let Ok(action) = rx.try_recv() {
        out.push(action);
    }
    out
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_test_writer()
        .try_init();
}

fn window() -> Duration {
    DetectorConfig::fast().debounce()
}

#[tokio::test]
async fn test_highlight_satisfies_button_but_not_the_reverse() {
    let page = page();
    let card = page.find("#card").unwrap();
    let save = page.find("#save").unwrap();

    let clicked_card = DetectedAction::new(DetectedActionType::Highlight, Some(card), None);
    assert!(matches(&clicked_card, &ActionDescriptor::button("Card"), None));

    let pressed_save = DetectedAction::new(DetectedActionType::Button, Some(save.clone()), None);
    assert!(!matches(&pressed_save, &ActionDescriptor::highlight("#save"), None));
    assert!(matches(&pressed_save, &ActionDescriptor::button("save DASHBOARD"), Some(&save)));
}

#[tokio::test]
async fn test_navigation_satisfies_highlighted_link() {
    let navigated = DetectedAction::new(
        DetectedActionType::Navigate,
        None,
        Some("/connections/".to_string()),
    );
    assert!(matches(
        &navigated,
        &ActionDescriptor::highlight("a[href='/connections']"),
        None
    ));
    assert!(matches(&navigated, &ActionDescriptor::navigate("/connections"), None));
    assert!(!matches(&navigated, &ActionDescriptor::navigate("/dashboards"), None));
}

#[tokio::test]
async fn test_form_fill_values_support_patterns() {
    let page = page();
    let name = page.find("#name").unwrap();
    let typed = DetectedAction::new(
        DetectedActionType::FormFill,
        Some(name),
        Some("grafana-prod".to_string()),
    );
    assert!(matches(&typed, &ActionDescriptor::form_fill("#name", "/^grafana-/"), None));
    assert!(matches(&typed, &ActionDescriptor::form_fill("#name", ""), None));
    assert!(!matches(&typed, &ActionDescriptor::form_fill("#name", "grafana"), None));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_clicks_are_debounced() {
    let page = page();
    let detector = ActionDetector::new(Arc::new(page.clone()), DetectorConfig::fast(), None);
    let mut rx = detector.subscribe();
    detector.start().unwrap();
    assert!(matches!(detector.start(), Err(DetectorError::AlreadyRunning)));

    let save = page.find("#save").unwrap();
    page.user_click(&save).unwrap();
    page.user_click(&save).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let first = drain(&mut rx);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].action_type, DetectedActionType::Button);
    assert_eq!(first[0].identity, "id:save");

    tokio::time::sleep(window() * 2).await;
    page.user_click(&save).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(drain(&mut rx).len(), 1);

    detector.stop().unwrap();
    assert!(matches!(detector.stop(), Err(DetectorError::NotRunning)));
}

#[tokio::test(start_paused = true)]
async fn test_form_input_emits_latest_value_once_quiet() {
    let page = page();
    let detector = ActionDetector::new(Arc::new(page.clone()), DetectorConfig::fast(), None);
    let mut rx = detector.subscribe();
    detector.start().unwrap();

    let name = page.find("#name").unwrap();
    for value in ["g", "gr", "grafana"] {
        page.user_input(&name, value).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(drain(&mut rx).is_empty());

    tokio::time::sleep(window() * 3).await;
    let fills = drain(&mut rx);
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].action_type, DetectedActionType::FormFill);
    assert_eq!(fills[0].value.as_deref(), Some("grafana"));
}

#[tokio::test(start_paused = true)]
async fn test_engine_clicks_and_panel_clicks_are_ignored() {
    init_tracing();
    let page = page();
    let signals = SignalBus::default();
    let mut signal_rx = signals.subscribe();
    let detector = ActionDetector::new(
        Arc::new(page.clone()),
        DetectorConfig::fast(),
        Some(signals.clone()),
    );
    let mut rx = detector.subscribe();
    detector.start().unwrap();

    page.find("#save").unwrap().click().unwrap();
    page.user_click(&page.find("#panel-next").unwrap()).unwrap();
    tokio::time::sleep(window() * 2).await;
    assert!(drain(&mut rx).is_empty());
    assert!(signal_rx.try_recv().is_err());

    page.user_click(&page.find("#card").unwrap()).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    let detected = drain(&mut rx);
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].action_type, DetectedActionType::Highlight);
    assert!(matches!(
        signal_rx.try_recv(),
        Ok(Signal::UserActionDetected {
            step_id: None,
            action_type: DetectedActionType::Highlight,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_hover_counts_only_for_declared_targets() {
    let page = page();
    let detector = ActionDetector::new(Arc::new(page.clone()), DetectorConfig::fast(), None);
    let mut rx = detector.subscribe();
    detector.start().unwrap();

    let label = page.find("#menu-label").unwrap();
    page.user_hover(&label).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(drain(&mut rx).is_empty());

    let section = Section::new(
        "hover",
        vec![Step::simple("peek", ActionDescriptor::hover("#menu"))],
    );
    assert_eq!(detector.watch_hover_targets(&section).unwrap(), 1);
    assert!(matches!(
        detector.register_hover_target("div[unclosed"),
        Err(DetectorError::InvalidPattern(_))
    ));

    page.user_hover(&label).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    let hovers = drain(&mut rx);
    assert_eq!(hovers.len(), 1);
    assert_eq!(hovers[0].identity, "id:menu");
}

#[tokio::test(start_paused = true)]
async fn test_user_actions_complete_simple_and_guided_steps() {
    init_tracing();
    let page = page();
    let engine = GuideEngine::builder()
        .page(Arc::new(page.clone()))
        .environment(Arc::new(StaticEnvironment::default()))
        .config(EngineConfig::fast())
        .analytics(Arc::new(NoopAnalytics))
        .build()
        .unwrap();
    let section = Section::new(
        "by-hand",
        vec![
            Step::simple("save", ActionDescriptor::button("Save dashboard")),
            Step::guided(
                "name-and-go",
                vec![
                    ActionDescriptor::form_fill("#name", "/^graf/"),
                    ActionDescriptor::navigate("/dashboards"),
                ],
            ),
        ],
    );
    engine.mount_section("guide", &section).unwrap();
    engine.check_all().await.unwrap();
    assert!(engine.step_state("save").unwrap().is_enabled);
    assert!(!engine.step_state("name-and-go").unwrap().is_enabled);

    let detector = ActionDetector::new(Arc::new(page.clone()), DetectorConfig::fast(), None);
    let completer = Arc::new(AutoCompleter::new(
        engine.coordinator().clone(),
        Arc::new(page.clone()),
    ));
    completer.watch_section(&section);
    let task = completer.clone().spawn(detector.event_stream());
    detector.start().unwrap();

    // a navigation before the guided step is unlocked changes nothing
    page.user_navigate("/dashboards");
    tokio::time::sleep(window() * 2).await;
    assert_eq!(completer.progress("name-and-go"), 0);

    page.user_click(&page.find("#save").unwrap()).unwrap();
    tokio::time::sleep(window() * 2).await;
    assert!(engine.step_state("save").unwrap().is_completed);

    engine.check_step("name-and-go").await.unwrap();
    assert!(engine.step_state("name-and-go").unwrap().is_enabled);

    page.user_input(&page.find("#name").unwrap(), "grafana").unwrap();
    tokio::time::sleep(window() * 3).await;
    assert_eq!(completer.progress("name-and-go"), 1);
    assert!(!engine.step_state("name-and-go").unwrap().is_completed);

    page.user_navigate("/dashboards");
    tokio::time::sleep(window() * 2).await;
    assert!(engine.step_state("name-and-go").unwrap().is_completed);
    assert!(engine.section_state("by-hand").unwrap().is_completed);

    detector.stop().unwrap();
    task.abort();
}

#[tokio::test]
async fn test_sequence_step_completes_only_after_every_nested_action() {
    init_tracing();
    let page = MemoryPage::from_nodes([
        PageNode::new("button").id("elsewhere").text("Create"),
        PageNode::new("form").id("f").children([
            PageNode::new("input").id("name"),
            PageNode::new("button").id("go").text("Create"),
        ]),
    ]);
    let engine = GuideEngine::builder()
        .page(Arc::new(page.clone()))
        .environment(Arc::new(StaticEnvironment::default()))
        .config(EngineConfig::fast())
        .analytics(Arc::new(NoopAnalytics))
        .build()
        .unwrap();
    let section = Section::new(
        "composite",
        vec![Step::simple(
            "seq",
            ActionDescriptor::sequence(
                "#f",
                vec![
                    ActionDescriptor::form_fill("#name", "x"),
                    ActionDescriptor::button("Create"),
                ],
            ),
        )],
    );
    engine.mount_section("guide", &section).unwrap();
    engine.check_all().await.unwrap();

    let completer = AutoCompleter::new(engine.coordinator().clone(), Arc::new(page.clone()));
    completer.watch_section(&section);

    let go = page.find("#go").unwrap();
    let press_go = DetectedAction::new(DetectedActionType::Button, Some(go), None);
    assert!(completer.handle(&press_go).unwrap().is_empty());
    assert_eq!(completer.progress("seq"), 0);

    let name = page.find("#name").unwrap();
    let typed = DetectedAction::new(DetectedActionType::FormFill, Some(name), Some("x".to_string()));
    assert!(completer.handle(&typed).unwrap().is_empty());
    assert_eq!(completer.progress("seq"), 1);
    assert!(!engine.step_state("seq").unwrap().is_completed);

    let elsewhere = page.find("#elsewhere").unwrap();
    let press_elsewhere = DetectedAction::new(DetectedActionType::Button, Some(elsewhere), None);
    assert!(completer.handle(&press_elsewhere).unwrap().is_empty());
    assert_eq!(completer.progress("seq"), 1);

    assert_eq!(completer.handle(&press_go).unwrap(), vec!["seq".to_string()]);
    assert!(engine.step_state("seq").unwrap().is_completed);
}
