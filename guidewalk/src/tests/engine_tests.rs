use super::init_tracing;
use crate::environment::DataSourceInfo;
use crate::platforms::DomEventKind;
use crate::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn form_page() -> MemoryPage {
    MemoryPage::from_nodes([
        PageNode::new("form").id("new-datasource").children([
            PageNode::new("input").attr("name", "url").attr("type", "text"),
            PageNode::new("input").attr("name", "default").attr("type", "checkbox"),
            PageNode::new("button").text("Save & test"),
        ]),
        PageNode::new("a").attr("href", "/connections").text("Connections"),
    ])
}

fn engine(page: &MemoryPage, environment: Arc<StaticEnvironment>) -> GuideEngine {
    GuideEngine::builder()
        .page(Arc::new(page.clone()))
        .environment(environment)
        .config(EngineConfig::fast())
        .analytics(Arc::new(NoopAnalytics))
        .build()
        .unwrap()
}

fn datasource_section() -> Section {
    Section::new(
        "add-datasource",
        vec![
            Step::simple(
                "url",
                ActionDescriptor::form_fill("input[name='url']", "http://prometheus:9090"),
            )
            .with_requirements("exists-reftarget"),
            Step::simple(
                "default",
                ActionDescriptor::form_fill("input[name='default']", "true"),
            ),
            Step::simple("save", ActionDescriptor::button("Save")),
        ],
    )
}

#[tokio::test]
async fn builder_requires_a_page() {
    let err = GuideEngine::builder().build().err().unwrap();
    assert!(matches!(err, GuideError::InvalidArgument(_)));
}

#[tokio::test]
async fn mount_and_check_gates_steps_in_order() {
    init_tracing();
    let page = form_page();
    let engine = engine(&page, Arc::new(StaticEnvironment::default()));
    let state = engine.mount_section("guide", &datasource_section()).unwrap();
    assert_eq!(state.total_steps, 3);
    assert_eq!(state.resume_index, 0);

    let states = engine.check_section("add-datasource").await.unwrap();
    assert!(states[0].1.is_enabled);
    assert!(!states[1].1.is_enabled);
    assert!(!states[2].1.is_enabled);
}

#[tokio::test]
async fn run_section_shows_then_does_every_step() {
    init_tracing();
    let page = form_page();
    let engine = engine(&page, Arc::new(StaticEnvironment::default()));
    let section = datasource_section();
    engine.mount_section("guide", &section).unwrap();

    let outcome = engine
        .run_section(&section, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SectionRunOutcome::Completed {
            steps_completed: 3,
            steps_skipped: 0
        }
    );

    let url = page.find("input[name='url']").unwrap();
    assert_eq!(url.value().as_deref(), Some("http://prometheus:9090"));
    assert!(page.find("input[name='default']").unwrap().is_checked());
    let save = page.find("button").unwrap();
    assert!(page.events_for(&save).contains(&DomEventKind::Click));

    let state = engine.section_state("add-datasource").unwrap();
    assert!(state.is_completed);
    assert_eq!(state.completed_steps.len(), 3);
    for id in ["url", "default", "save"] {
        let step = engine.step_state(id).unwrap();
        assert!(step.is_completed && !step.is_enabled);
    }
}

#[tokio::test]
async fn progress_survives_a_new_engine() {
    let page = form_page();
    let store: Arc<dyn CompletionStore> = Arc::new(MemoryCompletionStore::new());
    let section = datasource_section();

    let first = GuideEngine::builder()
        .page(Arc::new(page.clone()))
        .config(EngineConfig::fast())
        .store(store.clone())
        .build()
        .unwrap();
    first.mount_section("guide", &section).unwrap();
    first.checker("url").unwrap().mark_completed().unwrap();
    drop(first);

    let second = GuideEngine::builder()
        .page(Arc::new(page))
        .config(EngineConfig::fast())
        .store(store)
        .build()
        .unwrap();
    let state = second.mount_section("guide", &section).unwrap();
    assert_eq!(state.resume_index, 1);
    assert!(second.step_state("url").unwrap().is_completed);

    let states = second.check_section("add-datasource").await.unwrap();
    assert!(states[1].1.is_enabled);
}

#[tokio::test]
async fn environment_change_unlocks_blocked_step() {
    init_tracing();
    let page = form_page();
    let environment = Arc::new(StaticEnvironment::default());
    let engine = engine(&page, environment.clone());
    let section = Section::new(
        "explore",
        vec![Step::simple("open", ActionDescriptor::button("Connections"))
            .with_requirements("has-datasources")],
    );
    engine.mount_section("guide", &section).unwrap();

    let state = engine.check_step("open").await.unwrap();
    assert!(!state.is_enabled);
    assert_eq!(state.error.as_deref(), Some("No data sources found"));

    let (injector, source) = manual_change_source();
    assert!(engine.start_observation_with(vec![Box::new(source)]));
    assert!(!engine.start_observation_with(Vec::new()));

    let mut changes = engine.coordinator().subscribe();
    environment.update(|snapshot| {
        snapshot.data_sources.push(DataSourceInfo {
            name: "Prometheus".into(),
            uid: "prom".into(),
            kind: "prometheus".into(),
        })
    });
    assert!(injector.notify("data source created"));

    let enabled = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match changes.recv().await {
                Ok(change) if change.step_id == "open" && change.state.is_enabled => break true,
                Ok(_) => continue,
                Err(_) => break false,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(enabled);
    assert!(engine.stop_observation());
    assert!(!engine.stop_observation());
}

#[tokio::test]
async fn teardown_detaches_checkers() {
    let page = form_page();
    let engine = engine(&page, Arc::new(StaticEnvironment::default()));
    engine.mount_section("guide", &datasource_section()).unwrap();
    assert_eq!(engine.teardown("guide"), 1);
    assert!(engine.checker("url").is_none());
    assert!(engine.step_state("url").is_none());
    assert!(engine.check_all().await.unwrap().is_empty());
}
