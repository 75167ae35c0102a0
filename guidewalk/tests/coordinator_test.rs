use async_trait::async_trait;
use guidewalk::{
    manual_change_source, ActionDescriptor, CompletionReason, EngineConfig, ReactiveCheck,
    Section, Step, StepCoordinator, StepUpdate,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Default)]
struct CountingCheck {
    calls: AtomicUsize,
}

#[async_trait]
impl ReactiveCheck for CountingCheck {
    async fn recheck(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn section(ids: &[&str]) -> Section {
    Section::new(
        "s",
        ids.iter()
            .map(|id| Step::simple(*id, ActionDescriptor::highlight(format!("#{id}"))))
            .collect(),
    )
}

fn register(coordinator: &StepCoordinator, id: &str) -> Arc<CountingCheck> {
    let check = Arc::new(CountingCheck::default());
    let weak: Weak<CountingCheck> = Arc::downgrade(&check);
    coordinator.register_checker(id, weak);
    check
}

#[tokio::test(start_paused = true)]
async fn test_triggers_inside_window_coalesce() {
    let config = EngineConfig::fast();
    let coordinator = StepCoordinator::new(&config, None);
    coordinator.register_section("guide", &section(&["a", "b"]));
    let a = register(&coordinator, "a");
    let b = register(&coordinator, "b");

    coordinator.trigger_reactive_check();
    tokio::time::sleep(Duration::from_millis(10)).await;
    coordinator.trigger_reactive_check();
    tokio::time::sleep(config.timing.reactive_check_window() * 4).await;

    assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.reactive_passes(), 1);

    coordinator.trigger_reactive_check();
    tokio::time::sleep(config.timing.reactive_check_window() * 4).await;
    assert_eq!(a.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_completed_steps_are_not_rechecked() {
    let config = EngineConfig::fast();
    let coordinator = StepCoordinator::new(&config, None);
    coordinator.register_section("guide", &section(&["a", "b"]));
    let a = register(&coordinator, "a");
    let b = register(&coordinator, "b");

    // completing a step requests a pass on its own
    coordinator
        .update_step("a", StepUpdate::completed(CompletionReason::Manual))
        .unwrap();
    tokio::time::sleep(config.timing.reactive_check_window() * 4).await;

    assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    assert_eq!(b.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_checkers_are_forgotten() {
    let config = EngineConfig::fast();
    let coordinator = StepCoordinator::new(&config, None);
    coordinator.register_section("guide", &section(&["a"]));
    let a = register(&coordinator, "a");
    drop(a);

    coordinator.trigger_reactive_check();
    tokio::time::sleep(config.timing.reactive_check_window() * 4).await;
    assert_eq!(coordinator.reactive_passes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_changes_drive_reactive_checks() {
    let config = EngineConfig::fast();
    let coordinator = StepCoordinator::new(&config, None);
    coordinator.register_section("guide", &section(&["a"]));
    let a = register(&coordinator, "a");

    let (injector, source) = manual_change_source();
    assert!(coordinator.start_observation(vec![Box::new(source)]));
    assert!(coordinator.is_observing());

    injector.notify("plugin enabled");
    injector.notify("plugin configured");
    tokio::time::sleep(config.timing.reactive_check_window() * 4).await;
    assert_eq!(a.calls.load(Ordering::SeqCst), 1);

    assert!(coordinator.stop_observation());
    injector.notify("ignored");
    tokio::time::sleep(config.timing.reactive_check_window() * 4).await;
    assert_eq!(a.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_completed_is_never_enabled() {
    let coordinator = StepCoordinator::new(&EngineConfig::fast(), None);
    coordinator.register_section("guide", &section(&["a", "b", "c"]).independent());

    let updates = [
        StepUpdate::enabled(),
        StepUpdate::completed(CompletionReason::Manual),
        StepUpdate::enabled(),
        StepUpdate::checking(true),
        StepUpdate::blocked("waiting"),
        StepUpdate::skipped(),
        StepUpdate::enabled().retry_count(2),
        StepUpdate::completed(CompletionReason::Objectives),
        StepUpdate::enabled(),
    ];
    for (offset, id) in ["a", "b", "c"].into_iter().enumerate() {
        for update in updates.iter().skip(offset) {
            let state = coordinator.update_step(id, update.clone()).unwrap();
            assert!(!(state.is_completed && state.is_enabled), "{id}: {state:?}");
        }
    }
}

#[tokio::test]
async fn test_objective_completion_is_monotonic() {
    let coordinator = StepCoordinator::new(&EngineConfig::fast(), None);
    coordinator.register_section("guide", &section(&["a"]));
    coordinator
        .update_step("a", StepUpdate::completed(CompletionReason::Objectives))
        .unwrap();

    for update in [
        StepUpdate::completed(CompletionReason::Manual),
        StepUpdate::skipped(),
        StepUpdate::enabled(),
        StepUpdate::blocked("nope"),
    ] {
        let state = coordinator.update_step("a", update).unwrap();
        assert!(state.is_completed);
        assert!(!state.is_skipped);
        assert_eq!(state.completion_reason, CompletionReason::Objectives);
    }
}

#[tokio::test]
async fn test_section_completion_tracks_completed_steps() {
    let coordinator = StepCoordinator::new(&EngineConfig::fast(), None);
    coordinator.register_section("guide", &section(&["a", "b", "c"]));

    for (done, id) in ["a", "b", "c"].iter().enumerate() {
        let state = coordinator.section_state("s").unwrap();
        assert_eq!(state.completed_steps.len(), done);
        assert_eq!(state.is_completed, done == 3);
        coordinator
            .update_step(id, StepUpdate::completed(CompletionReason::Manual))
            .unwrap();
    }
    let state = coordinator.section_state("s").unwrap();
    assert_eq!(state.completed_steps.len(), 3);
    assert!(state.is_completed);

    coordinator.reset_step("b").unwrap();
    let state = coordinator.section_state("s").unwrap();
    assert_eq!(state.completed_steps.len(), 2);
    assert!(!state.is_completed);
    assert_eq!(state.resume_index, 1);

    coordinator.reset_section("s").unwrap();
    assert!(coordinator.section_state("s").unwrap().completed_steps.is_empty());
}
