use guidewalk::environment::{OrgRole, UserInfo};
use guidewalk::locator::find_buttons_by_text;
use guidewalk::{
    ActionDescriptor, CheckContext, EngineConfig, FixType, MemoryPage, PageEngine, PageNode,
    RequirementEvaluator, RequirementFixer, StaticEnvironment,
};
use std::sync::Arc;

fn evaluator(page: &MemoryPage, environment: StaticEnvironment) -> RequirementEvaluator {
    RequirementEvaluator::new(
        Arc::new(page.clone()),
        Arc::new(environment),
        &EngineConfig::fast(),
    )
}

fn empty_page() -> MemoryPage {
    MemoryPage::from_nodes([])
}

#[tokio::test]
async fn test_empty_requirements_pass() {
    let result = evaluator(&empty_page(), StaticEnvironment::default())
        .evaluate("  ", &CheckContext::default())
        .await;
    assert!(result.pass);
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn test_has_datasources_without_any() {
    let result = evaluator(&empty_page(), StaticEnvironment::default())
        .evaluate("has-datasources", &CheckContext::default())
        .await;
    assert!(!result.pass);
    assert_eq!(
        result.results[0].error.as_deref(),
        Some("No data sources found")
    );
}

#[tokio::test]
async fn test_has_datasource_matches_name_uid_or_type() {
    let environment =
        StaticEnvironment::default().with_data_source("Metrics", "prom-1", "prometheus");
    let evaluator = evaluator(&empty_page(), environment);
    for token in [
        "has-datasource:metrics",
        "has-datasource:prom-1",
        "has-datasource:Prometheus",
    ] {
        assert!(
            evaluator.evaluate(token, &CheckContext::default()).await.pass,
            "{token}"
        );
    }
    assert!(
        !evaluator
            .evaluate("has-datasource:loki", &CheckContext::default())
            .await
            .pass
    );
}

#[tokio::test]
async fn test_min_version_below_minimum() {
    let environment = StaticEnvironment::default().with_version("10.0.0");
    let result = evaluator(&empty_page(), environment)
        .evaluate("min-version:11.0.0", &CheckContext::default())
        .await;
    assert!(!result.pass);
    let error = result.results[0].error.clone().unwrap_or_default();
    assert!(
        error.contains("does not meet minimum requirement"),
        "{error}"
    );
}

#[tokio::test]
async fn test_all_tokens_must_pass() {
    let environment = StaticEnvironment::default()
        .with_user(UserInfo {
            login: "admin".into(),
            is_signed_in: true,
            org_role: OrgRole::Admin,
            ..Default::default()
        })
        .with_version("11.2.0");
    let evaluator = evaluator(&empty_page(), environment);

    let result = evaluator
        .evaluate(
            "is-logged-in, is-admin, has-role:editor, min-version:11",
            &CheckContext::default(),
        )
        .await;
    assert!(result.pass, "{result:?}");

    let result = evaluator
        .evaluate("is-admin, has-plugin:grafana-lokiexplore-app", &CheckContext::default())
        .await;
    assert!(!result.pass);
    assert_eq!(result.failures().count(), 1);
}

#[tokio::test]
async fn test_unknown_tokens_fail_closed() {
    let result = evaluator(&empty_page(), StaticEnvironment::default())
        .evaluate("needs-coffee", &CheckContext::default())
        .await;
    assert!(!result.pass);
    assert_eq!(
        result.results[0].error.as_deref(),
        Some("Unknown requirement: needs-coffee")
    );
}

#[tokio::test]
async fn test_button_text_matches_substring_case_insensitively() {
    let page = MemoryPage::from_nodes([
        PageNode::new("button").text("Cancel"),
        PageNode::new("button").text("Save dashboard now"),
    ]);
    let found = find_buttons_by_text(&page, "save DASHBOARD", None).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].text_content(), "Save dashboard now");

    let context = CheckContext::for_action(&ActionDescriptor::button("Save dashboard"));
    let result = evaluator(&page, StaticEnvironment::default())
        .evaluate("exists-reftarget", &context)
        .await;
    assert!(result.pass, "{result:?}");
}

#[tokio::test]
async fn test_missing_reftarget_offers_navigation_fix() {
    let page = MemoryPage::from_nodes([PageNode::new("button")
        .test_id("data-testid Toggle menu")
        .text("Menu")]);
    let context = CheckContext::for_action(&ActionDescriptor::highlight(
        "a[href='/connections/datasources']",
    ));
    let result = evaluator(&page, StaticEnvironment::default())
        .evaluate("exists-reftarget", &context)
        .await;
    assert!(!result.pass);
    let failure = result.fixable_failure().unwrap();
    assert_eq!(failure.fix_type, Some(FixType::Navigation));
}

#[tokio::test]
async fn test_on_page_fix_routes_to_target() {
    let page = empty_page().with_path("/home");
    let evaluator = evaluator(&page, StaticEnvironment::default());
    let result = evaluator
        .evaluate("on-page:/connections", &CheckContext::default())
        .await;
    assert!(!result.pass);
    let failure = result.fixable_failure().unwrap().clone();
    assert_eq!(failure.fix_type, Some(FixType::Location));
    assert_eq!(failure.target_href.as_deref(), Some("/connections"));

    let fixer = RequirementFixer::new(Arc::new(page.clone()), &EngineConfig::fast());
    fixer.fix(&failure).await.unwrap();
    assert_eq!(page.current_path(), "/connections");
    assert!(
        evaluator
            .evaluate("on-page:/connections", &CheckContext::default())
            .await
            .pass
    );
}

#[tokio::test]
async fn test_expand_parent_navigation_reveals_item() {
    let page = MemoryPage::from_nodes([PageNode::new("nav")
        .test_id("data-testid navigation mega-menu")
        .attr("data-docked", "true")
        .child(
            PageNode::new("ul").child(
                PageNode::new("li").children([
                    PageNode::new("a").attr("href", "/connections").text("Connections"),
                    PageNode::new("button").attr("aria-label", "Expand section Connections"),
                    PageNode::new("ul").id("children").attr("hidden", "").child(
                        PageNode::new("li").child(
                            PageNode::new("a")
                                .attr("href", "/connections/datasources")
                                .text("Data sources"),
                        ),
                    ),
                ]),
            ),
        )]);
    page.on_click("button[aria-label*='Expand section']", |page, _| {
        if let Some(children) = page.find("#children") {
            let _ = page.remove_attribute(&children, "hidden");
        }
    });

    let fixer = RequirementFixer::new(Arc::new(page.clone()), &EngineConfig::fast());
    fixer
        .expand_parent_navigation("/connections/datasources")
        .await
        .unwrap();
    assert!(page
        .find("a[href='/connections/datasources']")
        .unwrap()
        .is_visible());
}
