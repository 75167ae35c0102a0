//! Requirement predicates.
//!
//! A requirement string is a comma-separated list of tokens such as
//! `is-admin, has-datasource:prometheus, on-page:/dashboards`. Every token is
//! checked concurrently and the results are ANDed. Tokens are evaluated fresh
//! on every call.

mod checks;
mod messages;
mod version;

pub use messages::{explanation_for, requirement_message, DEFAULT_EXPLANATION};
pub use version::Version;

use crate::action::ActionDescriptor;
use crate::config::{EngineConfig, NavigationSelectors};
use crate::environment::Environment;
use crate::errors::GuideError;
use crate::platforms::PageEngine;
use crate::step::Step;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Automatic remedy available for a failed requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixType {
    /// Open and dock the navigation menu
    Navigation,
    /// Expand the collapsed menu section containing `target_href`
    ExpandParentNavigation,
    /// Route to `target_href`
    Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub requirement: String,
    pub pass: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub can_fix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_type: Option<FixType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_href: Option<String>,
}

impl CheckResult {
    pub fn pass(requirement: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            pass: true,
            error: None,
            can_fix: false,
            fix_type: None,
            target_href: None,
        }
    }

    pub fn fail(requirement: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            pass: false,
            error: Some(error.into()),
            can_fix: false,
            fix_type: None,
            target_href: None,
        }
    }

    pub fn with_fix(mut self, fix_type: FixType, target_href: Option<String>) -> Self {
        self.can_fix = true;
        self.fix_type = Some(fix_type);
        self.target_href = target_href;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementsResult {
    pub pass: bool,
    pub results: Vec<CheckResult>,
}

impl Default for RequirementsResult {
    fn default() -> Self {
        Self {
            pass: true,
            results: Vec::new(),
        }
    }
}

impl RequirementsResult {
    pub fn first_failure(&self) -> Option<&CheckResult> {
        self.results.iter().find(|r| !r.pass)
    }

    /// First failing check that carries an automatic fix.
    pub fn fixable_failure(&self) -> Option<&CheckResult> {
        self.results.iter().find(|r| !r.pass && r.can_fix)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.pass)
    }
}

/// What a check may need to know about the step being checked.
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    /// Target action for `exists-reftarget`
    pub action: Option<ActionDescriptor>,
    pub step_id: Option<String>,
}

impl CheckContext {
    pub fn for_step(step: &Step) -> Self {
        Self {
            action: step.primary_action().cloned(),
            step_id: Some(step.id.clone()),
        }
    }

    pub fn for_action(action: &ActionDescriptor) -> Self {
        Self {
            action: Some(action.clone()),
            step_id: None,
        }
    }
}

/// One parsed `name` or `name:argument` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementToken {
    pub raw: String,
    pub name: String,
    pub argument: Option<String>,
}

impl RequirementToken {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = normalize_token(raw);
        if raw.is_empty() {
            return None;
        }
        let (name, argument) = match raw.split_once(':') {
            Some((name, argument)) => {
                let argument = argument.trim();
                (
                    name.trim().to_string(),
                    (!argument.is_empty()).then(|| argument.to_string()),
                )
            }
            None => (raw.clone(), None),
        };
        Some(Self {
            raw,
            name: name.to_lowercase(),
            argument,
        })
    }

    pub fn is_known(&self) -> bool {
        KNOWN_REQUIREMENTS.contains(&self.name.as_str())
    }
}

/// Token names the evaluator understands.
pub const KNOWN_REQUIREMENTS: &[&str] = &[
    "exists-reftarget",
    "navmenu-open",
    "is-admin",
    "is-logged-in",
    "has-role",
    "has-permission",
    "has-datasources",
    "has-datasource",
    "has-plugin",
    "has-dashboard-named",
    "on-page",
    "has-feature",
    "in-environment",
    "min-version",
    "section-completed",
];

/// Replace smart quotes and odd spaces picked up from copy-pasted content.
fn normalize_token(raw: &str) -> String {
    raw.replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{00A0}', '\u{2009}', '\u{202F}'], " ")
        .trim()
        .to_string()
}

/// Split a requirement string into tokens, dropping empty entries.
pub fn parse_requirements(requirements: &str) -> Vec<RequirementToken> {
    requirements
        .split(',')
        .filter_map(RequirementToken::parse)
        .collect()
}

/// Tokens in `requirements` the evaluator does not know.
pub fn unknown_requirements(requirements: &str) -> Vec<String> {
    parse_requirements(requirements)
        .into_iter()
        .filter(|t| !t.is_known())
        .map(|t| t.raw)
        .collect()
}

/// Answers `section-completed:<id>`.
pub trait SectionCompletionSource: Send + Sync {
    fn is_section_completed(&self, section_id: &str) -> bool;
}

pub struct RequirementEvaluator {
    page: Arc<dyn PageEngine>,
    environment: Arc<dyn Environment>,
    sections: Option<Arc<dyn SectionCompletionSource>>,
    navigation: NavigationSelectors,
    check_timeout: Duration,
}

impl RequirementEvaluator {
    pub fn new(
        page: Arc<dyn PageEngine>,
        environment: Arc<dyn Environment>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            page,
            environment,
            sections: None,
            navigation: config.navigation.clone(),
            check_timeout: config.timing.requirement_timeout(),
        }
    }

    pub fn with_sections(mut self, sections: Arc<dyn SectionCompletionSource>) -> Self {
        self.sections = Some(sections);
        self
    }

    /// Evaluate a requirement string. An empty string passes.
    #[instrument(level = "debug", skip(self, context), fields(step_id = ?context.step_id))]
    pub async fn evaluate(&self, requirements: &str, context: &CheckContext) -> RequirementsResult {
        let tokens = parse_requirements(requirements);
        if tokens.is_empty() {
            return RequirementsResult::default();
        }

        let results = join_all(tokens.iter().map(|token| self.check_token(token, context))).await;
        let pass = results.iter().all(|r| r.pass);
        debug!(pass, checked = results.len(), "Evaluated requirements");
        RequirementsResult { pass, results }
    }

    /// Check one token, bounded by the per-check timeout. Never fails.
    pub async fn check_token(&self, token: &RequirementToken, context: &CheckContext) -> CheckResult {
        match tokio::time::timeout(self.check_timeout, self.dispatch(token, context)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Requirement '{}' failed to evaluate: {e}", token.raw);
                CheckResult::fail(&token.raw, format!("Requirement check failed: {e}"))
            }
            Err(_) => {
                let err = GuideError::RequirementTimeout(format!(
                    "'{}' exceeded {}ms",
                    token.raw,
                    self.check_timeout.as_millis()
                ));
                warn!("{err}");
                CheckResult::fail(&token.raw, err.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        token: &RequirementToken,
        context: &CheckContext,
    ) -> Result<CheckResult, GuideError> {
        let raw = token.raw.as_str();
        let argument = token.argument.as_deref();

        if token.is_known() && needs_argument(&token.name) && argument.is_none() {
            return Ok(CheckResult::fail(
                raw,
                format!("Requirement '{}' needs an argument", token.name),
            ));
        }
        let arg = argument.unwrap_or_default();

        match token.name.as_str() {
            "exists-reftarget" => self.check_reftarget(raw, context).await,
            "navmenu-open" => Ok(self.check_navmenu_open(raw)),
            "is-admin" => self.check_admin(raw).await,
            "is-logged-in" => self.check_logged_in(raw).await,
            "has-role" => self.check_role(raw, arg).await,
            "has-permission" => self.check_permission(raw, arg).await,
            "has-datasources" => self.check_any_data_source(raw).await,
            "has-datasource" => self.check_data_source(raw, arg).await,
            "has-plugin" => self.check_plugin(raw, arg).await,
            "has-dashboard-named" => self.check_dashboard(raw, arg).await,
            "on-page" => Ok(self.check_on_page(raw, arg)),
            "has-feature" => Ok(self.check_feature(raw, arg)),
            "in-environment" => Ok(self.check_environment(raw, arg)),
            "min-version" => Ok(self.check_min_version(raw, arg)),
            "section-completed" => Ok(self.check_section_completed(raw, arg)),
            _ => {
                warn!("Unknown requirement token '{raw}', treating as unmet");
                Ok(CheckResult::fail(raw, format!("Unknown requirement: {raw}")))
            }
        }
    }
}

fn needs_argument(name: &str) -> bool {
    matches!(
        name,
        "has-role"
            | "has-permission"
            | "has-datasource"
            | "has-plugin"
            | "has-dashboard-named"
            | "on-page"
            | "has-feature"
            | "in-environment"
            | "min-version"
            | "section-completed"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tokens_and_arguments() {
        let tokens = parse_requirements(" is-admin, ,has-datasource: Prometheus ,on-page:/a:b");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].name, "is-admin");
        assert_eq!(tokens[0].argument, None);
        assert_eq!(tokens[1].argument.as_deref(), Some("Prometheus"));
        assert_eq!(tokens[2].argument.as_deref(), Some("/a:b"));
    }

    #[test]
    fn reports_unknown_tokens() {
        assert_eq!(
            unknown_requirements("is-admin, needs-coffee, has-plugin:x"),
            vec!["needs-coffee".to_string()]
        );
    }
}
