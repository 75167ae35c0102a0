use super::version::Version;
use super::{CheckContext, CheckResult, FixType, RequirementEvaluator};
use crate::action::ActionDescriptor;
use crate::element::PageElement;
use crate::environment::OrgRole;
use crate::errors::GuideError;
use crate::locator::find_buttons_by_text;
use crate::selector::Selector;
use tracing::debug;

impl RequirementEvaluator {
    fn any_visible(&self, selector: &str) -> bool {
        self.page
            .query_all(&Selector::from(selector), None)
            .map(|found| found.iter().any(PageElement::is_visible))
            .unwrap_or(false)
    }

    pub(crate) fn nav_menu_open(&self) -> bool {
        self.any_visible(&self.navigation.menu)
    }

    pub(super) async fn check_reftarget(
        &self,
        raw: &str,
        context: &CheckContext,
    ) -> Result<CheckResult, GuideError> {
        let Some(action) = &context.action else {
            return Ok(CheckResult::fail(raw, "No target element specified"));
        };

        let found = match action {
            ActionDescriptor::Navigate { .. } => return Ok(CheckResult::pass(raw)),
            ActionDescriptor::Button { target, .. } => {
                !find_buttons_by_text(self.page.as_ref(), target, None)?.is_empty()
            }
            other => {
                let selector = Selector::parse(other.target())?;
                self.page
                    .query_all(&selector, None)?
                    .iter()
                    .any(PageElement::is_visible)
            }
        };

        if found {
            return Ok(CheckResult::pass(raw));
        }

        let failed = CheckResult::fail(raw, format!("Element not found: {}", action.target()));
        if !self.nav_menu_open() {
            debug!("Target missing with navigation closed, offering to open it");
            return Ok(failed.with_fix(FixType::Navigation, None));
        }
        let href = action
            .selector()
            .and_then(|s| s.attribute_value("href").map(str::to_string));
        Ok(match href {
            Some(href) => failed.with_fix(FixType::ExpandParentNavigation, Some(href)),
            None => failed,
        })
    }

    pub(super) fn check_navmenu_open(&self, raw: &str) -> CheckResult {
        if self.nav_menu_open() {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(raw, "Navigation menu is not open").with_fix(FixType::Navigation, None)
        }
    }

    pub(super) async fn check_admin(&self, raw: &str) -> Result<CheckResult, GuideError> {
        let user = self.environment.current_user().await?;
        Ok(if user.org_role == OrgRole::Admin || user.is_server_admin {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(raw, "User is not an admin")
        })
    }

    pub(super) async fn check_logged_in(&self, raw: &str) -> Result<CheckResult, GuideError> {
        let user = self.environment.current_user().await?;
        Ok(if user.is_signed_in {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(raw, "User is not logged in")
        })
    }

    pub(super) async fn check_role(&self, raw: &str, role: &str) -> Result<CheckResult, GuideError> {
        let user = self.environment.current_user().await?;
        if role.eq_ignore_ascii_case("grafana-admin") || role.eq_ignore_ascii_case("server-admin") {
            return Ok(if user.is_server_admin {
                CheckResult::pass(raw)
            } else {
                CheckResult::fail(raw, "User is not a server admin")
            });
        }
        let Some(required) = OrgRole::parse(role) else {
            return Ok(CheckResult::fail(raw, format!("Unknown role: {role}")));
        };
        Ok(if user.is_server_admin || user.org_role >= required {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(
                raw,
                format!("User role {:?} is below required role {role}", user.org_role),
            )
        })
    }

    pub(super) async fn check_permission(
        &self,
        raw: &str,
        permission: &str,
    ) -> Result<CheckResult, GuideError> {
        Ok(if self.environment.has_permission(permission).await? {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(raw, format!("Missing permission: {permission}"))
        })
    }

    pub(super) async fn check_any_data_source(&self, raw: &str) -> Result<CheckResult, GuideError> {
        Ok(if self.environment.data_sources().await?.is_empty() {
            CheckResult::fail(raw, "No data sources found")
        } else {
            CheckResult::pass(raw)
        })
    }

    pub(super) async fn check_data_source(&self, raw: &str, wanted: &str) -> Result<CheckResult, GuideError> {
        let found = self.environment.data_sources().await?.iter().any(|ds| {
            ds.name.eq_ignore_ascii_case(wanted)
                || ds.uid.eq_ignore_ascii_case(wanted)
                || ds.kind.eq_ignore_ascii_case(wanted)
        });
        Ok(if found {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(raw, format!("Data source '{wanted}' not found"))
        })
    }

    pub(super) async fn check_plugin(&self, raw: &str, plugin_id: &str) -> Result<CheckResult, GuideError> {
        let plugins = self.environment.plugins().await?;
        Ok(match plugins.iter().find(|p| p.id.eq_ignore_ascii_case(plugin_id)) {
            Some(plugin) if plugin.enabled => CheckResult::pass(raw),
            Some(_) => CheckResult::fail(raw, format!("Plugin '{plugin_id}' is installed but disabled")),
            None => CheckResult::fail(raw, format!("Plugin '{plugin_id}' is not installed")),
        })
    }

    pub(super) async fn check_dashboard(&self, raw: &str, title: &str) -> Result<CheckResult, GuideError> {
        let found = self
            .environment
            .search_dashboards(title)
            .await?
            .iter()
            .any(|d| d.title.eq_ignore_ascii_case(title));
        Ok(if found {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(raw, format!("Dashboard '{title}' not found"))
        })
    }

    pub(super) fn check_on_page(&self, raw: &str, path: &str) -> CheckResult {
        let current = self.page.current_path();
        if current.starts_with(path) {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(raw, format!("Current page is {current}, expected {path}"))
                .with_fix(FixType::Location, Some(path.to_string()))
        }
    }

    pub(super) fn check_feature(&self, raw: &str, feature: &str) -> CheckResult {
        if self.environment.feature_enabled(feature) {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(raw, format!("Feature '{feature}' is not enabled"))
        }
    }

    pub(super) fn check_environment(&self, raw: &str, expected: &str) -> CheckResult {
        let actual = self.environment.deployment_environment();
        if actual.eq_ignore_ascii_case(expected) {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(raw, format!("Environment is '{actual}', expected '{expected}'"))
        }
    }

    pub(super) fn check_min_version(&self, raw: &str, required: &str) -> CheckResult {
        let Some(required_version) = Version::parse(required) else {
            return CheckResult::fail(raw, format!("Invalid version requirement: {required}"));
        };
        let current = self.environment.version();
        let Some(current_version) = Version::parse(&current) else {
            return CheckResult::fail(raw, format!("Unable to determine current version from '{current}'"));
        };
        if current_version >= required_version {
            CheckResult::pass(raw)
        } else {
            CheckResult::fail(
                raw,
                format!("Version {current_version} does not meet minimum requirement {required_version}"),
            )
        }
    }

    pub(super) fn check_section_completed(&self, raw: &str, section_id: &str) -> CheckResult {
        match &self.sections {
            Some(sections) if sections.is_section_completed(section_id) => CheckResult::pass(raw),
            Some(_) => CheckResult::fail(raw, format!("Section '{section_id}' is not completed")),
            None => CheckResult::fail(raw, "Section completion is not tracked"),
        }
    }
}
