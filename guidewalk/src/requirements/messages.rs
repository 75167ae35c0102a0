use super::{RequirementToken, RequirementsResult};

pub const DEFAULT_EXPLANATION: &str = "Requirements not met";

/// User-facing text for a requirement token, `None` for unknown tokens.
pub fn requirement_message(token: &str) -> Option<String> {
    let token = RequirementToken::parse(token)?;
    let arg = token.argument.as_deref().unwrap_or_default();

    let message = match token.name.as_str() {
        "exists-reftarget" => "The element for this step must be visible on the page.".to_string(),
        "navmenu-open" => "Open the navigation menu to continue.".to_string(),
        "is-admin" => "You need administrator privileges for this step.".to_string(),
        "is-logged-in" => "Sign in to continue.".to_string(),
        "has-role" => format!("This step requires the {arg} role."),
        "has-permission" => format!("You need the '{arg}' permission for this step."),
        "has-datasources" => "Add at least one data source first.".to_string(),
        "has-datasource" => format!("The '{arg}' data source must be configured."),
        "has-plugin" => format!("The '{arg}' plugin must be installed and enabled."),
        "has-dashboard-named" => format!("A dashboard named '{arg}' must exist."),
        "on-page" => format!("Go to {arg} to continue."),
        "has-feature" => format!("The '{arg}' feature must be enabled."),
        "in-environment" => format!("This step is only available in the {arg} environment."),
        "min-version" => format!("This step requires version {arg} or newer."),
        "section-completed" => format!("Complete the '{arg}' section first."),
        _ => return None,
    };
    Some(message)
}

/// Explanation shown for a failed check: hint, then mapped message, then raw error.
pub fn explanation_for(hint: Option<&str>, result: &RequirementsResult) -> String {
    if let Some(hint) = hint.filter(|h| !h.trim().is_empty()) {
        return hint.to_string();
    }
    let Some(failure) = result.first_failure() else {
        return DEFAULT_EXPLANATION.to_string();
    };
    requirement_message(&failure.requirement)
        .or_else(|| failure.error.clone())
        .unwrap_or_else(|| DEFAULT_EXPLANATION.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::CheckResult;
    use super::*;

    fn failed(requirement: &str, error: &str) -> RequirementsResult {
        RequirementsResult {
            pass: false,
            results: vec![
                CheckResult::pass("is-logged-in"),
                CheckResult::fail(requirement, error),
            ],
        }
    }

    #[test]
    fn hint_wins_over_everything() {
        let result = failed("has-datasources", "No data sources found");
        assert_eq!(explanation_for(Some("Add Prometheus"), &result), "Add Prometheus");
    }

    #[test]
    fn mapped_message_then_raw_error() {
        let result = failed("has-datasources", "No data sources found");
        assert_eq!(
            explanation_for(None, &result),
            "Add at least one data source first."
        );
        let unknown = failed("needs-coffee", "Unknown requirement: needs-coffee");
        assert_eq!(
            explanation_for(Some("  "), &unknown),
            "Unknown requirement: needs-coffee"
        );
        assert_eq!(
            explanation_for(None, &RequirementsResult::default()),
            DEFAULT_EXPLANATION
        );
    }
}
