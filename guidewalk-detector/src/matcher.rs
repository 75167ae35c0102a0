//! Matching detected user actions against declared step actions.

use crate::events::DetectedAction;
use guidewalk::{ActionDescriptor, ActionKind, DetectedActionType, PageElement, Selector};
use regex::Regex;
use tracing::{debug, trace};

/// Whether a detected action type can satisfy a declared action kind.
///
/// Exact types always match. A click on a non-button element satisfies a
/// declared button press, and a navigation satisfies a declared highlight
/// (clicking a highlighted menu link usually routes). Not the other way round.
pub fn type_compatible(detected: DetectedActionType, declared: ActionKind) -> bool {
    matches!(
        (detected, declared),
        (DetectedActionType::Button, ActionKind::Button)
            | (DetectedActionType::Highlight, ActionKind::Highlight)
            | (DetectedActionType::FormFill, ActionKind::FormFill)
            | (DetectedActionType::Navigate, ActionKind::Navigate)
            | (DetectedActionType::Hover, ActionKind::Hover)
            | (DetectedActionType::Highlight, ActionKind::Button)
            | (DetectedActionType::Navigate, ActionKind::Highlight)
    )
}

/// Whether `detected` fulfils `declared`.
///
/// `resolved` is the element the declared target currently resolves to on the
/// page, if known. A declared sequence only checks that the action happened
/// inside its container; its nested actions are matched one by one.
pub fn matches(
    detected: &DetectedAction,
    declared: &ActionDescriptor,
    resolved: Option<&PageElement>,
) -> bool {
    if let ActionDescriptor::Sequence { target, .. } = declared {
        return inside_container(detected, target);
    }

    if !type_compatible(detected.action_type, declared.kind()) {
        trace!(
            "{:?} cannot satisfy declared {}",
            detected.action_type,
            declared.kind()
        );
        return false;
    }

    let matched = match (&detected.element, declared) {
        (None, ActionDescriptor::Navigate { target, .. }) => detected
            .value
            .as_deref()
            .is_some_and(|path| paths_match(path, target)),
        (None, ActionDescriptor::Highlight { target, .. }) => {
            let href = Selector::from(target.as_str())
                .attribute_value("href")
                .map(str::to_string);
            match (detected.value.as_deref(), href) {
                (Some(path), Some(href)) => paths_match(path, &href),
                _ => false,
            }
        }
        (None, _) => false,
        (Some(element), declared) => {
            element_matches(element, declared, resolved)
                && match declared {
                    ActionDescriptor::FormFill { value, .. } => {
                        value_matches(element, detected.value.as_deref(), value)
                    }
                    _ => true,
                }
        }
    };

    if matched {
        debug!("{:?} on {} matches {declared}", detected.action_type, detected.identity);
    }
    matched
}

/// Whether the detected element sits in the container `target` selects.
/// Navigations carry no element and always count as inside.
pub fn inside_container(detected: &DetectedAction, target: &str) -> bool {
    let container = Selector::from(target);
    detected
        .element
        .as_ref()
        .map_or(true, |element| element.closest(&container).is_some())
}

/// Element identity check, tried in order: test id, selector (including
/// ancestors), resolved element containment, accessible label, then text.
pub fn element_matches(
    element: &PageElement,
    declared: &ActionDescriptor,
    resolved: Option<&PageElement>,
) -> bool {
    let target = declared.target().trim();
    if target.is_empty() {
        return false;
    }
    let selector = declared.selector();

    let wanted_test_id = match &selector {
        Some(selector) => selector.attribute_value("data-testid").map(str::to_string),
        None => Some(target.to_string()),
    };
    if let (Some(wanted), Some(actual)) = (wanted_test_id, element.test_id()) {
        if wanted == actual {
            return true;
        }
    }

    if let Some(selector) = selector.as_ref().filter(|s| s.is_valid()) {
        if element.matches(selector) || element.closest(selector).is_some() {
            return true;
        }
    }

    if let Some(resolved) = resolved {
        if resolved == element || resolved.contains(element) {
            return true;
        }
    }

    if !matches!(declared, ActionDescriptor::Button { .. }) {
        return false;
    }

    let wanted = normalize(target);
    if element
        .aria_label()
        .is_some_and(|label| normalize(&label) == wanted)
    {
        return true;
    }
    let text = normalize(&element.label_text());
    !text.is_empty() && (text == wanted || text.contains(&wanted))
}

/// Compare a filled value with the declared one.
///
/// An empty declared value accepts anything. `/pattern/` is a regular
/// expression. Checkboxes and radios compare their checked state.
pub fn value_matches(element: &PageElement, actual: Option<&str>, declared: &str) -> bool {
    let declared = declared.trim();
    if declared.is_empty() {
        return true;
    }

    if element.is_checkable() {
        let wanted = !matches!(
            declared.to_lowercase().as_str(),
            "false" | "off" | "no" | "0" | "unchecked"
        );
        return element.is_checked() == wanted;
    }

    let actual = actual.map(str::trim).unwrap_or_default();
    if declared.len() > 2 && declared.starts_with('/') && declared.ends_with('/') {
        match Regex::new(&declared[1..declared.len() - 1]) {
            Ok(pattern) => return pattern.is_match(actual),
            Err(e) => debug!("Declared value {declared} is not a valid pattern: {e}"),
        }
    }
    actual == declared
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn paths_match(actual: &str, declared: &str) -> bool {
    fn clean(path: &str) -> &str {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            "/"
        } else {
            path
        }
    }
    let declared = declared.trim();
    let declared = if declared.starts_with('/') || declared.contains("://") {
        declared.to_string()
    } else {
        format!("/{declared}")
    };
    clean(actual.trim()) == clean(&declared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_is_asymmetric() {
        assert!(type_compatible(DetectedActionType::Highlight, ActionKind::Button));
        assert!(!type_compatible(DetectedActionType::Button, ActionKind::Highlight));
        assert!(type_compatible(DetectedActionType::Navigate, ActionKind::Highlight));
        assert!(!type_compatible(DetectedActionType::Highlight, ActionKind::Navigate));
        assert!(!type_compatible(DetectedActionType::Hover, ActionKind::Sequence));
    }

    #[test]
    fn paths_ignore_query_and_trailing_slash() {
        assert!(paths_match("/dashboards/?orgId=1", "/dashboards"));
        assert!(paths_match("/connections", "connections"));
        assert!(!paths_match("/connections/new", "/connections"));
    }

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(normalize("  Save\n  Dashboard "), "save dashboard");
    }
}
