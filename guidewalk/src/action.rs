use crate::errors::GuideError;
use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A declared interaction a guide step wants performed.
///
/// `target` is button text for `Button`, a path or absolute URL for
/// `Navigate`, and a selector for every other kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionDescriptor {
    Button {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Highlight {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    FormFill {
        target: String,
        #[serde(default)]
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Navigate {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Hover {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Sequence {
        target: String,
        #[serde(default)]
        steps: Vec<ActionDescriptor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Button,
    Highlight,
    FormFill,
    Navigate,
    Hover,
    Sequence,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Button => "button",
            ActionKind::Highlight => "highlight",
            ActionKind::FormFill => "formfill",
            ActionKind::Navigate => "navigate",
            ActionKind::Hover => "hover",
            ActionKind::Sequence => "sequence",
        };
        f.write_str(name)
    }
}

/// Kind of an interaction observed from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectedActionType {
    Button,
    Highlight,
    FormFill,
    Navigate,
    Hover,
}

/// `Show` outlines the target without changing page state; `Do` performs the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Show,
    Do,
}

impl ActionDescriptor {
    pub fn button(target: impl Into<String>) -> Self {
        ActionDescriptor::Button {
            target: target.into(),
            comment: None,
        }
    }

    pub fn highlight(target: impl Into<String>) -> Self {
        ActionDescriptor::Highlight {
            target: target.into(),
            comment: None,
        }
    }

    pub fn form_fill(target: impl Into<String>, value: impl Into<String>) -> Self {
        ActionDescriptor::FormFill {
            target: target.into(),
            value: value.into(),
            comment: None,
        }
    }

    pub fn navigate(target: impl Into<String>) -> Self {
        ActionDescriptor::Navigate {
            target: target.into(),
            comment: None,
        }
    }

    pub fn hover(target: impl Into<String>) -> Self {
        ActionDescriptor::Hover {
            target: target.into(),
            comment: None,
        }
    }

    pub fn sequence(target: impl Into<String>, steps: Vec<ActionDescriptor>) -> Self {
        ActionDescriptor::Sequence {
            target: target.into(),
            steps,
            comment: None,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ActionDescriptor::Button { .. } => ActionKind::Button,
            ActionDescriptor::Highlight { .. } => ActionKind::Highlight,
            ActionDescriptor::FormFill { .. } => ActionKind::FormFill,
            ActionDescriptor::Navigate { .. } => ActionKind::Navigate,
            ActionDescriptor::Hover { .. } => ActionKind::Hover,
            ActionDescriptor::Sequence { .. } => ActionKind::Sequence,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            ActionDescriptor::Button { target, .. }
            | ActionDescriptor::Highlight { target, .. }
            | ActionDescriptor::FormFill { target, .. }
            | ActionDescriptor::Navigate { target, .. }
            | ActionDescriptor::Hover { target, .. }
            | ActionDescriptor::Sequence { target, .. } => target,
        }
    }

    pub fn comment(&self) -> Option<&str> {
        match self {
            ActionDescriptor::Button { comment, .. }
            | ActionDescriptor::Highlight { comment, .. }
            | ActionDescriptor::FormFill { comment, .. }
            | ActionDescriptor::Navigate { comment, .. }
            | ActionDescriptor::Hover { comment, .. }
            | ActionDescriptor::Sequence { comment, .. } => comment.as_deref(),
        }
    }

    /// Declared form value, `None` for other kinds or an empty value.
    pub fn value(&self) -> Option<&str> {
        match self {
            ActionDescriptor::FormFill { value, .. } if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        let text = Some(text.into());
        match &mut self {
            ActionDescriptor::Button { comment, .. }
            | ActionDescriptor::Highlight { comment, .. }
            | ActionDescriptor::FormFill { comment, .. }
            | ActionDescriptor::Navigate { comment, .. }
            | ActionDescriptor::Hover { comment, .. }
            | ActionDescriptor::Sequence { comment, .. } => *comment = text,
        }
        self
    }

    /// Parsed target for selector-based kinds.
    pub fn selector(&self) -> Option<Selector> {
        match self {
            ActionDescriptor::Button { .. } | ActionDescriptor::Navigate { .. } => None,
            other => Some(Selector::from(other.target())),
        }
    }

    /// Static validation: non-empty targets and parsable selectors, recursively.
    pub fn validate(&self) -> Result<(), GuideError> {
        if self.target().trim().is_empty() {
            return Err(GuideError::InvalidArgument(format!(
                "{} action has an empty target",
                self.kind()
            )));
        }
        if self.selector().is_some() {
            Selector::parse(self.target())?;
        }
        if let ActionDescriptor::Sequence { steps, .. } = self {
            for step in steps {
                step.validate()?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.kind(), self.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_tagged_descriptors() {
        let json = r#"[
            {"kind": "button", "target": "Save"},
            {"kind": "formfill", "target": "input[name='q']", "value": "cpu"},
            {"kind": "sequence", "target": "form", "steps": [{"kind": "hover", "target": "label"}]}
        ]"#;
        let actions: Vec<ActionDescriptor> = serde_json::from_str(json).unwrap();
        assert_eq!(actions[0], ActionDescriptor::button("Save"));
        assert_eq!(actions[1].value(), Some("cpu"));
        assert_eq!(actions[2].kind(), ActionKind::Sequence);
    }

    #[test]
    fn validate_rejects_bad_selectors() {
        assert!(ActionDescriptor::highlight("div[").validate().is_err());
        assert!(ActionDescriptor::button("  ").validate().is_err());
        assert!(ActionDescriptor::button("Save (draft)").validate().is_ok());
        let nested = ActionDescriptor::sequence("form", vec![ActionDescriptor::hover(":bogus(x)")]);
        assert!(nested.validate().is_err());
    }
}
