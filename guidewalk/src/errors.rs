use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuideError {
    #[error("Requirement not met: {0}")]
    RequirementFailed(String),

    #[error("Requirement check timed out: {0}")]
    RequirementTimeout(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Selector matched {count} elements, expected exactly one: {selector}")]
    SelectorAmbiguity { selector: String, count: usize },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Requirement fix failed: {0}")]
    FixFailed(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
