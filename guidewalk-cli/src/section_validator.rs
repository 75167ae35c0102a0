use colored::*;
use guidewalk::requirements::unknown_requirements;
use guidewalk::{ActionDescriptor, Section};
use std::collections::HashSet;

/// Static problems found in a guide's sections
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub sections: usize,
    pub steps: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn print(&self, source: &str) {
        if self.is_valid() {
            println!(
                "{} {source}: {} section(s), {} step(s)",
                "✔".green(),
                self.sections,
                self.steps
            );
        } else {
            println!("{} {source}", "✘".red());
        }
        for error in &self.errors {
            println!("  {} {error}", "error:".red().bold());
        }
        for warning in &self.warnings {
            println!("  {} {warning}", "warning:".yellow());
        }
    }
}

pub fn validate(sections: &[Section]) -> ValidationResult {
    let mut result = ValidationResult {
        sections: sections.len(),
        ..Default::default()
    };
    let mut section_ids = HashSet::new();
    let mut step_ids = HashSet::new();

    for section in sections {
        if !section_ids.insert(section.id.as_str()) {
            result
                .errors
                .push(format!("Duplicate section id '{}'", section.id));
        }
        if section.steps.is_empty() {
            result
                .warnings
                .push(format!("Section '{}' has no steps", section.id));
        }
        for (label, predicate) in [
            ("requirements", section.requirements()),
            ("objectives", section.objectives()),
        ] {
            check_predicate(&mut result, &format!("Section '{}'", section.id), label, predicate);
        }

        for step in &section.steps {
            result.steps += 1;
            let owner = format!("Step '{}'", step.id);
            if !step_ids.insert(step.id.as_str()) {
                result.errors.push(format!("Duplicate step id '{}'", step.id));
            }
            if step.actions().is_empty() {
                result.errors.push(format!("{owner} has no actions"));
            }
            for action in step.actions() {
                if let Err(e) = action.validate() {
                    result.errors.push(format!("{owner}: {e}"));
                }
                if matches!(action, ActionDescriptor::Hover { .. }) && !step.is_guided() {
                    result.warnings.push(format!(
                        "{owner} hovers {} outside a guided step",
                        action.target()
                    ));
                }
            }
            for (label, predicate) in [
                ("requirements", step.requirements()),
                ("objectives", step.objectives()),
                ("verify", step.verify()),
            ] {
                check_predicate(&mut result, &owner, label, predicate);
            }
        }
    }
    result
}

fn check_predicate(result: &mut ValidationResult, owner: &str, label: &str, predicate: Option<&str>) {
    let Some(predicate) = predicate else {
        return;
    };
    let unknown = unknown_requirements(predicate);
    if !unknown.is_empty() {
        // unknown tokens always fail at runtime
        result.errors.push(format!(
            "{owner} {label} use unknown requirement(s): {}",
            unknown.join(", ")
        ));
    }
}
