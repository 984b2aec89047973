//! Entities of the taskboard domain, their field rules and the write steps that create them.

use super::validation::{RuleSet, ValidationRule};
use crate::transaction::{FieldValue, WriteStep};

pub const PROJECT: &str = "project";
pub const TASK: &str = "task";
pub const USER: &str = "user";

const NAME_MAX: u32 = 200;
const TITLE_MAX: u32 = 200;

pub fn project_rules() -> RuleSet {
    RuleSet::from([
        ("name".to_string(), ValidationRule::required().max_length(NAME_MAX)),
        ("userId".to_string(), ValidationRule::required().minimum(1.0)),
    ])
}

pub fn task_rules() -> RuleSet {
    RuleSet::from([
        ("title".to_string(), ValidationRule::required().max_length(TITLE_MAX)),
        ("projectId".to_string(), ValidationRule::required().minimum(1.0)),
    ])
}

pub fn user_rules() -> RuleSet {
    RuleSet::from([("email".to_string(), ValidationRule::required().format("email"))])
}

pub fn create_project(name: &str, user_id: i64) -> WriteStep {
    WriteStep::insert(PROJECT)
        .field("name", name)
        .field("userId", user_id)
        .rules(project_rules())
}

/// `title: None` writes an explicit null, which the task rules reject.
pub fn create_task(title: Option<&str>, project_id: FieldValue) -> WriteStep {
    WriteStep::insert(TASK)
        .field("title", title)
        .field_value("projectId", project_id)
        .rules(task_rules())
}

pub fn create_user(email: &str, name: &str) -> WriteStep {
    WriteStep::insert(USER)
        .field("email", email)
        .field("name", name)
        .rules(user_rules())
}

pub fn rename_project(id: i64, expected_version: i64, name: &str) -> WriteStep {
    WriteStep::update(PROJECT, FieldValue::literal(id), expected_version)
        .named("rename project")
        .field("name", name)
        .rules(project_rules())
}
