//! Declarative write steps: "write these field values to this entity".

use super::step::{StepScope, TransactionStep};
use crate::error::TxError;
use crate::service::{RequestValidator, RuleSet};
use crate::store::{Fields, ID_FIELD};
use async_trait::async_trait;
use serde_json::Value;

/// Value of one field: given directly, or taken from an earlier step's output
/// (e.g. the `id` of a row created by step 0).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Literal(Value),
    FromStep { step: usize, field: String },
}

impl FieldValue {
    /// The `id` of the row produced by `step`.
    pub fn id_of(step: usize) -> Self {
        FieldValue::FromStep {
            step,
            field: ID_FIELD.to_string(),
        }
    }

    fn resolve(&self, scope: &StepScope<'_>) -> Result<Value, TxError> {
        match self {
            FieldValue::Literal(v) => Ok(v.clone()),
            FieldValue::FromStep { step, field } => {
                if *step >= scope.index() {
                    return Err(TxError::Validation(format!(
                        "step {} cannot read output of step {}",
                        scope.index(),
                        step
                    )));
                }
                scope
                    .output(*step)
                    .and_then(|out| out.get(field))
                    .cloned()
                    .ok_or_else(|| TxError::Validation(format!("step {} produced no field '{}'", step, field)))
            }
        }
    }
}

impl FieldValue {
    pub fn literal(v: impl Into<Value>) -> Self {
        FieldValue::Literal(v.into())
    }
}

#[derive(Clone, Debug)]
enum WriteKind {
    Insert,
    Update { id: FieldValue, expected_version: i64 },
}

/// Insert or versioned update of one entity row. Fields are resolved and validated before
/// the store is touched; a validation failure still rolls back earlier steps.
#[derive(Clone, Debug)]
pub struct WriteStep {
    name: String,
    entity: String,
    kind: WriteKind,
    fields: Vec<(String, FieldValue)>,
    rules: Option<RuleSet>,
}

impl WriteStep {
    pub fn insert(entity: &str) -> Self {
        WriteStep {
            name: format!("create {}", entity),
            entity: entity.to_string(),
            kind: WriteKind::Insert,
            fields: Vec::new(),
            rules: None,
        }
    }

    /// Update `id`, which must still be at `expected_version` when written and at commit.
    pub fn update(entity: &str, id: FieldValue, expected_version: i64) -> Self {
        WriteStep {
            name: format!("update {}", entity),
            entity: entity.to_string(),
            kind: WriteKind::Update {
                id,
                expected_version,
            },
            fields: Vec::new(),
            rules: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn field(self, name: &str, value: impl Into<Value>) -> Self {
        self.field_value(name, FieldValue::literal(value))
    }

    /// Copy `source_field` of step `step`'s output into `name`.
    pub fn field_from(self, name: &str, step: usize, source_field: &str) -> Self {
        self.field_value(
            name,
            FieldValue::FromStep {
                step,
                field: source_field.to_string(),
            },
        )
    }

    pub fn field_value(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.push((name.to_string(), value));
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    fn resolve_fields(&self, scope: &StepScope<'_>) -> Result<Fields, TxError> {
        let mut out = Fields::new();
        for (name, value) in &self.fields {
            out.insert(name.clone(), value.resolve(scope)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl TransactionStep for WriteStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, scope: &mut StepScope<'_>) -> Result<Value, TxError> {
        let fields = self.resolve_fields(scope)?;
        match &self.kind {
            WriteKind::Insert => {
                if let Some(rules) = &self.rules {
                    RequestValidator::validate(&fields, rules)?;
                }
                scope.store().insert(&self.entity, &fields).await
            }
            WriteKind::Update { id, expected_version } => {
                if let Some(rules) = &self.rules {
                    RequestValidator::validate_partial(&fields, rules)?;
                }
                let id = id
                    .resolve(scope)?
                    .as_i64()
                    .ok_or_else(|| TxError::Validation(format!("{} id must be an integer", self.entity)))?;
                scope
                    .store()
                    .update(&self.entity, id, *expected_version, &fields)
                    .await
            }
        }
    }
}
