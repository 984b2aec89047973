//! Field validation rules checked before a write reaches the store.

use crate::error::TxError;
use crate::store::Fields;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationRule {
    pub required: Option<bool>,
    pub format: Option<String>,
    pub max_length: Option<u32>,
    pub min_length: Option<u32>,
    pub pattern: Option<String>,
    pub allowed: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl ValidationRule {
    pub fn required() -> Self {
        ValidationRule {
            required: Some(true),
            ..Default::default()
        }
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    pub fn minimum(mut self, n: f64) -> Self {
        self.minimum = Some(n);
        self
    }
}

/// Rules per field, checked in field-name order so the first reported error is deterministic.
pub type RuleSet = BTreeMap<String, ValidationRule>;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate body against per-field rules. Required fields must be present, non-null and,
    /// for strings, non-empty.
    pub fn validate(body: &Fields, rules: &RuleSet) -> Result<(), TxError> {
        for (col, rule) in rules {
            let val = body.get(col);
            if rule.required == Some(true) && is_blank(val) {
                return Err(TxError::Validation(format!("Missing required field: {}", col)));
            }
            if let Some(v) = val {
                validate_field(col, v, rule)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for updates). Required is not enforced for missing fields.
    pub fn validate_partial(body: &Fields, rules: &RuleSet) -> Result<(), TxError> {
        for (col, v) in body {
            if let Some(rule) = rules.get(col) {
                if rule.required == Some(true) && is_blank(Some(v)) {
                    return Err(TxError::Validation(format!("Missing required field: {}", col)));
                }
                validate_field(col, v, rule)?;
            }
        }
        Ok(())
    }
}

fn is_blank(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn validate_field(col: &str, v: &Value, rule: &ValidationRule) -> Result<(), TxError> {
    if v.is_null() {
        return Ok(());
    }
    if let Some(format) = &rule.format {
        validate_format(col, v, format)?;
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                return Err(TxError::Validation(format!("{} must be at most {} characters", col, max)));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                return Err(TxError::Validation(format!("{} must be at least {} characters", col, min)));
            }
        }
        if let Some(pattern) = &rule.pattern {
            let re = Regex::new(pattern)
                .map_err(|_| TxError::Internal(format!("invalid pattern for {}", col)))?;
            if !re.is_match(s) {
                return Err(TxError::Validation(format!("{} does not match required pattern", col)));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(TxError::Validation(format!(
                "{} must be one of: {:?}",
                col,
                allowed.iter().take(5).collect::<Vec<_>>()
            )));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(TxError::Validation(format!("{} must be at least {}", col, min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(TxError::Validation(format!("{} must be at most {}", col, max)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(col: &str, v: &Value, format: &str) -> Result<(), TxError> {
    let Some(s) = v.as_str() else {
        return Ok(());
    };
    match format.to_lowercase().as_str() {
        "email" => {
            if !s.contains('@') || s.len() < 3 {
                return Err(TxError::Validation(format!("{} must be a valid email", col)));
            }
        }
        "uuid" => {
            if uuid::Uuid::parse_str(s).is_err() {
                return Err(TxError::Validation(format!("{} must be a valid UUID", col)));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    fn title_rules() -> RuleSet {
        RuleSet::from([("title".to_string(), ValidationRule::required().max_length(5))])
    }

    #[test]
    fn missing_null_and_empty_required_fields_fail() {
        for b in [json!({}), json!({ "title": null }), json!({ "title": "" })] {
            let err = RequestValidator::validate(&body(b), &title_rules()).unwrap_err();
            assert_eq!(err, TxError::Validation("Missing required field: title".into()));
        }
    }

    #[test]
    fn max_length_counts_characters() {
        assert!(RequestValidator::validate(&body(json!({ "title": "héllo" })), &title_rules()).is_ok());
        assert!(RequestValidator::validate(&body(json!({ "title": "toolong" })), &title_rules()).is_err());
    }

    #[test]
    fn partial_skips_absent_required_fields() {
        assert!(RequestValidator::validate_partial(&Fields::new(), &title_rules()).is_ok());
        assert!(RequestValidator::validate_partial(&body(json!({ "title": null })), &title_rules()).is_err());
    }

    #[test]
    fn formats() {
        let rules = RuleSet::from([
            ("email".to_string(), ValidationRule::default().format("email")),
            ("ref".to_string(), ValidationRule::default().format("uuid")),
        ]);
        assert!(RequestValidator::validate(&body(json!({ "email": "a@b.io" })), &rules).is_ok());
        assert!(RequestValidator::validate(&body(json!({ "email": "nope" })), &rules).is_err());
        assert!(RequestValidator::validate(&body(json!({ "ref": "not-a-uuid" })), &rules).is_err());
    }

    #[test]
    fn pattern_allowed_and_bounds() {
        let rules = RuleSet::from([
            (
                "code".to_string(),
                ValidationRule {
                    pattern: Some("^[A-Z]+$".into()),
                    ..Default::default()
                },
            ),
            (
                "status".to_string(),
                ValidationRule {
                    allowed: Some(vec![json!("open"), json!("done")]),
                    ..Default::default()
                },
            ),
            ("priority".to_string(), ValidationRule::default().minimum(1.0)),
        ]);
        assert!(RequestValidator::validate(&body(json!({ "code": "ABC", "status": "open", "priority": 2 })), &rules).is_ok());
        assert!(RequestValidator::validate(&body(json!({ "code": "abc" })), &rules).is_err());
        assert!(RequestValidator::validate(&body(json!({ "status": "later" })), &rules).is_err());
        assert!(RequestValidator::validate(&body(json!({ "priority": 0 })), &rules).is_err());
    }
}
