use jsonschema::Validator;
use serde_json::Value;

use crate::errors::Error;

/// Schema for the reviewer verdict: `{"requires_fix": bool, "feedback": string}`.
pub const REVIEW_VERDICT_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["requires_fix", "feedback"],
  "properties": {
    "requires_fix": { "type": "boolean" },
    "feedback": { "type": "string" }
  }
}"#;

/// Schema for the planner decomposition: either a task list or a clarification question.
pub const DECOMPOSITION_SCHEMA: &str = r#"{
  "type": "object",
  "anyOf": [
    {
      "required": ["tasks"],
      "properties": {
        "tasks": {
          "type": "array",
          "items": {
            "type": "object",
            "required": ["role", "description"],
            "properties": {
              "role": { "type": "string" },
              "description": { "type": "string" }
            }
          }
        }
      }
    },
    {
      "required": ["clarification"],
      "properties": { "clarification": { "type": "string", "minLength": 1 } }
    }
  ]
}"#;

/// Creates a JSON Schema validator from a schema string
///
/// # Arguments
/// * `schema_content` - The JSON Schema as a string
///
/// # Returns
/// * `Result<Validator, Error>` - The compiled validator on success, or an error
pub fn build_validator(schema_content: &str) -> Result<Validator, Error> {
    let schema = serde_json::from_str(schema_content)?;
    Ok(jsonschema::validator_for(&schema)?)
}

/// Validates a JSON string against a schema validator
///
/// # Returns
/// * `Result<bool, Error>` - True if valid, false if invalid, or an error if `response` is not JSON
pub fn validate_response(schema: &Validator, response: &str) -> Result<bool, Error> {
    let val: Value = serde_json::from_str(response)?;
    Ok(schema.is_valid(&val))
}

/// Parses `response` and returns it only if it matches `schema_content`.
pub fn parse_validated(schema_content: &str, response: &str) -> Result<Value, Error> {
    let validator = build_validator(schema_content)?;
    let val: Value = serde_json::from_str(response)?;
    if validator.is_valid(&val) {
        Ok(val)
    } else {
        Err(Error::Schema(format!(
            "response does not match the expected structure: {}",
            response.chars().take(120).collect::<String>()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_schema_accepts_expected_shape() {
        let validator = build_validator(REVIEW_VERDICT_SCHEMA).unwrap();
        assert!(validate_response(&validator, r#"{"requires_fix": false, "feedback": "ok"}"#).unwrap());
        assert!(!validate_response(&validator, r#"{"requires_fix": "no"}"#).unwrap());
        assert!(validate_response(&validator, "not json").is_err());
    }

    #[test]
    fn decomposition_schema_accepts_tasks_or_clarification() {
        assert!(parse_validated(
            DECOMPOSITION_SCHEMA,
            r#"{"tasks": [{"role": "Coder", "description": "Build it"}]}"#
        )
        .is_ok());
        assert!(parse_validated(DECOMPOSITION_SCHEMA, r#"{"clarification": "Which colors?"}"#).is_ok());
        assert!(parse_validated(DECOMPOSITION_SCHEMA, r#"{"tasks": [{"role": 3}]}"#).is_err());
    }
}
