use jsonschema::JSONSchema;
use serde_json::Value;

use crate::errors::GwError;

/// Fixed schema every aggregate submission is validated against before any
/// persistence happens.
pub const AGGREGATE_REQUEST_SCHEMA: &str = include_str!("../schemas/aggregate_request.json");

/// Validates `document` against a JSON Schema given as a string. On failure
/// every violation is reported, not just the first one.
pub fn validate_against_schema(schema: &str, document: &Value) -> Result<(), GwError> {
  let schema_value: Value =
    serde_json::from_str(schema).map_err(|e| GwError::Schema(e.to_string()))?;
  let compiled =
    JSONSchema::compile(&schema_value).map_err(|e| GwError::Schema(e.to_string()))?;

  if let Err(errors) = compiled.validate(document) {
    let details: Vec<String> = errors
      .map(|e| {
        let path = e.instance_path.to_string();
        if path.is_empty() {
          e.to_string()
        } else {
          format!("{}: {}", path, e)
        }
      })
      .collect();
    return Err(GwError::ClientInput(details));
  }
  Ok(())
}

pub fn validate_aggregate_request(document: &Value) -> Result<(), GwError> {
  validate_against_schema(AGGREGATE_REQUEST_SCHEMA, document)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn accepts_well_formed_request() {
    let doc = json!({
      "orgUnit": "ou1",
      "period": "202401",
      "dataSet": "ds1",
      "dataValues": {"BCG": "10"}
    });
    assert!(validate_aggregate_request(&doc).is_ok());
  }

  #[test]
  fn reports_every_missing_field() {
    let doc = json!({"orgUnit": "ou1"});
    let err = validate_aggregate_request(&doc).unwrap_err();
    match err {
      GwError::ClientInput(details) => {
        // period, dataSet and dataValues are all missing
        assert_eq!(details.len(), 3);
      }
      other => panic!("expected ClientInput, got {other:?}"),
    }
  }

  #[test]
  fn reports_type_violations_with_path() {
    let doc = json!({
      "orgUnit": "ou1",
      "period": 202401,
      "dataSet": "ds1",
      "dataValues": {"BCG": "10"}
    });
    let err = validate_aggregate_request(&doc).unwrap_err();
    match err {
      GwError::ClientInput(details) => {
        assert_eq!(details.len(), 1);
        assert!(details[0].contains("/period"), "got: {}", details[0]);
      }
      other => panic!("expected ClientInput, got {other:?}"),
    }
  }
}
