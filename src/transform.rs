use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashMap;

use crate::mapping::Mapping;
use crate::models::{AggregateRequest, DataValue, DataValueSetPayload};

/// Coerces a submitted scalar into the textual form DHIS2 expects. Strings
/// pass through, numbers and booleans use their canonical rendering, and
/// anything else becomes an empty string rather than an error.
pub fn coerce_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    _ => String::new(),
  }
}

/// Translates submitted field codes into DHIS2 data values. Keys with no
/// entry in the mapping table are silently dropped; callers that want to know
/// about unmapped codes can diff against the input themselves.
pub fn convert_data_values(
  input: &HashMap<String, Value>,
  mappings: &HashMap<String, Mapping>,
) -> Vec<DataValue> {
  let mut data_values = Vec::with_capacity(input.len());
  for (key, value) in input {
    if let Some(m) = mappings.get(key) {
      data_values.push(DataValue {
        data_element: m.dataelement.clone(),
        value: coerce_value(value),
        category_option_combo: m.category_option_combo.clone(),
      });
    }
  }
  data_values
}

impl AggregateRequest {
  /// Builds the downstream wire payload. The completion date is injected so
  /// the conversion itself stays a pure function of its inputs.
  pub fn to_dhis2_payload(
    &self,
    mappings: &HashMap<String, Mapping>,
    complete_date: NaiveDate,
  ) -> DataValueSetPayload {
    DataValueSetPayload {
      data_set: self.data_set.clone(),
      period: self.period.clone(),
      org_unit: self.org_unit.clone(),
      complete_date: complete_date.format("%Y-%m-%d").to_string(),
      data_values: convert_data_values(&self.data_values, mappings),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mapping::test_mapping;
  use serde_json::json;

  fn bcg_mappings() -> HashMap<String, Mapping> {
    let mut mappings = HashMap::new();
    mappings.insert("BCG".to_string(), test_mapping("BCG", "de1", "coc1"));
    mappings
  }

  fn request(data_values: Value) -> AggregateRequest {
    serde_json::from_value(json!({
      "orgUnit": "ou1",
      "period": "202401",
      "dataSet": "ds1",
      "dataValues": data_values
    }))
    .unwrap()
  }

  #[test]
  fn mapped_code_produces_single_data_value() {
    let req = request(json!({"BCG": "10"}));
    let payload = req.to_dhis2_payload(&bcg_mappings(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    assert_eq!(payload.data_set, "ds1");
    assert_eq!(payload.org_unit, "ou1");
    assert_eq!(payload.complete_date, "2024-01-15");
    assert_eq!(
      payload.data_values,
      vec![DataValue {
        data_element: "de1".to_string(),
        value: "10".to_string(),
        category_option_combo: "coc1".to_string(),
      }]
    );
  }

  #[test]
  fn unmapped_codes_are_dropped_without_error() {
    let req = request(json!({"BCG": "10", "POLIO": "4"}));
    let payload = req.to_dhis2_payload(&bcg_mappings(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    assert_eq!(payload.data_values.len(), 1);
    assert_eq!(payload.data_values[0].data_element, "de1");
  }

  #[test]
  fn conversion_is_idempotent() {
    let req = request(json!({"BCG": 10}));
    let mappings = bcg_mappings();
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let first = req.to_dhis2_payload(&mappings, date);
    let second = req.to_dhis2_payload(&mappings, date);
    assert_eq!(first.data_values, second.data_values);
  }

  #[test]
  fn scalar_coercion() {
    assert_eq!(coerce_value(&json!("10")), "10");
    assert_eq!(coerce_value(&json!(10)), "10");
    assert_eq!(coerce_value(&json!(2.5)), "2.5");
    assert_eq!(coerce_value(&json!(true)), "true");
    assert_eq!(coerce_value(&json!(null)), "");
    assert_eq!(coerce_value(&json!(["a"])), "");
    assert_eq!(coerce_value(&json!({"a": 1})), "");
  }
}
