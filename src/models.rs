use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::collections::HashMap;

/// A caller-facing aggregate submission. `data_values` is a free-form map of
/// field codes to scalar values; the transformer translates it into DHIS2
/// data values using the mapping table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRequest {
  #[serde(rename = "orgUnit")]
  pub org_unit: String,
  #[serde(rename = "orgUnitName", default, skip_serializing_if = "Option::is_none")]
  pub org_unit_name: Option<String>,
  pub period: String,
  #[serde(rename = "dataSet")]
  pub data_set: String,
  #[serde(rename = "dataValues")]
  pub data_values: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct AggregateResponse {
  pub message: String,
  pub payload: DataValueSetPayload,
  pub submission_id: i64,
  pub task_id: String,
}

/// One entry of the downstream data value set. Transient: only ever exists
/// inside a `DataValueSetPayload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValue {
  #[serde(rename = "dataElement")]
  pub data_element: String,
  pub value: String,
  #[serde(rename = "categoryOptionCombo")]
  pub category_option_combo: String,
}

/// The DHIS2 wire payload for an aggregate submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataValueSetPayload {
  #[serde(rename = "dataSet")]
  pub data_set: String,
  pub period: String,
  #[serde(rename = "orgUnit")]
  pub org_unit: String,
  #[serde(rename = "completeDate")]
  pub complete_date: String,
  #[serde(rename = "dataValues")]
  pub data_values: Vec<DataValue>,
}

/// What the delivery collaborator reports back. Only `status` is interpreted;
/// the rest is carried verbatim into the job log when response saving is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
  pub status: String,
  #[serde(flatten)]
  pub detail: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detail: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
  pub data: Vec<T>,
  pub page: i64,
  pub page_size: i64,
  pub total: i64,
  pub total_pages: i64,
}
