use serde::{Serialize, Deserialize};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;

/// Scheme name that switches mapping lookups from caller codes to DHIS2 data
/// element ids.
pub const SCHEME_UID: &str = "UID";

/// One row of the dhis2_mappings table: a caller-facing code and the DHIS2
/// identifiers it translates to. CRUD on this table is owned elsewhere; the
/// pipeline only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Mapping {
  pub id: i64,
  pub uid: String,
  pub code: String,
  pub name: String,
  pub description: String,
  #[serde(rename = "dataSet")]
  pub dataset: String,
  #[serde(rename = "dataElement")]
  pub dataelement: String,
  #[serde(rename = "dhis2Name")]
  pub dhis2_name: String,
  #[serde(rename = "categoryOptionCombo")]
  pub category_option_combo: String,
}

/// Keys a set of mappings for lookup: by code (default) or by data element id
/// when the configured scheme is "UID".
pub fn key_by_scheme(rows: Vec<Mapping>, scheme: &str) -> HashMap<String, Mapping> {
  let mut mappings = HashMap::with_capacity(rows.len());
  for m in rows {
    let key = if scheme == SCHEME_UID {
      m.dataelement.clone()
    } else {
      m.code.clone()
    };
    mappings.insert(key, m);
  }
  mappings
}

/// Loads the whole mapping table keyed per the configured scheme. Called on
/// every transformation so mapping edits take effect without a restart.
pub async fn mappings_by_scheme(
  pool: &PgPool,
  scheme: &str,
) -> Result<HashMap<String, Mapping>, sqlx::Error> {
  let rows: Vec<Mapping> = sqlx::query_as(
    "SELECT id, uid, code, name, description, dataset, dataelement, dhis2_name, category_option_combo
     FROM dhis2_mappings",
  )
  .fetch_all(pool)
  .await?;
  Ok(key_by_scheme(rows, scheme))
}

#[cfg(test)]
pub(crate) fn test_mapping(code: &str, dataelement: &str, coc: &str) -> Mapping {
  Mapping {
    id: 0,
    uid: String::new(),
    code: code.to_string(),
    name: code.to_string(),
    description: String::new(),
    dataset: String::new(),
    dataelement: dataelement.to_string(),
    dhis2_name: String::new(),
    category_option_combo: coc.to_string(),
  }
}
