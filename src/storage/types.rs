//! Wire types for the BigQuery Storage Read API v1 (REST/JSON encoding).
//!
//! Int64 fields arrive as JSON strings; binary fields are base64. Both are
//! handled here so the rest of the crate sees plain Rust types.

use crate::error::{ApiErrorBody, BqStreamError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A fully qualified table, `project.dataset.table`.
///
/// Dataset and table ids cannot contain dots, so parsing splits from the
/// right; this keeps legacy dotted project ids (`example.com:proj`) intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableReference {
    /// Resource path form used by the Storage API.
    pub fn resource_path(&self) -> String {
        format!(
            "projects/{}/datasets/{}/tables/{}",
            self.project_id, self.dataset_id, self.table_id
        )
    }
}

impl FromStr for TableReference {
    type Err = BqStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(table), Some(dataset), Some(project))
                if !table.is_empty() && !dataset.is_empty() && !project.is_empty() =>
            {
                Ok(TableReference {
                    project_id: project.to_string(),
                    dataset_id: dataset.to_string(),
                    table_id: table.to_string(),
                })
            }
            _ => Err(BqStreamError::InvalidTableId(s.to_string())),
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataFormat {
    Arrow,
    Avro,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReadOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selected_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_restriction: Option<String>,
}

/// Body of `createReadSession`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReadSessionRequest {
    pub parent: String,
    pub read_session: ReadSessionSpec,
    pub max_stream_count: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadSessionSpec {
    pub table: String,
    pub data_format: DataFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_options: Option<TableReadOptions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadSession {
    pub name: String,
    #[serde(default)]
    pub expire_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub streams: Vec<ReadStream>,
    #[serde(default)]
    pub arrow_schema: Option<ArrowSchema>,
    #[serde(default, deserialize_with = "string_i64::option")]
    pub estimated_total_bytes_scanned: Option<i64>,
    #[serde(default, deserialize_with = "string_i64::option")]
    pub estimated_row_count: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStream {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrowSchema {
    /// Base64 Arrow IPC schema message.
    pub serialized_schema: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrowRecordBatch {
    /// Base64 Arrow IPC record batch message.
    pub serialized_record_batch: String,
}

/// One server-streamed message of `readRows`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRowsResponse {
    #[serde(default)]
    pub arrow_record_batch: Option<ArrowRecordBatch>,
    #[serde(default, deserialize_with = "string_i64::option")]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub stats: Option<StreamStats>,
    #[serde(default)]
    pub throttle_state: Option<ThrottleState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    #[serde(default)]
    pub progress: Option<Progress>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default)]
    pub at_response_start: f64,
    #[serde(default)]
    pub at_response_end: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleState {
    #[serde(default)]
    pub throttle_percent: i32,
}

/// A frame of the streamed `readRows` array: either a row payload or an
/// in-band API error.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReadFrame {
    Error { error: ApiErrorBody },
    Rows(ReadRowsResponse),
}

/// REST encodes int64 as a JSON string; tolerate bare numbers too.
pub(crate) mod string_i64 {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        S(String),
        N(i64),
    }

    pub fn option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::N(n)) => Ok(Some(n)),
            Some(Raw::S(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
