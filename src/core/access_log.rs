//! Access records produced by the file handler and, on slaves, streamed to
//! the master over the control channel (C6); on the master, appended
//! directly to the log sink (C5).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One client request, as recorded for the access log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub remote_addr: String,
    pub key: String,
    pub success: bool,
    pub user_agent: String,
    /// Present when the client sent `X-Minicdn-Data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_data: Option<Value>,
    /// Echoes the client's `X-Minicdn-Type`, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_type: Option<String>,
    /// Filled in by the master on receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Filled in by the master on receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

impl AccessRecord {
    /// Builds a record from a request's client headers, per §4.6/§6: when
    /// `X-Minicdn-Type` is `"json"`, `X-Minicdn-Data` is parsed as JSON; a
    /// malformed document falls back to the raw string plus an error note,
    /// without affecting the HTTP response.
    pub fn new(
        remote_addr: String,
        key: String,
        success: bool,
        user_agent: String,
        raw_header_data: Option<&str>,
        raw_header_type: Option<&str>,
    ) -> Self {
        let mut record = Self {
            remote_addr,
            key,
            success,
            user_agent,
            header_data: None,
            header_type: None,
            timestamp: None,
            peer: None,
        };

        let Some(data) = raw_header_data else {
            return record;
        };

        if raw_header_type == Some("json") {
            match serde_json::from_str::<Value>(data) {
                Ok(parsed) => {
                    record.header_data = Some(parsed);
                    record.header_type = Some("json".to_string());
                }
                Err(e) => {
                    tracing::warn!("header data decode: {e}");
                    record.header_data = Some(Value::String(format!("{data} (decode error: {e})")));
                    record.header_type = raw_header_type.map(str::to_string);
                }
            }
        } else {
            record.header_data = Some(Value::String(data.to_string()));
            record.header_type = raw_header_type.map(str::to_string);
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_header_type_parses_valid_json() {
        let record = AccessRecord::new(
            "1.2.3.4".into(),
            "/a".into(),
            true,
            "curl".into(),
            Some(r#"{"a":1}"#),
            Some("json"),
        );
        assert_eq!(record.header_data, Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn malformed_json_falls_back_to_raw_string() {
        let record = AccessRecord::new(
            "1.2.3.4".into(),
            "/a".into(),
            true,
            "curl".into(),
            Some("{not json"),
            Some("json"),
        );
        assert!(matches!(record.header_data, Some(Value::String(_))));
    }

    #[test]
    fn non_json_type_stores_raw_string() {
        let record = AccessRecord::new(
            "1.2.3.4".into(),
            "/a".into(),
            true,
            "curl".into(),
            Some("opaque"),
            Some("text"),
        );
        assert_eq!(record.header_data, Some(Value::String("opaque".into())));
    }
}
