//! Request / response envelope.
//!
//! Framing and transport are left to the caller; the core only sees
//! decoded requests and returns envelopes.
//!
//! ```text
//! { "type": "database_info", "data": { "path": "/srv/app.db" } }
//! { "success": true, "data": { ... } }
//! { "success": false, "error": "Database not found: \"/srv/app.db\"" }
//! ```

use crate::error::{DbWatchError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Request {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
        }
    }

    pub fn with_data(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data: Some(data),
        }
    }

    /// Decode the payload into `T`. A missing or malformed payload is a
    /// validation error.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| DbWatchError::validation("data", "payload is required"))?;
        serde_json::from_value(data).map_err(|e| DbWatchError::validation("data", e.to_string()))
    }
}

/// Uniform response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<serde_json::Value>> for Response {
    fn from(result: Result<serde_json::Value>) -> Self {
        match result {
            Ok(data) => Response::success(data),
            Err(e) => Response::failure(e.to_string()),
        }
    }
}

/// Payload naming a single database file.
#[derive(Debug, Clone, Deserialize)]
pub struct PathPayload {
    pub path: PathBuf,
}

/// How `update_paths` combines the given roots with the current set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathOperation {
    #[default]
    Set,
    Add,
    Remove,
}

impl PathOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathOperation::Set => "set",
            PathOperation::Add => "add",
            PathOperation::Remove => "remove",
        }
    }
}

/// Payload of `update_paths`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePathsPayload {
    #[serde(default)]
    pub operation: PathOperation,
    pub paths: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parses_type_tag() {
        let req: Request =
            serde_json::from_value(json!({ "type": "database_info", "data": { "path": "/a.db" } }))
                .unwrap();
        assert_eq!(req.kind, "database_info");

        let payload: PathPayload = req.payload().unwrap();
        assert_eq!(payload.path, PathBuf::from("/a.db"));
    }

    #[test]
    fn test_request_without_data() {
        let req: Request = serde_json::from_value(json!({ "type": "status" })).unwrap();
        assert!(req.data.is_none());

        let err = req.payload::<PathPayload>().unwrap_err();
        assert!(matches!(err, DbWatchError::Validation { .. }));
    }

    #[test]
    fn test_malformed_payload_is_validation_error() {
        let req = Request::with_data("database_info", json!({ "file": "/a.db" }));
        assert!(matches!(
            req.payload::<PathPayload>(),
            Err(DbWatchError::Validation { .. })
        ));
    }

    #[test]
    fn test_update_paths_operation_defaults_to_set() {
        let req = Request::with_data("update_paths", json!({ "paths": ["/data"] }));
        let payload: UpdatePathsPayload = req.payload().unwrap();
        assert_eq!(payload.operation, PathOperation::Set);

        let req = Request::with_data("update_paths", json!({ "operation": "rename", "paths": [] }));
        assert!(req.payload::<UpdatePathsPayload>().is_err());
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let ok = serde_json::to_string(&Response::success(json!({ "n": 1 }))).unwrap();
        assert!(ok.contains("\"data\""));
        assert!(!ok.contains("\"error\""));

        let failed = serde_json::to_string(&Response::failure("boom")).unwrap();
        assert!(!failed.contains("\"data\""));
        assert!(failed.contains("\"error\":\"boom\""));
    }
}
