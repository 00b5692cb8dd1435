use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::error_code::CallError;

/// Outcome of one logical call.
///
/// Exactly one of `data`/`error` is meaningful, selected by `success`. Coalesced callers
/// receive clones of the same envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
    /// HTTP status of the final attempt. `None` when no response arrived.
    pub status: Option<u16>,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub cached: bool,
}

impl ResponseEnvelope {
    pub fn success(data: Option<Value>, status: u16, retry_count: u32, duration: Duration) -> Self {
        Self {
            success: true,
            data,
            error: None,
            status: Some(status),
            duration_ms: duration.as_millis() as u64,
            retry_count,
            cached: false,
        }
    }

    pub fn failure(error: CallError, retry_count: u32) -> Self {
        Self {
            success: false,
            data: None,
            status: error.status(),
            error: Some(error),
            duration_ms: 0,
            retry_count,
            cached: false,
        }
    }

    /// Served from the response cache; no network call happened.
    pub fn cached(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status: Some(200),
            duration_ms: 0,
            retry_count: 0,
            cached: true,
        }
    }

    /// Synthetic fail-fast for an open breaker.
    pub fn circuit_open(endpoint: impl Into<String>) -> Self {
        Self::failure(
            CallError::CircuitOpen {
                endpoint: endpoint.into(),
            },
            0,
        )
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn error_kind(&self) -> Option<&'static str> {
        self.error.as_ref().map(CallError::kind)
    }

    /// Convert into a `Result` for callers preferring `?`.
    pub fn into_result(self) -> std::result::Result<Option<Value>, CallError> {
        match (self.success, self.error) {
            (true, _) => Ok(self.data),
            (false, Some(e)) => Err(e),
            (false, None) => Err(CallError::Internal {
                message: "failed envelope without error".to_string(),
            }),
        }
    }

    /// Decode `data` into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, CallError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        let data = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|e| CallError::InvalidResponse {
            message: e.to_string(),
        })
    }
}
