//! Decoding of etcd keys API responses

use microlock_core::StoreError;
use microlock_core::StoreResponse;
use microlock_core::store::StoreResult;
use reqwest::StatusCode;
use serde::Deserialize;

/// Error document returned by etcd on a rejected request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: String,
    #[serde(default)]
    index: u64,
}

/// Turn a status + body pair into a store result.
///
/// An empty success body is a long-poll that ended without a change and
/// decodes to `None`.
pub(crate) fn decode(status: StatusCode, body: &str) -> StoreResult<Option<StoreResponse>> {
    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(None);
        }
        return serde_json::from_str(body)
            .map(Some)
            .map_err(|e| StoreError::Protocol(format!("invalid response body: {}", e)));
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => Err(StoreError::Rejected {
            code: err.error_code,
            message: err.message,
            cause: err.cause,
            index: err.index,
        }),
        Err(_) => Err(StoreError::Protocol(format!(
            "request failed with status {}: {}",
            status,
            body.trim()
        ))),
    }
}

/// Like [`decode`], for requests that always produce a document.
pub(crate) fn decode_required(status: StatusCode, body: &str) -> StoreResult<StoreResponse> {
    decode(status, body)?
        .ok_or_else(|| StoreError::Protocol(format!("empty response body (status {})", status)))
}
