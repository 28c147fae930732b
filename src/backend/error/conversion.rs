/**
 * Error Conversion
 *
 * Maps transport failures and HTTP responses onto `BackendError`.
 *
 * # Status Mapping
 *
 * - `401` - `Unauthenticated`
 * - `403` - `Forbidden` (row-level security)
 * - `404` / `406` - `NotFound`
 * - `409` - `Conflict`
 * - anything else unsuccessful - `Http` with the response body
 */

use crate::backend::error::types::BackendError;
use reqwest::StatusCode;

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let operation = err
                .url()
                .map(|u| u.path().to_string())
                .unwrap_or_else(|| "request".to_string());
            BackendError::timeout(operation)
        } else if err.is_decode() {
            BackendError::SharedError(crate::shared::SharedError::serialization(err.to_string()))
        } else {
            BackendError::network(err.to_string())
        }
    }
}

impl BackendError {
    /// Build the error for an unsuccessful response status and its body
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let body = body.into();
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("unknown status").to_string()
        } else {
            body
        };
        match status {
            StatusCode::UNAUTHORIZED => BackendError::Unauthenticated,
            StatusCode::FORBIDDEN => BackendError::forbidden(message),
            StatusCode::NOT_FOUND | StatusCode::NOT_ACCEPTABLE => BackendError::not_found(message),
            StatusCode::CONFLICT => BackendError::conflict(message),
            _ => BackendError::http(status.as_u16(), message),
        }
    }

    /// Turn a non-success response into an error, reading its body
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::from_status(status, body)
    }
}
