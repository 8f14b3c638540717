//! JSON envelope and error mapping for API responses

use crate::answer::AnswerError;
use crate::corpus::CorpusError;
use crate::error::HolocronError;
use crate::ingest::IngestError;
use crate::retrieval::SearchError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Response body of every non-data endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn success_with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// An error with the HTTP status it maps to
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    fn from_code(code: u16, message: String) -> Self {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(status = code, "{}", message);
        } else {
            tracing::debug!(status = code, "{}", message);
        }
        Self::new(status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse {
            success: false,
            message: Some(self.message),
            data: self.data,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<HolocronError> for ApiError {
    fn from(e: HolocronError) -> Self {
        Self::from_code(e.status_code(), e.to_string())
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        Self::from_code(e.status_code(), e.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        Self::from_code(e.status_code(), e.to_string())
    }
}

impl From<AnswerError> for ApiError {
    fn from(e: AnswerError) -> Self {
        Self::from_code(e.status_code(), e.to_string())
    }
}

impl From<CorpusError> for ApiError {
    fn from(e: CorpusError) -> Self {
        HolocronError::from(e).into()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        HolocronError::from(e).into()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;

    #[test]
    fn test_status_mapping() {
        let not_ready: ApiError = SearchError::IndexNotReady("swapi_data".into()).into();
        assert_eq!(not_ready.status, StatusCode::SERVICE_UNAVAILABLE);

        let auth: ApiError =
            SearchError::Embedding(EmbeddingError::Authentication("bad key".into())).into();
        assert_eq!(auth.status, StatusCode::UNAUTHORIZED);

        let busy: ApiError = IngestError::AlreadyRunning.into();
        assert_eq!(busy.status, StatusCode::CONFLICT);

        let missing: ApiError = CorpusError::UnknownCollection("droids".into()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(ApiResponse::error("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "message": "nope"}));
    }
}
