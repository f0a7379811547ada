use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use crate::error::CmdbError;

pub type ApiResult<T> = Result<T, ApiError>;

/// A `CmdbError` on its way out over HTTP.
#[derive(Debug)]
pub struct ApiError(pub CmdbError);

impl From<CmdbError> for ApiError {
    fn from(err: CmdbError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CmdbError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CmdbError::NotFound { .. } => StatusCode::NOT_FOUND,
            CmdbError::Conflict(_) => StatusCode::CONFLICT,
            CmdbError::Storage { retryable: true, .. } => StatusCode::SERVICE_UNAVAILABLE,
            CmdbError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if matches!(self.0, CmdbError::Storage { .. }) {
            tracing::error!("Request failed: {}", self.0);
        }

        let body = json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_per_error_kind() {
        let cases = [
            (CmdbError::invalid("x"), StatusCode::BAD_REQUEST),
            (CmdbError::not_found("server", 1), StatusCode::NOT_FOUND),
            (CmdbError::conflict("x"), StatusCode::CONFLICT),
            (CmdbError::storage("busy", true), StatusCode::SERVICE_UNAVAILABLE),
            (CmdbError::storage("disk", false), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
