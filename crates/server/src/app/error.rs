use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use whatsbridge_link::DispatchError;

/// Errors surfaced to HTTP callers, rendered as `{"detail": "..."}`.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl HttpError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::Dispatch(DispatchError::NotConnected) => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::Dispatch(DispatchError::InvalidRecipient(_)) => StatusCode::BAD_REQUEST,
            HttpError::Dispatch(DispatchError::Send(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        HttpError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({ "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type HttpResult<T> = Result<T, HttpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use whatsbridge_whatsapp::ClientError;

    #[test]
    fn test_status_codes() {
        let cases = [
            (HttpError::from(DispatchError::NotConnected), StatusCode::SERVICE_UNAVAILABLE),
            (
                DispatchError::InvalidRecipient(ClientError::Validation("x".into())).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                DispatchError::Send(ClientError::Api("boom".into())).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (HttpError::BadRequest("missing field".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, code) in cases {
            assert_eq!(err.status_code(), code);
        }
    }

    #[test]
    fn test_detail_keeps_dispatch_text() {
        let err = HttpError::from(DispatchError::Send(ClientError::Api("boom".into())));
        assert_eq!(err.to_string(), "Failed to send message: Gateway error: boom");
    }
}
