use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use usher_core::EngineError;

/// Error surface of the HTTP handlers: either a request-level problem or an
/// engine error mapped onto a status code.
pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            // An empty queue is not a failure: the consumer polled and
            // there was nothing to hand out.
            ApiError::Engine(EngineError::EmptyQueue) => StatusCode::NO_CONTENT.into_response(),
            ApiError::Engine(
                err @ (EngineError::InvalidChannel(_) | EngineError::InvalidReservation(_)),
            ) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
            ApiError::Engine(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}
