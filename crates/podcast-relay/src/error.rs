use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use podcast_proto::protocol::ErrorResponse;
use tracing::error;

use crate::dispatcher::DispatchError;
use crate::registry::RegistryError;

/// Errors a relay handler can answer with.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),
    /// `/notificar` with nobody subscribed.
    #[error("No subscriptions registered")]
    NoSubscribers,
    /// `/test-notification` with nobody subscribed.
    #[error("No subscriptions. Open the app and subscribe first.")]
    NoSubscribersForTest,
    #[error(transparent)]
    Dispatch(DispatchError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<DispatchError> for RelayError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::RegistryEmpty => RelayError::NoSubscribers,
            DispatchError::Registry(e) => RelayError::Registry(e),
            other => RelayError::Dispatch(other),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RelayError::BadRequest(_) | RelayError::NoSubscribersForTest => {
                (StatusCode::BAD_REQUEST, None)
            }
            RelayError::NoSubscribers => (
                StatusCode::BAD_REQUEST,
                Some("Subscribe from the browser first".to_string()),
            ),
            RelayError::Registry(RegistryError::EmptyEndpoint) => (StatusCode::BAD_REQUEST, None),
            RelayError::Dispatch(_) | RelayError::Registry(_) => {
                error!("{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };
        let body = ErrorResponse {
            error: self.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
