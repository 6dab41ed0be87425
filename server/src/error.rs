use axum::{Json, extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse};
use relay::RelayError;
use serde_json::json;

pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let relay_error = self.0.downcast_ref::<RelayError>();
        let status_code = match relay_error {
            Some(RelayError::UpstreamRejected { .. } | RelayError::Transport(_)) => {
                StatusCode::BAD_GATEWAY
            }
            _ => match self.0.downcast_ref::<JsonRejection>() {
                Some(rejection) => rejection.status(),
                None => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };

        let mut body = json!({ "error": self.0.to_string() });
        if let Some(status) = relay_error.and_then(RelayError::upstream_status) {
            body["upstream_status"] = json!(status.as_u16());
        }

        (status_code, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
