use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockflow_infra::command_dispatcher::DispatchError;

/// Map a service error onto the HTTP contract.
///
/// Client errors keep their message. Everything else is logged in full and
/// answered with a generic message.
pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, msg),
        DispatchError::NotFound(what) => json_error(StatusCode::NOT_FOUND, format!("{what} not found")),
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, msg),
        DispatchError::Concurrency(msg) => {
            tracing::warn!(error = %msg, "concurrency retries exhausted");
            json_error(StatusCode::CONFLICT, "concurrent update, please retry")
        }
        e @ DispatchError::InsufficientStock { .. } => json_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        DispatchError::InvariantViolation(msg) => json_error(StatusCode::UNPROCESSABLE_ENTITY, msg),
        other => {
            tracing::error!(error = %other, "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_infra::event_store::EventStoreError;

    #[test]
    fn status_codes_follow_the_error_kind() {
        let cases = [
            (DispatchError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (DispatchError::NotFound("product".into()), StatusCode::NOT_FOUND),
            (DispatchError::Conflict("locked".into()), StatusCode::CONFLICT),
            (DispatchError::Concurrency("stale".into()), StatusCode::CONFLICT),
            (
                DispatchError::InsufficientStock {
                    requested: 5,
                    available: 1,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (DispatchError::InvariantViolation("no".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                DispatchError::Store(EventStoreError::Backend("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(dispatch_error_to_response(err).status(), status);
        }
    }
}
