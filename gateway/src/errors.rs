use crate::templates::TemplateError;
use crate::upstream::UpstreamError;
use axum::response::{IntoResponse, Response};
use catalog::StoreError;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use shared::http::{make_error_response, make_message_response};

/// Errors surfaced by request handlers.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Invalid graph name: {0}")]
    InvalidGraph(String),

    #[error("Invalid dataflow name: {0}")]
    InvalidDataflow(String),

    #[error("Missing {0} parameter")]
    MissingParameter(&'static str),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::InvalidGraph(_)
            | GatewayError::InvalidDataflow(_)
            | GatewayError::MissingParameter(_)
            | GatewayError::MalformedRequest(_) => {
                make_message_response(StatusCode::BAD_REQUEST, self.to_string())
            }
            GatewayError::Upstream(error) => upstream_response(error),
            GatewayError::Store(error) => {
                tracing::error!(error = %error, "store request failed");
                make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
            GatewayError::Template(error) => {
                tracing::error!(error = %error, "template rendering failed");
                make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

fn upstream_response(error: UpstreamError) -> Response {
    match error {
        // The connection error is logged where it happens and never shown to the caller.
        UpstreamError::Unavailable { service, .. } => {
            make_message_response(StatusCode::BAD_GATEWAY, format!("{service} unavailable"))
        }
        UpstreamError::Status {
            status,
            content_type,
            body,
            ..
        } => {
            let mut response = (status, body).into_response();
            if let Some(content_type) = content_type {
                response.headers_mut().insert(CONTENT_TYPE, content_type);
            }
            response
        }
        UpstreamError::Rejected { detail, .. } => {
            make_message_response(StatusCode::BAD_GATEWAY, detail)
        }
        UpstreamError::Decode { service, .. } => make_message_response(
            StatusCode::BAD_GATEWAY,
            format!("Invalid response format from {service}"),
        ),
        UpstreamError::InvalidUrl(error) => {
            tracing::error!(error = %error, "could not build upstream URL");
            make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
