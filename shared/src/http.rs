use axum::Router;
use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use std::future::IntoFuture;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub fn make_error_response(status_code: StatusCode) -> Response<Body> {
    make_message_response(
        status_code,
        status_code
            .canonical_reason()
            .unwrap_or("an error occurred"),
    )
}

/// Plain-text response with an explicit message.
pub fn make_message_response(status_code: StatusCode, message: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = status_code;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub async fn run_http_service(
    host: &str,
    port: u16,
    router: Router,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    serve(listener, router, shutdown, drain_timeout).await
}

/// Serves `router` until `shutdown` is cancelled, then stops accepting and
/// drains in-flight requests for at most `drain_timeout`.
///
/// Requests still running once the drain window has elapsed are abandoned.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> Result<(), std::io::Error> {
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "listening");

    let signal = shutdown.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .into_future();
    tokio::pin!(server);

    let drain_deadline = async {
        shutdown.cancelled().await;
        tracing::info!(?drain_timeout, "shutdown requested, draining connections");
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = &mut server => result,
        _ = drain_deadline => {
            tracing::warn!(
                ?drain_timeout,
                "drain timeout elapsed, abandoning in-flight requests"
            );
            Ok(())
        }
    }
}
