use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Error type for the data-path handler (§7). Each variant knows its own HTTP surface via
/// [`HandlerError::status_code`], so callers don't re-derive it downstream.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("no route matches this path")]
    NoRoute,

    #[error("no healthy endpoint for this backend")]
    NoHealthyEndpoint,

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("client upgrade failed: {0}")]
    ClientUpgradeFailed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl HandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::NoRoute => StatusCode::NOT_FOUND,
            HandlerError::NoHealthyEndpoint => StatusCode::SERVICE_UNAVAILABLE,
            HandlerError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            HandlerError::ClientUpgradeFailed(_) | HandlerError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            HandlerError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// HttpServer defines the port (interface) for handling HTTP requests
pub trait HttpServer: Send + Sync + 'static {
    /// Run the HTTP server
    fn run(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// HttpHandler defines the port for handling HTTP requests
pub trait HttpHandler: Send + Sync + 'static {
    /// Handle an incoming HTTP request
    fn handle_request(
        &self,
        req: Request<AxumBody>,
    ) -> impl std::future::Future<Output = Result<Response<AxumBody>, HandlerError>> + Send;
}
