pub mod access_log;
pub mod admin_api;
pub mod health_checker;
pub mod http_client;
pub mod http_handler;
pub mod repository_sql;

/// Re-export commonly used types from adapters
pub use access_log::access_log_middleware;
pub use admin_api::router as admin_router;
pub use health_checker::HealthChecker;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use repository_sql::SqlRepository;
