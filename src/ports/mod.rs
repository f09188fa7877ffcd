pub mod http_client;
pub mod http_server;
pub mod repository;

pub use http_client::HttpClient;
pub use http_server::{HandlerError, HttpHandler, HttpServer};
pub use repository::Repository;
