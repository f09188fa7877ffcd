use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use gatewire::{
    adapters::{HttpClientAdapter, HttpHandler, SqlRepository, access_log_middleware, admin_router},
    config::{ServerConfigValidator, loader::load_config, models::ServerConfig},
    core::{BackendService, Gateway},
    metrics,
    ports::{Repository, http_client::HttpClient},
    tracing_setup,
    utils::{ConnectionTracker, GracefulShutdown},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Bootstrap configuration file (YAML/JSON/TOML; format inferred from extension)
    #[clap(short, long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let config: ServerConfig = load_config(&args.config)
        .await
        .with_context(|| format!("failed to load config from {}", args.config))?;
    ServerConfigValidator::validate(&config).map_err(|e| eyre!("invalid configuration: {e}"))?;

    tracing_setup::init_tracing_with_config(&config.log_level, config.is_json_log_format(), true)
        .map_err(|e| eyre!("failed to initialize tracing: {e}"))?;

    metrics::init_metrics().map_err(|e| eyre!("failed to initialize metrics: {e}"))?;

    tracing::info!(database_url = %config.database_url, "connecting to database");
    let repository = Arc::new(
        SqlRepository::connect(&config.database_url)
            .await
            .context("failed to connect to database")?,
    );
    repository
        .migrate()
        .await
        .map_err(|e| eyre!("failed to run database migrations: {e}"))?;

    // Gateway and service hold narrow traits pointing back at each other (core::gateway docs):
    // the gateway must be built before the service, and completed only after.
    let gateway = Arc::new(Gateway::new());
    let service = Arc::new(BackendService::new(repository.clone(), gateway.clone()));
    gateway.complete(service.clone(), service.clone());

    service
        .init()
        .await
        .map_err(|e| eyre!("failed to load backend configs: {e}"))?;

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("failed to create HTTP client adapter")?);
    let connection_tracker = Arc::new(ConnectionTracker::new());
    let http_handler = Arc::new(HttpHandler::new(
        gateway.clone(),
        http_client.clone(),
        connection_tracker.clone(),
    ));

    let health_checker = gatewire::adapters::HealthChecker::new(
        gateway.clone(),
        http_client.clone(),
        config.health_check_interval(),
        config.health_check_timeout(),
        config.health_check_latency_ceiling(),
    );
    let health_checker_handle = tokio::spawn(async move {
        if let Err(e) = health_checker.run().await {
            tracing::error!("health checker exited with error: {e}");
        }
    });

    let data_plane = {
        let handler = http_handler.clone();
        any(
            move |ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move {
                    match handler.handle_request(req, Some(addr)).await {
                        Ok(response) => Ok::<Response<Body>, Infallible>(response),
                        Err(e) => {
                            tracing::error!("request handling error: {e:?}");
                            let status = e.status_code();
                            Ok((status, e.to_string()).into_response())
                        }
                    }
                }
            },
        )
    };

    let app = Router::new()
        .route("/{*path}", data_plane.clone())
        .route("/", data_plane)
        .route_layer(middleware::from_fn_with_state(
            gateway.clone(),
            access_log_middleware,
        ))
        .merge(admin_router(service.clone()))
        .route("/metrics", get(handle_metrics));

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;
    tracing::info!(%addr, "gatewire listening");

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("signal handler error: {e}");
        }
    });

    let server_result = tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>()
        ) => {
            result.context("server error")
        }
        reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!(?reason, "shutdown signal received, draining connections");

            health_checker_handle.abort();
            connection_tracker.signal_shutdown();
            if !connection_tracker.wait_for_drain(std::time::Duration::from_secs(30)).await {
                tracing::warn!("drain timeout exceeded, some connections may have been dropped");
            }

            tracing::info!("graceful shutdown complete");
            Ok(())
        }
    };

    server_result?;
    tracing_setup::shutdown_tracing();

    Ok(())
}

async fn handle_metrics() -> impl IntoResponse {
    metrics::render_prometheus_metrics()
}
