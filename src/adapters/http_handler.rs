//! HTTP request handling adapter (§4.F HTTP Proxy, §4.G WebSocket Proxy).
//!
//! Owns the data-plane request flow: route lookup against the live `Gateway`, backend
//! selection, path rewriting, and forwarding — either as a plain HTTP proxy or, when the
//! matched config is a WebSocket route and the request carries an upgrade, as a bidirectional
//! frame relay. Static files, redirects and rate limiting have no counterpart here; those were
//! teacher-specific route kinds this gateway's configuration model doesn't carry.
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    body::Body as AxumBody,
    http::{HeaderValue, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD as B64};
use eyre::WrapErr;
use futures_util::{SinkExt, StreamExt};
use hyper::{Request, Response};
use sha1::Digest;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::protocol::{
    Message, Role,
    frame::{CloseFrame, coding::CloseCode},
};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    core::{
        Gateway,
        backend::{BackendConfig, Protocol},
    },
    ports::{http_client::HttpClient, http_server::HandlerError},
    tracing_setup,
    utils::ConnectionTracker,
};

/// Primary façade handling inbound HTTP and WebSocket requests.
pub struct HttpHandler {
    gateway: Arc<Gateway>,
    http_client: Arc<dyn HttpClient>,
    connection_tracker: Arc<ConnectionTracker>,
}

impl HttpHandler {
    pub fn new(
        gateway: Arc<Gateway>,
        http_client: Arc<dyn HttpClient>,
        connection_tracker: Arc<ConnectionTracker>,
    ) -> Self {
        Self {
            gateway,
            http_client,
            connection_tracker,
        }
    }

    /// Entry point for Axum: wraps routing with a request-scoped span, timing and metrics.
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, HandlerError> {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let request_id = Uuid::new_v4().to_string();
        let client_ip = client_addr.map(|addr| addr.ip().to_string());
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(String::from);

        let span = tracing_setup::create_request_span(
            method.as_str(),
            &path,
            &request_id,
            client_ip.as_deref(),
            user_agent.as_deref(),
        );

        let result = async { self.route_request(req, client_addr).await }
            .instrument(span.clone())
            .await;

        let duration = start.elapsed();
        let (status, protocol) = match &result {
            Ok((response, protocol)) => (response.status().as_u16(), *protocol),
            Err(e) => (e.status_code().as_u16(), "http"),
        };
        span.record("http.status_code", status);
        span.record("duration_ms", duration.as_millis() as u64);
        tracing::info!(status, duration_ms = duration.as_millis(), "request completed");

        crate::metrics::increment_request_total(&path, method.as_str(), status, protocol);
        crate::metrics::record_request_duration(&path, method.as_str(), protocol, duration);

        result.map(|(response, _)| response)
    }

    /// Resolve the matching route and dispatch to the HTTP or WebSocket proxy path.
    async fn route_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<(Response<AxumBody>, &'static str), HandlerError> {
        let path = req.uri().path().to_string();
        let config = self
            .gateway
            .find_matching_route(&path)
            .ok_or(HandlerError::NoRoute)?;
        tracing::Span::current().record("route.prefix", config.path_prefix.as_str());

        let wants_upgrade = is_websocket_upgrade(&req);

        // A non-upgrade request to a WS route, or an upgrade request to an HTTP route, falls
        // through to the plain HTTP proxy rather than being rejected, matching the original
        // `ServeHTTP`'s behavior in these cases.
        match (config.protocol, wants_upgrade) {
            (Protocol::Ws, true) => self
                .handle_websocket(req, config)
                .await
                .map(|r| (r, "ws")),
            _ => self
                .handle_proxy(req, client_addr, config)
                .await
                .map(|r| (r, "http")),
        }
    }

    /// HTTP reverse proxy (§4.F): select a healthy endpoint, rewrite the path, forward.
    async fn handle_proxy(
        &self,
        mut req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
        config: Arc<BackendConfig>,
    ) -> Result<Response<AxumBody>, HandlerError> {
        let endpoint = config
            .next_healthy_endpoint()
            .ok_or(HandlerError::NoHealthyEndpoint)?;
        let parsed = endpoint
            .parsed_url
            .clone()
            .ok_or(HandlerError::NoHealthyEndpoint)?;

        let original_uri = req.uri().clone();
        let rewritten_path = rewrite_path(&config.path_prefix, parsed.path(), original_uri.path());

        let mut backend_url = parsed;
        backend_url.set_path(&rewritten_path);
        backend_url.set_query(original_uri.query());
        tracing::Span::current().record("backend.url", backend_url.as_str());

        *req.uri_mut() = backend_url
            .as_str()
            .parse()
            .map_err(|e| HandlerError::InternalError(format!("invalid backend uri: {e}")))?;

        let method = req.method().clone();
        {
            let headers = req.headers_mut();
            if let Some(ip) = client_addr.map(|addr| addr.ip().to_string())
                && let Ok(value) = HeaderValue::from_str(&ip)
            {
                headers.insert("X-Forwarded-For", value);
            }
            if let Ok(value) = HeaderValue::from_str(original_uri.scheme_str().unwrap_or("http")) {
                headers.insert("X-Forwarded-Proto", value);
            }
            if let Some(host) = original_uri.host()
                && let Ok(value) = HeaderValue::from_str(host)
            {
                headers.insert("X-Forwarded-Host", value);
            }
        }

        let connection = client_addr.map(|addr| self.connection_tracker.register_connection(addr));
        if let Some(info) = &connection {
            info.increment_requests();
        }

        let backend_start = Instant::now();
        let result = self.http_client.send_request(req).await;
        let backend_duration = backend_start.elapsed();

        if let Some(info) = &connection {
            info.decrement_requests();
            self.connection_tracker.unregister_connection(info.id);
        }

        let backend_label = format!(
            "{}://{}",
            backend_url.scheme(),
            backend_url.host_str().unwrap_or("unknown")
        );

        match result {
            Ok(response) => {
                crate::metrics::increment_backend_request_total(
                    &backend_label,
                    &rewritten_path,
                    method.as_str(),
                    response.status().as_u16(),
                );
                crate::metrics::record_backend_request_duration(
                    &backend_label,
                    &rewritten_path,
                    method.as_str(),
                    backend_duration,
                );
                Ok(response)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    backend = %backend_label,
                    duration_ms = backend_duration.as_millis(),
                    "backend request failed"
                );
                crate::metrics::increment_backend_request_total(
                    &backend_label,
                    &rewritten_path,
                    method.as_str(),
                    502,
                );
                Err(HandlerError::UpstreamTransport(e.to_string()))
            }
        }
    }

    /// WebSocket proxy (§4.G): upgrade the client, dial the backend, relay frames both ways.
    async fn handle_websocket(
        &self,
        mut req: Request<AxumBody>,
        config: Arc<BackendConfig>,
    ) -> Result<Response<AxumBody>, HandlerError> {
        let key = req
            .headers()
            .get(header::SEC_WEBSOCKET_KEY)
            .cloned()
            .ok_or_else(|| HandlerError::BadRequest("missing Sec-WebSocket-Key".to_string()))?;

        let endpoint = config
            .next_healthy_endpoint()
            .ok_or(HandlerError::NoHealthyEndpoint)?;
        let parsed = endpoint
            .parsed_url
            .clone()
            .ok_or(HandlerError::NoHealthyEndpoint)?;

        let original_uri = req.uri().clone();
        let rewritten_path = rewrite_path(&config.path_prefix, parsed.path(), original_uri.path());

        let scheme = if parsed.scheme() == "https" { "wss" } else { "ws" };
        let host = parsed
            .host_str()
            .ok_or_else(|| HandlerError::InternalError("backend url has no host".to_string()))?;
        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let mut backend_url = format!("{scheme}://{authority}{rewritten_path}");
        if let Some(query) = original_uri.query() {
            backend_url.push('?');
            backend_url.push_str(query);
        }
        tracing::Span::current().record("backend.url", backend_url.as_str());

        let accept_key = {
            let mut hasher = sha1::Sha1::new();
            hasher.update(key.as_bytes());
            hasher.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
            B64.encode(hasher.finalize())
        };

        let on_upgrade = hyper::upgrade::on(&mut req);

        let mut response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .header(header::SEC_WEBSOCKET_ACCEPT, accept_key);
        if let Some(protos) = req.headers().get(header::SEC_WEBSOCKET_PROTOCOL)
            && let Ok(list) = protos.to_str()
            && let Some(first) = list.split(',').map(|s| s.trim()).find(|s| !s.is_empty())
        {
            response = response.header(header::SEC_WEBSOCKET_PROTOCOL, first);
        }
        let response = response
            .body(AxumBody::empty())
            .wrap_err("failed to build 101 response")
            .map_err(|e| HandlerError::InternalError(e.to_string()))?;

        tokio::spawn(relay_websocket(on_upgrade, backend_url));

        Ok(response)
    }
}

fn is_websocket_upgrade(req: &Request<AxumBody>) -> bool {
    let has_connection_upgrade = req
        .headers()
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    let has_upgrade_websocket = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    has_connection_upgrade && has_upgrade_websocket
}

/// Strip `path_prefix` from `request_path`, prepend `endpoint_base_path`, and ensure exactly
/// one `/` joins the two halves. The raw query string is handled separately by callers.
fn rewrite_path(path_prefix: &str, endpoint_base_path: &str, request_path: &str) -> String {
    let remaining = request_path
        .strip_prefix(path_prefix)
        .unwrap_or(request_path)
        .trim_start_matches('/');
    let base = endpoint_base_path.trim_end_matches('/');

    if remaining.is_empty() {
        if base.is_empty() { "/".to_string() } else { base.to_string() }
    } else if base.is_empty() {
        format!("/{remaining}")
    } else {
        format!("{base}/{remaining}")
    }
}

/// Drive one WebSocket session after the 101 response has been sent: dial the backend, then
/// relay frames concurrently in both directions until either side's pump exits, at which point
/// a `CloseGoingAway` frame is sent to both peers (5s write deadline) before both are closed.
/// No idle timeout is enforced; a stalled session is bounded only by the peers themselves.
async fn relay_websocket(on_upgrade: hyper::upgrade::OnUpgrade, backend_url: String) {
    let upgraded = match on_upgrade.await {
        Ok(u) => u,
        Err(e) => {
            tracing::error!(error = %e, "client upgrade await failed");
            return;
        }
    };
    let upgraded = hyper_util::rt::TokioIo::new(upgraded);
    let mut client_stream =
        tokio_tungstenite::WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;

    let backend_ws = match tokio_tungstenite::connect_async(&backend_url).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::error!(error = %e, backend_url, "websocket dial to backend failed");
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Error,
                reason: "upstream unavailable".into(),
            }));
            let _ = tokio::time::timeout(Duration::from_secs(5), client_stream.send(close)).await;
            let _ = client_stream.close(None).await;
            return;
        }
    };

    crate::metrics::increment_ws_connections();

    let (c_tx, mut c_rx) = client_stream.split();
    let (b_tx, mut b_rx) = backend_ws.split();
    let c_tx = Arc::new(AsyncMutex::new(c_tx));
    let b_tx = Arc::new(AsyncMutex::new(b_tx));

    let forward_to_backend = {
        let b_tx = b_tx.clone();
        async move {
            while let Some(msg) = c_rx.next().await {
                match msg {
                    Ok(message) => {
                        record_ws_message("ingress", &message);
                        if b_tx.lock().await.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "client websocket recv error");
                        break;
                    }
                }
            }
        }
    };

    let forward_to_client = {
        let c_tx = c_tx.clone();
        async move {
            while let Some(msg) = b_rx.next().await {
                match msg {
                    Ok(message) => {
                        record_ws_message("egress", &message);
                        if c_tx.lock().await.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "backend websocket recv error");
                        break;
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = forward_to_backend => {},
        _ = forward_to_client => {},
    }

    let going_away = || {
        Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "".into(),
        }))
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), c_tx.lock().await.send(going_away()))
        .await;
    let _ = tokio::time::timeout(Duration::from_secs(5), b_tx.lock().await.send(going_away()))
        .await;
    let _ = c_tx.lock().await.close().await;
    let _ = b_tx.lock().await.close().await;

    tracing::info!(backend_url, "websocket session closed");
}

fn record_ws_message(direction: &str, message: &Message) {
    let (opcode, size) = match message {
        Message::Text(s) => ("text", s.len()),
        Message::Binary(b) => ("binary", b.len()),
        Message::Ping(b) => ("ping", b.len()),
        Message::Pong(b) => ("pong", b.len()),
        Message::Close(frame) => {
            if let Some(frame) = frame {
                crate::metrics::increment_ws_close_code(frame.code.into());
            }
            ("close", 0)
        }
        Message::Frame(_) => ("frame", 0),
    };
    crate::metrics::increment_ws_message(direction, opcode);
    if size > 0 {
        crate::metrics::add_ws_bytes(direction, size);
    }
}

impl Clone for HttpHandler {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            http_client: self.http_client.clone(),
            connection_tracker: self.connection_tracker.clone(),
        }
    }
}
