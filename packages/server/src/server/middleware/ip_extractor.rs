use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

/// Coarse client identifier used for per-client rate limiting.
///
/// There are no user accounts; the network address is the fairness unit.
#[derive(Clone, Debug)]
pub struct ClientId(pub String);

/// Middleware to resolve the client identifier for a request
///
/// Priority:
/// 1. X-Forwarded-For header (for requests through proxies)
/// 2. X-Real-IP header (for Nginx)
/// 3. ConnectInfo socket address (direct connection)
///
/// Always inserts a `ClientId`; requests with no resolvable address share
/// the "unknown" bucket rather than bypassing the limiter.
pub async fn extract_client_id(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Response {
    // Try X-Forwarded-For header first (comma-separated list, take first)
    let ip = if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        forwarded
            .to_str()
            .ok()
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
    } else if let Some(real_ip) = request.headers().get("x-real-ip") {
        real_ip.to_str().ok().and_then(|s| s.parse::<IpAddr>().ok())
    } else {
        connect_info.map(|ConnectInfo(addr)| addr.ip())
    };

    let client_id = ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    request.extensions_mut().insert(ClientId(client_id));

    next.run(request).await
}
