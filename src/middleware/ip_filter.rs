//! Source IP filtering for webhook endpoints.
//!
//! Providers publish the address ranges their callbacks originate
//! from. For providers whose callbacks carry no signature this filter
//! is the only authenticity control, so an unresolvable source IP is
//! treated as blocked unless the filter is wide open.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::task::{Context, Poll};

use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};

use crate::config::AllowedIps;

#[derive(Clone, Debug)]
pub struct IpFilterLayer {
    allowed: AllowedIps,
    trusted_proxy_depth: usize,
}

impl IpFilterLayer {
    pub fn new(allowed: AllowedIps, trusted_proxy_depth: usize) -> Self {
        Self {
            allowed,
            trusted_proxy_depth,
        }
    }
}

impl<S> Layer<S> for IpFilterLayer {
    type Service = IpFilterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IpFilterService {
            inner,
            allowed: self.allowed.clone(),
            trusted_proxy_depth: self.trusted_proxy_depth,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IpFilterService<S> {
    inner: S,
    allowed: AllowedIps,
    trusted_proxy_depth: usize,
}

impl<S, B> Service<Request<B>> for IpFilterService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = futures_util::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let source = resolve_source_ip(req.headers(), req.extensions(), self.trusted_proxy_depth);
        let permitted = match source {
            Some(ip) => self.allowed.permits(ip),
            None => matches!(self.allowed, AllowedIps::Any),
        };

        if !permitted {
            tracing::warn!(source = ?source, "callback blocked by source filter");
            let response = StatusCode::FORBIDDEN.into_response();
            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

/// The forwarded chain wins when present and deep enough, otherwise the
/// socket peer address.
fn resolve_source_ip(
    headers: &HeaderMap,
    extensions: &axum::http::Extensions,
    trusted_proxy_depth: usize,
) -> Option<IpAddr> {
    if let Some(ip) = forwarded_client_ip(headers, trusted_proxy_depth) {
        return Some(ip);
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip())
}

/// Walks X-Forwarded-For from the right, skipping our own proxies.
/// Anything left of the trusted hops is attacker-controlled and never
/// consulted.
fn forwarded_client_ip(headers: &HeaderMap, trusted_proxy_depth: usize) -> Option<IpAddr> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;

    let chain: Vec<IpAddr> = raw
        .split(',')
        .map(str::trim)
        .filter_map(parse_forwarded_entry)
        .collect();

    if chain.is_empty() || trusted_proxy_depth >= chain.len() {
        return None;
    }

    let index = chain.len().saturating_sub(1 + trusted_proxy_depth);
    chain.get(index).copied()
}

fn parse_forwarded_entry(value: &str) -> Option<IpAddr> {
    if let Ok(ip) = IpAddr::from_str(value) {
        return Some(ip);
    }

    // Some proxies append the port.
    if let Ok(addr) = SocketAddr::from_str(value) {
        return Some(addr.ip());
    }

    None
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use ipnet::IpNet;
    use tower::service_fn;
    use tower::ServiceExt;

    fn cardcom_ranges() -> AllowedIps {
        AllowedIps::Cidrs(vec!["203.0.113.0/24".parse::<IpNet>().unwrap()])
    }

    fn ok_service() -> impl Service<Request<Body>, Response = Response, Error = Infallible> + Clone
    {
        service_fn(|_req: Request<Body>| async move {
            Ok::<Response, Infallible>(StatusCode::OK.into_response())
        })
    }

    #[test]
    fn forwarded_chain_skips_trusted_proxies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.10, 198.51.100.7"),
        );
        let ip = forwarded_client_ip(&headers, 1);
        assert_eq!(ip, Some(IpAddr::from([203, 0, 113, 10])));
    }

    #[test]
    fn forwarded_chain_shorter_than_depth_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.10"));
        assert_eq!(forwarded_client_ip(&headers, 1), None);
    }

    #[test]
    fn entries_with_ports_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.10:4431, 198.51.100.7"),
        );
        let ip = forwarded_client_ip(&headers, 1);
        assert_eq!(ip, Some(IpAddr::from([203, 0, 113, 10])));
    }

    #[tokio::test]
    async fn listed_source_passes() {
        let service = IpFilterLayer::new(cardcom_ranges(), 1).layer(ok_service());
        let mut req = Request::builder()
            .uri("/webhooks/cardcom")
            .body(Body::empty())
            .unwrap();
        req.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.55, 198.51.100.7"),
        );

        let res = service.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unlisted_source_is_forbidden() {
        let service = IpFilterLayer::new(cardcom_ranges(), 1).layer(ok_service());
        let mut req = Request::builder()
            .uri("/webhooks/cardcom")
            .body(Body::empty())
            .unwrap();
        req.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.55, 198.51.100.7"),
        );

        let res = service.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn open_filter_passes_anything() {
        let service = IpFilterLayer::new(AllowedIps::Any, 0).layer(ok_service());
        let req = Request::builder()
            .uri("/webhooks/payplus")
            .body(Body::empty())
            .unwrap();

        let res = service.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn socket_peer_is_used_when_no_forwarded_header() {
        let service = IpFilterLayer::new(cardcom_ranges(), 1).layer(ok_service());
        let mut req = Request::builder()
            .uri("/webhooks/cardcom")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 44], 8080))));

        let res = service.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unresolvable_source_is_forbidden_for_cidr_filters() {
        let service = IpFilterLayer::new(cardcom_ranges(), 1).layer(ok_service());
        let req = Request::builder()
            .uri("/webhooks/cardcom")
            .body(Body::empty())
            .unwrap();

        let res = service.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}
