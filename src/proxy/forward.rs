//! Forwarding of allowed requests and the proxy's own responses.
//!
//! Two request shapes reach the forwarder:
//!
//! 1. Absolute-form HTTP (`GET http://a.test/x HTTP/1.1`): relayed through a
//!    shared pooled client, the upstream response streamed back as is
//! 2. `CONNECT a.test:443 HTTP/1.1`: the upstream TCP connection is opened
//!    first, then `200` is returned and bytes are copied both ways after the
//!    upgrade until either side closes
//!
//! Tunnels are opaque. Nothing inside them is decrypted or inspected.

use super::error::{ProxyError, ProxyResult};
use super::target::TargetId;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderMap, HeaderValue, PROXY_AUTHORIZATION};
use hyper::upgrade::Upgraded;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Body type of every response the proxy produces.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Default port for a `CONNECT` authority without one.
const DEFAULT_TUNNEL_PORT: u16 = 443;

/// Relays allowed requests and builds the proxy's own responses.
pub struct Forwarder {
    client: Client<HttpConnector, Incoming>,
    product_name: String,
}

impl Forwarder {
    /// Create a forwarder. `product_name` appears in rejection bodies.
    pub fn new(product_name: impl Into<String>) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            product_name: product_name.into(),
        }
    }

    /// Relay an allowed request to its destination.
    ///
    /// An error means no response headers came back from upstream; the
    /// caller answers with [`Forwarder::bad_gateway`].
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        target: &TargetId,
    ) -> ProxyResult<Response<ProxyBody>> {
        if req.method() == Method::CONNECT {
            self.open_tunnel(req, target).await
        } else {
            self.forward_http(req, target).await
        }
    }

    /// `403 Forbidden` with `Blocked by <product>`.
    pub fn reject(&self) -> Response<ProxyBody> {
        text_response(
            StatusCode::FORBIDDEN,
            format!("Blocked by {}", self.product_name),
        )
    }

    /// `400 Bad Request` for requests that name no destination.
    pub fn bad_request(&self) -> Response<ProxyBody> {
        text_response(
            StatusCode::BAD_REQUEST,
            "Bad Request: proxy requests must use absolute-form or CONNECT".to_string(),
        )
    }

    /// `502 Bad Gateway` for upstream failures.
    pub fn bad_gateway(&self, error: &ProxyError) -> Response<ProxyBody> {
        text_response(StatusCode::BAD_GATEWAY, format!("Bad Gateway: {}", error))
    }

    /// `503 Service Unavailable` when the decision was abandoned.
    pub fn unavailable(&self) -> Response<ProxyBody> {
        text_response(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{} is shutting down", self.product_name),
        )
    }

    async fn forward_http(
        &self,
        mut req: Request<Incoming>,
        target: &TargetId,
    ) -> ProxyResult<Response<ProxyBody>> {
        strip_proxy_headers(req.headers_mut());
        debug!("Forwarding {} {}", req.method(), target);

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyError::UpstreamConnect {
                addr: target.to_string(),
                message: e.to_string(),
            })?;

        Ok(response.map(|body| body.boxed()))
    }

    async fn open_tunnel(
        &self,
        req: Request<Incoming>,
        target: &TargetId,
    ) -> ProxyResult<Response<ProxyBody>> {
        let addr = tunnel_addr(&req)?;

        // Connect before answering so an unreachable host gets a 502.
        let upstream = TcpStream::connect(&addr)
            .await
            .map_err(|e| ProxyError::UpstreamConnect {
                addr: addr.clone(),
                message: e.to_string(),
            })?;

        debug!("Connected to upstream {} for {}", addr, target);

        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    if let Err(e) = relay(upgraded, upstream, &addr).await {
                        debug!("Tunnel ended: {}", e);
                    }
                }
                Err(e) => {
                    warn!("HTTP upgrade failed for {}: {}", addr, e);
                }
            }
        });

        Ok(Response::new(empty_body()))
    }
}

/// Copy bytes both ways until either side closes.
async fn relay(upgraded: Upgraded, mut upstream: TcpStream, addr: &str) -> ProxyResult<()> {
    let mut client = TokioIo::new(upgraded);

    let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut upstream)
        .await
        .map_err(|e| ProxyError::UpstreamIo {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;

    debug!(
        "Tunnel to {} closed ({} bytes up, {} bytes down)",
        addr, sent, received
    );
    Ok(())
}

/// Upstream `host:port` for a `CONNECT` request.
fn tunnel_addr<B>(req: &Request<B>) -> ProxyResult<String> {
    let authority = req
        .uri()
        .authority()
        .ok_or_else(|| ProxyError::MalformedTarget("CONNECT without authority".into()))?;

    Ok(match authority.port_u16() {
        Some(_) => authority.as_str().to_string(),
        None => format!("{}:{}", authority.host(), DEFAULT_TUNNEL_PORT),
    })
}

/// Remove headers addressed to the proxy rather than the destination.
fn strip_proxy_headers(headers: &mut HeaderMap) {
    headers.remove("proxy-connection");
    headers.remove(PROXY_AUTHORIZATION);
}

fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full_body(content: String) -> ProxyBody {
    Full::new(Bytes::from(content))
        .map_err(|never| match never {})
        .boxed()
}

fn text_response(status: StatusCode, body: String) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn connect_request(authority: &str) -> Request<()> {
        Request::builder()
            .method(Method::CONNECT)
            .uri(authority)
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn test_reject_response() {
        let response = Forwarder::new("CodeShield").reject();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_text(response).await, "Blocked by CodeShield");
    }

    #[tokio::test]
    async fn test_reject_uses_product_name() {
        let response = Forwarder::new("Acme Guard").reject();
        assert_eq!(body_text(response).await, "Blocked by Acme Guard");
    }

    #[tokio::test]
    async fn test_bad_gateway_response() {
        let error = ProxyError::UpstreamConnect {
            addr: "a.test:80".to_string(),
            message: "connection refused".to_string(),
        };
        let response = Forwarder::new("CodeShield").bad_gateway(&error);

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert!(body_text(response).await.contains("connection refused"));
    }

    #[test]
    fn test_bad_request_and_unavailable_status() {
        let forwarder = Forwarder::new("CodeShield");
        assert_eq!(forwarder.bad_request().status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            forwarder.unavailable().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_tunnel_addr_with_port() {
        let addr = tunnel_addr(&connect_request("a.test:8443")).unwrap();
        assert_eq!(addr, "a.test:8443");
    }

    #[test]
    fn test_tunnel_addr_default_port() {
        let addr = tunnel_addr(&connect_request("a.test")).unwrap();
        assert_eq!(addr, "a.test:443");
    }

    #[test]
    fn test_tunnel_addr_ipv6() {
        let addr = tunnel_addr(&connect_request("[::1]:443")).unwrap();
        assert_eq!(addr, "[::1]:443");
    }

    #[test]
    fn test_strip_proxy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert(PROXY_AUTHORIZATION, HeaderValue::from_static("Basic eDp5"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_proxy_headers(&mut headers);

        assert!(!headers.contains_key("proxy-connection"));
        assert!(!headers.contains_key(PROXY_AUTHORIZATION));
        assert_eq!(headers["accept"], "*/*");
    }
}
