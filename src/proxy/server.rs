//! HTTP proxy server implementation.
//!
//! This module provides the intercepting server that:
//! - Listens for TCP connections from the host application
//! - Extracts the target of each request and classifies it against policy
//! - Suspends requests for unknown targets on the decision broker
//! - Forwards allowed requests and rejects denied ones
//!
//! # Architecture
//!
//! The proxy uses hyper's HTTP/1.1 server with upgrade support for CONNECT.
//! Each connection is handled in a separate Tokio task, so a request waiting
//! for a human never holds up the accept loop or any other connection.
//!
//! # Example
//!
//! ```ignore
//! use codeshield::proxy::{ProxyConfig, ProxyServer};
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ProxyServer::bind(config, store, broker, audit, shutdown_rx).await?;
//! println!("listening on {}", server.local_addr());
//! server.run().await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use super::broker::{DecisionBroker, Resolution};
use super::error::{ProxyError, ProxyResult};
use super::forward::{Forwarder, ProxyBody};
use super::policy::{Classification, PolicyStore, Verdict};
use super::target::{TargetId, extract_target};
use crate::telemetry::{AllowReason, AuditEvent, AuditLogger, BlockReason};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to listen on. Port `0` picks a free port.
    pub listen: SocketAddr,
    /// Name shown in rejection bodies.
    pub product_name: String,
    /// How long in-flight connections may run after shutdown is signalled.
    pub drain_timeout: Duration,
}

/// Shared state for request handling.
struct Interceptor {
    store: Arc<PolicyStore>,
    broker: Arc<DecisionBroker>,
    forwarder: Forwarder,
    audit: Arc<AuditLogger>,
}

/// The intercepting proxy server.
pub struct ProxyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    drain_timeout: Duration,
    interceptor: Arc<Interceptor>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Bind the listening socket.
    ///
    /// # Arguments
    ///
    /// * `config` - Proxy configuration.
    /// * `store` - Policy store consulted for every request.
    /// * `broker` - Decision broker for unknown targets.
    /// * `audit` - Audit logger for allow/block events.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub async fn bind(
        config: ProxyConfig,
        store: Arc<PolicyStore>,
        broker: Arc<DecisionBroker>,
        audit: Arc<AuditLogger>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> ProxyResult<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            drain_timeout: config.drain_timeout,
            interceptor: Arc::new(Interceptor {
                store,
                broker,
                forwarder: Forwarder::new(config.product_name),
                audit,
            }),
            shutdown_rx,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the decision broker.
    pub fn broker(&self) -> Arc<DecisionBroker> {
        self.interceptor.broker.clone()
    }

    /// Get a reference to the policy store.
    pub fn store(&self) -> Arc<PolicyStore> {
        self.interceptor.store.clone()
    }

    /// Run the proxy server.
    ///
    /// Returns when the shutdown signal is received and in-flight
    /// connections have finished or the drain timeout has passed.
    pub async fn run(self) -> ProxyResult<()> {
        info!("Proxy listening on {}", self.local_addr);

        let mut connections = JoinSet::new();
        let mut shutdown_rx = self.shutdown_rx.clone();

        // Accept loop
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {}", peer);
                            connections.spawn(serve_connection(
                                stream,
                                self.interceptor.clone(),
                                self.shutdown_rx.clone(),
                            ));
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Reap finished connection tasks so the set stays small.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Proxy shutting down");
                        break;
                    }
                }
            }
        }

        drop(self.listener);
        drain(connections, self.drain_timeout).await;
        Ok(())
    }
}

/// Wait for in-flight connections, then abort whatever is left.
async fn drain(mut connections: JoinSet<()>, timeout: Duration) {
    if connections.is_empty() {
        return;
    }

    debug!("Draining {} connection(s)", connections.len());
    let finished = tokio::time::timeout(timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if finished.is_err() {
        warn!(
            "Aborting {} connection(s) still open after {:?}",
            connections.len(),
            timeout
        );
        connections.shutdown().await;
    }
}

/// Serve a single client connection.
///
/// On shutdown the connection finishes its in-flight request and then
/// closes, so idle keep-alive clients do not hold up the drain.
async fn serve_connection(
    stream: TcpStream,
    interceptor: Arc<Interceptor>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let interceptor = interceptor.clone();
        async move { proxy_request(req, interceptor).await }
    });

    // Serve HTTP/1.1 with support for upgrades (needed for CONNECT)
    let conn = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .with_upgrades();
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        stopping = async { shutdown_rx.wait_for(|stop| *stop).await.is_ok() } => {
            if stopping {
                debug!("Closing connection for shutdown");
                conn.as_mut().graceful_shutdown();
            }
            conn.as_mut().await
        }
    };

    if let Err(e) = result.map_err(ProxyError::from) {
        // Connection resets are routine for a proxy
        let err_str = e.to_string();
        if err_str.contains("connection reset")
            || err_str.contains("broken pipe")
            || err_str.contains("Connection reset")
        {
            debug!("Connection ended: {}", e);
        } else {
            warn!("Connection error: {}", e);
        }
    }
}

/// Process a single proxy request.
///
/// Every outcome is a response; errors never reach hyper.
async fn proxy_request(
    req: Request<Incoming>,
    interceptor: Arc<Interceptor>,
) -> Result<Response<ProxyBody>, Infallible> {
    let target = match extract_target(&req) {
        Ok(target) => target,
        Err(e) => {
            debug!("Rejecting {} {}: {}", req.method(), req.uri(), e);
            return Ok(interceptor.forwarder.bad_request());
        }
    };

    let outcome = match interceptor.store.lookup(target.as_str()) {
        Classification::Allowed => Outcome::Forward(AllowReason::Policy),
        Classification::Denied => Outcome::Reject(BlockReason::Policy),
        Classification::Unknown => {
            debug!("No policy for {}, asking", target);
            match interceptor.broker.resolve(&target).await {
                Ok(Resolution::Decided(Verdict::Allowed)) => {
                    Outcome::Forward(AllowReason::UserAllowed)
                }
                Ok(Resolution::Decided(Verdict::Denied)) => {
                    Outcome::Reject(BlockReason::UserDenied)
                }
                Ok(Resolution::TimedOut) => Outcome::Reject(BlockReason::PromptTimeout),
                Err(e) => {
                    info!("{}", e);
                    return Ok(interceptor.forwarder.unavailable());
                }
            }
        }
    };

    Ok(interceptor.dispatch(req, target, outcome).await)
}

/// What to do with a classified request.
enum Outcome {
    Forward(AllowReason),
    Reject(BlockReason),
}

impl Interceptor {
    async fn dispatch(
        &self,
        req: Request<Incoming>,
        target: TargetId,
        outcome: Outcome,
    ) -> Response<ProxyBody> {
        match outcome {
            Outcome::Forward(reason) => {
                self.audit.log(AuditEvent::RequestAllow {
                    target: target.to_string(),
                    reason,
                });
                debug!("Allowing {} ({:?})", target, reason);

                match self.forwarder.forward(req, &target).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Upstream failure for {}: {}", target, e);
                        self.forwarder.bad_gateway(&e)
                    }
                }
            }
            Outcome::Reject(reason) => {
                self.audit.log(AuditEvent::RequestBlock {
                    target: target.to_string(),
                    reason,
                });
                info!("Blocking {} ({:?})", target, reason);
                self.forwarder.reject()
            }
        }
    }
}
