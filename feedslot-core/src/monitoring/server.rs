//! HTTP monitoring server
//!
//! Read-only views over the running core plus the session reset hook:
//!
//! | Method | Path             | Body                                   |
//! |--------|------------------|----------------------------------------|
//! | GET    | `/metrics`       | Prometheus text format                 |
//! | GET    | `/snapshot`      | `StateSnapshot` as JSON                |
//! | GET    | `/health`        | `OK`, or 503 once shutdown has begun   |
//! | POST   | `/session/reset` | clears the circuit breaker latch       |

use super::MetricsRegistry;
use crate::resilience::KillSwitch;
use crate::risk::RiskGuard;
use crate::state::StateBus;
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// What the handlers read from
#[derive(Clone)]
pub struct ServerState {
    pub metrics: MetricsRegistry,
    pub bus: StateBus,
    pub risk: RiskGuard,
    pub kill_switch: KillSwitch,
}

pub struct MonitoringServer {
    listen_addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MonitoringServer {
    pub fn new(listen_addr: &str, state: ServerState) -> Result<Self> {
        let listen_addr = listen_addr
            .parse()
            .with_context(|| format!("Invalid monitoring listen address '{}'", listen_addr))?;
        Ok(Self {
            listen_addr,
            state: Arc::new(state),
        })
    }

    /// Accept connections until the kill switch fires
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .context("Failed to bind monitoring server")?;

        info!("Monitoring server listening on http://{}", self.listen_addr);

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = self.state.kill_switch.stopped() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let state = self.state.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(route(req.method(), req.uri().path(), &state)) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection error from {}: {}", remote_addr, err);
                }
            });
        }

        info!("Monitoring server stopped");
        Ok(())
    }
}

/// Dispatch one request
pub fn route(method: &Method, path: &str, state: &ServerState) -> Response<Full<Bytes>> {
    debug!("Monitoring request: {} {}", method, path);

    match (method, path) {
        (&Method::GET, "/metrics") => match encode_metrics(&state.metrics) {
            Ok(text) => respond(StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => {
                error!("Failed to encode metrics: {:#}", e);
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", format!("Error: {}", e))
            }
        },
        (&Method::GET, "/snapshot") => match serde_json::to_string(&state.bus.snapshot()) {
            Ok(json) => respond(StatusCode::OK, "application/json", json),
            Err(e) => {
                error!("Failed to serialize snapshot: {}", e);
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", format!("Error: {}", e))
            }
        },
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            if state.kill_switch.should_stop() {
                respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "SHUTTING DOWN")
            } else {
                respond(StatusCode::OK, "text/plain", "OK")
            }
        }
        (&Method::POST, "/session/reset") => {
            state.risk.reset_session(&state.bus);
            state.metrics.risk().breaker_tripped.set(0);
            info!("Session reset requested over HTTP");
            respond(StatusCode::OK, "text/plain", "session reset")
        }
        (&Method::GET, "/") => respond(
            StatusCode::OK,
            "text/plain",
            "feedslot monitoring\n\nEndpoints:\n  GET  /metrics - Prometheus metrics\n  GET  /snapshot - state snapshot (JSON)\n  GET  /health - health check\n  POST /session/reset - clear the circuit breaker\n",
        ),
        _ => {
            warn!("Unknown monitoring endpoint requested: {} {}", method, path);
            respond(StatusCode::NOT_FOUND, "text/plain", "Not Found")
        }
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Encode metrics to Prometheus text format
pub fn encode_metrics(registry: &MetricsRegistry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.registry().gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;

    String::from_utf8(buffer).context("Invalid UTF-8 in metrics")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::Symbol;
    use crate::risk::RiskLimits;
    use http_body_util::BodyExt;
    use rust_decimal_macros::dec;
    use std::time::SystemTime;

    fn state() -> ServerState {
        ServerState {
            metrics: MetricsRegistry::new().unwrap(),
            bus: StateBus::new(&Config::default()),
            risk: RiskGuard::new(RiskLimits {
                max_daily_loss: dec!(1000),
                max_open_orders: 10,
            }),
            kill_switch: KillSwitch::new(),
        }
    }

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = state();
        state.metrics.system().ticks_total.inc();

        let response = route(&Method::GET, "/metrics", &state);
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("feedslot_ticks_total"));
        assert!(text.contains("TYPE"));
    }

    #[tokio::test]
    async fn test_snapshot_endpoint_is_json() {
        let state = state();
        state
            .bus
            .record_tick(&Symbol::new("AAPL"), 101.5, SystemTime::now());

        let response = route(&Method::GET, "/snapshot", &state);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["quotes"]["AAPL"]["last_price"], 101.5);
        assert_eq!(json["risk"]["breaker_tripped"], false);
    }

    #[tokio::test]
    async fn test_session_reset_clears_breaker() {
        let state = state();
        state.risk.record_daily_pnl(&state.bus, dec!(-2000));
        assert!(state.bus.risk().breaker_tripped);

        state.bus.set_daily_pnl(dec!(0));
        let response = route(&Method::POST, "/session/reset", &state);
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.bus.risk().breaker_tripped);

        // GET does not reset
        let response = route(&Method::GET, "/session/reset", &state);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_health_reflects_shutdown() {
        let state = state();
        assert_eq!(route(&Method::GET, "/health", &state).status(), StatusCode::OK);

        state.kill_switch.shutdown("test");
        assert_eq!(
            route(&Method::GET, "/health", &state).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_invalid_listen_addr() {
        assert!(MonitoringServer::new("not-an-addr", state()).is_err());
    }
}
