use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use tokio::sync::oneshot::Sender;
use tokio::task;
use tokio::task::JoinHandle;
use tracing::{error, info, trace};

/// Serves the backend's own prometheus metrics until dropped.
pub struct PrometheusEndpoint {
    shutdown_tx: Option<Sender<()>>,
    server_thread: Option<JoinHandle<()>>,
}

impl PrometheusEndpoint {
    pub fn new(addr: SocketAddr) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server_thread = task::spawn(async move {
            let make_svc = make_service_fn(|_conn| async {
                Ok::<_, hyper::Error>(service_fn(metrics_handler))
            });

            let server = match Server::try_bind(&addr) {
                Ok(builder) => builder.serve(make_svc),
                Err(e) => {
                    error!("failed to bind prometheus endpoint on {}: {}", addr, e);
                    return;
                }
            };
            let graceful = server.with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });
            info!("Listening on http://{}", addr);

            if let Err(e) = graceful.await {
                error!("server error: {}", e);
            }
        });

        PrometheusEndpoint {
            shutdown_tx: Some(shutdown_tx),
            server_thread: Some(server_thread),
        }
    }
}

impl Drop for PrometheusEndpoint {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("Prometheus endpoint shutdown");
        }
        if let Some(thread) = self.server_thread.take() {
            drop(thread);
        }
    }
}

async fn metrics_handler(_req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    trace!("Metrics request received");
    let response = match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => Response::builder()
            .header(hyper::header::CONTENT_TYPE, encoder.format_type())
            .body(Body::from(buffer)),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(e.to_string())),
    };
    Ok(response.unwrap_or_else(|_| Response::new(Body::empty())))
}
