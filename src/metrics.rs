use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Default)]
pub struct Metrics {
    pub connections_accepted: AtomicU64,
    pub requests_captured: AtomicU64,
    pub records_persisted: AtomicU64,
    pub requests_dropped: AtomicU64,
}

impl Metrics {
    pub fn inc_connections(&self) { self.connections_accepted.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_captured(&self) { self.requests_captured.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_persisted(&self) { self.records_persisted.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_dropped(&self) { self.requests_dropped.fetch_add(1, Ordering::Relaxed); }
}

/// Minimal plaintext exposition endpoint. One response per connection, no
/// routing; anything that connects gets the counters.
pub async fn spawn_metrics_server(addr: String, metrics: Arc<Metrics>) {
    let bind: SocketAddr = match addr.parse() {
        Ok(a) => a,
        Err(e) => {
            warn!(%addr, error = %e, "invalid metrics bind address; metrics disabled");
            return;
        }
    };
    info!(%bind, "metrics server starting");
    tokio::spawn(async move {
        use tokio::net::TcpListener;
        let listener = match TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = ?e, "metrics bind failed");
                return;
            }
        };
        loop {
            if let Ok((mut s, _peer)) = listener.accept().await {
                let m = &metrics;
                let body = format!(
                    "# HELP connections_accepted total TCP connections accepted by the capture listener\n# TYPE connections_accepted counter\nconnections_accepted {}\n# HELP requests_captured total requests parsed off accepted connections\n# TYPE requests_captured counter\nrequests_captured {}\n# HELP records_persisted total capture records written to disk\n# TYPE records_persisted counter\nrecords_persisted {}\n# HELP requests_dropped total connections dropped for unparseable or oversized input\n# TYPE requests_dropped counter\nrequests_dropped {}\n",
                    m.connections_accepted.load(Ordering::Relaxed),
                    m.requests_captured.load(Ordering::Relaxed),
                    m.records_persisted.load(Ordering::Relaxed),
                    m.requests_dropped.load(Ordering::Relaxed)
                );
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = s.write_all(resp.as_bytes()).await;
            }
        }
    });
}

pub fn record_connection(metrics: &Option<Arc<Metrics>>) { if let Some(m) = metrics { m.inc_connections(); } }
pub fn record_request(metrics: &Option<Arc<Metrics>>) { if let Some(m) = metrics { m.inc_captured(); } }
pub fn record_persisted(metrics: &Option<Arc<Metrics>>) { if let Some(m) = metrics { m.inc_persisted(); } }
pub fn record_dropped(metrics: &Option<Arc<Metrics>>) { if let Some(m) = metrics { m.inc_dropped(); } }
