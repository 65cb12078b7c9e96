use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use cadenza::auth::SharedPasswordAuth;
use cadenza::engine::Engine;
use cadenza::maintenance;
use cadenza::notify::NotifyHub;
use cadenza::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("CADENZA_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    cadenza::observability::init(metrics_port);

    let port = std::env::var("CADENZA_PORT").unwrap_or_else(|_| "7420".into());
    let bind = std::env::var("CADENZA_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("CADENZA_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let password = std::env::var("CADENZA_PASSWORD").unwrap_or_else(|_| "cadenza".into());
    let max_connections: usize = std::env::var("CADENZA_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);
    let compact_threshold: u64 = std::env::var("CADENZA_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    // The notification hub and engine are built exactly once here and passed
    // down; they live until process exit.
    let notify = Arc::new(NotifyHub::new());
    let wal_path = PathBuf::from(&data_dir).join("school.wal");
    let engine = Arc::new(Engine::new(wal_path, notify)?);
    let auth: Arc<dyn cadenza::auth::AuthSource> = Arc::new(SharedPasswordAuth::new(password));

    let compactor_engine = engine.clone();
    tokio::spawn(async move {
        maintenance::run_compactor(compactor_engine, compact_threshold).await;
    });

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("cadenza listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  max_connections: {max_connections}");
    info!("  compact_threshold: {compact_threshold}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(cadenza::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(cadenza::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(cadenza::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let auth = auth.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, auth).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(cadenza::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("cadenza stopped");
    Ok(())
}
