use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total wire commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "cadenza_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "cadenza_command_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "cadenza_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "cadenza_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "cadenza_connections_rejected_total";

/// Counter: handshake/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "cadenza_auth_failures_total";

/// Counter: notices fanned out to subscribers.
pub const NOTICES_SENT_TOTAL: &str = "cadenza_notices_sent_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "cadenza_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "cadenza_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a wire command to a short label for metrics.
pub fn command_label(req: &Request) -> &'static str {
    match req {
        Request::Hello { .. } => "hello",
        Request::RegisterTeacher { .. } => "register_teacher",
        Request::Teachers => "teachers",
        Request::Slots { .. } => "slots",
        Request::RequestLesson { .. } => "request",
        Request::Approve { .. } => "approve",
        Request::Reject { .. } => "reject",
        Request::Propose { .. } => "propose",
        Request::AcceptReschedule { .. } => "accept_reschedule",
        Request::DeclineReschedule { .. } => "decline_reschedule",
        Request::Complete { .. } => "complete",
        Request::NoShow { .. } => "no_show",
        Request::Cancel { .. } => "cancel",
        Request::Lesson { .. } => "lesson",
        Request::Lessons { .. } => "lessons",
        Request::Pending => "pending",
        Request::Listen => "listen",
        Request::Unlisten => "unlisten",
    }
}
