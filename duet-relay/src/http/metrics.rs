//! Prometheus metrics endpoint.

use crate::server::DuetServer;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(server): Extension<Arc<DuetServer>>) -> impl IntoResponse {
    render(&server)
}

fn render(server: &DuetServer) -> ([(axum::http::HeaderName, &'static str); 1], String) {
    let h = server.hosts().stats();
    let r = server.relay().stats();

    // Gauges: current state
    let status = server.gc_status();

    // Counters: monotonic since startup
    let hosts_opened = h.opened_total.load(Ordering::Relaxed);
    let hosts_closed = h.closed_total.load(Ordering::Relaxed);
    let hosts_expired = h.expired_total.load(Ordering::Relaxed);
    let offers = h.offers_total.load(Ordering::Relaxed);
    let offers_discarded = h.offers_discarded_total.load(Ordering::Relaxed);
    let transfers = r.transfers_total.load(Ordering::Relaxed);
    let transfer_errors = r.transfer_errors_total.load(Ordering::Relaxed);
    let bytes = r.bytes_relayed_total.load(Ordering::Relaxed);
    let conns_expired = r.expired_total.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP duet_hosts_open Number of open host mailboxes
# TYPE duet_hosts_open gauge
duet_hosts_open {hosts_open}

# HELP duet_listeners_waiting Number of blocked accept calls
# TYPE duet_listeners_waiting gauge
duet_listeners_waiting {listeners}

# HELP duet_sockets_open Number of open relay connections
# TYPE duet_sockets_open gauge
duet_sockets_open {sockets}

# HELP duet_relay_unfulfilled Relay operations not yet settled
# TYPE duet_relay_unfulfilled gauge
duet_relay_unfulfilled {unfulfilled}

# HELP duet_relay_queued Relay operations waiting for a match
# TYPE duet_relay_queued gauge
duet_relay_queued {queued}

# HELP duet_info Server information
# TYPE duet_info gauge
duet_info{{version="{version}"}} 1

# HELP duet_hosts_opened_total Total host mailboxes opened
# TYPE duet_hosts_opened_total counter
duet_hosts_opened_total {hosts_opened}

# HELP duet_hosts_closed_total Total host mailboxes closed by their owner
# TYPE duet_hosts_closed_total counter
duet_hosts_closed_total {hosts_closed}

# HELP duet_hosts_expired_total Total host mailboxes pruned
# TYPE duet_hosts_expired_total counter
duet_hosts_expired_total {hosts_expired}

# HELP duet_offers_total Total connection offers deposited
# TYPE duet_offers_total counter
duet_offers_total {offers}

# HELP duet_offers_discarded_total Total offers dropped with their mailbox
# TYPE duet_offers_discarded_total counter
duet_offers_discarded_total {offers_discarded}

# HELP duet_relay_transfers_total Total transfers completed
# TYPE duet_relay_transfers_total counter
duet_relay_transfers_total {transfers}

# HELP duet_relay_transfer_errors_total Total transfers failed or cancelled
# TYPE duet_relay_transfer_errors_total counter
duet_relay_transfer_errors_total {transfer_errors}

# HELP duet_relay_bytes_total Total payload bytes relayed
# TYPE duet_relay_bytes_total counter
duet_relay_bytes_total {bytes}

# HELP duet_connections_expired_total Total relay connections pruned
# TYPE duet_connections_expired_total counter
duet_connections_expired_total {conns_expired}
"#,
        hosts_open = status.hosts_open,
        listeners = status.listeners_waiting,
        sockets = status.sockets_open,
        unfulfilled = status.relay_unfulfilled,
        queued = status.relay_queued,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use duet_types::PeerKey;

    #[test]
    fn gauges_and_counters_are_rendered() {
        let server = DuetServer::new(Config::default());
        server.hosts().open(PeerKey::from("k"), tokio::time::Instant::now());

        let (_, body) = render(&server);
        assert!(body.contains("# TYPE duet_hosts_open gauge"));
        assert!(body.contains("duet_hosts_open 1\n"));
        assert!(body.contains("duet_hosts_opened_total 1\n"));
        assert!(body.contains("duet_relay_bytes_total 0\n"));
    }
}
