//! DuetServer: the long-lived service objects behind the HTTP boundary.
//!
//! Built once at startup and shared by `Arc` with the router and the prune
//! task.

use crate::config::Config;
use crate::host::HostStore;
use crate::relay::RelayEngine;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Instant as TokioInstant;

/// Point-in-time gauges, as logged after each prune sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStatus {
    /// Mailboxes open.
    pub hosts_open: usize,
    /// `accept` calls blocked.
    pub listeners_waiting: usize,
    /// Relay connections open.
    pub sockets_open: usize,
    /// Relay operations not yet settled.
    pub relay_unfulfilled: usize,
    /// Relay operations queued for a match.
    pub relay_queued: usize,
}

impl GcStatus {
    /// All gauges zero.
    pub fn is_idle(&self) -> bool {
        *self == GcStatus::default()
    }
}

/// Rendezvous store plus relay engine.
#[derive(Debug)]
pub struct DuetServer {
    config: Config,
    hosts: Arc<HostStore>,
    relay: Arc<RelayEngine>,
    started: Instant,
}

impl DuetServer {
    /// Create both services from `config`.
    pub fn new(config: Config) -> Self {
        let hosts = Arc::new(HostStore::new(config.host.relayers.clone()));
        let relay = Arc::new(RelayEngine::new(config.relay.idle_timeout()));
        Self {
            config,
            hosts,
            relay,
            started: Instant::now(),
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The rendezvous store.
    pub fn hosts(&self) -> &Arc<HostStore> {
        &self.hosts
    }

    /// The relay pairing engine.
    pub fn relay(&self) -> &Arc<RelayEngine> {
        &self.relay
    }

    /// Seconds since the server was built.
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Deadline for a mailbox opened now.
    pub fn host_expiry(&self) -> TokioInstant {
        TokioInstant::now() + self.config.host.ttl()
    }

    /// Sweep both services once. Returns `(hosts, connections)` removed.
    pub fn prune(&self, now: TokioInstant) -> (usize, usize) {
        (self.hosts.prune(now), self.relay.prune(now))
    }

    /// Current gauges.
    pub fn gc_status(&self) -> GcStatus {
        GcStatus {
            hosts_open: self.hosts.hosts_open(),
            listeners_waiting: self.hosts.listeners_waiting(),
            sockets_open: self.relay.sockets_open(),
            relay_unfulfilled: self.relay.unfulfilled(),
            relay_queued: self.relay.queued(),
        }
    }

    /// Wake every blocked `accept` empty and fail every relay operation with
    /// a timeout.
    pub fn shutdown(&self) {
        let hosts = self.hosts.close_all();
        let connections = self.relay.cancel_all();
        tracing::info!(hosts, connections, "duet server shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_types::{ConnectionId, PeerKey};
    use std::time::Duration;

    #[test]
    fn new_server_is_idle() {
        let server = DuetServer::new(Config::default());
        assert!(server.gc_status().is_idle());
        assert_eq!(server.hosts().relayers(), ["/api/relay/".to_string()]);
    }

    #[tokio::test]
    async fn prune_sweeps_both_services() {
        let server = DuetServer::new(Config::default());
        server.hosts().open(PeerKey::from("k"), server.host_expiry());
        server
            .relay()
            .open(&ConnectionId::new("c").unwrap(), &PeerKey::from("k"))
            .unwrap();

        let status = server.gc_status();
        assert_eq!(status.hosts_open, 1);
        assert_eq!(status.sockets_open, 1);

        let later = TokioInstant::now() + Duration::from_secs(61);
        assert_eq!(server.prune(later), (1, 1));
        assert!(server.gc_status().is_idle());
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_accept() {
        let server = Arc::new(DuetServer::new(Config::default()));
        let owner = PeerKey::from("k");
        let hid = server.hosts().open(owner.clone(), server.host_expiry());

        let waiting = tokio::spawn({
            let server = server.clone();
            async move { server.hosts().accept(&hid, &owner).await }
        });
        while server.hosts().listeners_waiting() == 0 {
            tokio::task::yield_now().await;
        }

        server.shutdown();
        assert_eq!(waiting.await.unwrap(), Ok(None));
        assert!(server.gc_status().is_idle());
    }
}
