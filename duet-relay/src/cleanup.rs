//! Background prune task for expired mailboxes and idle connections.
//!
//! One task sweeps both services, so sweeps never overlap.

use crate::config::CleanupConfig;
use crate::server::DuetServer;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Spawn the background prune task.
///
/// The task exits when `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_cleanup_task(
    server: Arc<DuetServer>,
    config: CleanupConfig,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        tracing::info!("Cleanup task started (interval: {}s)", config.interval_secs);

        let mut timer = interval(config.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => sweep(&server),
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        tracing::info!("Cleanup task stopped");
    })
}

/// Run one sweep and log what is left.
pub fn sweep(server: &DuetServer) {
    let (hosts, connections) = server.prune(Instant::now());
    if hosts + connections > 0 {
        tracing::info!(hosts, connections, "Cleanup: pruned expired entries");
    } else {
        tracing::debug!("Cleanup: nothing expired");
    }

    let status = server.gc_status();
    if !status.is_idle() {
        tracing::info!(
            hosts_open = status.hosts_open,
            listeners_waiting = status.listeners_waiting,
            sockets_open = status.sockets_open,
            relay_unfulfilled = status.relay_unfulfilled,
            relay_queued = status.relay_queued,
            "Garbage collection status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use duet_types::PeerKey;
    use std::time::Duration;

    fn server() -> Arc<DuetServer> {
        Arc::new(DuetServer::new(Config::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_prunes_on_interval() {
        let server = server();
        server.hosts().open(PeerKey::from("k"), server.host_expiry());

        let (stop, shutdown) = watch::channel(false);
        let handle = spawn_cleanup_task(
            server.clone(),
            CleanupConfig {
                interval_secs: 30,
                enabled: true,
            },
            shutdown,
        );

        // Host TTL is 60s: the 30s sweep keeps it, the 60s sweep removes it
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(server.hosts().hosts_open(), 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(server.hosts().hosts_open(), 0);

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_task_disabled() {
        let (_stop, shutdown) = watch::channel(false);
        let config = CleanupConfig {
            interval_secs: 1,
            enabled: false,
        };

        let handle = spawn_cleanup_task(server(), config, shutdown);

        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn cleanup_task_stops_when_sender_dropped() {
        let (stop, shutdown) = watch::channel(false);
        let handle = spawn_cleanup_task(server(), CleanupConfig::default(), shutdown);
        drop(stop);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("Task should stop")
            .expect("Task should not panic");
    }
}
