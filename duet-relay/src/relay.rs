//! Relay pairing engine.
//!
//! Two anonymous peers join a connection by id, each with its own key. A
//! `send` on one side is matched with the oldest `recv` waiting on the other
//! side (and vice versa); the matched pair is then piped chunk by chunk from
//! the sender's [`ByteSource`] into the receiver's [`ByteSink`]. Whichever
//! call arrives second drives the pipe and reports the outcome to the call
//! that was queued.
//!
//! Every chunk renews the connection's idle deadline. Connections idle past
//! the deadline are cancelled by [`RelayEngine::prune`]: the in-flight pipe
//! aborts and every queued operation fails with [`RelayError::Timeout`].
//!
//! Locks are never held across an `.await`. When both are needed the
//! connection map is locked before a connection's state.

use crate::error::{RelayError, RelayResult};
use crate::transport::{BoxSink, BoxSource};
use duet_core::{Joined, LruMap, SocketHandle, SocketPair};
use duet_types::{ConnectionId, PeerKey};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

/// Relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Transfers that ran to a clean end of stream.
    pub transfers_total: AtomicU64,
    /// Transfers that failed or were cancelled.
    pub transfer_errors_total: AtomicU64,
    /// Payload bytes piped between peers.
    pub bytes_relayed_total: AtomicU64,
    /// Connections removed by prune.
    pub expired_total: AtomicU64,
}

/// How a queued receive was settled by the other side.
enum RecvOutcome {
    /// A matched send was piped into the sink.
    Delivered,
    /// The sender closed; the sink is handed back to be finished empty.
    Ended(BoxSink),
}

struct PendingSend {
    source: BoxSource,
    done: oneshot::Sender<RelayResult<()>>,
}

impl PendingSend {
    fn reject(self, error: RelayError) {
        let _ = self.done.send(Err(error));
    }
}

struct PendingRecv {
    sink: BoxSink,
    done: oneshot::Sender<RelayResult<RecvOutcome>>,
}

impl PendingRecv {
    fn end(self) {
        let PendingRecv { sink, done } = self;
        let _ = done.send(Ok(RecvOutcome::Ended(sink)));
    }

    fn reject(self, error: RelayError) {
        let _ = self.done.send(Err(error));
    }
}

type Pair = SocketPair<PeerKey, PendingSend, PendingRecv>;

struct ConnState {
    pair: Pair,
    cancelled: bool,
}

struct Connection {
    id: ConnectionId,
    state: Mutex<ConnState>,
    cancel: watch::Sender<bool>,
}

impl Connection {
    fn new(id: ConnectionId) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id,
            state: Mutex::new(ConnState {
                pair: Pair::new(),
                cancelled: false,
            }),
            cancel,
        }
    }
}

struct Slot {
    expires_at: Instant,
    conn: Arc<Connection>,
}

/// What a `send` does once the state lock is released.
enum SendStep {
    Matched(BoxSource, PendingRecv),
    Queued(oneshot::Receiver<RelayResult<()>>),
}

/// What a `recv` does once the state lock is released.
enum RecvStep {
    Matched(PendingSend, BoxSink),
    Queued(oneshot::Receiver<RelayResult<RecvOutcome>>),
    Ended(BoxSink),
}

/// Two-party byte relay keyed by connection id.
pub struct RelayEngine {
    connections: Mutex<LruMap<ConnectionId, Slot>>,
    idle_timeout: Duration,
    in_flight: AtomicUsize,
    stats: RelayStats,
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("idle_timeout", &self.idle_timeout)
            .field("sockets_open", &self.sockets_open())
            .finish_non_exhaustive()
    }
}

impl RelayEngine {
    /// Create an engine whose connections expire after `idle_timeout`
    /// without traffic.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(LruMap::new()),
            idle_timeout,
            in_flight: AtomicUsize::new(0),
            stats: RelayStats::default(),
        }
    }

    /// Counters.
    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Join connection `id` with `key`, creating it on first use.
    ///
    /// Joining again with the same key is a no-op.
    pub fn open(&self, id: &ConnectionId, key: &PeerKey) -> RelayResult<()> {
        let mut connections = self.connections.lock();
        let conn = match connections.get(id) {
            Some(slot) => slot.conn.clone(),
            None => {
                let conn = Arc::new(Connection::new(id.clone()));
                connections.set(
                    id.clone(),
                    Slot {
                        expires_at: Instant::now() + self.idle_timeout,
                        conn: conn.clone(),
                    },
                );
                conn
            }
        };

        let joined = conn.state.lock().pair.join(key.clone());
        match joined {
            Ok(Joined::New(handle)) => {
                tracing::info!(conn = %id, key = %key.fingerprint(), side = ?handle, "socket open");
                Ok(())
            }
            Ok(Joined::Existing(_)) => Ok(()),
            Err(e) => {
                tracing::debug!(conn = %id, key = %key.fingerprint(), "third peer rejected");
                Err(e.into())
            }
        }
    }

    /// Close `key`'s side for sending.
    ///
    /// Receives waiting on the other side end with no data. This side's own
    /// queued operations are left alone. The connection is removed once both
    /// sides are closed and drained.
    pub fn close(&self, id: &ConnectionId, key: &PeerKey) -> RelayResult<()> {
        let (conn, handle) = self.lookup(id, key)?;

        let ended = conn.state.lock().pair.close(handle)?;
        tracing::debug!(conn = %id, side = ?handle, ended = ended.len(), "socket side closed");
        for recv in ended {
            recv.end();
        }

        self.remove_if_drained(&conn);
        Ok(())
    }

    /// Whether nothing more can ever arrive at `key`'s side.
    ///
    /// True once the connection is gone, or once the other side has closed
    /// and has no sends left in its queue.
    pub fn is_closed(&self, id: &ConnectionId, key: &PeerKey) -> RelayResult<bool> {
        let conn = {
            let connections = self.connections.lock();
            match connections.get(id) {
                Some(slot) => slot.conn.clone(),
                None => return Ok(true),
            }
        };

        let state = conn.state.lock();
        let handle = state
            .pair
            .handle_of(key)
            .ok_or_else(|| RelayError::WrongKey(key.fingerprint()))?;
        Ok(state.pair.counter_finished(handle))
    }

    /// Check that `key` has joined connection `id`.
    pub fn validate(&self, id: &ConnectionId, key: &PeerKey) -> RelayResult<()> {
        self.lookup(id, key).map(|_| ())
    }

    /// Send a byte stream to the other side.
    ///
    /// Pipes straight into the oldest waiting `recv` on the other side, or
    /// queues until one arrives. Resolves once the transfer has settled.
    pub async fn send(&self, id: &ConnectionId, key: &PeerKey, source: BoxSource) -> RelayResult<()> {
        let (conn, handle) = self.lookup(id, key)?;

        let step = {
            let mut state = conn.state.lock();
            if state.pair.socket(handle).is_closed() {
                return Err(RelayError::AlreadyClosed);
            }
            if state.cancelled {
                return Err(RelayError::Timeout);
            }
            match take_live_recv(&mut state.pair, handle) {
                Some(recv) => SendStep::Matched(source, recv),
                None => {
                    let (done, rx) = oneshot::channel();
                    state.pair.queue_send(handle, PendingSend { source, done });
                    SendStep::Queued(rx)
                }
            }
        };

        match step {
            SendStep::Matched(source, PendingRecv { mut sink, done }) => {
                let result = self.transfer(&conn, source, &mut sink).await;
                let _ = done.send(result.clone().map(|()| RecvOutcome::Delivered));
                result
            }
            SendStep::Queued(rx) => {
                tracing::debug!(conn = %id, side = ?handle, "send queued");
                rx.await.unwrap_or(Err(RelayError::Abandoned))
            }
        }
    }

    /// Receive the next byte stream from the other side into `sink`.
    ///
    /// Finishes `sink` empty right away once the other side has closed,
    /// even if that side still has sends queued. Otherwise takes the oldest
    /// send queued on the other side, or queues until one arrives.
    pub async fn recv(&self, id: &ConnectionId, key: &PeerKey, sink: BoxSink) -> RelayResult<()> {
        let (conn, handle) = self.lookup(id, key)?;

        let step = {
            let mut state = conn.state.lock();
            if state.cancelled {
                return Err(RelayError::Timeout);
            }
            if state.pair.socket(handle.counter()).is_closed() {
                RecvStep::Ended(sink)
            } else {
                match take_live_send(&mut state.pair, handle) {
                    Some(send) => RecvStep::Matched(send, sink),
                    None => {
                        // The sending side pipes into the sink or hands it
                        // back on close.
                        let (done, rx) = oneshot::channel();
                        state.pair.queue_recv(handle, PendingRecv { sink, done });
                        RecvStep::Queued(rx)
                    }
                }
            }
        };

        match step {
            RecvStep::Matched(PendingSend { source, done }, mut sink) => {
                let result = self.transfer(&conn, source, &mut sink).await;
                let _ = done.send(result.clone());
                result
            }
            RecvStep::Queued(rx) => {
                tracing::debug!(conn = %id, side = ?handle, "recv queued");
                match rx.await {
                    Ok(Ok(RecvOutcome::Delivered)) => Ok(()),
                    Ok(Ok(RecvOutcome::Ended(mut sink))) => Ok(sink.finish().await?),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(RelayError::Abandoned),
                }
            }
            RecvStep::Ended(mut sink) => Ok(sink.finish().await?),
        }
    }

    /// Cancel and remove every connection idle since before `now`.
    ///
    /// Pops from the least recently active end and stops at the first
    /// connection still alive. Returns the number removed.
    pub fn prune(&self, now: Instant) -> usize {
        let expired: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock();
            std::iter::from_fn(|| connections.pop_lru_if(|_, slot| slot.expires_at <= now))
                .map(|(_, slot)| slot.conn)
                .collect()
        };

        for conn in &expired {
            self.cancel(conn);
            tracing::info!(conn = %conn.id, "socket closed");
        }
        self.stats
            .expired_total
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Cancel and remove every connection.
    pub fn cancel_all(&self) -> usize {
        let all: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock();
            std::iter::from_fn(|| connections.pop_lru())
                .map(|(_, slot)| slot.conn)
                .collect()
        };
        for conn in &all {
            self.cancel(conn);
        }
        all.len()
    }

    /// Connections currently open.
    pub fn sockets_open(&self) -> usize {
        self.connections.lock().len()
    }

    /// Sends and receives queued waiting for a match.
    pub fn queued(&self) -> usize {
        let connections = self.connections.lock();
        connections
            .iter()
            .map(|(_, slot)| slot.conn.state.lock().pair.queued())
            .sum()
    }

    /// Sends and receives not yet settled: everything queued plus both ends
    /// of every transfer in flight.
    pub fn unfulfilled(&self) -> usize {
        self.queued() + 2 * self.in_flight.load(Ordering::Relaxed)
    }

    fn lookup(&self, id: &ConnectionId, key: &PeerKey) -> RelayResult<(Arc<Connection>, SocketHandle)> {
        let conn = self
            .connections
            .lock()
            .get(id)
            .map(|slot| slot.conn.clone())
            .ok_or_else(|| RelayError::NoSuchSocket(id.clone()))?;

        let handle = conn.state.lock().pair.handle_of(key);
        match handle {
            Some(handle) => Ok((conn, handle)),
            None => {
                tracing::debug!(conn = %id, key = %key.fingerprint(), "wrong key");
                Err(RelayError::WrongKey(key.fingerprint()))
            }
        }
    }

    /// Pipe a matched pair, record the outcome, and drop the connection if
    /// that was the last of it.
    async fn transfer(&self, conn: &Arc<Connection>, source: BoxSource, sink: &mut BoxSink) -> RelayResult<()> {
        let result = {
            let _in_flight = InFlight::enter(&self.in_flight);
            self.pipe(conn, source, sink).await
        };

        match &result {
            Ok(bytes) => {
                self.stats.transfers_total.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_relayed_total
                    .fetch_add(*bytes, Ordering::Relaxed);
                tracing::debug!(conn = %conn.id, bytes, "transfer complete");
            }
            Err(e) => {
                self.stats
                    .transfer_errors_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(conn = %conn.id, error = %e, "transfer failed");
            }
        }

        self.remove_if_drained(conn);
        result.map(|_| ())
    }

    async fn pipe(&self, conn: &Arc<Connection>, mut source: BoxSource, sink: &mut BoxSink) -> RelayResult<u64> {
        let mut cancelled = conn.cancel.subscribe();

        let copy = async {
            let mut bytes = 0u64;
            while let Some(chunk) = source.next_chunk().await? {
                self.renew(conn);
                bytes += chunk.len() as u64;
                sink.write_chunk(chunk).await?;
            }
            sink.finish().await?;
            Ok::<_, RelayError>(bytes)
        };

        tokio::select! {
            result = copy => result,
            _ = cancelled.wait_for(|cancelled| *cancelled) => Err(RelayError::Timeout),
        }
    }

    /// Push the idle deadline out and mark the connection most recently
    /// active.
    fn renew(&self, conn: &Arc<Connection>) {
        let mut connections = self.connections.lock();
        let live = match connections.get_mut(&conn.id) {
            Some(slot) if Arc::ptr_eq(&slot.conn, conn) => {
                slot.expires_at = Instant::now() + self.idle_timeout;
                true
            }
            _ => false,
        };
        if live {
            connections.touch(&conn.id);
        }
    }

    fn remove_if_drained(&self, conn: &Arc<Connection>) {
        let mut connections = self.connections.lock();
        let leftovers = {
            let mut state = conn.state.lock();
            if !state.pair.is_drained() {
                return;
            }
            state.pair.drain_recvs()
        };
        let current = connections
            .get(&conn.id)
            .is_some_and(|slot| Arc::ptr_eq(&slot.conn, conn));
        if current {
            connections.remove(&conn.id);
        }
        drop(connections);

        for recv in leftovers {
            recv.end();
        }
        tracing::debug!(conn = %conn.id, "socket drained");
    }

    /// Abort the in-flight pipe and fail everything queued.
    fn cancel(&self, conn: &Connection) {
        let (sends, recvs) = {
            let mut state = conn.state.lock();
            state.cancelled = true;
            state.pair.drain_all()
        };
        conn.cancel.send_replace(true);

        for send in sends {
            send.reject(RelayError::Timeout);
        }
        for recv in recvs {
            recv.reject(RelayError::Timeout);
        }
    }
}

/// Oldest receive on the other side whose caller is still waiting.
fn take_live_recv(pair: &mut Pair, handle: SocketHandle) -> Option<PendingRecv> {
    std::iter::from_fn(|| pair.take_counter_recv(handle)).find(|recv| !recv.done.is_closed())
}

/// Oldest send on the other side whose caller is still waiting.
fn take_live_send(pair: &mut Pair, handle: SocketHandle) -> Option<PendingSend> {
    std::iter::from_fn(|| pair.take_counter_send(handle)).find(|send| !send.done.is_closed())
}

/// Counts a transfer in flight for as long as its pipe is being driven.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
