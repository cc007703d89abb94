//! Two-slot socket table for a relay connection.
//!
//! A connection has exactly two socket slots, created together. Each peer key
//! that joins claims one slot; the other slot is its counter. Handles are
//! plain indices, so the cross-link between the two sides lives in
//! [`SocketHandle::counter`] instead of in the sockets themselves.
//!
//! Each socket queues its own pending sends and pending receives. A send on
//! one side is matched against the oldest receive queued on the counter, and
//! the other way round. `S` and `R` are whatever the caller needs to finish a
//! matched operation later (in `duet-relay`, the byte stream plus a oneshot).
//!
//! A slot exists before anyone has claimed it, so the first peer can queue
//! work before the second one joins.

use std::collections::VecDeque;
use thiserror::Error;

/// Index of one side within a [`SocketPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(u8);

impl SocketHandle {
    /// The slot claimed by the first key.
    pub const FIRST: SocketHandle = SocketHandle(0);
    /// The slot claimed by the second key.
    pub const SECOND: SocketHandle = SocketHandle(1);

    /// The other side.
    pub fn counter(self) -> SocketHandle {
        SocketHandle(1 - self.0)
    }

    fn slot(self) -> usize {
        self.0 as usize
    }
}

/// How many peers have joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    /// Nobody has joined yet.
    Empty,
    /// Only the first peer has joined.
    Unpaired,
    /// Both slots are claimed.
    Paired,
}

/// Outcome of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joined {
    /// The key claimed a free slot.
    New(SocketHandle),
    /// The key already held this slot.
    Existing(SocketHandle),
}

impl Joined {
    /// The slot the key now holds.
    pub fn handle(self) -> SocketHandle {
        match self {
            Joined::New(h) | Joined::Existing(h) => h,
        }
    }
}

/// Errors from socket table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PairError {
    /// Both slots are held by other keys.
    #[error("already established")]
    AlreadyEstablished,

    /// The side was already closed.
    #[error("already closed")]
    AlreadyClosed,
}

/// One peer's half of a connection.
#[derive(Debug)]
pub struct Socket<S, R> {
    closed: bool,
    send_queue: VecDeque<S>,
    recv_queue: VecDeque<R>,
}

impl<S, R> Default for Socket<S, R> {
    fn default() -> Self {
        Self {
            closed: false,
            send_queue: VecDeque::new(),
            recv_queue: VecDeque::new(),
        }
    }
}

impl<S, R> Socket<S, R> {
    /// Whether this side has closed for sending.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sends queued on this side, waiting for a receive on the counter.
    pub fn queued_sends(&self) -> usize {
        self.send_queue.len()
    }

    /// Receives queued on this side, waiting for a send on the counter.
    pub fn queued_recvs(&self) -> usize {
        self.recv_queue.len()
    }

    /// Closed and nothing left to hand over.
    pub fn is_finished(&self) -> bool {
        self.closed && self.send_queue.is_empty()
    }
}

/// The two sockets of a connection plus the keys that own them.
#[derive(Debug)]
pub struct SocketPair<K, S, R> {
    keys: [Option<K>; 2],
    sockets: [Socket<S, R>; 2],
}

impl<K, S, R> Default for SocketPair<K, S, R> {
    fn default() -> Self {
        Self {
            keys: [None, None],
            sockets: [Socket::default(), Socket::default()],
        }
    }
}

impl<K: PartialEq, S, R> SocketPair<K, S, R> {
    /// Create a pair with both slots free.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot for `key`. Joining again with the same key is a no-op.
    pub fn join(&mut self, key: K) -> Result<Joined, PairError> {
        if let Some(handle) = self.handle_of(&key) {
            return Ok(Joined::Existing(handle));
        }
        for handle in [SocketHandle::FIRST, SocketHandle::SECOND] {
            let slot = &mut self.keys[handle.slot()];
            if slot.is_none() {
                *slot = Some(key);
                return Ok(Joined::New(handle));
            }
        }
        Err(PairError::AlreadyEstablished)
    }

    /// The slot held by `key`, if any.
    pub fn handle_of(&self, key: &K) -> Option<SocketHandle> {
        [SocketHandle::FIRST, SocketHandle::SECOND]
            .into_iter()
            .find(|h| self.keys[h.slot()].as_ref() == Some(key))
    }

    /// How many peers have joined.
    pub fn pairing(&self) -> Pairing {
        match (&self.keys[0], &self.keys[1]) {
            (None, _) => Pairing::Empty,
            (Some(_), None) => Pairing::Unpaired,
            (Some(_), Some(_)) => Pairing::Paired,
        }
    }

    /// Read access to one side.
    pub fn socket(&self, handle: SocketHandle) -> &Socket<S, R> {
        &self.sockets[handle.slot()]
    }

    /// Queue a send on `handle`.
    pub fn queue_send(&mut self, handle: SocketHandle, send: S) {
        self.sockets[handle.slot()].send_queue.push_back(send);
    }

    /// Queue a receive on `handle`.
    pub fn queue_recv(&mut self, handle: SocketHandle, recv: R) {
        self.sockets[handle.slot()].recv_queue.push_back(recv);
    }

    /// Match a send on `handle` with the counter's oldest queued receive.
    pub fn take_counter_recv(&mut self, handle: SocketHandle) -> Option<R> {
        self.sockets[handle.counter().slot()].recv_queue.pop_front()
    }

    /// Match a receive on `handle` with the counter's oldest queued send.
    pub fn take_counter_send(&mut self, handle: SocketHandle) -> Option<S> {
        self.sockets[handle.counter().slot()].send_queue.pop_front()
    }

    /// Whether the counter of `handle` is closed and has nothing queued to
    /// send, i.e. nothing more can ever arrive at `handle`.
    pub fn counter_finished(&self, handle: SocketHandle) -> bool {
        self.sockets[handle.counter().slot()].is_finished()
    }

    /// Close `handle` for sending.
    ///
    /// Returns the receives queued on the counter: they were waiting for data
    /// from this side and must now be ended. This side's own queues are left
    /// alone.
    pub fn close(&mut self, handle: SocketHandle) -> Result<Vec<R>, PairError> {
        let socket = &mut self.sockets[handle.slot()];
        if socket.closed {
            return Err(PairError::AlreadyClosed);
        }
        socket.closed = true;
        Ok(self.sockets[handle.counter().slot()]
            .recv_queue
            .drain(..)
            .collect())
    }

    /// Both sides closed with nothing left to hand over.
    pub fn is_drained(&self) -> bool {
        self.sockets.iter().all(Socket::is_finished)
    }

    /// Take every queued receive on both sides.
    pub fn drain_recvs(&mut self) -> Vec<R> {
        self.sockets
            .iter_mut()
            .flat_map(|s| s.recv_queue.drain(..))
            .collect()
    }

    /// Take every queued operation on both sides.
    pub fn drain_all(&mut self) -> (Vec<S>, Vec<R>) {
        let sends = self
            .sockets
            .iter_mut()
            .flat_map(|s| s.send_queue.drain(..))
            .collect();
        (sends, self.drain_recvs())
    }

    /// Total sends and receives waiting for a match.
    pub fn queued(&self) -> usize {
        self.sockets
            .iter()
            .map(|s| s.queued_sends() + s.queued_recvs())
            .sum()
    }
}
