//! # duet-core
//!
//! Pure data structures for duet (no I/O, instant tests).
//!
//! This crate holds the bookkeeping behind both duet services without any
//! async runtime, network, or clock:
//! - [`LruMap`] - the ordered eviction map both services prune from
//! - [`Mailbox`] - a host mailbox's offer buffer and waiter queue
//! - [`SocketPair`] - a relay connection's two socket slots and their queues
//!
//! `duet-relay` wraps these in locks, supplies the waiters (oneshot
//! channels) and queued operations (byte streams), and drives expiry.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod eviction;
pub mod mailbox;
pub mod pair;

pub use eviction::LruMap;
pub use mailbox::{Accept, Closing, Delivery, Mailbox};
pub use pair::{Joined, PairError, Pairing, Socket, SocketHandle, SocketPair};
