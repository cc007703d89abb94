//! # duet-types
//!
//! Identifiers and boundary message types for the duet rendezvous relay.
//!
//! This crate provides the foundational types used across all duet crates:
//! - [`HostId`], [`ConnectionId`], [`Location`] - Mailbox and channel identity
//! - [`PeerKey`], [`KeyFingerprint`] - Opaque caller secrets and their loggable form
//! - [`Offer`] and the `*Response` types - JSON shapes at the HTTP boundary
//! - [`IdError`] - Identifier parse errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;

pub use error::IdError;
pub use ids::{ConnectionId, HostId, KeyFingerprint, Location, PeerKey};
pub use messages::{
    AcceptResponse, ClosedResponse, ConnectRequest, LocationResponse, Offer, OpenHostResponse,
};
