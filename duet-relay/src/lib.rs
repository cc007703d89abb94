//! # duet-relay
//!
//! Rendezvous and relay server for duet.
//!
//! This crate implements two services that let two anonymous peers find each
//! other and exchange a byte stream without the server ever reading it:
//! - [`HostStore`] - named mailboxes a host long-polls for connection offers
//! - [`RelayEngine`] - two-party channels that pipe bytes with backpressure
//!
//! ## Architecture
//!
//! ```text
//!  Host ──accept──┐                      ┌──connect── Guest
//!                 ▼                      ▼
//!        ┌─────────────────────────────────────┐
//!        │             duet-relay              │
//!        │  ┌───────────┐    ┌──────────────┐  │
//!        │  │ HostStore │    │ RelayEngine  │  │
//!        │  └───────────┘    └──────────────┘  │
//!        └─────────────────────────────────────┘
//!                 ▲                      ▲
//!  Host ──send/recv──────────────────send/recv── Guest
//! ```
//!
//! ## Flow
//!
//! - Host: `open` → `accept` (blocks until an offer arrives)
//! - Guest: `connect` → location (a relay connection id)
//! - Both: relay `open` → `send` / `recv` → `close`
//!
//! Expired mailboxes and idle connections are swept by the task in
//! [`cleanup`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod relay;
pub mod server;
pub mod transport;

pub use config::Config;
pub use error::{HostError, RelayError, ServerError};
pub use host::{Credential, HostStore, SuperKey};
pub use relay::RelayEngine;
pub use server::DuetServer;
