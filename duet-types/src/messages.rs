//! JSON message shapes exchanged at the HTTP boundary.

use crate::ids::{HostId, Location};
use serde::{Deserialize, Serialize};

/// A connection offer buffered in a host mailbox.
///
/// The `message` is whatever the connecting peer supplied; the relay never
/// looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Relay location minted for this attempt.
    pub location: Location,
    /// Opaque payload from the connecting peer.
    pub message: serde_json::Value,
}

/// Response to `POST /api/host/open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenHostResponse {
    /// The new mailbox id.
    pub hid: HostId,
}

/// Response to `POST /api/host/accept/:hid`.
///
/// `ok: false` means the mailbox closed or expired while waiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptResponse {
    /// Whether an offer was delivered.
    pub ok: bool,
    /// Relay location of the delivered offer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Payload of the delivered offer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
}

impl From<Option<Offer>> for AcceptResponse {
    fn from(offer: Option<Offer>) -> Self {
        match offer {
            Some(Offer { location, message }) => Self {
                ok: true,
                location: Some(location),
                message: Some(message),
            },
            None => Self {
                ok: false,
                location: None,
                message: None,
            },
        }
    }
}

/// Body of `POST /api/host/connect/:hid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Opaque payload for the host.
    #[serde(default)]
    pub message: serde_json::Value,
}

/// Response carrying a minted relay location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResponse {
    /// Relay location to meet at.
    pub location: Location,
}

/// Response to `GET /api/relay/:sid/closed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedResponse {
    /// Whether the counterpart has finished sending.
    pub closed: bool,
}
