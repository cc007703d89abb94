//! Identity types for duet.

use crate::error::IdError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Longest caller-chosen connection id accepted.
const MAX_CONNECTION_ID_LEN: usize = 256;

/// Identifier of a host mailbox.
///
/// UUID v4, minted by the rendezvous store on `open`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(uuid::Uuid);

impl HostId {
    /// Create a new random HostId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for HostId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| IdError::InvalidHostId(s.to_string()))
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostId({})", self.0)
    }
}

/// Identifier of a relay connection.
///
/// Chosen by the peers and shared out of band (normally the id half of a
/// [`Location`]). The relay treats it as an opaque string.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a ConnectionId, rejecting empty or oversized ids.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_CONNECTION_ID_LEN {
            return Err(IdError::InvalidConnectionId(id.len()));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ConnectionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// An opaque per-caller secret.
///
/// Only ever compared for equality. Never printed: `Debug` shows the
/// [`KeyFingerprint`] and there is no `Display`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerKey(String);

impl PeerKey {
    /// Wrap a secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Short, one-way digest of the key suitable for logs and error messages.
    pub fn fingerprint(&self) -> KeyFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"duet-peer-key-v1");
        hasher.update(self.0.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        KeyFingerprint(bytes)
    }
}

impl From<&str> for PeerKey {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl From<String> for PeerKey {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", self.fingerprint())
    }
}

/// First 8 bytes of a domain-separated SHA-256 over a [`PeerKey`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyFingerprint([u8; 8]);

impl KeyFingerprint {
    /// Get the raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyFingerprint({})", self)
    }
}

/// Where a connecting peer should meet its host.
///
/// A relay endpoint prefix followed by a fresh UUID, e.g.
/// `/api/relay/5f0c...`. The trailing UUID doubles as the relay
/// [`ConnectionId`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    /// Mint a fresh location under the given relay endpoint prefix.
    pub fn mint(endpoint: &str) -> Self {
        Self(format!("{}{}", endpoint, uuid::Uuid::new_v4()))
    }

    /// Get the location as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trailing channel id (everything after the last `/`).
    pub fn channel_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({})", self.0)
    }
}
