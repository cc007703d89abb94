//! Rendezvous store.
//!
//! A host opens a mailbox and long-polls it with `accept`; a connecting peer
//! calls `connect`, which mints a relay [`Location`] and leaves it in the
//! mailbox together with the peer's message. Mailboxes expire after a fixed
//! lifetime and are swept by [`HostStore::prune`].

use crate::error::{HostError, HostResult};
use duet_core::{Accept, Delivery, LruMap, Mailbox};
use duet_types::{HostId, Location, Offer, PeerKey};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Privileged credential that passes every owner-key check.
///
/// Only obtainable from [`HostStore::super_key`], so it never comes from a
/// caller-supplied value.
#[derive(Debug, Clone, Copy)]
pub struct SuperKey {
    _private: (),
}

/// How a caller proves access to a mailbox.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    /// The key the mailbox was opened with.
    Owner(&'a PeerKey),
    /// The store's own super-key.
    Super(SuperKey),
}

impl<'a> From<&'a PeerKey> for Credential<'a> {
    fn from(key: &'a PeerKey) -> Self {
        Credential::Owner(key)
    }
}

impl From<SuperKey> for Credential<'static> {
    fn from(key: SuperKey) -> Self {
        Credential::Super(key)
    }
}

/// Rendezvous counters.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct HostStats {
    /// Mailboxes opened.
    pub opened_total: AtomicU64,
    /// Mailboxes closed by their owner.
    pub closed_total: AtomicU64,
    /// Mailboxes removed by prune.
    pub expired_total: AtomicU64,
    /// Offers deposited by `connect`.
    pub offers_total: AtomicU64,
    /// Offers thrown away because their mailbox went away first.
    pub offers_discarded_total: AtomicU64,
}

type Waiter = oneshot::Sender<Offer>;

struct Host {
    id: HostId,
    owner: PeerKey,
    expires_at: Instant,
    mailbox: Mutex<Mailbox<Offer, Waiter>>,
}

/// Named mailboxes with long-poll delivery.
pub struct HostStore {
    relayers: Vec<String>,
    hosts: Mutex<LruMap<HostId, Arc<Host>>>,
    super_key: SuperKey,
    listeners: AtomicUsize,
    stats: HostStats,
}

impl std::fmt::Debug for HostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostStore")
            .field("relayers", &self.relayers)
            .field("hosts_open", &self.hosts_open())
            .field("listeners_waiting", &self.listeners_waiting())
            .finish_non_exhaustive()
    }
}

impl HostStore {
    /// Create a store that spreads minted locations across `relayers`.
    ///
    /// With an empty pool, locations are bare ids.
    pub fn new(relayers: Vec<String>) -> Self {
        Self {
            relayers,
            hosts: Mutex::new(LruMap::new()),
            super_key: SuperKey { _private: () },
            listeners: AtomicUsize::new(0),
            stats: HostStats::default(),
        }
    }

    /// The store's privileged credential.
    pub fn super_key(&self) -> SuperKey {
        self.super_key
    }

    /// Relay endpoint prefixes.
    pub fn relayers(&self) -> &[String] {
        &self.relayers
    }

    /// Counters.
    pub fn stats(&self) -> &HostStats {
        &self.stats
    }

    /// Open a mailbox owned by `owner` that lives until `expires_at`.
    pub fn open(&self, owner: PeerKey, expires_at: Instant) -> HostId {
        let id = HostId::new();
        let fingerprint = owner.fingerprint();
        let host = Arc::new(Host {
            id,
            owner,
            expires_at,
            mailbox: Mutex::new(Mailbox::new()),
        });
        self.hosts.lock().set(id, host);
        self.stats.opened_total.fetch_add(1, Ordering::Relaxed);

        tracing::info!(host = %id, key = %fingerprint, "host open");
        id
    }

    /// Close a mailbox, waking every blocked `accept` with an empty result.
    pub fn close<'a>(&self, id: &HostId, credential: impl Into<Credential<'a>>) -> HostResult<()> {
        let host = self.lookup(id, credential.into())?;

        // A racing close or prune may have got there first.
        if self.hosts.lock().remove(id).is_none() {
            return Err(HostError::NoSuchHost(*id));
        }
        let woken = self.shut(&host);
        self.stats.closed_total.fetch_add(1, Ordering::Relaxed);

        tracing::info!(host = %id, woken, "host closed");
        Ok(())
    }

    /// Wait for the next offer.
    ///
    /// Returns immediately if one is buffered. Otherwise waits until
    /// `connect` delivers one, or returns `None` once the mailbox is closed
    /// or expires. Concurrent callers are served oldest first.
    pub async fn accept<'a>(
        &self,
        id: &HostId,
        credential: impl Into<Credential<'a>>,
    ) -> HostResult<Option<Offer>> {
        let host = self.lookup(id, credential.into())?;

        let mut waiting = None;
        let outcome = {
            let mut mailbox = host.mailbox.lock();
            // Callers that gave up leave their sender behind.
            mailbox.retain_waiters(|w| !w.is_closed());
            mailbox.accept_with(|| {
                let (tx, rx) = oneshot::channel();
                waiting = Some(rx);
                tx
            })
        };

        let rx = match (outcome, waiting) {
            (Accept::Offer(offer), _) => return Ok(Some(offer)),
            (Accept::Waiting, Some(rx)) => rx,
            (Accept::Waiting, None) | (Accept::Closed, _) => return Ok(None),
        };

        let _listening = ListenerGuard::enter(&self.listeners);
        tracing::debug!(host = %id, "accept waiting");

        // Sender dropped means the mailbox closed or expired.
        Ok(rx.await.ok())
    }

    /// Deposit an offer in a mailbox on behalf of a connecting peer.
    ///
    /// Always uses the super-key. Mints and returns a fresh location right
    /// away; does not wait for the host to pick it up.
    pub fn connect(&self, id: &HostId, message: serde_json::Value) -> HostResult<Location> {
        let host = self.lookup(id, Credential::Super(self.super_key))?;

        let location = self.gen_location();
        let offer = Offer {
            location: location.clone(),
            message,
        };

        let delivery = host
            .mailbox
            .lock()
            .deliver(offer, |waiter, offer| waiter.send(offer))
            .map_err(|_| HostError::NoSuchHost(*id))?;
        self.stats.offers_total.fetch_add(1, Ordering::Relaxed);

        match delivery {
            Delivery::Handed => tracing::debug!(host = %id, "offer handed to waiting accept"),
            Delivery::Buffered => tracing::debug!(host = %id, "offer buffered"),
        }
        Ok(location)
    }

    /// Mint a location on a randomly chosen relay without touching any
    /// mailbox.
    pub fn gen_location(&self) -> Location {
        let endpoint = self
            .relayers
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or("");
        Location::mint(endpoint)
    }

    /// Remove every mailbox whose lifetime has passed, oldest first.
    ///
    /// Mailboxes are never re-touched and all get the same lifetime from the
    /// boundary, so insertion order is expiry order and the sweep stops at
    /// the first mailbox still alive. Returns the number removed.
    pub fn prune(&self, now: Instant) -> usize {
        let expired: Vec<Arc<Host>> = {
            let mut hosts = self.hosts.lock();
            std::iter::from_fn(|| hosts.pop_lru_if(|_, host| host.expires_at <= now))
                .map(|(_, host)| host)
                .collect()
        };

        for host in &expired {
            let woken = self.shut(host);
            tracing::info!(host = %host.id, woken, "host closed (expired)");
        }
        self.stats
            .expired_total
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Close every mailbox, waking all blocked `accept` calls.
    pub fn close_all(&self) -> usize {
        let all: Vec<Arc<Host>> = {
            let mut hosts = self.hosts.lock();
            std::iter::from_fn(|| hosts.pop_lru()).map(|(_, host)| host).collect()
        };
        for host in &all {
            self.shut(host);
        }
        all.len()
    }

    /// Number of mailboxes currently open.
    pub fn hosts_open(&self) -> usize {
        self.hosts.lock().len()
    }

    /// Number of `accept` calls currently blocked.
    pub fn listeners_waiting(&self) -> usize {
        self.listeners.load(Ordering::Relaxed)
    }

    fn lookup(&self, id: &HostId, credential: Credential<'_>) -> HostResult<Arc<Host>> {
        let host = self
            .hosts
            .lock()
            .get(id)
            .cloned()
            .ok_or(HostError::NoSuchHost(*id))?;

        match credential {
            Credential::Super(_) => Ok(host),
            Credential::Owner(key) if *key == host.owner => Ok(host),
            Credential::Owner(key) => {
                tracing::debug!(
                    host = %id,
                    key = %key.fingerprint(),
                    owner = %host.owner.fingerprint(),
                    "wrong key"
                );
                Err(HostError::WrongKey(key.fingerprint()))
            }
        }
    }

    /// Close a mailbox that is already out of the map. Returns how many
    /// waiters were woken.
    fn shut(&self, host: &Host) -> usize {
        let closing = host.mailbox.lock().close();
        self.stats
            .offers_discarded_total
            .fetch_add(closing.discarded as u64, Ordering::Relaxed);
        // Dropping the senders wakes each waiter with `None`.
        closing.waiters.len()
    }
}

/// Counts a blocked `accept` for as long as it is alive, including when the
/// caller gives up and drops the future.
struct ListenerGuard<'a>(&'a AtomicUsize);

impl<'a> ListenerGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
