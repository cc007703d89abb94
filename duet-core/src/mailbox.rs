//! Host mailbox queue discipline.
//!
//! A mailbox holds connection offers for one host and the callers blocked
//! waiting for them. It is generic over the offer type `O` and the waiter
//! type `W` so the discipline can be tested here without any async runtime;
//! `duet-relay` instantiates it with a oneshot sender as the waiter.
//!
//! Offers are handed straight to the oldest waiter when there is one, and
//! buffered otherwise. So at any time at most one of the two queues is
//! non-empty, and FIFO order holds across both.

use std::collections::VecDeque;

/// Result of trying to take an offer.
#[derive(Debug, PartialEq, Eq)]
pub enum Accept<O> {
    /// An offer was already buffered.
    Offer(O),
    /// Nothing buffered; the waiter was queued.
    Waiting,
    /// The mailbox is closed; the waiter was dropped.
    Closed,
}

/// Where a delivered offer ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to a waiting caller.
    Handed,
    /// Buffered until the next accept.
    Buffered,
}

/// What closing a mailbox released.
#[derive(Debug)]
pub struct Closing<W> {
    /// Waiters to wake with an empty result, oldest first.
    pub waiters: Vec<W>,
    /// Number of undelivered offers thrown away.
    pub discarded: usize,
}

/// Pending offers plus blocked accept callers.
#[derive(Debug)]
pub struct Mailbox<O, W> {
    pending: VecDeque<O>,
    waiters: VecDeque<W>,
    closed: bool,
}

impl<O, W> Default for Mailbox<O, W> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            waiters: VecDeque::new(),
            closed: false,
        }
    }
}

impl<O, W> Mailbox<O, W> {
    /// Create an empty, open mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest buffered offer, or queue a waiter built by
    /// `make_waiter` if there is none.
    ///
    /// `make_waiter` is only called when the caller actually has to wait.
    pub fn accept_with<F>(&mut self, make_waiter: F) -> Accept<O>
    where
        F: FnOnce() -> W,
    {
        if let Some(offer) = self.pending.pop_front() {
            return Accept::Offer(offer);
        }
        if self.closed {
            return Accept::Closed;
        }
        self.waiters.push_back(make_waiter());
        Accept::Waiting
    }

    /// Deliver an offer.
    ///
    /// `hand_off` is tried on waiters oldest first; it returns the offer back
    /// when the waiter has gone away, in which case the next waiter is tried.
    /// With no live waiter left the offer is buffered.
    ///
    /// Returns the offer back if the mailbox is closed.
    pub fn deliver<F>(&mut self, mut offer: O, mut hand_off: F) -> Result<Delivery, O>
    where
        F: FnMut(W, O) -> Result<(), O>,
    {
        if self.closed {
            return Err(offer);
        }

        while let Some(waiter) = self.waiters.pop_front() {
            match hand_off(waiter, offer) {
                Ok(()) => return Ok(Delivery::Handed),
                Err(returned) => offer = returned,
            }
        }

        self.pending.push_back(offer);
        Ok(Delivery::Buffered)
    }

    /// Close the mailbox, releasing every waiter and discarding offers.
    ///
    /// Closing twice releases nothing the second time.
    pub fn close(&mut self) -> Closing<W> {
        self.closed = true;
        let discarded = self.pending.len();
        self.pending.clear();
        Closing {
            waiters: self.waiters.drain(..).collect(),
            discarded,
        }
    }

    /// Drop waiters for which `is_live` returns false.
    pub fn retain_waiters<F>(&mut self, is_live: F)
    where
        F: FnMut(&W) -> bool,
    {
        self.waiters.retain(is_live);
    }

    /// Whether the mailbox has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of buffered offers.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of queued waiters.
    pub fn waiting_len(&self) -> usize {
        self.waiters.len()
    }
}
