//! Unique identified broadcast: single-hop broadcast with duplicate
//! suppression.
//!
//! A packet handed to [`Uibc::send`] is not transmitted immediately. It is
//! snapshotted and held for a uniformly random delay in
//! `[interval/2, interval)`. If a byte-identical packet is overheard from a
//! neighbor before the delay elapses, the held copy is dropped instead of
//! sent. The randomization desynchronizes neighbors that all decided to say
//! the same thing at the same time; the content comparison makes the first
//! of them silence the rest.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use crate::buffer::{Snapshot, SnapshotPool, Staging};
use crate::{TimerKey, TimerKind};

/// Effects and upcalls a connection needs from its surroundings. The host
/// side frames and transmits packets, keeps soft timers, and observes
/// transmission outcomes.
pub trait Context {
    // Called to transmit a packet on the local broadcast medium
    fn send_broadcast(&mut self, channel: u16, packet: &[u8]);

    // Called to (re)arm the given one-shot timer
    fn set_timer(&mut self, key: TimerKey, time_ms: u64);

    // Called to cancel the given timer
    fn unset_timer(&mut self, key: TimerKey);

    // Called when a held packet has actually been transmitted
    fn on_sent(&mut self, channel: u16);

    // Called when a held packet was suppressed by an overheard duplicate
    fn on_dropped(&mut self, channel: u16);
}

/// What a reception meant for the locally held packet. The received packet
/// itself is always passed on to the layer above, whichever variant comes
/// back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvOutcome {
    /// No match against the held packet; the pending transmission stands.
    Passed,
    /// The reception was byte-identical to the held packet, which has been
    /// released and will not be transmitted.
    Suppressed,
}

struct Pending {
    snapshot: Snapshot,
    digest: u64,
}

pub struct Uibc {
    channel: u16,
    pending: Option<Pending>,
}

impl Uibc {
    pub fn open(channel: u16) -> Self {
        Self {
            channel,
            pending: None,
        }
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Queues the staged packet for suppressed transmission. Returns false
    /// when the snapshot pool is exhausted, in which case nothing was
    /// queued and no timer is armed. A packet already held by this
    /// connection is released first; queueing supersedes it.
    pub fn send<C>(
        &mut self,
        staging: &Staging,
        pool: &mut SnapshotPool,
        interval_ms: u64,
        now_ms: u64,
        ctx: &mut C,
    ) -> bool
    where
        C: Context,
    {
        if let Some(pending) = self.pending.take() {
            ctx.unset_timer(self.timer_key());
            pool.release(pending.snapshot);
        }

        let Some(snapshot) = pool.acquire(staging.as_bytes()) else {
            log::warn!(
                "uibc {}: snapshot pool exhausted, send refused",
                self.channel
            );
            return false;
        };

        let digest = content_digest(snapshot.bytes());
        let deadline_ms = now_ms + pick_delay(interval_ms);

        ctx.set_timer(self.timer_key(), deadline_ms);

        log::trace!(
            "uibc {}: queued {} bytes, deadline {}",
            self.channel,
            snapshot.len(),
            deadline_ms
        );

        self.pending = Some(Pending { snapshot, digest });

        true
    }

    /// Compares a reception against the held packet. On a byte-for-byte
    /// match the held copy is released, the timer cancelled, and the
    /// `dropped` upcall made. The caller delivers the reception upward
    /// regardless of the outcome.
    pub fn handle_recv<C>(&mut self, packet: &[u8], pool: &mut SnapshotPool, ctx: &mut C) -> RecvOutcome
    where
        C: Context,
    {
        let matched = match &self.pending {
            Some(pending) => {
                // Digest first; byte equality is the actual trigger
                pending.digest == content_digest(packet) && pending.snapshot.bytes() == packet
            }
            None => false,
        };

        if !matched {
            return RecvOutcome::Passed;
        }

        let pending = self.pending.take().unwrap();

        ctx.unset_timer(self.timer_key());
        pool.release(pending.snapshot);

        log::debug!(
            "uibc {}: suppressed by overheard duplicate ({} bytes)",
            self.channel,
            packet.len()
        );

        ctx.on_dropped(self.channel);

        RecvOutcome::Suppressed
    }

    /// The suppression window elapsed without a matching reception:
    /// transmit the held packet.
    pub fn handle_timer<C>(&mut self, staging: &mut Staging, pool: &mut SnapshotPool, ctx: &mut C)
    where
        C: Context,
    {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let loaded = staging.load(pending.snapshot.bytes());
        debug_assert!(loaded, "snapshot exceeds staging buffer");

        pool.release(pending.snapshot);

        ctx.send_broadcast(self.channel, staging.as_bytes());
        ctx.on_sent(self.channel);
    }

    /// Cancels any held packet and its timer. Safe to call repeatedly; the
    /// connection ends with zero outstanding snapshots.
    pub fn close<C>(&mut self, pool: &mut SnapshotPool, ctx: &mut C)
    where
        C: Context,
    {
        if let Some(pending) = self.pending.take() {
            ctx.unset_timer(self.timer_key());
            pool.release(pending.snapshot);
        }
    }

    fn timer_key(&self) -> TimerKey {
        TimerKey {
            channel: self.channel,
            kind: TimerKind::Suppress,
        }
    }
}

fn content_digest(bytes: &[u8]) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write(bytes);
    hasher.finish()
}

fn pick_delay(interval_ms: u64) -> u64 {
    let base = interval_ms / 2;
    let span = interval_ms - base;

    if span == 0 {
        base
    } else {
        base + rand::random::<u64>() % span
    }
}
