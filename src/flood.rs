//! Network-wide flooding with loop suppression and a hop budget.
//!
//! A flood connection stamps outgoing packets with a
//! (hops, seqno, originator) header and hands them to the
//! unique-identified-broadcast layer beneath it. On reception it filters
//! replays with a per-connection (originator, seqno) cursor, delivers
//! accepted packets to the application, and - when the application asks for
//! it - parks a copy for a debounce window before rebroadcasting it with the
//! hop count bumped. Duplicates arriving inside the window are absorbed into
//! the parked copy so a burst of neighbors forwarding the same flood costs
//! one retransmission, not many.

use crate::buffer::{Snapshot, SnapshotPool, Staging};
use crate::uibc::{self, RecvOutcome, Uibc};
use crate::wire::{FloodHeader, NodeAddr, SeqCompare, Seqno};
use crate::{TimerKey, TimerKind};

/// Transmission stops once the incoming hop count reaches this.
pub const HOPS_MAX: u8 = 16;

const QUEUE_TIME_DEFAULT_MS: u64 = 125;

/// Configuration for one flood connection.
#[derive(Clone, Debug)]
pub struct FloodConfig {
    /// Debounce window for forwarded packets, and the suppression interval
    /// handed to the broadcast layer for every transmission, in
    /// milliseconds.
    pub queue_time_ms: u64,

    /// How sequence numbers are ordered for duplicate detection.
    pub seq_compare: SeqCompare,

    /// Hop budget. Must be at least 1.
    pub hops_max: u8,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            queue_time_ms: QUEUE_TIME_DEFAULT_MS,
            seq_compare: SeqCompare::Strict,
            hops_max: HOPS_MAX,
        }
    }
}

impl FloodConfig {
    pub fn validate(&self) {
        assert!(
            self.hops_max >= 1,
            "invalid flood configuration: hops_max == 0"
        );
    }
}

/// Everything the application learns about an accepted packet besides its
/// payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Neighbor the packet arrived from on its last hop.
    pub from: NodeAddr,
    /// Node that started the flood.
    pub originator: NodeAddr,
    pub seqno: Seqno,
    /// Hops travelled before reaching this node; 0 for a direct neighbor of
    /// the originator.
    pub hops: u8,
}

pub trait Context: uibc::Context {
    /// An accepted packet, stripped of its header. The return value is the
    /// forwarding verdict: true to keep the flood going, false to let it
    /// die here.
    fn on_deliver(&mut self, channel: u16, delivery: &Delivery, payload: &[u8]) -> bool;
}

/// What became of one received packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Delivered { forwarded: bool },
    /// Rejected by the duplicate filter.
    Stale,
    /// Too short to carry a flood header.
    Malformed,
}

/// Outbound side of the connection state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    Idle,
    /// A packet is with the broadcast layer awaiting its suppression
    /// window.
    Sending,
    /// A forwarded packet is parked in the debounce window.
    QueuedForResend,
}

struct QueuedResend {
    snapshot: Snapshot,
    originator: NodeAddr,
    seqno: Seqno,
    // Receptions folded into this resend, the one that queued it included
    packets_received: u32,
}

pub struct Flood {
    channel: u16,
    addr: NodeAddr,
    config: FloodConfig,
    link: Uibc,
    // Duplicate filter cursor: the most recently accepted flood
    last: Option<(NodeAddr, Seqno)>,
    next_seqno: Seqno,
    sending: bool,
    queued: Option<QueuedResend>,
}

impl Flood {
    pub fn open(addr: NodeAddr, channel: u16, config: FloodConfig) -> Self {
        config.validate();

        Self {
            channel,
            addr,
            config,
            link: Uibc::open(channel),
            last: None,
            next_seqno: Seqno(0),
            sending: false,
            queued: None,
        }
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn state(&self) -> SendState {
        if self.queued.is_some() {
            SendState::QueuedForResend
        } else if self.sending {
            SendState::Sending
        } else {
            SendState::Idle
        }
    }

    /// The duplicate-filter cursor, mostly interesting to diagnostics.
    pub fn last_accepted(&self) -> Option<(NodeAddr, Seqno)> {
        self.last
    }

    /// Starts a flood of the staged payload under an explicit sequence
    /// number. The caller owns monotonicity; a number at or below the
    /// previous one will be treated as a replay by the whole network.
    /// Returns false when there is no room to prepend the header (payload
    /// untouched) or the snapshot pool is exhausted.
    pub fn send<C>(
        &mut self,
        staging: &mut Staging,
        pool: &mut SnapshotPool,
        seqno: Seqno,
        now_ms: u64,
        ctx: &mut C,
    ) -> bool
    where
        C: Context,
    {
        // A fresh local flood supersedes a parked rebroadcast
        if let Some(queued) = self.queued.take() {
            ctx.unset_timer(self.resend_key());
            pool.release(queued.snapshot);
        }

        let header = FloodHeader {
            hops: 0,
            seqno,
            originator: self.addr,
        };

        if staging
            .push_header(FloodHeader::SIZE)
            .and_then(|dst| header.write(dst))
            .is_none()
        {
            return false;
        }

        // Never re-accept our own flood when it loops back
        self.last = Some((self.addr, seqno));
        self.next_seqno = seqno.next();

        log::debug!(
            "flood {}: originating seqno {} ({} bytes)",
            self.channel,
            seqno,
            staging.len()
        );

        let ok = self
            .link
            .send(staging, pool, self.config.queue_time_ms, now_ms, ctx);

        if ok {
            self.sending = true;
        }

        ok
    }

    /// Like [`send`](Self::send) with an internally advancing sequence
    /// number.
    pub fn send_next<C>(
        &mut self,
        staging: &mut Staging,
        pool: &mut SnapshotPool,
        now_ms: u64,
        ctx: &mut C,
    ) -> bool
    where
        C: Context,
    {
        let seqno = self.next_seqno;
        self.send(staging, pool, seqno, now_ms, ctx)
    }

    /// Runs one received packet (flood header still in front) through the
    /// connection: suppression comparison, duplicate filter, delivery, and
    /// the forwarding decision.
    pub fn handle_recv<C>(
        &mut self,
        from: NodeAddr,
        packet: &[u8],
        pool: &mut SnapshotPool,
        now_ms: u64,
        ctx: &mut C,
    ) -> Disposition
    where
        C: Context,
    {
        // The broadcast layer compares first; an overheard copy of our own
        // pending transmission silences it
        if self.link.handle_recv(packet, pool, ctx) == RecvOutcome::Suppressed {
            self.sending = false;
        }

        let Some(header) = FloodHeader::read(packet) else {
            log::warn!(
                "flood {}: dropping short packet ({} bytes) from {}",
                self.channel,
                packet.len(),
                from
            );
            return Disposition::Malformed;
        };

        if let Some((last_orig, last_seqno)) = self.last {
            if header.originator == last_orig
                && !header.seqno.newer_than(last_seqno, self.config.seq_compare)
            {
                self.absorb_duplicate(&header, now_ms, ctx);
                return Disposition::Stale;
            }
        }

        // Copy the packet with its header intact before anything is
        // stripped; the rebroadcast needs the original fields. On an empty
        // pool the packet is still delivered, just never forwarded.
        let mut snapshot = pool.acquire(packet);
        if snapshot.is_none() {
            log::warn!(
                "flood {}: snapshot pool exhausted, reception from {} cannot be forwarded",
                self.channel,
                from
            );
        }

        self.last = Some((header.originator, header.seqno));

        let payload = &packet[FloodHeader::SIZE..];
        let delivery = Delivery {
            from,
            originator: header.originator,
            seqno: header.seqno,
            hops: header.hops,
        };

        let forward = ctx.on_deliver(self.channel, &delivery, payload);

        let mut forwarded = false;

        if forward && header.hops < self.config.hops_max {
            if let Some(snapshot) = snapshot.take() {
                if let Some(stale) = self.queued.take() {
                    // A newer flood displaces whatever was parked
                    pool.release(stale.snapshot);
                }

                ctx.set_timer(self.resend_key(), now_ms + self.config.queue_time_ms);

                self.queued = Some(QueuedResend {
                    snapshot,
                    originator: header.originator,
                    seqno: header.seqno,
                    packets_received: 1,
                });

                forwarded = true;
            }
        }

        if let Some(snapshot) = snapshot {
            pool.release(snapshot);
        }

        Disposition::Delivered { forwarded }
    }

    /// A duplicate of the parked rebroadcast pushes its debounce window out
    /// instead of producing another transmission.
    fn absorb_duplicate<C>(&mut self, header: &FloodHeader, now_ms: u64, ctx: &mut C)
    where
        C: Context,
    {
        let Some(queued) = &mut self.queued else {
            return;
        };

        if queued.originator != header.originator || queued.seqno != header.seqno {
            return;
        }

        queued.packets_received += 1;

        log::trace!(
            "flood {}: absorbed duplicate {} of {}/{}",
            self.channel,
            queued.packets_received,
            header.originator,
            header.seqno
        );

        ctx.set_timer(self.resend_key(), now_ms + self.config.queue_time_ms);
    }

    pub fn handle_timer<C>(
        &mut self,
        kind: TimerKind,
        staging: &mut Staging,
        pool: &mut SnapshotPool,
        now_ms: u64,
        ctx: &mut C,
    ) where
        C: Context,
    {
        match kind {
            TimerKind::Suppress => {
                self.link.handle_timer(staging, pool, ctx);
                self.sending = false;
            }
            TimerKind::Resend => {
                let Some(queued) = self.queued.take() else {
                    return;
                };

                let loaded = staging.load(queued.snapshot.bytes());
                debug_assert!(loaded, "snapshot exceeds staging buffer");

                pool.release(queued.snapshot);

                FloodHeader::bump_hops(staging.as_mut_bytes());

                log::debug!(
                    "flood {}: rebroadcasting {}/{} after {} reception(s)",
                    self.channel,
                    queued.originator,
                    queued.seqno,
                    queued.packets_received
                );

                if self
                    .link
                    .send(staging, pool, self.config.queue_time_ms, now_ms, ctx)
                {
                    self.sending = true;
                }
            }
        }
    }

    /// Abandons any transmission in flight: the parked rebroadcast, the
    /// packet held by the broadcast layer, and both timers.
    pub fn cancel<C>(&mut self, pool: &mut SnapshotPool, ctx: &mut C)
    where
        C: Context,
    {
        if let Some(queued) = self.queued.take() {
            ctx.unset_timer(self.resend_key());
            pool.release(queued.snapshot);
        }

        self.link.close(pool, ctx);
        self.sending = false;
    }

    /// Shuts the connection down. Idempotent; afterwards no timer of this
    /// connection will fire and no snapshot is held.
    pub fn close<C>(&mut self, pool: &mut SnapshotPool, ctx: &mut C)
    where
        C: Context,
    {
        self.cancel(pool, ctx);
    }

    fn resend_key(&self) -> TimerKey {
        TimerKey {
            channel: self.channel,
            kind: TimerKind::Resend,
        }
    }
}
