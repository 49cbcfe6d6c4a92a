//! One mesh participant: an address, the shared buffers, and a set of flood
//! connections keyed by channel number. This is the deterministic surface a
//! host drives; it owns no sockets and no clock.

use crate::buffer::{SnapshotPool, Staging, POOL_CAPACITY_DEFAULT};
use crate::flood::{self, Disposition, Flood, FloodConfig};
use crate::wire::{Broadcast, NodeAddr, Seqno};
use crate::TimerKey;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub addr: NodeAddr,

    /// Snapshot slots shared by all connections of this node.
    pub pool_capacity: usize,
}

impl NodeConfig {
    pub fn new(addr: NodeAddr) -> Self {
        Self {
            addr,
            pool_capacity: POOL_CAPACITY_DEFAULT,
        }
    }

    pub fn validate(&self) {
        assert!(
            self.pool_capacity > 0,
            "invalid node configuration: pool_capacity == 0"
        );
    }
}

/// Running totals over everything this node has received.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub delivered: u64,
    pub forwarded: u64,
    pub stale: u64,
    pub malformed: u64,
}

pub struct Node {
    addr: NodeAddr,
    staging: Staging,
    pool: SnapshotPool,
    conns: Vec<Flood>,
    stats: NodeStats,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        config.validate();

        Self {
            addr: config.addr,
            staging: Staging::new(),
            pool: SnapshotPool::new(config.pool_capacity),
            conns: Vec::new(),
            stats: NodeStats::default(),
        }
    }

    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Snapshots currently held across all connections. Zero whenever the
    /// node is quiescent.
    pub fn snapshots_in_use(&self) -> usize {
        self.pool.in_use()
    }

    /// Binds a new flood connection to `channel`. Fails if the channel is
    /// already bound.
    pub fn open(&mut self, channel: u16, config: FloodConfig) -> bool {
        if self.find(channel).is_some() {
            return false;
        }

        self.conns.push(Flood::open(self.addr, channel, config));
        true
    }

    /// Closes and removes the connection on `channel`, cancelling its
    /// timers and releasing anything it held.
    pub fn close<C>(&mut self, channel: u16, ctx: &mut C) -> bool
    where
        C: flood::Context,
    {
        let Some(idx) = self.conns.iter().position(|c| c.channel() == channel) else {
            return false;
        };

        self.conns[idx].close(&mut self.pool, ctx);
        self.conns.remove(idx);
        true
    }

    /// Floods `payload` on `channel` with the connection's next sequence
    /// number.
    pub fn send<C>(&mut self, channel: u16, payload: &[u8], now_ms: u64, ctx: &mut C) -> bool
    where
        C: flood::Context,
    {
        let Some(conn) = self.conns.iter_mut().find(|c| c.channel() == channel) else {
            return false;
        };

        if !self.staging.set_payload(payload) {
            return false;
        }

        conn.send_next(&mut self.staging, &mut self.pool, now_ms, ctx)
    }

    /// Floods `payload` under a caller-chosen sequence number; the caller
    /// owns monotonicity.
    pub fn send_seqno<C>(
        &mut self,
        channel: u16,
        payload: &[u8],
        seqno: Seqno,
        now_ms: u64,
        ctx: &mut C,
    ) -> bool
    where
        C: flood::Context,
    {
        let Some(conn) = self.conns.iter_mut().find(|c| c.channel() == channel) else {
            return false;
        };

        if !self.staging.set_payload(payload) {
            return false;
        }

        conn.send(&mut self.staging, &mut self.pool, seqno, now_ms, ctx)
    }

    /// Feeds one raw frame from the medium through framing checks and into
    /// the connection bound to its channel.
    pub fn handle_frame<C>(&mut self, frame_bytes: &[u8], now_ms: u64, ctx: &mut C)
    where
        C: flood::Context,
    {
        let Some(frame) = Broadcast::read(frame_bytes) else {
            self.stats.malformed += 1;
            log::trace!("node {}: unparseable frame ({} bytes)", self.addr, frame_bytes.len());
            return;
        };

        // Our own transmission echoed back by the medium
        if frame.from == self.addr {
            return;
        }

        let channel = frame.channel;
        let Some(conn) = self.conns.iter_mut().find(|c| c.channel() == channel) else {
            log::trace!("node {}: frame for unbound channel {}", self.addr, channel);
            return;
        };

        let disposition = conn.handle_recv(frame.from, frame.payload, &mut self.pool, now_ms, ctx);

        match disposition {
            Disposition::Delivered { forwarded } => {
                self.stats.delivered += 1;
                if forwarded {
                    self.stats.forwarded += 1;
                }
            }
            Disposition::Stale => self.stats.stale += 1,
            Disposition::Malformed => self.stats.malformed += 1,
        }
    }

    pub fn handle_timer<C>(&mut self, key: TimerKey, now_ms: u64, ctx: &mut C)
    where
        C: flood::Context,
    {
        let Some(conn) = self.conns.iter_mut().find(|c| c.channel() == key.channel) else {
            return;
        };

        conn.handle_timer(key.kind, &mut self.staging, &mut self.pool, now_ms, ctx);
    }

    fn find(&self, channel: u16) -> Option<&Flood> {
        self.conns.iter().find(|c| c.channel() == channel)
    }
}
