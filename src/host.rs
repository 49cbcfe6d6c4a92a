//! Runs a [`Node`] against wall-clock time and a UDP link. The host keeps
//! the soft-timer table the protocol core arms through its context, turns
//! core upcalls into queued [`Event`]s for the application, and sleeps on
//! the socket only until the next timer deadline.

use std::collections::{HashMap, VecDeque};
use std::net;
use std::time;

use crate::flood::{self, Delivery, FloodConfig};
use crate::link;
use crate::node::{Node, NodeConfig, NodeStats};
use crate::uibc;
use crate::wire::{Broadcast, NodeAddr, FRAME_SIZE_MAX};
use crate::TimerKey;

/// Configuration for a [`Host`] object.
#[derive(Clone)]
pub struct Config {
    /// This node's mesh address.
    pub addr: NodeAddr,

    /// Snapshot slots shared by all connections.
    pub pool_capacity: usize,

    /// Applied to every channel opened on this host.
    pub flood: FloodConfig,
}

impl Config {
    pub fn new(addr: NodeAddr) -> Self {
        Self {
            addr,
            pool_capacity: crate::buffer::POOL_CAPACITY_DEFAULT,
            flood: FloodConfig::default(),
        }
    }

    fn validate(&self) {
        assert!(
            self.pool_capacity > 0,
            "invalid host configuration: pool_capacity == 0"
        );
        self.flood.validate();
    }
}

/// Represents a host event.
#[derive(Debug)]
pub enum Event {
    /// Produced when a flooded packet has been accepted on a channel.
    Delivered {
        channel: u16,
        delivery: Delivery,
        payload: Box<[u8]>,
    },
    /// Produced when a queued transmission actually went out.
    Sent { channel: u16 },
    /// Produced when a queued transmission was suppressed by an overheard
    /// duplicate.
    Dropped { channel: u16 },
}

type ForwardFn = Box<dyn FnMut(u16, &Delivery, &[u8]) -> bool>;

/// The context handed to the protocol core: frames and transmits packets,
/// keeps the timer table, queues events.
struct HostIo {
    addr: NodeAddr,
    link_tx: link::LinkTx,
    frame_buf: Box<[u8]>,
    timers: HashMap<TimerKey, u64>,
    events: VecDeque<Event>,
    forward: ForwardFn,
}

impl uibc::Context for HostIo {
    fn send_broadcast(&mut self, channel: u16, packet: &[u8]) {
        let frame = Broadcast {
            channel,
            from: self.addr,
            payload: packet,
        };

        if let Some(size) = frame.write(&mut self.frame_buf) {
            self.link_tx.broadcast(&self.frame_buf[..size]);
        }
    }

    fn set_timer(&mut self, key: TimerKey, time_ms: u64) {
        self.timers.insert(key, time_ms);
    }

    fn unset_timer(&mut self, key: TimerKey) {
        self.timers.remove(&key);
    }

    fn on_sent(&mut self, channel: u16) {
        self.events.push_back(Event::Sent { channel });
    }

    fn on_dropped(&mut self, channel: u16) {
        self.events.push_back(Event::Dropped { channel });
    }
}

impl flood::Context for HostIo {
    fn on_deliver(&mut self, channel: u16, delivery: &Delivery, payload: &[u8]) -> bool {
        self.events.push_back(Event::Delivered {
            channel,
            delivery: *delivery,
            payload: payload.into(),
        });

        (self.forward)(channel, delivery, payload)
    }
}

/// A floodcast mesh participant bound to a UDP socket.
pub struct Host {
    node: Node,
    io: HostIo,
    link_rx: link::LinkRx,
    // Timestamps are computed relative to this instant
    time_ref: time::Instant,
    flood_config: FloodConfig,
}

impl Host {
    /// Binds a socket and sets the node up. `peers` lists the socket
    /// addresses of every other mesh member in earshot.
    pub fn bind<A>(bind_address: A, peers: &[net::SocketAddr], config: Config) -> std::io::Result<Host>
    where
        A: net::ToSocketAddrs,
    {
        config.validate();

        let (link_tx, link_rx) = link::new(bind_address, peers, FRAME_SIZE_MAX)?;

        let mut node_config = NodeConfig::new(config.addr);
        node_config.pool_capacity = config.pool_capacity;

        Ok(Host {
            node: Node::new(node_config),
            io: HostIo {
                addr: config.addr,
                link_tx,
                frame_buf: vec![0; FRAME_SIZE_MAX].into_boxed_slice(),
                timers: HashMap::new(),
                events: VecDeque::new(),
                // Keep the flood going unless the application says otherwise
                forward: Box::new(|_, _, _| true),
            },
            link_rx,
            time_ref: time::Instant::now(),
            flood_config: config.flood,
        })
    }

    /// Replaces the forwarding policy. The callback sees every accepted
    /// packet and returns whether this node should rebroadcast it.
    pub fn set_forward<F>(&mut self, forward: F)
    where
        F: FnMut(u16, &Delivery, &[u8]) -> bool + 'static,
    {
        self.io.forward = Box::new(forward);
    }

    pub fn open(&mut self, channel: u16) -> bool {
        self.node.open(channel, self.flood_config.clone())
    }

    pub fn close(&mut self, channel: u16) -> bool {
        self.node.close(channel, &mut self.io)
    }

    /// Floods `payload` on `channel`. Fails when the channel is unbound,
    /// the payload is oversized, or the snapshot pool is momentarily
    /// exhausted; retrying later is the caller's call.
    pub fn send(&mut self, channel: u16, payload: &[u8]) -> bool {
        let now_ms = elapsed_ms(&self.time_ref);
        self.node.send(channel, payload, now_ms, &mut self.io)
    }

    pub fn addr(&self) -> NodeAddr {
        self.node.addr()
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.link_rx.local_addr()
    }

    pub fn stats(&self) -> NodeStats {
        self.node.stats()
    }

    /// Returns the next queued event without blocking, after catching up on
    /// due timers and any frames already sitting in the socket.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.process_timeouts();
        self.dispatch_ready_frames();
        self.process_timeouts();

        self.io.events.pop_front()
    }

    /// Waits up to `timeout` for the next event, sleeping on the socket
    /// between timer deadlines.
    pub fn wait_event_timeout(&mut self, timeout: time::Duration) -> Option<Event> {
        let deadline_ms = elapsed_ms(&self.time_ref) + timeout.as_millis() as u64;

        loop {
            if let Some(event) = self.poll_event() {
                return Some(event);
            }

            let now_ms = elapsed_ms(&self.time_ref);

            if now_ms >= deadline_ms {
                return None;
            }

            let mut wait_ms = deadline_ms - now_ms;

            if let Some(timer_ms) = self.io.timers.values().copied().min() {
                wait_ms = wait_ms.min(timer_ms.saturating_sub(now_ms)).max(1);
            }

            match self
                .link_rx
                .wait_for_frame(Some(time::Duration::from_millis(wait_ms)))
            {
                Ok(Some(frame_bytes)) => {
                    let now_ms = elapsed_ms(&self.time_ref);
                    self.node.handle_frame(frame_bytes, now_ms, &mut self.io);
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!("host {}: socket error: {}", self.io.addr, err);
                    return None;
                }
            }
        }
    }

    /// Time remaining until the earliest armed timer.
    pub fn next_timer_timeout(&self) -> Option<time::Duration> {
        let now_ms = elapsed_ms(&self.time_ref);

        self.io
            .timers
            .values()
            .copied()
            .min()
            .map(|t_ms| time::Duration::from_millis(t_ms.saturating_sub(now_ms)))
    }

    fn process_timeouts(&mut self) {
        let now_ms = elapsed_ms(&self.time_ref);

        let due: Vec<TimerKey> = self
            .io
            .timers
            .iter()
            .filter(|(_, &t_ms)| now_ms >= t_ms)
            .map(|(&key, _)| key)
            .collect();

        for key in due {
            self.io.timers.remove(&key);
            self.node.handle_timer(key, now_ms, &mut self.io);
        }
    }

    fn dispatch_ready_frames(&mut self) {
        loop {
            match self.link_rx.try_read_frame() {
                Ok(Some(frame_bytes)) => {
                    let now_ms = elapsed_ms(&self.time_ref);
                    self.node.handle_frame(frame_bytes, now_ms, &mut self.io);
                }
                Ok(None) => break,
                Err(err) => {
                    log::warn!("host {}: socket error: {}", self.io.addr, err);
                    break;
                }
            }
        }
    }
}

fn elapsed_ms(time_ref: &time::Instant) -> u64 {
    (time::Instant::now() - *time_ref).as_millis() as u64
}
