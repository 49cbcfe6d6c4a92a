//! Deterministic mesh harness: a handful of nodes, a lossless in-memory
//! medium with configurable adjacency, and a virtual clock that jumps
//! straight to the next armed timer. Frames propagate instantly; time only
//! passes when every outbox is empty.

use std::collections::HashMap;

use floodcast::flood::{self, Delivery, FloodConfig};
use floodcast::node::{Node, NodeConfig, NodeStats};
use floodcast::uibc;
use floodcast::wire::{Broadcast, NodeAddr, Seqno, FRAME_SIZE_MAX};
use floodcast::TimerKey;

pub const CHANNEL: u16 = 77;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Delivered {
        channel: u16,
        delivery: Delivery,
        payload: Vec<u8>,
    },
    Sent {
        channel: u16,
    },
    Dropped {
        channel: u16,
    },
}

pub struct SimIo {
    addr: NodeAddr,
    pub outbox: Vec<Vec<u8>>,
    pub timers: HashMap<TimerKey, u64>,
    pub events: Vec<SimEvent>,
    /// Blanket forwarding verdict this node's application returns.
    pub forward: bool,
    /// Frames this node put on the medium.
    pub tx_count: u64,
}

impl SimIo {
    fn new(addr: NodeAddr) -> Self {
        Self {
            addr,
            outbox: Vec::new(),
            timers: HashMap::new(),
            events: Vec::new(),
            forward: true,
            tx_count: 0,
        }
    }
}

impl uibc::Context for SimIo {
    fn send_broadcast(&mut self, channel: u16, packet: &[u8]) {
        let frame = Broadcast {
            channel,
            from: self.addr,
            payload: packet,
        };

        let mut buf = vec![0u8; FRAME_SIZE_MAX];
        let size = frame.write(&mut buf).expect("frame oversized");
        buf.truncate(size);

        self.outbox.push(buf);
        self.tx_count += 1;
    }

    fn set_timer(&mut self, key: TimerKey, time_ms: u64) {
        self.timers.insert(key, time_ms);
    }

    fn unset_timer(&mut self, key: TimerKey) {
        self.timers.remove(&key);
    }

    fn on_sent(&mut self, channel: u16) {
        self.events.push(SimEvent::Sent { channel });
    }

    fn on_dropped(&mut self, channel: u16) {
        self.events.push(SimEvent::Dropped { channel });
    }
}

impl flood::Context for SimIo {
    fn on_deliver(&mut self, channel: u16, delivery: &Delivery, payload: &[u8]) -> bool {
        self.events.push(SimEvent::Delivered {
            channel,
            delivery: *delivery,
            payload: payload.to_vec(),
        });

        self.forward
    }
}

pub struct Mesh {
    pub nodes: Vec<Node>,
    pub ios: Vec<SimIo>,
    links: Vec<Vec<usize>>,
    pub now_ms: u64,
}

/// Mesh addresses start at 1; node index `i` is `NodeAddr(i + 1)`.
pub fn addr(index: usize) -> NodeAddr {
    NodeAddr(index as u16 + 1)
}

impl Mesh {
    /// Everyone hears everyone.
    pub fn full(count: usize, config: FloodConfig) -> Mesh {
        let links = (0..count)
            .flat_map(|i| (i + 1..count).map(move |j| (i, j)))
            .collect::<Vec<_>>();

        Mesh::with_links(count, &links, config)
    }

    /// A straight line: node i hears i-1 and i+1.
    pub fn chain(count: usize, config: FloodConfig) -> Mesh {
        let links = (0..count - 1).map(|i| (i, i + 1)).collect::<Vec<_>>();

        Mesh::with_links(count, &links, config)
    }

    pub fn with_links(count: usize, links: &[(usize, usize)], config: FloodConfig) -> Mesh {
        let mut nodes = Vec::new();
        let mut ios = Vec::new();
        let mut adjacency = vec![Vec::new(); count];

        for i in 0..count {
            let mut node = Node::new(NodeConfig::new(addr(i)));
            assert!(node.open(CHANNEL, config.clone()));

            nodes.push(node);
            ios.push(SimIo::new(addr(i)));
        }

        for &(a, b) in links {
            adjacency[a].push(b);
            adjacency[b].push(a);
        }

        Mesh {
            nodes,
            ios,
            links: adjacency,
            now_ms: 0,
        }
    }

    pub fn send(&mut self, node: usize, payload: &[u8]) -> bool {
        let now_ms = self.now_ms;
        self.nodes[node].send(CHANNEL, payload, now_ms, &mut self.ios[node])
    }

    pub fn send_seqno(&mut self, node: usize, payload: &[u8], seqno: u8) -> bool {
        let now_ms = self.now_ms;
        self.nodes[node].send_seqno(CHANNEL, payload, Seqno(seqno), now_ms, &mut self.ios[node])
    }

    pub fn close(&mut self, node: usize) -> bool {
        self.nodes[node].close(CHANNEL, &mut self.ios[node])
    }

    /// Propagates frames until every outbox is empty, without advancing the
    /// clock.
    pub fn flush_frames(&mut self) {
        loop {
            let mut any = false;

            for i in 0..self.nodes.len() {
                let frames = std::mem::take(&mut self.ios[i].outbox);

                for frame in frames {
                    any = true;

                    for &j in self.links[i].iter() {
                        let now_ms = self.now_ms;
                        self.nodes[j].handle_frame(&frame, now_ms, &mut self.ios[j]);
                    }
                }
            }

            if !any {
                break;
            }
        }
    }

    /// Runs the mesh until no frame is in flight and no timer is armed.
    /// Floods always terminate, so this does too.
    pub fn settle(&mut self) {
        self.flush_frames();

        loop {
            let next_ms = self
                .ios
                .iter()
                .flat_map(|io| io.timers.values().copied())
                .min();

            let Some(next_ms) = next_ms else {
                break;
            };

            self.now_ms = self.now_ms.max(next_ms);

            for i in 0..self.nodes.len() {
                let due: Vec<TimerKey> = self.ios[i]
                    .timers
                    .iter()
                    .filter(|(_, &t_ms)| t_ms <= self.now_ms)
                    .map(|(&key, _)| key)
                    .collect();

                for key in due {
                    self.ios[i].timers.remove(&key);
                    let now_ms = self.now_ms;
                    self.nodes[i].handle_timer(key, now_ms, &mut self.ios[i]);
                }
            }

            self.flush_frames();
        }
    }

    pub fn deliveries(&self, node: usize) -> Vec<(Delivery, Vec<u8>)> {
        self.ios[node]
            .events
            .iter()
            .filter_map(|event| match event {
                SimEvent::Delivered {
                    delivery, payload, ..
                } => Some((*delivery, payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn transmissions(&self, node: usize) -> u64 {
        self.ios[node].tx_count
    }

    pub fn stats(&self, node: usize) -> NodeStats {
        self.nodes[node].stats()
    }

    /// Every snapshot in the whole mesh accounted for.
    pub fn assert_no_leaks(&self) {
        for (i, node) in self.nodes.iter().enumerate() {
            assert_eq!(
                node.snapshots_in_use(),
                0,
                "node {} still holds snapshots after settling",
                i
            );
        }
    }
}
