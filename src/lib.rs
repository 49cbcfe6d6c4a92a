/*

Floodcast delivers a packet to every node of a connected broadcast network by
controlled re-flooding, without routing tables, acknowledgements, or any
central coordination. It is intended for small, dense meshes where every
transmission is overheard by an unknown subset of neighbors.

# Flooding

Every flooded packet carries a four-byte header: a hop count, a sequence
number, and the address of the originating node. The originator field is
preserved end to end; intermediate nodes never re-stamp it. This is what makes
network-wide duplicate detection possible at every hop with a single
(originator, seqno) pair of state per connection.

A node accepts a received packet if it comes from a different originator than
the last accepted packet, or from the same originator with a strictly newer
sequence number. Everything else is a replay of something already seen and is
dropped without delivery. The application decides, per accepted packet,
whether the flood continues: its receive callback returns a forwarding
verdict. A forwarded copy has its hop count incremented by one, and no copy is
ever transmitted once the incoming hop count has reached the hop budget, so a
flood terminates even in the presence of stray loops the dedup state cannot
see.

Sequence numbers are eight bits and wrap. Whether the dedup comparison honors
the wrap (serial-number arithmetic) or not (plain comparison) is a
per-connection configuration choice; both ends of a deployment should agree.

# Suppression

Naive flooding melts dense networks: every reception triggers a
retransmission, and n neighbors produce n near-simultaneous copies. Two
mechanisms keep the storm down.

First, a forwarded packet is not retransmitted immediately. It is copied into
a snapshot buffer and parked for a debounce window. Duplicate receptions of
the same flood arriving during the window are absorbed into the parked copy
(a counter records them) and push the window out, so a burst of copies from
several neighbors collapses into a single retransmission.

Second, every transmission - original or forwarded - passes through a
unique-identified-broadcast stage that waits a uniformly random delay in
[interval/2, interval) before actually sending. If a byte-identical packet is
overheard from a neighbor while waiting, the local copy is dropped instead of
sent: somebody else already said it. The comparison is on content, not on
sender, so it also fires when the echo was relayed rather than repeated.

# Buffers

Packets that must survive across a timer wait are copied into snapshots drawn
from a fixed-capacity pool. A snapshot is owned by exactly one connection,
and every code path that acquires one releases it - completion, suppression,
cancellation, and close all account for their snapshot. When the pool is
empty, sends fail synchronously and received packets are still delivered but
never forwarded; nothing blocks and nothing is queued.

Packet composition and parsing go through a single staging buffer per node
with spare headroom at the front, so a header prepend never moves payload
bytes. Exclusive access to it is a &mut borrow, and every protocol entry
point (send, frame receive, timer fire) runs to completion, which together
give the same ordering guarantees a run-to-completion event loop would.

# Layers

The protocol core is deterministic and does no I/O of its own. It is driven
through three entry points (send / handle_frame / handle_timer) and expresses
every outward effect - transmitting a frame, arming or cancelling a timer,
delivering a packet - through a context trait supplied by the caller. The
`host` module wraps the core with wall-clock timers and a UDP link driver
for running real processes; tests drive the same core over a simulated
medium with a virtual clock.

*/

pub mod buffer;
pub mod flood;
pub mod host;
pub mod link;
pub mod node;
pub mod uibc;
pub mod wire;

/// Identifies one soft timer of one connection. The core hands these tokens
/// to the context when arming timers and receives them back in
/// `handle_timer`; the host side only needs to store them, never interpret
/// them.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct TimerKey {
    pub channel: u16,
    pub kind: TimerKind,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum TimerKind {
    // Random-delay suppression window before a queued transmission goes out
    Suppress,
    // Debounce window before a forwarded packet is handed down for resend
    Resend,
}

pub use host::Host;
pub use node::Node;
