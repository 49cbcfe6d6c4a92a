mod crc;

use crate::buffer;

pub const FRAME_TYPE_BROADCAST: u8 = 0x01;

pub const FRAME_HEADER_SIZE: usize = 5;
pub const FRAME_CRC_SIZE: usize = crc::SIZE;
pub const FRAME_OVERHEAD_SIZE: usize = FRAME_HEADER_SIZE + FRAME_CRC_SIZE;

/// Largest frame the link layer will ever carry: a maximum-size staged packet
/// with every byte of headroom spent on headers, plus framing overhead.
pub const FRAME_SIZE_MAX: usize =
    FRAME_OVERHEAD_SIZE + buffer::HEADROOM + buffer::PACKET_SIZE_MAX;

/// Node identity, compared by value. Assigned once at startup and never
/// changed afterwards.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct NodeAddr(pub u16);

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.0 >> 8, self.0 & 0xFF)
    }
}

/// Per-originator packet counter. Wraps at 256; only ever compared against
/// sequence numbers from the same originator.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct Seqno(pub u8);

/// How two sequence numbers from one originator are ordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqCompare {
    /// Plain integer comparison. A counter that wraps appears to go
    /// backwards and its packets are treated as stale until it catches up.
    Strict,
    /// Signed serial-number arithmetic: a value up to 127 steps ahead of the
    /// reference counts as newer, wrap included.
    Serial,
}

impl Seqno {
    pub fn next(self) -> Seqno {
        Seqno(self.0.wrapping_add(1))
    }

    pub fn newer_than(self, reference: Seqno, mode: SeqCompare) -> bool {
        match mode {
            SeqCompare::Strict => self.0 > reference.0,
            SeqCompare::Serial => (self.0.wrapping_sub(reference.0) as i8) > 0,
        }
    }
}

impl std::fmt::Display for Seqno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Header prepended to every flooded packet.
///
/// `hops` leads so the forwarding path can bump it without re-serializing
/// the rest. The originator field travels unmodified across the whole flood.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FloodHeader {
    pub hops: u8,
    pub seqno: Seqno,
    pub originator: NodeAddr,
}

impl FloodHeader {
    pub const SIZE: usize = 4;

    pub fn read(packet: &[u8]) -> Option<FloodHeader> {
        let mut rd = Reader::new(packet);

        Some(FloodHeader {
            hops: rd.read_u8()?,
            seqno: Seqno(rd.read_u8()?),
            originator: NodeAddr(rd.read_u16()?),
        })
    }

    pub fn write(&self, dst: &mut [u8]) -> Option<usize> {
        if dst.len() < Self::SIZE {
            return None;
        }

        let mut wr = Writer::new(dst);

        wr.write_u8(self.hops);
        wr.write_u8(self.seqno.0);
        wr.write_u16(self.originator.0);

        Some(Self::SIZE)
    }

    /// Increments the hop count of a serialized packet in place.
    pub fn bump_hops(packet: &mut [u8]) {
        if let Some(hops) = packet.first_mut() {
            *hops = hops.saturating_add(1);
        }
    }
}

/// One link-layer frame: a channel-tagged broadcast from a named sender,
/// integrity-checked with a CRC-32 trailer.
#[derive(Debug)]
pub struct Broadcast<'a> {
    pub channel: u16,
    pub from: NodeAddr,
    pub payload: &'a [u8],
}

impl<'a> Broadcast<'a> {
    pub fn read(src: &'a [u8]) -> Option<Broadcast<'a>> {
        if src.len() < FRAME_OVERHEAD_SIZE {
            return None;
        }

        if src[0] != FRAME_TYPE_BROADCAST {
            return None;
        }

        if !verify_crc(src) {
            return None;
        }

        let mut rd = Reader::new(&src[1..src.len() - FRAME_CRC_SIZE]);

        let channel = rd.read_u16()?;
        let from = NodeAddr(rd.read_u16()?);

        Some(Broadcast {
            channel,
            from,
            payload: rd.rest(),
        })
    }

    pub fn write(&self, dst: &mut [u8]) -> Option<usize> {
        let data_size = FRAME_HEADER_SIZE + self.payload.len();
        let frame_size = data_size + FRAME_CRC_SIZE;

        if dst.len() < frame_size {
            return None;
        }

        {
            let mut wr = Writer::new(dst);

            wr.write_u8(FRAME_TYPE_BROADCAST);
            wr.write_u16(self.channel);
            wr.write_u16(self.from.0);
            wr.write_slice(self.payload);
        }

        let frame_crc = crc::compute(&dst[..data_size]);
        dst[data_size..frame_size].copy_from_slice(&frame_crc.to_le_bytes());

        Some(frame_size)
    }
}

pub fn verify_crc(frame_bytes: &[u8]) -> bool {
    if frame_bytes.len() < FRAME_CRC_SIZE {
        return false;
    }

    let data = &frame_bytes[..frame_bytes.len() - FRAME_CRC_SIZE];

    let crc_bytes = frame_bytes[frame_bytes.len() - FRAME_CRC_SIZE..]
        .try_into()
        .unwrap();
    let frame_crc = u32::from_le_bytes(crc_bytes);

    crc::compute(data) == frame_crc
}

pub struct Reader<'a> {
    buf: &'a [u8],
    idx: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, idx: 0 }
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let value = *self.buf.get(self.idx)?;
        self.idx += 1;
        Some(value)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Some((hi as u16) << 8 | lo as u16)
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.idx..]
    }
}

/// Writes big-endian fields into a slice whose capacity the caller has
/// already checked.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    idx: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, idx: 0 }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf[self.idx] = value;
        self.idx += 1;
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_u8((value >> 8) as u8);
        self.write_u8(value as u8);
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        self.buf[self.idx..self.idx + bytes.len()].copy_from_slice(bytes);
        self.idx += bytes.len();
    }
}
