use std::collections::VecDeque;
use std::time::Instant;

use crate::chunk::chunk_data::ChunkData;

/// Gap-count marker: the packet was covered by a gap-ack block and must
/// not be retransmitted while that holds.
pub(crate) const GAP_ACKED: u8 = 0xfe;
/// Gap-count marker: the packet is due for retransmission as soon as
/// credits permit.
pub(crate) const MARKED_FOR_RETRANSMIT: u8 = 0xff;

/// OutboundPacket is one queue element: the serialized packet (common
/// header plus one DATA chunk) together with its retry bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct OutboundPacket {
    pub(crate) tsn: u32,
    /// Full wire image, ready for (re)transmission.
    pub(crate) raw: Vec<u8>,
    /// DATA payload bytes; the unit both credit counters run in.
    pub(crate) payload_len: u32,
    pub(crate) retries: u8,
    /// Times the packet sat below a gap-ack block, or a marker value.
    pub(crate) gap_count: u8,
    pub(crate) last_sent: Instant,
}

impl OutboundPacket {
    pub(crate) fn is_gap_acked(&self) -> bool {
        self.gap_count == GAP_ACKED
    }

    pub(crate) fn is_marked_for_retransmit(&self) -> bool {
        self.gap_count == MARKED_FOR_RETRANSMIT
    }
}

/// PendingQueue holds packets sent and awaiting SACK, in strictly
/// ascending TSN order.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    packets: VecDeque<OutboundPacket>,
    byte_count: u32,
}

impl PendingQueue {
    pub(crate) fn push_back(&mut self, p: OutboundPacket) {
        debug_assert!(
            self.packets.back().map_or(true, |last| last.tsn < p.tsn),
            "pending queue must stay TSN-ordered"
        );
        self.byte_count += p.payload_len;
        self.packets.push_back(p);
    }

    pub(crate) fn front(&self) -> Option<&OutboundPacket> {
        self.packets.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<OutboundPacket> {
        let p = self.packets.pop_front();
        if let Some(p) = &p {
            self.byte_count -= p.payload_len;
        }
        p
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut OutboundPacket> {
        self.packets.iter_mut()
    }

    pub(crate) fn get_mut(&mut self, i: usize) -> Option<&mut OutboundPacket> {
        self.packets.get_mut(i)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &OutboundPacket> {
        self.packets.iter()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.packets.len()
    }

    pub(crate) fn byte_count(&self) -> u32 {
        self.byte_count
    }

    /// highest_tsn is the largest outstanding TSN, used as the
    /// fast-recovery exit point.
    pub(crate) fn highest_tsn(&self) -> Option<u32> {
        self.packets.back().map(|p| p.tsn)
    }

    pub(crate) fn clear(&mut self) {
        self.packets.clear();
        self.byte_count = 0;
    }
}

/// HoldingQueue holds packets awaiting credits, in send order.
#[derive(Debug, Default)]
pub(crate) struct HoldingQueue {
    packets: VecDeque<OutboundPacket>,
    byte_count: u32,
}

impl HoldingQueue {
    pub(crate) fn push_back(&mut self, p: OutboundPacket) {
        self.byte_count += p.payload_len;
        self.packets.push_back(p);
    }

    pub(crate) fn front(&self) -> Option<&OutboundPacket> {
        self.packets.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<OutboundPacket> {
        let p = self.packets.pop_front();
        if let Some(p) = &p {
            self.byte_count -= p.payload_len;
        }
        p
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.packets.len()
    }

    pub(crate) fn byte_count(&self) -> u32 {
        self.byte_count
    }

    pub(crate) fn clear(&mut self) {
        self.packets.clear();
        self.byte_count = 0;
    }
}

/// ReceiveHold buffers out-of-order inbound DATA chunks in strictly
/// ascending TSN order, deduplicating on insert.
#[derive(Debug, Default)]
pub(crate) struct ReceiveHold {
    chunks: VecDeque<ChunkData>,
}

impl ReceiveHold {
    /// insert returns false when the TSN was already buffered.
    pub(crate) fn insert(&mut self, chunk: ChunkData) -> bool {
        match self.chunks.binary_search_by(|c| c.tsn.cmp(&chunk.tsn)) {
            Ok(_) => false,
            Err(idx) => {
                self.chunks.insert(idx, chunk);
                true
            }
        }
    }

    /// pop_next removes and returns the head if its TSN is `expected`.
    pub(crate) fn pop_next(&mut self, expected: u32) -> Option<ChunkData> {
        if self.chunks.front().map(|c| c.tsn) == Some(expected) {
            self.chunks.pop_front()
        } else {
            None
        }
    }

    /// gap_blocks enumerates buffered TSN runs as (start, end) offsets
    /// relative to `cumulative_tsn`, for SACK generation.
    pub(crate) fn gap_blocks(&self, cumulative_tsn: u32) -> Vec<(u16, u16)> {
        let mut blocks: Vec<(u16, u16)> = Vec::new();
        for c in &self.chunks {
            let offset = c.tsn.wrapping_sub(cumulative_tsn) as u16;
            match blocks.last_mut() {
                Some((_, end)) if *end + 1 == offset => *end = offset,
                _ => blocks.push((offset, offset)),
            }
        }
        blocks
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn clear(&mut self) {
        self.chunks.clear();
    }
}
