//! Packet fragmentation and reassembly
//!
//! A packet larger than the path MTU travels as a header-bearing
//! first piece (the packet itself, truncated, with the fragmented
//! flag set) followed by continuation fragments carrying the rest of
//! its bytes. All pieces share the parent's packet ID; the receiver
//! reassembles once every piece has arrived, in any order.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::packet::{Fragment, Packet, FLAG_FRAGMENTED, FRAGMENT_HEADER_LENGTH, MAX_FRAGMENTS};
use crate::{Error, Result};

/// Split a packet into a head piece and continuation fragments
///
/// Returns the (possibly truncated) head packet and the fragments to
/// send after it. When the packet fits in `mtu` bytes the fragment
/// list is empty and the head is the packet unchanged. Fails when the
/// packet would need more than [`MAX_FRAGMENTS`] pieces.
pub fn split_packet(packet: &Packet, mtu: usize) -> Result<(Packet, Vec<Fragment>)> {
    if mtu <= FRAGMENT_HEADER_LENGTH {
        return Err(Error::InvalidFragment(format!("mtu {mtu} too small")));
    }

    if packet.len() <= mtu {
        return Ok((packet.clone(), Vec::new()));
    }

    let mut flagged = packet.clone();
    flagged.set_flags(flagged.flags() | FLAG_FRAGMENTED);

    let chunk = mtu - FRAGMENT_HEADER_LENGTH;
    let remaining = flagged.len() - mtu;
    let continuation_count = remaining.div_ceil(chunk);
    let total = continuation_count + 1;
    if total > MAX_FRAGMENTS as usize {
        return Err(Error::InvalidFragment(format!(
            "packet of {} bytes needs {total} fragments, limit is {MAX_FRAGMENTS}",
            packet.len()
        )));
    }

    let mut fragments = Vec::with_capacity(continuation_count);
    let mut start = mtu;
    for index in 1..=continuation_count {
        let len = chunk.min(flagged.len() - start);
        fragments.push(Fragment::new(&flagged, start, len, index as u8, total as u8)?);
        start += len;
    }

    let head = Packet::parse(&flagged.as_bytes()[..mtu])?;
    Ok((head, fragments))
}

/// One packet mid-reassembly
#[derive(Debug)]
struct PartialPacket {
    /// Bytes of the header-bearing first piece (index 0)
    head: Option<Vec<u8>>,
    /// Continuation payloads by fragment index (1..total-1)
    fragments: HashMap<u8, Vec<u8>>,
    /// Total piece count, learned from the first fragment seen
    total: Option<u8>,
    first_seen: Instant,
}

impl PartialPacket {
    fn new() -> Self {
        Self {
            head: None,
            fragments: HashMap::new(),
            total: None,
            first_seen: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        match (self.head.as_ref(), self.total) {
            (Some(_), Some(total)) => self.fragments.len() == (total as usize) - 1,
            _ => false,
        }
    }

    fn reassemble(self) -> Result<Packet> {
        let total = self.total.unwrap_or(1);
        let mut bytes = self.head.unwrap_or_default();
        for index in 1..total {
            match self.fragments.get(&index) {
                Some(payload) => bytes.extend_from_slice(payload),
                None => {
                    return Err(Error::InvalidFragment(format!(
                        "missing fragment {index} of {total}"
                    )))
                }
            }
        }

        let mut packet = Packet::parse(&bytes)?;
        packet.set_flags(packet.flags() & !FLAG_FRAGMENTED);
        Ok(packet)
    }
}

/// Reassembles fragmented packets, keyed by packet ID
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    pending: HashMap<u64, PartialPacket>,
}

impl FragmentAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a received packet
    ///
    /// An unfragmented packet is returned immediately; a head piece is
    /// held until its continuation fragments complete it.
    pub fn add_packet(&mut self, packet: Packet) -> Result<Option<Packet>> {
        if packet.flags() & FLAG_FRAGMENTED == 0 {
            return Ok(Some(packet));
        }

        let id = packet.id();
        let entry = self.pending.entry(id).or_insert_with(PartialPacket::new);
        entry.head = Some(packet.into_bytes());
        self.try_complete(id)
    }

    /// Feed a received continuation fragment
    pub fn add_fragment(&mut self, fragment: Fragment) -> Result<Option<Packet>> {
        if !fragment.is_valid() || fragment.index() == 0 {
            return Err(Error::InvalidFragment(format!(
                "bad fragment numbering: index={}, total={}",
                fragment.index(),
                fragment.total()
            )));
        }

        let id = fragment.packet_id();
        let entry = self.pending.entry(id).or_insert_with(PartialPacket::new);
        entry.total.get_or_insert(fragment.total());
        entry
            .fragments
            .entry(fragment.index())
            .or_insert_with(|| fragment.payload().to_vec());
        self.try_complete(id)
    }

    fn try_complete(&mut self, id: u64) -> Result<Option<Packet>> {
        if self.pending.get(&id).is_some_and(PartialPacket::is_complete) {
            let partial = self.pending.remove(&id).unwrap();
            return partial.reassemble().map(Some);
        }
        Ok(None)
    }

    /// Drop partial packets older than `max_age`
    pub fn expire(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.pending
            .retain(|_, partial| now.duration_since(partial.first_seen) <= max_age);
    }

    /// Number of packets currently mid-reassembly
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
