//! Minimal Ethernet frame view
//!
//! The switch treats frames as opaque bytes; this parser only pulls
//! out what forwarding needs: the two MACs, an optional 802.1Q tag
//! and the EtherType.

use stella_protocol::Mac;

/// Minimum Ethernet frame length we will look at (two MACs plus
/// EtherType)
pub const MIN_FRAME_LENGTH: usize = 14;

/// EtherType for 802.1Q tagged frames
pub const ETHERTYPE_VLAN: u16 = 0x8100;

/// EtherType for IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Borrowed view over the interesting parts of an Ethernet frame
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// Destination MAC
    pub dst: Mac,
    /// Source MAC
    pub src: Mac,
    /// 802.1Q VLAN ID, when the frame is tagged
    pub vlan_tag: Option<u16>,
    /// EtherType of the encapsulated payload (after any 802.1Q tag)
    pub ethertype: u16,
    /// Payload after the Ethernet (and 802.1Q) header
    pub payload: &'a [u8],
}

impl<'a> FrameView<'a> {
    /// Parse a frame; returns `None` for anything shorter than the
    /// minimum header
    pub fn parse(frame: &'a [u8]) -> Option<Self> {
        if frame.len() < MIN_FRAME_LENGTH {
            return None;
        }

        let dst = Mac::from_bytes(&frame[0..6]).ok()?;
        let src = Mac::from_bytes(&frame[6..12]).ok()?;
        let ethertype = u16::from_be_bytes([frame[12], frame[13]]);

        if ethertype == ETHERTYPE_VLAN {
            if frame.len() < MIN_FRAME_LENGTH + 4 {
                return None;
            }
            let tci = u16::from_be_bytes([frame[14], frame[15]]);
            let inner_type = u16::from_be_bytes([frame[16], frame[17]]);
            return Some(Self {
                dst,
                src,
                vlan_tag: Some(tci & 0x0fff),
                ethertype: inner_type,
                payload: &frame[18..],
            });
        }

        Some(Self {
            dst,
            src,
            vlan_tag: None,
            ethertype,
            payload: &frame[14..],
        })
    }
}
