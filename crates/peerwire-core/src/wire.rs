//! peerwire UDP wire format: the envelope and fixed-size records.
//!
//! Every datagram is a `PacketHeader` followed by `length` payload bytes.
//! Records inside payloads are fixed-size and unaligned so they can be read
//! straight out of the receive buffer. Multi-byte integers are big-endian
//! (network order). There is no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// Current envelope version. Anything else is dropped on receipt.
pub const WIRE_VERSION: u8 = 0x01;

/// Largest payload a single envelope can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Receive buffer size for the UDP socket.
pub const MAX_DATAGRAM: usize = 65_535;

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Prefix of every datagram.
///
/// Wire size: 6 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct PacketHeader {
    /// Envelope version. Currently 0x01.
    pub version: u8,
    /// Message kind tag. See `MessageKind`.
    pub kind: u8,
    /// Reserved, must be zero.
    pub flags: u8,
    /// Reserved, must be zero.
    pub reserved: u8,
    /// Payload length in bytes, not including this header.
    pub length: U16<BigEndian>,
}

assert_eq_size!(PacketHeader, [u8; 6]);

impl PacketHeader {
    pub fn new(kind: u8, length: u16) -> Self {
        Self {
            version: WIRE_VERSION,
            kind,
            flags: 0,
            reserved: 0,
            length: U16::new(length),
        }
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

/// An IPv4 endpoint: 4 raw address bytes then a big-endian port.
///
/// This is also the push-proxy encoding.
///
/// Wire size: 6 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct AddressRecord {
    pub addr: [u8; 4],
    pub port: U16<BigEndian>,
}

assert_eq_size!(AddressRecord, [u8; 6]);

/// Source flag: the source cannot accept inbound connections.
pub const SOURCE_FIREWALLED: u8 = 0x01;
/// Source flag: the source accepts TLS connections.
pub const SOURCE_TLS: u8 = 0x02;

/// One alternate source for a content hash.
///
/// Wire size: 7 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct SourceRecordWire {
    pub address: AddressRecord,
    /// bit 0: firewalled, bit 1: tls. Other bits reserved.
    pub flags: u8,
}

assert_eq_size!(SourceRecordWire, [u8; 7]);

/// Length of a query key as carried in QueryKeyReply.
pub const QUERY_KEY_LEN: usize = 16;
