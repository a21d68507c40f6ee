//! Decoded UDP messages and their envelope codec.
//!
//! `Message::decode` never panics on hostile input. Anything that does not
//! parse is a `PacketError`; the receive path discards the datagram and
//! moves on.

use std::fmt;

use serde::Serialize;
use zerocopy::byteorder::U16;
use zerocopy::{AsBytes, FromBytes};

use crate::address::PeerAddress;
use crate::error::ErrorKind;
use crate::urn::ContentHash;
use crate::wire::{
    AddressRecord, PacketHeader, SourceRecordWire, MAX_PAYLOAD, QUERY_KEY_LEN, SOURCE_FIREWALLED,
    SOURCE_TLS, WIRE_VERSION,
};

// ── Kinds ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MessageKind {
    Ping = 0x01,
    Pong = 0x02,
    AltLocs = 0x10,
    PushProxies = 0x11,
    QueryKeyRequest = 0x20,
    QueryKeyReply = 0x21,
}

impl TryFrom<u8> for MessageKind {
    type Error = PacketError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::Ping),
            0x02 => Ok(Self::Pong),
            0x10 => Ok(Self::AltLocs),
            0x11 => Ok(Self::PushProxies),
            0x20 => Ok(Self::QueryKeyRequest),
            0x21 => Ok(Self::QueryKeyReply),
            other => Err(PacketError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated: {len} bytes, need at least {need}")]
    Truncated { len: usize, need: usize },
    #[error("unsupported wire version {0:#04x}")]
    Version(u8),
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),
    #[error("declared payload length {declared} but {actual} bytes follow the header")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("malformed {0} payload")]
    Malformed(MessageKind),
    #[error("payload of {0} bytes exceeds the envelope limit")]
    TooLarge(usize),
}

impl PacketError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Parse
    }
}

// ── Payload types ─────────────────────────────────────────────────────────────

/// An IPv4 endpoint exactly as it appeared on the wire. Not yet validated:
/// registries decide whether it is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawAddress {
    pub addr: [u8; 4],
    pub port: u16,
}

impl RawAddress {
    /// Only IPv4 endpoints have a wire encoding.
    pub fn from_peer(peer: &PeerAddress) -> Option<Self> {
        match peer.ip() {
            std::net::IpAddr::V4(v4) => Some(Self {
                addr: v4.octets(),
                port: peer.port(),
            }),
            std::net::IpAddr::V6(_) => None,
        }
    }

    pub fn to_peer(&self) -> PeerAddress {
        PeerAddress::v4(self.addr[0], self.addr[1], self.addr[2], self.addr[3], self.port)
    }

    fn to_record(self) -> AddressRecord {
        AddressRecord {
            addr: self.addr,
            port: U16::new(self.port),
        }
    }

    fn from_record(rec: &AddressRecord) -> Self {
        Self {
            addr: rec.addr,
            port: rec.port.get(),
        }
    }
}

/// A source announced for a content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRecord {
    pub address: RawAddress,
    pub firewalled: bool,
    pub tls: bool,
}

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping,
    /// A host the sender knows to be reachable.
    Pong { host: RawAddress },
    /// Sources the sender knows for `hash`.
    AltLocs {
        hash: ContentHash,
        sources: Vec<SourceRecord>,
    },
    /// Proxies through which `target` can be reached.
    PushProxies {
        target: RawAddress,
        proxies: Vec<RawAddress>,
    },
    QueryKeyRequest,
    QueryKeyReply { key: [u8; QUERY_KEY_LEN] },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Ping => MessageKind::Ping,
            Message::Pong { .. } => MessageKind::Pong,
            Message::AltLocs { .. } => MessageKind::AltLocs,
            Message::PushProxies { .. } => MessageKind::PushProxies,
            Message::QueryKeyRequest => MessageKind::QueryKeyRequest,
            Message::QueryKeyReply { .. } => MessageKind::QueryKeyReply,
        }
    }

    /// Serialize into a complete datagram (header + payload).
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut payload = Vec::new();
        match self {
            Message::Ping | Message::QueryKeyRequest => {}
            Message::Pong { host } => payload.extend_from_slice(host.to_record().as_bytes()),
            Message::AltLocs { hash, sources } => {
                payload.extend_from_slice(hash.as_bytes());
                for src in sources {
                    let mut flags = 0u8;
                    if src.firewalled {
                        flags |= SOURCE_FIREWALLED;
                    }
                    if src.tls {
                        flags |= SOURCE_TLS;
                    }
                    let rec = SourceRecordWire {
                        address: src.address.to_record(),
                        flags,
                    };
                    payload.extend_from_slice(rec.as_bytes());
                }
            }
            Message::PushProxies { target, proxies } => {
                payload.extend_from_slice(target.to_record().as_bytes());
                for proxy in proxies {
                    payload.extend_from_slice(proxy.to_record().as_bytes());
                }
            }
            Message::QueryKeyReply { key } => payload.extend_from_slice(key),
        }

        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::TooLarge(payload.len()));
        }

        let header = PacketHeader::new(self.kind() as u8, payload.len() as u16);
        let mut out = Vec::with_capacity(std::mem::size_of::<PacketHeader>() + payload.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse a complete datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        let header_len = std::mem::size_of::<PacketHeader>();
        let header = PacketHeader::read_from_prefix(datagram).ok_or(PacketError::Truncated {
            len: datagram.len(),
            need: header_len,
        })?;

        if header.version != WIRE_VERSION {
            return Err(PacketError::Version(header.version));
        }
        let kind = MessageKind::try_from(header.kind)?;

        let payload = &datagram[header_len..];
        let declared = header.length.get() as usize;
        if declared != payload.len() {
            return Err(PacketError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        match kind {
            MessageKind::Ping => expect_empty(kind, payload).map(|_| Message::Ping),
            MessageKind::QueryKeyRequest => {
                expect_empty(kind, payload).map(|_| Message::QueryKeyRequest)
            }
            MessageKind::Pong => {
                let rec = AddressRecord::read_from(payload).ok_or(PacketError::Malformed(kind))?;
                Ok(Message::Pong {
                    host: RawAddress::from_record(&rec),
                })
            }
            MessageKind::AltLocs => decode_altlocs(payload),
            MessageKind::PushProxies => decode_push_proxies(payload),
            MessageKind::QueryKeyReply => {
                let key: [u8; QUERY_KEY_LEN] =
                    payload.try_into().map_err(|_| PacketError::Malformed(kind))?;
                Ok(Message::QueryKeyReply { key })
            }
        }
    }
}

fn expect_empty(kind: MessageKind, payload: &[u8]) -> Result<(), PacketError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(PacketError::Malformed(kind))
    }
}

fn decode_altlocs(payload: &[u8]) -> Result<Message, PacketError> {
    let kind = MessageKind::AltLocs;
    if payload.len() < ContentHash::LEN {
        return Err(PacketError::Malformed(kind));
    }
    let (hash_bytes, rest) = payload.split_at(ContentHash::LEN);
    let record_len = std::mem::size_of::<SourceRecordWire>();
    if rest.len() % record_len != 0 {
        return Err(PacketError::Malformed(kind));
    }

    let mut hash = [0u8; 32];
    hash.copy_from_slice(hash_bytes);

    let sources = rest
        .chunks_exact(record_len)
        .filter_map(SourceRecordWire::read_from)
        .map(|rec| SourceRecord {
            address: RawAddress::from_record(&rec.address),
            firewalled: rec.flags & SOURCE_FIREWALLED != 0,
            tls: rec.flags & SOURCE_TLS != 0,
        })
        .collect();

    Ok(Message::AltLocs {
        hash: ContentHash::from_bytes(hash),
        sources,
    })
}

fn decode_push_proxies(payload: &[u8]) -> Result<Message, PacketError> {
    let kind = MessageKind::PushProxies;
    let record_len = std::mem::size_of::<AddressRecord>();
    if payload.is_empty() || payload.len() % record_len != 0 {
        return Err(PacketError::Malformed(kind));
    }
    let mut records = payload
        .chunks_exact(record_len)
        .filter_map(AddressRecord::read_from)
        .map(|rec| RawAddress::from_record(&rec));

    let target = records.next().ok_or(PacketError::Malformed(kind))?;
    Ok(Message::PushProxies {
        target,
        proxies: records.collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(a: u8, port: u16) -> RawAddress {
        RawAddress {
            addr: [10, 0, 0, a],
            port,
        }
    }

    #[test]
    fn altlocs_encode_decode() {
        let msg = Message::AltLocs {
            hash: ContentHash::of(b"content"),
            sources: vec![
                SourceRecord {
                    address: raw(1, 6346),
                    firewalled: false,
                    tls: true,
                },
                SourceRecord {
                    address: raw(2, 6347),
                    firewalled: true,
                    tls: false,
                },
            ],
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), 6 + 32 + 2 * 7);
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn push_proxies_need_a_target() {
        let mut bytes = PacketHeader::new(MessageKind::PushProxies as u8, 0)
            .as_bytes()
            .to_vec();
        assert_eq!(
            Message::decode(&bytes),
            Err(PacketError::Malformed(MessageKind::PushProxies))
        );

        let msg = Message::PushProxies {
            target: raw(9, 6346),
            proxies: vec![raw(1, 1000), raw(2, 2000)],
        };
        bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn truncated_header_rejected() {
        assert_eq!(
            Message::decode(&[1, 1, 0]),
            Err(PacketError::Truncated { len: 3, need: 6 })
        );
    }

    #[test]
    fn bad_version_and_kind_rejected() {
        let mut bytes = Message::Ping.encode().unwrap();
        bytes[0] = 0x09;
        assert_eq!(Message::decode(&bytes), Err(PacketError::Version(0x09)));

        let mut bytes = Message::Ping.encode().unwrap();
        bytes[1] = 0x7f;
        assert_eq!(Message::decode(&bytes), Err(PacketError::UnknownKind(0x7f)));
    }

    #[test]
    fn length_mismatch_rejected() {
        let mut bytes = Message::Pong { host: raw(1, 80) }.encode().unwrap();
        bytes.push(0);
        assert_eq!(
            Message::decode(&bytes),
            Err(PacketError::LengthMismatch {
                declared: 6,
                actual: 7
            })
        );
    }

    #[test]
    fn ragged_altloc_payload_rejected() {
        let mut payload = ContentHash::of(b"x").as_bytes().to_vec();
        payload.extend_from_slice(&[1, 2, 3]);
        let mut bytes = PacketHeader::new(MessageKind::AltLocs as u8, payload.len() as u16)
            .as_bytes()
            .to_vec();
        bytes.extend_from_slice(&payload);
        assert_eq!(
            Message::decode(&bytes),
            Err(PacketError::Malformed(MessageKind::AltLocs))
        );
    }

    #[test]
    fn oversized_payload_rejected_on_encode() {
        let sources = vec![
            SourceRecord {
                address: raw(1, 1),
                firewalled: false,
                tls: false,
            };
            10_000
        ];
        let msg = Message::AltLocs {
            hash: ContentHash::of(b"big"),
            sources,
        };
        assert!(matches!(msg.encode(), Err(PacketError::TooLarge(_))));
    }
}
