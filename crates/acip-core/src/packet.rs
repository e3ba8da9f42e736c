//! Packet header encoding and decoding for the ACIP wire protocol.
//!
//! Every packet on every transport is a 16-byte header followed by
//! `payload_len` bytes. All multi-byte fields are big-endian (network byte
//! order). The CRC32 covers the header (with the CRC field zeroed) plus
//! the payload, so corruption anywhere in the packet is caught.

use crate::error::FrameError;
use crate::{MAX_PAYLOAD_SIZE, PACKET_MAGIC, PROTOCOL_VERSION};

/// Fixed packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 16;

/// Packet types as carried in the header `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    /// Client opens the crypto handshake with its ephemeral key.
    HandshakeStart = 0x0001,
    /// Server auth challenge: ephemeral key, identity, transcript signature.
    HandshakeAuth = 0x0002,
    /// Client identity reply; both sides derive session keys after this.
    HandshakeComplete = 0x0003,

    /// Keepalive / RTT probe.
    Ping = 0x0010,
    /// Response to PING.
    Pong = 0x0011,
    /// Liveness probe answered by the discovery server.
    DiscoveryPing = 0x0012,
    /// Response to DISCOVERY_PING.
    DiscoveryPong = 0x0013,

    /// Create a session (key accumulation or zero-key finalize).
    SessionCreate = 0x0020,
    /// Session created; carries uuid, session string, STUN/TURN lists.
    SessionCreated = 0x0021,
    /// Look up a session by its session string.
    SessionLookup = 0x0022,
    /// Lookup answer; safe on missing sessions.
    SessionInfo = 0x0023,
    /// Join a session with an identity key.
    SessionJoin = 0x0024,
    /// Join outcome.
    SessionJoined = 0x0025,
    /// Leave a session.
    SessionLeave = 0x0026,

    /// WebRTC SDP relay (unicast or session broadcast).
    WebRtcSdp = 0x0030,
    /// WebRTC ICE candidate relay, same routing as SDP.
    WebRtcIce = 0x0031,

    /// A participant announces itself as the session's media host.
    HostAnnouncement = 0x0040,
    /// A participant reports the media host gone.
    HostLost = 0x0041,

    /// Ring membership snapshot for the consensus topology.
    RingMembers = 0x0050,
    /// Leader opens a metrics collection round.
    StatsCollectionStart = 0x0051,
    /// Accumulated metrics traveling counter-clockwise around the ring.
    StatsUpdate = 0x0052,
    /// Participant acknowledgment of an election result.
    StatsAck = 0x0053,
    /// Leader broadcast of the elected host and backup.
    ElectionResult = 0x0054,

    /// Error reply: numeric kind code plus a short message.
    Error = 0x00FF,
}

impl TryFrom<u16> for PacketType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, FrameError> {
        match value {
            0x0001 => Ok(Self::HandshakeStart),
            0x0002 => Ok(Self::HandshakeAuth),
            0x0003 => Ok(Self::HandshakeComplete),
            0x0010 => Ok(Self::Ping),
            0x0011 => Ok(Self::Pong),
            0x0012 => Ok(Self::DiscoveryPing),
            0x0013 => Ok(Self::DiscoveryPong),
            0x0020 => Ok(Self::SessionCreate),
            0x0021 => Ok(Self::SessionCreated),
            0x0022 => Ok(Self::SessionLookup),
            0x0023 => Ok(Self::SessionInfo),
            0x0024 => Ok(Self::SessionJoin),
            0x0025 => Ok(Self::SessionJoined),
            0x0026 => Ok(Self::SessionLeave),
            0x0030 => Ok(Self::WebRtcSdp),
            0x0031 => Ok(Self::WebRtcIce),
            0x0040 => Ok(Self::HostAnnouncement),
            0x0041 => Ok(Self::HostLost),
            0x0050 => Ok(Self::RingMembers),
            0x0051 => Ok(Self::StatsCollectionStart),
            0x0052 => Ok(Self::StatsUpdate),
            0x0053 => Ok(Self::StatsAck),
            0x0054 => Ok(Self::ElectionResult),
            0x00FF => Ok(Self::Error),
            other => Err(FrameError::UnknownPacketType(other)),
        }
    }
}

impl PacketType {
    /// Raw wire value.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// True for the three handshake packet types.
    #[must_use]
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::HandshakeStart | Self::HandshakeAuth | Self::HandshakeComplete
        )
    }
}

/// Header flags bitmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Payload is AEAD-sealed.
    pub const ENCRYPTED: u8 = 0b0000_0001;
    /// Payload is compressed (reserved; WebSocket permessage-deflate
    /// happens below this layer).
    pub const COMPRESSED: u8 = 0b0000_0010;

    /// Empty flag set.
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// From a raw header byte.
    #[must_use]
    pub fn from_u8(raw: u8) -> Self {
        Self(raw)
    }

    /// Mark the payload as AEAD-sealed.
    #[must_use]
    pub fn with_encrypted(mut self) -> Self {
        self.0 |= Self::ENCRYPTED;
        self
    }

    /// Check the encrypted bit.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    /// Raw byte value.
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// Decoded packet header.
///
/// Layout (big-endian): `magic u32 | version u8 | type u16 | flags u8 |
/// payload_len u32 | crc32 u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type from the registry.
    pub packet_type: PacketType,
    /// Header flags.
    pub flags: PacketFlags,
    /// Payload byte count following the header.
    pub payload_len: u32,
    /// CRC32 over header (CRC field zeroed) and payload.
    pub crc32: u32,
}

impl PacketHeader {
    /// Build a header for a payload, computing the checksum.
    #[must_use]
    pub fn for_payload(packet_type: PacketType, flags: PacketFlags, payload: &[u8]) -> Self {
        let mut header = Self {
            packet_type,
            flags,
            payload_len: payload.len() as u32,
            crc32: 0,
        };
        header.crc32 = header.compute_crc(payload);
        header
    }

    /// Parse a header from exactly [`PACKET_HEADER_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::TooShort` if fewer bytes are given,
    /// `FrameError::BadMagic` / `UnsupportedVersion` / `UnknownPacketType`
    /// on registry violations, and `FrameError::PayloadTooLarge` if the
    /// declared payload exceeds [`MAX_PAYLOAD_SIZE`]. The CRC is *not*
    /// verified here; call [`PacketHeader::verify_crc`] once the payload
    /// has been read.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: PACKET_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if magic != PACKET_MAGIC {
            return Err(FrameError::BadMagic { found: magic });
        }

        let version = data[4];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        let packet_type = PacketType::try_from(u16::from_be_bytes([data[5], data[6]]))?;
        let flags = PacketFlags::from_u8(data[7]);
        let payload_len = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let crc32 = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);

        if payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge {
                len: payload_len as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            packet_type,
            flags,
            payload_len,
            crc32,
        })
    }

    /// Encode the header into its 16 wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut buf = [0u8; PACKET_HEADER_SIZE];
        buf[0..4].copy_from_slice(&PACKET_MAGIC.to_be_bytes());
        buf[4] = PROTOCOL_VERSION;
        buf[5..7].copy_from_slice(&self.packet_type.as_u16().to_be_bytes());
        buf[7] = self.flags.as_u8();
        buf[8..12].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[12..16].copy_from_slice(&self.crc32.to_be_bytes());
        buf
    }

    /// Verify the checksum against a received payload.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::ChecksumMismatch` if the computed CRC differs
    /// from the one carried in the header.
    pub fn verify_crc(&self, payload: &[u8]) -> Result<(), FrameError> {
        let actual = self.compute_crc(payload);
        if actual != self.crc32 {
            return Err(FrameError::ChecksumMismatch {
                expected: self.crc32,
                actual,
            });
        }
        Ok(())
    }

    fn compute_crc(&self, payload: &[u8]) -> u32 {
        let zeroed = Self {
            crc32: 0,
            ..*self
        };
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&zeroed.encode());
        hasher.update(payload);
        hasher.finalize()
    }
}

/// Encode a complete packet (header + payload) into one buffer.
#[must_use]
pub fn encode_packet(packet_type: PacketType, flags: PacketFlags, payload: &[u8]) -> Vec<u8> {
    let header = PacketHeader::for_payload(packet_type, flags, payload);
    let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let payload = b"hello, ring";
        let header = PacketHeader::for_payload(PacketType::Ping, PacketFlags::new(), payload);
        let parsed = PacketHeader::parse(&header.encode()).unwrap();

        assert_eq!(parsed, header);
        parsed.verify_crc(payload).unwrap();
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = PacketHeader::for_payload(PacketType::Ping, PacketFlags::new(), b"")
            .encode();
        bytes[0] = 0x00;
        assert!(matches!(
            PacketHeader::parse(&bytes),
            Err(FrameError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut bytes = PacketHeader::for_payload(PacketType::Ping, PacketFlags::new(), b"")
            .encode();
        bytes[4] = 99;
        assert!(matches!(
            PacketHeader::parse(&bytes),
            Err(FrameError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = PacketHeader::for_payload(PacketType::Ping, PacketFlags::new(), b"")
            .encode();
        bytes[5] = 0xEE;
        bytes[6] = 0xEE;
        assert!(matches!(
            PacketHeader::parse(&bytes),
            Err(FrameError::UnknownPacketType(0xEEEE))
        ));
    }

    #[test]
    fn test_corrupt_payload_fails_crc() {
        let payload = b"original payload";
        let header = PacketHeader::for_payload(PacketType::StatsUpdate, PacketFlags::new(), payload);

        let mut corrupted = payload.to_vec();
        corrupted[3] ^= 0xFF;
        assert!(matches!(
            header.verify_crc(&corrupted),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let mut bytes = PacketHeader::for_payload(PacketType::Ping, PacketFlags::new(), b"")
            .encode();
        bytes[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            PacketHeader::parse(&bytes),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_encrypted_flag() {
        let flags = PacketFlags::new().with_encrypted();
        let header = PacketHeader::for_payload(PacketType::SessionCreate, flags, b"x");
        let parsed = PacketHeader::parse(&header.encode()).unwrap();
        assert!(parsed.flags.is_encrypted());
    }

    #[test]
    fn test_all_packet_types_roundtrip() {
        let types = [
            PacketType::HandshakeStart,
            PacketType::HandshakeAuth,
            PacketType::HandshakeComplete,
            PacketType::Ping,
            PacketType::Pong,
            PacketType::DiscoveryPing,
            PacketType::DiscoveryPong,
            PacketType::SessionCreate,
            PacketType::SessionCreated,
            PacketType::SessionLookup,
            PacketType::SessionInfo,
            PacketType::SessionJoin,
            PacketType::SessionJoined,
            PacketType::SessionLeave,
            PacketType::WebRtcSdp,
            PacketType::WebRtcIce,
            PacketType::HostAnnouncement,
            PacketType::HostLost,
            PacketType::RingMembers,
            PacketType::StatsCollectionStart,
            PacketType::StatsUpdate,
            PacketType::StatsAck,
            PacketType::ElectionResult,
            PacketType::Error,
        ];
        for ty in types {
            assert_eq!(PacketType::try_from(ty.as_u16()).unwrap(), ty);
        }
    }

    #[test]
    fn test_encode_packet_layout() {
        let packet = encode_packet(PacketType::Pong, PacketFlags::new(), b"abc");
        assert_eq!(packet.len(), PACKET_HEADER_SIZE + 3);

        let header = PacketHeader::parse(&packet[..PACKET_HEADER_SIZE]).unwrap();
        assert_eq!(header.packet_type, PacketType::Pong);
        assert_eq!(header.payload_len, 3);
        header.verify_crc(&packet[PACKET_HEADER_SIZE..]).unwrap();
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_parse_doesnt_panic(data in prop::collection::vec(any::<u8>(), 0..64)) {
                let _ = PacketHeader::parse(&data);
            }

            #[test]
            fn prop_header_roundtrip(
                payload in prop::collection::vec(any::<u8>(), 0..2048),
                flags in any::<u8>(),
            ) {
                let header = PacketHeader::for_payload(
                    PacketType::StatsUpdate,
                    PacketFlags::from_u8(flags),
                    &payload,
                );
                let parsed = PacketHeader::parse(&header.encode()).unwrap();
                prop_assert_eq!(parsed, header);
                prop_assert!(parsed.verify_crc(&payload).is_ok());
            }

            #[test]
            fn prop_single_bitflip_detected(
                payload in prop::collection::vec(any::<u8>(), 1..512),
                bit in 0usize..8,
                idx_seed in any::<usize>(),
            ) {
                let header = PacketHeader::for_payload(
                    PacketType::WebRtcSdp,
                    PacketFlags::new(),
                    &payload,
                );
                let mut corrupted = payload.clone();
                let idx = idx_seed % corrupted.len();
                corrupted[idx] ^= 1 << bit;
                prop_assert!(header.verify_crc(&corrupted).is_err());
            }
        }
    }
}
