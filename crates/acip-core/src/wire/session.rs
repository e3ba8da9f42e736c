//! Session create/lookup/join/leave payloads and their replies.

use super::{Reader, Writer};
use crate::error::WireError;
use crate::{ADDRESS_WIRE_LEN, IDENTITY_KEY_LEN, SESSION_STRING_WIRE_LEN, SIGNATURE_LEN};
use uuid::Uuid;

/// Session capability bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    /// Session carries video.
    pub const VIDEO: u8 = 0b0000_0001;
    /// Session carries audio.
    pub const AUDIO: u8 = 0b0000_0010;

    /// From a raw wire byte.
    #[must_use]
    pub fn from_u8(raw: u8) -> Self {
        Self(raw)
    }

    /// Video + audio.
    #[must_use]
    pub fn full() -> Self {
        Self(Self::VIDEO | Self::AUDIO)
    }

    /// Check the video bit.
    #[must_use]
    pub fn has_video(&self) -> bool {
        self.0 & Self::VIDEO != 0
    }

    /// Check the audio bit.
    #[must_use]
    pub fn has_audio(&self) -> bool {
        self.0 & Self::AUDIO != 0
    }

    /// Raw wire byte.
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// How media flows for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionType {
    /// Clients connect straight to a host-run TCP server.
    DirectTcp = 0,
    /// Peer-to-peer WebRTC with ACDS signaling.
    WebRtc = 1,
    /// Media relayed through the elected host.
    Relayed = 2,
}

impl TryFrom<u8> for SessionType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::DirectTcp),
            1 => Ok(Self::WebRtc),
            2 => Ok(Self::Relayed),
            _ => Err(WireError::InvalidValue {
                field: "session_type",
            }),
        }
    }
}

/// SESSION_CREATE request.
///
/// A non-zero `identity_pubkey` accumulates one whitelisted key; the
/// all-zero key finalizes the create with the keys gathered so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreate {
    /// Identity key to whitelist, or all zeros to finalize.
    pub identity_pubkey: [u8; IDENTITY_KEY_LEN],
    /// Client wall clock in milliseconds since epoch.
    pub timestamp_ms: u64,
    /// Capability bitmask.
    pub capabilities: Capabilities,
    /// Maximum participants.
    pub max_participants: u8,
    /// Media flow for the session.
    pub session_type: SessionType,
    /// Advertised media server address; empty lets the server auto-fill
    /// the observed peer address for direct-TCP sessions.
    pub server_address: String,
    /// Advertised media server port.
    pub server_port: u16,
    /// Ed25519 signature over the domain-separated create message.
    pub signature: [u8; SIGNATURE_LEN],
}

impl SessionCreate {
    /// Whether this packet is the zero-key finalize sentinel.
    #[must_use]
    pub fn is_finalize(&self) -> bool {
        self.identity_pubkey == [0u8; IDENTITY_KEY_LEN]
    }

    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` if the server address exceeds its
    /// wire width.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::with_capacity(32 + 8 + 3 + ADDRESS_WIRE_LEN + 2 + 64);
        w.bytes(&self.identity_pubkey);
        w.u64(self.timestamp_ms);
        w.u8(self.capabilities.as_u8());
        w.u8(self.max_participants);
        w.u8(self.session_type as u8);
        w.fixed_str(&self.server_address, ADDRESS_WIRE_LEN, "server_address")?;
        w.u16(self.server_port);
        w.bytes(&self.signature);
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation, invalid session type, or
    /// trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let msg = Self {
            identity_pubkey: r.array()?,
            timestamp_ms: r.u64()?,
            capabilities: Capabilities::from_u8(r.u8()?),
            max_participants: r.u8()?,
            session_type: SessionType::try_from(r.u8()?)?,
            server_address: r.fixed_str(ADDRESS_WIRE_LEN, "server_address")?,
            server_port: r.u16()?,
            signature: r.array()?,
        };
        r.finish()?;
        Ok(msg)
    }
}

/// SESSION_CREATED reply with STUN/TURN policy from server config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreated {
    /// New session uuid.
    pub session_id: Uuid,
    /// Human-memorable session string.
    pub session_string: String,
    /// STUN server URIs.
    pub stun_servers: Vec<String>,
    /// TURN server URIs.
    pub turn_servers: Vec<String>,
}

impl SessionCreated {
    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` on overlong strings or more than
    /// 255 servers in either list.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        for (list, field) in [
            (&self.stun_servers, "stun_servers"),
            (&self.turn_servers, "turn_servers"),
        ] {
            if list.len() > u8::MAX as usize {
                return Err(WireError::FieldTooLong {
                    field,
                    len: list.len(),
                    max: u8::MAX as usize,
                });
            }
        }
        let total = self.stun_servers.len() + self.turn_servers.len();
        let mut w = Writer::with_capacity(66 + ADDRESS_WIRE_LEN * total);
        w.uuid(&self.session_id);
        w.fixed_str(&self.session_string, SESSION_STRING_WIRE_LEN, "session_string")?;
        w.u8(self.stun_servers.len() as u8);
        w.u8(self.turn_servers.len() as u8);
        for s in &self.stun_servers {
            w.fixed_str(s, ADDRESS_WIRE_LEN, "stun_server")?;
        }
        for s in &self.turn_servers {
            w.fixed_str(s, ADDRESS_WIRE_LEN, "turn_server")?;
        }
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation or trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let session_id = r.uuid()?;
        let session_string = r.fixed_str(SESSION_STRING_WIRE_LEN, "session_string")?;
        let num_stun = r.u8()? as usize;
        let num_turn = r.u8()? as usize;
        let mut stun_servers = Vec::with_capacity(num_stun);
        for _ in 0..num_stun {
            stun_servers.push(r.fixed_str(ADDRESS_WIRE_LEN, "stun_server")?);
        }
        let mut turn_servers = Vec::with_capacity(num_turn);
        for _ in 0..num_turn {
            turn_servers.push(r.fixed_str(ADDRESS_WIRE_LEN, "turn_server")?);
        }
        r.finish()?;
        Ok(Self {
            session_id,
            session_string,
            stun_servers,
            turn_servers,
        })
    }
}

/// SESSION_LOOKUP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLookup {
    /// Session string to resolve.
    pub session_string: String,
}

impl SessionLookup {
    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` on an overlong session string.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::with_capacity(SESSION_STRING_WIRE_LEN);
        w.fixed_str(&self.session_string, SESSION_STRING_WIRE_LEN, "session_string")?;
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation or trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let msg = Self {
            session_string: r.fixed_str(SESSION_STRING_WIRE_LEN, "session_string")?,
        };
        r.finish()?;
        Ok(msg)
    }
}

/// SESSION_INFO reply; safe to send for missing sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Whether the session string resolved.
    pub found: bool,
    /// Session uuid (nil when not found).
    pub session_id: Uuid,
    /// Media flow for the session.
    pub session_type: SessionType,
    /// Capability bitmask.
    pub capabilities: Capabilities,
    /// Maximum participants.
    pub max_participants: u8,
    /// Participants currently joined.
    pub num_participants: u8,
    /// Current media host, if one is elected.
    pub host_id: Option<Uuid>,
    /// Host media address.
    pub host_address: String,
    /// Host media port.
    pub host_port: u16,
    /// Whether the session is mid host-migration.
    pub in_migration: bool,
}

impl SessionInfo {
    /// The canonical not-found reply.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            found: false,
            session_id: Uuid::nil(),
            session_type: SessionType::WebRtc,
            capabilities: Capabilities::default(),
            max_participants: 0,
            num_participants: 0,
            host_id: None,
            host_address: String::new(),
            host_port: 0,
            in_migration: false,
        }
    }

    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` on an overlong host address.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::with_capacity(40 + ADDRESS_WIRE_LEN);
        w.u8(u8::from(self.found));
        w.uuid(&self.session_id);
        w.u8(self.session_type as u8);
        w.u8(self.capabilities.as_u8());
        w.u8(self.max_participants);
        w.u8(self.num_participants);
        w.uuid(&self.host_id.unwrap_or_else(Uuid::nil));
        w.fixed_str(&self.host_address, ADDRESS_WIRE_LEN, "host_address")?;
        w.u16(self.host_port);
        w.u8(u8::from(self.in_migration));
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation, invalid session type, or
    /// trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let found = r.u8()? != 0;
        let session_id = r.uuid()?;
        let session_type = SessionType::try_from(r.u8()?)?;
        let capabilities = Capabilities::from_u8(r.u8()?);
        let max_participants = r.u8()?;
        let num_participants = r.u8()?;
        let host_raw = r.uuid()?;
        let host_address = r.fixed_str(ADDRESS_WIRE_LEN, "host_address")?;
        let host_port = r.u16()?;
        let in_migration = r.u8()? != 0;
        r.finish()?;
        Ok(Self {
            found,
            session_id,
            session_type,
            capabilities,
            max_participants,
            num_participants,
            host_id: if host_raw.is_nil() { None } else { Some(host_raw) },
            host_address,
            host_port,
            in_migration,
        })
    }
}

/// SESSION_JOIN request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionJoin {
    /// Session string to join.
    pub session_string: String,
    /// Identity key the joiner presents.
    pub identity_pubkey: [u8; IDENTITY_KEY_LEN],
    /// Client wall clock in milliseconds since epoch.
    pub timestamp_ms: u64,
    /// Ed25519 signature over the domain-separated join message.
    pub signature: [u8; SIGNATURE_LEN],
}

impl SessionJoin {
    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` on an overlong session string.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::with_capacity(SESSION_STRING_WIRE_LEN + 32 + 8 + 64);
        w.fixed_str(&self.session_string, SESSION_STRING_WIRE_LEN, "session_string")?;
        w.bytes(&self.identity_pubkey);
        w.u64(self.timestamp_ms);
        w.bytes(&self.signature);
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation or trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let msg = Self {
            session_string: r.fixed_str(SESSION_STRING_WIRE_LEN, "session_string")?,
            identity_pubkey: r.array()?,
            timestamp_ms: r.u64()?,
            signature: r.array()?,
        };
        r.finish()?;
        Ok(msg)
    }
}

/// SESSION_JOINED reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionJoined {
    /// Whether the join was accepted.
    pub success: bool,
    /// Session uuid (nil on failure).
    pub session_id: Uuid,
    /// Assigned participant uuid (nil on failure).
    pub participant_id: Uuid,
    /// Error kind code on failure, `0` on success.
    pub err_code: u16,
    /// Short human-readable failure reason.
    pub err_message: String,
}

impl SessionJoined {
    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` if the message exceeds `u16`.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let raw = self.err_message.as_bytes();
        if raw.len() > u16::MAX as usize {
            return Err(WireError::FieldTooLong {
                field: "err_message",
                len: raw.len(),
                max: u16::MAX as usize,
            });
        }
        let mut w = Writer::with_capacity(39 + raw.len());
        w.u8(u8::from(self.success));
        w.uuid(&self.session_id);
        w.uuid(&self.participant_id);
        w.u16(self.err_code);
        w.u16(raw.len() as u16);
        w.bytes(raw);
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation, bad UTF-8, or trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let success = r.u8()? != 0;
        let session_id = r.uuid()?;
        let participant_id = r.uuid()?;
        let err_code = r.u16()?;
        let msg_len = r.u16()? as usize;
        let raw = r.take(msg_len)?;
        let err_message = std::str::from_utf8(raw)
            .map_err(|_| WireError::InvalidValue {
                field: "err_message",
            })?
            .to_string();
        r.finish()?;
        Ok(Self {
            success,
            session_id,
            participant_id,
            err_code,
            err_message,
        })
    }
}

/// SESSION_LEAVE request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLeave {
    /// Session to leave.
    pub session_id: Uuid,
    /// The departing participant.
    pub participant_id: Uuid,
}

impl SessionLeave {
    /// Encode to the packed wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(32);
        w.uuid(&self.session_id);
        w.uuid(&self.participant_id);
        w.into_inner()
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation or trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let msg = Self {
            session_id: r.uuid()?,
            participant_id: r.uuid()?,
        };
        r.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_create_roundtrip() {
        let msg = SessionCreate {
            identity_pubkey: [7u8; 32],
            timestamp_ms: 1_700_000_000_123,
            capabilities: Capabilities::full(),
            max_participants: 8,
            session_type: SessionType::DirectTcp,
            server_address: "203.0.113.9".to_string(),
            server_port: 27_224,
            signature: [9u8; 64],
        };
        let decoded = SessionCreate::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert!(!decoded.is_finalize());
    }

    #[test]
    fn test_zero_key_is_finalize() {
        let msg = SessionCreate {
            identity_pubkey: [0u8; 32],
            timestamp_ms: 0,
            capabilities: Capabilities::default(),
            max_participants: 0,
            session_type: SessionType::WebRtc,
            server_address: String::new(),
            server_port: 0,
            signature: [0u8; 64],
        };
        assert!(msg.is_finalize());
    }

    #[test]
    fn test_session_created_roundtrip() {
        let msg = SessionCreated {
            session_id: Uuid::from_bytes([1; 16]),
            session_string: "mellow-otter-dusk".to_string(),
            stun_servers: vec!["stun:stun.example.net:3478".to_string()],
            turn_servers: vec![
                "turn:turn1.example.net:3478".to_string(),
                "turn:turn2.example.net:3478".to_string(),
            ],
        };
        let decoded = SessionCreated::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_session_info_not_found_roundtrip() {
        let msg = SessionInfo::not_found();
        let decoded = SessionInfo::decode(&msg.encode().unwrap()).unwrap();
        assert!(!decoded.found);
        assert!(decoded.host_id.is_none());
    }

    #[test]
    fn test_session_info_with_host() {
        let msg = SessionInfo {
            found: true,
            session_id: Uuid::from_bytes([3; 16]),
            session_type: SessionType::Relayed,
            capabilities: Capabilities::full(),
            max_participants: 16,
            num_participants: 4,
            host_id: Some(Uuid::from_bytes([5; 16])),
            host_address: "192.0.2.14".to_string(),
            host_port: 8100,
            in_migration: false,
        };
        let decoded = SessionInfo::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_session_join_roundtrip() {
        let msg = SessionJoin {
            session_string: "mellow-otter-dusk".to_string(),
            identity_pubkey: [4u8; 32],
            timestamp_ms: 1_700_000_000_456,
            signature: [5u8; 64],
        };
        let decoded = SessionJoin::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_session_joined_failure_carries_message() {
        let msg = SessionJoined {
            success: false,
            session_id: Uuid::nil(),
            participant_id: Uuid::nil(),
            err_code: 7,
            err_message: "identity key not whitelisted".to_string(),
        };
        let decoded = SessionJoined::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_session_leave_roundtrip() {
        let msg = SessionLeave {
            session_id: Uuid::from_bytes([8; 16]),
            participant_id: Uuid::from_bytes([9; 16]),
        };
        let decoded = SessionLeave::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_overlong_session_string_rejected() {
        let msg = SessionLookup {
            session_string: "x".repeat(49),
        };
        assert!(matches!(
            msg.encode(),
            Err(WireError::FieldTooLong { field: "session_string", .. })
        ));
    }
}
