//! WebRTC signaling relay envelope, host lifecycle packets, error reply.

use super::metrics::ConnectionType;
use super::{Reader, Writer};
use crate::error::{ErrorKind, WireError};
use crate::{ADDRESS_WIRE_LEN, MAX_PAYLOAD_SIZE};
use uuid::Uuid;

/// Relay envelope shared by WEBRTC_SDP and WEBRTC_ICE.
///
/// A nil `recipient_id` broadcasts to every joined participant of the
/// session except the sender; otherwise the packet is unicast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    /// Session scope for the relay.
    pub session_id: Uuid,
    /// Originating participant.
    pub sender_id: Uuid,
    /// Target participant, or nil for broadcast.
    pub recipient_id: Uuid,
    /// Opaque SDP or ICE payload; the relay never inspects it.
    pub payload: Vec<u8>,
}

impl SignalEnvelope {
    /// Whether this envelope fans out to the whole session.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.recipient_id.is_nil()
    }

    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` if the payload cannot fit a
    /// packet.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE - 52 {
            return Err(WireError::FieldTooLong {
                field: "payload",
                len: self.payload.len(),
                max: MAX_PAYLOAD_SIZE - 52,
            });
        }
        let mut w = Writer::with_capacity(52 + self.payload.len());
        w.uuid(&self.session_id);
        w.uuid(&self.sender_id);
        w.uuid(&self.recipient_id);
        w.u32(self.payload.len() as u32);
        w.bytes(&self.payload);
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
        let sender_id = r.uuid()?;
        let recipient_id = r.uuid()?;
        let payload_len = r.u32()? as usize;
        let payload = r.take(payload_len)?.to_vec();
        r.finish()?;
        Ok(Self {
            session_id,
            sender_id,
            recipient_id,
            payload,
        })
    }
}

/// HOST_ANNOUNCEMENT: a participant takes over as media host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAnnouncement {
    /// Session the host serves.
    pub session_id: Uuid,
    /// The announcing host.
    pub host_id: Uuid,
    /// Address the host serves media on.
    pub address: String,
    /// Port the host serves media on.
    pub port: u16,
    /// How participants should reach the host.
    pub connection_type: ConnectionType,
}

impl HostAnnouncement {
    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` on an overlong address.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::with_capacity(35 + ADDRESS_WIRE_LEN);
        w.uuid(&self.session_id);
        w.uuid(&self.host_id);
        w.fixed_str(&self.address, ADDRESS_WIRE_LEN, "address")?;
        w.u16(self.port);
        w.u8(self.connection_type as u8);
        Ok(w.into_inner())
    }

    /// Decode from the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError` on truncation, invalid connection type, or
    /// trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let msg = Self {
            session_id: r.uuid()?,
            host_id: r.uuid()?,
            address: r.fixed_str(ADDRESS_WIRE_LEN, "address")?,
            port: r.u16()?,
            connection_type: ConnectionType::try_from(r.u8()?)?,
        };
        r.finish()?;
        Ok(msg)
    }
}

/// HOST_LOST: a participant reports the media host unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLost {
    /// Session whose host went away.
    pub session_id: Uuid,
    /// The reporting participant.
    pub reporter_id: Uuid,
}

impl HostLost {
    /// Encode to the packed wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(32);
        w.uuid(&self.session_id);
        w.uuid(&self.reporter_id);
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
            reporter_id: r.uuid()?,
        };
        r.finish()?;
        Ok(msg)
    }
}

/// ERROR reply: numeric kind code plus a short message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    /// [`ErrorKind`] code.
    pub code: u16,
    /// Short human-readable reason.
    pub message: String,
}

impl ErrorReply {
    /// Build a reply from a kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            message: message.into(),
        }
    }

    /// Encode to the packed wire form.
    ///
    /// # Errors
    ///
    /// Returns `WireError::FieldTooLong` if the message exceeds `u16`.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let raw = self.message.as_bytes();
        if raw.len() > u16::MAX as usize {
            return Err(WireError::FieldTooLong {
                field: "message",
                len: raw.len(),
                max: u16::MAX as usize,
            });
        }
        let mut w = Writer::with_capacity(4 + raw.len());
        w.u16(self.code);
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
        let code = r.u16()?;
        let msg_len = r.u16()? as usize;
        let raw = r.take(msg_len)?;
        let message = std::str::from_utf8(raw)
            .map_err(|_| WireError::InvalidValue { field: "message" })?
            .to_string();
        r.finish()?;
        Ok(Self { code, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let msg = SignalEnvelope {
            session_id: Uuid::from_bytes([1; 16]),
            sender_id: Uuid::from_bytes([2; 16]),
            recipient_id: Uuid::from_bytes([3; 16]),
            payload: b"v=0\r\no=- 46117317 2 IN IP4 127.0.0.1".to_vec(),
        };
        let decoded = SignalEnvelope::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert!(!decoded.is_broadcast());
    }

    #[test]
    fn test_nil_recipient_is_broadcast() {
        let msg = SignalEnvelope {
            session_id: Uuid::from_bytes([1; 16]),
            sender_id: Uuid::from_bytes([2; 16]),
            recipient_id: Uuid::nil(),
            payload: vec![],
        };
        assert!(msg.is_broadcast());
    }

    #[test]
    fn test_host_announcement_roundtrip() {
        let msg = HostAnnouncement {
            session_id: Uuid::from_bytes([1; 16]),
            host_id: Uuid::from_bytes([2; 16]),
            address: "198.51.100.77".to_string(),
            port: 27_100,
            connection_type: ConnectionType::Direct,
        };
        let decoded = HostAnnouncement::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_host_lost_roundtrip() {
        let msg = HostLost {
            session_id: Uuid::from_bytes([1; 16]),
            reporter_id: Uuid::from_bytes([2; 16]),
        };
        let decoded = HostLost::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_error_reply_roundtrip() {
        let msg = ErrorReply::new(ErrorKind::RateLimited, "session create suppressed");
        let decoded = ErrorReply::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(ErrorKind::from_code(decoded.code), Some(ErrorKind::RateLimited));
    }

    #[test]
    fn test_envelope_truncated_payload_rejected() {
        let msg = SignalEnvelope {
            session_id: Uuid::from_bytes([1; 16]),
            sender_id: Uuid::from_bytes([2; 16]),
            recipient_id: Uuid::nil(),
            payload: vec![0xAB; 32],
        };
        let bytes = msg.encode().unwrap();
        assert!(SignalEnvelope::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
