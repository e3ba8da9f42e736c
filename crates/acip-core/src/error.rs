//! Error taxonomy shared by every ASCII-Chat component.
//!
//! [`ErrorKind`] is the stable numeric vocabulary: dispatchers answer
//! clients with its code, log lines tag it, and every crate-level error in
//! the workspace maps onto it via a `kind()` accessor.

use thiserror::Error;

/// Stable error kinds with wire-visible numeric codes.
///
/// These are kinds, not types: each library keeps its own rich error enum
/// and projects onto a kind when the error crosses a component boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorKind {
    /// No error.
    Ok = 0,
    /// Caller misuse; fails locally with a message.
    InvalidParam = 1,
    /// Illegal state-machine transition; fails locally.
    InvalidState = 2,
    /// Allocation failure.
    Memory = 3,
    /// Generic socket error.
    Network = 4,
    /// Read deadline elapsed; non-fatal, caller retries.
    NetworkTimeout = 5,
    /// Malformed packet, missing session, bad routing; connection-fatal.
    NetworkProtocol = 6,
    /// Signature, timestamp or AEAD failure; connection-fatal.
    CryptoVerification = 7,
    /// Buffer pool exhausted; caller drops the packet.
    BufferFull = 8,
    /// Fixed-size buffer or field overflow.
    BufferOverflow = 9,
    /// Request suppressed by the rate limiter.
    RateLimited = 10,
}

impl ErrorKind {
    /// Numeric code sent to clients in `ERROR` replies.
    #[must_use]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Decode a wire code back into a kind.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::InvalidParam),
            2 => Some(Self::InvalidState),
            3 => Some(Self::Memory),
            4 => Some(Self::Network),
            5 => Some(Self::NetworkTimeout),
            6 => Some(Self::NetworkProtocol),
            7 => Some(Self::CryptoVerification),
            8 => Some(Self::BufferFull),
            9 => Some(Self::BufferOverflow),
            10 => Some(Self::RateLimited),
            _ => None,
        }
    }

    /// Whether an error of this kind tears down the connection it occurred on.
    #[must_use]
    pub fn is_connection_fatal(self) -> bool {
        matches!(self, Self::NetworkProtocol | Self::CryptoVerification)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::InvalidParam => "invalid parameter",
            Self::InvalidState => "invalid state",
            Self::Memory => "out of memory",
            Self::Network => "network error",
            Self::NetworkTimeout => "network timeout",
            Self::NetworkProtocol => "protocol violation",
            Self::CryptoVerification => "crypto verification failed",
            Self::BufferFull => "buffer pool exhausted",
            Self::BufferOverflow => "buffer overflow",
            Self::RateLimited => "rate limited",
        };
        f.write_str(name)
    }
}

/// Packet framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Header opened with something other than the ACIP magic.
    #[error("bad packet magic: 0x{found:08X}")]
    BadMagic {
        /// The magic actually present on the wire.
        found: u32,
    },

    /// Protocol version this build does not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Packet type byte outside the registry.
    #[error("unknown packet type: 0x{0:04X}")]
    UnknownPacketType(u16),

    /// CRC32 over header and payload did not match.
    #[error("checksum mismatch: header says 0x{expected:08X}, computed 0x{actual:08X}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received bytes.
        actual: u32,
    },

    /// Not enough bytes for a header.
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Minimum byte count needed.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Declared payload length above [`crate::MAX_PAYLOAD_SIZE`].
    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared payload length.
        len: usize,
        /// Maximum this build accepts.
        max: usize,
    },
}

impl FrameError {
    /// Project onto the shared taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NetworkProtocol
    }
}

/// Payload (de)serialization errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// Payload ended before the field did.
    #[error("truncated payload: needed {needed} more bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the next field needs.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// A string or list does not fit its fixed wire width.
    #[error("field `{field}` length {len} exceeds wire width {max}")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// In-memory length.
        len: usize,
        /// Fixed wire width.
        max: usize,
    },

    /// A field decoded to a value outside its domain.
    #[error("invalid value for field `{field}`")]
    InvalidValue {
        /// Field name.
        field: &'static str,
    },

    /// Trailing bytes after the last field.
    #[error("payload has {0} trailing bytes")]
    TrailingBytes(usize),
}

impl WireError {
    /// Project onto the shared taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FieldTooLong { .. } => ErrorKind::InvalidParam,
            _ => ErrorKind::NetworkProtocol,
        }
    }
}

/// Buffer pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every buffer of the matching size class is in flight.
    #[error("buffer pool exhausted for class of {class_size} bytes")]
    Exhausted {
        /// Size class that ran dry.
        class_size: usize,
    },

    /// Request larger than the largest size class.
    #[error("requested {len} bytes, largest pool class is {max}")]
    Oversize {
        /// Requested length.
        len: usize,
        /// Largest class the pool carries.
        max: usize,
    },
}

impl PoolError {
    /// Project onto the shared taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Exhausted { .. } => ErrorKind::BufferFull,
            Self::Oversize { .. } => ErrorKind::BufferOverflow,
        }
    }
}
