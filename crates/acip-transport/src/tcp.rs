//! Framed packets over a TCP stream, with optional mid-connection
//! upgrade to AEAD sealing.

use crate::error::{TransportError, TransportResult};
use crate::transport::{CryptoRole, IncomingPacket, PacketTransport, PeerInfo, TransportKind};
use acip_core::packet::{PACKET_HEADER_SIZE, PacketFlags, PacketHeader, PacketType, encode_packet};
use acip_core::pool::BufferPool;
use acip_crypto::SessionKeys;
use acip_crypto::seal::{SealedReceiver, SealedSender};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

struct ReadState {
    half: OwnedReadHalf,
    opener: Option<SealedReceiver>,
}

struct WriteState {
    half: OwnedWriteHalf,
    sealer: Option<SealedSender>,
}

/// Packet transport over a TCP stream.
pub struct TcpPacketTransport {
    peer_addr: SocketAddr,
    reader: Mutex<ReadState>,
    writer: Mutex<WriteState>,
    pool: BufferPool,
    read_timeout: Duration,
    closed: AtomicBool,
    encrypted: AtomicBool,
}

impl TcpPacketTransport {
    /// Wrap an accepted or connected stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the peer address cannot be read.
    pub fn new(
        stream: TcpStream,
        pool: BufferPool,
        read_timeout: Duration,
    ) -> std::io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            peer_addr,
            reader: Mutex::new(ReadState {
                half: read_half,
                opener: None,
            }),
            writer: Mutex::new(WriteState {
                half: write_half,
                sealer: None,
            }),
            pool,
            read_timeout,
            closed: AtomicBool::new(false),
            encrypted: AtomicBool::new(false),
        })
    }

    /// Connect to a remote ACIP endpoint.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the connection fails.
    pub async fn connect(
        addr: SocketAddr,
        pool: BufferPool,
        read_timeout: Duration,
    ) -> TransportResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream, pool, read_timeout)?)
    }
}

#[async_trait]
impl PacketTransport for TcpPacketTransport {
    async fn send(&self, packet_type: PacketType, payload: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }

        let mut writer = self.writer.lock().await;
        let frame = match writer.sealer.as_mut() {
            Some(sealer) => {
                let aad = packet_type.as_u16().to_be_bytes();
                let sealed = sealer.seal(payload, &aad)?;
                encode_packet(packet_type, PacketFlags::new().with_encrypted(), &sealed)
            }
            None => encode_packet(packet_type, PacketFlags::new(), payload),
        };
        writer.half.write_all(&frame).await?;
        Ok(())
    }

    async fn recv(&self) -> TransportResult<IncomingPacket> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }

        let mut reader = self.reader.lock().await;

        let mut header_bytes = [0u8; PACKET_HEADER_SIZE];
        match timeout(self.read_timeout, reader.half.read_exact(&mut header_bytes)).await {
            Err(_) => return Err(TransportError::Timeout),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::Closed);
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }

        let header = PacketHeader::parse(&header_bytes)?;
        let mut payload = self.pool.acquire(header.payload_len as usize)?;
        if header.payload_len > 0 {
            // A header without its payload within the deadline means the
            // stream is desynchronized, not merely idle.
            match timeout(self.read_timeout, reader.half.read_exact(&mut payload[..])).await {
                Err(_) => return Err(TransportError::Closed),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(TransportError::Closed);
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(_)) => {}
            }
        }
        header.verify_crc(&payload)?;

        if header.flags.is_encrypted() {
            let opener = reader
                .opener
                .as_mut()
                .ok_or(TransportError::UnexpectedSealed)?;
            let aad = header.packet_type.as_u16().to_be_bytes();
            let plaintext = opener.open(&payload, &aad)?;
            let mut out = self.pool.acquire(plaintext.len())?;
            out.copy_from_slice(&plaintext);
            return Ok(IncomingPacket {
                packet_type: header.packet_type,
                payload: out,
            });
        }

        Ok(IncomingPacket {
            packet_type: header.packet_type,
            payload,
        })
    }

    async fn enable_encryption(&self, keys: SessionKeys, role: CryptoRole) {
        let (sealer, opener) = role.split(keys);
        self.writer.lock().await.sealer = Some(sealer);
        self.reader.lock().await.opener = Some(opener);
        self.encrypted.store(true, Ordering::SeqCst);
        tracing::debug!(peer = %self.peer_addr, "connection upgraded to sealed transport");
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.half.shutdown().await?;
        Ok(())
    }

    fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            addr: self.peer_addr,
            kind: TransportKind::Tcp,
            encrypted: self.encrypted.load(Ordering::SeqCst),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
