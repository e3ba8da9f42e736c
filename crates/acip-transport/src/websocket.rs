//! Framed packets inside binary WebSocket messages.
//!
//! Two pieces of state distinguish this transport from TCP:
//!
//! - a **partial-frame reassembly buffer**: browser-side senders may split
//!   one ACIP frame across several WebSocket messages, so received bytes
//!   accumulate until a complete frame is available. Orphan fragments
//!   older than [`REASSEMBLY_TIMEOUT`] are dropped and logged, and a
//!   buffer that exceeds [`MAX_FRAGMENTS`] fragments without completing a
//!   frame is discarded as garbage;
//! - a **pending-free queue**: encode buffers handed to the WebSocket
//!   layer stay queued until the layer signals write completion (flush),
//!   because the permessage-deflate path may hold an async reference to
//!   them. Buffers are recycled only from the write-completion hook,
//!   never synchronously after `send`.

use crate::error::{TransportError, TransportResult};
use crate::transport::{CryptoRole, IncomingPacket, PacketTransport, PeerInfo, TransportKind};
use acip_core::packet::{PACKET_HEADER_SIZE, PacketFlags, PacketHeader, PacketType};
use acip_core::pool::BufferPool;
use acip_crypto::SessionKeys;
use acip_crypto::seal::{SealedReceiver, SealedSender};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Orphan fragments older than this are dropped.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Fragments one frame may span before the buffer is discarded.
pub const MAX_FRAGMENTS: u32 = 64;

/// Bytes accumulated across WebSocket messages until a frame completes.
struct ReassemblyBuffer {
    data: Vec<u8>,
    started_at: Option<Instant>,
    fragment_count: u32,
}

impl ReassemblyBuffer {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            started_at: None,
            fragment_count: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn append(&mut self, bytes: &[u8], now: Instant) {
        if self.data.is_empty() {
            self.started_at = Some(now);
            self.fragment_count = 0;
        }
        self.data.extend_from_slice(bytes);
        self.fragment_count += 1;
    }

    fn expired(&self, now: Instant) -> bool {
        match self.started_at {
            Some(started) if !self.data.is_empty() => now.duration_since(started) > REASSEMBLY_TIMEOUT,
            _ => false,
        }
    }

    fn over_fragment_cap(&self) -> bool {
        self.fragment_count > MAX_FRAGMENTS
    }

    fn clear(&mut self) {
        self.data.clear();
        self.started_at = None;
        self.fragment_count = 0;
    }

    /// Pop one complete frame off the front of the buffer, if present.
    fn try_extract(&mut self) -> Result<Option<(PacketHeader, Vec<u8>)>, TransportError> {
        if self.data.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }
        let header = PacketHeader::parse(&self.data[..PACKET_HEADER_SIZE])?;
        let total = PACKET_HEADER_SIZE + header.payload_len as usize;
        if self.data.len() < total {
            return Ok(None);
        }
        let payload = self.data[PACKET_HEADER_SIZE..total].to_vec();
        self.data.drain(..total);
        if self.data.is_empty() {
            self.started_at = None;
            self.fragment_count = 0;
        }
        Ok(Some((header, payload)))
    }
}

struct SinkState<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    sealer: Option<SealedSender>,
    /// Buffers handed to the WebSocket layer, awaiting write completion.
    pending_free: VecDeque<Vec<u8>>,
    /// Recycled encode buffers.
    free: Vec<Vec<u8>>,
}

struct StreamState<S> {
    stream: SplitStream<WebSocketStream<S>>,
    opener: Option<SealedReceiver>,
    reassembly: ReassemblyBuffer,
}

/// Packet transport over a WebSocket connection.
pub struct WebSocketTransport<S> {
    peer_addr: SocketAddr,
    sink: Mutex<SinkState<S>>,
    stream: Mutex<StreamState<S>>,
    pool: BufferPool,
    read_timeout: Duration,
    closed: AtomicBool,
    encrypted: AtomicBool,
}

impl WebSocketTransport<TcpStream> {
    /// Accept an incoming WebSocket upgrade on a TCP stream.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::WebSocket` if the upgrade handshake fails.
    pub async fn accept(
        stream: TcpStream,
        pool: BufferPool,
        read_timeout: Duration,
    ) -> TransportResult<Self> {
        let peer_addr = stream.peer_addr()?;
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        Ok(Self::from_ws(ws, peer_addr, pool, read_timeout))
    }
}

impl WebSocketTransport<MaybeTlsStream<TcpStream>> {
    /// Connect to a remote WebSocket ACIP endpoint.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::WebSocket` if the connection or upgrade
    /// fails.
    pub async fn connect(
        addr: SocketAddr,
        pool: BufferPool,
        read_timeout: Duration,
    ) -> TransportResult<Self> {
        let url = format!("ws://{addr}/acip");
        let (ws, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        Ok(Self::from_ws(ws, addr, pool, read_timeout))
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn from_ws(
        ws: WebSocketStream<S>,
        peer_addr: SocketAddr,
        pool: BufferPool,
        read_timeout: Duration,
    ) -> Self {
        let (sink, stream) = ws.split();
        Self {
            peer_addr,
            sink: Mutex::new(SinkState {
                sink,
                sealer: None,
                pending_free: VecDeque::new(),
                free: Vec::new(),
            }),
            stream: Mutex::new(StreamState {
                stream,
                opener: None,
                reassembly: ReassemblyBuffer::new(),
            }),
            pool,
            read_timeout,
            closed: AtomicBool::new(false),
            encrypted: AtomicBool::new(false),
        }
    }

    /// Buffers still awaiting the write-completion signal.
    pub async fn pending_free_len(&self) -> usize {
        self.sink.lock().await.pending_free.len()
    }

    fn decode_frame(
        &self,
        header: PacketHeader,
        payload: Vec<u8>,
        opener: &mut Option<SealedReceiver>,
    ) -> TransportResult<IncomingPacket> {
        header.verify_crc(&payload)?;

        if header.flags.is_encrypted() {
            let opener = opener.as_mut().ok_or(TransportError::UnexpectedSealed)?;
            let aad = header.packet_type.as_u16().to_be_bytes();
            let plaintext = opener.open(&payload, &aad)?;
            let mut out = self.pool.acquire(plaintext.len())?;
            out.copy_from_slice(&plaintext);
            return Ok(IncomingPacket {
                packet_type: header.packet_type,
                payload: out,
            });
        }

        let mut out = self.pool.acquire(payload.len())?;
        out.copy_from_slice(&payload);
        Ok(IncomingPacket {
            packet_type: header.packet_type,
            payload: out,
        })
    }
}

#[async_trait]
impl<S> PacketTransport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&self, packet_type: PacketType, payload: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }

        let mut sink = self.sink.lock().await;

        let mut frame = sink.free.pop().unwrap_or_default();
        frame.clear();
        match sink.sealer.as_mut() {
            Some(sealer) => {
                let aad = packet_type.as_u16().to_be_bytes();
                let sealed = sealer.seal(payload, &aad)?;
                let header = PacketHeader::for_payload(
                    packet_type,
                    PacketFlags::new().with_encrypted(),
                    &sealed,
                );
                frame.extend_from_slice(&header.encode());
                frame.extend_from_slice(&sealed);
            }
            None => {
                let header = PacketHeader::for_payload(packet_type, PacketFlags::new(), payload);
                frame.extend_from_slice(&header.encode());
                frame.extend_from_slice(payload);
            }
        }

        sink.sink
            .feed(Message::Binary(frame.clone()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        // The deflate layer may still reference the frame; park it until
        // the write-completion signal below.
        sink.pending_free.push_back(frame);

        sink.sink
            .flush()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        // Write completion: everything parked so far is reusable.
        while let Some(done) = sink.pending_free.pop_front() {
            sink.free.push(done);
        }
        Ok(())
    }

    async fn recv(&self) -> TransportResult<IncomingPacket> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }

        let mut state = self.stream.lock().await;

        loop {
            if let Some((header, payload)) = state.reassembly.try_extract()? {
                let StreamState { opener, .. } = &mut *state;
                return self.decode_frame(header, payload, opener);
            }

            if state.reassembly.expired(Instant::now()) {
                tracing::warn!(
                    peer = %self.peer_addr,
                    fragments = state.reassembly.fragment_count,
                    "dropping orphan websocket fragments"
                );
                state.reassembly.clear();
            }

            let message = match timeout(self.read_timeout, state.stream.next()).await {
                Err(_) => {
                    if state.reassembly.is_empty() {
                        return Err(TransportError::Timeout);
                    }
                    // Keep waiting for the rest of a started frame until
                    // the orphan timeout clears it.
                    continue;
                }
                Ok(None) => return Err(TransportError::Closed),
                Ok(Some(Err(e))) => return Err(TransportError::WebSocket(e.to_string())),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Binary(bytes) => {
                    state.reassembly.append(&bytes, Instant::now());
                    if state.reassembly.over_fragment_cap() {
                        tracing::warn!(
                            peer = %self.peer_addr,
                            fragments = state.reassembly.fragment_count,
                            "websocket frame exceeded fragment cap, discarding"
                        );
                        state.reassembly.clear();
                    }
                }
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => return Err(TransportError::Closed),
                Message::Text(_) | Message::Frame(_) => {
                    return Err(TransportError::WebSocket(
                        "unexpected non-binary message".to_string(),
                    ));
                }
            }
        }
    }

    async fn enable_encryption(&self, keys: SessionKeys, role: CryptoRole) {
        let (sealer, opener) = role.split(keys);
        self.sink.lock().await.sealer = Some(sealer);
        self.stream.lock().await.opener = Some(opener);
        self.encrypted.store(true, Ordering::SeqCst);
        tracing::debug!(peer = %self.peer_addr, "websocket upgraded to sealed transport");
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.sink.send(Message::Close(None)).await;
        Ok(())
    }

    fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            addr: self.peer_addr,
            kind: TransportKind::WebSocket,
            encrypted: self.encrypted.load(Ordering::SeqCst),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acip_core::packet::encode_packet;

    #[test]
    fn test_reassembly_whole_frame() {
        let mut buf = ReassemblyBuffer::new();
        let frame = encode_packet(PacketType::Ping, PacketFlags::new(), b"hello");

        buf.append(&frame, Instant::now());
        let (header, payload) = buf.try_extract().unwrap().unwrap();
        assert_eq!(header.packet_type, PacketType::Ping);
        assert_eq!(payload, b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_reassembly_across_fragments() {
        let mut buf = ReassemblyBuffer::new();
        let frame = encode_packet(PacketType::StatsUpdate, PacketFlags::new(), &[7u8; 100]);
        let now = Instant::now();

        buf.append(&frame[..10], now);
        assert!(buf.try_extract().unwrap().is_none());
        buf.append(&frame[10..40], now);
        assert!(buf.try_extract().unwrap().is_none());
        buf.append(&frame[40..], now);

        let (header, payload) = buf.try_extract().unwrap().unwrap();
        assert_eq!(header.packet_type, PacketType::StatsUpdate);
        assert_eq!(payload, vec![7u8; 100]);
    }

    #[test]
    fn test_reassembly_two_frames_one_message() {
        let mut buf = ReassemblyBuffer::new();
        let mut bytes = encode_packet(PacketType::Ping, PacketFlags::new(), b"a");
        bytes.extend(encode_packet(PacketType::Pong, PacketFlags::new(), b"b"));

        buf.append(&bytes, Instant::now());
        let (h1, p1) = buf.try_extract().unwrap().unwrap();
        let (h2, p2) = buf.try_extract().unwrap().unwrap();
        assert_eq!((h1.packet_type, p1.as_slice()), (PacketType::Ping, &b"a"[..]));
        assert_eq!((h2.packet_type, p2.as_slice()), (PacketType::Pong, &b"b"[..]));
    }

    #[test]
    fn test_reassembly_orphan_expiry() {
        let mut buf = ReassemblyBuffer::new();
        let frame = encode_packet(PacketType::Ping, PacketFlags::new(), b"partial");
        let start = Instant::now();

        buf.append(&frame[..8], start);
        assert!(!buf.expired(start + Duration::from_secs(1)));
        assert!(buf.expired(start + REASSEMBLY_TIMEOUT + Duration::from_secs(1)));

        buf.clear();
        assert!(buf.is_empty());
        assert!(!buf.expired(start + REASSEMBLY_TIMEOUT * 2));
    }

    #[test]
    fn test_reassembly_fragment_cap() {
        let mut buf = ReassemblyBuffer::new();
        let now = Instant::now();
        for _ in 0..=MAX_FRAGMENTS {
            buf.append(&[0xAB], now);
        }
        assert!(buf.over_fragment_cap());
    }

    #[test]
    fn test_reassembly_garbage_is_frame_error() {
        let mut buf = ReassemblyBuffer::new();
        buf.append(&[0xFFu8; PACKET_HEADER_SIZE], Instant::now());
        assert!(buf.try_extract().is_err());
    }

    mod socket_tests {
        use super::*;
        use tokio::net::TcpListener;

        async fn pair() -> (
            WebSocketTransport<MaybeTlsStream<TcpStream>>,
            WebSocketTransport<TcpStream>,
        ) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let pool = BufferPool::default();

            let server_pool = pool.clone();
            let accept = async move {
                let (stream, _) = listener.accept().await.unwrap();
                WebSocketTransport::accept(stream, server_pool, Duration::from_millis(500))
                    .await
                    .unwrap()
            };
            let connect = WebSocketTransport::connect(addr, pool, Duration::from_millis(500));
            let (server, client) = tokio::join!(accept, connect);
            (client.unwrap(), server)
        }

        #[tokio::test]
        async fn test_ws_roundtrip() {
            let (client, server) = pair().await;

            client
                .send(PacketType::DiscoveryPing, b"anyone home")
                .await
                .unwrap();
            let packet = server.recv().await.unwrap();
            assert_eq!(packet.packet_type, PacketType::DiscoveryPing);
            assert_eq!(&packet.payload[..], b"anyone home");

            server.send(PacketType::DiscoveryPong, b"").await.unwrap();
            let packet = client.recv().await.unwrap();
            assert_eq!(packet.packet_type, PacketType::DiscoveryPong);
        }

        #[tokio::test]
        async fn test_ws_pending_free_drained_after_send() {
            let (client, _server) = pair().await;
            client.send(PacketType::Ping, b"x").await.unwrap();
            // The write-completion hook ran inside send, so nothing is
            // still parked.
            assert_eq!(client.pending_free_len().await, 0);
        }

        #[tokio::test]
        async fn test_ws_timeout_retryable() {
            let (client, server) = pair().await;
            assert!(matches!(server.recv().await, Err(TransportError::Timeout)));
            client.send(PacketType::Ping, b"late").await.unwrap();
            assert!(server.recv().await.is_ok());
        }

        #[tokio::test]
        async fn test_ws_peer_info() {
            let (client, server) = pair().await;
            assert_eq!(client.peer_info().kind, TransportKind::WebSocket);
            assert!(!server.peer_info().encrypted);
        }
    }
}
