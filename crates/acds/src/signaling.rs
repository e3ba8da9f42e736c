//! WebRTC signaling relay.
//!
//! SDP offers/answers and ICE candidates are opaque payloads the server
//! forwards between participants of a session. A nil recipient fans out
//! to every joined participant except the sender; a concrete recipient
//! is a unicast. The original packet is preserved: recipients receive
//! the same packet type and payload the sender framed.

use crate::error::ServerError;
use crate::registry::ClientRegistry;
use crate::store::SessionStore;
use acip_core::error::{ErrorKind, WireError};
use acip_core::packet::PacketType;
use acip_core::wire::SignalEnvelope;

/// Relay one SDP or ICE packet.
///
/// Per-recipient broadcast failures are tolerated with a warning; a
/// unicast to an offline participant is an error the dispatcher reports
/// back to the sender.
///
/// # Errors
///
/// Returns `ServerError::Store` with `NotFound` for an unknown session,
/// `ServerError::Wire` (kind `NetworkProtocol`) for an offline unicast
/// recipient.
pub async fn relay(
    registry: &ClientRegistry,
    store: &SessionStore,
    packet_type: PacketType,
    envelope: &SignalEnvelope,
    raw_payload: &[u8],
) -> Result<(), ServerError> {
    if store.find_by_id(envelope.session_id)?.is_none() {
        return Err(crate::error::StoreError::NotFound.into());
    }

    if envelope.is_broadcast() {
        let peers = registry.session_peers(envelope.session_id, envelope.sender_id);
        tracing::debug!(
            session = %envelope.session_id,
            sender = %envelope.sender_id,
            recipients = peers.len(),
            ?packet_type,
            "broadcasting signaling packet"
        );
        for (participant_id, transport) in peers {
            if let Err(e) = transport.send(packet_type, raw_payload).await {
                tracing::warn!(
                    session = %envelope.session_id,
                    recipient = %participant_id,
                    error = %e,
                    "signaling broadcast recipient failed"
                );
            }
        }
        return Ok(());
    }

    let Some(transport) = registry.find_participant(envelope.session_id, envelope.recipient_id)
    else {
        tracing::debug!(
            session = %envelope.session_id,
            recipient = %envelope.recipient_id,
            "signaling unicast recipient offline"
        );
        return Err(ServerError::Wire(WireError::InvalidValue {
            field: "recipient_id",
        }));
    };

    transport.send(packet_type, raw_payload).await?;
    Ok(())
}

/// The error kind reported to the sender when relay fails.
#[must_use]
pub fn relay_error_kind(err: &ServerError) -> ErrorKind {
    match err {
        // Unknown session or offline participant are protocol-level
        // failures from the sender's point of view.
        ServerError::Store(crate::error::StoreError::NotFound) | ServerError::Wire(_) => {
            ErrorKind::NetworkProtocol
        }
        other => other.kind(),
    }
}
