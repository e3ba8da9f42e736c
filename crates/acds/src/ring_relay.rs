//! Ring-consensus packet relay.
//!
//! Ring members reach each other only through their discovery
//! connections, so every consensus packet makes one hop through the
//! server. Collection starts and stats updates are forwarded to the
//! sender's counter-clockwise neighbor, acks go to the ring leader, and
//! election results fan out to the whole session. Neighbor selection
//! uses the same lexicographic UUID order participants compute locally,
//! built here from the registry's joined members, so both ends of a hop
//! always agree on the ring.
//!
//! An election result is verified and persisted as it passes through:
//! the catalog keeps the elected host, the backup, and the backup's id
//! as the pre-elected future host, so lookups reflect the election
//! before the new host announces itself.

use crate::error::{ServerError, StoreError};
use crate::registry::ClientRegistry;
use crate::store::{HostEndpoint, SessionStore};
use acip_consensus::{RingTopology, verify};
use acip_core::error::{ErrorKind, WireError};
use acip_core::packet::PacketType;
use acip_core::wire::{
    ConnectionType, ElectionResult, RingMembers, StatsAck, StatsCollectionStart, StatsUpdate,
};
use uuid::Uuid;

fn ring_of(
    registry: &ClientRegistry,
    session_id: Uuid,
    member: Uuid,
) -> Result<RingTopology, ServerError> {
    let ids = registry.session_participants(session_id);
    Ok(RingTopology::new(&ids, member)?)
}

fn ensure_session(store: &SessionStore, session_id: Uuid) -> Result<(), ServerError> {
    if store.find_by_id(session_id)?.is_none() {
        return Err(StoreError::NotFound.into());
    }
    Ok(())
}

async fn send_to_member(
    registry: &ClientRegistry,
    session_id: Uuid,
    member: Uuid,
    packet_type: PacketType,
    payload: &[u8],
) -> Result<(), ServerError> {
    let Some(transport) = registry.find_participant(session_id, member) else {
        tracing::debug!(
            session = %session_id,
            recipient = %member,
            "ring hop recipient offline"
        );
        return Err(ServerError::Wire(WireError::InvalidValue {
            field: "ring_recipient",
        }));
    };
    transport.send(packet_type, payload).await?;
    Ok(())
}

/// Current membership snapshot for a session, if anyone has joined.
#[must_use]
pub fn members_snapshot(
    registry: &ClientRegistry,
    session_id: Uuid,
    generation: u32,
) -> Option<RingMembers> {
    let mut ids = registry.session_participants(session_id);
    if ids.is_empty() {
        return None;
    }
    ids.sort_unstable();
    ids.dedup();
    let ring_leader_index = (ids.len() - 1) as u8;
    Some(RingMembers {
        session_id,
        participant_ids: ids,
        ring_leader_index,
        generation,
    })
}

/// Fan the current membership snapshot out to every joined participant.
///
/// Per-recipient failures are logged and tolerated.
pub async fn broadcast_members(registry: &ClientRegistry, session_id: Uuid, generation: u32) {
    let Some(snapshot) = members_snapshot(registry, session_id, generation) else {
        return;
    };
    let payload = match snapshot.encode() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(session = %session_id, error = %e, "ring snapshot failed to encode");
            return;
        }
    };
    tracing::debug!(
        session = %session_id,
        members = snapshot.participant_ids.len(),
        generation,
        "broadcasting ring membership"
    );
    for (participant_id, transport) in registry.session_peers(session_id, Uuid::nil()) {
        if let Err(e) = transport.send(PacketType::RingMembers, &payload).await {
            tracing::warn!(
                session = %session_id,
                recipient = %participant_id,
                error = %e,
                "ring membership recipient failed"
            );
        }
    }
}

/// Route one consensus packet one hop around the ring.
///
/// `sender` is the connection's joined (session, participant) pair, used
/// for payloads that carry no explicit sender of their own.
///
/// # Errors
///
/// Returns `ServerError::Store` with `NotFound` for an unknown session,
/// `ServerError::Consensus` when the sender is not a ring member, and a
/// wire error for an unjoined sender, an offline hop recipient, or an
/// election result that fails verification.
pub async fn relay(
    registry: &ClientRegistry,
    store: &SessionStore,
    sender: Option<(Uuid, Uuid)>,
    packet_type: PacketType,
    payload: &[u8],
) -> Result<(), ServerError> {
    match packet_type {
        PacketType::StatsCollectionStart => {
            let msg = StatsCollectionStart::decode(payload)?;
            ensure_session(store, msg.session_id)?;
            let Some((session_id, participant_id)) = sender else {
                return Err(ServerError::Wire(WireError::InvalidValue {
                    field: "sender",
                }));
            };
            if session_id != msg.session_id {
                return Err(ServerError::Wire(WireError::InvalidValue {
                    field: "session_id",
                }));
            }
            let topology = ring_of(registry, msg.session_id, participant_id)?;
            send_to_member(registry, msg.session_id, topology.prev(), packet_type, payload).await
        }
        PacketType::StatsUpdate => {
            let msg = StatsUpdate::decode(payload)?;
            ensure_session(store, msg.session_id)?;
            let topology = ring_of(registry, msg.session_id, msg.sender_id)?;
            send_to_member(registry, msg.session_id, topology.prev(), packet_type, payload).await
        }
        PacketType::StatsAck => {
            let msg = StatsAck::decode(payload)?;
            ensure_session(store, msg.session_id)?;
            let topology = ring_of(registry, msg.session_id, msg.participant_id)?;
            send_to_member(registry, msg.session_id, topology.leader(), packet_type, payload).await
        }
        PacketType::ElectionResult => {
            let msg = ElectionResult::decode(payload)?;
            if !verify(&msg.metrics, msg.host_id, msg.backup_id) {
                tracing::warn!(
                    session = %msg.session_id,
                    announced_host = %msg.host_id,
                    "relayed election result failed verification"
                );
                return Err(ServerError::Wire(WireError::InvalidValue {
                    field: "election_result",
                }));
            }
            store.record_election(
                msg.session_id,
                HostEndpoint {
                    id: msg.host_id,
                    address: msg.host_address.clone(),
                    port: msg.host_port,
                    connection_type: ConnectionType::Direct as u8,
                },
                HostEndpoint {
                    id: msg.backup_id,
                    address: msg.backup_address.clone(),
                    port: msg.backup_port,
                    connection_type: ConnectionType::Direct as u8,
                },
            )?;
            tracing::info!(
                session = %msg.session_id,
                round = msg.round_id,
                host = %msg.host_id,
                backup = %msg.backup_id,
                "election result relayed and persisted"
            );
            for (participant_id, transport) in
                registry.session_peers(msg.session_id, msg.leader_id)
            {
                if let Err(e) = transport.send(packet_type, payload).await {
                    tracing::warn!(
                        session = %msg.session_id,
                        recipient = %participant_id,
                        error = %e,
                        "election result recipient failed"
                    );
                }
            }
            Ok(())
        }
        other => {
            tracing::debug!(?other, "packet type is not a ring relay");
            Err(ServerError::Wire(WireError::InvalidValue {
                field: "packet_type",
            }))
        }
    }
}

/// The error kind reported to the sender when relay fails.
#[must_use]
pub fn relay_error_kind(err: &ServerError) -> ErrorKind {
    match err {
        ServerError::Store(StoreError::NotFound)
        | ServerError::Wire(_)
        | ServerError::Consensus(_) => ErrorKind::NetworkProtocol,
        other => other.kind(),
    }
}
