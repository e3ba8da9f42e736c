//! Ring topology over lexicographically sorted participant UUIDs.
//!
//! The ring leader is the *last* participant in sorted order. `next`
//! walks clockwise (ascending), `prev` counter-clockwise. The topology is
//! immutable after construction; membership changes build a new one.

use crate::error::ConsensusError;
use uuid::Uuid;

/// Immutable ring view from one participant's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingTopology {
    members: Vec<Uuid>,
    position: usize,
}

impl RingTopology {
    /// Build a topology from a participant set.
    ///
    /// Ids are sorted byte-wise (big-endian UUID order) and deduplicated.
    ///
    /// # Errors
    ///
    /// Returns `ConsensusError::EmptyRing` for an empty set and
    /// `ConsensusError::NotAMember` if `my_id` is absent.
    pub fn new(participants: &[Uuid], my_id: Uuid) -> Result<Self, ConsensusError> {
        if participants.is_empty() {
            return Err(ConsensusError::EmptyRing);
        }
        let mut members = participants.to_vec();
        members.sort_unstable();
        members.dedup();
        let position = members
            .binary_search(&my_id)
            .map_err(|_| ConsensusError::NotAMember)?;
        Ok(Self { members, position })
    }

    /// All members in ring order.
    #[must_use]
    pub fn members(&self) -> &[Uuid] {
        &self.members
    }

    /// Ring size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Rings are never empty; present for clippy symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// This participant's sorted index.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// This participant's id.
    #[must_use]
    pub fn my_id(&self) -> Uuid {
        self.members[self.position]
    }

    /// The ring leader: last id in sorted order.
    #[must_use]
    pub fn leader(&self) -> Uuid {
        self.members[self.members.len() - 1]
    }

    /// Whether this participant leads the ring.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.position == self.members.len() - 1
    }

    /// Clockwise neighbor: `(position + 1) mod N`.
    #[must_use]
    pub fn next(&self) -> Uuid {
        self.members[(self.position + 1) % self.members.len()]
    }

    /// Counter-clockwise neighbor: `(position + N - 1) mod N`.
    #[must_use]
    pub fn prev(&self) -> Uuid {
        let n = self.members.len();
        self.members[(self.position + n - 1) % n]
    }

    /// Whether `id` is a ring member.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.members.binary_search(&id).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(b: u8) -> Uuid {
        Uuid::from_bytes([b; 16])
    }

    #[test]
    fn test_sorted_positions() {
        // Scrambled input sorts lexicographically.
        let participants = [uuid(3), uuid(1), uuid(2)];
        let t = RingTopology::new(&participants, uuid(2)).unwrap();

        assert_eq!(t.members(), &[uuid(1), uuid(2), uuid(3)]);
        assert_eq!(t.position(), 1);
    }

    #[test]
    fn test_wrap_around() {
        let participants = [uuid(1), uuid(2), uuid(3)];
        let t = RingTopology::new(&participants, uuid(1)).unwrap();

        assert_eq!(t.position(), 0);
        assert_eq!(t.leader(), uuid(3));
        assert_eq!(t.next(), uuid(2));
        assert_eq!(t.prev(), uuid(3));
    }

    #[test]
    fn test_leader_is_last() {
        let participants = [uuid(9), uuid(4), uuid(7)];
        let t = RingTopology::new(&participants, uuid(9)).unwrap();
        assert!(t.is_leader());
        assert_eq!(t.leader(), uuid(9));
        // Leader's next wraps to the first member.
        assert_eq!(t.next(), uuid(4));
        assert_eq!(t.prev(), uuid(7));
    }

    #[test]
    fn test_missing_member_rejected() {
        let participants = [uuid(1), uuid(2)];
        assert!(matches!(
            RingTopology::new(&participants, uuid(3)),
            Err(ConsensusError::NotAMember)
        ));
    }

    #[test]
    fn test_empty_ring_rejected() {
        assert!(matches!(
            RingTopology::new(&[], uuid(1)),
            Err(ConsensusError::EmptyRing)
        ));
    }

    #[test]
    fn test_single_member_ring() {
        let t = RingTopology::new(&[uuid(5)], uuid(5)).unwrap();
        assert!(t.is_leader());
        assert_eq!(t.next(), uuid(5));
        assert_eq!(t.prev(), uuid(5));
    }

    #[test]
    fn test_duplicates_collapse() {
        let participants = [uuid(1), uuid(2), uuid(1)];
        let t = RingTopology::new(&participants, uuid(2)).unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_bytewise_ordering() {
        // 0x0100... sorts after 0x00FF...: comparison is big-endian
        // byte-wise, not numeric on any sub-field.
        let mut low = [0u8; 16];
        low[0] = 0x00;
        low[1] = 0xFF;
        let mut high = [0u8; 16];
        high[0] = 0x01;
        let (low, high) = (Uuid::from_bytes(low), Uuid::from_bytes(high));

        let t = RingTopology::new(&[high, low], low).unwrap();
        assert_eq!(t.members(), &[low, high]);
        assert_eq!(t.leader(), high);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_position_matches_sorted_index(
                seed in prop::collection::vec(any::<[u8; 16]>(), 1..20),
                pick in any::<prop::sample::Index>(),
            ) {
                let participants: Vec<Uuid> =
                    seed.iter().map(|b| Uuid::from_bytes(*b)).collect();
                let me = participants[pick.index(participants.len())];

                let t = RingTopology::new(&participants, me).unwrap();

                let mut sorted = participants.clone();
                sorted.sort_unstable();
                sorted.dedup();
                prop_assert_eq!(t.members(), sorted.as_slice());
                prop_assert_eq!(t.position(), sorted.iter().position(|&p| p == me).unwrap());
                prop_assert_eq!(t.leader(), *sorted.last().unwrap());
            }

            #[test]
            fn prop_next_prev_are_inverse(
                seed in prop::collection::vec(any::<[u8; 16]>(), 1..20),
                pick in any::<prop::sample::Index>(),
            ) {
                let participants: Vec<Uuid> =
                    seed.iter().map(|b| Uuid::from_bytes(*b)).collect();
                let me = participants[pick.index(participants.len())];
                let t = RingTopology::new(&participants, me).unwrap();

                // Walking to next and asking for its prev lands back home.
                let next_view = RingTopology::new(t.members(), t.next()).unwrap();
                prop_assert_eq!(next_view.prev(), me);
            }
        }
    }
}
