//! Ballot numbers for leadership ordering.
//!
//! A ballot packs a per-proposer monotonic counter and the proposer id into a
//! single `u64`: `(counter << PROPOSER_ID_BITS) | proposer_id`. Ballots from
//! different proposers therefore never collide, and comparing the raw `u64`
//! orders them first by counter and then by proposer id.

use serde::{Deserialize, Serialize};

/// Width of the proposer-id component. Proposer ids must fit in this many
/// bits, which is validated at configuration load.
pub const PROPOSER_ID_BITS: u32 = 16;

const PROPOSER_ID_MASK: u64 = (1 << PROPOSER_ID_BITS) - 1;

/// Largest proposer id representable inside a ballot.
pub const MAX_PROPOSER_ID: u32 = PROPOSER_ID_MASK as u32;

/// A proposal number: counter in the high bits, proposer id in the low bits.
///
/// `Ballot(0)` is the "never promised / never accepted" sentinel; real
/// ballots always have a counter of at least 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ballot(pub u64);

impl Ballot {
    /// The sentinel carried by a fresh acceptor.
    pub const ZERO: Ballot = Ballot(0);

    /// Pack a counter and proposer id into a ballot.
    pub fn new(counter: u64, proposer_id: u32) -> Ballot {
        debug_assert!(proposer_id <= MAX_PROPOSER_ID);
        Ballot((counter << PROPOSER_ID_BITS) | u64::from(proposer_id))
    }

    /// The counter component.
    pub fn counter(self) -> u64 {
        self.0 >> PROPOSER_ID_BITS
    }

    /// The proposer that issued this ballot.
    pub fn proposer(self) -> u32 {
        (self.0 & PROPOSER_ID_MASK) as u32
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The smallest counter that outbids this ballot. A proposer that
    /// observes a rejection carrying this ballot jumps its own counter here
    /// before the next attempt.
    pub fn next_counter(self) -> u64 {
        self.counter() + 1
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.counter(), self.proposer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_components() {
        let b = Ballot::new(42, 7);
        assert_eq!(b.counter(), 42);
        assert_eq!(b.proposer(), 7);
    }

    #[test]
    fn counter_dominates_ordering() {
        assert!(Ballot::new(2, 1) > Ballot::new(1, 9));
        assert!(Ballot::new(3, 0) > Ballot::new(2, MAX_PROPOSER_ID));
    }

    #[test]
    fn zero_is_below_every_real_ballot() {
        assert!(Ballot::ZERO < Ballot::new(1, 0));
        assert!(Ballot::ZERO.is_zero());
        assert!(!Ballot::new(1, 0).is_zero());
    }

    proptest! {
        /// Ballots from distinct proposers never collide, whatever the
        /// counters are.
        #[test]
        fn distinct_proposers_never_collide(
            c1 in 1u64..1_000_000,
            c2 in 1u64..1_000_000,
            p1 in 0u32..=MAX_PROPOSER_ID,
            p2 in 0u32..=MAX_PROPOSER_ID,
        ) {
            prop_assume!(p1 != p2);
            prop_assert_ne!(Ballot::new(c1, p1), Ballot::new(c2, p2));
        }

        /// Bumping the counter past an observed ballot always outbids it.
        #[test]
        fn next_counter_outbids(
            c in 1u64..1_000_000,
            p in 0u32..=MAX_PROPOSER_ID,
            q in 0u32..=MAX_PROPOSER_ID,
        ) {
            let observed = Ballot::new(c, p);
            let retry = Ballot::new(observed.next_counter(), q);
            prop_assert!(retry > observed);
        }

        /// Encoding round-trips for the full id width.
        #[test]
        fn components_round_trip(c in 0u64..(1u64 << 40), p in 0u32..=MAX_PROPOSER_ID) {
            let b = Ballot::new(c, p);
            prop_assert_eq!(b.counter(), c);
            prop_assert_eq!(b.proposer(), p);
        }
    }
}
