//! Core identifiers and the vector clock that characterizes document state.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_newtype!(SdId, "Identifies one logical Storage Directory.");
uuid_newtype!(NoteId, "Identifies one note, stable across renames.");
uuid_newtype!(
    InstanceId,
    "Identifies one running process; the sole writer of its own sub-directories."
);
uuid_newtype!(ProfileId, "Identifies the human operator of one or more instances.");

/// Monotonic, strictly-increasing sequence number within a single
/// `(note, writer instance)` stream. Gaps are forbidden.
pub type Sequence = u64;

/// `instanceId -> highest sequence observed`. A document's logical state is
/// fully determined by its vector clock plus the content of each reachable
/// update; equal vector clocks imply equal state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<InstanceId, Sequence>);

impl VectorClock {
    /// The empty clock: no updates observed from any instance.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Highest sequence observed for `instance`, or `None` if nothing from
    /// it has been seen yet.
    pub fn get(&self, instance: InstanceId) -> Option<Sequence> {
        self.0.get(&instance).copied()
    }

    /// Record that sequence `seq` from `instance` has been observed. No-op
    /// if the clock already records an equal or higher sequence.
    pub fn observe(&mut self, instance: InstanceId, seq: Sequence) {
        let entry = self.0.entry(instance).or_insert(0);
        if seq + 1 > *entry {
            *entry = seq + 1;
        }
    }

    /// Number of updates observed from `instance` (i.e. one past the
    /// highest sequence, since sequences are zero-based).
    pub fn count(&self, instance: InstanceId) -> Sequence {
        self.0.get(&instance).copied().unwrap_or(0)
    }

    /// Pointwise maximum of two clocks - the standard CRDT vector clock join.
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.0.clone();
        for (&instance, &count) in &other.0 {
            let entry = out.entry(instance).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
        VectorClock(out)
    }

    /// True if `self` observed at least as much as `other` from every
    /// instance (`self >= other` pointwise).
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other.0.iter().all(|(instance, &count)| self.count(*instance) >= count)
    }

    /// True if `self` dominates `other` and differs from it in at least
    /// one instance's count.
    pub fn strictly_dominates(&self, other: &VectorClock) -> bool {
        self.dominates(other) && self != other
    }

    /// Iterate over `(instance, count)` pairs in instance-id order. The
    /// stable ordering here is what makes [`VectorClock::stable_hash`]
    /// reproducible across implementations.
    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, Sequence)> + '_ {
        self.0.iter().map(|(&k, &v)| (k, v))
    }

    /// A 128-bit stable hash of the sorted `(instanceId -> sequence)`
    /// pairs, used as a snapshot's filename. Two vector clocks with equal
    /// content always hash equal, regardless of insertion order, because
    /// the backing map is sorted and the encoding is canonical.
    pub fn stable_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (instance, count) in self.iter() {
            hasher.update(instance.0.as_bytes());
            hasher.update(count.to_le_bytes());
        }
        let digest = hasher.finalize();
        digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// True if no instance has contributed any updates.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|&c| c == 0)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (instance, count)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", instance, count)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_is_monotonic() {
        let mut vc = VectorClock::new();
        let a = InstanceId::new();
        vc.observe(a, 3);
        assert_eq!(vc.count(a), 4);
        vc.observe(a, 1); // stale observation, ignored
        assert_eq!(vc.count(a), 4);
        vc.observe(a, 5);
        assert_eq!(vc.count(a), 6);
    }

    #[test]
    fn merge_is_pointwise_max() {
        let a = InstanceId::new();
        let b = InstanceId::new();
        let mut x = VectorClock::new();
        x.observe(a, 2);
        let mut y = VectorClock::new();
        y.observe(a, 0);
        y.observe(b, 4);

        let merged = x.merged(&y);
        assert_eq!(merged.count(a), 3);
        assert_eq!(merged.count(b), 5);
    }

    #[test]
    fn dominance_is_pointwise() {
        let a = InstanceId::new();
        let b = InstanceId::new();
        let mut x = VectorClock::new();
        x.observe(a, 2);
        x.observe(b, 2);
        let mut y = VectorClock::new();
        y.observe(a, 1);

        assert!(x.dominates(&y));
        assert!(x.strictly_dominates(&y));
        assert!(!y.dominates(&x));
        assert!(x.dominates(&x));
        assert!(!x.strictly_dominates(&x));
    }

    #[test]
    fn stable_hash_is_order_independent() {
        let a = InstanceId::new();
        let b = InstanceId::new();

        let mut x = VectorClock::new();
        x.observe(a, 1);
        x.observe(b, 2);

        let mut y = VectorClock::new();
        y.observe(b, 2);
        y.observe(a, 1);

        assert_eq!(x.stable_hash(), y.stable_hash());
    }

    #[test]
    fn stable_hash_differs_on_different_content() {
        let a = InstanceId::new();
        let mut x = VectorClock::new();
        x.observe(a, 1);
        let mut y = VectorClock::new();
        y.observe(a, 2);
        assert_ne!(x.stable_hash(), y.stable_hash());
    }

    #[test]
    fn sequence_naming_allows_zero() {
        // 0.yjson is legal per the naming policy.
        let mut vc = VectorClock::new();
        let a = InstanceId::new();
        vc.observe(a, 0);
        assert_eq!(vc.count(a), 1);
    }
}
