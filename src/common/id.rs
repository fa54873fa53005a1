//! Kademlia node Id, content hash, or a lookup target
use rand::RngCore;
use sha2::{Digest, Sha384};
use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of node IDs in bytes, matching the SHA-384 blob hashes.
pub const ID_SIZE: usize = 48;
pub const MAX_DISTANCE: u16 = ID_SIZE as u16 * 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
/// Kademlia node Id, content hash, or a lookup target
pub struct Id([u8; ID_SIZE]);

impl Id {
    /// Generate a random Id uniformly over the whole key space.
    ///
    /// Uses the thread local CSPRNG.
    pub fn random() -> Id {
        let mut bytes = [0_u8; ID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);

        Id(bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE](crate::common::ID_SIZE).
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// The content Id of a blob, its SHA-384 hash.
    pub fn from_blob(blob: &[u8]) -> Id {
        let hash = Sha384::digest(blob);

        let mut bytes = [0_u8; ID_SIZE];
        bytes.copy_from_slice(&hash);

        Id(bytes)
    }

    /// Full XOR distance between this Id and another.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Id(result)
    }

    /// Simplified XOR distance between this Id and a target Id, used as a bucket index.
    ///
    /// The distance is the number of bits after the common prefix.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 384
    /// Distance to an Id with 5 leading matching bits is 379
    pub fn distance(&self, other: &Id) -> u16 {
        MAX_DISTANCE - self.common_prefix_len(other)
    }

    /// Number of leading bits shared with `other`.
    pub fn common_prefix_len(&self, other: &Id) -> u16 {
        for i in 0..ID_SIZE {
            let xor = self.0[i] ^ other.0[i];

            if xor != 0 {
                return i as u16 * 8 + xor.leading_zeros() as u16;
            }
        }

        MAX_DISTANCE
    }

    /// Compare `a` and `b` by their XOR distance to `target`.
    ///
    /// `Ordering::Less` means `a` is closer.
    pub fn cmp_closeness(a: &Id, b: &Id, target: &Id) -> Ordering {
        a.xor(target).cmp(&b.xor(target))
    }

    /// Returns `true` if `a` is strictly closer to `self` than `b`.
    pub fn is_closer(&self, a: &Id, b: &Id) -> bool {
        Id::cmp_closeness(a, b, self) == Ordering::Less
    }

    /// Returns `true` if all bits are zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Lowercase hex encoding.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.hex())
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        let bytes = hex::decode(s)?;

        Id::from_bytes(bytes)
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distance_to_self() {
        let id = Id::random();

        assert_eq!(id.distance(&id), 0);
        assert!(id.xor(&id).is_zero());
    }

    #[test]
    fn distance_is_symmetric() {
        for _ in 0..100 {
            let a = Id::random();
            let b = Id::random();

            assert_eq!(a.xor(&b), b.xor(&a));
            assert_eq!(a.distance(&b), b.distance(&a));
            assert_eq!(a.xor(&b).is_zero(), a == b);
        }
    }

    #[test]
    fn distance_to_furthest() {
        let id = Id::from([0; ID_SIZE]);
        let furthest = Id::from([0xff; ID_SIZE]);

        assert_eq!(id.distance(&furthest), MAX_DISTANCE);
    }

    #[test]
    fn distance_with_common_prefix() {
        let id = Id::from([0; ID_SIZE]);

        let mut bytes = [0; ID_SIZE];
        bytes[0] = 0b0000_0100;

        assert_eq!(id.common_prefix_len(&Id::from(bytes)), 5);
        assert_eq!(id.distance(&Id::from(bytes)), 379);
    }

    #[test]
    fn closeness_ordering() {
        let target = Id::from([0; ID_SIZE]);

        let mut near = [0; ID_SIZE];
        near[ID_SIZE - 1] = 1;
        let mut far = [0; ID_SIZE];
        far[0] = 1;

        let near = Id::from(near);
        let far = Id::from(far);

        assert_eq!(Id::cmp_closeness(&near, &far, &target), Ordering::Less);
        assert_eq!(Id::cmp_closeness(&far, &near, &target), Ordering::Greater);
        assert_eq!(Id::cmp_closeness(&near, &near, &target), Ordering::Equal);
        assert!(target.is_closer(&near, &far));
        assert!(!target.is_closer(&near, &near));
    }

    #[test]
    fn closeness_sort_is_reproducible() {
        let target = Id::random();
        let ids: Vec<Id> = (0..50).map(|_| Id::random()).collect();

        let mut first = ids.clone();
        first.sort_by(|a, b| Id::cmp_closeness(a, b, &target));

        let mut second = ids.into_iter().rev().collect::<Vec<_>>();
        second.sort_by(|a, b| Id::cmp_closeness(a, b, &target));

        assert_eq!(first, second);

        for pair in first.windows(2) {
            assert!(target.is_closer(&pair[0], &pair[1]));
        }
    }

    #[test]
    fn hex_round_trip() {
        let id = Id::random();
        let encoded = id.to_string();

        assert_eq!(encoded.len(), ID_SIZE * 2);
        assert_eq!(Id::from_str(&encoded).unwrap(), id);
    }

    #[test]
    fn invalid_ids() {
        assert!(matches!(Id::from_bytes([]), Err(Error::InvalidIdSize(0))));
        assert!(matches!(
            Id::from_bytes([0; 20]),
            Err(Error::InvalidIdSize(20))
        ));
        assert!(matches!(
            Id::from_str("not hex"),
            Err(Error::InvalidIdEncoding(_))
        ));
        assert!(matches!(Id::from_str("abcd"), Err(Error::InvalidIdSize(2))));
    }

    #[test]
    fn blob_hash() {
        let id = Id::from_blob(b"");

        assert_eq!(
            id.to_string(),
            "38b060a751ac96384cd9327eb1b1e36a21fdb71114be07434c0cc7bf63f6e1da274edebfe76f65fbd51ad2f14898b95b"
        );
    }
}
