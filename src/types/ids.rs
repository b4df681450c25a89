use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier, unique for the lifetime of a coordinator.
///
/// Externally the id is an 8-byte big-endian value, used by other
/// subsystems only as an opaque, ordered correlation key.
#[derive(
    Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    pub const LEN: usize = 8;

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, IdError> {
        let bytes: [u8; 8] = slice.try_into().map_err(|_| IdError::InvalidLength)?;
        Ok(Self::from_bytes(bytes))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<[u8; 8]> for TransactionId {
    fn from(bytes: [u8; 8]) -> Self {
        Self::from_bytes(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("Invalid transaction id length")]
    InvalidLength,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_encoding() {
        let id = TransactionId::new(0x0102_0304_0506_0708);
        assert_eq!(id.to_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(TransactionId::from_slice(&id.to_bytes()).unwrap(), id);
    }

    #[test]
    fn test_byte_order_matches_numeric_order() {
        let low = TransactionId::new(255);
        let high = TransactionId::new(256);
        assert!(low < high);
        assert!(low.to_bytes() < high.to_bytes());
    }

    #[test]
    fn test_invalid_length() {
        assert!(TransactionId::from_slice(&[0u8; 4]).is_err());
        assert!(TransactionId::from_slice(&[0u8; 9]).is_err());
    }
}
