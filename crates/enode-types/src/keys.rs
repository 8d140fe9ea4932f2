//! Public keys and key material.

use crate::{hash160, KeyId, TypeError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A compressed secp256k1 public key (33 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PubKey(pub [u8; 33]);

impl Serialize for PubKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != 33 {
            return Err(D::Error::invalid_length(bytes.len(), &"33"));
        }
        let mut out = [0u8; 33];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl PubKey {
    /// Wrap raw compressed-key bytes.
    pub fn from_bytes(bytes: [u8; 33]) -> Self {
        Self(bytes)
    }

    /// Parse from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != 33 {
            return Err(TypeError::InvalidLength {
                got: bytes.len(),
                expected: 33,
            });
        }
        let mut out = [0u8; 33];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// hash160 key id, the payment-script destination.
    pub fn key_id(&self) -> KeyId {
        hash160(&self.0)
    }
}

impl Default for PubKey {
    fn default() -> Self {
        Self([0u8; 33])
    }
}

impl std::fmt::Debug for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PubKey({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A 32-byte secret key. Never serialized, never logged.
#[derive(Clone)]
pub struct SecretKey(pub [u8; 32]);

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_slice_length_check() {
        assert!(PubKey::from_slice(&[2u8; 33]).is_ok());
        assert!(matches!(
            PubKey::from_slice(&[2u8; 32]),
            Err(TypeError::InvalidLength { got: 32, .. })
        ));
    }

    #[test]
    fn secret_key_debug_redacts() {
        let key = SecretKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{key:?}"), "SecretKey(..)");
    }
}
