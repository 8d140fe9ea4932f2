//! Canonical payment scripts.
//!
//! Enode payees are always pay-to-key-id scripts of exactly 25 bytes:
//! `OP_DUP OP_HASH160 <20-byte key id> OP_EQUALVERIFY OP_CHECKSIG`.
//! Arbitrary scripts can still travel in votes; the assembly rendering
//! used by signed strings falls back to hex for them.

use crate::{KeyId, PubKey, TypeError};
use serde::{Deserialize, Serialize};

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

/// A payee script.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PayScript(pub Vec<u8>);

impl PayScript {
    /// The canonical script length.
    pub const CANONICAL_LEN: usize = 25;

    /// Build the canonical script paying to a key id.
    pub fn pay_to_key_id(key_id: &KeyId) -> Self {
        let mut bytes = Vec::with_capacity(Self::CANONICAL_LEN);
        bytes.push(OP_DUP);
        bytes.push(OP_HASH160);
        bytes.push(20);
        bytes.extend_from_slice(&key_id.0);
        bytes.push(OP_EQUALVERIFY);
        bytes.push(OP_CHECKSIG);
        Self(bytes)
    }

    /// Build the canonical script paying to a public key's id.
    pub fn pay_to_pubkey(pubkey: &PubKey) -> Self {
        Self::pay_to_key_id(&pubkey.key_id())
    }

    /// Raw script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True for the canonical 25-byte pay-to-key-id form.
    pub fn is_canonical(&self) -> bool {
        self.0.len() == Self::CANONICAL_LEN
            && self.0[0] == OP_DUP
            && self.0[1] == OP_HASH160
            && self.0[2] == 20
            && self.0[23] == OP_EQUALVERIFY
            && self.0[24] == OP_CHECKSIG
    }

    /// Extract the destination key id from a canonical script.
    pub fn key_id(&self) -> Result<KeyId, TypeError> {
        if !self.is_canonical() {
            return Err(TypeError::InvalidScript(
                "not a pay-to-key-id script".into(),
            ));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&self.0[3..23]);
        Ok(KeyId(out))
    }

    /// Assembly rendering embedded in signed vote strings.
    pub fn to_asm_string(&self) -> String {
        if self.is_canonical() {
            format!(
                "OP_DUP OP_HASH160 {} OP_EQUALVERIFY OP_CHECKSIG",
                hex::encode(&self.0[3..23])
            )
        } else {
            hex::encode(&self.0)
        }
    }
}

impl std::fmt::Debug for PayScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PayScript({})", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash160;

    #[test]
    fn canonical_script_shape() {
        let key_id = hash160(b"pubkey");
        let script = PayScript::pay_to_key_id(&key_id);
        assert_eq!(script.as_bytes().len(), PayScript::CANONICAL_LEN);
        assert!(script.is_canonical());
        assert_eq!(script.key_id().unwrap(), key_id);
    }

    #[test]
    fn asm_rendering() {
        let key_id = hash160(b"pubkey");
        let script = PayScript::pay_to_key_id(&key_id);
        let asm = script.to_asm_string();
        assert!(asm.starts_with("OP_DUP OP_HASH160 "));
        assert!(asm.ends_with(" OP_EQUALVERIFY OP_CHECKSIG"));
        assert!(asm.contains(&hex::encode(key_id.0)));

        let odd = PayScript(vec![0x51]);
        assert_eq!(odd.to_asm_string(), "51");
        assert!(odd.key_id().is_err());
    }
}
