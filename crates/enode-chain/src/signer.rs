//! Message signing.
//!
//! Signed gossip uses the classic signed-message scheme: the ASCII
//! message is wrapped with a network magic, double-SHA256 hashed, and
//! signed with a recoverable ECDSA signature (65 bytes, header byte
//! 27 + recovery id + 4 for compressed keys). Verification recovers
//! the key and compares it against the expected one.

use crate::SignerError;
use enode_types::{sha256d, PubKey, SecretKey};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};

/// Magic prefix separating signed gossip from transaction signatures.
const MESSAGE_MAGIC: &str = "Enode Signed Message:\n";

/// ECDSA sign/verify over the canonical string form of a message.
pub trait Signer: Send + Sync {
    /// Sign `message` with `key`, producing a 65-byte recoverable sig.
    fn sign_message(&self, message: &str, key: &SecretKey) -> Result<Vec<u8>, SignerError>;

    /// Verify `sig` over `message` against `pubkey`.
    fn verify_message(
        &self,
        pubkey: &PubKey,
        sig: &[u8],
        message: &str,
    ) -> Result<(), SignerError>;

    /// Compressed public key for a secret key.
    fn derive_pubkey(&self, key: &SecretKey) -> Result<PubKey, SignerError>;
}

/// Production signer backed by libsecp256k1.
pub struct EcdsaSigner {
    ctx: Secp256k1<secp256k1::All>,
}

impl EcdsaSigner {
    /// Create a signer context.
    pub fn new() -> Self {
        Self {
            ctx: Secp256k1::new(),
        }
    }

    fn message_digest(message: &str) -> Message {
        let mut buf = Vec::with_capacity(MESSAGE_MAGIC.len() + message.len() + 10);
        write_varstr(&mut buf, MESSAGE_MAGIC.as_bytes());
        write_varstr(&mut buf, message.as_bytes());
        let digest = sha256d(&buf);
        Message::from_digest(*digest.as_bytes())
    }
}

impl Default for EcdsaSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer for EcdsaSigner {
    fn sign_message(&self, message: &str, key: &SecretKey) -> Result<Vec<u8>, SignerError> {
        let secret = secp256k1::SecretKey::from_slice(key.as_bytes())
            .map_err(|_| SignerError::InvalidKey)?;
        let digest = Self::message_digest(message);
        let sig = self.ctx.sign_ecdsa_recoverable(&digest, &secret);
        let (rec_id, compact) = sig.serialize_compact();
        let mut out = vec![0u8; 65];
        // Header: 27 + recovery id, +4 marking a compressed key.
        out[0] = 27 + rec_id.to_i32() as u8 + 4;
        out[1..].copy_from_slice(&compact);
        Ok(out)
    }

    fn verify_message(
        &self,
        pubkey: &PubKey,
        sig: &[u8],
        message: &str,
    ) -> Result<(), SignerError> {
        if sig.len() != 65 {
            return Err(SignerError::BadSignature);
        }
        let header = sig[0];
        if !(27..27 + 8).contains(&header) {
            return Err(SignerError::BadSignature);
        }
        let rec_id = RecoveryId::from_i32(i32::from((header - 27) & 0x03))
            .map_err(|_| SignerError::BadSignature)?;
        let recoverable = RecoverableSignature::from_compact(&sig[1..], rec_id)
            .map_err(|_| SignerError::BadSignature)?;
        let digest = Self::message_digest(message);
        let recovered = self
            .ctx
            .recover_ecdsa(&digest, &recoverable)
            .map_err(|_| SignerError::BadSignature)?;
        if recovered.serialize() == *pubkey.as_bytes() {
            Ok(())
        } else {
            Err(SignerError::BadSignature)
        }
    }

    fn derive_pubkey(&self, key: &SecretKey) -> Result<PubKey, SignerError> {
        let secret = secp256k1::SecretKey::from_slice(key.as_bytes())
            .map_err(|_| SignerError::InvalidKey)?;
        let pubkey = secp256k1::PublicKey::from_secret_key(&self.ctx, &secret);
        Ok(PubKey::from_bytes(pubkey.serialize()))
    }
}

/// Compact-size length prefix followed by the bytes.
fn write_varstr(buf: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < 0xfd {
        buf.push(len as u8);
    } else {
        buf.push(0xfd);
        buf.extend_from_slice(&(len as u16).to_le_bytes());
    }
    buf.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(last: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[31] = last;
        SecretKey::from_bytes(bytes)
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let signer = EcdsaSigner::new();
        let key = test_key(1);
        let pubkey = signer.derive_pubkey(&key).unwrap();

        let sig = signer.sign_message("hello enode", &key).unwrap();
        assert_eq!(sig.len(), 65);
        signer.verify_message(&pubkey, &sig, "hello enode").unwrap();
    }

    #[test]
    fn wrong_key_or_message_fails() {
        let signer = EcdsaSigner::new();
        let key = test_key(1);
        let other = signer.derive_pubkey(&test_key(2)).unwrap();
        let pubkey = signer.derive_pubkey(&key).unwrap();

        let sig = signer.sign_message("msg", &key).unwrap();
        assert_eq!(
            signer.verify_message(&other, &sig, "msg"),
            Err(SignerError::BadSignature)
        );
        assert_eq!(
            signer.verify_message(&pubkey, &sig, "other msg"),
            Err(SignerError::BadSignature)
        );
    }

    #[test]
    fn truncated_signature_rejected() {
        let signer = EcdsaSigner::new();
        let key = test_key(3);
        let pubkey = signer.derive_pubkey(&key).unwrap();
        assert_eq!(
            signer.verify_message(&pubkey, &[0u8; 10], "msg"),
            Err(SignerError::BadSignature)
        );
    }
}
