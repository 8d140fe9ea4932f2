//! Payment-winner votes.

use crate::wire::{Reader, Writer};
use crate::CodecError;
use enode_chain::{Signer, SignerError};
use enode_types::{sha256d, Hash256, Outpoint, PayScript, PubKey, SecretKey};
use serde::{Deserialize, Serialize};

/// A top-ranked enode's vote for who gets the coinbase payout of one
/// future block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentVote {
    /// Collateral outpoint of the voting enode.
    pub voter_outpoint: Outpoint,
    /// Height the vote applies to.
    pub block_height: u32,
    /// Script that should receive the enode payment.
    pub payee: PayScript,
    /// Signature under the voter's operating key.
    pub sig: Vec<u8>,
}

impl PaymentVote {
    /// Create an unsigned vote.
    pub fn new(voter_outpoint: Outpoint, block_height: u32, payee: PayScript) -> Self {
        Self {
            voter_outpoint,
            block_height,
            payee,
            sig: Vec::new(),
        }
    }

    /// Message identity: payee script, height, bare outpoint.
    pub fn hash(&self) -> Hash256 {
        let mut w = Writer::new();
        w.write_var_bytes(self.payee.as_bytes());
        w.write_i32(self.block_height as i32);
        w.write_outpoint(&self.voter_outpoint);
        sha256d(&w.into_bytes())
    }

    /// The exact string covered by `sig`.
    pub fn signed_string(&self) -> String {
        format!(
            "{}{}{}",
            self.voter_outpoint.to_string_short(),
            self.block_height,
            self.payee.to_asm_string()
        )
    }

    /// Sign with the voter's operating key.
    pub fn sign(&mut self, signer: &dyn Signer, key: &SecretKey) -> Result<(), SignerError> {
        self.sig = signer.sign_message(&self.signed_string(), key)?;
        Ok(())
    }

    /// Verify `sig` under the voter's operating key.
    pub fn verify_sig(&self, signer: &dyn Signer, pubkey: &PubKey) -> Result<(), SignerError> {
        signer.verify_message(pubkey, &self.sig, &self.signed_string())
    }

    /// A vote without a signature has not been verified yet.
    pub fn is_verified(&self) -> bool {
        !self.sig.is_empty()
    }

    /// Strip the signature, marking the stored copy unverified.
    pub fn mark_not_verified(&mut self) {
        self.sig.clear();
    }

    /// Wire encoding: outpoint input, height, payee, signature.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_outpoint_input(&self.voter_outpoint);
        w.write_i32(self.block_height as i32);
        w.write_var_bytes(self.payee.as_bytes());
        w.write_var_bytes(&self.sig);
        w.into_bytes()
    }

    /// Decode from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let voter_outpoint = r.read_outpoint_input()?;
        let height = r.read_i32()?;
        if height < 0 {
            return Err(CodecError::InvalidField("negative block height".into()));
        }
        let vote = Self {
            voter_outpoint,
            block_height: height as u32,
            payee: PayScript(r.read_var_bytes()?),
            sig: r.read_var_bytes()?,
        };
        r.finish()?;
        Ok(vote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enode_chain::EcdsaSigner;
    use enode_types::hash160;

    fn key(last: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[31] = last;
        SecretKey::from_bytes(bytes)
    }

    fn sample() -> PaymentVote {
        PaymentVote::new(
            Outpoint::new(sha256d(b"voter"), 0),
            210,
            PayScript::pay_to_key_id(&hash160(b"payee")),
        )
    }

    #[test]
    fn wire_roundtrip() {
        let mut vote = sample();
        vote.sig = vec![5; 65];
        assert_eq!(PaymentVote::from_bytes(&vote.to_bytes()).unwrap(), vote);
    }

    #[test]
    fn negative_height_rejected() {
        let vote = sample();
        let mut bytes = vote.to_bytes();
        // Height starts after the 41-byte outpoint input.
        bytes[41..45].copy_from_slice(&(-5i32).to_le_bytes());
        assert!(PaymentVote::from_bytes(&bytes).is_err());
    }

    #[test]
    fn hash_is_signature_independent() {
        let mut vote = sample();
        let unsigned = vote.hash();
        vote.sig = vec![1; 65];
        assert_eq!(vote.hash(), unsigned);
    }

    #[test]
    fn sign_verify_and_mark() {
        let signer = EcdsaSigner::new();
        let mut vote = sample();
        vote.sign(&signer, &key(4)).unwrap();
        let pubkey = signer.derive_pubkey(&key(4)).unwrap();
        vote.verify_sig(&signer, &pubkey).unwrap();
        assert!(vote.is_verified());
        vote.mark_not_verified();
        assert!(!vote.is_verified());
    }

    #[test]
    fn signed_string_embeds_asm() {
        let vote = sample();
        assert!(vote.signed_string().contains("OP_DUP OP_HASH160"));
        assert!(vote.signed_string().starts_with(
            &vote.voter_outpoint.to_string_short()
        ));
    }
}
