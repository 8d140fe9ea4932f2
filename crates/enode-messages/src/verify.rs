//! Two-phase PoSe verification messages.
//!
//! The same record travels through three shapes: a request (both
//! signatures empty), a reply (`sig1` set by the challenged node) and a
//! broadcast (`sig2` and both outpoints filled in by the verifier).

use crate::wire::{Reader, Writer};
use crate::CodecError;
use enode_chain::{Signer, SignerError};
use enode_types::{sha256d, Hash256, NetAddr, Outpoint, PubKey, SecretKey};
use serde::{Deserialize, Serialize};

/// PoSe verification challenge/response record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Verify {
    /// Outpoint of the verified enode (broadcast only).
    pub outpoint1: Outpoint,
    /// Outpoint of the verifying enode (broadcast only).
    pub outpoint2: Outpoint,
    /// Address being verified.
    pub addr: NetAddr,
    /// Challenge nonce chosen by the verifier.
    pub nonce: u32,
    /// Height whose block hash is part of the signed material.
    pub block_height: u32,
    /// Signature of the challenged node over the reply string.
    pub sig1: Vec<u8>,
    /// Signature of the verifier over the broadcast string.
    pub sig2: Vec<u8>,
}

impl Verify {
    /// Build a fresh request.
    pub fn request(addr: NetAddr, nonce: u32, block_height: u32) -> Self {
        Self {
            addr,
            nonce,
            block_height,
            ..Self::default()
        }
    }

    /// True when neither signature is present (case 1).
    pub fn is_request(&self) -> bool {
        self.sig1.is_empty()
    }

    /// True when only the reply signature is present (case 2).
    pub fn is_reply(&self) -> bool {
        !self.sig1.is_empty() && self.sig2.is_empty()
    }

    /// Message identity over all declared fields.
    pub fn hash(&self) -> Hash256 {
        let mut w = Writer::new();
        w.write_outpoint_input(&self.outpoint1);
        w.write_outpoint_input(&self.outpoint2);
        w.write_netaddr(&self.addr);
        w.write_i32(self.nonce as i32);
        w.write_i32(self.block_height as i32);
        sha256d(&w.into_bytes())
    }

    /// String signed by the challenged node: the verifier's view of the
    /// address, the nonce and the block hash at `block_height`.
    pub fn reply_string(&self, block_hash: &Hash256) -> String {
        format!("{}{}{}", self.addr, self.nonce, block_hash.to_hex())
    }

    /// String signed by the verifier, binding both outpoints.
    pub fn broadcast_string(&self, block_hash: &Hash256) -> String {
        format!(
            "{}{}{}{}{}",
            self.addr,
            self.nonce,
            block_hash.to_hex(),
            self.outpoint1.to_string_short(),
            self.outpoint2.to_string_short()
        )
    }

    /// Fill `sig1` (challenged node).
    pub fn sign_reply(
        &mut self,
        signer: &dyn Signer,
        key: &SecretKey,
        block_hash: &Hash256,
    ) -> Result<(), SignerError> {
        self.sig1 = signer.sign_message(&self.reply_string(block_hash), key)?;
        Ok(())
    }

    /// Fill `sig2` (verifier).
    pub fn sign_broadcast(
        &mut self,
        signer: &dyn Signer,
        key: &SecretKey,
        block_hash: &Hash256,
    ) -> Result<(), SignerError> {
        self.sig2 = signer.sign_message(&self.broadcast_string(block_hash), key)?;
        Ok(())
    }

    /// Verify `sig1` under the challenged node's operating key.
    pub fn verify_reply_sig(
        &self,
        signer: &dyn Signer,
        pubkey: &PubKey,
        block_hash: &Hash256,
    ) -> Result<(), SignerError> {
        signer.verify_message(pubkey, &self.sig1, &self.reply_string(block_hash))
    }

    /// Verify `sig2` under the verifier's operating key.
    pub fn verify_broadcast_sig(
        &self,
        signer: &dyn Signer,
        pubkey: &PubKey,
        block_hash: &Hash256,
    ) -> Result<(), SignerError> {
        signer.verify_message(pubkey, &self.sig2, &self.broadcast_string(block_hash))
    }

    /// Wire encoding, field order is consensus.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_outpoint_input(&self.outpoint1);
        w.write_outpoint_input(&self.outpoint2);
        w.write_netaddr(&self.addr);
        w.write_i32(self.nonce as i32);
        w.write_i32(self.block_height as i32);
        w.write_var_bytes(&self.sig1);
        w.write_var_bytes(&self.sig2);
        w.into_bytes()
    }

    /// Decode from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let outpoint1 = r.read_outpoint_input()?;
        let outpoint2 = r.read_outpoint_input()?;
        let addr = r.read_netaddr()?;
        let nonce = r.read_i32()?;
        let block_height = r.read_i32()?;
        if nonce < 0 || block_height < 0 {
            return Err(CodecError::InvalidField("negative verify field".into()));
        }
        let msg = Self {
            outpoint1,
            outpoint2,
            addr,
            nonce: nonce as u32,
            block_height: block_height as u32,
            sig1: r.read_var_bytes()?,
            sig2: r.read_var_bytes()?,
        };
        r.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enode_chain::EcdsaSigner;

    fn key(last: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[31] = last;
        SecretKey::from_bytes(bytes)
    }

    fn addr() -> NetAddr {
        NetAddr::parse("1.2.3.4:8255").unwrap()
    }

    #[test]
    fn phase_detection() {
        let mut mnv = Verify::request(addr(), 123_456, 200);
        assert!(mnv.is_request());
        mnv.sig1 = vec![1; 65];
        assert!(mnv.is_reply());
        mnv.sig2 = vec![2; 65];
        assert!(!mnv.is_request() && !mnv.is_reply());
    }

    #[test]
    fn wire_roundtrip() {
        let mut mnv = Verify::request(addr(), 7, 99);
        mnv.outpoint1 = Outpoint::new(sha256d(b"a"), 0);
        mnv.outpoint2 = Outpoint::new(sha256d(b"b"), 1);
        mnv.sig1 = vec![1; 65];
        mnv.sig2 = vec![2; 65];
        assert_eq!(Verify::from_bytes(&mnv.to_bytes()).unwrap(), mnv);
    }

    #[test]
    fn reply_and_broadcast_signing() {
        let signer = EcdsaSigner::new();
        let block_hash = sha256d(b"block-199");
        let mut mnv = Verify::request(addr(), 42, 199);

        mnv.sign_reply(&signer, &key(1), &block_hash).unwrap();
        let replier = signer.derive_pubkey(&key(1)).unwrap();
        mnv.verify_reply_sig(&signer, &replier, &block_hash).unwrap();

        mnv.outpoint1 = Outpoint::new(sha256d(b"real"), 0);
        mnv.outpoint2 = Outpoint::new(sha256d(b"me"), 0);
        mnv.sign_broadcast(&signer, &key(2), &block_hash).unwrap();
        let verifier = signer.derive_pubkey(&key(2)).unwrap();
        mnv.verify_broadcast_sig(&signer, &verifier, &block_hash)
            .unwrap();

        // Reply signature does not cover the outpoints.
        mnv.verify_reply_sig(&signer, &replier, &block_hash).unwrap();
        // Broadcast signature does.
        mnv.outpoint1 = Outpoint::new(sha256d(b"swapped"), 0);
        assert!(mnv
            .verify_broadcast_sig(&signer, &verifier, &block_hash)
            .is_err());
    }
}
