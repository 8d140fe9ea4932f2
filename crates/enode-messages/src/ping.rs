//! Liveness pings.

use crate::wire::{Reader, Writer};
use crate::CodecError;
use enode_chain::{Signer, SignerError};
use enode_types::{sha256d, Hash256, Outpoint, PubKey, SecretKey, NEW_START_REQUIRED_SECONDS};
use serde::{Deserialize, Serialize};

/// A signed liveness proof: "I could see block `block_hash` at
/// `sig_time`". The block hash is expected to be tip minus 12 so a
/// forked node cannot keep pinging forever.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ping {
    /// Collateral outpoint of the pinging enode.
    pub outpoint: Outpoint,
    /// A recent block hash on the pinging node's active chain.
    pub block_hash: Hash256,
    /// Signature timestamp.
    pub sig_time: i64,
    /// Signature under the enode operating key.
    pub sig: Vec<u8>,
}

impl Ping {
    /// Depth below the tip of the referenced block.
    pub const BLOCK_DEPTH: u32 = 12;

    /// True for a never-set ping.
    pub fn is_empty(&self) -> bool {
        self.outpoint.is_null() && self.block_hash == Hash256::ZERO
    }

    /// A ping this old cannot revive a record.
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.sig_time > NEW_START_REQUIRED_SECONDS
    }

    /// Message identity: outpoint input and timestamp.
    pub fn hash(&self) -> Hash256 {
        let mut w = Writer::new();
        w.write_outpoint_input(&self.outpoint);
        w.write_i64(self.sig_time);
        sha256d(&w.into_bytes())
    }

    /// The exact string covered by `sig`.
    pub fn signed_string(&self) -> String {
        format!(
            "{}{}{}",
            self.outpoint.to_string_short(),
            self.block_hash.to_hex(),
            self.sig_time
        )
    }

    /// Sign with the enode operating key, stamping `sig_time = now`.
    pub fn sign(
        &mut self,
        signer: &dyn Signer,
        key: &SecretKey,
        now: i64,
    ) -> Result<(), SignerError> {
        self.sig_time = now;
        self.sig = signer.sign_message(&self.signed_string(), key)?;
        Ok(())
    }

    /// Verify `sig` under the enode operating key.
    pub fn verify_sig(&self, signer: &dyn Signer, pubkey: &PubKey) -> Result<(), SignerError> {
        signer.verify_message(pubkey, &self.sig, &self.signed_string())
    }

    /// Wire encoding: outpoint input, block hash, time, signature.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.write(&mut w);
        w.into_bytes()
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        w.write_outpoint_input(&self.outpoint);
        w.write_hash(&self.block_hash);
        w.write_i64(self.sig_time);
        w.write_var_bytes(&self.sig);
    }

    /// Decode from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let ping = Self::read(&mut r)?;
        r.finish()?;
        Ok(ping)
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            outpoint: r.read_outpoint_input()?,
            block_hash: r.read_hash()?,
            sig_time: r.read_i64()?,
            sig: r.read_var_bytes()?,
        })
    }
}
