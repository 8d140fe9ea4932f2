//! Enode announcements.

use crate::wire::{Reader, Writer};
use crate::{CodecError, Ping};
use enode_chain::{Signer, SignerError};
use enode_types::{sha256d, Hash256, NetAddr, Outpoint, PubKey, SecretKey};
use serde::{Deserialize, Serialize};

/// The full identity of an enode, signed by the collateral key.
///
/// Born on the operator's node, gossiped to everyone, and replayed to
/// peers that ask for the list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Announce {
    /// Collateral outpoint, the registry key.
    pub outpoint: Outpoint,
    /// Advertised endpoint.
    pub addr: NetAddr,
    /// Key controlling the collateral; signs this announcement.
    pub collateral_pubkey: PubKey,
    /// Operating key; signs pings, votes and verifications.
    pub enode_pubkey: PubKey,
    /// Signature under `collateral_pubkey`.
    pub sig: Vec<u8>,
    /// Signature timestamp.
    pub sig_time: i64,
    /// Protocol version the enode runs.
    pub protocol_version: i32,
    /// Latest ping, carried along so a fresh record is immediately live.
    pub last_ping: Ping,
}

impl Announce {
    /// Message identity: outpoint input, collateral key, timestamp.
    pub fn hash(&self) -> Hash256 {
        let mut w = Writer::new();
        w.write_outpoint_input(&self.outpoint);
        w.write_pubkey(&self.collateral_pubkey);
        w.write_i64(self.sig_time);
        sha256d(&w.into_bytes())
    }

    /// The exact string covered by `sig`.
    pub fn signed_string(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.addr,
            self.sig_time,
            self.collateral_pubkey.key_id().to_hex(),
            self.enode_pubkey.key_id().to_hex(),
            self.protocol_version
        )
    }

    /// Sign with the collateral key, stamping `sig_time = now`.
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

    /// Verify `sig` under the collateral key.
    pub fn verify_sig(&self, signer: &dyn Signer) -> Result<(), SignerError> {
        signer.verify_message(&self.collateral_pubkey, &self.sig, &self.signed_string())
    }

    /// Wire encoding, field order is consensus.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_outpoint_input(&self.outpoint);
        w.write_netaddr(&self.addr);
        w.write_pubkey(&self.collateral_pubkey);
        w.write_pubkey(&self.enode_pubkey);
        w.write_var_bytes(&self.sig);
        w.write_i64(self.sig_time);
        w.write_i32(self.protocol_version);
        self.last_ping.write(&mut w);
        w.into_bytes()
    }

    /// Decode from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let announce = Self {
            outpoint: r.read_outpoint_input()?,
            addr: r.read_netaddr()?,
            collateral_pubkey: r.read_pubkey()?,
            enode_pubkey: r.read_pubkey()?,
            sig: r.read_var_bytes()?,
            sig_time: r.read_i64()?,
            protocol_version: r.read_i32()?,
            last_ping: Ping::read(&mut r)?,
        };
        r.finish()?;
        Ok(announce)
    }
}
