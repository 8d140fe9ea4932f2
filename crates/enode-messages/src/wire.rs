//! Canonical binary serialization.
//!
//! Little-endian integers, compact-size length prefixes, and the fixed
//! layouts for outpoint inputs (txid, index, empty script slot,
//! sequence), v4-mapped addresses and compressed public keys.

use crate::CodecError;
use enode_types::{Hash256, NetAddr, Outpoint, PubKey};

/// Hard cap for any length-prefixed field.
const MAX_FIELD_LEN: usize = 1 << 20;

/// Sequence value carried by outpoint inputs.
const FINAL_SEQUENCE: u32 = 0xffff_ffff;

/// Growable output buffer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume into the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Raw byte append.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Compact-size length prefix.
    pub fn write_compact_size(&mut self, len: usize) {
        match len {
            0..=0xfc => self.write_u8(len as u8),
            0xfd..=0xffff => {
                self.write_u8(0xfd);
                self.buf.extend_from_slice(&(len as u16).to_le_bytes());
            }
            _ => {
                self.write_u8(0xfe);
                self.buf.extend_from_slice(&(len as u32).to_le_bytes());
            }
        }
    }

    /// Compact-size-prefixed byte string.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_compact_size(bytes.len());
        self.write_bytes(bytes);
    }

    /// 32-byte digest in wire order.
    pub fn write_hash(&mut self, hash: &Hash256) {
        self.write_bytes(hash.as_bytes());
    }

    /// Outpoint input: txid, index, empty script slot, final sequence.
    pub fn write_outpoint_input(&mut self, outpoint: &Outpoint) {
        self.write_hash(&outpoint.txid);
        self.write_u32(outpoint.index);
        self.write_var_bytes(&[]);
        self.write_u32(FINAL_SEQUENCE);
    }

    /// Bare outpoint: txid and index only.
    pub fn write_outpoint(&mut self, outpoint: &Outpoint) {
        self.write_hash(&outpoint.txid);
        self.write_u32(outpoint.index);
    }

    /// v4-mapped 16-byte address plus big-endian port.
    pub fn write_netaddr(&mut self, addr: &NetAddr) {
        self.write_bytes(&addr.to_mapped_bytes());
        self.write_u16_be(addr.port);
    }

    /// Length-prefixed compressed public key.
    pub fn write_pubkey(&mut self, pubkey: &PubKey) {
        self.write_var_bytes(pubkey.as_bytes());
    }
}

/// Cursor over an input slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::Truncated {
                wanted: self.pos + n - self.data.len(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Error if any bytes remain.
    pub fn finish(&self) -> Result<(), CodecError> {
        let rest = self.data.len() - self.pos;
        if rest > 0 {
            return Err(CodecError::TrailingBytes(rest));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().expect("8 bytes")))
    }

    /// Compact-size length prefix.
    pub fn read_compact_size(&mut self) -> Result<usize, CodecError> {
        let first = self.read_u8()?;
        let len = match first {
            0..=0xfc => first as usize,
            0xfd => {
                let b = self.take(2)?;
                u16::from_le_bytes([b[0], b[1]]) as usize
            }
            0xfe => self.read_u32()? as usize,
            0xff => return Err(CodecError::Oversized(usize::MAX)),
        };
        if len > MAX_FIELD_LEN {
            return Err(CodecError::Oversized(len));
        }
        Ok(len)
    }

    /// Compact-size-prefixed byte string.
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_compact_size()?;
        Ok(self.take(len)?.to_vec())
    }

    /// 32-byte digest.
    pub fn read_hash(&mut self) -> Result<Hash256, CodecError> {
        let b = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(Hash256::from_bytes(out))
    }

    /// Outpoint input written by [`Writer::write_outpoint_input`].
    pub fn read_outpoint_input(&mut self) -> Result<Outpoint, CodecError> {
        let txid = self.read_hash()?;
        let index = self.read_u32()?;
        let script_sig = self.read_var_bytes()?;
        if !script_sig.is_empty() {
            return Err(CodecError::InvalidField("non-empty script slot".into()));
        }
        let _sequence = self.read_u32()?;
        Ok(Outpoint::new(txid, index))
    }

    /// v4-mapped address.
    pub fn read_netaddr(&mut self) -> Result<NetAddr, CodecError> {
        let raw = self.take(16)?;
        let mut mapped = [0u8; 16];
        mapped.copy_from_slice(raw);
        let port = self.read_u16_be()?;
        NetAddr::from_mapped_bytes(&mapped, port)
            .map_err(|e| CodecError::InvalidField(e.to_string()))
    }

    /// Length-prefixed compressed public key.
    pub fn read_pubkey(&mut self) -> Result<PubKey, CodecError> {
        let bytes = self.read_var_bytes()?;
        PubKey::from_slice(&bytes).map_err(|e| CodecError::InvalidField(e.to_string()))
    }
}
