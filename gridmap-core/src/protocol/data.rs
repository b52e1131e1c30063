//! Primitive field encoding for protocol message bodies.
//!
//! All multi-byte values are little-endian. Variable-length fields carry a
//! `u32` length prefix; optional fields carry a one-byte presence marker.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::{GridError, Result};

/// Writes protocol message fields into a growable buffer.
#[derive(Debug, Default)]
pub struct DataWriter {
    buffer: BytesMut,
}

impl DataWriter {
    /// Creates a new writer with default capacity.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Writes a single byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buffer.put_u8(v);
    }

    /// Writes a boolean as a single byte.
    pub fn put_bool(&mut self, v: bool) {
        self.buffer.put_u8(u8::from(v));
    }

    /// Writes a 32-bit unsigned integer.
    pub fn put_u32(&mut self, v: u32) {
        self.buffer.put_u32_le(v);
    }

    /// Writes a 64-bit unsigned integer.
    pub fn put_u64(&mut self, v: u64) {
        self.buffer.put_u64_le(v);
    }

    /// Writes a 64-bit signed integer.
    pub fn put_i64(&mut self, v: i64) {
        self.buffer.put_i64_le(v);
    }

    /// Writes a uuid as its 16 raw bytes.
    pub fn put_uuid(&mut self, v: Uuid) {
        self.buffer.put_slice(v.as_bytes());
    }

    /// Writes a length-prefixed byte string.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buffer.put_u32_le(v.len() as u32);
        self.buffer.put_slice(v);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn put_string(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    /// Writes an optional length-prefixed byte string.
    pub fn put_opt_bytes(&mut self, v: Option<&[u8]>) {
        match v {
            Some(bytes) => {
                self.buffer.put_u8(1);
                self.put_bytes(bytes);
            }
            None => self.buffer.put_u8(0),
        }
    }

    /// Writes a list of length-prefixed byte strings.
    pub fn put_bytes_list(&mut self, items: &[Bytes]) {
        self.buffer.put_u32_le(items.len() as u32);
        for item in items {
            self.put_bytes(item);
        }
    }

    /// Writes a list of 64-bit signed integers.
    pub fn put_i64_list(&mut self, items: &[i64]) {
        self.buffer.put_u32_le(items.len() as u32);
        for item in items {
            self.buffer.put_i64_le(*item);
        }
    }

    /// Consumes the writer and returns the encoded bytes.
    pub fn finish(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// Reads protocol message fields from a received body.
#[derive(Debug)]
pub struct DataReader {
    buffer: Bytes,
}

impl DataReader {
    /// Creates a reader over the given body.
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buffer.remaining() < n {
            return Err(GridError::Protocol(format!(
                "truncated message: wanted {} more bytes, have {}",
                n,
                self.buffer.remaining()
            )));
        }
        Ok(())
    }

    /// Reads a single byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buffer.get_u8())
    }

    /// Reads a boolean.
    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Reads a 32-bit unsigned integer.
    pub fn get_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buffer.get_u32_le())
    }

    /// Reads a 64-bit unsigned integer.
    pub fn get_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buffer.get_u64_le())
    }

    /// Reads a 64-bit signed integer.
    pub fn get_i64(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(self.buffer.get_i64_le())
    }

    /// Reads a uuid from its 16 raw bytes.
    pub fn get_uuid(&mut self) -> Result<Uuid> {
        self.need(16)?;
        let mut raw = [0u8; 16];
        self.buffer.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes(raw))
    }

    /// Reads a length-prefixed byte string.
    pub fn get_bytes(&mut self) -> Result<Bytes> {
        let len = self.get_u32()? as usize;
        self.need(len)?;
        Ok(self.buffer.split_to(len))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| GridError::Protocol(format!("invalid utf-8 string field: {}", e)))
    }

    /// Reads an optional length-prefixed byte string.
    pub fn get_opt_bytes(&mut self) -> Result<Option<Bytes>> {
        if self.get_bool()? {
            Ok(Some(self.get_bytes()?))
        } else {
            Ok(None)
        }
    }

    /// Reads a list of length-prefixed byte strings.
    pub fn get_bytes_list(&mut self) -> Result<Vec<Bytes>> {
        let len = self.get_u32()? as usize;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.get_bytes()?);
        }
        Ok(items)
    }

    /// Reads a list of 64-bit signed integers.
    pub fn get_i64_list(&mut self) -> Result<Vec<i64>> {
        let len = self.get_u32()? as usize;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.get_i64()?);
        }
        Ok(items)
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }
}
