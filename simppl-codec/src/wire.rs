//! The byte-level cursor the [`crate::Codec`] trait encodes into and decodes out of.
//!
//! Spec.md §4.1 calls this abstraction a "message-iterator"; libdbus's own `DBusMessageIter`
//! plays the same role there. Here it is simply a length-tracked byte buffer with D-Bus's
//! alignment rules built in, since every encode of a full message body starts from byte 0 of a
//! freshly allocated buffer (or from the end of the primary+extended header, via
//! [`crate::Context::position`]).

use byteorder::ByteOrder as _;

use crate::{context::ByteOrder, Context, Error, Result};

fn padding_for(position: usize, align: usize) -> usize {
    let rem = position % align;
    if rem == 0 {
        0
    } else {
        align - rem
    }
}

/// A write cursor over an in-memory buffer, used by [`crate::Codec::encode`].
pub struct Writer<B> {
    buf: Vec<u8>,
    base: usize,
    _marker: std::marker::PhantomData<B>,
}

impl<B: ByteOrder> Writer<B> {
    pub fn new(ctxt: Context<B>) -> Self {
        Self {
            buf: Vec::new(),
            base: ctxt.position(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn position(&self) -> usize {
        self.base + self.buf.len()
    }

    pub fn align(&mut self, to: usize) {
        let pad = padding_for(self.position(), to);
        self.buf.resize(self.buf.len() + pad, 0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.align(2);
        let mut tmp = [0u8; 2];
        if B::endian_signature() == crate::context::Endian::Little {
            byteorder::LittleEndian::write_u16(&mut tmp, v);
        } else {
            byteorder::BigEndian::write_u16(&mut tmp, v);
        }
        self.write_bytes(&tmp);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.align(4);
        let mut tmp = [0u8; 4];
        if B::endian_signature() == crate::context::Endian::Little {
            byteorder::LittleEndian::write_u32(&mut tmp, v);
        } else {
            byteorder::BigEndian::write_u32(&mut tmp, v);
        }
        self.write_bytes(&tmp);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.align(8);
        let mut tmp = [0u8; 8];
        if B::endian_signature() == crate::context::Endian::Little {
            byteorder::LittleEndian::write_u64(&mut tmp, v);
        } else {
            byteorder::BigEndian::write_u64(&mut tmp, v);
        }
        self.write_bytes(&tmp);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    /// Reserve 4 bytes for a length to be patched in after the array body is written.
    pub fn reserve_u32(&mut self) -> usize {
        self.align(4);
        let at = self.buf.len();
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        at
    }

    pub fn patch_u32(&mut self, at: usize, v: u32) {
        let mut tmp = [0u8; 4];
        if B::endian_signature() == crate::context::Endian::Little {
            byteorder::LittleEndian::write_u32(&mut tmp, v);
        } else {
            byteorder::BigEndian::write_u32(&mut tmp, v);
        }
        self.buf[at..at + 4].copy_from_slice(&tmp);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl<B> std::io::Write for Writer<B> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A read cursor over a borrowed byte slice, used by [`crate::Codec::decode`].
pub struct Reader<'de, B> {
    data: &'de [u8],
    pos: usize,
    base: usize,
    _marker: std::marker::PhantomData<B>,
}

impl<'de, B: ByteOrder> Reader<'de, B> {
    pub fn new(data: &'de [u8], ctxt: Context<B>) -> Self {
        Self {
            data,
            pos: 0,
            base: ctxt.position(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn position(&self) -> usize {
        self.base + self.pos
    }

    pub fn align(&mut self, to: usize) -> Result<()> {
        let pad = padding_for(self.position(), to);
        if self.pos + pad > self.data.len() {
            return Err(Error::InsufficientData);
        }
        self.pos += pad;
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'de [u8]> {
        if self.pos + len > self.data.len() {
            return Err(Error::InsufficientData);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        let b = self.read_bytes(2)?;
        Ok(if B::endian_signature() == crate::context::Endian::Little {
            byteorder::LittleEndian::read_u16(b)
        } else {
            byteorder::BigEndian::read_u16(b)
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        let b = self.read_bytes(4)?;
        Ok(if B::endian_signature() == crate::context::Endian::Little {
            byteorder::LittleEndian::read_u32(b)
        } else {
            byteorder::BigEndian::read_u32(b)
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.align(8)?;
        let b = self.read_bytes(8)?;
        Ok(if B::endian_signature() == crate::context::Endian::Little {
            byteorder::LittleEndian::read_u64(b)
        } else {
            byteorder::BigEndian::read_u64(b)
        })
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
