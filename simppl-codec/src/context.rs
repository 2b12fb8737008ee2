use byteorder::{BigEndian, LittleEndian, NativeEndian};

/// The D-Bus wire endianness code, `'B'` or `'l'`, carried in every message's primary header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    pub const NATIVE: Endian = if cfg!(target_endian = "big") {
        Endian::Big
    } else {
        Endian::Little
    };

    pub fn sig(self) -> u8 {
        match self {
            Endian::Big => b'B',
            Endian::Little => b'l',
        }
    }

    pub fn try_from_sig(sig: u8) -> crate::Result<Self> {
        match sig {
            b'B' => Ok(Endian::Big),
            b'l' => Ok(Endian::Little),
            _ => Err(crate::Error::Message(format!(
                "invalid endianness signature byte: {sig:#x}"
            ))),
        }
    }
}

/// Extension of [`byteorder::ByteOrder`] that also knows its D-Bus endian signature byte.
///
/// The wire format needs to round-trip between a generic `ByteOrder` type parameter (used to pick
/// the fastest codegen for the host's native order) and the single-byte tag D-Bus puts on the
/// wire.
pub trait ByteOrder: byteorder::ByteOrder {
    fn endian_signature() -> Endian;
}

impl ByteOrder for LittleEndian {
    fn endian_signature() -> Endian {
        Endian::Little
    }
}

impl ByteOrder for BigEndian {
    fn endian_signature() -> Endian {
        Endian::Big
    }
}

impl ByteOrder for NativeEndian {
    fn endian_signature() -> Endian {
        Endian::NATIVE
    }
}

/// Encoding parameters shared by every encode/decode call against a given buffer.
///
/// `position` is the buffer offset the value starts at, needed to compute correct alignment
/// padding when encoding a body that follows a header of non-multiple-of-8 length.
#[derive(Debug, Copy, Clone)]
pub struct Context<B> {
    position: usize,
    _marker: std::marker::PhantomData<B>,
}

impl<B: ByteOrder> Context<B> {
    pub fn new(position: usize) -> Self {
        Self {
            position,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn endian(&self) -> Endian {
        B::endian_signature()
    }

    pub fn with_position(&self, position: usize) -> Self {
        Self::new(position)
    }
}
