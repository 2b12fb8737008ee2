//! The D-Bus wire format: signatures, the basic types, and the [`Codec`] trait that moves values
//! between Rust and the marshalled byte stream.
//!
//! [`Codec`] is a small, directly-dispatched trait: one specialization per type maps a Rust value
//! to its wire signature and back, without going through a serde `Serialize`/`Deserializer` layer.

mod codec;
mod context;
mod error;
mod object_path;
mod signature;
mod ty;
mod wire;

pub use codec::Codec;
pub use context::{ByteOrder, Context, Endian};
pub use error::{Error, Result};
pub use object_path::ObjectPath;
pub use signature::{Signature, SignatureIter};
pub use ty::{Basic, Type};
pub use wire::{Reader, Writer};

pub use simppl_codec_derive::{Codec as DeriveCodec, Type as DeriveType};
