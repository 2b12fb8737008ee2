use std::collections::{BTreeMap, HashMap};

use crate::{
    context::ByteOrder,
    wire::{Reader, Writer},
    Error, ObjectPath, Result, Signature, Type,
};

/// The codec mechanism: one specialization per recognized type, each providing
/// `encode`, `decode` and (via [`Type`]) `make_type_signature`.
///
/// A decoder that finds a type code it didn't expect at the current cursor position returns
/// [`Error::SignatureMismatch`]; callers are expected to have already checked the incoming
/// message's declared signature against the method's, so this only fires on peer contract drift.
pub trait Codec: Type + Sized {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()>;
    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self>;
}

impl Codec for u8 {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        w.write_u8(*self);
        Ok(())
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        r.read_u8()
    }
}

impl Codec for bool {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        w.write_u32(*self as u32);
        Ok(())
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        Ok(r.read_u32()? != 0)
    }
}

macro_rules! int_codec {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Codec for $ty {
            fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
                w.$write(*self as _);
                Ok(())
            }

            fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
                Ok(r.$read()? as $ty)
            }
        }
    };
}

int_codec!(i16, write_u16, read_u16);
int_codec!(u16, write_u16, read_u16);
int_codec!(i32, write_u32, read_u32);
int_codec!(u32, write_u32, read_u32);
int_codec!(i64, write_u64, read_u64);
int_codec!(u64, write_u64, read_u64);

impl Codec for f64 {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        w.write_f64(*self);
        Ok(())
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        r.read_f64()
    }
}

fn encode_str<B: ByteOrder>(w: &mut Writer<B>, s: &str) {
    w.write_u32(s.len() as u32);
    w.write_bytes(s.as_bytes());
    w.write_u8(0);
}

fn decode_str<'de, B: ByteOrder>(r: &mut Reader<'de, B>) -> Result<&'de str> {
    let len = r.read_u32()? as usize;
    let bytes = r.read_bytes(len)?;
    r.read_bytes(1)?; // trailing NUL
    std::str::from_utf8(bytes).map_err(Error::from)
}

impl Codec for String {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        encode_str(w, self);
        Ok(())
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        decode_str(r).map(str::to_owned)
    }
}

impl Codec for ObjectPath<'_> {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        encode_str(w, self.as_str());
        Ok(())
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        let s = decode_str(r)?;
        ObjectPath::try_from(s.to_owned())
    }
}

impl Codec for Signature<'_> {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        let s = self.as_str();
        w.write_u8(s.len() as u8);
        w.write_bytes(s.as_bytes());
        w.write_u8(0);
        Ok(())
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        let len = r.read_u8()? as usize;
        let bytes = r.read_bytes(len)?;
        r.read_bytes(1)?;
        let s = std::str::from_utf8(bytes)?;
        Signature::new(s.to_owned())
    }
}

impl<T: Codec> Codec for Vec<T> {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        let len_at = w.reserve_u32();
        // The array's first element must be aligned even if the array itself is empty.
        w.align(elem_alignment::<T>());
        let start = w.position();
        for item in self {
            item.encode(w)?;
        }
        let byte_len = (w.position() - start) as u32;
        w.patch_u32(len_at, byte_len);
        Ok(())
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        let byte_len = r.read_u32()? as usize;
        r.align(elem_alignment::<T>())?;
        let end = r.position() + byte_len;
        let mut out = Vec::new();
        while r.position() < end {
            out.push(T::decode(r)?);
        }
        if r.position() != end {
            return Err(Error::InvalidSignature(
                "array element decoded past its declared length".into(),
            ));
        }
        Ok(out)
    }
}

/// The wire alignment of `T`'s first byte, needed before writing/reading an array's element
/// sequence (D-Bus always pads to the element alignment even for an empty array).
fn elem_alignment<T: Type>() -> usize {
    match T::signature().as_str().as_bytes().first() {
        Some(b'y' | b'g') => 1,
        Some(b'n' | b'q') => 2,
        Some(b'i' | b'u' | b'b' | b's' | b'o' | b'a') => 4,
        Some(b'x' | b't' | b'd' | b'(' | b'{') => 8,
        Some(b'v') => 1,
        _ => 1,
    }
}

impl<T: Codec> Codec for Option<T> {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        match self {
            Some(v) => vec![v].encode(w),
            None => Vec::<&T>::new().encode(w),
        }
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        let mut v = Vec::<T>::decode(r)?;
        Ok(if v.is_empty() { None } else { Some(v.remove(0)) })
    }
}

impl<K: Codec + Eq + std::hash::Hash, V: Codec> Codec for HashMap<K, V> {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        let len_at = w.reserve_u32();
        w.align(8);
        let start = w.position();
        for (k, v) in self {
            w.align(8);
            k.encode(w)?;
            v.encode(w)?;
        }
        let byte_len = (w.position() - start) as u32;
        w.patch_u32(len_at, byte_len);
        Ok(())
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        let byte_len = r.read_u32()? as usize;
        r.align(8)?;
        let end = r.position() + byte_len;
        let mut out = HashMap::new();
        while r.position() < end {
            r.align(8)?;
            let k = K::decode(r)?;
            let v = V::decode(r)?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl<K: Codec + Eq + Ord, V: Codec> Codec for BTreeMap<K, V> {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        let len_at = w.reserve_u32();
        w.align(8);
        let start = w.position();
        for (k, v) in self {
            w.align(8);
            k.encode(w)?;
            v.encode(w)?;
        }
        let byte_len = (w.position() - start) as u32;
        w.patch_u32(len_at, byte_len);
        Ok(())
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        let byte_len = r.read_u32()? as usize;
        r.align(8)?;
        let end = r.position() + byte_len;
        let mut out = BTreeMap::new();
        while r.position() < end {
            r.align(8)?;
            let k = K::decode(r)?;
            let v = V::decode(r)?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl Codec for () {
    fn encode<B: ByteOrder>(&self, _w: &mut Writer<B>) -> Result<()> {
        Ok(())
    }

    fn decode<B: ByteOrder>(_r: &mut Reader<'_, B>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! tuple_codec {
    ($($idx:tt $name:ident)+) => {
        impl<$($name: Codec),+> Codec for ($($name,)+) {
            fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
                w.align(8);
                $(self.$idx.encode(w)?;)+
                Ok(())
            }

            fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
                r.align(8)?;
                Ok(($($name::decode(r)?,)+))
            }
        }
    };
}

tuple_codec!(0 T0);
tuple_codec!(0 T0 1 T1);
tuple_codec!(0 T0 1 T1 2 T2);
tuple_codec!(0 T0 1 T1 2 T2 3 T3);
tuple_codec!(0 T0 1 T1 2 T2 3 T3 4 T4);
tuple_codec!(0 T0 1 T1 2 T2 3 T3 4 T4 5 T5);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use byteorder::LittleEndian;

    fn roundtrip<T: Codec + PartialEq + std::fmt::Debug>(v: T) {
        let ctxt = Context::<LittleEndian>::new(0);
        let mut w = Writer::new(ctxt);
        v.encode(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes, ctxt);
        let decoded = T::decode(&mut r).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn primitives_round_trip() {
        roundtrip(42u8);
        roundtrip(true);
        roundtrip(-7i16);
        roundtrip(65535u16);
        roundtrip(-123456i32);
        roundtrip(123456u32);
        roundtrip(-1i64);
        roundtrip(1u64 << 40);
        roundtrip(3.1415f64);
        roundtrip("hello world!".to_owned());
    }

    #[test]
    fn empty_containers_round_trip() {
        roundtrip(Vec::<u32>::new());
        roundtrip(String::new());
        roundtrip(HashMap::<String, i32>::new());
        roundtrip(None::<u32>);
    }

    #[test]
    fn nested_containers_round_trip() {
        let mut m = BTreeMap::new();
        m.insert("one".to_owned(), 1i32);
        m.insert("two".to_owned(), 2i32);
        roundtrip(m);
        roundtrip(vec!["Hello".to_owned(), "World".to_owned()]);
        roundtrip((1i32, "two".to_owned(), 3.0f64));
    }

    #[test]
    fn object_path_and_signature_round_trip() {
        roundtrip(ObjectPath::try_from("/org/example/Foo".to_owned()).unwrap());
        roundtrip(Signature::new("a{si}".to_owned()).unwrap());
    }
}
