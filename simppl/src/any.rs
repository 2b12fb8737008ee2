//! `Any` — a dynamically typed D-Bus value (wire type `v`, VARIANT).
//!
//! Mirrors simppl's `Any`/`AnyVec`: a decoded variant keeps its D-Bus signature alongside an
//! opaque payload, and [`Any::is`]/[`Any::get`] let a caller probe it structurally without knowing
//! the concrete type up front. Containers decode lazily into further `Any` elements
//! ([`IntermediateAnyVec`], [`IntermediateAnyTuple`], [`IntermediateAnyMapElement`]) rather than
//! eagerly materializing a concrete Rust collection, so reading only the outer signature never
//! pays for decoding the elements underneath it.

use std::collections::HashMap;

use simppl_codec::{ByteOrder, Codec, Error, ObjectPath, Reader, Result, Signature, Type, Writer};

/// A type-erased D-Bus value, as seen on the wire inside a `v` (VARIANT) slot.
#[derive(Clone, Debug, PartialEq)]
pub struct Any {
    signature: Signature<'static>,
    value: AnyValue,
}

#[derive(Clone, Debug, PartialEq)]
enum AnyValue {
    U8(u8),
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    ObjectPath(ObjectPath<'static>),
    Signature(Signature<'static>),
    Variant(Box<Any>),
    Array(IntermediateAnyVec),
    Dict(Vec<IntermediateAnyMapElement>),
    Struct(IntermediateAnyTuple),
}

/// The decoded elements of an array-typed `Any`, alongside the element signature they share.
#[derive(Clone, Debug, PartialEq)]
pub struct IntermediateAnyVec {
    pub element_signature: Signature<'static>,
    pub elements: Vec<Any>,
}

/// One key/value pair out of a decoded dict-typed (`a{kv}`) `Any`.
#[derive(Clone, Debug, PartialEq)]
pub struct IntermediateAnyMapElement {
    pub key_signature: Signature<'static>,
    pub value_signature: Signature<'static>,
    pub key: Box<Any>,
    pub value: Box<Any>,
}

/// The decoded members of a struct-typed (`(...)`) `Any`.
#[derive(Clone, Debug, PartialEq)]
pub struct IntermediateAnyTuple {
    pub elements_signature: Signature<'static>,
    pub elements: Vec<Any>,
}

impl Any {
    /// Wrap `value` into an `Any`, recording its wire signature.
    pub fn new<T: IntoAny>(value: T) -> Self {
        value.into_any()
    }

    pub fn signature(&self) -> &Signature<'static> {
        &self.signature
    }

    /// Does this `Any` structurally match `T`, recursing into containers and nested variants?
    pub fn is<T: FromAny>(&self) -> bool {
        T::any_matches(self)
    }

    /// Extract a concrete `T` out of this `Any`, failing if it doesn't structurally match.
    pub fn get<T: FromAny>(&self) -> Result<T> {
        T::from_any(self)
    }
}

impl Type for Any {
    fn signature() -> Signature<'static> {
        Signature::from_str_unchecked("v")
    }
}

impl Codec for Any {
    fn encode<B: ByteOrder>(&self, w: &mut Writer<B>) -> Result<()> {
        self.signature.encode(w)?;
        encode_value(&self.value, w)
    }

    fn decode<B: ByteOrder>(r: &mut Reader<'_, B>) -> Result<Self> {
        let signature = Signature::decode(r)?.to_owned();
        if !signature.is_single_complete_type() {
            return Err(Error::InvalidSignature(format!(
                "variant signature `{signature}` is not a single complete type"
            )));
        }
        let value = decode_value(&signature, r)?;
        Ok(Any { signature, value })
    }
}

fn alignment_for(sig: &str) -> usize {
    match sig.as_bytes().first() {
        Some(b'y' | b'g') => 1,
        Some(b'n' | b'q') => 2,
        Some(b'i' | b'u' | b'b' | b's' | b'o' | b'a') => 4,
        Some(b'x' | b't' | b'd' | b'(' | b'{') => 8,
        Some(b'v') => 1,
        _ => 1,
    }
}

enum ArrayShape {
    Dict {
        key: Signature<'static>,
        value: Signature<'static>,
    },
    Element(Signature<'static>),
}

/// Split an array signature (`"a..."`) into its element shape: a plain element type, or a dict
/// key/value pair if the element is a `{kv}` dict-entry.
fn array_shape(full: &str) -> Result<ArrayShape> {
    let rest = &full[1..];
    if let Some(inner) = rest.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let kv = Signature::new(inner.to_owned())?;
        let mut it = kv.iter();
        let key = Signature::new(
            it.next()
                .ok_or_else(|| Error::InvalidSignature("missing dict key type".into()))?
                .to_owned(),
        )?;
        let value = Signature::new(
            it.next()
                .ok_or_else(|| Error::InvalidSignature("missing dict value type".into()))?
                .to_owned(),
        )?;
        Ok(ArrayShape::Dict { key, value })
    } else {
        Ok(ArrayShape::Element(Signature::new(rest.to_owned())?))
    }
}

/// Split a struct signature (`"(...)"`) into its member types.
fn struct_members(full: &str) -> Result<Vec<Signature<'static>>> {
    let inner = &full[1..full.len() - 1];
    let members = Signature::new(inner.to_owned())?;
    members
        .iter()
        .map(|m| Signature::new(m.to_owned()))
        .collect()
}

fn encode_value<B: ByteOrder>(sig: &Signature<'_>, value: &AnyValue, w: &mut Writer<B>) -> Result<()> {
    let _ = sig;
    match value {
        AnyValue::U8(v) => v.encode(w),
        AnyValue::Bool(v) => v.encode(w),
        AnyValue::I16(v) => v.encode(w),
        AnyValue::U16(v) => v.encode(w),
        AnyValue::I32(v) => v.encode(w),
        AnyValue::U32(v) => v.encode(w),
        AnyValue::I64(v) => v.encode(w),
        AnyValue::U64(v) => v.encode(w),
        AnyValue::F64(v) => v.encode(w),
        AnyValue::Str(v) => v.encode(w),
        AnyValue::ObjectPath(v) => v.encode(w),
        AnyValue::Signature(v) => v.encode(w),
        AnyValue::Variant(inner) => inner.encode(w),
        AnyValue::Array(v) => {
            let len_at = w.reserve_u32();
            w.align(alignment_for(v.element_signature.as_str()));
            let start = w.position();
            for elem in &v.elements {
                encode_value(&v.element_signature, &elem.value, w)?;
            }
            let byte_len = (w.position() - start) as u32;
            w.patch_u32(len_at, byte_len);
            Ok(())
        }
        AnyValue::Dict(entries) => {
            let len_at = w.reserve_u32();
            w.align(8);
            let start = w.position();
            for entry in entries {
                w.align(8);
                encode_value(&entry.key_signature, &entry.key.value, w)?;
                encode_value(&entry.value_signature, &entry.value.value, w)?;
            }
            let byte_len = (w.position() - start) as u32;
            w.patch_u32(len_at, byte_len);
            Ok(())
        }
        AnyValue::Struct(v) => {
            w.align(8);
            for elem in &v.elements {
                encode_value(elem.signature(), &elem.value, w)?;
            }
            Ok(())
        }
    }
}

fn decode_value<B: ByteOrder>(sig: &Signature<'_>, r: &mut Reader<'_, B>) -> Result<AnyValue> {
    let s = sig.as_str();
    match s.as_bytes().first() {
        Some(b'y') => Ok(AnyValue::U8(u8::decode(r)?)),
        Some(b'b') => Ok(AnyValue::Bool(bool::decode(r)?)),
        Some(b'n') => Ok(AnyValue::I16(i16::decode(r)?)),
        Some(b'q') => Ok(AnyValue::U16(u16::decode(r)?)),
        Some(b'i') => Ok(AnyValue::I32(i32::decode(r)?)),
        Some(b'u') => Ok(AnyValue::U32(u32::decode(r)?)),
        Some(b'x') => Ok(AnyValue::I64(i64::decode(r)?)),
        Some(b't') => Ok(AnyValue::U64(u64::decode(r)?)),
        Some(b'd') => Ok(AnyValue::F64(f64::decode(r)?)),
        Some(b's') => Ok(AnyValue::Str(String::decode(r)?)),
        Some(b'o') => Ok(AnyValue::ObjectPath(ObjectPath::decode(r)?.to_owned())),
        Some(b'g') => Ok(AnyValue::Signature(Signature::decode(r)?)),
        Some(b'v') => Ok(AnyValue::Variant(Box::new(Any::decode(r)?))),
        Some(b'a') => match array_shape(s)? {
            ArrayShape::Dict { key, value } => {
                let byte_len = r.read_u32()? as usize;
                r.align(8)?;
                let end = r.position() + byte_len;
                let mut entries = Vec::new();
                while r.position() < end {
                    r.align(8)?;
                    let k = decode_value(&key, r)?;
                    let v = decode_value(&value, r)?;
                    entries.push(IntermediateAnyMapElement {
                        key_signature: key.clone(),
                        value_signature: value.clone(),
                        key: Box::new(Any {
                            signature: key.clone(),
                            value: k,
                        }),
                        value: Box::new(Any {
                            signature: value.clone(),
                            value: v,
                        }),
                    });
                }
                Ok(AnyValue::Dict(entries))
            }
            ArrayShape::Element(elem_sig) => {
                let byte_len = r.read_u32()? as usize;
                r.align(alignment_for(elem_sig.as_str()))?;
                let end = r.position() + byte_len;
                let mut elements = Vec::new();
                while r.position() < end {
                    let v = decode_value(&elem_sig, r)?;
                    elements.push(Any {
                        signature: elem_sig.clone(),
                        value: v,
                    });
                }
                Ok(AnyValue::Array(IntermediateAnyVec {
                    element_signature: elem_sig,
                    elements,
                }))
            }
        },
        Some(b'(') => {
            r.align(8)?;
            let members = struct_members(s)?;
            let mut elements = Vec::with_capacity(members.len());
            for member_sig in &members {
                let v = decode_value(member_sig, r)?;
                elements.push(Any {
                    signature: member_sig.clone(),
                    value: v,
                });
            }
            Ok(AnyValue::Struct(IntermediateAnyTuple {
                elements_signature: sig.clone(),
                elements,
            }))
        }
        _ => Err(Error::InvalidSignature(format!(
            "unsupported `Any` element type `{s}`"
        ))),
    }
}

/// Wraps a concrete value into an [`Any`], recording its wire signature along the way.
pub trait IntoAny {
    fn into_any(self) -> Any;
}

/// Checks whether an [`Any`] structurally holds `Self`, and extracts it if so.
pub trait FromAny: Sized {
    fn any_matches(any: &Any) -> bool;
    fn from_any(any: &Any) -> Result<Self>;
}

macro_rules! primitive_any {
    ($ty:ty, $sig:literal, $variant:ident) => {
        impl IntoAny for $ty {
            fn into_any(self) -> Any {
                Any {
                    signature: Signature::from_str_unchecked($sig),
                    value: AnyValue::$variant(self),
                }
            }
        }

        impl FromAny for $ty {
            fn any_matches(any: &Any) -> bool {
                matches!(any.value, AnyValue::$variant(_))
            }

            fn from_any(any: &Any) -> Result<Self> {
                match &any.value {
                    AnyValue::$variant(v) => Ok(v.clone()),
                    _ => Err(Error::Message(format!(
                        "Any (signature `{}`) does not hold a `{}`",
                        any.signature,
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

primitive_any!(u8, "y", U8);
primitive_any!(bool, "b", Bool);
primitive_any!(i16, "n", I16);
primitive_any!(u16, "q", U16);
primitive_any!(i32, "i", I32);
primitive_any!(u32, "u", U32);
primitive_any!(i64, "x", I64);
primitive_any!(u64, "t", U64);
primitive_any!(f64, "d", F64);
primitive_any!(String, "s", Str);
primitive_any!(ObjectPath<'static>, "o", ObjectPath);
primitive_any!(Signature<'static>, "g", Signature);

impl IntoAny for Any {
    fn into_any(self) -> Any {
        self
    }
}

impl FromAny for Any {
    fn any_matches(_any: &Any) -> bool {
        true
    }

    fn from_any(any: &Any) -> Result<Self> {
        Ok(any.clone())
    }
}

impl<T: IntoAny + Type> IntoAny for Vec<T> {
    fn into_any(self) -> Any {
        let element_signature = T::signature();
        let elements: Vec<Any> = self.into_iter().map(IntoAny::into_any).collect();
        let signature =
            Signature::from_string_unchecked(format!("a{element_signature}"));
        Any {
            signature,
            value: AnyValue::Array(IntermediateAnyVec {
                element_signature,
                elements,
            }),
        }
    }
}

impl<T: FromAny> FromAny for Vec<T> {
    fn any_matches(any: &Any) -> bool {
        match &any.value {
            AnyValue::Array(v) => v.elements.iter().all(T::any_matches),
            _ => false,
        }
    }

    fn from_any(any: &Any) -> Result<Self> {
        match &any.value {
            AnyValue::Array(v) => v.elements.iter().map(T::from_any).collect(),
            _ => Err(Error::Message(format!(
                "Any (signature `{}`) does not hold an array",
                any.signature
            ))),
        }
    }
}

impl<K: IntoAny + Type, V: IntoAny + Type> IntoAny for HashMap<K, V> {
    fn into_any(self) -> Any {
        let key_signature = K::signature();
        let value_signature = V::signature();
        let signature = Signature::from_string_unchecked(format!(
            "a{{{key_signature}{value_signature}}}"
        ));
        let elements = self
            .into_iter()
            .map(|(k, v)| IntermediateAnyMapElement {
                key_signature: key_signature.clone(),
                value_signature: value_signature.clone(),
                key: Box::new(k.into_any()),
                value: Box::new(v.into_any()),
            })
            .collect();
        Any {
            signature,
            value: AnyValue::Dict(elements),
        }
    }
}

impl<K: FromAny + Eq + std::hash::Hash, V: FromAny> FromAny for HashMap<K, V> {
    fn any_matches(any: &Any) -> bool {
        match &any.value {
            AnyValue::Dict(entries) => entries
                .iter()
                .all(|e| K::any_matches(&e.key) && V::any_matches(&e.value)),
            _ => false,
        }
    }

    fn from_any(any: &Any) -> Result<Self> {
        match &any.value {
            AnyValue::Dict(entries) => entries
                .iter()
                .map(|e| Ok((K::from_any(&e.key)?, V::from_any(&e.value)?)))
                .collect(),
            _ => Err(Error::Message(format!(
                "Any (signature `{}`) does not hold a dict",
                any.signature
            ))),
        }
    }
}

macro_rules! tuple_any {
    ($($idx:tt $name:ident)+) => {
        impl<$($name: IntoAny + Type),+> IntoAny for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_any(self) -> Any {
                let ($($name,)+) = self;
                let elements = vec![$($name.into_any()),+];
                let signature = <($($name,)+) as Type>::signature();
                Any {
                    signature,
                    value: AnyValue::Struct(IntermediateAnyTuple {
                        elements_signature: Signature::from_string_unchecked(
                            elements.iter().map(|e| e.signature().as_str()).collect::<String>(),
                        ),
                        elements,
                    }),
                }
            }
        }

        impl<$($name: FromAny),+> FromAny for ($($name,)+) {
            fn any_matches(any: &Any) -> bool {
                match &any.value {
                    AnyValue::Struct(v) => {
                        let mut it = v.elements.iter();
                        $(it.next().is_some_and(|e| $name::any_matches(e)))&&+
                            && it.next().is_none()
                    }
                    _ => false,
                }
            }

            fn from_any(any: &Any) -> Result<Self> {
                match &any.value {
                    AnyValue::Struct(v) => {
                        let mut it = v.elements.iter();
                        Ok(($($name::from_any(
                            it.next().ok_or_else(|| Error::Message("Any struct has too few elements".into()))?,
                        )?,)+))
                    }
                    _ => Err(Error::Message(format!(
                        "Any (signature `{}`) does not hold a struct",
                        any.signature
                    ))),
                }
            }
        }
    };
}

tuple_any!(0 T0);
tuple_any!(0 T0 1 T1);
tuple_any!(0 T0 1 T1 2 T2);
tuple_any!(0 T0 1 T1 2 T2 3 T3);

#[cfg(test)]
mod tests {
    use super::*;
    use simppl_codec::Context;
    use byteorder::LittleEndian;

    fn roundtrip_any(any: Any) -> Any {
        let ctxt = Context::<LittleEndian>::new(0);
        let mut w = Writer::new(ctxt);
        any.encode(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes, ctxt);
        Any::decode(&mut r).unwrap()
    }

    #[test]
    fn primitive_round_trips_and_matches() {
        let any = Any::new(42i32);
        assert!(any.is::<i32>());
        assert!(!any.is::<u32>());
        let decoded = roundtrip_any(any);
        assert_eq!(decoded.get::<i32>().unwrap(), 42);
    }

    #[test]
    fn string_round_trip() {
        let any = Any::new("hello".to_owned());
        let decoded = roundtrip_any(any);
        assert!(decoded.is::<String>());
        assert_eq!(decoded.get::<String>().unwrap(), "hello");
    }

    #[test]
    fn vec_round_trip_checks_element_types() {
        let any = Any::new(vec![1i32, 2, 3]);
        let decoded = roundtrip_any(any);
        assert!(decoded.is::<Vec<i32>>());
        assert!(!decoded.is::<Vec<String>>());
        assert_eq!(decoded.get::<Vec<i32>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn dict_round_trip() {
        let mut m = HashMap::new();
        m.insert("one".to_owned(), 1i32);
        m.insert("two".to_owned(), 2i32);
        let any = Any::new(m.clone());
        let decoded = roundtrip_any(any);
        assert!(decoded.is::<HashMap<String, i32>>());
        assert_eq!(decoded.get::<HashMap<String, i32>>().unwrap(), m);
    }

    #[test]
    fn tuple_round_trip() {
        let any = Any::new((1i32, "two".to_owned(), 3.0f64));
        let decoded = roundtrip_any(any);
        assert!(decoded.is::<(i32, String, f64)>());
        assert_eq!(
            decoded.get::<(i32, String, f64)>().unwrap(),
            (1, "two".to_owned(), 3.0)
        );
    }

    #[test]
    fn nested_any_is_transparent() {
        let inner = Any::new(7u8);
        let any = Any::new(inner.clone());
        assert_eq!(any, inner);
        let decoded = roundtrip_any(any);
        assert!(decoded.is::<u8>());
        assert_eq!(decoded.get::<u8>().unwrap(), 7);
    }
}
