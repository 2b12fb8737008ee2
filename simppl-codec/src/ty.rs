use std::borrow::Cow;

use crate::Signature;

/// Compile-time mapping from a host value type to its D-Bus wire signature.
///
/// Every type recognized by the codec implements this; `#[derive(Type)]` (in
/// `simppl-codec-derive`) generates it for user structs and enums by concatenating (or taking
/// the underlying integer representation of) their fields'. The generated signature is
/// authoritative for encoding and is also what decoding checks incoming wire data against.
pub trait Type {
    fn signature() -> Signature<'static>;
}

macro_rules! basic_impl {
    ($ty:ty, $code:literal) => {
        impl Type for $ty {
            fn signature() -> Signature<'static> {
                Signature::from_str_unchecked($code)
            }
        }
    };
}

basic_impl!(u8, "y");
basic_impl!(bool, "b");
basic_impl!(i16, "n");
basic_impl!(u16, "q");
basic_impl!(i32, "i");
basic_impl!(u32, "u");
basic_impl!(i64, "x");
basic_impl!(u64, "t");
basic_impl!(f64, "d");
basic_impl!(str, "s");
basic_impl!(String, "s");

impl<T: Type> Type for &T {
    fn signature() -> Signature<'static> {
        T::signature()
    }
}

impl<T: Type> Type for Box<T> {
    fn signature() -> Signature<'static> {
        T::signature()
    }
}

impl<'a, T: Type + ToOwned + ?Sized> Type for Cow<'a, T> {
    fn signature() -> Signature<'static> {
        T::signature()
    }
}

impl<T: Type> Type for Vec<T> {
    fn signature() -> Signature<'static> {
        Signature::from_string_unchecked(format!("a{}", T::signature()))
    }
}

impl<T: Type> Type for [T] {
    fn signature() -> Signature<'static> {
        Signature::from_string_unchecked(format!("a{}", T::signature()))
    }
}

impl<T: Type> Type for Option<T> {
    fn signature() -> Signature<'static> {
        // Represented on the wire as an array of zero or one elements; see
        // `simppl-codec`'s `option-as-array` feature.
        Vec::<T>::signature()
    }
}

impl<K: Type, V: Type> Type for std::collections::HashMap<K, V> {
    fn signature() -> Signature<'static> {
        Signature::from_string_unchecked(format!("a{{{}{}}}", K::signature(), V::signature()))
    }
}

impl<K: Type + Ord, V: Type> Type for std::collections::BTreeMap<K, V> {
    fn signature() -> Signature<'static> {
        Signature::from_string_unchecked(format!("a{{{}{}}}", K::signature(), V::signature()))
    }
}

impl Type for () {
    fn signature() -> Signature<'static> {
        Signature::from_str_unchecked("")
    }
}

macro_rules! tuple_impl {
    ($($n:tt $name:ident)+) => {
        impl<$($name: Type),+> Type for ($($name,)+) {
            fn signature() -> Signature<'static> {
                let mut s = String::from("(");
                $(s.push_str($name::signature().as_str());)+
                s.push(')');
                Signature::from_string_unchecked(s)
            }
        }
    };
}

tuple_impl!(0 T0);
tuple_impl!(0 T0 1 T1);
tuple_impl!(0 T0 1 T1 2 T2);
tuple_impl!(0 T0 1 T1 2 T2 3 T3);
tuple_impl!(0 T0 1 T1 2 T2 3 T3 4 T4);
tuple_impl!(0 T0 1 T1 2 T2 3 T3 4 T4 5 T5);

/// Marker for the small set of D-Bus basic (non-container) types: the only types legal as a
/// dictionary key or an `Any`'s top-level primitive payload.
pub trait Basic: Type {
    const SIGNATURE_CHAR: char;
}

macro_rules! basic_marker {
    ($ty:ty, $c:literal) => {
        impl Basic for $ty {
            const SIGNATURE_CHAR: char = $c;
        }
    };
}

basic_marker!(u8, 'y');
basic_marker!(bool, 'b');
basic_marker!(i16, 'n');
basic_marker!(u16, 'q');
basic_marker!(i32, 'i');
basic_marker!(u32, 'u');
basic_marker!(i64, 'x');
basic_marker!(u64, 't');
basic_marker!(f64, 'd');
basic_marker!(String, 's');

impl Basic for crate::ObjectPath<'_> {
    const SIGNATURE_CHAR: char = 'o';
}

impl Basic for crate::Signature<'_> {
    const SIGNATURE_CHAR: char = 'g';
}
