//! Runtime descriptors for a declared interface.
//!
//! The `#[interface]` attribute macro in `simppl-macros` builds one [`InterfaceDescriptor`] per
//! declared trait at compile time (as a `const fn`-friendly literal table) and hands it to the
//! generated proxy/skeleton pair; the dispatcher and `introspect` module only ever see this
//! descriptor, never the macro-generated trait itself, so the macro's input syntax can evolve
//! without touching the runtime.

use enumflags2::{bitflags, BitFlags};

use simppl_codec::Signature;
use simppl_names::{InterfaceName, MemberName};

/// Property access-mode flags: `Readable`, `Writable`, `Notifying`, `Invalidates`, and
/// `ReadWrite`; `ReadWrite` is `Readable | Writable`, not a distinct flag.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PropertyAccess {
    Readable = 0x1,
    Writable = 0x2,
    /// The property emits `PropertiesChanged` with its new value when it changes.
    Notifying = 0x4,
    /// The property emits `PropertiesChanged` with an invalidation marker (no value) instead.
    Invalidates = 0x8,
}

/// One method entry in an [`InterfaceDescriptor`].
#[derive(Clone, Debug)]
pub struct MethodDescriptor {
    pub name: MemberName<'static>,
    pub in_signature: Signature<'static>,
    pub out_signature: Signature<'static>,
    /// `true` for a method with no reply and no error channel (sets `NoReplyExpected`).
    pub oneway: bool,
    /// Wire name of the declared error type, if the method registered one via `_throw<E>`.
    pub throws: Option<String>,
}

/// One signal entry in an [`InterfaceDescriptor`].
#[derive(Clone, Debug)]
pub struct SignalDescriptor {
    pub name: MemberName<'static>,
    pub signature: Signature<'static>,
}

/// One property entry in an [`InterfaceDescriptor`].
#[derive(Clone, Debug)]
pub struct PropertyDescriptor {
    pub name: MemberName<'static>,
    pub signature: Signature<'static>,
    pub access: BitFlags<PropertyAccess>,
}

impl PropertyDescriptor {
    pub fn is_readable(&self) -> bool {
        self.access.contains(PropertyAccess::Readable)
    }

    pub fn is_writable(&self) -> bool {
        self.access.contains(PropertyAccess::Writable)
    }
}

/// The full set of methods, signals and properties a declared interface exposes, plus its wire
/// name. Shared, immutable, and cheap to clone (`Arc`'d by stub/skeleton in practice) — one
/// instance describes both the client and the server side, which is what guarantees a stub and
/// skeleton generated from the same declaration always agree on the wire.
#[derive(Clone, Debug)]
pub struct InterfaceDescriptor {
    pub name: InterfaceName<'static>,
    pub methods: Vec<MethodDescriptor>,
    pub signals: Vec<SignalDescriptor>,
    pub properties: Vec<PropertyDescriptor>,
}

impl InterfaceDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name.as_str() == name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDescriptor> {
        self.signals.iter().find(|s| s.name.as_str() == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name.as_str() == name)
    }
}
