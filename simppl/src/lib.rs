//! A strongly-typed RPC and property framework layered on D-Bus.
//!
//! An interface is declared once as a Rust trait annotated with `#[simppl::interface(...)]`;
//! the attribute macro expands it into a client-side proxy (built on [`Stub`]) and a
//! server-side skeleton trait (built on [`Skeleton`]) that share a byte-compatible wire
//! encoding, so a client written against the generated proxy and a server written against the
//! generated skeleton trait interoperate without either side hand-writing marshalling code.
//!
//! The crate is organized bottom-up:
//!
//! - [`mod@address`] parses D-Bus server addresses and resolves the session/system bus.
//! - [`message`] is the envelope (header plus body) exchanged over the wire.
//! - [`connection`] owns a single socket: SASL handshake, framed message I/O.
//! - [`any`] is the dynamically typed `Any` value used for properties and generic payloads.
//! - [`interface`] describes an interface's methods, signals and properties at runtime.
//! - [`stub`] is the client side: method calls, signal subscriptions, property access.
//! - [`skeleton`] is the server side: request dispatch, deferred replies, property writes.
//! - [`object_manager`] implements `org.freedesktop.DBus.ObjectManager`.
//! - [`dispatcher`] is the single-threaded event loop tying a connection to a set of stubs,
//!   skeletons and pending calls.
//! - [`introspect`] renders interface descriptors as introspection XML.

mod address;
mod any;
mod connection;
mod dispatcher;
mod error;
mod interface;
mod introspect;
mod message;
mod object_manager;
mod pending_call;
mod skeleton;
mod stub;

pub use address::{transport, Address, Transport};
pub use any::{Any, FromAny, IntermediateAnyMapElement, IntermediateAnyTuple, IntermediateAnyVec, IntoAny};
pub use connection::Connection;
pub use dispatcher::{Dispatcher, RequestNameReply, SignalSubscription};
pub use error::{
    error_name_is, DeclaredError, Error, Result, ERROR_NO_REPLY, ERROR_TIMEOUT,
    ERROR_UNHANDLED_EXCEPTION,
};
pub use interface::{InterfaceDescriptor, MethodDescriptor, PropertyAccess, PropertyDescriptor, SignalDescriptor};
pub use message::{Flags, Message, MessageType};
pub use object_manager::ObjectManagerExt;
pub use pending_call::{CallOptions, PendingCall};
pub use skeleton::{MethodHandler, Request, Skeleton, ServerRequestDescriptor};
pub use stub::{CallState, ConnectionState, Exception, PropertySubscription, Stub};

pub use simppl_codec as codec;
pub use simppl_macros::interface;
pub use simppl_names as names;

#[doc(hidden)]
pub mod export {
    pub use async_trait::async_trait;
    pub use simppl_codec::{ByteOrder, Codec, Reader, Type, Writer};
}

/// Drive a future to completion on the calling thread (used by the `#[interface]` macro's
/// generated blocking call wrappers, and available directly for a stub's own
/// [`Stub::call_blocking`]). Gated on the `async-io` feature since that is this crate's default
/// backend; a `tokio`-backend build is expected to drive its own futures with `tokio::runtime`
/// instead.
#[cfg(feature = "async-io")]
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    async_io::block_on(future)
}
