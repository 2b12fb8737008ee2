//! The client-side proxy binding: typed async/blocking calls, signal
//! subscriptions, and property get/set/observe.
//!
//! Uses the same `Mutex`-guarded shared-state style as [`crate::skeleton::Skeleton`]; a
//! `Stub` holds a strong [`Arc`] to its dispatcher (a stub follows connection-state transitions
//! on a name it doesn't own, so its lifetime is the thing that ends) while the dispatcher only
//! ever sees it back through a [`std::sync::Weak`]-captured connection hook, so there is no
//! reference cycle to break here the way there is for a skeleton.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use enumflags2::BitFlags;
use simppl_codec::{Codec, ObjectPath};
use simppl_names::{BusName, InterfaceName, MemberName};

use crate::any::{Any, IntoAny};
use crate::dispatcher::{Dispatcher, SignalSubscription};
use crate::error::Error;
use crate::message::{Flags, Message};
use crate::pending_call::CallOptions;
use crate::Result;

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Connection-state transitions a stub's bound service can go through.
///
/// `NotAvailable` and `Timeout` are surfaced only while resolving the initial connection; once a
/// stub has seen the peer at all it only toggles between `Connected` and `Disconnected` from then
/// on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    NotAvailable,
    Timeout,
}

/// A server-declared error surfaced through a failed call, with its D-Bus error name and optional
/// human-readable message.
pub struct Exception<'e> {
    name: &'e str,
    message: Option<&'e str>,
}

impl<'e> Exception<'e> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn message(&self) -> Option<&str> {
        self.message
    }
}

/// The outcome handed to an async call's continuation: success, a typed error, or a transport
/// error.
pub struct CallState<T>(Result<T>);

impl<T> CallState<T> {
    pub fn is_success(&self) -> bool {
        self.0.is_ok()
    }

    /// The server-declared exception this call failed with, if any (as opposed to a transport
    /// failure like a timeout or disconnect).
    pub fn exception(&self) -> Option<Exception<'_>> {
        match &self.0 {
            Err(Error::Runtime { name, message }) => Some(Exception {
                name: name.as_str(),
                message: message.as_deref(),
            }),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        self.0.as_ref().err()
    }

    pub fn into_result(self) -> Result<T> {
        self.0
    }
}

/// A still-installed property-change subscription installed via [`Stub::attach_property`].
pub struct PropertySubscription {
    signal: SignalSubscription,
}

/// The client-side typed proxy to a remote interface at a fixed `(service, object path)` pair,
/// bound at construction to a dispatcher, service name, and object path.
pub struct Stub {
    dispatcher: Arc<Dispatcher>,
    id: u64,
    service: BusName<'static>,
    path: ObjectPath<'static>,
    state: Mutex<ConnectionState>,
    connected_hook: Mutex<Option<Box<dyn Fn(ConnectionState) + Send + Sync>>>,
}

impl Stub {
    /// Bind a stub to `service` at `path`, tracked by `dispatcher`.
    pub fn new(dispatcher: &Arc<Dispatcher>, service: BusName<'static>, path: ObjectPath<'static>) -> Arc<Self> {
        let id = dispatcher.next_stub_id();
        let initial_state = dispatcher.peer_state(&service);
        let stub = Arc::new(Self {
            dispatcher: dispatcher.clone(),
            id,
            service: service.clone(),
            path,
            state: Mutex::new(initial_state),
            connected_hook: Mutex::new(None),
        });

        let weak = Arc::downgrade(&stub);
        dispatcher.attach_connection_hook(service, move |new_state| {
            if let Some(stub) = weak.upgrade() {
                *stub.state.lock().expect("lock poisoned") = new_state;
                if let Some(hook) = stub.connected_hook.lock().expect("lock poisoned").as_ref() {
                    hook(new_state);
                }
            }
        });
        stub
    }

    pub fn service(&self) -> &BusName<'static> {
        &self.service
    }

    pub fn path(&self) -> &ObjectPath<'static> {
        &self.path
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock().expect("lock poisoned")
    }

    /// Register a hook invoked with the new state each time the remote service appears or
    /// disappears on the bus.
    pub fn on_connected(&self, hook: impl Fn(ConnectionState) + Send + Sync + 'static) {
        *self.connected_hook.lock().expect("lock poisoned") = Some(Box::new(hook));
    }

    fn method_call(&self, interface: &InterfaceName<'static>, member: MemberName<'static>) -> Message {
        Message::method_call(self.path.clone(), member)
            .with_interface(interface.clone())
            .with_destination(self.service.clone())
    }

    /// Issue a non-oneway method call and decode its reply. The blocking form in
    /// [`Stub::call_blocking`] just drives this to completion on the caller's own thread.
    pub async fn call<In: Codec, Out: Codec>(
        &self,
        interface: &InterfaceName<'static>,
        member: MemberName<'static>,
        args: In,
        options: CallOptions,
    ) -> Result<Out> {
        let call = self.method_call(interface, member).with_body(args)?;
        let reply = self.dispatcher.call(call, &options, self.id).await?;
        Ok(reply.body::<Out>()?)
    }

    /// Same as [`Stub::call`], wrapped in a [`CallState`] rather than propagated with `?` — the
    /// shape the generated stub's async continuations are meant to hand to user code.
    pub async fn call_async<In: Codec, Out: Codec>(
        &self,
        interface: &InterfaceName<'static>,
        member: MemberName<'static>,
        args: In,
        options: CallOptions,
    ) -> CallState<Out> {
        CallState(self.call(interface, member, args, options).await)
    }

    /// Block the current thread until `call` resolves. Blocking calls may only be issued from a
    /// thread that is not currently inside the dispatcher's run loop; this is not enforced here,
    /// since doing so reliably needs cooperation from the caller's executor, so it remains a
    /// documented programming-error contract rather than a runtime check.
    pub fn call_blocking<In: Codec, Out: Codec>(
        &self,
        interface: &InterfaceName<'static>,
        member: MemberName<'static>,
        args: In,
        options: CallOptions,
    ) -> Result<Out> {
        crate::block_on(self.call(interface, member, args, options))
    }

    /// A method declared `oneway`: sets `NO_REPLY_EXPECTED` and creates no pending-call entry.
    pub async fn call_oneway<In: Codec>(
        &self,
        interface: &InterfaceName<'static>,
        member: MemberName<'static>,
        args: In,
    ) -> Result<()> {
        let call = self
            .method_call(interface, member)
            .with_flags(BitFlags::from(Flags::NoReplyExpected))
            .with_body(args)?;
        self.dispatcher.send_oneway(call).await
    }

    /// Subscribe to a signal; installs a match rule on the dispatcher.
    pub fn attach_signal<T: Codec + 'static>(
        &self,
        interface: InterfaceName<'static>,
        member: MemberName<'static>,
        handler: impl Fn(T) + Send + Sync + 'static,
    ) -> SignalSubscription {
        self.dispatcher.attach_signal(self.path.clone(), interface, member, move |msg| {
            if let Ok(value) = msg.body::<T>() {
                handler(value);
            }
        })
    }

    pub fn detach_signal(&self, subscription: SignalSubscription) {
        self.dispatcher.detach_signal(subscription);
    }

    /// `Properties.Get`.
    pub async fn get_property_async<T: Codec>(&self, interface: &InterfaceName<'static>, name: &str) -> Result<T> {
        let props_interface = InterfaceName::try_from(PROPERTIES_INTERFACE).expect("valid");
        let member = MemberName::try_from("Get").expect("valid");
        let any: Any = self
            .call(&props_interface, member, (interface.as_str().to_owned(), name.to_owned()), CallOptions::new())
            .await?;
        Ok(any.get::<T>()?)
    }

    pub fn get_property_blocking<T: Codec>(&self, interface: &InterfaceName<'static>, name: &str) -> Result<T> {
        crate::block_on(self.get_property_async(interface, name))
    }

    /// `Properties.Set`.
    pub async fn set_property_async<T: IntoAny>(&self, interface: &InterfaceName<'static>, name: &str, value: T) -> Result<()> {
        let props_interface = InterfaceName::try_from(PROPERTIES_INTERFACE).expect("valid");
        let member = MemberName::try_from("Set").expect("valid");
        let any = Any::new(value);
        let _: () = self
            .call(&props_interface, member, (interface.as_str().to_owned(), name.to_owned(), any), CallOptions::new())
            .await?;
        Ok(())
    }

    pub fn set_property_blocking<T: IntoAny>(&self, interface: &InterfaceName<'static>, name: &str, value: T) -> Result<()> {
        crate::block_on(self.set_property_async(interface, name, value))
    }

    /// `attach(handler)` on a property: immediately calls `GetAll` and invokes
    /// `handler` with the current value, then installs a `PropertiesChanged` subscription for
    /// subsequent updates. Properties whose access is `Invalidates`-only (no value in the change
    /// notification) are not refetched automatically by this call — the handler only fires for
    /// `Notifying` updates, which carry the new value inline.
    pub async fn attach_property<T: Codec + 'static>(
        self: &Arc<Self>,
        interface: InterfaceName<'static>,
        name: String,
        handler: impl Fn(T) + Send + Sync + 'static,
    ) -> Result<PropertySubscription> {
        let props_interface = InterfaceName::try_from(PROPERTIES_INTERFACE).expect("valid");
        let get_all = MemberName::try_from("GetAll").expect("valid");
        let all: HashMap<String, Any> = self
            .call(&props_interface, get_all, (interface.as_str().to_owned(),), CallOptions::new())
            .await?;
        if let Some(any) = all.get(&name) {
            if let Ok(value) = any.get::<T>() {
                handler(value);
            }
        }

        let handler = Arc::new(handler);
        let target_interface = interface.as_str().to_owned();
        let target_name = name;
        let changed_member = MemberName::try_from("PropertiesChanged").expect("valid");
        let signal = self.dispatcher.attach_signal(self.path.clone(), props_interface, changed_member, move |msg| {
            let Ok((iface, changed, _invalidated)) = msg.body::<(String, HashMap<String, Any>, Vec<String>)>() else {
                return;
            };
            if iface != target_interface {
                return;
            }
            if let Some(any) = changed.get(&target_name) {
                if let Ok(value) = any.get::<T>() {
                    handler(value);
                }
            }
        });
        Ok(PropertySubscription { signal })
    }

    pub fn detach_property(&self, subscription: PropertySubscription) {
        self.dispatcher.detach_signal(subscription.signal);
    }
}

impl Drop for Stub {
    /// Cancels every pending call this stub still owns.
    fn drop(&mut self) {
        self.dispatcher.cancel_stub_calls(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::Skeleton;
    use crate::Connection;

    async fn connected_pair() -> (Arc<Dispatcher>, Arc<Dispatcher>) {
        let (client_conn, server_conn) = Connection::unix_stream_pair().unwrap();
        let client = Dispatcher::builder().build(client_conn);
        let server = Dispatcher::builder().build(server_conn);
        (client, server)
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let (client, server) = connected_pair().await;

        let path = ObjectPath::try_from("/test".to_owned()).unwrap();
        let iface = InterfaceName::try_from("test.Echo").unwrap();
        let skeleton = Skeleton::new(&server, path.clone(), None);
        skeleton.add_interface(
            crate::interface::InterfaceDescriptor {
                name: iface.clone(),
                methods: vec![crate::interface::MethodDescriptor {
                    name: MemberName::try_from("Echo").unwrap(),
                    in_signature: simppl_codec::Signature::from_str_unchecked("s"),
                    out_signature: simppl_codec::Signature::from_str_unchecked("s"),
                    oneway: false,
                    throws: None,
                }],
                signals: vec![],
                properties: vec![],
            },
            vec![(
                MemberName::try_from("Echo").unwrap(),
                Arc::new(|skeleton: Arc<Skeleton>, request: crate::skeleton::Request| {
                    Box::pin(async move {
                        let value: String = request.body().unwrap();
                        let descriptor = request.descriptor().clone();
                        let msg = request.message().clone();
                        let _ = skeleton.respond_with(&msg, &descriptor, value).await;
                    })
                }),
            )],
        );
        skeleton.register().await.unwrap();

        let server_loop = server.clone();
        let server_task = tokio::spawn(async move { server_loop.run().await });
        let client_loop = client.clone();
        let client_task = tokio::spawn(async move { client_loop.run().await });

        let stub = Stub::new(&client, BusName::try_from(":dummy.peer").unwrap(), path);
        let echoed: String = stub
            .call(&iface, MemberName::try_from("Echo").unwrap(), "Hello World!".to_owned(), CallOptions::new())
            .await
            .unwrap();
        assert_eq!(echoed, "Hello World!");

        server.stop();
        client.stop();
        let _ = server_task.await;
        let _ = client_task.await;
    }

    #[tokio::test]
    async fn timeout_fires_no_reply_error() {
        let (client, _server) = connected_pair().await;
        let path = ObjectPath::try_from("/test".to_owned()).unwrap();
        let iface = InterfaceName::try_from("test.Slow").unwrap();
        let stub = Stub::new(&client, BusName::try_from(":dummy.peer").unwrap(), path);

        let client_loop = client.clone();
        let client_task = tokio::spawn(async move { client_loop.run().await });

        let options = CallOptions::new().timeout(std::time::Duration::from_millis(50));
        let result: Result<()> = stub.call(&iface, MemberName::try_from("Never").unwrap(), (), options).await;
        assert!(matches!(result, Err(Error::Transport { .. })));

        client.stop();
        let _ = client_task.await;
    }
}
