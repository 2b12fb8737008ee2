//! The server-side object binding: dispatch of incoming requests to registered
//! handlers, property backing store, and notification emission.
//!
//! A registry keyed by object path, with dispatch by table lookup on interface+member strings
//! rather than virtual dispatch, generalized so one [`Skeleton`] can compose several declared
//! interfaces on the same path, plus the standard `Properties`/`Introspectable` interfaces every
//! skeleton exposes for free.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use simppl_codec::{Codec, ObjectPath};
use simppl_names::{BusName, ErrorName, InterfaceName, MemberName};

use crate::any::Any;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::interface::{InterfaceDescriptor, PropertyAccess};
use crate::introspect;
use crate::message::Message;
use crate::Result;

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// A registered method handler: given the skeleton it is installed on and the inbound request,
/// decode arguments, run the user's implementation, and reply (or defer).
pub type MethodHandler = Arc<dyn Fn(Arc<Skeleton>, Request) -> HandlerFuture + Send + Sync>;

/// A user-supplied hook run on an incoming `Properties.Set` before the backing store is updated.
/// It may reject the write, transform the value, or accept it as-is. Returning `Err` rejects the
/// write and its `dbus_name()` (if any) becomes the error reply's name; returning `Ok(v)` stores
/// `v`, which need not be the value that was sent.
pub type PropertyValidator = Arc<dyn Fn(Any) -> Result<Any> + Send + Sync>;

/// Identifies a deferred inbound method call whose reply will be sent later.
#[derive(Clone)]
pub struct ServerRequestDescriptor {
    interface: InterfaceName<'static>,
    member: MemberName<'static>,
    sender: Option<BusName<'static>>,
    serial: u32,
    sequence: u64,
    oneway: bool,
    replied: Arc<AtomicBool>,
}

impl ServerRequestDescriptor {
    pub fn interface(&self) -> &InterfaceName<'static> {
        &self.interface
    }

    pub fn member(&self) -> &MemberName<'static> {
        &self.member
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_oneway(&self) -> bool {
        self.oneway
    }
}

/// One inbound method call, handed to the registered [`MethodHandler`].
pub struct Request {
    message: Message,
    descriptor: ServerRequestDescriptor,
}

impl Request {
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Decode the call's arguments as `T` (a tuple for multi-argument methods).
    pub fn body<T: Codec>(&self) -> Result<T> {
        Ok(self.message.body::<T>()?)
    }

    pub fn descriptor(&self) -> &ServerRequestDescriptor {
        &self.descriptor
    }

    /// Take the `ServerRequestDescriptor` to reply later via [`Skeleton::respond_on`], without
    /// sending anything now.
    pub fn defer_response(self) -> ServerRequestDescriptor {
        self.descriptor
    }
}

struct PropertyState {
    descriptor: crate::interface::PropertyDescriptor,
    value: Option<Any>,
}

/// One managed child's interfaces, keyed by interface name then property name (the shape
/// `org.freedesktop.DBus.ObjectManager.GetManagedObjects` reports per object path).
pub(crate) type ManagedInterfaces = HashMap<String, HashMap<String, Any>>;

/// A server-side object exposing one or more declared interfaces at a single object path.
///
/// Holds a non-owning [`Weak`] reference to its dispatcher, breaking the reference cycle between
/// dispatcher and skeleton; the skeleton's lifetime must not exceed the dispatcher's.
pub struct Skeleton {
    dispatcher: Weak<Dispatcher>,
    path: ObjectPath<'static>,
    bus_name: Option<BusName<'static>>,
    interfaces: Mutex<Vec<InterfaceDescriptor>>,
    handlers: Mutex<HashMap<(InterfaceName<'static>, MemberName<'static>), MethodHandler>>,
    properties: Mutex<HashMap<(InterfaceName<'static>, MemberName<'static>), PropertyState>>,
    property_validators: Mutex<HashMap<(InterfaceName<'static>, MemberName<'static>), PropertyValidator>>,
    /// Children registered via `ObjectManagerExt::add_managed_object`, in registration order —
    /// their `InterfacesAdded` signals are delivered to subscribers in that same order.
    managed_objects: Mutex<Vec<(ObjectPath<'static>, ManagedInterfaces)>>,
    next_sequence: AtomicU64,
}

impl Skeleton {
    /// Create a skeleton bound to `dispatcher` at `path`, optionally claiming `bus_name` when
    /// [`Skeleton::register`] runs.
    pub fn new(dispatcher: &Arc<Dispatcher>, path: ObjectPath<'static>, bus_name: Option<BusName<'static>>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: Arc::downgrade(dispatcher),
            path,
            bus_name,
            interfaces: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            properties: Mutex::new(HashMap::new()),
            property_validators: Mutex::new(HashMap::new()),
            managed_objects: Mutex::new(Vec::new()),
            next_sequence: AtomicU64::new(1),
        })
    }

    pub(crate) fn insert_managed_object(&self, path: ObjectPath<'static>, interfaces: ManagedInterfaces) {
        self.managed_objects.lock().expect("lock poisoned").push((path, interfaces));
    }

    pub(crate) fn remove_managed_object_entry(&self, path: &ObjectPath<'static>) -> Option<ManagedInterfaces> {
        let mut objects = self.managed_objects.lock().expect("lock poisoned");
        let index = objects.iter().position(|(p, _)| p == path)?;
        Some(objects.remove(index).1)
    }

    pub(crate) fn managed_objects_snapshot(&self) -> Vec<(ObjectPath<'static>, ManagedInterfaces)> {
        self.managed_objects.lock().expect("lock poisoned").clone()
    }

    pub fn path(&self) -> &ObjectPath<'static> {
        &self.path
    }

    fn dispatcher(&self) -> Result<Arc<Dispatcher>> {
        self.dispatcher
            .upgrade()
            .ok_or_else(|| Error::Misuse("skeleton outlived its dispatcher".to_owned()))
    }

    /// Compose `descriptor` into this object, installing `handler` for each of its methods (the
    /// `#[interface]`-generated skeleton impl calls this once per declared method at startup).
    pub fn add_interface(
        self: &Arc<Self>,
        descriptor: InterfaceDescriptor,
        handlers: Vec<(MemberName<'static>, MethodHandler)>,
    ) {
        for prop in &descriptor.properties {
            self.properties.lock().expect("lock poisoned").insert(
                (descriptor.name.clone(), prop.name.clone()),
                PropertyState {
                    descriptor: prop.clone(),
                    value: None,
                },
            );
        }
        let mut table = self.handlers.lock().expect("lock poisoned");
        for (member, handler) in handlers {
            table.insert((descriptor.name.clone(), member), handler);
        }
        self.interfaces.lock().expect("lock poisoned").push(descriptor);
    }

    pub fn interfaces(&self) -> Vec<InterfaceDescriptor> {
        self.interfaces.lock().expect("lock poisoned").clone()
    }

    /// Request ownership of the skeleton's bus name (if any) and register it with the dispatcher
    /// so inbound calls at its path are routed here.
    pub async fn register(self: &Arc<Self>) -> Result<()> {
        let dispatcher = self.dispatcher()?;
        if let Some(name) = &self.bus_name {
            dispatcher.request_name(name, 0).await?;
        }
        dispatcher.register_skeleton(self.path.clone(), self.clone());
        Ok(())
    }

    pub fn unregister(&self) -> Result<()> {
        let dispatcher = self.dispatcher()?;
        dispatcher.unregister_skeleton(&self.path);
        Ok(())
    }

    /// Set a property's current value directly (no wire traffic); used for initial values and
    /// for updates driven from outside a method handler.
    pub fn set_property_value(&self, interface: &InterfaceName<'static>, name: &str, value: Any) {
        if let Some(state) = self
            .properties
            .lock()
            .expect("lock poisoned")
            .get_mut(&(interface.clone(), MemberName::try_from(name).expect("valid member name")))
        {
            state.value = Some(value);
        }
    }

    /// Install `validator` to run on every `Properties.Set` for `name` before the backing store
    /// is updated. Only one validator may be installed per property; a later call replaces an
    /// earlier one.
    pub fn set_property_validator(
        &self,
        interface: &InterfaceName<'static>,
        name: &str,
        validator: impl Fn(Any) -> Result<Any> + Send + Sync + 'static,
    ) {
        if let Ok(member) = MemberName::try_from(name) {
            self.property_validators
                .lock()
                .expect("lock poisoned")
                .insert((interface.clone(), member), Arc::new(validator));
        }
    }

    pub fn property_value(&self, interface: &InterfaceName<'static>, name: &str) -> Option<Any> {
        self.properties
            .lock()
            .expect("lock poisoned")
            .get(&(interface.clone(), MemberName::try_from(name).ok()?))
            .and_then(|s| s.value.clone())
    }

    /// Update a property and emit `PropertiesChanged` per its access flags (`Notifying` sends the
    /// new value, `Invalidates` sends only the property name).
    pub async fn notify_property_changed(
        &self,
        interface: &InterfaceName<'static>,
        name: &str,
        value: Any,
    ) -> Result<()> {
        let member = MemberName::try_from(name).map_err(Error::from)?;
        let key = (interface.clone(), member.clone());
        let (access, notifies) = {
            let mut properties = self.properties.lock().expect("lock poisoned");
            let state = properties
                .get_mut(&key)
                .ok_or_else(|| Error::Misuse(format!("no such property `{name}` on {interface}")))?;
            state.value = Some(value.clone());
            (state.descriptor.access, state.descriptor.access.contains(PropertyAccess::Notifying))
        };

        if !access.contains(PropertyAccess::Notifying) && !access.contains(PropertyAccess::Invalidates) {
            return Ok(());
        }

        let dispatcher = self.dispatcher()?;
        let properties_interface = InterfaceName::try_from(PROPERTIES_INTERFACE).expect("valid");
        let changed_member = MemberName::try_from("PropertiesChanged").expect("valid");

        let mut changed: HashMap<String, Any> = HashMap::new();
        let mut invalidated: Vec<String> = Vec::new();
        if notifies {
            changed.insert(name.to_owned(), value);
        } else {
            invalidated.push(name.to_owned());
        }

        let signal = Message::signal(self.path.clone(), properties_interface, changed_member).with_body((
            interface.as_str().to_owned(),
            changed,
            invalidated,
        ))?;
        dispatcher.send(&signal).await
    }

    /// Emit a user-declared signal.
    pub async fn emit_signal<T: Codec>(
        &self,
        interface: InterfaceName<'static>,
        member: MemberName<'static>,
        body: T,
    ) -> Result<()> {
        let dispatcher = self.dispatcher()?;
        let signal = Message::signal(self.path.clone(), interface, member).with_body(body)?;
        dispatcher.send_oneway(signal).await
    }

    /// Send a successful reply for a non-deferred request.
    pub async fn respond_with<T: Codec>(&self, request: &Message, descriptor: &ServerRequestDescriptor, value: T) -> Result<()> {
        if descriptor.oneway {
            return Ok(());
        }
        if descriptor.replied.swap(true, Ordering::SeqCst) {
            return Err(Error::Misuse("method already replied".to_owned()));
        }
        let reply = Message::method_return(request).with_body(value)?;
        self.dispatcher()?.send(&reply).await
    }

    /// Send a declared-error reply for a non-deferred request.
    pub async fn respond_with_error(
        &self,
        request: &Message,
        descriptor: &ServerRequestDescriptor,
        name: ErrorName<'static>,
        message: Option<&str>,
    ) -> Result<()> {
        if descriptor.oneway {
            return Ok(());
        }
        if descriptor.replied.swap(true, Ordering::SeqCst) {
            return Err(Error::Misuse("method already replied".to_owned()));
        }
        let reply = Message::error(request, name, message);
        self.dispatcher()?.send(&reply).await
    }

    /// Reply to a call previously deferred via [`Request::defer_response`]. Takes the original
    /// request message since the descriptor alone doesn't carry enough to build a
    /// `METHOD_RETURN` (it only records the peer and serial).
    pub async fn respond_on<T: Codec>(&self, original_request: &Message, descriptor: &ServerRequestDescriptor, value: T) -> Result<()> {
        self.respond_with(original_request, descriptor, value).await
    }

    /// The dispatcher's single entry point for routing an inbound `METHOD_CALL` here.
    pub(crate) async fn dispatch(self: &Arc<Self>, msg: Message, member: MemberName<'static>) -> Result<()> {
        let interface_name = msg.interface().cloned();
        let sender = msg.sender().cloned();
        let oneway = msg.is_oneway();

        if interface_name.as_ref().map(|i| i.as_str()) == Some(PROPERTIES_INTERFACE) {
            return self.dispatch_properties(&msg, &member).await;
        }
        if interface_name.as_ref().map(|i| i.as_str()) == Some(INTROSPECTABLE_INTERFACE) && member.as_str() == "Introspect"
        {
            let xml = introspect::introspect(&self.interfaces());
            let reply = Message::method_return(&msg).with_body(xml)?;
            return self.dispatcher()?.send(&reply).await;
        }

        let interface = match interface_name {
            Some(i) => i,
            None => match self.resolve_member_interface(&member) {
                Some(i) => i,
                None => return self.reply_unknown_method(&msg, oneway).await,
            },
        };

        let handler = self
            .handlers
            .lock()
            .expect("lock poisoned")
            .get(&(interface.clone(), member.clone()))
            .cloned();

        let Some(handler) = handler else {
            return self.reply_unknown_method(&msg, oneway).await;
        };

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let descriptor = ServerRequestDescriptor {
            interface,
            member,
            sender,
            serial: msg.serial(),
            sequence,
            oneway,
            replied: Arc::new(AtomicBool::new(false)),
        };
        let request = Request { message: msg, descriptor };
        handler(self.clone(), request).await;
        Ok(())
    }

    fn resolve_member_interface(&self, member: &MemberName<'static>) -> Option<InterfaceName<'static>> {
        let interfaces = self.interfaces.lock().expect("lock poisoned");
        let mut matches = interfaces.iter().filter(|i| i.method(member.as_str()).is_some());
        let first = matches.next()?;
        if matches.next().is_some() {
            None
        } else {
            Some(first.name.clone())
        }
    }

    async fn reply_unknown_method(&self, msg: &Message, oneway: bool) -> Result<()> {
        if oneway {
            return Ok(());
        }
        let name = ErrorName::try_from("org.freedesktop.DBus.Error.UnknownMethod").expect("valid");
        let text = format!(
            "no such method `{}` on interface `{}`",
            msg.member().map(|m| m.as_str()).unwrap_or(""),
            msg.interface().map(|i| i.as_str()).unwrap_or("")
        );
        let reply = Message::error(msg, name, Some(&text));
        self.dispatcher()?.send(&reply).await
    }

    async fn dispatch_properties(self: &Arc<Self>, msg: &Message, member: &MemberName<'static>) -> Result<()> {
        match member.as_str() {
            "Get" => {
                let (interface, name): (String, String) = msg.body()?;
                let interface = InterfaceName::try_from(interface).map_err(Error::from)?;
                match self.property_value(&interface, &name) {
                    Some(value) => {
                        let reply = Message::method_return(msg).with_body(value)?;
                        self.dispatcher()?.send(&reply).await
                    }
                    None => self.reply_unknown_property(msg, &name).await,
                }
            }
            "GetAll" => {
                let (interface,): (String,) = msg.body()?;
                let interface = InterfaceName::try_from(interface).map_err(Error::from)?;
                let mut all: HashMap<String, Any> = HashMap::new();
                for (key, state) in self.properties.lock().expect("lock poisoned").iter() {
                    if key.0 == interface && state.descriptor.is_readable() {
                        if let Some(value) = &state.value {
                            all.insert(key.1.as_str().to_owned(), value.clone());
                        }
                    }
                }
                let reply = Message::method_return(msg).with_body(all)?;
                self.dispatcher()?.send(&reply).await
            }
            "Set" => {
                let (interface, name, value): (String, String, Any) = msg.body()?;
                let interface = InterfaceName::try_from(interface).map_err(Error::from)?;
                let writable = {
                    let member = MemberName::try_from(name.clone()).map_err(Error::from)?;
                    self.properties
                        .lock()
                        .expect("lock poisoned")
                        .get(&(interface.clone(), member))
                        .map(|s| s.descriptor.is_writable())
                };
                match writable {
                    Some(true) => {
                        let member = MemberName::try_from(name.clone()).map_err(Error::from)?;
                        let validator = self
                            .property_validators
                            .lock()
                            .expect("lock poisoned")
                            .get(&(interface.clone(), member))
                            .cloned();
                        let value = match validator {
                            Some(validate) => match validate(value) {
                                Ok(value) => value,
                                Err(e) => {
                                    let err_name = e
                                        .dbus_name()
                                        .and_then(|n| ErrorName::try_from(n.to_owned()).ok())
                                        .unwrap_or_else(|| {
                                            ErrorName::try_from("org.freedesktop.DBus.Error.InvalidArgs").expect("valid")
                                        });
                                    let reply = Message::error(msg, err_name, e.message());
                                    return self.dispatcher()?.send(&reply).await;
                                }
                            },
                            None => value,
                        };
                        self.notify_property_changed(&interface, &name, value).await?;
                        if !msg.is_oneway() {
                            let reply = Message::method_return(msg);
                            self.dispatcher()?.send(&reply).await?;
                        }
                        Ok(())
                    }
                    Some(false) => {
                        let err = ErrorName::try_from("org.freedesktop.DBus.Error.PropertyReadOnly").expect("valid");
                        let reply = Message::error(msg, err, Some(&format!("property `{name}` is not writable")));
                        self.dispatcher()?.send(&reply).await
                    }
                    None => self.reply_unknown_property(msg, &name).await,
                }
            }
            _ => self.reply_unknown_method(msg, msg.is_oneway()).await,
        }
    }

    async fn reply_unknown_property(&self, msg: &Message, name: &str) -> Result<()> {
        let err = ErrorName::try_from("org.freedesktop.DBus.Error.UnknownProperty").expect("valid");
        let reply = Message::error(msg, err, Some(&format!("no such property `{name}`")));
        self.dispatcher()?.send(&reply).await
    }
}
