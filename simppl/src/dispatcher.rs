//! The single-threaded cooperative event loop: owns one bus connection, the
//! pending-call table, the registered skeletons, the signal subscriber table, and name-owner
//! tracking.
//!
//! Shared state lives behind a `Mutex` with `Event`-based wakeups; each I/O round reads whatever
//! messages are available and routes each decoded `Message` to whichever table claims it
//! (pending-call, skeleton, or signal subscriber).

use std::collections::{HashMap, HashSet, VecDeque};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use event_listener::Event;
use futures_util::future::Either;
use simppl_codec::ObjectPath;
use simppl_names::{BusName, ErrorName, InterfaceName, MemberName};

use crate::address::transport::unix::UnixPath;
use crate::address::{Address, Transport};
use crate::connection::Connection;
use crate::error::Error;
use crate::message::{Message, MessageType};
use crate::pending_call::{CallOptions, CallResult, PendingCall};
use crate::skeleton::Skeleton;
use crate::stub::ConnectionState;
use crate::Result;

const DBUS_BUS_PATH: &str = "/org/freedesktop/DBus";
const DBUS_BUS_INTERFACE: &str = "org.freedesktop.DBus";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Reply codes of `org.freedesktop.DBus.RequestName` (spec's "Dispatcher — supplement").
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestNameReply {
    PrimaryOwner,
    InQueue,
    Exists,
    AlreadyOwner,
}

impl RequestNameReply {
    fn from_wire(code: u32) -> Self {
        match code {
            1 => RequestNameReply::PrimaryOwner,
            2 => RequestNameReply::InQueue,
            3 => RequestNameReply::Exists,
            _ => RequestNameReply::AlreadyOwner,
        }
    }

    pub fn is_owner(self) -> bool {
        matches!(self, RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner)
    }
}

type SignalKey = (ObjectPath<'static>, InterfaceName<'static>, MemberName<'static>);

struct SignalSubscriber {
    id: u64,
    handler: Box<dyn Fn(&Message) + Send + Sync>,
}

/// A still-installed signal subscription; `Dispatcher::detach_signal` consumes it.
pub struct SignalSubscription {
    key: SignalKey,
    id: u64,
}

/// Configures a [`Dispatcher`] before it owns a connection.
pub struct DispatcherBuilder {
    request_timeout: Duration,
}

impl DispatcherBuilder {
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resolve `address` (`"bus:session"`, `"bus:system"`, or an explicit address string),
    /// connect a Unix socket to it, run the client SASL handshake, and say `Hello` to obtain our
    /// unique bus name.
    pub async fn connect(self, address: &str) -> Result<Arc<Dispatcher>> {
        let stream = match address {
            "bus:session" => connect_unix(&Address::session()?)?,
            "bus:system" => connect_unix(&Address::system()?)?,
            other => connect_unix(&Address::parse(other)?)?,
        };
        let connection = Connection::new(stream);
        connection.handshake().await?;

        let dispatcher = Dispatcher::new(connection, self.request_timeout);
        let unique_name = dispatcher.hello().await?;
        *dispatcher.unique_name.lock().expect("lock poisoned") = Some(unique_name);
        Ok(dispatcher)
    }

    /// Build a dispatcher directly over an already-connected (and already-authenticated, for a
    /// real broker, or loopback) [`Connection`] — used by tests driving a `UnixStream::pair()`
    /// transport where there is no broker to say `Hello` to.
    pub fn build(self, connection: Connection) -> Arc<Dispatcher> {
        Dispatcher::new(connection, self.request_timeout)
    }
}

fn connect_unix(addr: &Address<'_>) -> Result<UnixStream> {
    for transport in addr.transports() {
        if let Transport::Unix(unix) = transport {
            if let UnixPath::File(path) = unix.path() {
                return UnixStream::connect(Path::new(&**path)).map_err(Error::from);
            }
        }
    }
    Err(Error::Address(
        "no connectable unix:path= transport in address (abstract/tcp/autolaunch/launchd/vsock \
         are not supported by this build's connector)"
            .to_owned(),
    ))
}

/// Owner of one bus connection and its event loop.
pub struct Dispatcher {
    connection: Connection,
    unique_name: Mutex<Option<BusName<'static>>>,
    next_serial: AtomicU32,
    next_subscriber_id: AtomicU64,
    next_stub_id: AtomicU64,
    default_timeout: Duration,
    running: AtomicBool,

    pending_calls: Mutex<HashMap<u32, PendingCall>>,
    pending_call_owners: Mutex<HashMap<u32, u64>>,
    skeletons: Mutex<HashMap<ObjectPath<'static>, Arc<Skeleton>>>,
    owned_names: Mutex<HashSet<BusName<'static>>>,

    signal_subscribers: Mutex<HashMap<SignalKey, Vec<SignalSubscriber>>>,
    connection_hooks: Mutex<HashMap<BusName<'static>, Vec<Box<dyn Fn(ConnectionState) + Send + Sync>>>>,
    peer_states: Mutex<HashMap<BusName<'static>, ConnectionState>>,

    notify_queue: Mutex<VecDeque<Box<dyn FnOnce(&Dispatcher) + Send>>>,
    notify_event: Event,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder {
            request_timeout: DEFAULT_TIMEOUT,
        }
    }

    fn new(connection: Connection, default_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            connection,
            unique_name: Mutex::new(None),
            next_serial: AtomicU32::new(1),
            next_subscriber_id: AtomicU64::new(1),
            next_stub_id: AtomicU64::new(1),
            default_timeout,
            running: AtomicBool::new(true),
            pending_calls: Mutex::new(HashMap::new()),
            pending_call_owners: Mutex::new(HashMap::new()),
            skeletons: Mutex::new(HashMap::new()),
            owned_names: Mutex::new(HashSet::new()),
            signal_subscribers: Mutex::new(HashMap::new()),
            connection_hooks: Mutex::new(HashMap::new()),
            peer_states: Mutex::new(HashMap::new()),
            notify_queue: Mutex::new(VecDeque::new()),
            notify_event: Event::new(),
        })
    }

    pub fn unique_name(&self) -> Option<BusName<'static>> {
        self.unique_name.lock().expect("lock poisoned").clone()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub(crate) fn next_serial(&self) -> u32 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_stub_id(&self) -> u64 {
        self.next_stub_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Post a closure to run on the dispatcher's own thread the next time its loop drains the
    /// notify queue. This is the only sanctioned way to interact with the dispatcher from a
    /// foreign thread.
    pub fn post(&self, f: impl FnOnce(&Dispatcher) + Send + 'static) {
        self.notify_queue.lock().expect("lock poisoned").push_back(Box::new(f));
        self.notify_event.notify(usize::MAX);
    }

    fn drain_notify(&self) {
        loop {
            let next = self.notify_queue.lock().expect("lock poisoned").pop_front();
            match next {
                Some(f) => f(self),
                None => break,
            }
        }
    }

    /// Run the loop until [`Dispatcher::stop`] is called.
    pub async fn run(&self) -> Result<()> {
        while self.running.load(Ordering::Acquire) {
            self.step(None).await?;
        }
        Ok(())
    }

    /// Do one I/O round, waiting at most `timeout` (or until the nearest pending-call deadline,
    /// whichever is sooner) for a message to arrive.
    pub async fn step(&self, timeout: Option<Duration>) -> Result<()> {
        self.drain_notify();
        self.fire_expired();

        let wait = self.nearest_wait(timeout);
        let recv = futures_util::future::select(
            Box::pin(self.connection.receive()),
            Box::pin(async_io::Timer::after(wait)),
        );
        match recv.await {
            Either::Left((msg, _)) => {
                self.dispatch(msg?).await?;
            }
            Either::Right(_) => {
                self.fire_expired();
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn nearest_wait(&self, step_timeout: Option<Duration>) -> Duration {
        let now = Instant::now();
        let nearest_deadline = self
            .pending_calls
            .lock()
            .expect("lock poisoned")
            .values()
            .map(PendingCall::deadline)
            .min();
        let from_deadline = nearest_deadline.map(|d| d.saturating_duration_since(now));
        match (step_timeout, from_deadline) {
            (Some(t), Some(d)) => t.min(d),
            (Some(t), None) => t,
            (None, Some(d)) => d,
            (None, None) => Duration::from_secs(3600),
        }
    }

    fn fire_expired(&self) {
        let now = Instant::now();
        let expired: Vec<PendingCall> = {
            let mut calls = self.pending_calls.lock().expect("lock poisoned");
            let expired_serials: Vec<u32> = calls
                .iter()
                .filter(|(_, c)| c.deadline() <= now)
                .map(|(s, _)| *s)
                .collect();
            expired_serials
                .into_iter()
                .filter_map(|s| calls.remove(&s))
                .collect()
        };
        for call in expired {
            self.pending_call_owners.lock().expect("lock poisoned").remove(&call.serial());
            call.resolve(Err(Error::timeout()));
        }
    }

    /// Cancel every pending call owned by stub `stub_id`. Called when a stub is dropped while it
    /// still has outstanding calls.
    pub(crate) fn cancel_stub_calls(&self, stub_id: u64) {
        let serials: Vec<u32> = {
            let owners = self.pending_call_owners.lock().expect("lock poisoned");
            owners
                .iter()
                .filter(|(_, owner)| **owner == stub_id)
                .map(|(serial, _)| *serial)
                .collect()
        };
        for serial in serials {
            self.pending_call_owners.lock().expect("lock poisoned").remove(&serial);
            if let Some(call) = self.pending_calls.lock().expect("lock poisoned").remove(&serial) {
                call.resolve(Err(Error::cancelled()));
            }
        }
    }

    async fn dispatch(&self, msg: Message) -> Result<()> {
        match msg.message_type() {
            MessageType::MethodReturn | MessageType::Error => {
                if let Some(serial) = msg.reply_serial() {
                    self.resolve_pending(serial, &msg);
                }
            }
            MessageType::Signal => {
                self.dispatch_signal(&msg);
            }
            MessageType::MethodCall => {
                self.dispatch_call(msg).await?;
            }
            MessageType::Invalid => {}
        }
        Ok(())
    }

    fn resolve_pending(&self, serial: u32, msg: &Message) {
        let call = self.pending_calls.lock().expect("lock poisoned").remove(&serial);
        self.pending_call_owners.lock().expect("lock poisoned").remove(&serial);
        if let Some(call) = call {
            let result: CallResult = if msg.message_type() == MessageType::Error {
                Err(Error::runtime(
                    msg.error_name().map(|n| n.as_str().to_owned()).unwrap_or_default(),
                    msg.error_message(),
                ))
            } else {
                Ok(msg.clone())
            };
            call.resolve(result);
        }
    }

    fn dispatch_signal(&self, msg: &Message) {
        if msg.interface().map(|i| i.as_str()) == Some(DBUS_BUS_INTERFACE)
            && msg.member().map(|m| m.as_str()) == Some("NameOwnerChanged")
        {
            if let Ok((name, _old, new)) = msg.body::<(String, String, String)>() {
                if let Ok(bus_name) = BusName::try_from(name) {
                    let state = if new.is_empty() {
                        ConnectionState::Disconnected
                    } else {
                        ConnectionState::Connected
                    };
                    self.peer_states.lock().expect("lock poisoned").insert(bus_name.clone(), state);
                    if let Some(hooks) = self.connection_hooks.lock().expect("lock poisoned").get(&bus_name) {
                        for hook in hooks {
                            hook(state);
                        }
                    }
                }
            }
            return;
        }
        let (Some(path), Some(interface), Some(member)) = (msg.path(), msg.interface(), msg.member()) else {
            return;
        };
        let key = (path.clone(), interface.clone(), member.clone());
        if let Some(subs) = self.signal_subscribers.lock().expect("lock poisoned").get(&key) {
            for sub in subs {
                (sub.handler)(msg);
            }
        }
    }

    async fn dispatch_call(&self, msg: Message) -> Result<()> {
        let Some(path) = msg.path().cloned() else { return Ok(()) };
        let Some(member) = msg.member().cloned() else { return Ok(()) };

        let skeleton = self.skeletons.lock().expect("lock poisoned").get(&path).cloned();
        let Some(skeleton) = skeleton else {
            if !msg.is_oneway() {
                let reply = Message::error(
                    &msg,
                    ErrorName::try_from("org.freedesktop.DBus.Error.UnknownObject").expect("valid"),
                    Some(&format!("no object at path {path}")),
                );
                self.connection.send(&reply).await?;
            }
            return Ok(());
        };

        skeleton.dispatch(self, msg, member).await
    }

    /// Send `msg` with a fresh serial and no reply expectation (oneway methods, signals).
    pub(crate) async fn send_oneway(&self, mut msg: Message) -> Result<()> {
        msg.set_serial(self.next_serial());
        self.connection.send(&msg).await
    }

    /// Send `msg` and register a pending call resolved by the dispatch loop.
    pub(crate) async fn call(&self, mut msg: Message, options: &CallOptions, stub_id: u64) -> Result<Message> {
        let serial = self.next_serial();
        msg.set_serial(serial);
        let deadline = Instant::now() + options.effective_timeout(self.default_timeout);

        let slot = Arc::new(crate::dispatcher::OnceSlot::new());
        let slot_for_responder = slot.clone();
        let pending = PendingCall::new(serial, deadline, move |result| slot_for_responder.set(result));
        self.pending_calls.lock().expect("lock poisoned").insert(serial, pending);
        self.pending_call_owners.lock().expect("lock poisoned").insert(serial, stub_id);

        self.connection.send(&msg).await?;
        slot.wait().await
    }

    /// A focused read loop used for calls made before `run()` is driving the loop (e.g. the
    /// initial `Hello`): reads messages directly, dispatching anything that isn't the awaited
    /// reply, until the reply with `reply_serial == serial` arrives or `timeout` elapses.
    async fn call_blocking_raw(&self, mut msg: Message, timeout: Duration) -> Result<Message> {
        let serial = self.next_serial();
        msg.set_serial(serial);
        self.connection.send(&msg).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout());
            }
            let recv = futures_util::future::select(
                Box::pin(self.connection.receive()),
                Box::pin(async_io::Timer::after(remaining)),
            );
            match recv.await {
                Either::Left((received, _)) => {
                    let received = received?;
                    if received.reply_serial() == Some(serial) {
                        if received.message_type() == MessageType::Error {
                            return Err(Error::runtime(
                                received.error_name().map(|n| n.as_str().to_owned()).unwrap_or_default(),
                                received.error_message(),
                            ));
                        }
                        return Ok(received);
                    }
                    self.dispatch(received).await?;
                }
                Either::Right(_) => return Err(Error::timeout()),
            }
        }
    }

    async fn hello(&self) -> Result<BusName<'static>> {
        let path = ObjectPath::try_from(DBUS_BUS_PATH.to_owned()).expect("valid");
        let member = MemberName::try_from("Hello").expect("valid");
        let interface = InterfaceName::try_from(DBUS_BUS_INTERFACE).expect("valid");
        let call = Message::method_call(path, member)
            .with_interface(interface)
            .with_destination(BusName::try_from(DBUS_BUS_INTERFACE).expect("valid"));
        let reply = self.call_blocking_raw(call, self.default_timeout).await?;
        let name: String = reply.body()?;
        BusName::try_from(name).map_err(Error::from)
    }

    /// `org.freedesktop.DBus.RequestName`, used when a skeleton registers.
    pub(crate) async fn request_name(&self, name: &BusName<'static>, flags: u32) -> Result<RequestNameReply> {
        let path = ObjectPath::try_from(DBUS_BUS_PATH.to_owned()).expect("valid");
        let member = MemberName::try_from("RequestName").expect("valid");
        let interface = InterfaceName::try_from(DBUS_BUS_INTERFACE).expect("valid");
        let call = Message::method_call(path, member)
            .with_interface(interface)
            .with_destination(BusName::try_from(DBUS_BUS_INTERFACE).expect("valid"))
            .with_body((name.as_str().to_owned(), flags))?;
        let reply = self.call_blocking_raw(call, self.default_timeout).await?;
        let code: u32 = reply.body()?;
        let reply_code = RequestNameReply::from_wire(code);
        if reply_code.is_owner() {
            self.owned_names.lock().expect("lock poisoned").insert(name.clone());
        }
        Ok(reply_code)
    }

    pub(crate) fn register_skeleton(&self, path: ObjectPath<'static>, skeleton: Arc<Skeleton>) {
        self.skeletons.lock().expect("lock poisoned").insert(path, skeleton);
    }

    pub(crate) fn unregister_skeleton(&self, path: &ObjectPath<'static>) {
        self.skeletons.lock().expect("lock poisoned").remove(path);
    }

    pub(crate) fn skeleton_at(&self, path: &ObjectPath<'static>) -> Option<Arc<Skeleton>> {
        self.skeletons.lock().expect("lock poisoned").get(path).cloned()
    }

    pub(crate) fn all_skeletons(&self) -> Vec<(ObjectPath<'static>, Arc<Skeleton>)> {
        self.skeletons
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(p, s)| (p.clone(), s.clone()))
            .collect()
    }

    pub(crate) async fn send(&self, msg: &Message) -> Result<()> {
        self.connection.send(msg).await
    }

    pub(crate) fn attach_signal(
        &self,
        path: ObjectPath<'static>,
        interface: InterfaceName<'static>,
        member: MemberName<'static>,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> SignalSubscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let key = (path, interface, member);
        self.signal_subscribers
            .lock()
            .expect("lock poisoned")
            .entry(key.clone())
            .or_default()
            .push(SignalSubscriber {
                id,
                handler: Box::new(handler),
            });
        SignalSubscription { key, id }
    }

    pub(crate) fn detach_signal(&self, subscription: SignalSubscription) {
        let mut subscribers = self.signal_subscribers.lock().expect("lock poisoned");
        if let Some(subs) = subscribers.get_mut(&subscription.key) {
            subs.retain(|s| s.id != subscription.id);
            if subs.is_empty() {
                subscribers.remove(&subscription.key);
            }
        }
    }

    pub(crate) fn attach_connection_hook(
        &self,
        service: BusName<'static>,
        hook: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) {
        self.connection_hooks
            .lock()
            .expect("lock poisoned")
            .entry(service)
            .or_default()
            .push(Box::new(hook));
    }

    pub(crate) fn peer_state(&self, service: &BusName<'static>) -> ConnectionState {
        self.peer_states
            .lock()
            .expect("lock poisoned")
            .get(service)
            .copied()
            .unwrap_or(ConnectionState::Connected)
    }
}

/// A tiny single-value async rendezvous used to resolve a pending call's continuation without
/// pulling in an executor-specific oneshot channel (the crate supports both `async-io` and
/// `tokio` backends via feature flags, and `event_listener` works with either).
pub(crate) struct OnceSlot<T> {
    value: Mutex<Option<T>>,
    event: Event,
}

impl<T> OnceSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: Mutex::new(None),
            event: Event::new(),
        }
    }

    pub(crate) fn set(&self, v: T) {
        *self.value.lock().expect("lock poisoned") = Some(v);
        self.event.notify(usize::MAX);
    }

    pub(crate) async fn wait(&self) -> T {
        loop {
            if let Some(v) = self.value.lock().expect("lock poisoned").take() {
                return v;
            }
            let listener = self.event.listen();
            if self.value.lock().expect("lock poisoned").is_some() {
                continue;
            }
            listener.await;
        }
    }
}
