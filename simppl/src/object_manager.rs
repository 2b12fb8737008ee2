//! `org.freedesktop.DBus.ObjectManager`: aggregated child-object lifecycle, reported through
//! `GetManagedObjects` and the `InterfacesAdded` / `InterfacesRemoved` signals.
//!
//! Uses the same table-lookup dispatch idiom the rest of `skeleton.rs` uses for
//! `Properties`/`Introspectable`: rather than special-casing `GetManagedObjects` inside
//! [`Skeleton::dispatch`], [`ObjectManagerExt::enable_object_manager`] composes it onto the
//! skeleton through the ordinary [`Skeleton::add_interface`] path, so the dispatch routing itself
//! never needs to know ObjectManager exists.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use simppl_codec::{ObjectPath, Signature};
use simppl_names::{InterfaceName, MemberName};

use crate::any::Any;
use crate::interface::{InterfaceDescriptor, MethodDescriptor, SignalDescriptor};
use crate::skeleton::Skeleton;
use crate::Result;

const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";

/// Extends [`Skeleton`] with `org.freedesktop.DBus.ObjectManager` semantics: the skeleton this
/// trait is used on becomes the root that aggregates the lifecycle of every object registered
/// under it via [`ObjectManagerExt::add_managed_object`].
#[async_trait]
pub trait ObjectManagerExt {
    /// Compose the `ObjectManager` interface onto this skeleton so `GetManagedObjects` answers
    /// from its managed-object table. Call once, before [`Skeleton::register`].
    fn enable_object_manager(self: &Arc<Self>);

    /// Register a child object's interfaces and their current property values, emitting
    /// `InterfacesAdded`. Children registered in sequence deliver their `InterfacesAdded`
    /// signals to subscribers in that same registration order.
    async fn add_managed_object(
        self: &Arc<Self>,
        path: ObjectPath<'static>,
        interfaces: HashMap<String, HashMap<String, Any>>,
    ) -> Result<()>;

    /// Unregister a child object, emitting `InterfacesRemoved` naming every interface it exposed.
    /// A path that was never added is a no-op (no signal is emitted).
    async fn remove_managed_object(self: &Arc<Self>, path: &ObjectPath<'static>) -> Result<()>;
}

#[async_trait]
impl ObjectManagerExt for Skeleton {
    fn enable_object_manager(self: &Arc<Self>) {
        let interface_name = InterfaceName::try_from(OBJECT_MANAGER_INTERFACE).expect("valid");
        let get_managed_objects = MemberName::try_from("GetManagedObjects").expect("valid");

        let descriptor = InterfaceDescriptor {
            name: interface_name.clone(),
            methods: vec![MethodDescriptor {
                name: get_managed_objects.clone(),
                in_signature: Signature::from_str_unchecked(""),
                out_signature: Signature::from_str_unchecked("a{oa{sa{sv}}}"),
                oneway: false,
                throws: None,
            }],
            // Signal bodies are encoded as Rust tuples, which this crate's `Type` impl wraps in
            // a D-Bus STRUCT container (see DESIGN.md's note on multi-argument bodies), so these
            // record the parenthesized form actually written to the wire.
            signals: vec![
                SignalDescriptor {
                    name: MemberName::try_from("InterfacesAdded").expect("valid"),
                    signature: Signature::from_str_unchecked("(oa{sa{sv}})"),
                },
                SignalDescriptor {
                    name: MemberName::try_from("InterfacesRemoved").expect("valid"),
                    signature: Signature::from_str_unchecked("(oas)"),
                },
            ],
            properties: vec![],
        };

        let handler: crate::skeleton::MethodHandler = Arc::new(|skeleton, request| {
            Box::pin(async move {
                let snapshot = skeleton.managed_objects_snapshot();
                let reply: HashMap<ObjectPath<'static>, HashMap<String, HashMap<String, Any>>> =
                    snapshot.into_iter().collect();
                let descriptor = request.descriptor().clone();
                let msg = request.message().clone();
                let _ = skeleton.respond_with(&msg, &descriptor, reply).await;
            })
        });

        self.add_interface(descriptor, vec![(get_managed_objects, handler)]);
    }

    async fn add_managed_object(
        self: &Arc<Self>,
        path: ObjectPath<'static>,
        interfaces: HashMap<String, HashMap<String, Any>>,
    ) -> Result<()> {
        self.insert_managed_object(path.clone(), interfaces.clone());
        let object_manager_interface = InterfaceName::try_from(OBJECT_MANAGER_INTERFACE).expect("valid");
        let member = MemberName::try_from("InterfacesAdded").expect("valid");
        self.emit_signal(object_manager_interface, member, (path, interfaces)).await
    }

    async fn remove_managed_object(self: &Arc<Self>, path: &ObjectPath<'static>) -> Result<()> {
        let Some(interfaces) = self.remove_managed_object_entry(path) else {
            return Ok(());
        };
        let names: Vec<String> = interfaces.into_keys().collect();
        let object_manager_interface = InterfaceName::try_from(OBJECT_MANAGER_INTERFACE).expect("valid");
        let member = MemberName::try_from("InterfacesRemoved").expect("valid");
        self.emit_signal(object_manager_interface, member, (path.clone(), names)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::Connection;

    fn sample_interfaces(value: i32) -> HashMap<String, HashMap<String, Any>> {
        let mut props = HashMap::new();
        props.insert("Value".to_owned(), Any::new(value));
        let mut interfaces = HashMap::new();
        interfaces.insert("test.Child".to_owned(), props);
        interfaces
    }

    #[tokio::test]
    async fn get_managed_objects_reflects_additions_and_removals() {
        let (_client_conn, server_conn) = Connection::unix_stream_pair().unwrap();
        let server = Dispatcher::builder().build(server_conn);
        let root = ObjectPath::try_from("/test".to_owned()).unwrap();
        let skeleton = Skeleton::new(&server, root, None);
        skeleton.enable_object_manager();
        skeleton.register().await.unwrap();

        assert!(skeleton.managed_objects_snapshot().is_empty());

        let child_one = ObjectPath::try_from("/test/One/s".to_owned()).unwrap();
        let child_two = ObjectPath::try_from("/test/Super".to_owned()).unwrap();
        skeleton
            .add_managed_object(child_one.clone(), sample_interfaces(1))
            .await
            .unwrap();
        skeleton
            .add_managed_object(child_two.clone(), sample_interfaces(2))
            .await
            .unwrap();

        let snapshot = skeleton.managed_objects_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, child_one);
        assert_eq!(snapshot[1].0, child_two);

        skeleton.remove_managed_object(&child_one).await.unwrap();
        let snapshot = skeleton.managed_objects_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, child_two);
    }
}
