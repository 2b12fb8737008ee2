//! Introspection XML: renders a skeleton's registered
//! [`InterfaceDescriptor`]s as the `org.freedesktop.DBus.Introspectable.Introspect` document a
//! peer expects back.
//!
//! No templating engine — the document is small and its shape is fixed, so a handful of
//! `write!` calls against a `String` is clearer than pulling in a builder.

use std::fmt::Write as _;

use crate::interface::{InterfaceDescriptor, PropertyAccess};

const DOCTYPE: &str = r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">"#;

/// Render `interfaces` as an introspection XML document. `interfaces` is expected to already
/// include the standard `org.freedesktop.DBus.{Introspectable,Properties}` entries a skeleton
/// always answers for; this function has no opinion on which interfaces are present, it only
/// renders what it is given.
pub fn introspect(interfaces: &[InterfaceDescriptor]) -> String {
    let mut xml = String::new();
    xml.push_str(DOCTYPE);
    xml.push('\n');
    xml.push_str("<node>\n");
    for interface in interfaces {
        write_interface(&mut xml, interface);
    }
    xml.push_str("</node>\n");
    xml
}

fn write_interface(xml: &mut String, interface: &InterfaceDescriptor) {
    let _ = writeln!(xml, "  <interface name=\"{}\">", interface.name.as_str());

    for method in &interface.methods {
        let _ = writeln!(xml, "    <method name=\"{}\">", method.name.as_str());
        write_args(xml, &method.in_signature, "in");
        write_args(xml, &method.out_signature, "out");
        if let Some(error) = &method.throws {
            let _ = writeln!(
                xml,
                "      <annotation name=\"org.freedesktop.DBus.Error\" value=\"{}\"/>",
                error
            );
        }
        xml.push_str("    </method>\n");
    }

    for signal in &interface.signals {
        let _ = writeln!(xml, "    <signal name=\"{}\">", signal.name.as_str());
        write_args(xml, &signal.signature, "out");
        xml.push_str("    </signal>\n");
    }

    for property in &interface.properties {
        let access = if property.is_readable() && property.is_writable() {
            "readwrite"
        } else if property.is_writable() {
            "write"
        } else {
            "read"
        };
        let _ = writeln!(
            xml,
            "    <property name=\"{}\" type=\"{}\" access=\"{}\">",
            property.name.as_str(),
            property.signature.as_str(),
            access
        );
        if property.access.contains(PropertyAccess::Invalidates) {
            xml.push_str(
                "      <annotation name=\"org.freedesktop.DBus.Property.EmitsChangedSignal\" value=\"invalidates\"/>\n",
            );
        } else if property.access.contains(PropertyAccess::Notifying) {
            xml.push_str(
                "      <annotation name=\"org.freedesktop.DBus.Property.EmitsChangedSignal\" value=\"true\"/>\n",
            );
        } else {
            xml.push_str(
                "      <annotation name=\"org.freedesktop.DBus.Property.EmitsChangedSignal\" value=\"false\"/>\n",
            );
        }
        xml.push_str("    </property>\n");
    }

    xml.push_str("  </interface>\n");
}

/// A method/signal signature is a flat sequence of complete types; split it into one `<arg>`
/// per top-level type rather than emitting the whole signature as a single blob, since that is
/// what real introspection documents (and `busctl introspect`) show.
fn write_args(xml: &mut String, signature: &simppl_codec::Signature<'_>, direction: &str) {
    for ty in split_top_level_signatures(signature.as_str()) {
        if direction == "in" {
            let _ = writeln!(xml, "      <arg type=\"{}\" direction=\"in\"/>", ty);
        } else {
            let _ = writeln!(xml, "      <arg type=\"{}\" direction=\"out\"/>", ty);
        }
    }
}

/// Split a D-Bus signature string into its top-level complete types, respecting nested
/// `()`/`{}` containers (a dict entry or struct is one type, not one per character).
fn split_top_level_signatures(signature: &str) -> Vec<String> {
    let mut types = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in signature.chars() {
        match c {
            '(' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | '}' => {
                depth -= 1;
                current.push(c);
            }
            'a' if depth == 0 => {
                current.push(c);
                continue;
            }
            _ => {
                current.push(c);
            }
        }
        if depth == 0 && !current.ends_with('a') {
            types.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        types.push(current);
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{MethodDescriptor, PropertyDescriptor, SignalDescriptor};
    use enumflags2::BitFlags;
    use simppl_codec::Signature;
    use simppl_names::{InterfaceName, MemberName};

    fn sample_interface() -> InterfaceDescriptor {
        InterfaceDescriptor {
            name: InterfaceName::try_from("test.Sample").unwrap(),
            methods: vec![MethodDescriptor {
                name: MemberName::try_from("Echo").unwrap(),
                in_signature: Signature::from_str_unchecked("s"),
                out_signature: Signature::from_str_unchecked("s"),
                oneway: false,
                throws: None,
            }],
            signals: vec![SignalDescriptor {
                name: MemberName::try_from("Pinged").unwrap(),
                signature: Signature::from_str_unchecked("i"),
            }],
            properties: vec![PropertyDescriptor {
                name: MemberName::try_from("Count").unwrap(),
                signature: Signature::from_str_unchecked("i"),
                access: BitFlags::from(PropertyAccess::Readable) | PropertyAccess::Notifying,
            }],
        }
    }

    #[test]
    fn renders_doctype_and_node_wrapper() {
        let xml = introspect(&[]);
        assert!(xml.starts_with("<!DOCTYPE node"));
        assert!(xml.contains("<node>"));
        assert!(xml.ends_with("</node>\n"));
    }

    #[test]
    fn renders_method_args_and_direction() {
        let xml = introspect(&[sample_interface()]);
        assert!(xml.contains(r#"<interface name="test.Sample">"#));
        assert!(xml.contains(r#"<method name="Echo">"#));
        assert!(xml.contains(r#"<arg type="s" direction="in"/>"#));
        assert!(xml.contains(r#"<arg type="s" direction="out"/>"#));
    }

    #[test]
    fn renders_signal_args_as_out_only() {
        let xml = introspect(&[sample_interface()]);
        assert!(xml.contains(r#"<signal name="Pinged">"#));
        assert!(xml.contains(r#"<arg type="i" direction="out"/>"#));
    }

    #[test]
    fn renders_property_access_and_emits_changed_annotation() {
        let xml = introspect(&[sample_interface()]);
        assert!(xml.contains(r#"<property name="Count" type="i" access="read">"#));
        assert!(xml.contains(
            r#"<annotation name="org.freedesktop.DBus.Property.EmitsChangedSignal" value="true"/>"#
        ));
    }

    #[test]
    fn splits_nested_container_types_as_single_args() {
        let types = split_top_level_signatures("a{sv}oi");
        assert_eq!(types, vec!["a{sv}".to_owned(), "o".to_owned(), "i".to_owned()]);
    }

    #[test]
    fn splits_struct_and_array_of_struct() {
        let types = split_top_level_signatures("(oa{sa{sv}})a(si)");
        assert_eq!(
            types,
            vec!["(oa{sa{sv}})".to_owned(), "a(si)".to_owned()]
        );
    }
}
