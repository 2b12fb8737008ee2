//! The D-Bus message envelope: primary header, extended header fields, and body.
//!
//! The extended header fields are encoded as `a(yv)` — conveniently exactly the wire shape of
//! `Vec<(u8, Any)>`, so no bespoke struct-array logic is needed here: the generic array/tuple
//! `Codec` impls already do the right thing.

use enumflags2::{bitflags, BitFlags};
use simppl_codec::{ByteOrder, Codec, Context, Error as CodecError, ObjectPath, Reader, Result as CodecResult, Signature, Type, Writer};
use simppl_names::{BusName, ErrorName, InterfaceName, MemberName};

use crate::any::Any;

const PROTOCOL_VERSION: u8 = 1;

/// D-Bus wire code for message byte order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndianSig {
    Big,
    Little,
}

impl EndianSig {
    pub const NATIVE: EndianSig = if cfg!(target_endian = "big") {
        EndianSig::Big
    } else {
        EndianSig::Little
    };

    fn sig(self) -> u8 {
        match self {
            EndianSig::Big => b'B',
            EndianSig::Little => b'l',
        }
    }

    fn try_from_sig(v: u8) -> CodecResult<Self> {
        match v {
            b'B' => Ok(EndianSig::Big),
            b'l' => Ok(EndianSig::Little),
            _ => Err(CodecError::Message(format!("invalid endianness byte {v:#x}"))),
        }
    }
}

/// The D-Bus message type (primary header byte 1).
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    Invalid = 0,
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

impl From<u8> for MessageType {
    fn from(v: u8) -> Self {
        match v {
            1 => MessageType::MethodCall,
            2 => MessageType::MethodReturn,
            3 => MessageType::Error,
            4 => MessageType::Signal,
            _ => MessageType::Invalid,
        }
    }
}

/// Primary header flags; oneway calls set `NoReplyExpected`.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flags {
    NoReplyExpected = 0x1,
    NoAutoStart = 0x2,
    AllowInteractiveAuth = 0x4,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FieldCode {
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

/// A full D-Bus message: primary header, extended header fields, and an already-encoded body.
///
/// The body is kept as raw bytes (rather than a generic `T`) because a received message's body
/// type isn't known until the dispatcher resolves `(path, interface, member)` against a
/// registered skeleton or pending call; [`Message::body`] decodes it against the caller's chosen
/// `T` at that point.
#[derive(Debug, Clone)]
pub struct Message {
    message_type: MessageType,
    flags: BitFlags<Flags>,
    serial: u32,
    path: Option<ObjectPath<'static>>,
    interface: Option<InterfaceName<'static>>,
    member: Option<MemberName<'static>>,
    error_name: Option<ErrorName<'static>>,
    reply_serial: Option<u32>,
    destination: Option<BusName<'static>>,
    sender: Option<BusName<'static>>,
    signature: Signature<'static>,
    body: Vec<u8>,
}

impl Message {
    /// Build an outgoing `METHOD_CALL`.
    pub fn method_call(path: ObjectPath<'static>, member: MemberName<'static>) -> Self {
        Self {
            message_type: MessageType::MethodCall,
            flags: BitFlags::empty(),
            serial: 0,
            path: Some(path),
            interface: None,
            member: Some(member),
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: Signature::from_str_unchecked(""),
            body: Vec::new(),
        }
    }

    /// Build an outgoing `SIGNAL`.
    pub fn signal(path: ObjectPath<'static>, interface: InterfaceName<'static>, member: MemberName<'static>) -> Self {
        Self {
            message_type: MessageType::Signal,
            flags: BitFlags::empty(),
            serial: 0,
            path: Some(path),
            interface: Some(interface),
            member: Some(member),
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: Signature::from_str_unchecked(""),
            body: Vec::new(),
        }
    }

    /// Build a `METHOD_RETURN` replying to `call`.
    pub fn method_return(call: &Message) -> Self {
        Self {
            message_type: MessageType::MethodReturn,
            flags: BitFlags::empty(),
            serial: 0,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: Some(call.serial),
            destination: call.sender.clone(),
            sender: None,
            signature: Signature::from_str_unchecked(""),
            body: Vec::new(),
        }
    }

    /// Build an `ERROR` reply to `call`.
    pub fn error(call: &Message, name: ErrorName<'static>, message: Option<&str>) -> Self {
        let mut msg = Self {
            message_type: MessageType::Error,
            flags: BitFlags::empty(),
            serial: 0,
            path: None,
            interface: None,
            member: None,
            error_name: Some(name),
            reply_serial: Some(call.serial),
            destination: call.sender.clone(),
            sender: None,
            signature: Signature::from_str_unchecked(""),
            body: Vec::new(),
        };
        if let Some(text) = message {
            msg = msg.with_body(text.to_owned()).expect("string always encodes");
        }
        msg
    }

    pub fn with_interface(mut self, interface: InterfaceName<'static>) -> Self {
        self.interface = Some(interface);
        self
    }

    pub fn with_destination(mut self, destination: BusName<'static>) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_sender(mut self, sender: BusName<'static>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_flags(mut self, flags: BitFlags<Flags>) -> Self {
        self.flags = flags;
        self
    }

    /// Encode `body` as this message's body, recording its signature.
    ///
    /// `T::signature()` wraps a tuple body in `(...)`, since that is also how a genuine nested
    /// struct is represented; a message body is a flat argument list rather than a single
    /// struct, so the outer parens are stripped via [`Signature::as_body`] before recording it.
    pub fn with_body<T: Codec>(mut self, body: T) -> CodecResult<Self> {
        self.signature = T::signature().as_body();
        self.body = encode_body(&body)?;
        Ok(self)
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn flags(&self) -> BitFlags<Flags> {
        self.flags
    }

    pub fn is_oneway(&self) -> bool {
        self.flags.contains(Flags::NoReplyExpected)
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn set_serial(&mut self, serial: u32) {
        self.serial = serial;
    }

    pub fn path(&self) -> Option<&ObjectPath<'static>> {
        self.path.as_ref()
    }

    pub fn interface(&self) -> Option<&InterfaceName<'static>> {
        self.interface.as_ref()
    }

    pub fn member(&self) -> Option<&MemberName<'static>> {
        self.member.as_ref()
    }

    pub fn error_name(&self) -> Option<&ErrorName<'static>> {
        self.error_name.as_ref()
    }

    pub fn reply_serial(&self) -> Option<u32> {
        self.reply_serial
    }

    pub fn destination(&self) -> Option<&BusName<'static>> {
        self.destination.as_ref()
    }

    pub fn sender(&self) -> Option<&BusName<'static>> {
        self.sender.as_ref()
    }

    pub fn signature(&self) -> &Signature<'static> {
        &self.signature
    }

    /// Decode the message body as `T`, checking its signature matches first.
    pub fn body<T: Codec>(&self) -> CodecResult<T> {
        let expected = T::signature().as_body();
        if self.signature.as_str() != expected.as_str() {
            return Err(CodecError::SignatureMismatch {
                expected: expected.to_string(),
                actual: self.signature.to_string(),
            });
        }
        let ctxt = Context::<byteorder::NativeEndian>::new(0);
        let mut r = Reader::new(&self.body, ctxt);
        T::decode(&mut r)
    }

    /// The first string argument of an error body, the conventional human-readable message.
    pub fn error_message(&self) -> Option<String> {
        if self.signature.as_str() != "s" {
            return None;
        }
        self.body::<String>().ok()
    }

    /// Serialize the full message (primary header, extended header, body) to bytes.
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let ctxt = Context::<byteorder::NativeEndian>::new(0);
        let mut w = Writer::new(ctxt);
        w.write_u8(EndianSig::NATIVE.sig());
        w.write_u8(self.message_type as u8);
        w.write_u8(self.flags.bits());
        w.write_u8(PROTOCOL_VERSION);
        w.write_u32(self.body.len() as u32);
        w.write_u32(self.serial);

        let fields = self.encode_fields()?;
        fields.encode(&mut w)?;
        w.align(8);
        w.write_bytes(&self.body);
        Ok(w.into_bytes())
    }

    fn encode_fields(&self) -> CodecResult<Vec<(u8, Any)>> {
        let mut fields = Vec::new();
        if let Some(path) = &self.path {
            fields.push((FieldCode::Path as u8, Any::new(path.clone())));
        }
        if let Some(interface) = &self.interface {
            fields.push((FieldCode::Interface as u8, Any::new(interface.as_str().to_owned())));
        }
        if let Some(member) = &self.member {
            fields.push((FieldCode::Member as u8, Any::new(member.as_str().to_owned())));
        }
        if let Some(error_name) = &self.error_name {
            fields.push((FieldCode::ErrorName as u8, Any::new(error_name.as_str().to_owned())));
        }
        if let Some(reply_serial) = self.reply_serial {
            fields.push((FieldCode::ReplySerial as u8, Any::new(reply_serial)));
        }
        if let Some(destination) = &self.destination {
            fields.push((FieldCode::Destination as u8, Any::new(destination.as_str().to_owned())));
        }
        if let Some(sender) = &self.sender {
            fields.push((FieldCode::Sender as u8, Any::new(sender.as_str().to_owned())));
        }
        if !self.signature.is_empty() {
            fields.push((FieldCode::Signature as u8, Any::new(self.signature.clone())));
        }
        Ok(fields)
    }

    /// Parse a full message out of `data`, returning the message and the number of bytes
    /// consumed (the caller's framing loop uses this to know where the next message starts).
    pub fn from_bytes(data: &[u8]) -> CodecResult<(Self, usize)> {
        if data.len() < 16 {
            return Err(CodecError::InsufficientData);
        }
        let endian = EndianSig::try_from_sig(data[0])?;
        match endian {
            EndianSig::Little => Self::from_bytes_endian::<byteorder::LittleEndian>(data),
            EndianSig::Big => Self::from_bytes_endian::<byteorder::BigEndian>(data),
        }
    }

    fn from_bytes_endian<B: ByteOrder>(data: &[u8]) -> CodecResult<(Self, usize)> {
        let ctxt = Context::<B>::new(0);
        let mut r = Reader::new(data, ctxt);
        let _endian = r.read_u8()?;
        let message_type = MessageType::from(r.read_u8()?);
        let flags_byte = r.read_u8()?;
        let flags = BitFlags::<Flags>::from_bits(flags_byte)
            .map_err(|_| CodecError::Message(format!("invalid message flags {flags_byte:#x}")))?;
        let _protocol_version = r.read_u8()?;
        let body_len = r.read_u32()? as usize;
        let serial = r.read_u32()?;

        let fields = Vec::<(u8, Any)>::decode(&mut r)?;
        r.align(8)?;

        let mut msg = Message {
            message_type,
            flags,
            serial,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: Signature::from_str_unchecked(""),
            body: Vec::new(),
        };

        for (code, value) in fields {
            match code {
                c if c == FieldCode::Path as u8 => {
                    msg.path = Some(value.get::<ObjectPath<'static>>()?);
                }
                c if c == FieldCode::Interface as u8 => {
                    msg.interface = Some(
                        InterfaceName::try_from(value.get::<String>()?)
                            .map_err(|e| CodecError::Message(e.to_string()))?,
                    );
                }
                c if c == FieldCode::Member as u8 => {
                    msg.member = Some(
                        MemberName::try_from(value.get::<String>()?)
                            .map_err(|e| CodecError::Message(e.to_string()))?,
                    );
                }
                c if c == FieldCode::ErrorName as u8 => {
                    msg.error_name = Some(
                        ErrorName::try_from(value.get::<String>()?)
                            .map_err(|e| CodecError::Message(e.to_string()))?,
                    );
                }
                c if c == FieldCode::ReplySerial as u8 => {
                    msg.reply_serial = Some(value.get::<u32>()?);
                }
                c if c == FieldCode::Destination as u8 => {
                    msg.destination = Some(
                        BusName::try_from(value.get::<String>()?)
                            .map_err(|e| CodecError::Message(e.to_string()))?,
                    );
                }
                c if c == FieldCode::Sender as u8 => {
                    msg.sender = Some(
                        BusName::try_from(value.get::<String>()?)
                            .map_err(|e| CodecError::Message(e.to_string()))?,
                    );
                }
                c if c == FieldCode::Signature as u8 => {
                    msg.signature = value.get::<Signature<'static>>()?;
                }
                _ => {} // unknown fields (e.g. UnixFds) are ignored
            }
        }

        let body_start = r.position();
        let body_end = body_start + body_len;
        let total = body_end;
        if data.len() < total {
            return Err(CodecError::InsufficientData);
        }
        msg.body = data[body_start..body_end].to_vec();
        Ok((msg, total))
    }
}

fn encode_body<T: Codec>(value: &T) -> CodecResult<Vec<u8>> {
    let ctxt = Context::<byteorder::NativeEndian>::new(0);
    let mut w = Writer::new(ctxt);
    value.encode(&mut w)?;
    Ok(w.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_call_round_trips() {
        let path = ObjectPath::try_from("/org/example/Foo".to_owned()).unwrap();
        let member = MemberName::try_from("Echo").unwrap();
        let interface = InterfaceName::try_from("org.example.Foo").unwrap();
        let mut msg = Message::method_call(path, member)
            .with_interface(interface)
            .with_body("Hello World!".to_owned())
            .unwrap();
        msg.set_serial(7);

        let bytes = msg.to_bytes().unwrap();
        let (decoded, consumed) = Message::from_bytes(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.message_type(), MessageType::MethodCall);
        assert_eq!(decoded.serial(), 7);
        assert_eq!(decoded.member().unwrap().as_str(), "Echo");
        assert_eq!(decoded.body::<String>().unwrap(), "Hello World!");
    }

    #[test]
    fn error_reply_carries_message() {
        let path = ObjectPath::try_from("/org/example/Foo".to_owned()).unwrap();
        let member = MemberName::try_from("Hello").unwrap();
        let mut call = Message::method_call(path, member);
        call.set_serial(3);

        let err_name = ErrorName::try_from("My.Exception").unwrap();
        let reply = Message::error(&call, err_name, Some("boom"));
        assert_eq!(reply.reply_serial(), Some(3));
        assert_eq!(reply.error_message().as_deref(), Some("boom"));
    }

    #[test]
    fn empty_body_round_trips() {
        let path = ObjectPath::try_from("/".to_owned()).unwrap();
        let member = MemberName::try_from("Ping").unwrap();
        let msg = Message::method_call(path, member);
        let bytes = msg.to_bytes().unwrap();
        let (decoded, _) = Message::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.signature().as_str(), "");
    }
}
