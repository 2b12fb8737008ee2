//! [`PendingCall`]: correlates a sent method call with its eventual reply, including the timeout
//! and cancellation rules that can resolve it before a reply ever arrives.

use std::time::{Duration, Instant};

use crate::error::Error;
use crate::message::Message;

/// The outcome delivered to a pending call's continuation: the raw reply message on success, or
/// a typed/transport error. The stub's generic `call` decodes the message body once this
/// resolves; keeping the pending-call table itself message-typed (not generic over `Out`) is
/// what lets the dispatcher hold every outstanding call in one homogeneous map.
pub type CallResult = Result<Message, Error>;

/// Per-invocation overrides recognized by the call engine: currently just `timeout`.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

/// An outstanding method call awaiting a reply, a typed error, or a timeout.
pub struct PendingCall {
    pub(crate) serial: u32,
    pub(crate) deadline: Instant,
    pub(crate) responder: Box<dyn FnOnce(CallResult) + Send>,
}

impl PendingCall {
    pub fn new(
        serial: u32,
        deadline: Instant,
        responder: impl FnOnce(CallResult) + Send + 'static,
    ) -> Self {
        Self {
            serial,
            deadline,
            responder: Box::new(responder),
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Deliver the outcome to the registered continuation, consuming this entry. The dispatcher
    /// calls this exactly once per pending call, whether from a matching reply, a fired timeout,
    /// or cancellation — never more than once.
    pub fn resolve(self, result: CallResult) {
        (self.responder)(result)
    }
}
