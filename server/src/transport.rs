//! Transport contract between the tick engine and the network
//!
//! A transport moves [`Message`]s between the tick engine and connected
//! clients. Neither operation may block the tick thread: `poll` returns
//! immediately when nothing is buffered and `send` only enqueues.

use crate::error::TransportError;
use shared::Message;

pub trait Transport {
    /// Next buffered inbound message, or `None` if nothing is waiting.
    ///
    /// The first message for a newly connected client has an empty body.
    fn poll(&mut self) -> Option<Message>;

    /// Enqueues an outbound message; delivery is best-effort.
    fn send(&mut self, message: Message) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn poll(&mut self) -> Option<Message> {
        (**self).poll()
    }

    fn send(&mut self, message: Message) -> Result<(), TransportError> {
        (**self).send(message)
    }
}
