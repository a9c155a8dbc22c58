//! Replicated objects and a scripted transport shared by the unit tests.

use crate::error::TransportError;
use crate::transport::Transport;
use shared::{
    CodecError, FieldWriter, InstanceSlot, InstanceTag, Message, Replicatable, TypeTag,
};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct TestObject {
    pub slot: InstanceSlot,
    pub test_bool: bool,
}

impl TestObject {
    pub const TYPE_TAG: TypeTag = TypeTag::new("TestObject");

    pub fn new(test_bool: bool) -> Self {
        Self {
            slot: InstanceSlot::new(),
            test_bool,
        }
    }
}

impl Replicatable for TestObject {
    fn type_tag(&self) -> TypeTag {
        Self::TYPE_TAG
    }

    fn instance_tag(&self) -> InstanceTag {
        self.slot.get()
    }

    fn initialize_instance(&mut self, instance_tag: InstanceTag) -> bool {
        self.slot.initialize(instance_tag)
    }

    fn encode(&self, fields: &mut FieldWriter) -> Result<(), CodecError> {
        fields.write(self.test_bool);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TestObjectInt {
    pub slot: InstanceSlot,
    pub test_int: i32,
}

impl TestObjectInt {
    pub const TYPE_TAG: TypeTag = TypeTag::new("TestObjectInt");

    pub fn new(test_int: i32) -> Self {
        Self {
            slot: InstanceSlot::new(),
            test_int,
        }
    }
}

impl Replicatable for TestObjectInt {
    fn type_tag(&self) -> TypeTag {
        Self::TYPE_TAG
    }

    fn instance_tag(&self) -> InstanceTag {
        self.slot.get()
    }

    fn initialize_instance(&mut self, instance_tag: InstanceTag) -> bool {
        self.slot.initialize(instance_tag)
    }

    fn encode(&self, fields: &mut FieldWriter) -> Result<(), CodecError> {
        fields.write(self.test_int);
        Ok(())
    }
}

/// Transport whose inbound traffic is scripted and whose outbound traffic is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub inbound: VecDeque<Message>,
    pub sent: Vec<Message>,
    /// Clients whose sends fail with `OutboundFull`
    pub full_for: Vec<u32>,
}

impl MockTransport {
    pub fn queue_message(&mut self, message: Message) {
        self.inbound.push_back(message);
    }
}

impl Transport for MockTransport {
    fn poll(&mut self) -> Option<Message> {
        self.inbound.pop_front()
    }

    fn send(&mut self, message: Message) -> Result<(), TransportError> {
        if self.full_for.contains(&message.client_id) {
            return Err(TransportError::OutboundFull {
                client_id: message.client_id,
            });
        }
        self.sent.push(message);
        Ok(())
    }
}

/// Object with no fields.
#[derive(Debug, Default)]
pub struct TestMarker {
    pub slot: InstanceSlot,
}

impl Replicatable for TestMarker {
    fn type_tag(&self) -> TypeTag {
        TypeTag::new("TestMarker")
    }

    fn instance_tag(&self) -> InstanceTag {
        self.slot.get()
    }

    fn initialize_instance(&mut self, instance_tag: InstanceTag) -> bool {
        self.slot.initialize(instance_tag)
    }

    fn encode(&self, _fields: &mut FieldWriter) -> Result<(), CodecError> {
        Ok(())
    }
}
