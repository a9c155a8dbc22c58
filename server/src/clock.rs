//! Built-in replicated object the server binary runs when no game is plugged in

use crate::error::ReplicationError;
use crate::registry::{Registry, Replicated};
use crate::tick::Simulation;
use shared::{CodecError, FieldWriter, InstanceSlot, InstanceTag, Replicatable, TypeTag};
use std::cell::RefCell;

/// Tick counter and simulated time, replicated as `[tick, server_time]`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ServerClock {
    slot: InstanceSlot,
    pub tick: u64,
    pub server_time: f64,
}

impl ServerClock {
    pub const TYPE_TAG: TypeTag = TypeTag::new("ServerClock");

    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, delta_time: f64) {
        self.tick += 1;
        self.server_time += delta_time;
    }
}

impl Replicatable for ServerClock {
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
        fields.write(self.tick).write(self.server_time);
        Ok(())
    }
}

/// Simulation that only advances a registered [`ServerClock`].
pub struct ClockSimulation<'r> {
    clock: Replicated<'r, ServerClock>,
}

impl<'r> ClockSimulation<'r> {
    pub fn new(registry: &'r RefCell<Registry>) -> Result<Self, ReplicationError> {
        Ok(Self {
            clock: Replicated::new(registry, ServerClock::new())?,
        })
    }

    pub fn clock(&self) -> &Replicated<'r, ServerClock> {
        &self.clock
    }
}

impl Simulation for ClockSimulation<'_> {
    fn update(&mut self, delta_time: f64) {
        self.clock.borrow_mut().advance(delta_time);
    }
}
