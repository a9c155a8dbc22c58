//! Performance benchmarks for the replication hot paths

use server::registry::{handle_of, Registry, ReplicaHandle};
use shared::{
    decode_snapshot, CodecError, FieldWriter, InstanceSlot, InstanceTag, Replicatable, TypeTag,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

const TYPE_TAGS: [&str; 4] = ["Player", "Projectile", "Pickup", "Door"];

struct Entity {
    slot: InstanceSlot,
    type_tag: TypeTag,
    position: (f32, f32),
    velocity: (f32, f32),
    health: u16,
}

impl Entity {
    fn new(index: usize) -> Self {
        let offset = index as f32;
        Self {
            slot: InstanceSlot::new(),
            type_tag: TypeTag::new(TYPE_TAGS[index % TYPE_TAGS.len()]),
            position: (offset, -offset),
            velocity: (1.5, 0.0),
            health: 100,
        }
    }
}

impl Replicatable for Entity {
    fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    fn instance_tag(&self) -> InstanceTag {
        self.slot.get()
    }

    fn initialize_instance(&mut self, instance_tag: InstanceTag) -> bool {
        self.slot.initialize(instance_tag)
    }

    fn encode(&self, fields: &mut FieldWriter) -> Result<(), CodecError> {
        fields
            .write(self.position.0)
            .write(self.position.1)
            .write(self.velocity.0)
            .write(self.velocity.1)
            .write(self.health);
        Ok(())
    }
}

fn populate(registry: &mut Registry, count: usize) -> Vec<Rc<RefCell<Entity>>> {
    let entities: Vec<_> = (0..count)
        .map(|i| Rc::new(RefCell::new(Entity::new(i))))
        .collect();
    for entity in &entities {
        registry.register(&handle_of(entity)).unwrap();
    }
    entities
}

/// Benchmarks snapshot encoding for a mid-sized world
#[test]
fn benchmark_snapshot_encoding() {
    let mut registry = Registry::new();
    let _entities = populate(&mut registry, 1_000);

    let iterations = 200;
    let start = Instant::now();

    let mut bytes = 0;
    for _ in 0..iterations {
        bytes += registry.snapshot().unwrap().len();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot encoding: {} runs of 1000 objects in {:?} ({:.2} μs each, {} bytes)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64,
        bytes / iterations
    );

    // 60 Hz leaves ~16ms per tick; encoding must take a small slice of that
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks decoding the snapshots a client receives
#[test]
fn benchmark_snapshot_decoding() {
    let mut registry = Registry::new();
    let _entities = populate(&mut registry, 1_000);
    let bytes = registry.snapshot().unwrap();

    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        let snapshot = decode_snapshot(&bytes).unwrap();
        assert_eq!(snapshot.object_count(), 1_000);
    }

    let duration = start.elapsed();
    println!(
        "Snapshot decoding: {} iterations in {:?} ({:.2} μs/snapshot)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2_000);
}

/// Stress test registering and unregistering many objects
#[test]
fn stress_test_register_unregister() {
    let mut registry = Registry::new();
    let entities: Vec<_> = (0..2_000)
        .map(|i| Rc::new(RefCell::new(Entity::new(i))))
        .collect();
    let handles: Vec<ReplicaHandle> = entities.iter().map(handle_of).collect();

    let start = Instant::now();

    for handle in &handles {
        registry.register(handle).unwrap();
    }
    assert_eq!(registry.object_count(), 2_000);
    assert_eq!(registry.len(), TYPE_TAGS.len());

    for handle in handles.iter().rev() {
        assert!(registry.unregister(handle));
    }

    let duration = start.elapsed();
    println!(
        "Register/unregister: 2000 objects in {:?} ({:.2} μs/object)",
        duration,
        duration.as_micros() as f64 / 2_000.0
    );

    assert!(registry.is_empty());
    assert_eq!(registry.snapshot().unwrap(), vec![0x80]);
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks snapshot size growth as the world fills up
#[test]
fn benchmark_snapshot_size_scaling() {
    let mut registry = Registry::new();
    let mut entities = Vec::new();
    let mut last_size = registry.snapshot().unwrap().len();

    for batch in 0..10 {
        for i in 0..100 {
            let entity = Rc::new(RefCell::new(Entity::new(batch * 100 + i)));
            registry.register(&handle_of(&entity)).unwrap();
            entities.push(entity);
        }

        let size = registry.snapshot().unwrap().len();
        assert!(size > last_size);
        last_size = size;
    }

    println!(
        "Snapshot size with {} objects: {} bytes ({:.1} bytes/object)",
        entities.len(),
        last_size,
        last_size as f64 / entities.len() as f64
    );
}
