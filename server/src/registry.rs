//! Replication registry
//!
//! Tracks every object that should appear in snapshots, grouped by type tag,
//! and hands out instance tags. The registry only ever holds [`Weak`] handles:
//! it never keeps an object alive and never mutates it beyond assigning its
//! instance tag once. Owners unregister a handle before dropping the object,
//! which [`Replicated`] does automatically.
//!
//! Buckets are kept in the order their type tag was first registered and
//! objects inside a bucket in registration order, so two registries built by
//! the same sequence of calls produce byte-identical snapshots.
//!
//! The registry is single-threaded by contract and lives on the tick thread.

use crate::error::ReplicationError;
use log::{debug, error};
use shared::{InstanceTag, Replicatable, SnapshotEncoder, TypeTag};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

/// First instance tag handed out; 0 means "uninitialized"
const FIRST_INSTANCE_TAG: InstanceTag = 1;

/// Non-owning reference to a replicated object.
pub type ReplicaHandle = Weak<RefCell<dyn Replicatable>>;

/// Creates the registry handle for an object the caller owns.
pub fn handle_of<T: Replicatable + 'static>(object: &Rc<RefCell<T>>) -> ReplicaHandle {
    let handle: Weak<RefCell<T>> = Rc::downgrade(object);
    handle
}

struct Bucket {
    type_tag: TypeTag,
    handles: Vec<ReplicaHandle>,
}

/// Typed table of replicated objects: type tag to handles in registration order.
pub struct Registry {
    buckets: Vec<Bucket>,
    next_instance_tag: InstanceTag,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            next_instance_tag: FIRST_INSTANCE_TAG,
        }
    }

    fn bucket_index(&self, type_tag: TypeTag) -> Option<usize> {
        self.buckets
            .iter()
            .position(|bucket| bucket.type_tag == type_tag)
    }

    /// Registers an object and assigns it the next instance tag.
    ///
    /// Checks run in a fixed order: dead handle, exhausted counter, handle
    /// already present, object already carrying a tag. A failed call leaves
    /// the registry and the counter untouched.
    pub fn register(&mut self, handle: &ReplicaHandle) -> Result<InstanceTag, ReplicationError> {
        let object = handle.upgrade().ok_or(ReplicationError::NullHandle)?;

        if self.next_instance_tag == InstanceTag::MAX {
            return Err(ReplicationError::IdExhausted);
        }

        let type_tag = object
            .try_borrow()
            .map_err(|_| ReplicationError::HandleBusy)?
            .type_tag();

        let index = self.bucket_index(type_tag);
        if let Some(index) = index {
            if self.buckets[index]
                .handles
                .iter()
                .any(|registered| registered.ptr_eq(handle))
            {
                return Err(ReplicationError::AlreadyRegistered { type_tag });
            }
        }

        let instance_tag = self.next_instance_tag;
        {
            let mut object = object
                .try_borrow_mut()
                .map_err(|_| ReplicationError::HandleBusy)?;
            if !object.initialize_instance(instance_tag) {
                return Err(ReplicationError::AlreadyInitialized {
                    type_tag,
                    existing: object.instance_tag(),
                });
            }
        }
        self.next_instance_tag += 1;

        match index {
            Some(index) => self.buckets[index].handles.push(handle.clone()),
            None => self.buckets.push(Bucket {
                type_tag,
                handles: vec![handle.clone()],
            }),
        }

        debug!("Registered {} instance {}", type_tag, instance_tag);
        Ok(instance_tag)
    }

    /// Removes a handle; its bucket goes away with its last handle.
    ///
    /// Unregistering a handle that is not present has no effect and returns
    /// `false`. Works for handles whose object is already gone.
    pub fn unregister(&mut self, handle: &ReplicaHandle) -> bool {
        for index in 0..self.buckets.len() {
            let bucket = &mut self.buckets[index];
            if let Some(position) = bucket
                .handles
                .iter()
                .position(|registered| registered.ptr_eq(handle))
            {
                bucket.handles.remove(position);
                debug!("Unregistered {} handle", bucket.type_tag);

                if bucket.handles.is_empty() {
                    self.buckets.remove(index);
                }
                return true;
            }
        }
        false
    }

    /// Encodes every registered object into one snapshot payload.
    pub fn snapshot(&self) -> Result<Vec<u8>, ReplicationError> {
        let mut encoder = SnapshotEncoder::new(self.buckets.len())?;

        for bucket in &self.buckets {
            encoder.begin_bucket(bucket.type_tag, bucket.handles.len())?;
            for handle in &bucket.handles {
                let object = handle
                    .upgrade()
                    .ok_or(ReplicationError::CorruptRegistry {
                        type_tag: bucket.type_tag,
                    })?;
                let object = object
                    .try_borrow()
                    .map_err(|_| ReplicationError::HandleBusy)?;
                encoder.write_object(&*object)?;
            }
        }

        Ok(encoder.finish()?)
    }

    /// Current contents, buckets in first-registration order.
    pub fn objects(&self) -> impl Iterator<Item = (TypeTag, &[ReplicaHandle])> + '_ {
        self.buckets
            .iter()
            .map(|bucket| (bucket.type_tag, bucket.handles.as_slice()))
    }

    pub fn bucket(&self, type_tag: TypeTag) -> Option<&[ReplicaHandle]> {
        self.bucket_index(type_tag)
            .map(|index| self.buckets[index].handles.as_slice())
    }

    pub fn contains(&self, handle: &ReplicaHandle) -> bool {
        self.buckets.iter().any(|bucket| {
            bucket
                .handles
                .iter()
                .any(|registered| registered.ptr_eq(handle))
        })
    }

    /// Number of type buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn object_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.handles.len()).sum()
    }

    pub fn next_instance_tag(&self) -> InstanceTag {
        self.next_instance_tag
    }

    #[cfg(test)]
    pub(crate) fn set_next_instance_tag(&mut self, instance_tag: InstanceTag) {
        self.next_instance_tag = instance_tag;
    }
}

/// Owns a replicated object and keeps it registered for as long as it lives.
///
/// Creating one registers the object; dropping it unregisters. The borrow of
/// the registry guarantees the registry outlives every object registered
/// through it.
pub struct Replicated<'r, T: Replicatable + 'static> {
    registry: &'r RefCell<Registry>,
    object: Rc<RefCell<T>>,
    handle: ReplicaHandle,
}

impl<'r, T: Replicatable + 'static> Replicated<'r, T> {
    pub fn new(registry: &'r RefCell<Registry>, object: T) -> Result<Self, ReplicationError> {
        let object = Rc::new(RefCell::new(object));
        let handle = handle_of(&object);

        registry
            .try_borrow_mut()
            .map_err(|_| ReplicationError::RegistryBusy)?
            .register(&handle)?;

        Ok(Self {
            registry,
            object,
            handle,
        })
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.object.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.object.borrow_mut()
    }

    pub fn object(&self) -> &Rc<RefCell<T>> {
        &self.object
    }

    pub fn handle(&self) -> &ReplicaHandle {
        &self.handle
    }

    pub fn instance_tag(&self) -> InstanceTag {
        self.object.borrow().instance_tag()
    }
}

impl<T: Replicatable + 'static> Drop for Replicated<'_, T> {
    fn drop(&mut self) {
        match self.registry.try_borrow_mut() {
            Ok(mut registry) => {
                registry.unregister(&self.handle);
            }
            Err(_) => {
                error!("Registry busy while dropping a replicated object; handle left behind")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestMarker, TestObject, TestObjectInt};
    use shared::{decode_snapshot, Field, UNINITIALIZED_INSTANCE};

    fn shared_object<T>(object: T) -> Rc<RefCell<T>> {
        Rc::new(RefCell::new(object))
    }

    #[test]
    fn test_single_bool_object_snapshot_bytes() {
        let mut registry = Registry::new();
        let object = shared_object(TestObject::new(true));
        registry.register(&handle_of(&object)).unwrap();

        let expected = vec![
            0x81, 0xaa, 0x54, 0x65, 0x73, 0x74, 0x4f, 0x62, 0x6a, 0x65, 0x63, 0x74, 0x81, 0x01,
            0x91, 0xc3,
        ];
        assert_eq!(registry.snapshot().unwrap(), expected);
    }

    #[test]
    fn test_register_then_unregister() {
        let mut registry = Registry::new();
        let object = shared_object(TestObject::new(false));
        let handle = handle_of(&object);

        registry.register(&handle).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.bucket(TestObject::TYPE_TAG).unwrap().len(), 1);

        assert!(registry.unregister(&handle));
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
        assert!(registry.bucket(TestObject::TYPE_TAG).is_none());
    }

    #[test]
    fn test_two_distinct_types() {
        let mut registry = Registry::new();
        let first = shared_object(TestObject::new(false));
        let second = shared_object(TestObjectInt::new(1));

        registry.register(&handle_of(&first)).unwrap();
        registry.register(&handle_of(&second)).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.bucket(TestObject::TYPE_TAG).unwrap().len(), 1);
        assert_eq!(registry.bucket(TestObjectInt::TYPE_TAG).unwrap().len(), 1);
        assert_eq!(first.borrow().instance_tag(), 1);
        assert_eq!(second.borrow().instance_tag(), 2);
    }

    #[test]
    fn test_double_registration_rejected() {
        let mut registry = Registry::new();
        let object = shared_object(TestObject::new(true));
        let handle = handle_of(&object);

        registry.register(&handle).unwrap();
        let before = registry.snapshot().unwrap();

        match registry.register(&handle) {
            Err(ReplicationError::AlreadyRegistered { type_tag }) => {
                assert_eq!(type_tag, TestObject::TYPE_TAG)
            }
            other => panic!("Expected AlreadyRegistered, got {:?}", other),
        }

        assert_eq!(registry.object_count(), 1);
        assert_eq!(registry.next_instance_tag(), 2);
        assert_eq!(registry.snapshot().unwrap(), before);
    }

    #[test]
    fn test_id_exhaustion() {
        let mut registry = Registry::new();
        registry.set_next_instance_tag(InstanceTag::MAX);
        let object = shared_object(TestObject::new(true));

        assert!(matches!(
            registry.register(&handle_of(&object)),
            Err(ReplicationError::IdExhausted)
        ));
        assert!(registry.is_empty());
        assert_eq!(registry.next_instance_tag(), InstanceTag::MAX);
        assert_eq!(object.borrow().instance_tag(), UNINITIALIZED_INSTANCE);
    }

    #[test]
    fn test_null_handle_rejected() {
        let mut registry = Registry::new();
        let handle = {
            let object = shared_object(TestObject::new(true));
            handle_of(&object)
        };

        assert!(matches!(
            registry.register(&handle),
            Err(ReplicationError::NullHandle)
        ));
        assert!(registry.is_empty());
        assert_eq!(registry.next_instance_tag(), 1);
    }

    #[test]
    fn test_already_initialized_rejected_without_side_effects() {
        let mut registry = Registry::new();
        let mut preset = TestObject::new(true);
        assert!(preset.initialize_instance(77));
        let object = shared_object(preset);

        match registry.register(&handle_of(&object)) {
            Err(ReplicationError::AlreadyInitialized { existing, .. }) => assert_eq!(existing, 77),
            other => panic!("Expected AlreadyInitialized, got {:?}", other),
        }

        assert!(registry.is_empty());
        assert_eq!(registry.next_instance_tag(), 1);
        assert_eq!(object.borrow().instance_tag(), 77);
    }

    #[test]
    fn test_busy_object_rejected() {
        let mut registry = Registry::new();
        let object = shared_object(TestObject::new(true));
        let _guard = object.borrow_mut();

        assert!(matches!(
            registry.register(&handle_of(&object)),
            Err(ReplicationError::HandleBusy)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_absent_handle_is_noop() {
        let mut registry = Registry::new();
        let registered = shared_object(TestObject::new(true));
        let stranger = shared_object(TestObject::new(false));
        registry.register(&handle_of(&registered)).unwrap();

        assert!(!registry.unregister(&handle_of(&stranger)));
        assert_eq!(registry.object_count(), 1);
    }

    #[test]
    fn test_register_unregister_pair_restores_snapshot() {
        let mut registry = Registry::new();
        let a = shared_object(TestObject::new(true));
        let b = shared_object(TestObjectInt::new(5));
        registry.register(&handle_of(&a)).unwrap();
        let only_a = registry.snapshot().unwrap();

        // Into a brand new bucket
        let b_handle = handle_of(&b);
        registry.register(&b_handle).unwrap();
        assert!(registry.unregister(&b_handle));
        assert_eq!(registry.snapshot().unwrap(), only_a);
        assert_eq!(registry.len(), 1);

        // Into an existing bucket
        let c = shared_object(TestObject::new(false));
        let c_handle = handle_of(&c);
        registry.register(&c_handle).unwrap();
        assert!(registry.unregister(&c_handle));
        assert_eq!(registry.snapshot().unwrap(), only_a);
    }

    #[test]
    fn test_bucket_order_survives_removal_of_middle_bucket() {
        let mut registry = Registry::new();
        let a = shared_object(TestObject::new(true));
        let b = shared_object(TestObjectInt::new(2));
        let c = shared_object(TestMarker::default());
        let b_handle = handle_of(&b);
        registry.register(&handle_of(&a)).unwrap();
        registry.register(&b_handle).unwrap();
        registry.register(&handle_of(&c)).unwrap();

        registry.unregister(&b_handle);

        let order: Vec<&str> = registry.objects().map(|(tag, _)| tag.as_str()).collect();
        assert_eq!(order, vec!["TestObject", "TestMarker"]);
    }

    #[test]
    fn test_instance_tags_positive_and_distinct() {
        let mut registry = Registry::new();
        let objects: Vec<_> = (0..10).map(|i| shared_object(TestObjectInt::new(i))).collect();
        for object in &objects {
            registry.register(&handle_of(object)).unwrap();
        }

        let mut tags: Vec<InstanceTag> = objects
            .iter()
            .map(|o| o.borrow().instance_tag())
            .collect();
        assert!(tags.iter().all(|tag| *tag > 0));
        assert_eq!(tags, (1..=10).collect::<Vec<_>>());
        tags.dedup();
        assert_eq!(tags.len(), 10);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_tags_not_reused_after_unregister() {
        let mut registry = Registry::new();
        let first = shared_object(TestObject::new(true));
        let first_handle = handle_of(&first);
        registry.register(&first_handle).unwrap();
        registry.unregister(&first_handle);

        let second = shared_object(TestObject::new(true));
        assert_eq!(registry.register(&handle_of(&second)).unwrap(), 2);
    }

    #[test]
    fn test_snapshot_grows_with_registrations() {
        let mut registry = Registry::new();
        let mut last = registry.snapshot().unwrap().len();
        let objects: Vec<_> = (0..5).map(|i| shared_object(TestObjectInt::new(i))).collect();

        for object in &objects {
            registry.register(&handle_of(object)).unwrap();
            let size = registry.snapshot().unwrap().len();
            assert!(size > last);
            last = size;
        }
    }

    #[test]
    fn test_snapshot_decodes_to_registry_contents() {
        let mut registry = Registry::new();
        let a = shared_object(TestObject::new(true));
        let b = shared_object(TestObjectInt::new(-4));
        let c = shared_object(TestObject::new(false));
        for handle in [handle_of(&a), handle_of(&b), handle_of(&c)] {
            registry.register(&handle).unwrap();
        }

        let snapshot = decode_snapshot(&registry.snapshot().unwrap()).unwrap();

        assert_eq!(snapshot.buckets.len(), registry.len());
        for ((type_tag, handles), bucket) in registry.objects().zip(&snapshot.buckets) {
            assert_eq!(type_tag.as_str(), bucket.type_tag);
            let tags: Vec<InstanceTag> = handles
                .iter()
                .map(|h| h.upgrade().unwrap().borrow().instance_tag())
                .collect();
            let decoded: Vec<InstanceTag> =
                bucket.instances.iter().map(|i| i.instance_tag).collect();
            assert_eq!(tags, decoded);
        }
        assert_eq!(snapshot.instance(2).unwrap().1.fields, vec![Field::Int(-4)]);
        assert_eq!(snapshot.instance(3).unwrap().1.fields, vec![Field::Bool(false)]);
    }

    #[test]
    fn test_dropped_object_corrupts_snapshot() {
        let mut registry = Registry::new();
        let object = shared_object(TestObject::new(true));
        let handle = handle_of(&object);
        registry.register(&handle).unwrap();
        drop(object);

        assert!(matches!(
            registry.snapshot(),
            Err(ReplicationError::CorruptRegistry { .. })
        ));

        // The dead handle can still be removed
        assert!(registry.unregister(&handle));
        assert_eq!(registry.snapshot().unwrap(), vec![0x80]);
    }

    #[test]
    fn test_replicated_registers_and_unregisters() {
        let registry = RefCell::new(Registry::new());
        {
            let object = Replicated::new(&registry, TestObject::new(false)).unwrap();
            assert_eq!(object.instance_tag(), 1);
            assert_eq!(registry.borrow().object_count(), 1);
            assert!(registry.borrow().contains(object.handle()));

            object.borrow_mut().test_bool = true;
            let snapshot = decode_snapshot(&registry.borrow().snapshot().unwrap()).unwrap();
            assert_eq!(snapshot.instance(1).unwrap().1.fields, vec![Field::Bool(true)]);
        }
        assert!(registry.borrow().is_empty());
    }

    #[test]
    fn test_replicated_surfaces_registry_errors() {
        let registry = RefCell::new(Registry::new());
        registry.borrow_mut().set_next_instance_tag(InstanceTag::MAX);

        assert!(matches!(
            Replicated::new(&registry, TestObject::new(true)),
            Err(ReplicationError::IdExhausted)
        ));
        assert!(registry.borrow().is_empty());
    }
}
