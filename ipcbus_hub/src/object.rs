// Bus objects and the per-endpoint object table.
//
// A `BusObject` is a unit of addressable service logic hosted on an
// endpoint. Application code creates it (`BusObject::new`), keeps the
// `Arc`, and attaches/detaches it with `Endpoint::add_object` /
// `Endpoint::remove_object`. The endpoint only manages table membership: it
// holds a clone of the `Arc` while the object is attached and never drops
// the object on the application's behalf.
//
// Behaviour is supplied through `ObjectHooks`: authentication of a session
// and online/offline/unsubscribe notifications. The endpoint itself is the
// implicit "main" object and takes the same hooks.
//
// `ObjectTable` is the endpoint's private table: the id map, the class-id
// allocator used for objects that arrive without an id, and the sequence
// counter that makes every attach produce a fresh composite id.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ipcbus_protocol::message::TargetedMessage;
use ipcbus_protocol::types::{ClassId, InstanceId, ObjectId, Role};

use crate::endpoint::Endpoint;
use crate::session::{Session, SessionInfo};

/// Callbacks the endpoint invokes on an object (or on itself).
///
/// Hooks run on the endpoint owner's thread while the endpoint is mutably
/// borrowed, so they must not call back into the endpoint. Implementations
/// that record state use interior mutability.
pub trait ObjectHooks: Send + Sync {
    /// Whether this object serves the given session. Sessions that fail are
    /// skipped for online notifications.
    fn authenticate(&self, _info: &SessionInfo) -> bool {
        true
    }

    /// A session became reachable. `is_first` marks the first session
    /// reported in one notification round.
    fn on_session_online(&self, _session: &Session, _is_first: bool) {}

    /// A session went away. `is_last` marks the last remaining session.
    fn on_session_offline(&self, _session: &Session, _is_last: bool) {}

    /// Drop whatever subscriptions the session held.
    fn on_unsubscribe(&self, _session: &Session) {}
}

/// Hooks that accept every session and ignore every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl ObjectHooks for NoHooks {}

impl<T: ObjectHooks + ?Sized> ObjectHooks for Arc<T> {
    fn authenticate(&self, info: &SessionInfo) -> bool {
        (**self).authenticate(info)
    }

    fn on_session_online(&self, session: &Session, is_first: bool) {
        (**self).on_session_online(session, is_first);
    }

    fn on_session_offline(&self, session: &Session, is_last: bool) {
        (**self).on_session_offline(session, is_last);
    }

    fn on_unsubscribe(&self, session: &Session) {
        (**self).on_unsubscribe(session);
    }
}

/// Lazy object instantiation, consulted by `Endpoint::get_object` when a
/// message targets an object that is not attached. Implementations usually
/// build the object and call `endpoint.add_object`. Called at most once per
/// lookup.
pub trait ObjectFactory: Send {
    fn create_object(&mut self, endpoint: &mut Endpoint, message: &dyn TargetedMessage);
}

/// An addressable object hosted on an endpoint.
pub struct BusObject {
    name: String,
    role: Role,
    id: AtomicU64,
    migrate_enabled: AtomicBool,
    hooks: Box<dyn ObjectHooks>,
}

impl BusObject {
    /// An object without an id; one is allocated when it is first attached.
    pub fn new(name: impl Into<String>, role: Role, hooks: impl ObjectHooks + 'static) -> Arc<Self> {
        Self::with_id(name, role, ObjectId::INVALID, hooks)
    }

    /// An object with a preset class/instance (any sequence bits are
    /// replaced on attach).
    pub fn with_id(
        name: impl Into<String>,
        role: Role,
        id: ObjectId,
        hooks: impl ObjectHooks + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            role,
            id: AtomicU64::new(id.0),
            migrate_enabled: AtomicBool::new(false),
            hooks: Box::new(hooks),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Current id. Keeps its last value after the object is detached.
    pub fn id(&self) -> ObjectId {
        ObjectId(self.id.load(Ordering::Acquire))
    }

    /// True exactly while the object is attached to an endpoint.
    pub fn is_migrate_enabled(&self) -> bool {
        self.migrate_enabled.load(Ordering::Acquire)
    }

    pub fn hooks(&self) -> &dyn ObjectHooks {
        self.hooks.as_ref()
    }

    pub(crate) fn set_id(&self, id: ObjectId) {
        self.id.store(id.0, Ordering::Release);
    }

    pub(crate) fn enable_migrate(&self, enabled: bool) {
        self.migrate_enabled.store(enabled, Ordering::Release);
    }
}

impl fmt::Debug for BusObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusObject")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("id", &self.id())
            .field("migrate_enabled", &self.is_migrate_enabled())
            .finish_non_exhaustive()
    }
}

/// Result of resolving a message target.
#[derive(Clone, Debug)]
pub enum ObjectRef {
    /// `ObjectId::MAIN`: the endpoint itself.
    Main,
    Hosted(Arc<BusObject>),
}

impl ObjectRef {
    pub fn is_main(&self) -> bool {
        matches!(self, ObjectRef::Main)
    }

    pub fn hosted(&self) -> Option<&Arc<BusObject>> {
        match self {
            ObjectRef::Main => None,
            ObjectRef::Hosted(obj) => Some(obj),
        }
    }
}

/// Objects attached to one endpoint, keyed by composite id.
pub(crate) struct ObjectTable {
    objects: BTreeMap<ObjectId, Arc<BusObject>>,
    next_class: u16,
    next_sequence: u32,
}

impl ObjectTable {
    pub(crate) fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            next_class: 1,
            next_sequence: 1,
        }
    }

    /// A fresh (class, instance 0) id for an object that came without one.
    /// Never MAIN; skips classes already in the table while any are free.
    pub(crate) fn allocate_local_id(&mut self) -> ObjectId {
        for _ in 0..=u16::MAX {
            let class = self.next_class;
            self.next_class = self.next_class.wrapping_add(1);
            let id = ObjectId::local(ClassId(class), InstanceId(0));
            if id.is_main() {
                continue;
            }
            if !self.objects.keys().any(|k| k.class() == id.class()) {
                return id;
            }
        }
        // Every class in use: fall back to the next one and let the duplicate
        // checks decide.
        let class = self.next_class.max(1);
        self.next_class = class.wrapping_add(1);
        ObjectId::local(ClassId(class), InstanceId(0))
    }

    /// Stamp `local` with the next allocation sequence.
    pub(crate) fn compose(&mut self, local: ObjectId) -> ObjectId {
        loop {
            let sequence = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);
            let id = local.with_sequence(sequence);
            if sequence != 0 && id.is_valid() && !id.is_main() {
                return id;
            }
        }
    }

    pub(crate) fn id_seed(&self) -> u32 {
        self.next_sequence
    }

    pub(crate) fn find(&self, id: ObjectId, server_only: bool) -> Option<&Arc<BusObject>> {
        if server_only {
            self.objects
                .values()
                .find(|obj| obj.role() == Role::Server && obj.id().class() == id.class())
        } else {
            self.objects.get(&id)
        }
    }

    /// Insert under the object's current id. False if the id is taken.
    pub(crate) fn insert(&mut self, obj: Arc<BusObject>) -> bool {
        let id = obj.id();
        if self.objects.contains_key(&id) {
            return false;
        }
        self.objects.insert(id, obj);
        true
    }

    pub(crate) fn remove(&mut self, id: ObjectId) -> Option<Arc<BusObject>> {
        self.objects.remove(&id)
    }

    pub(crate) fn holds(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn set_id_seed(&mut self, seed: u32) {
        self.next_sequence = seed;
    }

    pub(crate) fn contains(&self, obj: &Arc<BusObject>) -> bool {
        self.objects
            .get(&obj.id())
            .is_some_and(|held| Arc::ptr_eq(held, obj))
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Arc<BusObject>> {
        self.objects.values()
    }

    /// Take out the entry with the lowest key, whatever id the object
    /// currently carries.
    pub(crate) fn pop_first(&mut self) -> Option<Arc<BusObject>> {
        self.objects.pop_first().map(|(_, obj)| obj)
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(class: u16, instance: u16) -> Arc<BusObject> {
        BusObject::with_id(
            "srv",
            Role::Server,
            ObjectId::local(ClassId(class), InstanceId(instance)),
            NoHooks,
        )
    }

    #[test]
    fn allocated_ids_skip_main_and_used_classes() {
        let mut table = ObjectTable::new();
        let first = table.allocate_local_id();
        assert!(!first.is_main());
        assert_eq!(first.class(), ClassId(1));

        let obj = server(2, 0);
        let id = table.compose(obj.id());
        obj.set_id(id);
        assert!(table.insert(obj));

        // Class 2 is taken, so the allocator moves on to 3.
        let next = table.allocate_local_id();
        assert_eq!(next.class(), ClassId(3));
    }

    #[test]
    fn allocator_wraps_past_zero() {
        let mut table = ObjectTable::new();
        table.next_class = u16::MAX;
        assert_eq!(table.allocate_local_id().class(), ClassId(u16::MAX));
        // 0 would be MAIN; the allocator skips it.
        assert_eq!(table.allocate_local_id().class(), ClassId(1));
    }

    #[test]
    fn compose_never_yields_sequence_zero() {
        let mut table = ObjectTable::new();
        table.next_sequence = u32::MAX;
        let local = ObjectId::local(ClassId(1), InstanceId(1));
        let a = table.compose(local);
        let b = table.compose(local);
        assert_eq!(a.sequence(), u32::MAX);
        assert_eq!(b.sequence(), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn find_server_only_matches_class() {
        let mut table = ObjectTable::new();
        let obj = server(7, 3);
        obj.set_id(table.compose(obj.id()));
        assert!(table.insert(obj.clone()));

        let probe = ObjectId::from_parts(999, ClassId(7), InstanceId(42));
        assert!(Arc::ptr_eq(table.find(probe, true).unwrap(), &obj));
        assert!(table.find(probe, false).is_none());
        assert!(Arc::ptr_eq(table.find(obj.id(), false).unwrap(), &obj));
    }

    #[test]
    fn find_server_only_ignores_clients() {
        let mut table = ObjectTable::new();
        let client = BusObject::with_id(
            "cli",
            Role::Client,
            ObjectId::local(ClassId(7), InstanceId(0)),
            NoHooks,
        );
        client.set_id(table.compose(client.id()));
        assert!(table.insert(client));
        assert!(table.find(ObjectId::local(ClassId(7), InstanceId(0)), true).is_none());
    }

    #[test]
    fn insert_rejects_taken_id() {
        let mut table = ObjectTable::new();
        let a = server(1, 1);
        let b = server(1, 1);
        let id = table.compose(a.id());
        a.set_id(id);
        b.set_id(id);
        assert!(table.insert(a.clone()));
        assert!(!table.insert(b.clone()));
        assert!(table.contains(&a));
        assert!(!table.contains(&b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn pop_first_drains_by_key() {
        let mut table = ObjectTable::new();
        let a = server(1, 0);
        let b = server(2, 0);
        for obj in [&a, &b] {
            obj.set_id(table.compose(obj.id()));
            assert!(table.insert(obj.clone()));
        }
        // A rewritten id no longer matches the key; draining still works.
        b.set_id(ObjectId::from_parts(99, ClassId(9), InstanceId(9)));
        assert!(!table.contains(&b));
        assert!(table.holds(ObjectId::from_parts(2, ClassId(2), InstanceId(0))));

        assert!(Arc::ptr_eq(&table.pop_first().unwrap(), &a));
        assert!(Arc::ptr_eq(&table.pop_first().unwrap(), &b));
        assert!(table.pop_first().is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn debug_shows_id_and_state() {
        let obj = server(1, 2);
        let text = format!("{obj:?}");
        assert!(text.contains("srv"));
        assert!(text.contains("migrate_enabled: false"));
    }
}
