//! Devices known to a connection and the listeners attached to them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tfwire_frame::{encode_uid, GET_IDENTITY};

/// What a listener reports back to the callback worker.
pub type ListenerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Raw-payload listener for one function id of one device.
pub(crate) type Listener = Arc<dyn Fn(&[u8]) -> ListenerResult + Send + Sync>;

/// Handle returned by `add_listener`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    pub(crate) fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Per-function response-expected setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseExpected {
    /// Getters: the device always answers.
    AlwaysTrue,
    /// Setter that currently asks for an acknowledgement.
    True,
    /// Setter sent fire-and-forget.
    False,
}

impl ResponseExpected {
    pub fn as_bool(self) -> bool {
        !matches!(self, ResponseExpected::False)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state for one uid. Every `Device` handle for the uid points here.
pub(crate) struct DeviceEntry {
    uid: u32,
    uid_text: String,
    listeners: Mutex<HashMap<u8, Vec<(ListenerId, Listener)>>>,
    response_expected: Mutex<HashMap<u8, ResponseExpected>>,
}

impl DeviceEntry {
    fn new(uid: u32) -> Self {
        Self {
            uid,
            uid_text: encode_uid(uid),
            listeners: Mutex::new(HashMap::new()),
            response_expected: Mutex::new(HashMap::from([(
                GET_IDENTITY,
                ResponseExpected::AlwaysTrue,
            )])),
        }
    }

    pub(crate) fn uid(&self) -> u32 {
        self.uid
    }

    pub(crate) fn uid_text(&self) -> &str {
        &self.uid_text
    }

    pub(crate) fn push_listener(&self, id: ListenerId, function_id: u8, listener: Listener) {
        lock(&self.listeners)
            .entry(function_id)
            .or_default()
            .push((id, listener));
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let mut removed = false;
        for list in listeners.values_mut() {
            let before = list.len();
            list.retain(|(existing, _)| *existing != id);
            removed |= list.len() != before;
        }
        listeners.retain(|_, list| !list.is_empty());
        removed
    }

    /// Snapshot of the listeners for `function_id`, in registration order.
    pub(crate) fn listeners_for(&self, function_id: u8) -> Vec<Listener> {
        lock(&self.listeners)
            .get(&function_id)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.listeners).values().map(Vec::len).sum()
    }

    /// Unlisted functions default to `True`.
    pub(crate) fn response_expected(&self, function_id: u8) -> ResponseExpected {
        lock(&self.response_expected)
            .get(&function_id)
            .copied()
            .unwrap_or(ResponseExpected::True)
    }

    pub(crate) fn response_expected_table(&self) -> MutexGuard<'_, HashMap<u8, ResponseExpected>> {
        lock(&self.response_expected)
    }
}

/// Uid → device entry map owned by one connection.
pub(crate) struct DeviceRegistry {
    devices: Mutex<HashMap<u32, Arc<DeviceEntry>>>,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Entry for `uid`, created on first use.
    pub(crate) fn register(&self, uid: u32) -> Arc<DeviceEntry> {
        let mut devices = lock(&self.devices);
        Arc::clone(
            devices
                .entry(uid)
                .or_insert_with(|| Arc::new(DeviceEntry::new(uid))),
        )
    }

    pub(crate) fn lookup(&self, uid: u32) -> Option<Arc<DeviceEntry>> {
        lock(&self.devices).get(&uid).cloned()
    }

    /// Listeners for a callback packet; empty when the uid is unknown.
    pub(crate) fn listeners_for(&self, uid: u32, function_id: u8) -> Vec<Listener> {
        match self.lookup(uid) {
            Some(entry) => entry.listeners_for(function_id),
            None => Vec::new(),
        }
    }

    pub(crate) fn uids(&self) -> Vec<u32> {
        let mut uids: Vec<u32> = lock(&self.devices).keys().copied().collect();
        uids.sort_unstable();
        uids
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &[u8]| -> ListenerResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn register_is_idempotent() {
        let registry = DeviceRegistry::new();
        let first = registry.register(42);
        let second = registry.register(42);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.uids(), vec![42]);
    }

    #[test]
    fn lookup_unknown_is_none() {
        let registry = DeviceRegistry::new();
        assert!(registry.lookup(7).is_none());
        assert!(registry.listeners_for(7, 3).is_empty());
    }

    #[test]
    fn listeners_keep_registration_order() {
        let registry = DeviceRegistry::new();
        let entry = registry.register(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3u8 {
            let order = Arc::clone(&order);
            let listener: Listener = Arc::new(move |_: &[u8]| -> ListenerResult {
                order.lock().unwrap().push(tag);
                Ok(())
            });
            entry.push_listener(ListenerId::next(), 3, listener);
        }

        for listener in registry.listeners_for(1, 3) {
            listener(b"".as_slice()).unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn remove_listener_by_id() {
        let registry = DeviceRegistry::new();
        let entry = registry.register(1);
        let counter = Arc::new(AtomicUsize::new(0));

        let keep = ListenerId::next();
        let drop_id = ListenerId::next();
        entry.push_listener(keep, 3, counting(&counter));
        entry.push_listener(drop_id, 3, counting(&counter));

        assert!(entry.remove_listener(drop_id));
        assert!(!entry.remove_listener(drop_id));
        assert_eq!(entry.listener_count(), 1);

        for listener in entry.listeners_for(3) {
            listener(b"".as_slice()).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn response_expected_defaults_to_true() {
        let entry = DeviceEntry::new(5);
        assert_eq!(entry.response_expected(9), ResponseExpected::True);
        entry
            .response_expected_table()
            .insert(9, ResponseExpected::False);
        assert_eq!(entry.response_expected(9), ResponseExpected::False);
        assert!(!ResponseExpected::False.as_bool());
        assert!(ResponseExpected::AlwaysTrue.as_bool());
        assert_eq!(
            entry.response_expected(GET_IDENTITY),
            ResponseExpected::AlwaysTrue
        );
    }

    #[test]
    fn uid_text_is_base58() {
        let entry = DeviceEntry::new(tfwire_frame::decode_uid("XYZ").unwrap());
        assert_eq!(entry.uid_text(), "XYZ");
    }
}
