//! Callback delivery.
//!
//! Unsolicited packets and connection events are queued by the reader thread
//! and delivered by one worker thread, in receipt order. Listener faults are
//! contained here: an `Err` or a panic is logged and the worker moves on.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tfwire_frame::{encode_uid, Packet};
use tracing::{debug, trace, warn};

use crate::connection::ConnectionEvent;
use crate::error::{IpconError, Result};
use crate::registry::{DeviceRegistry, ListenerId};

pub(crate) type ConnectionListener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Listeners for connection state changes.
#[derive(Default)]
pub(crate) struct ConnectionListeners {
    listeners: Mutex<Vec<(ListenerId, ConnectionListener)>>,
}

impl ConnectionListeners {
    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, ConnectionListener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, id: ListenerId, listener: ConnectionListener) {
        self.lock().push((id, listener));
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn snapshot(&self) -> Vec<ConnectionListener> {
        self.lock().iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// Work for the callback thread.
pub(crate) enum CallbackItem {
    Packet(Packet),
    Connection(ConnectionEvent),
    Stop,
}

/// The callback thread and the sending side of its queue.
pub(crate) struct CallbackWorker {
    sender: Sender<CallbackItem>,
    handle: JoinHandle<()>,
}

impl CallbackWorker {
    pub(crate) fn spawn(
        registry: Arc<DeviceRegistry>,
        connection_listeners: Arc<ConnectionListeners>,
    ) -> Result<Self> {
        let (sender, receiver) = channel();
        let handle = thread::Builder::new()
            .name("tfwire-callback".to_string())
            .spawn(move || run(receiver, &registry, &connection_listeners))
            .map_err(|source| IpconError::Spawn {
                name: "callback",
                source,
            })?;
        Ok(Self { sender, handle })
    }

    pub(crate) fn sender(&self) -> Sender<CallbackItem> {
        self.sender.clone()
    }

    pub(crate) fn enqueue(&self, item: CallbackItem) {
        // Fails only once the worker has exited.
        let _ = self.sender.send(item);
    }

    /// Drain what is queued, then stop. Joins unless called from the worker itself.
    pub(crate) fn stop(self) {
        self.enqueue(CallbackItem::Stop);
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            warn!("callback thread exited with a panic");
        }
    }
}

fn run(
    receiver: Receiver<CallbackItem>,
    registry: &DeviceRegistry,
    connection_listeners: &ConnectionListeners,
) {
    debug!("callback thread started");
    while let Ok(item) = receiver.recv() {
        match item {
            CallbackItem::Packet(packet) => deliver_packet(registry, &packet),
            CallbackItem::Connection(event) => deliver_event(connection_listeners, &event),
            CallbackItem::Stop => break,
        }
    }
    debug!("callback thread stopped");
}

fn deliver_packet(registry: &DeviceRegistry, packet: &Packet) {
    let listeners = registry.listeners_for(packet.uid, packet.function_id);
    if listeners.is_empty() {
        trace!(
            uid = %encode_uid(packet.uid),
            function_id = packet.function_id,
            "no listener; callback dropped"
        );
        return;
    }

    for listener in listeners {
        match catch_unwind(AssertUnwindSafe(|| listener(packet.payload.as_ref()))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                uid = %encode_uid(packet.uid),
                function_id = packet.function_id,
                error = %err,
                "callback listener returned an error"
            ),
            Err(panic) => warn!(
                uid = %encode_uid(packet.uid),
                function_id = packet.function_id,
                panic = panic_message(&*panic),
                "callback listener panicked"
            ),
        }
    }
}

fn deliver_event(connection_listeners: &ConnectionListeners, event: &ConnectionEvent) {
    for listener in connection_listeners.snapshot() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
            warn!(
                ?event,
                panic = panic_message(&*panic),
                "connection listener panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::connection::DisconnectReason;
    use crate::registry::{Listener, ListenerResult};

    fn worker(registry: &Arc<DeviceRegistry>) -> (CallbackWorker, Arc<ConnectionListeners>) {
        let listeners = Arc::new(ConnectionListeners::default());
        let worker = CallbackWorker::spawn(Arc::clone(registry), Arc::clone(&listeners)).unwrap();
        (worker, listeners)
    }

    fn recording(seen: &Arc<Mutex<Vec<Vec<u8>>>>) -> Listener {
        let seen = Arc::clone(seen);
        Arc::new(move |payload: &[u8]| -> ListenerResult {
            seen.lock().unwrap().push(payload.to_vec());
            Ok(())
        })
    }

    #[test]
    fn delivers_in_queue_order() {
        let registry = Arc::new(DeviceRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(9)
            .push_listener(ListenerId::next(), 3, recording(&seen));

        let (worker, _) = worker(&registry);
        for n in 1..=3u8 {
            worker.enqueue(CallbackItem::Packet(Packet::callback(9, 3, vec![n])));
        }
        worker.stop();

        assert_eq!(*seen.lock().unwrap(), vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn packets_without_listener_are_dropped() {
        let registry = Arc::new(DeviceRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(9)
            .push_listener(ListenerId::next(), 3, recording(&seen));

        let (worker, _) = worker(&registry);
        worker.enqueue(CallbackItem::Packet(Packet::callback(9, 4, vec![1])));
        worker.enqueue(CallbackItem::Packet(Packet::callback(10, 3, vec![2])));
        worker.enqueue(CallbackItem::Packet(Packet::callback(9, 3, vec![3])));
        worker.stop();

        assert_eq!(*seen.lock().unwrap(), vec![vec![3]]);
    }

    #[test]
    fn listener_faults_do_not_stop_worker() {
        let registry = Arc::new(DeviceRegistry::new());
        let entry = registry.register(9);
        let calls = Arc::new(AtomicUsize::new(0));

        let failing: Listener = Arc::new(|_: &[u8]| -> ListenerResult { Err("listener failed".into()) });
        let panicking: Listener = Arc::new(|_: &[u8]| -> ListenerResult { panic!("listener panicked") });
        let counting: Listener = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &[u8]| -> ListenerResult {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        entry.push_listener(ListenerId::next(), 3, failing);
        entry.push_listener(ListenerId::next(), 3, panicking);
        entry.push_listener(ListenerId::next(), 3, counting);

        let (worker, _) = worker(&registry);
        worker.enqueue(CallbackItem::Packet(Packet::callback(9, 3, vec![1])));
        worker.enqueue(CallbackItem::Packet(Packet::callback(9, 3, vec![2])));
        worker.stop();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn connection_events_reach_listeners() {
        let registry = Arc::new(DeviceRegistry::new());
        let (worker, listeners) = worker(&registry);
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        listeners.add(
            ListenerId::next(),
            Arc::new(move |event: &ConnectionEvent| {
                let _ = tx.lock().unwrap().send(event.clone());
            }),
        );

        worker.enqueue(CallbackItem::Connection(ConnectionEvent::Connected));
        worker.enqueue(CallbackItem::Connection(ConnectionEvent::Disconnected(
            DisconnectReason::Requested,
        )));

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), ConnectionEvent::Connected);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            ConnectionEvent::Disconnected(DisconnectReason::Requested)
        );
        worker.stop();
    }

    #[test]
    fn removed_connection_listener_is_not_called() {
        let listeners = ConnectionListeners::default();
        let id = ListenerId::next();
        listeners.add(id, Arc::new(|_: &ConnectionEvent| {}));
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        assert!(listeners.snapshot().is_empty());
    }
}
