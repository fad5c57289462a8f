//! Request/response correlation.
//!
//! Every response-expecting request owns one entry in the pending table,
//! keyed by its 4-bit sequence number. The reader thread resolves entries;
//! the calling thread waits on the entry's one-shot slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tfwire_frame::{Packet, MAX_SEQUENCE_NUMBER};
use tracing::{trace, warn};

use crate::error::{IpconError, Result};

const FIRST_SEQUENCE_NUMBER: u8 = 1;

/// Where the reader should send a decoded packet.
#[derive(Debug)]
pub(crate) enum Routed {
    /// Unsolicited packet for the callback queue.
    Callback(Packet),
    /// Handed to a waiting call.
    Resolved,
    /// Late or mismatched response, dropped.
    Discarded,
}

struct PendingEntry {
    token: u64,
    uid: u32,
    function_id: u8,
    created: Instant,
    slot: SyncSender<Result<Packet>>,
}

struct PendingTable {
    next_sequence: u8,
    entries: HashMap<u8, PendingEntry>,
}

impl PendingTable {
    /// Step the counter through 1..=15, wrapping to 1; 0 marks callbacks.
    fn advance(&mut self) -> u8 {
        let seq = self.next_sequence;
        self.next_sequence = if seq >= MAX_SEQUENCE_NUMBER {
            FIRST_SEQUENCE_NUMBER
        } else {
            seq + 1
        };
        seq
    }

    /// Next sequence number not held by a pending entry.
    fn allocate(&mut self) -> Option<u8> {
        for _ in FIRST_SEQUENCE_NUMBER..=MAX_SEQUENCE_NUMBER {
            let seq = self.advance();
            if !self.entries.contains_key(&seq) {
                return Some(seq);
            }
        }
        None
    }
}

/// A registered request waiting for its response.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    sequence_number: u8,
    token: u64,
    receiver: Receiver<Result<Packet>>,
}

impl PendingRequest {
    pub(crate) fn sequence_number(&self) -> u8 {
        self.sequence_number
    }
}

pub(crate) struct RequestDispatcher {
    table: Mutex<PendingTable>,
    slot_freed: Condvar,
    next_token: AtomicU64,
}

impl RequestDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(PendingTable {
                next_sequence: FIRST_SEQUENCE_NUMBER,
                entries: HashMap::new(),
            }),
            slot_freed: Condvar::new(),
            next_token: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sequence number for a request that expects no response.
    ///
    /// Prefers a number no pending request holds but never waits: with all
    /// 15 pending it reuses the next one in the cycle. The device does not
    /// answer the request, so nothing can resolve that pending entry twice.
    pub(crate) fn fire_and_forget_sequence(&self) -> u8 {
        let mut table = self.lock();
        match table.allocate() {
            Some(seq) => seq,
            None => table.advance(),
        }
    }

    /// Reserve a sequence number for a request to `(uid, function_id)`.
    ///
    /// Waits for a free number while all of them are pending; gives up with
    /// `Timeout(timeout)` at `deadline`.
    pub(crate) fn register(
        &self,
        uid: u32,
        function_id: u8,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<PendingRequest> {
        let mut table = self.lock();
        loop {
            if let Some(seq) = table.allocate() {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                let (slot, receiver) = sync_channel(1);
                table.entries.insert(
                    seq,
                    PendingEntry {
                        token,
                        uid,
                        function_id,
                        created: Instant::now(),
                        slot,
                    },
                );
                trace!(uid, function_id, seq, "request registered");
                return Ok(PendingRequest {
                    sequence_number: seq,
                    token,
                    receiver,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(IpconError::Timeout(timeout));
            }
            trace!(uid, function_id, "all sequence numbers pending; waiting");
            table = self
                .slot_freed
                .wait_timeout(table, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until the request resolves or `deadline` passes.
    pub(crate) fn wait(
        &self,
        request: PendingRequest,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Packet> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match request.receiver.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if self.cancel(&request) {
                    Err(IpconError::Timeout(timeout))
                } else {
                    // Resolved between the deadline and the cancel.
                    request
                        .receiver
                        .try_recv()
                        .unwrap_or(Err(IpconError::Timeout(timeout)))
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(IpconError::Disconnected),
        }
    }

    /// Remove the request's entry if it is still the one registered.
    pub(crate) fn cancel(&self, request: &PendingRequest) -> bool {
        let mut table = self.lock();
        let ours = table
            .entries
            .get(&request.sequence_number)
            .is_some_and(|entry| entry.token == request.token);
        if ours {
            table.entries.remove(&request.sequence_number);
            self.slot_freed.notify_one();
        }
        ours
    }

    /// Route a decoded packet: resolve a pending request or hand it back as a callback.
    pub(crate) fn route(&self, packet: Packet) -> Routed {
        if packet.is_callback() {
            return Routed::Callback(packet);
        }

        let mut table = self.lock();
        let seq = packet.sequence_number;
        let matches = match table.entries.get(&seq) {
            None => {
                trace!(
                    uid = packet.uid,
                    function_id = packet.function_id,
                    seq,
                    "response without pending request discarded"
                );
                return Routed::Discarded;
            }
            Some(entry) => entry.uid == packet.uid && entry.function_id == packet.function_id,
        };

        if !matches {
            warn!(
                uid = packet.uid,
                function_id = packet.function_id,
                seq,
                "response does not match pending request; discarded"
            );
            return Routed::Discarded;
        }

        let Some(entry) = table.entries.remove(&seq) else {
            return Routed::Discarded;
        };
        self.slot_freed.notify_one();
        drop(table);

        trace!(
            uid = packet.uid,
            function_id = packet.function_id,
            seq,
            elapsed = ?entry.created.elapsed(),
            "response resolved"
        );

        let result = if packet.error_code.is_ok() {
            Ok(packet)
        } else {
            Err(IpconError::Protocol {
                function_id: packet.function_id,
                code: packet.error_code,
            })
        };
        // The caller may have given up already; that is fine.
        let _ = entry.slot.try_send(result);
        Routed::Resolved
    }

    /// Fail every pending request. Returns how many were failed.
    pub(crate) fn fail_all(&self, make_err: impl Fn() -> IpconError) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut table = self.lock();
            let drained = table.entries.drain().map(|(_, entry)| entry).collect();
            self.slot_freed.notify_all();
            drained
        };

        for entry in &drained {
            let _ = entry.slot.try_send(Err(make_err()));
        }
        drained.len()
    }

    pub(crate) fn pending(&self) -> usize {
        self.lock().entries.len()
    }
}
