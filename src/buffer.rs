//! Bounded packet slot pool shared between the assembler and one sink.
//!
//! A fixed set of slots moves between an `empty` and a `full` queue, both
//! FIFO and guarded by a single mutex so a swap between the two never takes
//! more than one critical section. Consumers block on a condition variable
//! for `full` to become non-empty; the producer never blocks - when the
//! empty pool is exhausted it steals the oldest full packet instead.

use std::time::Duration;

use heapless::Deque;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::packet::{
    append_block, BlockBody, CallSign, PacketError, PacketHeader, PACKET_HEADER_SIZE,
    PACKET_MAX_SIZE,
};

/// Slots per buffer. Two is the minimum for a producer and a consumer to
/// make progress; a third absorbs jitter between them.
pub const NUM_SLOTS: usize = 3;

/// One packet in the process of being assembled or drained.
#[derive(Debug)]
pub struct PacketSlot {
    bytes: [u8; PACKET_MAX_SIZE],
    end: usize,
}

impl PacketSlot {
    fn new() -> Box<Self> {
        Box::new(Self {
            bytes: [0; PACKET_MAX_SIZE],
            end: 0,
        })
    }

    /// The valid bytes of the assembled packet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.end]
    }

    pub fn len(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Begin a fresh packet. The sequence number is left at zero; the sink
    /// that drains this slot owns the ordering and stamps it then.
    pub fn start_packet(&mut self, call_sign: &CallSign, mission_time_ms: u32) {
        PacketHeader::new(call_sign, 0, mission_time_ms).write_to(&mut self.bytes);
        self.end = PACKET_HEADER_SIZE;
    }

    /// Append a block to the packet under assembly.
    pub fn append(&mut self, body: &BlockBody, mission_time_ms: u32) -> Result<(), PacketError> {
        self.end = append_block(&mut self.bytes, self.end, body, mission_time_ms)?;
        Ok(())
    }

    /// Stamp the packet sequence number into the header.
    pub fn set_packet_num(&mut self, packet_num: u8) {
        if self.end >= PACKET_HEADER_SIZE {
            self.bytes[12] = packet_num;
        }
    }
}

#[derive(Debug)]
struct Queues {
    empty: Deque<Box<PacketSlot>, NUM_SLOTS>,
    full: Deque<Box<PacketSlot>, NUM_SLOTS>,
}

/// A pool of [`NUM_SLOTS`] packet slots with empty/full hand-off queues.
#[derive(Debug)]
pub struct PacketBuffer {
    queues: Mutex<Queues>,
    full_available: Condvar,
}

impl PacketBuffer {
    pub fn new() -> Self {
        let mut empty = Deque::new();
        for _ in 0..NUM_SLOTS {
            let _ = empty.push_back(PacketSlot::new());
        }
        Self {
            queues: Mutex::new(Queues {
                empty,
                full: Deque::new(),
            }),
            full_available: Condvar::new(),
        }
    }

    /// Take an empty slot, or recycle the oldest full packet when the empty
    /// pool is drained. Returns `None` only if every slot is held by a
    /// thread, which cannot happen with one producer and one consumer per
    /// buffer.
    pub fn get_empty(&self) -> Option<Box<PacketSlot>> {
        let mut queues = self.queues.lock();
        let mut slot = queues.empty.pop_front();
        if slot.is_none() {
            debug!("no empty packets to write into, overwriting the oldest full packet");
            slot = queues.full.pop_front();
        }
        drop(queues);
        slot.map(|mut slot| {
            slot.end = 0;
            slot
        })
    }

    /// Take the oldest full packet, blocking until one is available.
    pub fn get_full(&self) -> Box<PacketSlot> {
        let mut queues = self.queues.lock();
        loop {
            if let Some(slot) = queues.full.pop_front() {
                return slot;
            }
            debug!("waiting for a full packet");
            self.full_available.wait(&mut queues);
        }
    }

    /// Take the oldest full packet, giving up after `timeout` so callers can
    /// re-check flight state and shutdown flags.
    pub fn get_full_timeout(&self, timeout: Duration) -> Option<Box<PacketSlot>> {
        let mut queues = self.queues.lock();
        loop {
            if let Some(slot) = queues.full.pop_front() {
                return Some(slot);
            }
            if self.full_available.wait_for(&mut queues, timeout).timed_out() {
                return queues.full.pop_front();
            }
        }
    }

    /// Return a drained or unused slot to the pool.
    pub fn put_empty(&self, slot: Box<PacketSlot>) {
        let mut queues = self.queues.lock();
        if queues.empty.push_back(slot).is_err() {
            error!("empty queue rejected a slot; pool accounting is broken");
        }
    }

    /// Publish an assembled packet to the consumer side.
    pub fn put_full(&self, slot: Box<PacketSlot>) {
        let mut queues = self.queues.lock();
        if queues.full.push_back(slot).is_err() {
            error!("full queue rejected a slot; pool accounting is broken");
        }
        drop(queues);
        self.full_available.notify_one();
    }

    /// Number of slots currently queued as `(empty, full)`.
    pub fn queued(&self) -> (usize, usize) {
        let queues = self.queues.lock();
        (queues.empty.len(), queues.full.len())
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}
