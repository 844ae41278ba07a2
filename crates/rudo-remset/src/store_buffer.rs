//! Write-barrier store buffer.
//!
//! The barrier appends the address of every old-generation slot that was
//! written with a young reference. Appends are O(1); the buffer is drained
//! into per-region old-to-new remembered sets at the start of a minor
//! collection, or early when both chunks fill up.

use crate::address::Address;
use crossbeam::queue::SegQueue;

/// Destination of a store-buffer flush.
pub trait StoreBufferSink {
    /// Record `slot` in the old-to-new remembered set of its region.
    ///
    /// Implementations may decline a slot that no longer needs recording
    /// (its host is no longer old, or it no longer holds a young
    /// reference). Returns whether the slot was newly recorded.
    fn record_old_to_new(&mut self, slot: Address) -> bool;
}

/// Why a flush ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Requested by the collector.
    Normal,
    /// Both chunks were full.
    Overflow,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Entries drained from the buffer, duplicates included.
    pub captured: usize,
    /// Distinct slots handed to the sink.
    pub unique: usize,
    /// Slots the sink newly recorded.
    pub recorded: usize,
}

/// Outcome of draining a [`SharedStoreBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Slots moved into the store buffer.
    pub moved: usize,
    /// Overflow flushes the moved slots triggered.
    pub overflow_flushes: usize,
    /// Slots those overflow flushes newly recorded.
    pub recorded: usize,
}

/// Double-chunk buffer of old-to-new slot addresses.
///
/// Appends go to the active chunk. When it fills, the buffer switches to the
/// other chunk if that one is empty; otherwise both are flushed into the
/// sink on the spot.
#[derive(Debug)]
pub struct StoreBuffer {
    chunks: [Vec<Address>; 2],
    active: usize,
    chunk_capacity: usize,
    overflow_flushes: usize,
}

impl StoreBuffer {
    /// Create a buffer whose two chunks hold `chunk_capacity` entries each.
    #[must_use]
    pub fn new(chunk_capacity: usize) -> Self {
        debug_assert!(chunk_capacity > 0);
        Self {
            chunks: [
                Vec::with_capacity(chunk_capacity),
                Vec::with_capacity(chunk_capacity),
            ],
            active: 0,
            chunk_capacity,
            overflow_flushes: 0,
        }
    }

    /// Entries per chunk.
    #[must_use]
    pub const fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Buffered entries, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks[0].len() + self.chunks[1].len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Vec::is_empty)
    }

    /// Overflow flushes since creation.
    #[must_use]
    pub const fn overflow_flushes(&self) -> usize {
        self.overflow_flushes
    }

    /// Append `slot`. If this fills the last free chunk, the buffer is
    /// flushed into `sink` and the stats of that flush are returned.
    #[inline]
    pub fn insert<S>(&mut self, slot: Address, sink: &mut S) -> Option<FlushStats>
    where
        S: StoreBufferSink + ?Sized,
    {
        let chunk = &mut self.chunks[self.active];
        chunk.push(slot);
        if chunk.len() < self.chunk_capacity {
            return None;
        }
        let other = 1 - self.active;
        if self.chunks[other].is_empty() {
            self.active = other;
            None
        } else {
            Some(self.flush(sink, FlushKind::Overflow))
        }
    }

    /// Drain every buffered entry into `sink`, sorted and deduplicated.
    pub fn flush<S>(&mut self, sink: &mut S, kind: FlushKind) -> FlushStats
    where
        S: StoreBufferSink + ?Sized,
    {
        let [first, second] = &mut self.chunks;
        let mut slots = std::mem::take(first);
        slots.append(second);

        let captured = slots.len();
        slots.sort_unstable();
        slots.dedup();
        let unique = slots.len();
        let recorded = slots
            .iter()
            .filter(|&&slot| sink.record_old_to_new(slot))
            .count();

        slots.clear();
        self.chunks[0] = slots;
        self.active = 0;
        if kind == FlushKind::Overflow {
            self.overflow_flushes += 1;
        }
        FlushStats {
            captured,
            unique,
            recorded,
        }
    }
}

/// Store buffer fed from several threads.
///
/// Mutator threads without access to the heap's [`StoreBuffer`] push slots
/// here; the collector drains them into the main buffer at a safepoint.
#[derive(Debug, Default)]
pub struct SharedStoreBuffer {
    queue: SegQueue<Address>,
}

impl SharedStoreBuffer {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `slot` from any thread.
    pub fn push(&self, slot: Address) {
        self.queue.push(slot);
    }

    /// Queued slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Move every queued slot into `buffer`, which may overflow into `sink`
    /// along the way.
    pub fn drain_into<S>(&self, buffer: &mut StoreBuffer, sink: &mut S) -> DrainStats
    where
        S: StoreBufferSink + ?Sized,
    {
        let mut stats = DrainStats::default();
        while let Some(slot) = self.queue.pop() {
            if let Some(flush) = buffer.insert(slot, sink) {
                stats.overflow_flushes += 1;
                stats.recorded += flush.recorded;
            }
            stats.moved += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::RegionId;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        slots: Vec<Address>,
    }

    impl StoreBufferSink for Recorder {
        fn record_old_to_new(&mut self, slot: Address) -> bool {
            if self.slots.contains(&slot) {
                return false;
            }
            self.slots.push(slot);
            true
        }
    }

    fn slot(offset: usize) -> Address {
        Address::new(RegionId(1), offset)
    }

    #[test]
    fn test_switches_chunk_before_overflowing() {
        let mut buffer = StoreBuffer::new(4);
        let mut sink = Recorder::default();
        for i in 0..8 {
            assert!(buffer.insert(slot(256 + i * 8), &mut sink).is_none());
        }
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.overflow_flushes(), 0);
        assert!(sink.slots.is_empty());
    }

    #[test]
    fn test_overflow_flushes_both_chunks() {
        let capacity = 4;
        let mut buffer = StoreBuffer::new(capacity);
        let mut sink = Recorder::default();
        let mut overflows = 0;
        for i in 0..=2 * capacity {
            if buffer.insert(slot(256 + i * 8), &mut sink).is_some() {
                overflows += 1;
            }
        }
        assert_eq!(overflows, 1);
        assert_eq!(buffer.overflow_flushes(), 1);
        assert_eq!(sink.slots.len() + buffer.len(), 2 * capacity + 1);

        buffer.flush(&mut sink, FlushKind::Normal);
        assert!(buffer.is_empty());
        assert_eq!(sink.slots.len(), 2 * capacity + 1);
    }

    #[test]
    fn test_flush_deduplicates() {
        let mut buffer = StoreBuffer::new(16);
        let mut sink = Recorder::default();
        buffer.insert(slot(512), &mut sink);
        buffer.insert(slot(256), &mut sink);
        buffer.insert(slot(512), &mut sink);
        let stats = buffer.flush(&mut sink, FlushKind::Normal);
        assert_eq!(
            stats,
            FlushStats {
                captured: 3,
                unique: 2,
                recorded: 2
            }
        );
        assert_eq!(sink.slots, vec![slot(256), slot(512)]);
    }

    #[test]
    fn test_shared_buffer_drains_all_threads() {
        let shared = Arc::new(SharedStoreBuffer::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        shared.push(Address::new(RegionId(t), 256 + i * 8));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(shared.len(), 400);

        let mut buffer = StoreBuffer::new(1024);
        let mut sink = Recorder::default();
        let drained = shared.drain_into(&mut buffer, &mut sink);
        assert_eq!(
            drained,
            DrainStats {
                moved: 400,
                overflow_flushes: 0,
                recorded: 0
            }
        );
        assert!(shared.is_empty());
        assert_eq!(buffer.flush(&mut sink, FlushKind::Normal).unique, 400);
    }

    #[test]
    fn test_drain_reports_overflow_flushes() {
        let shared = SharedStoreBuffer::new();
        for i in 0..9 {
            shared.push(slot(256 + i * 8));
        }
        let mut buffer = StoreBuffer::new(4);
        let mut sink = Recorder::default();
        let drained = shared.drain_into(&mut buffer, &mut sink);
        assert_eq!(
            drained,
            DrainStats {
                moved: 9,
                overflow_flushes: 1,
                recorded: 8
            }
        );
        assert_eq!(buffer.overflow_flushes(), 1);
        assert_eq!(buffer.len(), 1);
    }
}
