//! # Frame Queue
//!
//! Single-producer/single-consumer hand-off between the capture thread and
//! a stream's encoder thread. The channel itself is unbounded; the
//! advisory capacity below and the hard memory guard in the orchestrator
//! are what bound it in practice, so a burst may briefly exceed the soft
//! cap without stalling the render thread.
//!
//! The shared [`Counters`] track every frame across all queues of the
//! session: produced, consumed, dropped, and the bytes currently resident.
//! Conservation holds at all times:
//! `produced == consumed + buffered + dropped`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

/// Advisory queue bound. The encoder thread's liveness keeps the real
/// depth far below this in steady state.
pub const QUEUE_CAPACITY: usize = 256;

/// Byte budget for frames resident in queues. A new frame that would push
/// past this stalls the capture thread until the queues drain.
pub const MEMORY_BUDGET: i64 = i32::MAX as i64;

/// Unit of hand-off between capture and encoder: the converted planes of
/// one frame, row-pitch-contiguous, in the encoder's native layout.
#[derive(Debug, Clone)]
pub struct FrameItem {
    pub planes: Vec<Vec<u8>>,
}

impl FrameItem {
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }
}

/// Session-wide frame accounting, shared by all queues and threads.
#[derive(Debug, Default)]
pub struct Counters {
    buffered_items: AtomicI64,
    buffered_bytes: AtomicI64,
    produced: AtomicU64,
    consumed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn buffered_items(&self) -> i64 {
        self.buffered_items.load(Ordering::Acquire)
    }

    pub fn buffered_bytes(&self) -> i64 {
        self.buffered_bytes.load(Ordering::Acquire)
    }

    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    /// A frame was dropped with a log instead of entering a queue.
    pub fn count_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether holding `additional` more bytes in queues would cross the
    /// memory budget.
    pub fn would_overflow(&self, additional: usize) -> bool {
        self.buffered_bytes() + additional as i64 > MEMORY_BUDGET
    }

    /// Audio buffers share the outstanding-item count but not the video
    /// frame conservation counters.
    pub fn audio_enqueued(&self) {
        self.buffered_items.fetch_add(1, Ordering::AcqRel);
    }

    pub fn audio_dequeued(&self) {
        self.buffered_items.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct FrameProducer {
    tx: Sender<FrameItem>,
    counters: Arc<Counters>,
}

impl FrameProducer {
    pub fn enqueue(&self, item: FrameItem) {
        self.counters
            .buffered_bytes
            .fetch_add(item.byte_len() as i64, Ordering::AcqRel);
        self.counters.buffered_items.fetch_add(1, Ordering::AcqRel);
        self.counters.produced.fetch_add(1, Ordering::AcqRel);

        // The consumer only disconnects at session end, after the capture
        // side has stopped producing.
        let _ = self.tx.send(item);
    }
}

pub struct FrameConsumer {
    rx: Receiver<FrameItem>,
    counters: Arc<Counters>,
}

impl FrameConsumer {
    fn account(&self, item: &FrameItem) {
        self.counters
            .buffered_bytes
            .fetch_sub(item.byte_len() as i64, Ordering::AcqRel);
        self.counters.buffered_items.fetch_sub(1, Ordering::AcqRel);
        self.counters.consumed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn try_dequeue(&self) -> Option<FrameItem> {
        let item = self.rx.try_recv().ok()?;
        self.account(&item);
        Some(item)
    }

    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<FrameItem> {
        let item = self.rx.recv_timeout(timeout).ok()?;
        self.account(&item);
        Some(item)
    }
}

/// Creates one stream's queue, wired into the session counters.
pub fn frame_queue(counters: Arc<Counters>) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = crossbeam_channel::unbounded();

    (
        FrameProducer {
            tx,
            counters: counters.clone(),
        },
        FrameConsumer { rx, counters },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(bytes: usize) -> FrameItem {
        FrameItem {
            planes: vec![vec![0u8; bytes]],
        }
    }

    #[test]
    fn fifo_order_and_accounting() {
        let counters = Counters::new();
        let (producer, consumer) = frame_queue(counters.clone());

        for value in 0..4u8 {
            producer.enqueue(FrameItem {
                planes: vec![vec![value; 8]],
            });
        }

        assert_eq!(counters.buffered_items(), 4);
        assert_eq!(counters.buffered_bytes(), 32);
        assert_eq!(counters.produced(), 4);

        for expected in 0..4u8 {
            let item = consumer.try_dequeue().unwrap();
            assert_eq!(item.planes[0][0], expected);
        }

        assert!(consumer.try_dequeue().is_none());
        assert_eq!(counters.buffered_items(), 0);
        assert_eq!(counters.buffered_bytes(), 0);
        assert_eq!(counters.consumed(), 4);
    }

    #[test]
    fn conservation_with_drops() {
        let counters = Counters::new();
        let (producer, consumer) = frame_queue(counters.clone());

        producer.enqueue(item(16));
        producer.enqueue(item(16));
        counters.count_dropped();

        let _ = consumer.try_dequeue().unwrap();

        assert_eq!(
            counters.produced(),
            counters.consumed() + counters.buffered_items() as u64
        );
        assert_eq!(counters.dropped(), 1);
    }

    #[test]
    fn memory_budget_check() {
        let counters = Counters::new();
        let (producer, _consumer) = frame_queue(counters.clone());

        assert!(!counters.would_overflow(1024));
        producer.enqueue(item(1024));
        assert!(counters.would_overflow(i32::MAX as usize));
    }
}
