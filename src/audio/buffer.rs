//! Fixed-capacity ring buffer for inbound audio
//!
//! One producer (the ingest thread) and one consumer (the playback callback)
//! share each buffer. The whole structure sits behind a short-lived mutex;
//! every operation is a bounded copy, so the audio-rate consumer never waits
//! on I/O.
//!
//! When a write does not fit, the oldest data is overwritten in whole frames
//! (one sample for every channel) so readers never lose channel alignment.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Inner<T> {
    data: Box<[T]>,
    head: usize,
    tail: usize,
    size: usize,
}

impl<T: Copy + Default> Inner<T> {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Drop `count` items from the front without reading them
    fn discard(&mut self, count: usize) {
        let cap = self.capacity();
        self.head = (self.head + count) % cap;
        self.size -= count;
    }

    fn write(&mut self, items: &[T]) {
        let cap = self.capacity();
        let first = items.len().min(cap - self.tail);
        self.data[self.tail..self.tail + first].copy_from_slice(&items[..first]);
        let rest = items.len() - first;
        self.data[..rest].copy_from_slice(&items[first..]);

        self.tail = (self.tail + items.len()) % cap;
        self.size += items.len();
    }

    /// Move up to `target.len()` items out, clearing the consumed slots
    fn read_into(&mut self, target: &mut [T]) -> usize {
        let cap = self.capacity();
        let count = target.len().min(self.size);
        if count == 0 {
            return 0;
        }

        let first = count.min(cap - self.head);
        target[..first].copy_from_slice(&self.data[self.head..self.head + first]);
        self.data[self.head..self.head + first].fill(T::default());
        let rest = count - first;
        target[first..count].copy_from_slice(&self.data[..rest]);
        self.data[..rest].fill(T::default());

        self.head = (self.head + count) % cap;
        self.size -= count;
        count
    }
}

/// Thread-safe circular buffer with overwrite-oldest semantics
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    /// Items per frame; eviction never splits a frame
    frame_len: usize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a buffer holding `capacity` items, evicting in runs of `frame_len`
    pub fn new(capacity: usize, frame_len: usize) -> Self {
        assert!(capacity > 0, "Capacity must be non-zero");
        let frame_len = frame_len.max(1);

        Self {
            inner: Mutex::new(Inner {
                data: vec![T::default(); capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                size: 0,
            }),
            frame_len,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Append items, evicting the oldest whole frames if they do not fit.
    ///
    /// Returns how many items were evicted.
    pub fn push(&self, items: &[T]) -> usize {
        if items.is_empty() {
            return 0;
        }

        let mut inner = self.inner.lock();
        let cap = inner.capacity();
        let mut evicted = 0;

        // A write larger than the whole buffer keeps only its newest frames
        let items = if items.len() > cap {
            let keep = (cap / self.frame_len) * self.frame_len;
            let keep = if keep == 0 { cap } else { keep };
            evicted += inner.size + (items.len() - keep);
            let size = inner.size;
            inner.discard(size);
            &items[items.len() - keep..]
        } else {
            items
        };

        let free = cap - inner.size;
        if items.len() > free {
            let needed = items.len() - free;
            let overwrite = needed.div_ceil(self.frame_len) * self.frame_len;
            let overwrite = overwrite.min(inner.size);
            inner.discard(overwrite);
            evicted += overwrite;
        }

        inner.write(items);

        if evicted > 0 {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Remove and return up to `n` of the oldest items
    pub fn read(&self, n: usize) -> Vec<T> {
        let mut inner = self.inner.lock();
        let mut out = vec![T::default(); n.min(inner.size)];
        inner.read_into(&mut out);
        out
    }

    /// Fill `target` with the oldest items, zero-padding any shortfall.
    ///
    /// Returns how many real items were copied.
    pub fn read_into(&self, target: &mut [T]) -> usize {
        let count = self.inner.lock().read_into(target);
        if count < target.len() {
            target[count..].fill(T::default());
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    /// Current occupied count
    pub fn len(&self) -> usize {
        self.inner.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Number of writes that had to evict data
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Number of reads that came up short and were zero-padded
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        let inner = self.inner.lock();
        inner.size as f32 / inner.capacity() as f32
    }
}

/// Raw PCM bytes as received from the network
pub type ByteRingBuffer = RingBuffer<u8>;

/// Thread-safe handle to a byte ring buffer
pub type SharedRingBuffer = Arc<ByteRingBuffer>;

/// Create a new shared byte buffer
pub fn create_shared_buffer(capacity: usize, frame_len: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity, frame_len))
}
