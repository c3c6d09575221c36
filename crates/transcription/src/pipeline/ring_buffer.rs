use parking_lot::Mutex;

/// Fixed-capacity circular store of PCM16 samples for one audio source.
///
/// Bounds memory to `capacity` samples regardless of how fast or how long
/// the producer writes: once full, new writes overwrite the oldest samples.
/// A backpressure safety net: if ASR falls behind, the buffer quietly
/// degrades to "the last `W` seconds" rather than growing without bound or
/// blocking the producer.
///
/// All operations are O(1) amortized under a single internal lock; none of
/// them ever block on I/O.
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    data: Vec<i16>,
    /// Index the next `write` will land on.
    write_pos: usize,
    /// Number of valid samples currently held, capped at `data.len()`.
    fill: usize,
}

impl RingBuffer {
    /// Creates a buffer that holds at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: vec![0i16; capacity.max(1)],
                write_pos: 0,
                fill: 0,
            }),
        }
    }

    /// Capacity in samples this buffer was constructed with.
    pub fn capacity(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Number of samples currently held (`<= capacity`).
    pub fn fill(&self) -> usize {
        self.inner.lock().fill
    }

    /// Appends samples, overwriting the oldest ones on overflow. Always succeeds.
    pub fn write(&self, samples: &[i16]) {
        let mut inner = self.inner.lock();
        let capacity = inner.data.len();

        // A single write larger than capacity only the tail survives anyway.
        let tail = if samples.len() > capacity {
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        for &sample in tail {
            let pos = inner.write_pos;
            inner.data[pos] = sample;
            inner.write_pos = (pos + 1) % capacity;
            if inner.fill < capacity {
                inner.fill += 1;
            }
        }
    }

    /// Returns up to `min(n, fill)` most recent samples, oldest first.
    pub fn read_last(&self, n: usize) -> Vec<i16> {
        let inner = self.inner.lock();
        let capacity = inner.data.len();
        let n = n.min(inner.fill);
        if n == 0 {
            return Vec::new();
        }

        // The most recent sample is at `write_pos - 1`; the oldest sample we
        // want to return is `n` positions before that, wrapping around.
        let start = (inner.write_pos + capacity - n) % capacity;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(inner.data[(start + i) % capacity]);
        }
        out
    }

    /// Atomically resets the buffer to empty. Capacity and contents (logically
    /// overwritten on next write) are unaffected.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.fill = 0;
        inner.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_last_returns_nothing_when_empty() {
        let buf = RingBuffer::new(10);
        assert!(buf.read_last(5).is_empty());
    }

    #[test]
    fn read_last_returns_chronological_order_before_wrap() {
        let buf = RingBuffer::new(10);
        buf.write(&[1, 2, 3, 4]);
        assert_eq!(buf.read_last(4), vec![1, 2, 3, 4]);
        assert_eq!(buf.read_last(2), vec![3, 4]);
    }

    #[test]
    fn write_overwrites_oldest_samples_on_overflow() {
        let buf = RingBuffer::new(4);
        buf.write(&[1, 2, 3, 4]);
        buf.write(&[5, 6]);
        // 1, 2 are gone; buffer now holds 3, 4, 5, 6
        assert_eq!(buf.read_last(4), vec![3, 4, 5, 6]);
        assert_eq!(buf.fill(), 4);
    }

    #[test]
    fn single_write_larger_than_capacity_keeps_only_the_tail() {
        let buf = RingBuffer::new(3);
        buf.write(&[1, 2, 3, 4, 5]);
        assert_eq!(buf.read_last(3), vec![3, 4, 5]);
    }

    #[test]
    fn read_last_caps_at_fill_not_requested_count() {
        let buf = RingBuffer::new(10);
        buf.write(&[1, 2]);
        assert_eq!(buf.read_last(100), vec![1, 2]);
    }

    #[test]
    fn clear_resets_fill_to_zero() {
        let buf = RingBuffer::new(4);
        buf.write(&[1, 2, 3]);
        buf.clear();
        assert_eq!(buf.fill(), 0);
        assert!(buf.read_last(10).is_empty());

        // capacity survives a clear; fresh writes behave like a new buffer
        buf.write(&[9]);
        assert_eq!(buf.read_last(10), vec![9]);
    }

    #[test]
    fn bounded_memory_never_exceeds_capacity_under_sustained_writes() {
        let capacity = 16_000 * 8; // WINDOW_SECONDS=8 @ 16kHz
        let buf = RingBuffer::new(capacity);
        for _ in 0..100 {
            buf.write(&vec![0i16; 3200]); // 200ms chunks
        }
        assert_eq!(buf.capacity(), capacity);
        assert!(buf.fill() <= capacity);
    }
}
