//! SPSC ring buffers for the audio/butler boundary.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Create an SPSC ring with at least `capacity` slots.
///
/// Capacity is rounded up to the next power of two so that masked index
/// arithmetic inside the ring stays cheap. Writer and reader halves must
/// each stay on a single thread.
pub fn spsc_ring<T>(capacity: usize) -> (RingWriter<T>, RingReader<T>) {
    let cap = capacity.max(2).next_power_of_two();
    let rb = HeapRb::<T>::new(cap);
    let (prod, cons) = rb.split();
    (RingWriter { prod }, RingReader { cons })
}

/// Producer half of an SPSC ring.
pub struct RingWriter<T> {
    prod: HeapProd<T>,
}

// Halves move between threads inside registry entries whose access is
// exclusive; shared references only reach the space queries.
unsafe impl<T: Send> Send for RingWriter<T> {}
unsafe impl<T: Send> Sync for RingWriter<T> {}

impl<T> RingWriter<T> {
    #[inline]
    pub fn write_space(&self) -> usize {
        self.prod.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.prod.capacity().get()
    }

    /// Push one item, handing it back if the ring is full.
    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), T> {
        self.prod.try_push(item)
    }
}

impl<T: Copy> RingWriter<T> {
    /// Write as many items as fit, returning the count written.
    pub fn write_slice(&mut self, items: &[T]) -> usize {
        self.prod.push_slice(items)
    }
}

/// Consumer half of an SPSC ring.
pub struct RingReader<T> {
    cons: HeapCons<T>,
}

unsafe impl<T: Send> Send for RingReader<T> {}
unsafe impl<T: Send> Sync for RingReader<T> {}

impl<T> RingReader<T> {
    #[inline]
    pub fn read_space(&self) -> usize {
        self.cons.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.cons.capacity().get()
    }

    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.cons.try_pop()
    }

    /// Discard everything currently readable.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while self.cons.try_pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

impl<T: Copy> RingReader<T> {
    /// Read up to `out.len()` items, returning the count read.
    pub fn read_slice(&mut self, out: &mut [T]) -> usize {
        self.cons.pop_slice(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let (w, r) = spsc_ring::<f32>(1000);
        assert_eq!(w.capacity(), 1024);
        assert_eq!(r.capacity(), 1024);
    }

    #[test]
    fn test_push_pop() {
        let (mut w, mut r) = spsc_ring::<u32>(4);
        assert!(w.push(1).is_ok());
        assert!(w.push(2).is_ok());
        assert_eq!(r.pop(), Some(1));
        assert_eq!(r.pop(), Some(2));
        assert_eq!(r.pop(), None);
    }

    #[test]
    fn test_space_accounting() {
        let (mut w, mut r) = spsc_ring::<f32>(8);
        let cap = w.capacity();
        assert_eq!(w.write_space(), cap);

        let written = w.write_slice(&[0.5; 5]);
        assert_eq!(written, 5);
        assert_eq!(w.write_space() + r.read_space(), cap);

        let mut out = [0.0f32; 3];
        assert_eq!(r.read_slice(&mut out), 3);
        assert_eq!(w.write_space() + r.read_space(), cap);
    }

    #[test]
    fn test_full_ring_rejects() {
        let (mut w, _r) = spsc_ring::<u8>(2);
        assert!(w.push(1).is_ok());
        assert!(w.push(2).is_ok());
        assert_eq!(w.push(3), Err(3));
    }

    #[test]
    fn test_clear() {
        let (mut w, mut r) = spsc_ring::<u8>(8);
        w.write_slice(&[1, 2, 3]);
        assert_eq!(r.clear(), 3);
        assert!(r.is_empty());
    }

    #[test]
    fn test_cross_thread() {
        let (mut w, mut r) = spsc_ring::<u64>(1024);
        let writer = std::thread::spawn(move || {
            for i in 0..1000u64 {
                while w.push(i).is_err() {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0u64;
        while expected < 1000 {
            if let Some(v) = r.pop() {
                assert_eq!(v, expected);
                expected += 1;
            }
        }
        writer.join().unwrap();
    }
}
