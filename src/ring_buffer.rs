//! # Ring Buffer Module
//!
//! Fixed-capacity circular sample store backing the scrolling display windows.
//!
//! The buffer is pre-filled with `T::default()` so its logical length always
//! equals its capacity. Pushing evicts the oldest value ("roll" semantics), and
//! a head index avoids shifting data physically.

pub struct RingBuffer<T> {
    data: Vec<T>,
    /// Index of the oldest value, which is also the next slot to overwrite
    head: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Creates a buffer holding `capacity` values.
    ///
    /// A zero capacity is raised to one so `snapshot()` is never empty.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity.max(1)],
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn push(&mut self, value: T) {
        self.data[self.head] = value;
        self.head = (self.head + 1) % self.data.len();
    }

    /// Values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (newer, older) = self.data.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    /// Copy of the window in FIFO order, always `capacity()` long.
    pub fn snapshot(&self) -> Vec<T> {
        self.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = T::default());
        self.head = 0;
    }
}

impl RingBuffer<f64> {
    pub fn min(&self) -> f64 {
        self.data.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min_max(&self) -> (f64, f64) {
        (self.min(), self.max())
    }
}
