//! Bounded reading history for one (device, beacon) pair

use std::collections::VecDeque;

/// Default number of readings kept per (device, beacon) pair
pub const DEFAULT_WINDOW_CAPACITY: usize = 5;

/// FIFO window of raw RSSI samples with a uniform average.
///
/// Invariant: `len() <= capacity()`, contents are the most recent samples
/// in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Default for ReadingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl ReadingWindow {
    /// A zero capacity is bumped to 1 so a window always holds the latest sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Arithmetic mean, or `None` when empty
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_has_no_average() {
        let window = ReadingWindow::default();
        assert!(window.is_empty());
        assert_eq!(window.average(), None);
    }

    #[test]
    fn test_average() {
        let mut window = ReadingWindow::new(5);
        window.push(-60.0);
        window.push(-70.0);
        assert_eq!(window.average(), Some(-65.0));
    }

    #[test]
    fn test_fifo_eviction_keeps_last_values_in_order() {
        let mut window = ReadingWindow::new(5);
        for v in 1..=8 {
            window.push(-(v as f64));
        }
        assert_eq!(window.len(), 5);
        let contents: Vec<f64> = window.iter().collect();
        assert_eq!(contents, vec![-4.0, -5.0, -6.0, -7.0, -8.0]);
        assert_eq!(window.average(), Some(-6.0));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut window = ReadingWindow::new(3);
        for i in 0..100 {
            window.push(i as f64);
            assert!(window.len() <= window.capacity());
        }
    }

    #[test]
    fn test_zero_capacity_holds_latest() {
        let mut window = ReadingWindow::new(0);
        window.push(-50.0);
        window.push(-55.0);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.average(), Some(-55.0));
    }
}
