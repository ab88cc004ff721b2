//! Filter primitives used by the flight-event detector.

use heapless::{Deque, Vec};

/// Median filter - rejects sudden spikes in readings better than averaging.
/// Best kept small because every insert re-sorts by shifting.
#[derive(Debug)]
pub struct MedianFilter<const N: usize> {
    time_ordered: Deque<f32, N>,
    sorted: Vec<f32, N>,
}

impl<const N: usize> MedianFilter<N> {
    pub fn new() -> Self {
        Self {
            time_ordered: Deque::new(),
            sorted: Vec::new(),
        }
    }

    /// Add a value and get the current result of the filter. Assumes an odd
    /// window size once full.
    pub fn add(&mut self, value: f32) -> f32 {
        if self.time_ordered.is_full() {
            if let Some(evicted) = self.time_ordered.pop_front() {
                if let Some(at) = self.sorted.iter().position(|v| *v == evicted) {
                    self.sorted.remove(at);
                }
            }
        }
        let _ = self.time_ordered.push_back(value);
        let at = self
            .sorted
            .iter()
            .position(|v| *v > value)
            .unwrap_or(self.sorted.len());
        let _ = self.sorted.insert(at, value);
        // Middle element; lower of the two middles while still filling up
        self.sorted[(self.sorted.len() - 1) / 2]
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

impl<const N: usize> Default for MedianFilter<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Moving average - smooths out random noise. Best kept larger than the
/// median window, at the cost of a lag of about half the window size.
#[derive(Debug)]
pub struct AverageFilter<const N: usize> {
    buffer: Deque<f32, N>,
    sum: f32,
}

impl<const N: usize> AverageFilter<N> {
    pub fn new() -> Self {
        Self {
            buffer: Deque::new(),
            sum: 0.0,
        }
    }

    /// Add a value and get the current result of the averaging.
    pub fn add(&mut self, value: f32) -> f32 {
        if self.buffer.is_full() {
            if let Some(evicted) = self.buffer.pop_front() {
                self.sum -= evicted;
            }
        }
        let _ = self.buffer.push_back(value);
        self.sum += value;
        self.sum / self.buffer.len() as f32
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl<const N: usize> Default for AverageFilter<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Moving window - checks that values stay within a certain range for a
/// certain amount of time, such as altitude at landing.
#[derive(Debug)]
pub struct WindowCriteria {
    min: f32,
    max: f32,
    duration_us: u64,
    target_size: f32,
    target_duration_us: u64,
}

impl WindowCriteria {
    pub fn new(target_size: f32, target_duration_us: u64) -> Self {
        Self {
            // No matter target_size, refreshed on the first sample
            min: f32::MIN,
            max: f32::MAX,
            duration_us: 0,
            target_size,
            target_duration_us,
        }
    }

    /// Update the window with a new value, resetting it if the span grows
    /// beyond the target size.
    pub fn add(&mut self, value: f32, since_update_us: u64) {
        if value > self.max {
            self.max = value;
        } else if value < self.min {
            self.min = value;
        }

        if self.max - self.min > self.target_size {
            self.max = value;
            self.min = value;
            self.duration_us = 0;
        } else {
            self.duration_us += since_update_us;
        }
    }

    /// Whether the target size has held for the target duration.
    pub fn satisfied(&self) -> bool {
        self.max - self.min <= self.target_size && self.duration_us >= self.target_duration_us
    }
}
