use serde::{Deserialize, Serialize};

/// Fixed-length history buffer with a moving head.
///
/// Index 0 is always the most recent entry, rising indices go back in time.
/// Pushing rotates the head instead of shifting the storage, so per-step cost
/// is O(1) regardless of history length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBuffer {
    values: Vec<f64>,
    head: usize,
}

impl RingBuffer {
    /// Create a buffer of `len` entries, all zero.
    pub fn zeros(len: usize) -> Self {
        assert!(len > 0, "ring buffer length must be positive");
        Self {
            values: vec![0.0; len],
            head: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entry `i` steps back in time (0 = newest).
    pub fn get(&self, i: usize) -> f64 {
        debug_assert!(i < self.values.len());
        self.values[(self.head + i) % self.values.len()]
    }

    /// Overwrite the newest entry.
    pub fn set_head(&mut self, value: f64) {
        let head = self.head;
        self.values[head] = value;
    }

    /// Add to the newest entry.
    pub fn add_to_head(&mut self, value: f64) {
        let head = self.head;
        self.values[head] += value;
    }

    /// Rotate the buffer one step forward and install `value` as the newest
    /// entry. The oldest entry falls off.
    pub fn push_front(&mut self, value: f64) {
        let n = self.values.len();
        self.head = (self.head + n - 1) % n;
        let head = self.head;
        self.values[head] = value;
    }

    /// Iterate newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.values.len()).map(move |i| self.get(i))
    }

    /// Dot product with a weight vector aligned to the newest entry.
    ///
    /// Only `min(weights.len(), self.len())` terms contribute.
    pub fn convolve(&self, weights: &[f64]) -> f64 {
        weights
            .iter()
            .take(self.values.len())
            .enumerate()
            .map(|(i, w)| w * self.get(i))
            .sum()
    }

    /// Replace the full contents, newest first.
    pub fn fill_from(&mut self, newest_first: &[f64]) {
        let n = self.values.len();
        self.head = 0;
        for i in 0..n {
            self.values[i] = newest_first.get(i).copied().unwrap_or(0.0);
        }
    }

    /// Contents as a plain vector, newest first.
    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rotates_without_shifting() {
        let mut rb = RingBuffer::zeros(3);
        rb.push_front(1.0);
        rb.push_front(2.0);
        rb.push_front(3.0);
        assert_eq!(rb.to_vec(), vec![3.0, 2.0, 1.0]);
        rb.push_front(4.0);
        assert_eq!(rb.to_vec(), vec![4.0, 3.0, 2.0]);
    }

    #[test]
    fn convolution_aligns_with_newest() {
        let mut rb = RingBuffer::zeros(3);
        rb.push_front(10.0); // oldest after later pushes
        rb.push_front(20.0);
        rb.push_front(30.0);
        // 0.5*30 + 0.3*20 + 0.2*10
        assert!((rb.convolve(&[0.5, 0.3, 0.2]) - 23.0).abs() < 1e-12);
    }

    #[test]
    fn convolution_with_short_weights() {
        let mut rb = RingBuffer::zeros(4);
        rb.push_front(5.0);
        assert!((rb.convolve(&[1.0]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn head_mutation() {
        let mut rb = RingBuffer::zeros(2);
        rb.push_front(1.0);
        rb.add_to_head(0.5);
        assert!((rb.get(0) - 1.5).abs() < 1e-12);
        rb.set_head(2.0);
        assert!((rb.get(0) - 2.0).abs() < 1e-12);
    }
}
