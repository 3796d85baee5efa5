//! Lock-free accumulation array shared across worker threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed-size array of `f64` totals supporting concurrent addition.
///
/// Values are stored as `AtomicU64` bit patterns and updated with a
/// compare-and-swap loop. Addition is commutative, so the total at the end of
/// a phase equals the sum of all contributions; the reduction order, and with
/// it the result at ULP level, is unspecified.
#[derive(Debug, Default)]
pub struct AtomicF64Array {
    bits: Vec<AtomicU64>,
}

impl AtomicF64Array {
    /// Creates an array of `len` zeros.
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self {
            bits: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns true if the array has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Atomically adds `value` to the slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn add(&self, index: usize, value: f64) {
        let slot = &self.bits[index];
        let mut current = slot.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match slot.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the current value of the slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> f64 {
        f64::from_bits(self.bits[index].load(Ordering::Relaxed))
    }

    /// Returns a snapshot of all slots.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        self.bits
            .iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Relaxed)))
            .collect()
    }

    /// Returns the sum over all slots.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.bits
            .iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Relaxed)))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn zeros_and_add() {
        let array = AtomicF64Array::zeros(3);
        assert_eq!(array.len(), 3);
        assert!(!array.is_empty());
        assert_eq!(array.get(1), 0.0);

        array.add(1, 0.25);
        array.add(1, 0.5);
        array.add(2, -1.0);
        assert_approx_eq!(f64, array.get(1), 0.75, ulps = 2);
        assert_approx_eq!(f64, array.get(2), -1.0, ulps = 2);
        assert_approx_eq!(f64, array.total(), -0.25, ulps = 2);
        assert_eq!(array.to_vec(), vec![0.0, 0.75, -1.0]);
    }

    #[test]
    fn concurrent_adds_sum_up() {
        let array = AtomicF64Array::zeros(1);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10_000 {
                        array.add(0, 1.0);
                    }
                });
            }
        });
        assert_approx_eq!(f64, array.get(0), 40_000.0, ulps = 2);
    }
}
