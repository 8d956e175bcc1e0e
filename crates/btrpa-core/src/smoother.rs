//! Per-address RSSI sliding window.

use std::collections::{HashMap, VecDeque};

/// Bounded FIFO of RSSI readings for one address.
#[derive(Debug, Clone)]
pub struct RssiWindow {
    samples: VecDeque<i16>,
    capacity: usize,
}

impl RssiWindow {
    /// Create a window; a capacity of 0 is treated as 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a reading, evicting the oldest when full, and return the average.
    pub fn push(&mut self, rssi: i16) -> i16 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rssi);
        self.average()
    }

    /// Average the window would have after [`push`](Self::push), without
    /// changing it.
    #[must_use]
    pub fn preview(&self, rssi: i16) -> i16 {
        let skip = usize::from(self.samples.len() == self.capacity);
        let kept = self.samples.iter().skip(skip).copied();
        let (sum, count) = kept.fold((i64::from(rssi), 1i64), |(sum, count), sample| {
            (sum + i64::from(sample), count + 1)
        });
        rounded_mean(sum, count)
    }

    /// Rounded mean of the current readings; `0` when empty.
    #[must_use]
    pub fn average(&self) -> i16 {
        if self.samples.is_empty() {
            return 0;
        }
        let sum: i64 = self.samples.iter().map(|s| i64::from(*s)).sum();
        rounded_mean(sum, self.samples.len() as i64)
    }

    /// Number of readings held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` when no readings are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// Half-way values round to even.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn rounded_mean(sum: i64, count: i64) -> i16 {
    (sum as f64 / count as f64).round_ties_even() as i16
}

/// RSSI windows for every address, all with the same capacity.
#[derive(Debug, Clone)]
pub struct RssiSmoother {
    window_size: usize,
    windows: HashMap<String, RssiWindow>,
}

impl RssiSmoother {
    /// Create a smoother; a window size of 0 is treated as 1.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            windows: HashMap::new(),
        }
    }

    /// Configured window size.
    #[must_use]
    pub const fn window_size(&self) -> usize {
        self.window_size
    }

    /// Record a reading for `address` and return the windowed average.
    pub fn push(&mut self, address: &str, rssi: i16) -> i16 {
        let size = self.window_size;
        self.windows
            .entry(address.to_string())
            .or_insert_with(|| RssiWindow::new(size))
            .push(rssi)
    }

    /// Average `push` would return, without recording the reading.
    #[must_use]
    pub fn preview(&self, address: &str, rssi: i16) -> i16 {
        self.windows
            .get(address)
            .map_or(rssi, |window| window.preview(rssi))
    }

    /// Readings currently held for `address`.
    #[must_use]
    pub fn samples(&self, address: &str) -> usize {
        self.windows.get(address).map_or(0, RssiWindow::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_reading() {
        let mut smoother = RssiSmoother::new(3);
        assert_eq!(smoother.push("AA:BB", -60), -60);
    }

    #[test]
    fn test_average_of_multiple() {
        let mut smoother = RssiSmoother::new(3);
        smoother.push("AA:BB", -60);
        smoother.push("AA:BB", -66);
        assert_eq!(smoother.push("AA:BB", -63), -63);
    }

    #[test]
    fn test_window_evicts_old() {
        let mut smoother = RssiSmoother::new(2);
        smoother.push("AA:BB", -100);
        smoother.push("AA:BB", -50);
        assert_eq!(smoother.push("AA:BB", -60), -55);
        assert_eq!(smoother.samples("AA:BB"), 2);
    }

    #[test]
    fn test_separate_devices() {
        let mut smoother = RssiSmoother::new(3);
        smoother.push("DEV1", -40);
        smoother.push("DEV2", -80);
        assert_eq!(smoother.push("DEV1", -40), -40);
        assert_eq!(smoother.push("DEV2", -80), -80);
    }

    #[test]
    fn test_window_minimum_one() {
        let mut smoother = RssiSmoother::new(0);
        assert_eq!(smoother.window_size(), 1);
        smoother.push("AA", -30);
        assert_eq!(smoother.push("AA", -90), -90);
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let mut smoother = RssiSmoother::new(2);
        smoother.push("AA", -40);
        smoother.push("AA", -60);
        assert_eq!(smoother.preview("AA", -80), -70);
        assert_eq!(smoother.samples("AA"), 2);
        assert_eq!(smoother.preview("BB", -77), -77);
        assert_eq!(smoother.samples("BB"), 0);
    }

    #[test]
    fn test_rounding_half_to_even() {
        let mut window = RssiWindow::new(2);
        window.push(-62);
        assert_eq!(window.push(-63), -62);

        let mut window = RssiWindow::new(2);
        window.push(-60);
        assert_eq!(window.push(-61), -60);

        let mut window = RssiWindow::new(2);
        window.push(-63);
        assert_eq!(window.preview(-64), -64);
    }

    proptest! {
        #[test]
        fn prop_average_is_mean_of_last_w(
            window in 1usize..8,
            readings in proptest::collection::vec(-120i16..0, 8..40),
        ) {
            let mut smoother = RssiSmoother::new(window);
            let mut last = 0;
            for (i, rssi) in readings.iter().enumerate() {
                let preview = smoother.preview("X", *rssi);
                last = smoother.push("X", *rssi);
                prop_assert_eq!(preview, last);
                prop_assert!(smoother.samples("X") <= window);
                prop_assert_eq!(smoother.samples("X"), (i + 1).min(window));
            }
            let tail = &readings[readings.len() - window..];
            let sum: i64 = tail.iter().map(|r| i64::from(*r)).sum();
            let expected = (sum as f64 / window as f64).round_ties_even() as i16;
            prop_assert_eq!(last, expected);
        }

        #[test]
        fn prop_window_of_one_is_passthrough(readings in proptest::collection::vec(-120i16..0, 1..20)) {
            let mut smoother = RssiSmoother::new(1);
            for rssi in readings {
                prop_assert_eq!(smoother.push("X", rssi), rssi);
            }
        }
    }
}
