use crate::error::ConfigError;
use std::ops::{BitOr, BitOrAssign, Index, IndexMut, Range};

/// Index of a data clock cycle.
pub type Tick = i32;

/// Width of the free running clock counter that is appended to every timing
/// value produced by the finder.
pub const CLOCK_COUNTER_BITS: u32 = 5;

/// A digital signal, i.e. the set of clock intervals during which a line is
/// high.
///
/// Intervals are half-open (`rise..fall`), sorted, and never overlap or touch;
/// touching intervals are merged when set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signal {
    intervals: Vec<Range<Tick>>,
}

impl Signal {
    /// Creates a signal that is never active.
    pub fn new() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }
    /// Creates a signal that is active during `rise..fall`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsf::signal::Signal;
    ///
    /// let signal = Signal::pulse(10, 14);
    /// assert!(signal.state(10));
    /// assert!(signal.state(13));
    /// assert!(!signal.state(14));
    /// ```
    pub fn pulse(rise: Tick, fall: Tick) -> Self {
        let mut signal = Self::new();
        signal.set(rise, fall);
        signal
    }
    /// Drives the signal high during `rise..fall`. Empty ranges are ignored.
    pub fn set(&mut self, rise: Tick, fall: Tick) {
        if rise >= fall {
            return;
        }
        let first = self.intervals.partition_point(|r| r.end < rise);
        let last = self.intervals.partition_point(|r| r.start <= fall);

        let mut merged = rise..fall;
        if first < last {
            merged.start = merged.start.min(self.intervals[first].start);
            merged.end = merged.end.max(self.intervals[last - 1].end);
        }
        self.intervals.splice(first..last, std::iter::once(merged));
    }
    /// Drives the signal low during `rise..fall`.
    pub fn unset(&mut self, rise: Tick, fall: Tick) {
        if rise >= fall {
            return;
        }
        let mut kept = Vec::with_capacity(self.intervals.len() + 1);
        for r in self.intervals.drain(..) {
            if r.end <= rise || r.start >= fall {
                kept.push(r);
                continue;
            }
            if r.start < rise {
                kept.push(r.start..rise);
            }
            if r.end > fall {
                kept.push(fall..r.end);
            }
        }
        self.intervals = kept;
    }
    /// Returns `true` if the signal is high at any tick.
    pub fn is_active(&self) -> bool {
        !self.intervals.is_empty()
    }
    /// Returns the level of the signal at `tick`.
    pub fn state(&self, tick: Tick) -> bool {
        let i = self.intervals.partition_point(|r| r.end <= tick);
        self.intervals.get(i).is_some_and(|r| r.start <= tick)
    }
    /// Returns `true` if the signal goes from low to high at `tick`.
    pub fn rise_edge(&self, tick: Tick) -> bool {
        self.intervals
            .binary_search_by_key(&tick, |r| r.start)
            .is_ok()
    }
    /// Returns `true` if the signal goes from high to low at `tick`.
    pub fn fall_edge(&self, tick: Tick) -> bool {
        self.intervals.binary_search_by_key(&tick, |r| r.end).is_ok()
    }
    /// All ticks at which the signal changes level, in increasing order.
    pub fn state_changes(&self) -> Vec<Tick> {
        self.intervals
            .iter()
            .flat_map(|r| [r.start, r.end])
            .collect()
    }
    /// Stretches every active interval so that it lasts at least `width`
    /// clocks. This is the shaping applied to wire hits before they enter the
    /// finder.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsf::signal::Signal;
    ///
    /// let mut signal = Signal::pulse(0, 2);
    /// signal.set(5, 30);
    /// signal.widen(16);
    /// assert_eq!(signal.intervals(), &[0..30]);
    /// ```
    pub fn widen(&mut self, width: Tick) {
        let stretched: Vec<_> = self
            .intervals
            .iter()
            .map(|r| r.start..r.end.max(r.start + width))
            .collect();
        self.intervals.clear();
        for r in stretched {
            self.set(r.start, r.end);
        }
    }
    /// The active intervals of the signal.
    pub fn intervals(&self) -> &[Range<Tick>] {
        &self.intervals
    }
}

impl FromIterator<Range<Tick>> for Signal {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Range<Tick>>,
    {
        let mut signal = Self::new();
        for r in iter {
            signal.set(r.start, r.end);
        }

        signal
    }
}

impl BitOrAssign<&Signal> for Signal {
    fn bitor_assign(&mut self, rhs: &Signal) {
        for r in &rhs.intervals {
            self.set(r.start, r.end);
        }
    }
}

impl BitOr for &Signal {
    type Output = Signal;

    fn bitor(self, rhs: &Signal) -> Signal {
        let mut signal = self.clone();
        signal |= rhs;
        signal
    }
}

/// An ordered group of [`Signal`]s read together as a multi-bit value. Signal
/// `i` is bit `i` of the value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalVector {
    signals: Vec<Signal>,
}

impl SignalVector {
    /// Creates an empty vector.
    pub fn new() -> Self {
        Self {
            signals: Vec::new(),
        }
    }
    /// Creates a vector of `width` inactive signals.
    pub fn with_width(width: usize) -> Self {
        Self {
            signals: vec![Signal::new(); width],
        }
    }
    pub fn push(&mut self, signal: Signal) {
        self.signals.push(signal);
    }
    pub fn len(&self) -> usize {
        self.signals.len()
    }
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Signal> {
        self.signals.iter()
    }
    /// Returns the value of the vector at `tick`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsf::signal::{Signal, SignalVector};
    ///
    /// let vector: SignalVector = [Signal::pulse(0, 4), Signal::new(), Signal::pulse(2, 6)]
    ///     .into_iter()
    ///     .collect();
    /// assert_eq!(vector.state(1), 0b001);
    /// assert_eq!(vector.state(3), 0b101);
    /// assert_eq!(vector.state(5), 0b100);
    /// ```
    pub fn state(&self, tick: Tick) -> u32 {
        debug_assert!(self.signals.len() <= 32);
        self.signals
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state(tick))
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }
    /// Returns `true` if any member is high at `tick`.
    pub fn active_at(&self, tick: Tick) -> bool {
        self.signals.iter().any(|s| s.state(tick))
    }
    /// Returns `true` if any member is ever high.
    pub fn is_active(&self) -> bool {
        self.signals.iter().any(Signal::is_active)
    }
    /// Sorted union of the state changes of all members. A tick at which
    /// several members change appears once.
    pub fn state_changes(&self) -> Vec<Tick> {
        let mut ticks: Vec<_> = self.signals.iter().flat_map(Signal::state_changes).collect();
        ticks.sort_unstable();
        ticks.dedup();
        ticks
    }
    /// Drives the vector to `value` during `rise..fall`. Bits beyond the
    /// vector width are ignored.
    pub fn set_value(&mut self, rise: Tick, fall: Tick, value: u32) {
        for (i, signal) in self.signals.iter_mut().enumerate() {
            if value & (1 << i) != 0 {
                signal.set(rise, fall);
            } else {
                signal.unset(rise, fall);
            }
        }
    }
    /// Widens every member, see [`Signal::widen`].
    pub fn widen(&mut self, width: Tick) {
        for signal in &mut self.signals {
            signal.widen(width);
        }
    }
}

impl Index<usize> for SignalVector {
    type Output = Signal;

    fn index(&self, index: usize) -> &Signal {
        &self.signals[index]
    }
}

impl IndexMut<usize> for SignalVector {
    fn index_mut(&mut self, index: usize) -> &mut Signal {
        &mut self.signals[index]
    }
}

impl FromIterator<Signal> for SignalVector {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Signal>,
    {
        Self {
            signals: iter.into_iter().collect(),
        }
    }
}

/// The data clock window simulated for one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Clock {
    min: Tick,
    max: Tick,
}

impl Clock {
    /// Creates a clock covering the ticks `min..=max`.
    pub fn new(min: Tick, max: Tick) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::ClockWindow { min, max });
        }
        Ok(Self { min, max })
    }
    pub fn min(&self) -> Tick {
        self.min
    }
    pub fn max(&self) -> Tick {
        self.max
    }
    /// Returns `true` if `tick` is inside the simulated window.
    pub fn contains(&self, tick: Tick) -> bool {
        (self.min..=self.max).contains(&tick)
    }
    /// Value of the free running clock counter at `tick`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsf::signal::Clock;
    ///
    /// let clock = Clock::new(-100, 100)?;
    /// assert_eq!(clock.counter(33), 1);
    /// assert_eq!(clock.counter(-1), 31);
    /// # Ok::<(), tsf::error::ConfigError>(())
    /// ```
    pub fn counter(&self, tick: Tick) -> u32 {
        tick.rem_euclid(1 << CLOCK_COUNTER_BITS).unsigned_abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_set_merges() {
        let mut signal = Signal::new();
        signal.set(10, 20);
        signal.set(30, 40);
        assert_eq!(signal.intervals(), &[10..20, 30..40]);

        signal.set(20, 25);
        assert_eq!(signal.intervals(), &[10..25, 30..40]);

        signal.set(5, 35);
        assert_eq!(signal.intervals(), &[5..40]);

        signal.set(50, 50);
        assert_eq!(signal.intervals(), &[5..40]);
    }

    #[test]
    fn signal_unset_splits() {
        let mut signal = Signal::pulse(0, 10);
        signal.unset(3, 5);
        assert_eq!(signal.intervals(), &[0..3, 5..10]);

        signal.unset(-5, 1);
        assert_eq!(signal.intervals(), &[1..3, 5..10]);

        signal.unset(0, 100);
        assert!(!signal.is_active());
    }

    #[test]
    fn signal_edges() {
        let signal: Signal = [2..4, 8..9].into_iter().collect();

        assert!(signal.rise_edge(2));
        assert!(!signal.rise_edge(3));
        assert!(signal.fall_edge(4));
        assert!(signal.rise_edge(8));
        assert!(signal.fall_edge(9));
        assert!(!signal.state(1));
        assert!(signal.state(2));
        assert!(!signal.state(4));
        assert_eq!(signal.state_changes(), vec![2, 4, 8, 9]);
    }

    #[test]
    fn signal_widen_keeps_long_pulses() {
        let mut signal: Signal = [0..40, 100..101].into_iter().collect();
        signal.widen(16);
        assert_eq!(signal.intervals(), &[0..40, 100..116]);
    }

    #[test]
    fn signal_widen_merges_close_pulses() {
        let mut signal: Signal = [0..1, 10..11].into_iter().collect();
        signal.widen(16);
        assert_eq!(signal.intervals(), &[0..26]);
        assert!(!signal.rise_edge(10));
    }

    #[test]
    fn signal_bitor() {
        let a = Signal::pulse(0, 5);
        let b = Signal::pulse(3, 8);
        assert_eq!((&a | &b).intervals(), &[0..8]);
    }

    #[test]
    fn signal_vector_state_changes_are_merged() {
        let vector: SignalVector = [Signal::pulse(0, 4), Signal::pulse(4, 6), Signal::pulse(0, 6)]
            .into_iter()
            .collect();
        assert_eq!(vector.state_changes(), vec![0, 4, 6]);
        assert!(vector.is_active());
        assert!(vector.active_at(5));
        assert!(!vector.active_at(6));
    }

    #[test]
    fn signal_vector_set_value() {
        let mut vector = SignalVector::with_width(4);
        vector.set_value(0, 10, 0b1010);
        vector.set_value(5, 10, 0b0011);
        assert_eq!(vector.state(0), 0b1010);
        assert_eq!(vector.state(5), 0b0011);
        assert_eq!(vector.state(10), 0);
    }

    #[test]
    fn clock_window() {
        let clock = Clock::new(0, 10).unwrap();
        assert!(clock.contains(0));
        assert!(clock.contains(10));
        assert!(!clock.contains(11));
        assert!(Clock::new(1, 0).is_err());
        assert_eq!(clock.counter(31), 31);
        assert_eq!(clock.counter(32), 0);
    }
}
