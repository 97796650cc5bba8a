//! Control inputs and the per-actor input history ring
//!
//! The same history type backs the authoritative server (inputs submitted by
//! clients) and the local client (its own inputs, consumed for prediction).
//! Each slot is one fixed logical tick of control.

use serde::{Deserialize, Serialize};

use crate::consts::INPUT_HISTORY_CAPACITY;

/// Control bitset packed into a single byte for the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputFlags {
    pub bits: u8,
}

impl InputFlags {
    pub const LEFT: u8 = 1 << 0;
    pub const RIGHT: u8 = 1 << 1;
    pub const ACCELERATE: u8 = 1 << 2;
    pub const BRAKE: u8 = 1 << 3;

    const ALL: u8 = Self::LEFT | Self::RIGHT | Self::ACCELERATE | Self::BRAKE;

    /// Unknown bits are dropped
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            bits: bits & Self::ALL,
        }
    }

    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    #[inline]
    pub const fn is_pressed(&self, flag: u8) -> bool {
        self.bits & flag != 0
    }

    #[inline]
    pub fn set(&mut self, flag: u8, pressed: bool) {
        if pressed {
            self.bits |= flag & Self::ALL;
        } else {
            self.bits &= !flag;
        }
    }

    #[inline]
    pub const fn left(&self) -> bool {
        self.is_pressed(Self::LEFT)
    }

    #[inline]
    pub const fn right(&self) -> bool {
        self.is_pressed(Self::RIGHT)
    }

    #[inline]
    pub const fn accelerate(&self) -> bool {
        self.is_pressed(Self::ACCELERATE)
    }

    #[inline]
    pub const fn brake(&self) -> bool {
        self.is_pressed(Self::BRAKE)
    }
}

/// One tick of control
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Input {
    /// Microseconds, monotonic per client
    pub timestamp: i64,
    pub flags: InputFlags,
    pub steering_multiplier: f32,
    pub acceleration_multiplier: f32,
}

impl Default for Input {
    fn default() -> Self {
        Self::new(0, InputFlags::empty())
    }
}

impl Input {
    /// Digital input at full strength
    pub fn new(timestamp: i64, flags: InputFlags) -> Self {
        Self {
            timestamp,
            flags,
            steering_multiplier: 1.0,
            acceleration_multiplier: 1.0,
        }
    }

    /// Analog input; multipliers are clamped to [0, 1] (NaN becomes 0)
    pub fn with_multipliers(
        timestamp: i64,
        flags: InputFlags,
        steering_multiplier: f32,
        acceleration_multiplier: f32,
    ) -> Self {
        Self {
            timestamp,
            flags,
            steering_multiplier: clamp_unit(steering_multiplier),
            acceleration_multiplier: clamp_unit(acceleration_multiplier),
        }
    }

    /// Same input with its control bits ignored (actor cannot be steered)
    pub fn without_control(&self) -> Self {
        Self {
            flags: InputFlags::empty(),
            ..*self
        }
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Fixed-capacity ring of inputs
///
/// `write_index` is the next free slot, `last_consumed_index` the last slot
/// the integrator applied. Recording into a full ring silently overwrites the
/// oldest unconsumed slot: consumers only ever see the most recent
/// `capacity` inputs.
#[derive(Debug, Clone)]
pub struct InputHistory {
    slots: Vec<Input>,
    write_index: usize,
    last_consumed_index: usize,
    pending: usize,
    last_recorded_timestamp: Option<i64>,
    last_consumed_timestamp: Option<i64>,
}

impl Default for InputHistory {
    fn default() -> Self {
        Self::new(INPUT_HISTORY_CAPACITY)
    }
}

impl InputHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![Input::default(); capacity],
            write_index: 0,
            last_consumed_index: capacity - 1,
            pending: 0,
            last_recorded_timestamp: None,
            last_consumed_timestamp: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    pub fn last_consumed_index(&self) -> usize {
        self.last_consumed_index
    }

    /// Inputs recorded but not yet consumed
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn last_recorded_timestamp(&self) -> Option<i64> {
        self.last_recorded_timestamp
    }

    /// Timestamp of the last input the integrator applied
    pub fn last_consumed_timestamp(&self) -> Option<i64> {
        self.last_consumed_timestamp
    }

    /// Append an input, overwriting the oldest unconsumed one when full
    pub fn record(&mut self, input: Input) {
        let capacity = self.capacity();
        self.slots[self.write_index] = input;
        self.write_index = (self.write_index + 1) % capacity;
        if self.pending == capacity {
            self.last_consumed_index = (self.last_consumed_index + 1) % capacity;
        } else {
            self.pending += 1;
        }
        self.last_recorded_timestamp = Some(input.timestamp);
    }

    /// Record only if strictly newer than the last recorded input
    ///
    /// Duplicated or reordered unreliable packets are dropped here.
    pub fn record_if_newer(&mut self, input: Input) -> bool {
        if self
            .last_recorded_timestamp
            .is_some_and(|last| input.timestamp <= last)
        {
            return false;
        }
        self.record(input);
        true
    }

    /// The input the integrator applied most recently
    pub fn last_consumed(&self) -> Option<&Input> {
        self.last_consumed_timestamp
            .map(|_| &self.slots[self.last_consumed_index])
    }

    /// Consume the oldest pending input
    pub fn pop_oldest(&mut self) -> Option<Input> {
        if self.pending == 0 {
            return None;
        }
        let capacity = self.capacity();
        self.last_consumed_index = (self.last_consumed_index + 1) % capacity;
        self.pending -= 1;
        let input = self.slots[self.last_consumed_index];
        self.last_consumed_timestamp = Some(input.timestamp);
        Some(input)
    }

    /// Consume every pending input, oldest first
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { history: self }
    }

    /// Pending inputs oldest first, without consuming them
    pub fn peek_pending(&self) -> impl Iterator<Item = &Input> + '_ {
        let capacity = self.capacity();
        (1..=self.pending).map(move |offset| &self.slots[(self.last_consumed_index + offset) % capacity])
    }

    /// Forget every pending input (disconnect, respawn)
    pub fn clear(&mut self) {
        let capacity = self.capacity();
        self.last_consumed_index = (self.write_index + capacity - 1) % capacity;
        self.pending = 0;
    }
}

/// Consuming iterator returned by [`InputHistory::drain`]
pub struct Drain<'a> {
    history: &'a mut InputHistory,
}

impl Iterator for Drain<'_> {
    type Item = Input;

    fn next(&mut self) -> Option<Input> {
        self.history.pop_oldest()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.history.pending, Some(self.history.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(ts: i64) -> Input {
        Input::new(ts, InputFlags::from_bits(InputFlags::ACCELERATE))
    }

    #[test]
    fn test_record_and_drain_in_order() {
        let mut history = InputHistory::new(8);
        for ts in 1..=5 {
            history.record(input(ts));
        }
        assert_eq!(history.pending(), 5);
        assert_eq!(history.write_index(), 5);

        let drained: Vec<i64> = history.drain().map(|i| i.timestamp).collect();
        assert_eq!(drained, vec![1, 2, 3, 4, 5]);
        assert_eq!(history.pending(), 0);
        assert_eq!(history.last_consumed_index(), 4);
        assert_eq!(history.last_consumed_timestamp(), Some(5));
        assert_eq!(history.last_consumed().map(|i| i.timestamp), Some(5));
    }

    #[test]
    fn test_overflow_keeps_most_recent_inputs() {
        let mut history = InputHistory::new(INPUT_HISTORY_CAPACITY);
        for ts in 0..200 {
            history.record(input(ts));
        }
        assert_eq!(history.pending(), INPUT_HISTORY_CAPACITY);

        let drained: Vec<i64> = history.drain().map(|i| i.timestamp).collect();
        let expected: Vec<i64> = (80..200).collect();
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_consumed_index_never_laps_writer() {
        let mut history = InputHistory::new(4);
        for ts in 0..3 {
            history.record(input(ts));
        }
        assert_eq!(history.pop_oldest().map(|i| i.timestamp), Some(0));
        for ts in 3..10 {
            history.record(input(ts));
            assert!(history.pending() <= history.capacity());
        }
        // Full ring: the slot after the last consumed one is the oldest input
        let drained: Vec<i64> = history.drain().map(|i| i.timestamp).collect();
        assert_eq!(drained, vec![6, 7, 8, 9]);
        assert_eq!((history.last_consumed_index() + 1) % 4, history.write_index());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut history = InputHistory::new(4);
        history.record(input(10));
        history.record(input(11));
        let peeked: Vec<i64> = history.peek_pending().map(|i| i.timestamp).collect();
        assert_eq!(peeked, vec![10, 11]);
        assert_eq!(history.pending(), 2);
    }

    #[test]
    fn test_record_if_newer_drops_stale() {
        let mut history = InputHistory::new(4);
        assert!(history.record_if_newer(input(5)));
        assert!(!history.record_if_newer(input(5)));
        assert!(!history.record_if_newer(input(3)));
        assert!(history.record_if_newer(input(6)));
        assert_eq!(history.pending(), 2);
    }

    #[test]
    fn test_clear_discards_pending() {
        let mut history = InputHistory::new(4);
        history.record(input(1));
        history.record(input(2));
        history.clear();
        assert_eq!(history.pending(), 0);
        assert!(history.pop_oldest().is_none());

        history.record(input(3));
        assert_eq!(history.pop_oldest().map(|i| i.timestamp), Some(3));
    }

    #[test]
    fn test_multipliers_clamped() {
        let i = Input::with_multipliers(0, InputFlags::empty(), 1.5, f32::NAN);
        assert_eq!(i.steering_multiplier, 1.0);
        assert_eq!(i.acceleration_multiplier, 0.0);
        assert_eq!(InputFlags::from_bits(0xff).bits, 0x0f);
    }
}
