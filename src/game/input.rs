//! Input Capture and Normalization
//!
//! A paddle takes one movement direction plus up to three power-up slot
//! flags per tick. Rooms keep the latest frame per seat and derive rising
//! edges so that a held key activates a slot only once.

use serde::{Serialize, Deserialize};

// =============================================================================
// INPUT TYPES
// =============================================================================

/// Raw input state for a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Movement along the paddle axis: -1, 0 or +1
    /// (up/left of the lane is negative).
    pub direction: i8,

    /// Slot flags (packed bits):
    /// - Bit 0: slot 0 (curve)
    /// - Bit 1: slot 1 (boost)
    /// - Bit 2: slot 2 (swarm)
    /// - Bit 3-7: Reserved
    pub flags: u8,
}

impl InputFrame {
    /// Size in bytes
    pub const SIZE: usize = 2;

    /// Number of power-up slots.
    pub const SLOTS: usize = 3;

    /// Mask of all valid slot bits.
    pub const SLOT_MASK: u8 = 0b0000_0111;

    /// Idle frame.
    pub const fn new() -> Self {
        Self { direction: 0, flags: 0 }
    }

    /// Create input with movement direction.
    pub const fn with_direction(direction: i8) -> Self {
        Self { direction, flags: 0 }
    }

    /// Build from wire fields. Direction is clamped to -1..=1 and extra
    /// slot flags beyond the third are ignored.
    pub fn from_parts(direction: i8, slots: &[bool]) -> Self {
        let mut frame = Self::with_direction(direction.signum());
        for (slot, pressed) in slots.iter().take(Self::SLOTS).enumerate() {
            frame.set_slot(slot, *pressed);
        }
        frame
    }

    /// Check if a slot flag is set.
    #[inline]
    pub fn slot_pressed(&self, slot: usize) -> bool {
        slot < Self::SLOTS && self.flags & (1 << slot) != 0
    }

    /// Set a slot flag.
    #[inline]
    pub fn set_slot(&mut self, slot: usize, pressed: bool) {
        if slot >= Self::SLOTS {
            return;
        }
        if pressed {
            self.flags |= 1 << slot;
        } else {
            self.flags &= !(1 << slot);
        }
    }

    /// Slot flags as booleans.
    pub fn slots(&self) -> [bool; 3] {
        [self.slot_pressed(0), self.slot_pressed(1), self.slot_pressed(2)]
    }

    /// Same movement with only the slot flags that were not set in `previous`.
    #[inline]
    pub fn rising_edges(&self, previous: &InputFrame) -> InputFrame {
        InputFrame {
            direction: self.direction,
            flags: self.flags & !previous.flags & Self::SLOT_MASK,
        }
    }

    /// Check if this is an idle frame (no input).
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.direction == 0 && self.flags == 0
    }
}

/// Input with a client sequence number, the binary wire form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInput {
    /// Client-side counter, informational only
    pub sequence: u32,
    /// The input frame
    pub frame: InputFrame,
}

impl NetworkInput {
    /// Create from sequence and frame.
    pub fn new(sequence: u32, frame: InputFrame) -> Self {
        Self { sequence, frame }
    }

    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode with bincode.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

// =============================================================================
// INPUT LATCH
// =============================================================================

/// Per-seat input buffer owned by a room.
///
/// Input messages overwrite `latest` at any time; the tick loop calls
/// [`InputLatch::sample`] once per tick and never waits for input.
#[derive(Clone, Copy, Debug, Default)]
pub struct InputLatch {
    latest: InputFrame,
    previous: InputFrame,
}

impl InputLatch {
    /// Empty latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the latest frame.
    pub fn store(&mut self, frame: InputFrame) {
        self.latest = frame;
    }

    /// Latest raw frame.
    pub fn latest(&self) -> InputFrame {
        self.latest
    }

    /// Frame for this tick with edge-filtered slot flags.
    pub fn sample(&mut self) -> InputFrame {
        let frame = self.latest.rising_edges(&self.previous);
        self.previous = self.latest;
        frame
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_frame_flags() {
        let mut frame = InputFrame::new();
        assert!(!frame.slot_pressed(0));

        frame.set_slot(0, true);
        frame.set_slot(2, true);
        assert_eq!(frame.slots(), [true, false, true]);

        frame.set_slot(0, false);
        assert_eq!(frame.slots(), [false, false, true]);

        // Out of range slots are ignored
        frame.set_slot(5, true);
        assert!(!frame.slot_pressed(5));
        assert_eq!(frame.flags & !InputFrame::SLOT_MASK, 0);
    }

    #[test]
    fn test_from_parts_clamps() {
        let frame = InputFrame::from_parts(100, &[true, true, false, true]);
        assert_eq!(frame.direction, 1);
        assert_eq!(frame.slots(), [true, true, false]);

        let frame = InputFrame::from_parts(-7, &[]);
        assert_eq!(frame.direction, -1);
        assert!(!frame.slot_pressed(0));
    }

    #[test]
    fn test_held_slot_triggers_once() {
        let mut latch = InputLatch::new();
        latch.store(InputFrame::from_parts(1, &[true, false, false]));

        let first = latch.sample();
        assert!(first.slot_pressed(0));
        assert_eq!(first.direction, 1);

        // Still held: movement continues, slot does not re-trigger
        let second = latch.sample();
        assert!(!second.slot_pressed(0));
        assert_eq!(second.direction, 1);

        // Release then press again
        latch.store(InputFrame::with_direction(0));
        assert!(latch.sample().is_idle());
        latch.store(InputFrame::from_parts(0, &[true, false, false]));
        assert!(latch.sample().slot_pressed(0));
    }

    #[test]
    fn test_network_input_bincode() {
        let input = NetworkInput::new(42, InputFrame::from_parts(-1, &[false, true, false]));
        let bytes = input.to_bytes().unwrap();
        assert_eq!(NetworkInput::from_bytes(&bytes).unwrap(), input);
    }
}
