//! Simulation Constants and Match Settings
//!
//! Geometry and tuning constants shared by physics and AI, plus the
//! per-match settings chosen in a lobby.

use serde::{Serialize, Deserialize};
use thiserror::Error;

// =============================================================================
// CANVAS / PADDLE / BALL
// =============================================================================

/// Canvas width in world units (pixels).
pub const CANVAS_WIDTH: f64 = 800.0;

/// Canvas height in world units (pixels).
pub const CANVAS_HEIGHT: f64 = 600.0;

/// Paddle thickness.
pub const PADDLE_WIDTH: f64 = 10.0;

/// Paddle length in rectangular mode.
pub const PADDLE_HEIGHT: f64 = 100.0;

/// Distance between a rectangular paddle and its canvas edge.
pub const PADDLE_OFFSET: f64 = 20.0;

/// Paddle travel speed (units per second).
pub const PADDLE_SPEED: f64 = 420.0;

/// Ball radius.
pub const BALL_RADIUS: f64 = 8.0;

/// Ball speed after a serve (units per second).
pub const BALL_INITIAL_SPEED: f64 = 360.0;

/// Multiplier applied to ball speed on every paddle bounce.
pub const SPEED_INCREMENT: f64 = 1.05;

/// Tangential/normal ratio at the very tip of a paddle.
pub const MAX_DEFLECTION: f64 = 1.2;

/// Visual spin: radians of rotation per unit travelled.
pub const SPIN_PER_UNIT: f64 = 0.02;

/// Largest vertical/horizontal ratio of a serve.
pub const SERVE_SPREAD: f64 = 0.6;

// =============================================================================
// POLYGON ARENA
// =============================================================================

/// Circumradius of polygon arenas.
pub const POLYGON_RADIUS: f64 = 300.0;

/// Paddle length as a fraction of its side.
pub const POLYGON_PADDLE_FRACTION: f64 = 0.25;

/// Radius around each vertex where the ball rebounds off the corner point.
pub const CORNER_RADIUS: f64 = 18.0;

/// Smallest polygon arena.
pub const MIN_POLYGON_SIDES: usize = 3;

/// Largest arena (also the lobby cap).
pub const MAX_PARTICIPANTS: usize = 16;

// =============================================================================
// POWER-UPS
// =============================================================================

/// Hits needed to promote a charging power-up into the inventory.
pub const CHARGE_THRESHOLD: u32 = 3;

/// Charge granted by collecting a fruit.
pub const FRUIT_CHARGE: u32 = 2;

/// Speed multiplier of the boost power-up.
pub const BOOST_FACTOR: f64 = 1.5;

/// Lateral acceleration of the curve power-up (units per second squared).
pub const CURVE_ACCELERATION: f64 = 420.0;

/// Number of clone balls in a swarm.
pub const SWARM_SIZE: usize = 15;

/// Total fan angle of a swarm (radians).
pub const SWARM_SPREAD: f64 = std::f64::consts::PI / 3.0;

/// Fan widening applied when the source ball is curving.
pub const SWARM_CURVE_WIDENING: f64 = 1.5;

/// Fruit pickup radius.
pub const FRUIT_RADIUS: f64 = 14.0;

/// Maximum simultaneous fruits.
pub const MAX_FRUITS: usize = 3;

// =============================================================================
// SETTINGS
// =============================================================================

/// Default lives per participant.
pub const DEFAULT_LIVES: u32 = 5;

/// Upper bound on configurable lives.
pub const MAX_LIVES: u32 = 20;

/// How often fruits spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FruitFrequency {
    /// No fruits.
    Off,
    /// One every 15 seconds.
    Low,
    /// One every 8 seconds.
    #[default]
    Normal,
    /// One every 4 seconds.
    High,
}

impl FruitFrequency {
    /// Seconds between spawns, `None` when disabled.
    pub fn interval_secs(self) -> Option<f64> {
        match self {
            FruitFrequency::Off => None,
            FruitFrequency::Low => Some(15.0),
            FruitFrequency::Normal => Some(8.0),
            FruitFrequency::High => Some(4.0),
        }
    }
}

/// Per-match settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSettings {
    /// Lives per participant.
    pub lives: u32,
    /// Power-ups (and fruits) enabled; "custom" mode.
    pub power_ups: bool,
    /// Fruit spawn frequency (ignored without power-ups).
    pub fruit_frequency: FruitFrequency,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            lives: DEFAULT_LIVES,
            power_ups: false,
            fruit_frequency: FruitFrequency::Normal,
        }
    }
}

impl MatchSettings {
    /// Settings for custom (power-up) matches.
    pub fn custom() -> Self {
        Self { power_ups: true, ..Self::default() }
    }

    /// Validate settings before any room exists.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.lives == 0 || self.lives > MAX_LIVES {
            return Err(SettingsError::InvalidLives(self.lives));
        }
        Ok(())
    }
}

/// Invalid match settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// Lives outside 1..=MAX_LIVES.
    #[error("lives must be between 1 and {max}, got {0}", max = MAX_LIVES)]
    InvalidLives(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        assert!(MatchSettings::default().validate().is_ok());
        assert!(MatchSettings::custom().power_ups);
    }

    #[test]
    fn test_invalid_lives_rejected() {
        let settings = MatchSettings { lives: 0, ..Default::default() };
        assert_eq!(settings.validate(), Err(SettingsError::InvalidLives(0)));

        let settings = MatchSettings { lives: MAX_LIVES + 1, ..Default::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_fruit_intervals() {
        assert_eq!(FruitFrequency::Off.interval_secs(), None);
        assert!(FruitFrequency::High.interval_secs() < FruitFrequency::Low.interval_secs());
    }
}
