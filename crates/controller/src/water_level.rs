//! Tank fill estimate from a set of float switches at known heights.
//!
//! The switches are sorted once at construction. An estimate is the midpoint
//! between the highest wet switch and the first dry switch above it:
//!
//! ```text
//!  100 ┤            (no switch: lowest_dry stays 100)
//!   50 ┤  ● wet     highest_wet = 50
//!    0 ┤  ● wet
//!                   level = (100 + 50) / 2 = 75   with a dry switch at 100
//! ```
//!
//! Wetness is assumed monotonic in height; switches above the first dry one
//! are never consulted.

use crate::error::ConfigurationError;
use crate::sensors::FloatSwitch;

pub struct WaterLevel {
    switches: Vec<FloatSwitch>,
}

impl WaterLevel {
    pub fn new(mut switches: Vec<FloatSwitch>) -> Result<Self, ConfigurationError> {
        if switches.is_empty() {
            return Err(ConfigurationError::InvalidConfiguration(
                "water level needs at least one float switch".into(),
            ));
        }
        switches.sort_by(|a, b| a.height().total_cmp(&b.height()));
        Ok(Self { switches })
    }

    /// Estimated fill level, 0 (empty) to 100 (full).
    pub fn level(&self) -> f32 {
        if self.switches[0].is_dry() {
            return 0.0;
        }

        let mut highest_wet = 0.0;
        let mut lowest_dry = 100.0;
        for switch in &self.switches {
            if switch.is_wet() {
                highest_wet = switch.height();
            } else {
                lowest_dry = switch.height();
                break;
            }
        }
        (lowest_dry + highest_wet) / 2.0
    }

    /// `(height, wet)` for every switch, lowest first.
    pub fn switch_states(&self) -> Vec<(f32, bool)> {
        self.switches
            .iter()
            .map(|s| (s.height(), s.is_wet()))
            .collect()
    }

    pub fn switch_count(&self) -> usize {
        self.switches.len()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
