//! Sensor wrappers: soil moisture, temperature and tank float switches.
//!
//! Each wrapper owns one capability device and applies the configured
//! polarity so the rest of the controller deals in wet/dry and [0, 1]
//! instead of raw electrical levels.

use crate::error::SensorError;
use crate::hw::{AnalogInput, DigitalInput, Thermometer};

// ---------------------------------------------------------------------------
// Moisture
// ---------------------------------------------------------------------------

pub struct MoistureSensor {
    input: Box<dyn AnalogInput>,
    /// Set when the probe reads 1.0 in dry soil (most capacitive probes).
    inverse: bool,
}

impl MoistureSensor {
    pub fn new(input: Box<dyn AnalogInput>, inverse: bool) -> Self {
        Self { input, inverse }
    }

    /// Normalized moisture in `[0.0, 1.0]`, 0 meaning dry.
    pub fn read(&mut self) -> Result<f32, SensorError> {
        let raw = self.input.value()?.clamp(0.0, 1.0);
        Ok(if self.inverse { 1.0 - raw } else { raw })
    }
}

// ---------------------------------------------------------------------------
// Temperature
// ---------------------------------------------------------------------------

pub struct TemperatureSensor {
    probe: Box<dyn Thermometer>,
}

impl TemperatureSensor {
    pub fn new(probe: Box<dyn Thermometer>) -> Self {
        Self { probe }
    }

    pub fn read(&mut self) -> Result<f32, SensorError> {
        self.probe.temperature()
    }
}

// ---------------------------------------------------------------------------
// Float switch
// ---------------------------------------------------------------------------

/// A binary float switch installed at a fixed height in a tank.
pub struct FloatSwitch {
    input: Box<dyn DigitalInput>,
    height: f32,
    /// `true` when a closed (active) contact means the switch is under water.
    active_wet: bool,
}

impl FloatSwitch {
    /// `height` is the installation height, 0 = tank bottom, 100 = top.
    pub fn new(input: Box<dyn DigitalInput>, height: f32, active_wet: bool) -> Self {
        Self {
            input,
            height,
            active_wet,
        }
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn is_wet(&self) -> bool {
        self.input.is_active() == self.active_wet
    }

    pub fn is_dry(&self) -> bool {
        !self.is_wet()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
