//! Capability traits for the devices the controller talks to.
//!
//! Drivers (rppal GPIO, MCP3008, 1-Wire, simulator) implement these; the
//! sensor/actuator wrappers and the scheduler only ever see the traits.

use crate::error::SensorError;

/// A relay-style output. `active` is the electrical state after polarity
/// (active-high / active-low wiring) has been applied by the driver.
pub trait DigitalOutput {
    fn set_active(&mut self, active: bool);
    fn is_active(&self) -> bool;
}

/// A binary input such as a float switch contact.
pub trait DigitalInput {
    fn is_active(&self) -> bool;
}

/// One analog channel, normalized to `[0.0, 1.0]`.
pub trait AnalogInput {
    fn value(&mut self) -> Result<f32, SensorError>;
}

/// A temperature probe reporting degrees Celsius.
pub trait Thermometer {
    fn temperature(&mut self) -> Result<f32, SensorError>;
}

// ===========================================================================
// Test doubles
// ===========================================================================
