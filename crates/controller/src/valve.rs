//! Relay-driven actuators: water pumps and valves.
//!
//! Both wrap a [`DigitalOutput`] whose driver already handles active-high /
//! active-low wiring. A valve adds a second polarity, `active_open`, because
//! some valves open when the relay is energized and others when it drops.
//!
//! Commands are idempotent: the relay is only written when the requested
//! state differs from the current one. `force_*` always writes.
//!
//! Nothing here stops a pump from running against closed valves. Callers
//! must keep at least one valve open while a pump is on.

use crate::hw::DigitalOutput;

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

pub struct Pump {
    relay: Box<dyn DigitalOutput>,
}

impl Pump {
    /// Wrap `relay` and switch it off.
    pub fn new(mut relay: Box<dyn DigitalOutput>) -> Self {
        relay.set_active(false);
        Self { relay }
    }

    /// Returns `true` if the relay was actually switched.
    pub fn set(&mut self, on: bool) -> bool {
        if self.relay.is_active() == on {
            return false;
        }
        self.relay.set_active(on);
        true
    }

    pub fn turn_on(&mut self) -> bool {
        self.set(true)
    }

    pub fn turn_off(&mut self) -> bool {
        self.set(false)
    }

    /// Drive the relay off even if it already reports off.
    pub fn force_off(&mut self) {
        self.relay.set_active(false);
    }

    pub fn is_on(&self) -> bool {
        self.relay.is_active()
    }
}

// ---------------------------------------------------------------------------
// Valve
// ---------------------------------------------------------------------------

pub struct Valve {
    relay: Box<dyn DigitalOutput>,
    /// `true`: relay active = open. `false`: relay active = closed.
    active_open: bool,
}

impl Valve {
    /// Wrap `relay` and drive the valve closed.
    pub fn new(mut relay: Box<dyn DigitalOutput>, active_open: bool) -> Self {
        relay.set_active(!active_open);
        Self { relay, active_open }
    }

    /// Returns `true` if the relay was actually switched.
    pub fn set_open(&mut self, open: bool) -> bool {
        let level = if open { self.active_open } else { !self.active_open };
        if self.relay.is_active() == level {
            return false;
        }
        self.relay.set_active(level);
        true
    }

    pub fn open(&mut self) -> bool {
        self.set_open(true)
    }

    pub fn close(&mut self) -> bool {
        self.set_open(false)
    }

    /// Drive the relay to the closed level even if it already reports closed.
    pub fn force_closed(&mut self) {
        self.relay.set_active(!self.active_open);
    }

    pub fn is_open(&self) -> bool {
        self.relay.is_active() == self.active_open
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
