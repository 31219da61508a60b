//! Raspberry Pi backend: relays and float switches on rppal GPIO, moisture
//! probes on an MCP3008, temperature probes on 1-Wire.

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use std::path::PathBuf;
use tracing::info;

use crate::adc::Mcp3008;
use crate::config::{FloatSwitchEntry, MoistureEntry, TemperatureEntry};
use crate::hardware::{DeviceFactory, RelayRole};
use crate::hw::{AnalogInput, DigitalInput, DigitalOutput, Thermometer};
use crate::w1::{W1Probe, DEVICES_DIR};

// ---------------------------------------------------------------------------
// Pins
// ---------------------------------------------------------------------------

/// Relay output. Many relay boards are active-low: `active_high == false`
/// means LOW energizes the coil.
pub struct RelayPin {
    pin: OutputPin,
    active_high: bool,
}

impl DigitalOutput for RelayPin {
    fn set_active(&mut self, active: bool) {
        if active == self.active_high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    fn is_active(&self) -> bool {
        self.pin.is_set_high() == self.active_high
    }
}

/// Float switch contact. With the internal pull-up the contact shorts the
/// pin to ground, so a closed contact reads LOW.
pub struct SwitchPin {
    pin: InputPin,
    pull_up: bool,
}

impl DigitalInput for SwitchPin {
    fn is_active(&self) -> bool {
        if self.pull_up {
            self.pin.is_low()
        } else {
            self.pin.is_high()
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct GpioFactory {
    gpio: Gpio,
    adc: Option<Mcp3008>,
    w1_dir: PathBuf,
}

impl GpioFactory {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new().context("cannot open /dev/gpiomem")?;
        Ok(Self {
            gpio,
            adc: None,
            w1_dir: PathBuf::from(DEVICES_DIR),
        })
    }

    /// The ADC is only opened once a moisture probe needs it, so setups
    /// without soil probes do not require SPI to be enabled.
    fn adc(&mut self) -> Result<&Mcp3008> {
        if self.adc.is_none() {
            self.adc = Some(Mcp3008::open().context("cannot open MCP3008 on SPI0")?);
        }
        self.adc.as_ref().context("MCP3008 not initialised")
    }
}

impl DeviceFactory for GpioFactory {
    fn relay(
        &mut self,
        name: &str,
        role: RelayRole,
        pin: u8,
        active_high: bool,
    ) -> Result<Box<dyn DigitalOutput>> {
        // Claim the pin already at the safe level so a pump never starts and
        // a normally-open valve never opens between mode switch and first write.
        let gpio_pin = self
            .gpio
            .get(pin)
            .with_context(|| format!("gpio {pin} unavailable"))?;
        let safe_active = role.safe_active();
        let out = if safe_active == active_high {
            gpio_pin.into_output_high()
        } else {
            gpio_pin.into_output_low()
        };
        info!(name, ?role, pin, active_high, safe_active, "relay output claimed");
        Ok(Box::new(RelayPin {
            pin: out,
            active_high,
        }))
    }

    fn float_switch(
        &mut self,
        tank: &str,
        entry: &FloatSwitchEntry,
    ) -> Result<Box<dyn DigitalInput>> {
        let gpio_pin = self
            .gpio
            .get(entry.pin)
            .with_context(|| format!("gpio {} unavailable", entry.pin))?;
        let input = if entry.pull_up {
            gpio_pin.into_input_pullup()
        } else {
            gpio_pin.into_input_pulldown()
        };
        info!(tank, pin = entry.pin, pull_up = entry.pull_up, "float switch input claimed");
        Ok(Box::new(SwitchPin {
            pin: input,
            pull_up: entry.pull_up,
        }))
    }

    fn moisture_channel(&mut self, entry: &MoistureEntry) -> Result<Box<dyn AnalogInput>> {
        let channel = self.adc()?.channel(entry.channel)?;
        Ok(Box::new(channel))
    }

    fn thermometer(&mut self, entry: &TemperatureEntry) -> Result<Box<dyn Thermometer>> {
        Ok(Box::new(W1Probe::open(
            &self.w1_dir,
            entry.device_id.as_deref(),
        )))
    }
}
