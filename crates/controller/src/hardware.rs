//! The controller's devices, built once from [`Config`] and owned by the
//! control loop for the life of the process.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use crate::config::{Config, FloatSwitchEntry, MoistureEntry, TemperatureEntry};
use crate::hw::{AnalogInput, DigitalInput, DigitalOutput, Thermometer};
use crate::sensors::{FloatSwitch, MoistureSensor, TemperatureSensor};
use crate::valve::{Pump, Valve};
use crate::water_level::WaterLevel;

/// What a relay output is wired to. Drivers only need this for logging and
/// for the simulator's watering model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRole {
    Pump,
    /// `active_open`: an energized relay opens the valve.
    Valve { active_open: bool },
}

impl RelayRole {
    /// Relay state that leaves the actuator safe: pump off, valve closed.
    /// A normally-open valve (`active_open == false`) has to be energized.
    pub fn safe_active(self) -> bool {
        match self {
            RelayRole::Pump => false,
            RelayRole::Valve { active_open } => !active_open,
        }
    }
}

/// Opens the physical (or simulated) device behind each config entry.
pub trait DeviceFactory {
    fn relay(
        &mut self,
        name: &str,
        role: RelayRole,
        pin: u8,
        active_high: bool,
    ) -> Result<Box<dyn DigitalOutput>>;
    fn float_switch(&mut self, tank: &str, entry: &FloatSwitchEntry)
        -> Result<Box<dyn DigitalInput>>;
    fn moisture_channel(&mut self, entry: &MoistureEntry) -> Result<Box<dyn AnalogInput>>;
    fn thermometer(&mut self, entry: &TemperatureEntry) -> Result<Box<dyn Thermometer>>;
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Hardware {
    pub moisture: BTreeMap<String, MoistureSensor>,
    pub temperature: BTreeMap<String, TemperatureSensor>,
    pub tanks: BTreeMap<String, WaterLevel>,
    pub pumps: BTreeMap<String, Pump>,
    pub valves: BTreeMap<String, Valve>,
}

impl Hardware {
    pub fn from_config(cfg: &Config, factory: &mut dyn DeviceFactory) -> Result<Self> {
        let mut hw = Self::default();

        for p in &cfg.pumps {
            let relay = factory
                .relay(&p.name, RelayRole::Pump, p.pin, p.active_high)
                .with_context(|| format!("failed to open pump '{}'", p.name))?;
            hw.pumps.insert(p.name.clone(), Pump::new(relay));
        }

        for v in &cfg.valves {
            let relay = factory
                .relay(
                    &v.name,
                    RelayRole::Valve {
                        active_open: v.active_open,
                    },
                    v.pin,
                    v.active_high,
                )
                .with_context(|| format!("failed to open valve '{}'", v.name))?;
            hw.valves
                .insert(v.name.clone(), Valve::new(relay, v.active_open));
        }

        for m in &cfg.moisture_sensors {
            let input = factory
                .moisture_channel(m)
                .with_context(|| format!("failed to open moisture sensor '{}'", m.name))?;
            hw.moisture
                .insert(m.name.clone(), MoistureSensor::new(input, m.inverse));
        }

        for t in &cfg.temperature_sensors {
            let probe = factory
                .thermometer(t)
                .with_context(|| format!("failed to open temperature sensor '{}'", t.name))?;
            hw.temperature
                .insert(t.name.clone(), TemperatureSensor::new(probe));
        }

        for tank in &cfg.tanks {
            let mut switches = Vec::with_capacity(tank.float_switches.len());
            for fs in &tank.float_switches {
                let input = factory.float_switch(&tank.name, fs).with_context(|| {
                    format!("failed to open float switch on pin {} in tank '{}'", fs.pin, tank.name)
                })?;
                switches.push(FloatSwitch::new(input, fs.height, fs.active_wet));
            }
            let level = WaterLevel::new(switches)
                .with_context(|| format!("tank '{}'", tank.name))?;
            hw.tanks.insert(tank.name.clone(), level);
        }

        Ok(hw)
    }

    /// Unconditionally drive every pump off and every valve closed.
    pub fn force_safe_state(&mut self) {
        for pump in self.pumps.values_mut() {
            pump.force_off();
        }
        for valve in self.valves.values_mut() {
            valve.force_closed();
        }
        info!(
            pumps = self.pumps.len(),
            valves = self.valves.len(),
            "safe state forced: pumps off, valves closed"
        );
    }

    pub fn pump_states(&self) -> BTreeMap<String, bool> {
        self.pumps
            .iter()
            .map(|(name, p)| (name.clone(), p.is_on()))
            .collect()
    }

    pub fn valve_states(&self) -> BTreeMap<String, bool> {
        self.valves
            .iter()
            .map(|(name, v)| (name.clone(), v.is_open()))
            .collect()
    }

    pub fn tank_levels(&self) -> BTreeMap<String, f32> {
        self.tanks
            .iter()
            .map(|(name, wl)| {
                debug!(tank = %name, switches = ?wl.switch_states(), "float switches");
                (name.clone(), wl.level())
            })
            .collect()
    }

    /// Read every sensor and tank once and log what came back, so a fresh
    /// install can be checked against its wiring. Returns the number of
    /// failed reads.
    pub fn check(&mut self) -> usize {
        let mut failures = 0;

        for (name, sensor) in self.moisture.iter_mut() {
            match sensor.read() {
                Ok(value) => info!(sensor = %name, value, "moisture ok"),
                Err(e) => {
                    failures += 1;
                    error!(sensor = %name, "moisture read failed: {e}");
                }
            }
        }
        for (name, sensor) in self.temperature.iter_mut() {
            match sensor.read() {
                Ok(celsius) => info!(sensor = %name, celsius, "temperature ok"),
                Err(e) => {
                    failures += 1;
                    error!(sensor = %name, "temperature read failed: {e}");
                }
            }
        }
        for (name, wl) in &self.tanks {
            info!(
                tank = %name,
                level = wl.level(),
                switches = wl.switch_count(),
                states = ?wl.switch_states(),
                "tank ok"
            );
        }
        info!(
            pumps = ?self.pump_states(),
            valves = ?self.valve_states(),
            "actuators"
        );

        failures
    }
}

/// Open the configured devices on the backend this binary was built for:
/// rppal with `gpio`, otherwise the simulated garden.
pub fn build(cfg: &Config) -> Result<Hardware> {
    #[cfg(feature = "gpio")]
    let mut factory = crate::gpio::GpioFactory::new()?;
    #[cfg(not(feature = "gpio"))]
    let mut factory = crate::sim::SimFactory::from_env();

    Hardware::from_config(cfg, &mut factory)
}

/// One log line per configured device, so a field install can be checked
/// against its wiring from the journal.
pub fn log_inventory(cfg: &Config) {
    for m in &cfg.moisture_sensors {
        info!(name = %m.name, channel = m.channel, inverse = m.inverse, "moisture sensor");
    }
    for t in &cfg.temperature_sensors {
        info!(
            name = %t.name,
            device = t.device_id.as_deref().unwrap_or("first found"),
            "temperature sensor"
        );
    }
    for tank in &cfg.tanks {
        for fs in &tank.float_switches {
            info!(
                tank = %tank.name,
                pin = fs.pin,
                height = fs.height,
                active_wet = fs.active_wet,
                pull_up = fs.pull_up,
                "float switch"
            );
        }
    }
    for p in &cfg.pumps {
        info!(name = %p.name, pin = p.pin, active_high = p.active_high, "pump");
    }
    for v in &cfg.valves {
        info!(
            name = %v.name,
            pin = v.pin,
            active_high = v.active_high,
            active_open = v.active_open,
            "valve"
        );
    }
}

// ===========================================================================
// Tests
// ===========================================================================
