//! Simulated garden for running the controller without a Raspberry Pi.
//!
//! Models the pieces the control loop can observe:
//! - Soil moisture per probe: random walk with mean reversion, a drying
//!   drift, ADC noise and occasional spikes
//! - A day/night temperature swing
//! - Tanks that drain while the garden is being watered
//! - Closed-loop watering response (soil gets wetter while a pump runs and
//!   a valve is open)
//!
//! All simulated devices share one [`Garden`] so actuator writes feed back
//! into sensor readings.

use anyhow::Result;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::info;

use crate::adc;
use crate::config::{FloatSwitchEntry, MoistureEntry, TemperatureEntry};
use crate::error::SensorError;
use crate::hardware::{DeviceFactory, RelayRole};
use crate::hw::{AnalogInput, DigitalInput, DigitalOutput, Thermometer};

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6 is close to N(0,1).
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Mid-range soil drying out over the day. Moderate noise, ~3% spikes.
    Drying,
    /// Hovers near the centre with little noise. Coordinator should leave
    /// everything off.
    Stable,
    /// Heavy noise, ~10% spikes and intermittent read failures. Exercises
    /// median aggregation and sentinel readings.
    Flaky,
    /// Starts near saturation with full tanks.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }

    fn params(self) -> Params {
        match self {
            Scenario::Drying => Params {
                start_wetness: 0.5,
                drift: -0.004,
                walk_sigma: 0.01,
                noise_sigma: 0.01,
                spike_prob: 0.03,
                spike_sigma: 0.15,
                failure_prob: 0.0,
                start_tank: 80.0,
            },
            Scenario::Stable => Params {
                start_wetness: 0.5,
                drift: -0.0005,
                walk_sigma: 0.004,
                noise_sigma: 0.005,
                spike_prob: 0.005,
                spike_sigma: 0.1,
                failure_prob: 0.0,
                start_tank: 80.0,
            },
            Scenario::Flaky => Params {
                start_wetness: 0.5,
                drift: -0.003,
                walk_sigma: 0.015,
                noise_sigma: 0.03,
                spike_prob: 0.10,
                spike_sigma: 0.25,
                failure_prob: 0.10,
                start_tank: 80.0,
            },
            Scenario::Wet => Params {
                start_wetness: 0.85,
                drift: -0.001,
                walk_sigma: 0.006,
                noise_sigma: 0.008,
                spike_prob: 0.02,
                spike_sigma: 0.1,
                failure_prob: 0.0,
                start_tank: 100.0,
            },
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

/// Per-scenario tuning. Moisture values are wetness in `[0, 1]` per sample.
#[derive(Debug, Clone, Copy)]
struct Params {
    start_wetness: f64,
    drift: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    spike_prob: f64,
    spike_sigma: f64,
    failure_prob: f64,
    start_tank: f64,
}

// ---------------------------------------------------------------------------
// Garden
// ---------------------------------------------------------------------------

const MEAN_REVERSION: f64 = 0.02;
const CENTER: f64 = 0.5;
/// Wetness gained per sample while watering.
const WATERING_RATE: f64 = 0.02;
/// Tank percentage drained per sampling round while watering.
const DRAIN_PER_ROUND: f64 = 1.0;
const TEMP_MEAN: f64 = 18.0;
const TEMP_AMPLITUDE: f64 = 6.0;
/// Length of a simulated day; ten minutes keeps the swing visible in dev.
const DIURNAL_PERIOD_S: f64 = 600.0;

struct Soil {
    wetness: f64,
    /// Permanent calibration offset so probes in the same bed diverge.
    offset: f64,
}

pub struct Garden {
    params: Params,
    soils: Vec<Soil>,
    tanks: BTreeMap<String, f64>,
    pumps: BTreeMap<String, bool>,
    valves: BTreeMap<String, bool>,
}

impl Garden {
    fn new(scenario: Scenario) -> Self {
        Self {
            params: scenario.params(),
            soils: Vec::new(),
            tanks: BTreeMap::new(),
            pumps: BTreeMap::new(),
            valves: BTreeMap::new(),
        }
    }

    fn add_soil(&mut self) -> usize {
        let wetness = (self.params.start_wetness + gaussian(0.0, 0.03)).clamp(0.0, 1.0);
        self.soils.push(Soil {
            wetness,
            offset: gaussian(0.0, 0.02),
        });
        self.soils.len() - 1
    }

    /// Water flows only when some pump runs into some open valve.
    pub fn watering(&self) -> bool {
        self.pumps.values().any(|on| *on) && self.valves.values().any(|open| *open)
    }

    /// Record a relay write as pump running / valve open.
    fn set_actuator(&mut self, role: RelayRole, name: &str, active: bool) {
        match role {
            RelayRole::Pump => self.pumps.insert(name.to_string(), active),
            RelayRole::Valve { active_open } => {
                self.valves.insert(name.to_string(), active == active_open)
            }
        };
    }

    /// Advance probe `index` one step and return its true wetness plus
    /// measurement noise.
    fn sample_soil(&mut self, index: usize) -> Result<f64, SensorError> {
        let p = self.params;
        let watering = self.watering();

        // One drain step per full round of probes.
        if watering && index == 0 {
            for level in self.tanks.values_mut() {
                *level = (*level - DRAIN_PER_ROUND).max(0.0);
            }
        }

        let soil = &mut self.soils[index];
        let pull = MEAN_REVERSION * (CENTER - soil.wetness);
        let wet = if watering { WATERING_RATE } else { 0.0 };
        soil.wetness =
            (soil.wetness + p.drift + pull + gaussian(0.0, p.walk_sigma) + wet).clamp(0.0, 1.0);

        if fastrand::f64() < p.failure_prob {
            return Err(SensorError::Bus(format!("simulated SPI glitch on probe {index}")));
        }

        let spike = if fastrand::f64() < p.spike_prob {
            gaussian(0.0, p.spike_sigma)
        } else {
            0.0
        };
        Ok(soil.wetness + soil.offset + gaussian(0.0, p.noise_sigma) + spike)
    }

    fn sample_temperature(&mut self) -> Result<f32, SensorError> {
        if fastrand::f64() < self.params.failure_prob {
            return Err(SensorError::BadReading("simulated CRC failure".into()));
        }
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let phase = 2.0 * std::f64::consts::PI * now_s / DIURNAL_PERIOD_S;
        Ok((TEMP_MEAN + TEMP_AMPLITUDE * phase.sin() + gaussian(0.0, 0.1)) as f32)
    }

    pub fn tank_level(&self, tank: &str) -> f64 {
        self.tanks.get(tank).copied().unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

struct SimRelay {
    garden: Rc<RefCell<Garden>>,
    name: String,
    role: RelayRole,
    active: bool,
}

impl DigitalOutput for SimRelay {
    fn set_active(&mut self, active: bool) {
        self.active = active;
        self.garden
            .borrow_mut()
            .set_actuator(self.role, &self.name, active);
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Float switch that is wet while the tank level reaches its height. An
/// empty tank leaves even the bottom switch dry.
struct SimSwitch {
    garden: Rc<RefCell<Garden>>,
    tank: String,
    height: f64,
    active_wet: bool,
}

impl DigitalInput for SimSwitch {
    fn is_active(&self) -> bool {
        let level = self.garden.borrow().tank_level(&self.tank);
        let wet = level > 0.0 && level >= self.height;
        wet == self.active_wet
    }
}

/// Moisture channel producing raw 10-bit counts like the MCP3008 would.
/// Inverse probes read dryness, so the raw count runs the other way.
struct SimChannel {
    garden: Rc<RefCell<Garden>>,
    index: usize,
    inverse: bool,
}

impl AnalogInput for SimChannel {
    fn value(&mut self) -> Result<f32, SensorError> {
        let wetness = self.garden.borrow_mut().sample_soil(self.index)?;
        let signal = if self.inverse { 1.0 - wetness } else { wetness };
        let raw = (signal * f64::from(adc::FULL_SCALE))
            .round()
            .clamp(0.0, f64::from(adc::FULL_SCALE)) as u16;
        Ok(adc::normalize(raw))
    }
}

struct SimThermometer {
    garden: Rc<RefCell<Garden>>,
}

impl Thermometer for SimThermometer {
    fn temperature(&mut self) -> Result<f32, SensorError> {
        self.garden.borrow_mut().sample_temperature()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct SimFactory {
    garden: Rc<RefCell<Garden>>,
}

impl SimFactory {
    pub fn new(scenario: Scenario) -> Self {
        info!(%scenario, "simulated garden (no hardware)");
        Self {
            garden: Rc::new(RefCell::new(Garden::new(scenario))),
        }
    }

    /// Scenario from `SIM_SCENARIO`, defaulting to drying.
    pub fn from_env() -> Self {
        let scenario = std::env::var("SIM_SCENARIO").unwrap_or_default();
        Self::new(Scenario::from_str_lossy(&scenario))
    }

    pub fn garden(&self) -> Rc<RefCell<Garden>> {
        Rc::clone(&self.garden)
    }
}

impl DeviceFactory for SimFactory {
    fn relay(
        &mut self,
        name: &str,
        role: RelayRole,
        pin: u8,
        _active_high: bool,
    ) -> Result<Box<dyn DigitalOutput>> {
        info!(name, ?role, pin, "[sim] relay registered (not wired)");
        // Same power-on state as a claimed GPIO pin.
        Ok(Box::new(SimRelay {
            garden: self.garden(),
            name: name.to_string(),
            role,
            active: role.safe_active(),
        }))
    }

    fn float_switch(
        &mut self,
        tank: &str,
        entry: &FloatSwitchEntry,
    ) -> Result<Box<dyn DigitalInput>> {
        {
            let mut garden = self.garden.borrow_mut();
            let start = garden.params.start_tank;
            garden.tanks.entry(tank.to_string()).or_insert(start);
        }
        Ok(Box::new(SimSwitch {
            garden: self.garden(),
            tank: tank.to_string(),
            height: f64::from(entry.height),
            active_wet: entry.active_wet,
        }))
    }

    fn moisture_channel(&mut self, entry: &MoistureEntry) -> Result<Box<dyn AnalogInput>> {
        let index = self.garden.borrow_mut().add_soil();
        Ok(Box::new(SimChannel {
            garden: self.garden(),
            index,
            inverse: entry.inverse,
        }))
    }

    fn thermometer(&mut self, _entry: &TemperatureEntry) -> Result<Box<dyn Thermometer>> {
        Ok(Box::new(SimThermometer {
            garden: self.garden(),
        }))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
