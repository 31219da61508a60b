//! TOML config file loading and validation for the controller, its sensors
//! and its actuators.

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::scheduler::Cadence;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Identifies this controller to the coordinator.
    #[serde(default)]
    pub controller_name: String,
    /// Coordinator API root, e.g. `http://gerty:8080/api/`.
    #[serde(default)]
    pub service_base_url: String,
    /// Seconds between reports to the coordinator.
    pub send_measurements_interval: u64,
    /// Raw samples aggregated into one report.
    pub aggregated_measurements_count: u32,
    #[serde(default)]
    pub moisture_sensors: Vec<MoistureEntry>,
    #[serde(default)]
    pub temperature_sensors: Vec<TemperatureEntry>,
    #[serde(default)]
    pub tanks: Vec<TankEntry>,
    #[serde(default)]
    pub pumps: Vec<PumpEntry>,
    #[serde(default)]
    pub valves: Vec<ValveEntry>,
}

/// Soil moisture probe on an MCP3008 channel.
#[derive(Debug, Clone, Deserialize)]
pub struct MoistureEntry {
    pub name: String,
    pub channel: u8,
    /// Set for probes that read 1.0 when dry.
    #[serde(default)]
    pub inverse: bool,
}

/// DS18B20 1-Wire probe. Without `device_id` the first probe found is used.
#[derive(Debug, Clone, Deserialize)]
pub struct TemperatureEntry {
    pub name: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TankEntry {
    pub name: String,
    #[serde(default)]
    pub float_switches: Vec<FloatSwitchEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloatSwitchEntry {
    pub pin: u8,
    /// 0 = tank bottom, 100 = tank top.
    pub height: f32,
    /// Closed contact means the float is under water.
    #[serde(default)]
    pub active_wet: bool,
    /// Pull the pin high and wire the switch to ground (default), or the
    /// reverse.
    #[serde(default = "default_true")]
    pub pull_up: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpEntry {
    pub name: String,
    pub pin: u8,
    /// Most relay boards are active-low.
    #[serde(default)]
    pub active_high: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValveEntry {
    pub name: String,
    pub pin: u8,
    #[serde(default)]
    pub active_high: bool,
    /// The valve opens when its relay is active.
    #[serde(default = "default_true")]
    pub active_open: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Hardware limits
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// MCP3008 has eight single-ended inputs.
const MCP3008_MAX_CHANNEL: u8 = 7;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_controller(&mut errors);
        self.validate_sensors(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    /// Report cadence derived from the interval and sample count.
    pub fn cadence(&self) -> Result<Cadence, ConfigurationError> {
        Cadence::new(
            Duration::from_secs(self.send_measurements_interval),
            self.aggregated_measurements_count,
        )
    }

    fn validate_controller(&self, errors: &mut Vec<String>) {
        if self.controller_name.trim().is_empty() {
            errors.push("controller_name is empty".to_string());
        } else if !self.controller_name.chars().all(is_controller_name_char) {
            errors.push(format!(
                "controller_name '{}' may only contain ASCII letters, digits, '.', '_' and '-'",
                self.controller_name
            ));
        }

        if self.service_base_url.trim().is_empty() {
            errors.push("service_base_url is empty".to_string());
        } else {
            match Url::parse(&self.service_base_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(format!(
                    "service_base_url scheme '{}' is not http or https",
                    url.scheme()
                )),
                Err(e) => errors.push(format!(
                    "service_base_url '{}' is not a valid URL: {e}",
                    self.service_base_url
                )),
            }
        }

        if self.send_measurements_interval == 0 {
            errors.push("send_measurements_interval must be positive, got 0".to_string());
        }
        if self.aggregated_measurements_count == 0 {
            errors.push("aggregated_measurements_count must be at least 1, got 0".to_string());
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        check_names(
            "moisture sensor",
            self.moisture_sensors.iter().map(|m| m.name.as_str()),
            errors,
        );
        check_names(
            "temperature sensor",
            self.temperature_sensors.iter().map(|t| t.name.as_str()),
            errors,
        );
        check_names("tank", self.tanks.iter().map(|t| t.name.as_str()), errors);
        check_names("pump", self.pumps.iter().map(|p| p.name.as_str()), errors);
        check_names("valve", self.valves.iter().map(|v| v.name.as_str()), errors);

        // ── ADC channels ────────────────────────────────────
        let mut seen_channels: HashSet<u8> = HashSet::new();
        for m in &self.moisture_sensors {
            if m.channel > MCP3008_MAX_CHANNEL {
                errors.push(format!(
                    "moisture sensor '{}': channel {} out of MCP3008 range [0, {MCP3008_MAX_CHANNEL}]",
                    m.name, m.channel
                ));
            } else if !seen_channels.insert(m.channel) {
                errors.push(format!(
                    "moisture sensor '{}': channel {} is already used by another sensor",
                    m.name, m.channel
                ));
            }
        }

        // ── Tanks ───────────────────────────────────────────
        for t in &self.tanks {
            if t.float_switches.is_empty() {
                errors.push(format!("tank '{}': needs at least one float switch", t.name));
            }
            for fs in &t.float_switches {
                if !(0.0..=100.0).contains(&fs.height) {
                    errors.push(format!(
                        "tank '{}': float switch on pin {} has height {} out of range [0, 100]",
                        t.name, fs.pin, fs.height
                    ));
                }
            }
        }
    }

    /// Every pump, valve and float switch needs its own header pin.
    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut seen_pins: HashSet<u8> = HashSet::new();

        let pumps = self
            .pumps
            .iter()
            .map(|p| (format!("pump '{}'", p.name), p.pin));
        let valves = self
            .valves
            .iter()
            .map(|v| (format!("valve '{}'", v.name), v.pin));
        let switches = self.tanks.iter().flat_map(|t| {
            t.float_switches
                .iter()
                .map(move |fs| (format!("tank '{}' float switch", t.name), fs.pin))
        });

        for (ctx, pin) in pumps.chain(valves).chain(switches) {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{ctx}: pin {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen_pins.insert(pin) {
                errors.push(format!("{ctx}: pin {pin} is already used by another device"));
            }
        }
    }
}

/// The name becomes a URL path segment on the coordinator.
fn is_controller_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn check_names<'a>(kind: &str, names: impl Iterator<Item = &'a str>, errors: &mut Vec<String>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for (i, name) in names.enumerate() {
        if name.trim().is_empty() {
            errors.push(format!("{kind} #{i}: name is empty"));
        } else if !seen.insert(name) {
            errors.push(format!("{kind} '{name}': duplicate name"));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        controller = %config.controller_name,
        moisture_sensors = config.moisture_sensors.len(),
        temperature_sensors = config.temperature_sensors.len(),
        tanks = config.tanks.len(),
        pumps = config.pumps.len(),
        valves = config.valves.len(),
        "config loaded"
    );

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
