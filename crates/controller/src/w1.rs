//! DS18B20 temperature probes through the kernel's w1-therm sysfs driver.
//!
//! Each probe shows up as `/sys/bus/w1/devices/28-<serial>/w1_slave`:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
#![cfg_attr(not(feature = "gpio"), allow(dead_code))]

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SensorError;
use crate::hw::Thermometer;
use tracing::{info, warn};

pub const DEVICES_DIR: &str = "/sys/bus/w1/devices";

const DS18B20_FAMILY: &str = "28-";

/// Scratchpad power-on value; the probe reports it when a conversion never
/// ran (usually a brown-out on the data line).
const POWER_ON_RESET_MILLI: i32 = 85_000;

/// Parse the contents of a `w1_slave` file into degrees Celsius.
pub fn parse_w1_slave(contents: &str) -> Result<f32, SensorError> {
    let mut lines = contents.lines();
    let crc_line = lines
        .next()
        .ok_or_else(|| SensorError::BadReading("empty w1_slave".into()))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(SensorError::BadReading("CRC check failed".into()));
    }

    let data_line = lines
        .next()
        .ok_or_else(|| SensorError::BadReading("missing temperature line".into()))?;
    let (_, raw) = data_line
        .rsplit_once("t=")
        .ok_or_else(|| SensorError::BadReading(format!("no t= field in {data_line:?}")))?;
    let milli: i32 = raw
        .trim()
        .parse()
        .map_err(|_| SensorError::BadReading(format!("invalid temperature {raw:?}")))?;

    if milli == POWER_ON_RESET_MILLI {
        return Err(SensorError::BadReading("power-on reset value".into()));
    }
    Ok(milli as f32 / 1000.0)
}

/// Ids of every DS18B20 under `dir`, sorted.
pub fn discover(dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("cannot list {}", dir.display()))?;
    for entry in entries {
        let name = entry?.file_name();
        if let Some(name) = name.to_str() {
            if name.starts_with(DS18B20_FAMILY) {
                ids.push(name.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// One probe, looked up again on every read so a probe that is unplugged
/// at boot (or replaced later) only costs sentinel readings.
pub struct W1Probe {
    dir: PathBuf,
    device_id: Option<String>,
}

impl W1Probe {
    /// Bind to probe `device_id`, or to the first one found when no id is
    /// configured. Never fails; a missing probe is only logged.
    pub fn open(dir: &Path, device_id: Option<&str>) -> Self {
        let probe = Self {
            dir: dir.to_path_buf(),
            device_id: device_id.map(str::to_string),
        };
        match probe.resolve() {
            Ok(path) => info!(path = %path.display(), "ds18b20 probe found"),
            Err(e) => warn!(device = ?probe.device_id, "ds18b20 probe not available: {e}"),
        }
        probe
    }

    fn resolve(&self) -> Result<PathBuf, SensorError> {
        let id = match &self.device_id {
            Some(id) => id.clone(),
            None => discover(&self.dir)
                .map_err(|e| SensorError::Unavailable(format!("{e:#}")))?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    SensorError::Unavailable(format!(
                        "no DS18B20 probe under {}",
                        self.dir.display()
                    ))
                })?,
        };
        let path = self.dir.join(id).join("w1_slave");
        if !path.exists() {
            return Err(SensorError::Unavailable(format!(
                "{} does not exist",
                path.display()
            )));
        }
        Ok(path)
    }
}

impl Thermometer for W1Probe {
    fn temperature(&mut self) -> Result<f32, SensorError> {
        let path = self.resolve()?;
        let contents = fs::read_to_string(&path)
            .map_err(|e| SensorError::Unavailable(format!("{}: {e}", path.display())))?;
        parse_w1_slave(&contents)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use crate::config::{FloatSwitchEntry, MoistureEntry, TemperatureEntry};
    use crate::hardware::tests::FakeFactory;
    use crate::hardware::{DeviceFactory, Hardware, RelayRole};
    use crate::hw::{AnalogInput, DigitalInput, DigitalOutput};

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                        72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    /// Fresh fake sysfs tree under the system temp dir.
    fn fake_devices(tag: &str, probes: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("w1-test-{}-{tag}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("w1_bus_master1")).unwrap();
        for (id, contents) in probes {
            fs::create_dir_all(dir.join(id)).unwrap();
            fs::write(dir.join(id).join("w1_slave"), contents).unwrap();
        }
        dir
    }

    // -- Parsing ----------------------------------------------------------------

    #[test]
    fn parses_millidegrees() {
        assert_eq!(parse_w1_slave(GOOD).unwrap(), 23.125);
    }

    #[test]
    fn parses_negative_temperature() {
        let s = "ff : crc=1a YES\nff t=-5250\n";
        assert_eq!(parse_w1_slave(s).unwrap(), -5.25);
    }

    #[test]
    fn crc_failure_rejected() {
        let s = "72 01 : crc=57 NO\n72 01 t=23125\n";
        assert!(matches!(parse_w1_slave(s), Err(SensorError::BadReading(_))));
    }

    #[test]
    fn missing_temperature_line_rejected() {
        assert!(parse_w1_slave("72 01 : crc=57 YES\n").is_err());
        assert!(parse_w1_slave("").is_err());
    }

    #[test]
    fn garbage_value_rejected() {
        assert!(parse_w1_slave("x : crc=57 YES\nx t=abc\n").is_err());
    }

    #[test]
    fn power_on_reset_value_rejected() {
        let s = "50 05 : crc=57 YES\n50 05 t=85000\n";
        assert!(parse_w1_slave(s).is_err());
    }

    // -- Discovery --------------------------------------------------------------

    #[test]
    fn discover_lists_only_ds18b20_sorted() {
        let dir = fake_devices("discover", &[("28-0000b", GOOD), ("28-0000a", GOOD)]);
        assert_eq!(discover(&dir).unwrap(), vec!["28-0000a", "28-0000b"]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn first_sensor_used_when_no_id() {
        let dir = fake_devices("first", &[("28-0000a", GOOD)]);
        let mut probe = W1Probe::open(&dir, None);
        assert_eq!(probe.temperature().unwrap(), 23.125);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unknown_id_reads_unavailable() {
        let dir = fake_devices("unknown", &[("28-0000a", GOOD)]);
        let mut probe = W1Probe::open(&dir, Some("28-ffff"));
        assert!(matches!(probe.temperature(), Err(SensorError::Unavailable(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_bus_reads_unavailable() {
        let dir = fake_devices("empty", &[]);
        let mut probe = W1Probe::open(&dir, None);
        assert!(matches!(probe.temperature(), Err(SensorError::Unavailable(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_devices_dir_reads_unavailable() {
        let dir = std::env::temp_dir().join(format!("w1-test-{}-absent", std::process::id()));
        let mut probe = W1Probe::open(&dir, None);
        assert!(matches!(probe.temperature(), Err(SensorError::Unavailable(_))));
    }

    #[test]
    fn unplugged_sensor_reports_unavailable() {
        let dir = fake_devices("unplugged", &[("28-0000a", GOOD)]);
        let mut probe = W1Probe::open(&dir, Some("28-0000a"));
        fs::remove_dir_all(dir.join("28-0000a")).unwrap();
        assert!(matches!(probe.temperature(), Err(SensorError::Unavailable(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn sensor_plugged_in_after_boot_is_picked_up() {
        let dir = fake_devices("late", &[]);
        let mut probe = W1Probe::open(&dir, None);
        assert!(probe.temperature().is_err());

        fs::create_dir_all(dir.join("28-0000c")).unwrap();
        fs::write(dir.join("28-0000c").join("w1_slave"), GOOD).unwrap();
        assert_eq!(probe.temperature().unwrap(), 23.125);
        fs::remove_dir_all(&dir).unwrap();
    }

    // -- Startup without a probe -----------------------------------------------

    /// Fakes for everything except temperature, which goes through sysfs.
    struct SysfsThermometers {
        fakes: FakeFactory,
        dir: PathBuf,
    }

    impl DeviceFactory for SysfsThermometers {
        fn relay(
            &mut self,
            name: &str,
            role: RelayRole,
            pin: u8,
            active_high: bool,
        ) -> Result<Box<dyn DigitalOutput>> {
            self.fakes.relay(name, role, pin, active_high)
        }

        fn float_switch(
            &mut self,
            tank: &str,
            entry: &FloatSwitchEntry,
        ) -> Result<Box<dyn DigitalInput>> {
            self.fakes.float_switch(tank, entry)
        }

        fn moisture_channel(&mut self, entry: &MoistureEntry) -> Result<Box<dyn AnalogInput>> {
            self.fakes.moisture_channel(entry)
        }

        fn thermometer(&mut self, entry: &TemperatureEntry) -> Result<Box<dyn Thermometer>> {
            Ok(Box::new(W1Probe::open(&self.dir, entry.device_id.as_deref())))
        }
    }

    #[test]
    fn startup_succeeds_without_ds18b20_attached() {
        let dir = fake_devices("boot", &[]);
        let mut factory = SysfsThermometers {
            fakes: FakeFactory::default(),
            dir: dir.clone(),
        };

        let mut hw = Hardware::from_config(&valid_config(), &mut factory).unwrap();
        let reading = hw.temperature.get_mut("temperature1").unwrap().read();

        assert!(matches!(reading, Err(SensorError::Unavailable(_))));
        fs::remove_dir_all(&dir).unwrap();
    }
}
