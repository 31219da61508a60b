//! MCP3008 10-bit SPI ADC for the soil moisture probes.
//!
//! One chip on SPI0/CE0 serves up to eight probes. Readings are normalized to
//! `[0.0, 1.0]` by dividing the raw 10-bit count by full scale.
#![cfg_attr(not(feature = "gpio"), allow(dead_code))]

// ── Frame layout ────────────────────────────────────────────────────────────
//
// Three-byte full-duplex transfer, MSB first:
//   tx: [0000_0001] [S D2 D1 D0 xxxx] [xxxx_xxxx]
//        start bit   S=1 single-ended, D = channel
//   rx: [xxxx_xxxx] [xxxx_x0 B9 B8]   [B7 .. B0]

/// Highest single-ended channel index.
pub const MAX_CHANNEL: u8 = 7;

/// Raw count at the reference voltage.
pub const FULL_SCALE: u16 = 1023;

const START_BIT: u8 = 0x01;
const SINGLE_ENDED: u8 = 0x08;

/// Transmit frame for a single-ended conversion on `channel`.
pub fn request(channel: u8) -> [u8; 3] {
    [START_BIT, (SINGLE_ENDED | (channel & MAX_CHANNEL)) << 4, 0x00]
}

/// Extract the 10-bit result from a receive frame.
pub fn decode(rx: &[u8; 3]) -> u16 {
    (u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2])
}

pub fn normalize(raw: u16) -> f32 {
    f32::from(raw.min(FULL_SCALE)) / f32::from(FULL_SCALE)
}

// ── Driver ──────────────────────────────────────────────────────────────────

#[cfg(feature = "gpio")]
pub use driver::{Mcp3008, Mcp3008Channel};

#[cfg(feature = "gpio")]
mod driver {
    use super::*;
    use crate::error::SensorError;
    use crate::hw::AnalogInput;
    use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
    use std::rc::Rc;

    /// 1.35 MHz is the datasheet maximum at 2.7 V supply.
    const CLOCK_HZ: u32 = 1_350_000;

    /// The chip. Channels share the bus handle; the loop is single-threaded
    /// so transfers never interleave.
    pub struct Mcp3008 {
        spi: Rc<Spi>,
    }

    impl Mcp3008 {
        pub fn open() -> anyhow::Result<Self> {
            let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, CLOCK_HZ, Mode::Mode0)?;
            tracing::info!(bus = "spi0", cs = 0, clock_hz = CLOCK_HZ, "mcp3008 initialised");
            Ok(Self { spi: Rc::new(spi) })
        }

        pub fn channel(&self, channel: u8) -> anyhow::Result<Mcp3008Channel> {
            anyhow::ensure!(
                channel <= MAX_CHANNEL,
                "MCP3008 channel {channel} out of range (0-{MAX_CHANNEL})"
            );
            Ok(Mcp3008Channel {
                spi: Rc::clone(&self.spi),
                channel,
            })
        }
    }

    pub struct Mcp3008Channel {
        spi: Rc<Spi>,
        channel: u8,
    }

    impl AnalogInput for Mcp3008Channel {
        fn value(&mut self) -> Result<f32, SensorError> {
            let tx = request(self.channel);
            let mut rx = [0u8; 3];
            self.spi
                .transfer(&mut rx, &tx)
                .map_err(|e| SensorError::Bus(format!("spi channel {}: {e}", self.channel)))?;
            Ok(normalize(decode(&rx)))
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
