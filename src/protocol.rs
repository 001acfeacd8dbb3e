//! Wire-level protocol for the MH-Z19 family of NDIR CO2 sensors.
//!
//! Every exchange is a fixed 9-byte frame: start byte, sensor address,
//! command opcode, five payload bytes and a checksum. Responses echo the
//! opcode in byte 1. This module is pure; transport and state handling
//! live in [`crate::driver`].

use crate::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Length of every command and response frame.
pub const FRAME_SIZE: usize = 9;
/// First byte of every frame.
pub const START_BYTE: u8 = 0xFF;
/// Sensor address, constant for a point-to-point UART link.
pub const SENSOR_ADDRESS: u8 = 0x01;

/// The sensor reports temperature with a +40 offset to avoid negative bytes.
pub const TEMPERATURE_ADJUSTMENT: i16 = 40;
/// Detection range the sensor ships with and works best in.
pub const DEFAULT_RANGE: u16 = 2000;
/// Reference maximum used to express a raw reading as transmittance.
pub const TRANSMITTANCE_REFERENCE: f32 = 40000.0;

/// Payload byte disabling automatic baseline correction.
pub const ABC_PERIOD_OFF: u8 = 0x00;
/// Payload byte selecting the sensor's default ABC period (24 h).
pub const ABC_PERIOD_DEFAULT: u8 = 0xA0;
/// Scale from hours to the ABC period byte (24 h maps to 0xA0).
pub const ABC_HOURS_SCALE: f32 = 6.7;

/// A single command or response frame.
pub type Frame = [u8; FRAME_SIZE];

/// Command opcodes published in the sensor's protocol datasheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Command {
    /// Request a sensor recovery reset.
    RecoveryReset = 0x78,
    /// Turn automatic baseline correction on/off (period byte as parameter).
    AbcMode = 0x79,
    /// Query whether automatic baseline correction is active.
    GetAbcStatus = 0x7D,
    /// Raw, uncalibrated concentration reading.
    RawCo2 = 0x84,
    /// Concentration unclamped by the configured range, unsigned temperature.
    Co2Unlimited = 0x85,
    /// Concentration clamped to the configured range, signed temperature.
    Co2Limited = 0x86,
    /// Calibrate the zero point (400 ppm for this sensor).
    ZeroCalibration = 0x87,
    /// Calibrate the span point.
    SpanCalibration = 0x88,
    /// Set the detection range.
    SetRange = 0x99,
    /// Query the detection range.
    GetRange = 0x9B,
    /// Query the background CO2 level the sensor calibrates against.
    GetBackgroundCo2 = 0x9C,
    /// Query the firmware version.
    GetFirmwareVersion = 0xA0,
    /// Re-read the sensor's last response frame.
    GetLastResponse = 0xA2,
    /// Query the temperature calibration byte.
    GetTemperatureCalibration = 0xA3,
}

impl Command {
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Whether the payload carries a big-endian integer parameter.
    pub fn takes_parameter(self) -> bool {
        matches!(
            self,
            Command::AbcMode | Command::SpanCalibration | Command::SetRange
        )
    }

    /// Buffer slot the response to this command belongs to.
    pub fn family(self) -> ResponseFamily {
        match self {
            Command::RawCo2 => ResponseFamily::Raw,
            Command::Co2Limited => ResponseFamily::Limited,
            Command::Co2Unlimited => ResponseFamily::Unlimited,
            _ => ResponseFamily::Status,
        }
    }
}

/// Command families the driver keeps separate response buffers for.
///
/// Everything that is not a concentration reading shares the catch-all
/// [`ResponseFamily::Status`] slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResponseFamily {
    Raw,
    Limited,
    Unlimited,
    Status,
}

impl ResponseFamily {
    pub(crate) fn index(self) -> usize {
        match self {
            ResponseFamily::Raw => 0,
            ResponseFamily::Limited => 1,
            ResponseFamily::Unlimited => 2,
            ResponseFamily::Status => 3,
        }
    }
}

/// Where the temperature byte sits, decided once per firmware generation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TemperatureLayout {
    /// Firmware before major version 5: signed temperature in byte 4 of the
    /// limited reading.
    #[default]
    SignedLimited,
    /// Firmware major version 5 and later: unsigned temperature in byte 2 of
    /// the unlimited reading.
    UnsignedUnlimited,
}

impl TemperatureLayout {
    /// Layout used by the given firmware major version.
    pub fn for_firmware_major(major: u8) -> Self {
        if major >= 5 {
            TemperatureLayout::UnsignedUnlimited
        } else {
            TemperatureLayout::SignedLimited
        }
    }

    /// Family whose buffer holds the temperature byte for this layout.
    pub fn family(self) -> ResponseFamily {
        match self {
            TemperatureLayout::SignedLimited => ResponseFamily::Limited,
            TemperatureLayout::UnsignedUnlimited => ResponseFamily::Unlimited,
        }
    }
}

/// Computes the frame checksum: two's complement of the byte sum over
/// everything except the start byte and the checksum slot itself.
pub fn checksum(frame: &Frame) -> u8 {
    let mut sum: u8 = 0;
    for b in &frame[1..FRAME_SIZE - 1] {
        sum = sum.wrapping_add(*b);
    }
    0u8.wrapping_sub(sum)
}

/// Verifies the checksum invariant of a received frame.
pub fn verify_checksum(frame: &Frame) -> std::result::Result<(), Error> {
    let calculated = checksum(frame);
    let received = frame[FRAME_SIZE - 1];
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={:02X?} received={:02X?} frame={:02X?}",
            calculated,
            received,
            frame
        );
        return Err(Error::Checksum {
            calculated,
            received,
        });
    }
    Ok(())
}

/// Builds the command frame for `command`, packing `parameter` big-endian
/// into bytes 3..=4 when the command takes one.
pub fn build_frame(command: Command, parameter: u16) -> Frame {
    let mut frame: Frame = [0; FRAME_SIZE];
    frame[0] = START_BYTE;
    frame[1] = SENSOR_ADDRESS;
    frame[2] = command.opcode();
    if command.takes_parameter() {
        let [high, low] = parameter.to_be_bytes();
        frame[3] = high;
        frame[4] = low;
    }
    frame[FRAME_SIZE - 1] = checksum(&frame);
    frame
}

/// Joins a big-endian high/low byte pair.
pub fn make_int(high: u8, low: u8) -> u16 {
    u16::from_be_bytes([high, low])
}

/// Frame parameter carrying an ABC period byte. The period rides in the
/// high payload byte (frame byte 3).
pub fn abc_parameter(period: u8) -> u16 {
    u16::from(period) << 8
}

/// Concentration in ppm from a limited (range-clamped) reading.
pub fn co2_limited(frame: &Frame) -> u16 {
    make_int(frame[2], frame[3])
}

/// Concentration in ppm from an unlimited reading.
pub fn co2_unlimited(frame: &Frame) -> u16 {
    make_int(frame[4], frame[5])
}

/// Raw sensor value of unspecified units.
pub fn co2_raw(frame: &Frame) -> u16 {
    make_int(frame[2], frame[3])
}

/// Temperature in degrees Celsius for the given byte layout.
pub fn temperature(frame: &Frame, layout: TemperatureLayout) -> f32 {
    let raw = match layout {
        TemperatureLayout::SignedLimited => frame[4],
        TemperatureLayout::UnsignedUnlimited => frame[2],
    };
    (raw as i16 - TEMPERATURE_ADJUSTMENT) as f32
}

/// Accuracy/quality byte of a limited reading.
pub fn accuracy(frame: &Frame) -> u8 {
    frame[5]
}

/// Integer payload of a status response (range, background CO2).
pub fn status_word(frame: &Frame) -> u16 {
    make_int(frame[4], frame[5])
}

/// ABC on/off flag from a status response.
pub fn abc_enabled(frame: &Frame) -> bool {
    frame[7] != 0
}

/// Firmware version rendered as `major.minor`.
pub fn firmware_version(frame: &Frame) -> String {
    format!("{}.{}", frame[2], frame[3])
}

/// Firmware major version byte, cached by the driver to pick the
/// temperature layout.
pub fn firmware_major(frame: &Frame) -> u8 {
    frame[2]
}

/// Temperature calibration byte from a status response.
pub fn temperature_calibration(frame: &Frame) -> u8 {
    frame[4]
}
