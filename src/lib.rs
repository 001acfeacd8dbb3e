#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mhz19_lib
//!
//! This crate provides a driver for the MH-Z19 family of NDIR CO2 sensor
//! modules, speaking their 9-byte command/response serial protocol.
//!
//! The driver is fully synchronous and single-owner: every operation blocks
//! until a validated response arrives or the timeout elapses. It is generic
//! over a [`transport::Transport`] byte stream, with a ready-made
//! `serialport` backend behind a feature flag.
//!
//! ## Features
//!
//! This crate uses a feature-based system to keep dependencies minimal.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling
//!   the `mhz19` command-line tool and pulls in `serialport` and `serde`.
//!
//! ### Utility Features
//! - `serialport`: Enables [`driver::Mhz19::open`] and the serial port
//!   transport using the `serialport` crate.
//! - `serde`: Enables `serde` support for serializing/deserializing the
//!   public data structures.
//! - `bin-dependencies`: Enables all features required by the `mhz19`
//!   binary executable.

/// Contains error types for the library.
mod error;
/// Defines the wire-level protocol for the MH-Z19 sensor.
pub mod protocol;

/// Byte-stream abstraction between driver and sensor.
pub mod transport;

/// The synchronous sensor driver.
pub mod driver;

pub use driver::Mhz19;
pub use error::{Error, ResponseStatus};
