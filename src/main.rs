use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use mhz19_lib::Mhz19;
use std::{ops::Deref, panic, time::Duration};

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show the CO2 concentration in ppm
    Co2 {
        /// Read the value that is not clamped to the configured range
        #[clap(long, short, action)]
        unlimited: bool,
    },
    /// Show the raw, uncalibrated sensor value
    Raw,
    /// Show the raw value as a percentage of the reference maximum
    Transmittance,
    /// Show the sensor temperature in degrees Celsius
    Temperature,
    /// Show the configured detection range in ppm
    Range,
    /// Show whether automatic baseline correction (ABC) is active
    AbcStatus,
    /// Show the accuracy byte attached to the last reading
    Accuracy,
    /// Show the sensor firmware version
    Version,
    /// Show the background CO2 level the sensor calibrates against
    BackgroundCo2,
    /// Show the temperature calibration byte
    TemperatureCalibration,
    /// Show all available sensor information by running most read commands
    All,
    /// Set the detection range in ppm (500-20000)
    SetRange {
        /// The desired detection range, e.g. 2000 or 5000
        range: u16,
    },
    /// Calibrate the zero point (sensor must sit in fresh air, ~400 ppm)
    CalibrateZero,
    /// Calibrate the span point (sensor must sit in the given concentration)
    CalibrateSpan {
        /// The span concentration in ppm, at most 10000
        span: u16,
    },
    /// Enable or disable automatic baseline correction
    SetAbc {
        /// Enable ABC. If this flag is not present, it will be disabled
        /// and the driver re-asserts the off state periodically.
        #[clap(long, short, action)]
        enable: bool,
        /// ABC period in hours (capped at 24)
        #[clap(long, short, default_value = "24")]
        period: u8,
    },
    /// Request a sensor recovery reset (Use with caution!)
    Reset,
    /// Continuously read CO2 and temperature and print them to stdout
    Monitor {
        /// Interval between reads (e.g., "10s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
        interval: Duration,
    },
}

const fn about_text() -> &'static str {
    "MH-Z19 CO2 sensor command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
struct CliArgs {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    device: String,

    #[command(subcommand)]
    command: CliCommands,

    /// Timeout for a sensor response (e.g., "500ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "500ms")]
    timeout: Duration,

    /// Log every sent and received frame
    #[arg(long, action)]
    log_frames: bool,

    /// Render logged frames in hexadecimal instead of decimal
    #[arg(long, action)]
    hex: bool,
}

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

macro_rules! print_co2 {
    ($sensor:expr, $unlimited:expr) => {
        println!(
            "CO2: {} ppm",
            $sensor
                .get_co2($unlimited, true)
                .with_context(|| "Cannot get CO2")?
        )
    };
}
macro_rules! print_temperature {
    ($sensor:expr) => {
        println!(
            "Temperature: {} °C",
            $sensor
                .get_temperature(true)
                .with_context(|| "Cannot get temperature")?
        )
    };
}
macro_rules! print_range {
    ($sensor:expr) => {
        println!(
            "Range: {} ppm",
            $sensor.get_range().with_context(|| "Cannot get range")?
        )
    };
}
macro_rules! print_abc_status {
    ($sensor:expr) => {
        println!(
            "ABC active: {}",
            $sensor
                .get_abc_status()
                .with_context(|| "Cannot get ABC status")?
        )
    };
}
macro_rules! print_version {
    ($sensor:expr) => {
        println!(
            "Firmware version: {}",
            $sensor
                .get_firmware_version()
                .with_context(|| "Cannot get firmware version")?
        )
    };
}
macro_rules! print_background_co2 {
    ($sensor:expr) => {
        println!(
            "Background CO2: {} ppm",
            $sensor
                .get_background_co2()
                .with_context(|| "Cannot get background CO2")?
        )
    };
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let mut sensor = Mhz19::open(&args.device)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
    sensor.set_timeout(args.timeout);
    sensor.enable_communication_logging(!args.hex, args.log_frames);
    sensor
        .initialize()
        .with_context(|| "Cannot initialize sensor")?;

    match args.command {
        CliCommands::Co2 { unlimited } => print_co2!(sensor, unlimited),
        CliCommands::Raw => println!(
            "Raw: {}",
            sensor
                .get_co2_raw(true)
                .with_context(|| "Cannot get raw value")?
        ),
        CliCommands::Transmittance => println!(
            "Transmittance: {:.2} %",
            sensor
                .get_transmittance(true)
                .with_context(|| "Cannot get transmittance")?
        ),
        CliCommands::Temperature => print_temperature!(sensor),
        CliCommands::Range => print_range!(sensor),
        CliCommands::AbcStatus => print_abc_status!(sensor),
        CliCommands::Accuracy => println!(
            "Accuracy: {}",
            sensor
                .get_accuracy(true)
                .with_context(|| "Cannot get accuracy")?
        ),
        CliCommands::Version => print_version!(sensor),
        CliCommands::BackgroundCo2 => print_background_co2!(sensor),
        CliCommands::TemperatureCalibration => println!(
            "Temperature calibration: {}",
            sensor
                .get_temperature_adjustment()
                .with_context(|| "Cannot get temperature calibration")?
        ),
        CliCommands::All => {
            print_co2!(sensor, false);
            print_temperature!(sensor);
            print_range!(sensor);
            print_abc_status!(sensor);
            print_background_co2!(sensor);
            print_version!(sensor);
        }
        CliCommands::SetRange { range } => {
            sensor.set_range(range).with_context(|| "Cannot set range")?
        }
        CliCommands::CalibrateZero => sensor
            .calibrate_zero()
            .with_context(|| "Cannot calibrate zero point")?,
        CliCommands::CalibrateSpan { span } => sensor
            .calibrate_span(span)
            .with_context(|| "Cannot calibrate span point")?,
        CliCommands::SetAbc { enable, period } => sensor
            .set_auto_calibration(enable, period)
            .with_context(|| "Cannot set auto calibration")?,
        CliCommands::Reset => sensor.recovery_reset()?,
        CliCommands::Monitor { interval } => loop {
            // Forced temperature read: on newer firmware the temperature
            // lives in the unlimited buffer, which the CO2 read above does
            // not refresh.
            let reading = sensor
                .get_co2(false, true)
                .and_then(|co2| sensor.get_temperature(true).map(|t| (co2, t)));
            match reading {
                Ok((co2, temperature)) => {
                    println!("CO2: {co2} ppm, Temperature: {temperature} °C")
                }
                Err(err) => warn!("Read failed ({}): {err}", sensor.last_result()),
            }
            std::thread::sleep(interval);
        },
    }

    Ok(())
}
