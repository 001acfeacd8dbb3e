//! Synchronous driver for a single MH-Z19 sensor on a dedicated serial link.
//!
//! All public operations funnel through one provisioning pipeline: build the
//! command frame, drain stale input, write, collect exactly nine response
//! bytes against a deadline, validate checksum and opcode echo, then file
//! the frame into the per-family response store. Getters decode from that
//! store; `force = false` reuses whatever was last stored.
//!
//! The driver is single-owner and blocking. It never retries on its own and
//! never closes the transport it was given.

use crate::error::{Error, ResponseStatus};
use crate::protocol::{self, Command, Frame, ResponseFamily, TemperatureLayout, FRAME_SIZE};
use crate::transport::Transport;
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, Error>;

/// Default window for a complete response frame to arrive.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);
/// How often an armed ABC-off setting is re-asserted. The sensor firmware
/// re-enables baseline correction on its own roughly daily.
pub const ABC_RECHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);
/// Smallest detection range the sensor accepts.
pub const RANGE_MIN: u16 = 500;
/// Largest detection range the sensor accepts.
pub const RANGE_MAX: u16 = 20000;
/// Largest span calibration value the sensor accepts.
pub const SPAN_MAX: u16 = 10000;

/// Concentration the sensor idles at while re-establishing its zero point.
pub const FILTER_REBOOT_PPM: u16 = 410;
/// Largest limited/unlimited divergence accepted near the reboot level.
pub const FILTER_MAX_DELTA_PPM: u16 = 50;
/// Largest step between consecutive unlimited readings accepted as genuine.
pub const FILTER_MAX_JUMP_PPM: u16 = 2000;

/// Sleep between polls of the pending-byte count while waiting for a frame.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Driver configuration, mutated only through the corresponding setters.
#[derive(Debug)]
struct Settings {
    /// ABC off must be re-asserted periodically while this is armed.
    abc_repeat: bool,
    filter_mode: bool,
    /// Whether a filtered reading is withheld entirely.
    filter_cleared: bool,
    print_communication: bool,
    print_decimal: bool,
    firmware_major: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            abc_repeat: false,
            filter_mode: false,
            filter_cleared: true,
            print_communication: false,
            print_decimal: true,
            firmware_major: 0,
        }
    }
}

/// One buffer per command family, holding the most recent validated
/// response. Failed exchanges leave the previous contents in place.
#[derive(Debug)]
struct ResponseStore {
    frames: [Frame; 4],
}

impl Default for ResponseStore {
    fn default() -> Self {
        Self {
            frames: [[0; FRAME_SIZE]; 4],
        }
    }
}

impl ResponseStore {
    fn frame(&self, family: ResponseFamily) -> &Frame {
        &self.frames[family.index()]
    }

    fn store(&mut self, family: ResponseFamily, frame: Frame) {
        self.frames[family.index()] = frame;
    }
}

/// Previous unlimited/limited pair retained for the plausibility filter.
#[derive(Debug, Default)]
struct FilterHistory {
    last_pair: Option<(u16, u16)>,
}

impl FilterHistory {
    fn replace(&mut self, unlimited: u16, limited: u16) -> Option<(u16, u16)> {
        self.last_pair.replace((unlimited, limited))
    }
}

#[derive(Debug)]
pub struct Mhz19<T> {
    transport: T,
    responses: ResponseStore,
    settings: Settings,
    temperature_layout: TemperatureLayout,
    filter_history: FilterHistory,
    last_result: ResponseStatus,
    timeout: Duration,
    abc_last_check: Instant,
}

impl<T: Transport> Mhz19<T> {
    /// Wraps an already-open byte stream. The stream must be configured for
    /// the sensor's line settings (9600 8N1) by the caller.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            responses: ResponseStore::default(),
            settings: Settings::default(),
            temperature_layout: TemperatureLayout::default(),
            filter_history: FilterHistory::default(),
            last_result: ResponseStatus::Null,
            timeout: RESPONSE_TIMEOUT,
            abc_last_check: Instant::now(),
        }
    }

    /// Confirms the sensor is responsive, then reads and caches the firmware
    /// version to pick the temperature byte layout.
    pub fn initialize(&mut self) -> Result<()> {
        self.verify_communication()?;
        self.provisioning(Command::GetFirmwareVersion, 0)?;
        let major = protocol::firmware_major(self.responses.frame(ResponseFamily::Status));
        self.settings.firmware_major = major;
        self.temperature_layout = TemperatureLayout::for_firmware_major(major);
        log::debug!(
            "Sensor firmware major version {} - temperature layout {:?}",
            major,
            self.temperature_layout
        );
        Ok(())
    }

    /// One request/response round trip with no decoding, to surface a wiring
    /// or configuration problem early.
    pub fn verify_communication(&mut self) -> Result<()> {
        self.provisioning(Command::Co2Unlimited, 0)
    }

    /// Outcome of the most recent exchange, for callers that check after the
    /// fact instead of at the call site.
    pub fn last_result(&self) -> ResponseStatus {
        self.last_result
    }

    /// Replaces the default 500 ms response window.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// When enabled, every sent and received frame is written to the log in
    /// decimal or hexadecimal. Diagnostics only.
    pub fn enable_communication_logging(&mut self, decimal: bool, enabled: bool) {
        self.settings.print_decimal = decimal;
        self.settings.print_communication = enabled;
    }

    /// Enables the plausibility filter. With `cleared` set, rejected
    /// readings are withheld entirely; otherwise the distrusted value is
    /// still returned and only the last result marks the rejection.
    pub fn set_filter_mode(&mut self, enabled: bool, cleared: bool) {
        self.settings.filter_mode = enabled;
        self.settings.filter_cleared = cleared;
    }

    /// Sets the detection range in ppm (500..=20000).
    pub fn set_range(&mut self, range: u16) -> Result<()> {
        if !(RANGE_MIN..=RANGE_MAX).contains(&range) {
            log::warn!("Range {} outside {}..={}", range, RANGE_MIN, RANGE_MAX);
            return Err(Error::Range);
        }
        self.provisioning(Command::SetRange, range)
    }

    /// Calibrates the span point. The sensor should have seen the given
    /// concentration for several minutes beforehand.
    pub fn calibrate_span(&mut self, span: u16) -> Result<()> {
        if span > SPAN_MAX {
            log::warn!("Span {} above {}", span, SPAN_MAX);
            return Err(Error::Range);
        }
        self.provisioning(Command::SpanCalibration, span)
    }

    /// Calibrates the zero point (400 ppm for this sensor family).
    pub fn calibrate_zero(&mut self) -> Result<()> {
        self.provisioning(Command::ZeroCalibration, 0)
    }

    /// Requests a sensor recovery reset. The sensor may not answer while it
    /// restarts, in which case this reports a timeout.
    pub fn recovery_reset(&mut self) -> Result<()> {
        self.provisioning(Command::RecoveryReset, 0)
    }

    /// Turns automatic baseline correction on with the given period, or off.
    /// Disabling arms a periodic re-assert because the sensor firmware
    /// quietly turns ABC back on by itself.
    pub fn set_auto_calibration(&mut self, enabled: bool, period_hours: u8) -> Result<()> {
        let period = if !enabled {
            protocol::ABC_PERIOD_OFF
        } else if period_hours >= 24 {
            protocol::ABC_PERIOD_DEFAULT
        } else {
            (period_hours as f32 * protocol::ABC_HOURS_SCALE) as u8
        };
        self.provisioning(Command::AbcMode, protocol::abc_parameter(period))?;
        self.settings.abc_repeat = !enabled;
        self.abc_last_check = Instant::now();
        Ok(())
    }

    /// Queries whether automatic baseline correction is currently active.
    pub fn get_abc_status(&mut self) -> Result<bool> {
        self.provisioning(Command::GetAbcStatus, 0)?;
        Ok(protocol::abc_enabled(
            self.responses.frame(ResponseFamily::Status),
        ))
    }

    /// Reads the CO2 concentration in ppm. `unlimited` selects the reading
    /// that is not clamped to the configured range.
    pub fn get_co2(&mut self, unlimited: bool, force: bool) -> Result<u16> {
        self.abc_check(Instant::now());
        if self.settings.filter_mode {
            return self.get_co2_filtered(unlimited, force);
        }
        let command = if unlimited {
            Command::Co2Unlimited
        } else {
            Command::Co2Limited
        };
        if force {
            self.provisioning(command, 0)?;
        }
        let frame = self.responses.frame(command.family());
        Ok(if unlimited {
            protocol::co2_unlimited(frame)
        } else {
            protocol::co2_limited(frame)
        })
    }

    /// Filtered variant: fetches both readings, keeps the previous pair as
    /// history, and rejects values matching the known reset glitches.
    fn get_co2_filtered(&mut self, unlimited: bool, force: bool) -> Result<u16> {
        if force {
            self.provisioning(Command::Co2Unlimited, 0)?;
            self.provisioning(Command::Co2Limited, 0)?;
        }
        let unlim = protocol::co2_unlimited(self.responses.frame(ResponseFamily::Unlimited));
        let lim = protocol::co2_limited(self.responses.frame(ResponseFamily::Limited));
        let previous = self.filter_history.replace(unlim, lim);

        // While the sensor re-zeroes, the limited reading pins near the
        // background level and the unlimited one drifts away from it.
        let reboot_glitch =
            lim <= FILTER_REBOOT_PPM && unlim.abs_diff(lim) > FILTER_MAX_DELTA_PPM;
        let spike = previous
            .is_some_and(|(prev_unlim, _)| unlim.abs_diff(prev_unlim) > FILTER_MAX_JUMP_PPM);

        if reboot_glitch || spike {
            log::warn!(
                "Implausible reading rejected - unlimited={} limited={}",
                unlim,
                lim
            );
            self.last_result = ResponseStatus::Filter;
            if self.settings.filter_cleared {
                return Err(Error::Filter);
            }
        }
        Ok(if unlimited { unlim } else { lim })
    }

    /// Reads the raw, uncalibrated sensor value.
    pub fn get_co2_raw(&mut self, force: bool) -> Result<u16> {
        if force {
            self.provisioning(Command::RawCo2, 0)?;
        }
        Ok(protocol::co2_raw(self.responses.frame(ResponseFamily::Raw)))
    }

    /// Raw reading expressed as a percentage of the reference maximum, a
    /// proxy for optical absorption.
    pub fn get_transmittance(&mut self, force: bool) -> Result<f32> {
        let raw = self.get_co2_raw(force)?;
        Ok(raw as f32 * 100.0 / protocol::TRANSMITTANCE_REFERENCE)
    }

    /// Reads the sensor temperature in degrees Celsius, using the byte
    /// layout selected during [`Mhz19::initialize`].
    pub fn get_temperature(&mut self, force: bool) -> Result<f32> {
        let layout = self.temperature_layout;
        if force {
            let command = match layout.family() {
                ResponseFamily::Unlimited => Command::Co2Unlimited,
                _ => Command::Co2Limited,
            };
            self.provisioning(command, 0)?;
        }
        Ok(protocol::temperature(
            self.responses.frame(layout.family()),
            layout,
        ))
    }

    /// Queries the configured detection range in ppm.
    pub fn get_range(&mut self) -> Result<u16> {
        self.provisioning(Command::GetRange, 0)?;
        Ok(protocol::status_word(
            self.responses.frame(ResponseFamily::Status),
        ))
    }

    /// Queries the background CO2 level the sensor calibrates against.
    pub fn get_background_co2(&mut self) -> Result<u16> {
        self.provisioning(Command::GetBackgroundCo2, 0)?;
        Ok(protocol::status_word(
            self.responses.frame(ResponseFamily::Status),
        ))
    }

    /// Accuracy/quality byte attached to the limited reading.
    pub fn get_accuracy(&mut self, force: bool) -> Result<u8> {
        if force {
            self.provisioning(Command::Co2Limited, 0)?;
        }
        Ok(protocol::accuracy(
            self.responses.frame(ResponseFamily::Limited),
        ))
    }

    /// Firmware version rendered as `major.minor`.
    pub fn get_firmware_version(&mut self) -> Result<String> {
        self.provisioning(Command::GetFirmwareVersion, 0)?;
        Ok(protocol::firmware_version(
            self.responses.frame(ResponseFamily::Status),
        ))
    }

    /// Temperature calibration byte reported by the sensor.
    pub fn get_temperature_adjustment(&mut self) -> Result<u8> {
        self.provisioning(Command::GetTemperatureCalibration, 0)?;
        Ok(protocol::temperature_calibration(
            self.responses.frame(ResponseFamily::Status),
        ))
    }

    /// Re-reads the sensor's last response frame and returns the byte at
    /// `index`.
    pub fn get_last_response(&mut self, index: usize) -> Result<u8> {
        if index >= FRAME_SIZE {
            return Err(Error::Range);
        }
        self.provisioning(Command::GetLastResponse, 0)?;
        Ok(self.responses.frame(ResponseFamily::Status)[index])
    }

    /// Re-asserts ABC off once the re-check interval has elapsed. A failed
    /// re-assert is logged and does not fail the surrounding read.
    fn abc_check(&mut self, now: Instant) {
        if !self.settings.abc_repeat {
            return;
        }
        if now.duration_since(self.abc_last_check) < ABC_RECHECK_INTERVAL {
            return;
        }
        if let Err(err) = self.provisioning(
            Command::AbcMode,
            protocol::abc_parameter(protocol::ABC_PERIOD_OFF),
        ) {
            log::warn!("Cannot re-assert ABC off: {}", err);
        }
        self.abc_last_check = now;
    }

    /// Runs one full exchange and records its outcome as the last result.
    fn provisioning(&mut self, command: Command, parameter: u16) -> Result<()> {
        let result = self.transact(command, parameter);
        match &result {
            Ok(()) => self.last_result = ResponseStatus::Ok,
            Err(err) => {
                if let Some(status) = err.status() {
                    self.last_result = status;
                }
            }
        }
        result
    }

    fn transact(&mut self, command: Command, parameter: u16) -> Result<()> {
        let request = protocol::build_frame(command, parameter);
        self.drain_pending()?;
        self.log_frame("sent", &request);
        self.transport.write_bytes(&request)?;
        let response = self.receive_frame()?;
        self.log_frame("received", &response);
        protocol::verify_checksum(&response)?;
        if response[1] != command.opcode() {
            log::warn!(
                "Opcode mismatch - sent={:#04x} received={:#04x}",
                command.opcode(),
                response[1]
            );
            return Err(Error::Match {
                sent: command.opcode(),
                received: response[1],
            });
        }
        self.responses.store(command.family(), response);
        Ok(())
    }

    /// Discards unread input left over from an earlier exchange so the next
    /// response starts on a frame boundary.
    fn drain_pending(&mut self) -> Result<()> {
        loop {
            let pending = self.transport.bytes_to_read()?;
            if pending == 0 {
                return Ok(());
            }
            log::trace!("Discarding {} stale byte(s)", pending);
            let mut buf = [0u8; 64];
            if self.transport.read_bytes(&mut buf)? == 0 {
                return Ok(());
            }
        }
    }

    /// Accumulates exactly one frame before the deadline; a partial frame is
    /// discarded on timeout.
    fn receive_frame(&mut self) -> Result<Frame> {
        let deadline = Instant::now() + self.timeout;
        let mut frame: Frame = [0; FRAME_SIZE];
        let mut filled = 0;
        while filled < FRAME_SIZE {
            if Instant::now() >= deadline {
                log::warn!(
                    "Response timed out after {:?} with {} byte(s) received",
                    self.timeout,
                    filled
                );
                return Err(Error::Timeout(self.timeout));
            }
            // A zero-byte read despite a pending count falls through to the
            // poll sleep so the deadline still applies.
            let pending = self.transport.bytes_to_read()? as usize;
            if pending > 0 {
                let read = self.transport.read_bytes(&mut frame[filled..])?;
                filled += read;
                if read > 0 {
                    continue;
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        log::trace!("receive_frame: {:02X?}", frame);
        Ok(frame)
    }

    fn log_frame(&self, direction: &str, frame: &Frame) {
        if !self.settings.print_communication {
            return;
        }
        if self.settings.print_decimal {
            log::debug!("{} {:?}", direction, frame);
        } else {
            log::debug!("{} {:02X?}", direction, frame);
        }
    }
}

#[cfg(feature = "serialport")]
impl Mhz19<Box<dyn serialport::SerialPort>> {
    /// Opens `port` with the sensor's fixed line settings (9600 8N1).
    ///
    /// ```no_run
    /// use mhz19_lib::driver::Mhz19;
    ///
    /// let mut sensor = Mhz19::open("/dev/ttyUSB0")?;
    /// sensor.initialize()?;
    /// println!("CO2: {} ppm", sensor.get_co2(true, true)?);
    /// # Ok::<(), mhz19_lib::Error>(())
    /// ```
    pub fn open(port: &str) -> Result<Self> {
        let serial = crate::transport::open(port).map_err(std::io::Error::from)?;
        Ok(Self::new(serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Scripted byte stream: each queued reply becomes readable only once
    /// the next request frame has been written, mirroring a real sensor.
    #[derive(Debug, Default)]
    struct MockTransport {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
        pending: VecDeque<u8>,
    }

    impl MockTransport {
        fn queue_response(&mut self, opcode: u8, payload: [u8; 6]) {
            let mut frame: Frame = [0; FRAME_SIZE];
            frame[0] = protocol::START_BYTE;
            frame[1] = opcode;
            frame[2..8].copy_from_slice(&payload);
            frame[8] = protocol::checksum(&frame);
            self.replies.push_back(frame.to_vec());
        }

        fn queue_bytes(&mut self, bytes: &[u8]) {
            self.replies.push_back(bytes.to_vec());
        }

        fn inject_stale(&mut self, bytes: &[u8]) {
            self.pending.extend(bytes);
        }
    }

    impl Transport for MockTransport {
        fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
            self.sent.push(data.to_vec());
            if let Some(reply) = self.replies.pop_front() {
                self.pending.extend(reply);
            }
            Ok(())
        }

        fn bytes_to_read(&mut self) -> io::Result<u32> {
            Ok(self.pending.len() as u32)
        }

        fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut count = 0;
            while count < buf.len() {
                match self.pending.pop_front() {
                    Some(byte) => {
                        buf[count] = byte;
                        count += 1;
                    }
                    None => break,
                }
            }
            Ok(count)
        }
    }

    fn driver() -> Mhz19<MockTransport> {
        let mut driver = Mhz19::new(MockTransport::default());
        driver.set_timeout(Duration::from_millis(10));
        driver
    }

    #[test]
    fn limited_reading_end_to_end() {
        let mut sensor = driver();
        sensor
            .transport
            .queue_response(0x86, [0x02, 0x90, 0x28, 0, 0, 0]);

        assert_eq!(sensor.get_co2(false, true).unwrap(), 656);
        assert_eq!(sensor.last_result(), ResponseStatus::Ok);
        // The whole frame was retained, so the temperature decodes from the
        // same stored response without a new exchange.
        assert_eq!(sensor.get_temperature(false).unwrap(), 0.0);
        assert_eq!(sensor.transport.sent.len(), 1);
        assert_eq!(sensor.transport.sent[0][2], 0x86);
    }

    #[test]
    fn timeout_reports_and_preserves_buffer() {
        let mut sensor = driver();
        sensor
            .transport
            .queue_response(0x86, [0x02, 0x90, 0x28, 0, 0, 0]);
        assert_eq!(sensor.get_co2(false, true).unwrap(), 656);

        // No reply queued for the second request.
        assert!(matches!(
            sensor.get_co2(false, true),
            Err(Error::Timeout(_))
        ));
        assert_eq!(sensor.last_result(), ResponseStatus::Timeout);
        assert_eq!(sensor.get_co2(false, false).unwrap(), 656);
    }

    #[test]
    fn partial_frame_times_out() {
        let mut sensor = driver();
        sensor.transport.queue_bytes(&[0xFF, 0x86, 0x02]);
        assert!(matches!(
            sensor.get_co2(false, true),
            Err(Error::Timeout(_))
        ));
        assert_eq!(sensor.last_result(), ResponseStatus::Timeout);
    }

    #[test]
    fn checksum_failure_reports_and_preserves_buffer() {
        let mut sensor = driver();
        sensor
            .transport
            .queue_response(0x86, [0x02, 0x90, 0x28, 0, 0, 0]);
        assert_eq!(sensor.get_co2(false, true).unwrap(), 656);

        let mut frame: Frame = [0xFF, 0x86, 0x05, 0x00, 0x30, 0, 0, 0, 0];
        frame[8] = protocol::checksum(&frame) ^ 0xFF;
        sensor.transport.queue_bytes(&frame);

        assert!(matches!(
            sensor.get_co2(false, true),
            Err(Error::Checksum { .. })
        ));
        assert_eq!(sensor.last_result(), ResponseStatus::Crc);
        assert_eq!(sensor.get_co2(false, false).unwrap(), 656);
    }

    #[test]
    fn opcode_mismatch_is_detected() {
        let mut sensor = driver();
        // Valid frame, but it answers 0x85 while 0x86 was requested.
        sensor
            .transport
            .queue_response(0x85, [0, 0, 0x02, 0x90, 0, 0]);
        assert!(matches!(
            sensor.get_co2(false, true),
            Err(Error::Match {
                sent: 0x86,
                received: 0x85
            })
        ));
        assert_eq!(sensor.last_result(), ResponseStatus::Match);
    }

    #[test]
    fn unlimited_reading_uses_its_own_offsets() {
        let mut sensor = driver();
        sensor
            .transport
            .queue_response(0x85, [65, 0, 0x03, 0x20, 0, 0]);
        assert_eq!(sensor.get_co2(true, true).unwrap(), 800);
    }

    #[test]
    fn set_range_then_get_range() {
        let mut sensor = driver();
        sensor.transport.queue_response(0x99, [0, 0, 0, 0, 0, 0]);
        sensor.set_range(5000).unwrap();
        assert_eq!(sensor.transport.sent.len(), 1);
        let request = &sensor.transport.sent[0];
        assert_eq!(request[2], 0x99);
        assert_eq!(protocol::make_int(request[3], request[4]), 5000);

        sensor
            .transport
            .queue_response(0x9B, [0, 0, 0x13, 0x88, 0, 0]);
        assert_eq!(sensor.get_range().unwrap(), 5000);
    }

    #[test]
    fn set_range_rejects_out_of_bounds() {
        let mut sensor = driver();
        assert!(matches!(sensor.set_range(100), Err(Error::Range)));
        assert!(matches!(sensor.set_range(30000), Err(Error::Range)));
        assert!(sensor.transport.sent.is_empty());
        assert_eq!(sensor.last_result(), ResponseStatus::Null);
    }

    #[test]
    fn abc_reassert_fires_only_after_interval() {
        let mut sensor = driver();
        sensor.transport.queue_response(0x79, [0, 0, 0, 0, 0, 0]);
        sensor.set_auto_calibration(false, 0).unwrap();
        assert_eq!(sensor.transport.sent.len(), 1);
        let base = Instant::now();

        sensor.abc_check(base + ABC_RECHECK_INTERVAL - Duration::from_secs(60));
        assert_eq!(sensor.transport.sent.len(), 1);

        sensor.transport.queue_response(0x79, [0, 0, 0, 0, 0, 0]);
        sensor.abc_check(base + ABC_RECHECK_INTERVAL);
        assert_eq!(sensor.transport.sent.len(), 2);
        let reassert = &sensor.transport.sent[1];
        assert_eq!(reassert[2], 0x79);
        assert_eq!(reassert[3], protocol::ABC_PERIOD_OFF);

        // Timer was reset, so an immediate second check stays quiet.
        sensor.abc_check(base + ABC_RECHECK_INTERVAL);
        assert_eq!(sensor.transport.sent.len(), 2);
    }

    #[test]
    fn abc_enable_sends_period_byte_and_disarms() {
        let mut sensor = driver();
        sensor.transport.queue_response(0x79, [0, 0, 0, 0, 0, 0]);
        sensor.set_auto_calibration(true, 24).unwrap();
        let request = &sensor.transport.sent[0];
        assert_eq!(request[3], protocol::ABC_PERIOD_DEFAULT);
        assert!(!sensor.settings.abc_repeat);
    }

    #[test]
    fn filter_rejects_reboot_glitch() {
        let mut sensor = driver();
        sensor.set_filter_mode(true, true);

        // Plausible pair passes through.
        sensor
            .transport
            .queue_response(0x85, [0, 0, 0x02, 0xBC, 0, 0]); // unlimited 700
        sensor
            .transport
            .queue_response(0x86, [0x02, 0x90, 0x28, 0, 0, 0]); // limited 656
        assert_eq!(sensor.get_co2(true, true).unwrap(), 700);

        // Limited pinned at the reboot level while unlimited drifts.
        sensor
            .transport
            .queue_response(0x85, [0, 0, 0x07, 0xD0, 0, 0]); // unlimited 2000
        sensor
            .transport
            .queue_response(0x86, [0x01, 0x9A, 0x28, 0, 0, 0]); // limited 410
        assert!(matches!(sensor.get_co2(true, true), Err(Error::Filter)));
        assert_eq!(sensor.last_result(), ResponseStatus::Filter);
    }

    #[test]
    fn filter_uncleared_returns_distrusted_value() {
        let mut sensor = driver();
        sensor.set_filter_mode(true, false);
        sensor
            .transport
            .queue_response(0x85, [0, 0, 0x07, 0xD0, 0, 0]); // unlimited 2000
        sensor
            .transport
            .queue_response(0x86, [0x01, 0x9A, 0x28, 0, 0, 0]); // limited 410
        assert_eq!(sensor.get_co2(true, true).unwrap(), 2000);
        assert_eq!(sensor.last_result(), ResponseStatus::Filter);
    }

    #[test]
    fn filter_rejects_spike_against_history() {
        let mut sensor = driver();
        sensor.set_filter_mode(true, true);

        sensor
            .transport
            .queue_response(0x85, [0, 0, 0x02, 0xBC, 0, 0]); // unlimited 700
        sensor
            .transport
            .queue_response(0x86, [0x02, 0x90, 0x28, 0, 0, 0]); // limited 656
        assert_eq!(sensor.get_co2(true, true).unwrap(), 700);

        // Jump of more than FILTER_MAX_JUMP_PPM against the previous pair.
        sensor
            .transport
            .queue_response(0x85, [0, 0, 0x13, 0x88, 0, 0]); // unlimited 5000
        sensor
            .transport
            .queue_response(0x86, [0x13, 0x24, 0x28, 0, 0, 0]); // limited 4900
        assert!(matches!(sensor.get_co2(true, true), Err(Error::Filter)));

        // History advanced, so a sustained level is accepted next time.
        sensor
            .transport
            .queue_response(0x85, [0, 0, 0x13, 0x88, 0, 0]);
        sensor
            .transport
            .queue_response(0x86, [0x13, 0x24, 0x28, 0, 0, 0]);
        assert_eq!(sensor.get_co2(true, true).unwrap(), 5000);
    }

    #[test]
    fn initialize_selects_temperature_layout() {
        let mut sensor = driver();
        sensor
            .transport
            .queue_response(0x85, [0, 0, 0x02, 0x90, 0, 0]); // verify round trip
        sensor.transport.queue_response(0xA0, [5, 2, 0, 0, 0, 0]);
        sensor.initialize().unwrap();
        assert_eq!(sensor.settings.firmware_major, 5);
        assert_eq!(
            sensor.temperature_layout,
            TemperatureLayout::UnsignedUnlimited
        );

        // Newer layout: temperature byte 2 of the unlimited reading.
        sensor
            .transport
            .queue_response(0x85, [65, 0, 0x02, 0x90, 0, 0]);
        assert_eq!(sensor.get_temperature(true).unwrap(), 25.0);
    }

    #[test]
    fn firmware_version_string() {
        let mut sensor = driver();
        sensor.transport.queue_response(0xA0, [4, 3, 0, 0, 0, 0]);
        assert_eq!(sensor.get_firmware_version().unwrap(), "4.3");
    }

    #[test]
    fn transmittance_is_percentage_of_reference() {
        let mut sensor = driver();
        sensor
            .transport
            .queue_response(0x84, [0x4E, 0x20, 0, 0, 0, 0]); // raw 20000
        assert_eq!(sensor.get_transmittance(true).unwrap(), 50.0);
    }

    #[test]
    fn status_queries_decode_their_bytes() {
        let mut sensor = driver();
        sensor
            .transport
            .queue_response(0x9C, [0, 0, 0x01, 0x90, 0, 0]);
        assert_eq!(sensor.get_background_co2().unwrap(), 400);

        sensor.transport.queue_response(0x7D, [0, 0, 0, 0, 0, 1]);
        assert!(sensor.get_abc_status().unwrap());

        sensor.transport.queue_response(0xA3, [0, 0, 40, 0, 0, 0]);
        assert_eq!(sensor.get_temperature_adjustment().unwrap(), 40);

        sensor
            .transport
            .queue_response(0xA2, [0x11, 0x22, 0x33, 0, 0, 0]);
        assert_eq!(sensor.get_last_response(3).unwrap(), 0x22);
        assert!(matches!(
            sensor.get_last_response(FRAME_SIZE),
            Err(Error::Range)
        ));
    }

    /// Reports a pending byte but never delivers it.
    #[derive(Debug, Default)]
    struct StuckTransport;

    impl Transport for StuckTransport {
        fn write_bytes(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn bytes_to_read(&mut self) -> io::Result<u32> {
            Ok(1)
        }

        fn read_bytes(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn zero_byte_reads_still_time_out() {
        let mut sensor = Mhz19::new(StuckTransport);
        sensor.set_timeout(Duration::from_millis(10));
        assert!(matches!(
            sensor.get_co2(false, true),
            Err(Error::Timeout(_))
        ));
        assert_eq!(sensor.last_result(), ResponseStatus::Timeout);
    }

    #[test]
    fn forced_temperature_read_refreshes_newer_layout() {
        let mut sensor = driver();
        sensor
            .transport
            .queue_response(0x85, [60, 0, 0x02, 0x90, 0, 0]); // verify, temp 20
        sensor.transport.queue_response(0xA0, [5, 0, 0, 0, 0, 0]);
        sensor.initialize().unwrap();

        // A limited CO2 poll does not touch the unlimited buffer the newer
        // layout decodes from, so an unforced read stays on the old value.
        sensor
            .transport
            .queue_response(0x86, [0x02, 0x90, 0x28, 0, 0, 0]);
        assert_eq!(sensor.get_co2(false, true).unwrap(), 656);
        assert_eq!(sensor.get_temperature(false).unwrap(), 20.0);

        sensor
            .transport
            .queue_response(0x85, [65, 0, 0x02, 0x90, 0, 0]); // temp 25
        assert_eq!(sensor.get_temperature(true).unwrap(), 25.0);
    }

    #[test]
    fn filter_verdict_recorded_for_stored_readings() {
        let mut sensor = driver();
        sensor.set_filter_mode(true, true);
        sensor
            .transport
            .queue_response(0x85, [0, 0, 0x07, 0xD0, 0, 0]); // unlimited 2000
        sensor
            .transport
            .queue_response(0x86, [0x01, 0x9A, 0x28, 0, 0, 0]); // limited 410
        assert!(matches!(sensor.get_co2(true, true), Err(Error::Filter)));

        // Re-evaluating the stored pair without any I/O records the
        // rejection too.
        sensor.last_result = ResponseStatus::Null;
        assert!(matches!(sensor.get_co2(true, false), Err(Error::Filter)));
        assert_eq!(sensor.last_result(), ResponseStatus::Filter);
    }

    #[test]
    fn calibrate_span_validates_and_packs() {
        let mut sensor = driver();
        assert!(matches!(
            sensor.calibrate_span(SPAN_MAX + 1),
            Err(Error::Range)
        ));
        assert!(sensor.transport.sent.is_empty());

        sensor.transport.queue_response(0x88, [0, 0, 0, 0, 0, 0]);
        sensor.calibrate_span(2000).unwrap();
        let request = &sensor.transport.sent[0];
        assert_eq!(request[2], 0x88);
        assert_eq!(protocol::make_int(request[3], request[4]), 2000);
    }

    #[test]
    fn accuracy_byte_decodes_from_limited_reading() {
        let mut sensor = driver();
        sensor
            .transport
            .queue_response(0x86, [0x02, 0x90, 0x28, 42, 0, 0]);
        assert_eq!(sensor.get_accuracy(true).unwrap(), 42);
        // The stored buffer serves the unforced variant.
        assert_eq!(sensor.get_accuracy(false).unwrap(), 42);
    }

    #[test]
    fn stale_input_is_drained_before_sending() {
        let mut sensor = driver();
        sensor.transport.inject_stale(&[0xAA, 0xBB, 0xCC]);
        sensor
            .transport
            .queue_response(0x86, [0x02, 0x90, 0x28, 0, 0, 0]);
        // Stale bytes would otherwise shift the frame boundary.
        assert_eq!(sensor.get_co2(false, true).unwrap(), 656);
    }
}
