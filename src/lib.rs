//! # NVILIDAR Driver
//!
//! `nvilidar` is a driver for NVILIDAR series spinning-mirror laser rangefinders
//! attached over a serial link. It reads device information and stored parameters,
//! changes them, and delivers the measurement stream as complete revolutions.
//!
//! A background reader thread owns reception. While no scan runs it decodes control
//! responses; during a scan it decodes measurement packets and assembles them into
//! [`Revolution`]s.
//!
//! ```no_run
//! use nvilidar::{LidarConfig, NvilidarDevice};
//! use std::time::Duration;
//!
//! # fn main() -> nvilidar::Result<()> {
//! let mut lidar = NvilidarDevice::with_serial_port(LidarConfig {
//!     port_name: "/dev/ttyACM0".to_owned(),
//!     ..Default::default()
//! });
//! lidar.init()?;
//! lidar.start_scan()?;
//! let revolution = lidar.wait_revolution(Duration::from_secs(2))?;
//! println!("{} points", revolution.points.len());
//! lidar.stop_scan()?;
//! # Ok(())
//! # }
//! ```

extern crate byteorder;
extern crate log;

mod answers;
pub mod base;
mod checksum;
mod cmds;
mod internals;
pub mod parsers;
mod protocol;
pub mod reader;
mod revolution;
pub mod transport;
pub mod types;

pub use crate::answers::{ControlResponse, NvilidarResponseDeviceInfo, NvilidarResponseLidarConfig};
pub use crate::base::{Error, Message, Result};
pub use crate::protocol::NvilidarHostProtocol;
pub use crate::reader::{DriverState, LidarReader};
pub use crate::revolution::RevolutionAggregator;
pub use crate::types::{
    Clock, DeviceConfig, DeviceInfo, LidarConfig, RangePoint, Revolution, SystemClock,
};

use crate::base::ProtocolEncoder;
use byteorder::{ByteOrder, LittleEndian};
use crate::cmds::*;
use crate::internals::*;
use crate::reader::{lock_transport, SharedTransport};
use crate::transport::{Transport, TransportWriter};
use log::{error, info, trace, warn};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Builds a closure taking the payload out of one `ControlResponse` variant.
macro_rules! response_of {
    ($variant:ident) => {
        |response| match response {
            ControlResponse::$variant(value) => Some(value),
            _ => None,
        }
    };
}

/// A connection to an NVILIDAR device.
///
/// Control operations stop a running scan first, since the device only answers
/// commands while idle.
pub struct NvilidarDevice {
    config: LidarConfig,
    transport: SharedTransport,
    state: Arc<DriverState>,
    clock: Arc<dyn Clock>,
    protocol: NvilidarHostProtocol,
    reader: Option<JoinHandle<()>>,
    device_info: Option<DeviceInfo>,
    device_config: Option<DeviceConfig>,
}

impl NvilidarDevice {
    /// Creates a device talking over `transport`. Nothing is opened until
    /// [`connect`](NvilidarDevice::connect).
    pub fn new(transport: Box<dyn Transport>, config: LidarConfig) -> NvilidarDevice {
        NvilidarDevice::with_clock(transport, config, Arc::new(SystemClock))
    }

    /// Like [`new`](NvilidarDevice::new), stamping revolutions with `clock`.
    pub fn with_clock(
        transport: Box<dyn Transport>,
        config: LidarConfig,
        clock: Arc<dyn Clock>,
    ) -> NvilidarDevice {
        trace!("Creating new NvilidarDevice");
        NvilidarDevice {
            config,
            transport: Arc::new(Mutex::new(transport)),
            state: Arc::new(DriverState::new()),
            clock,
            protocol: NvilidarHostProtocol::new(),
            reader: None,
            device_info: None,
            device_config: None,
        }
    }

    /// Creates a device on the serial port named in `config`.
    #[cfg(feature = "serial")]
    pub fn with_serial_port(config: LidarConfig) -> NvilidarDevice {
        let transport = transport::SerialTransport::new(&config.port_name, config.baud_rate);
        NvilidarDevice::new(Box::new(transport), config)
    }

    pub fn config(&self) -> &LidarConfig {
        &self.config
    }

    /// Device information read by the last successful `get_device_info`.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Parameters as last read from or acknowledged by the device.
    pub fn device_config(&self) -> Option<&DeviceConfig> {
        self.device_config.as_ref()
    }

    /// Opens the transport and starts the reader thread.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.join_reader();

        lock_transport(&self.transport).open()?;
        thread::sleep(NVILIDAR_CONNECT_SETTLE);

        self.state.end_scan();
        self.state.set_intensity(self.config.device.intensity);
        self.state.response.reset();
        self.state.revolution.reset();

        let reader = LidarReader::new(self.state.clone(), self.clock.clone());
        match reader.spawn(self.transport.clone()) {
            Ok(handle) => self.reader = Some(handle),
            Err(err) => {
                error!("Failed to spawn reader thread: {}", err);
                lock_transport(&self.transport).close();
                return Err(err.into());
            }
        }
        info!("Connected to lidar on {}", self.config.port_name);
        Ok(())
    }

    /// Closes the transport and waits for the reader thread to finish.
    pub fn disconnect(&mut self) {
        self.state.end_scan();
        lock_transport(&self.transport).close();
        if self.reader.is_some() {
            self.join_reader();
            info!("Disconnected from lidar on {}", self.config.port_name);
        }
    }

    fn join_reader(&mut self) {
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some() && lock_transport(&self.transport).is_open()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Sends a command, as a short frame without payload or a long frame with one.
    pub fn send_command(&mut self, cmd: u8, payload: &[u8]) -> Result<()> {
        trace!("Sending command {:02X} with payload {:02X?}", cmd, payload);
        let msg = Message::with_data(cmd, payload);
        let mut transport = lock_transport(&self.transport);
        if !transport.is_open() {
            return Err(Error::NotConnected);
        }
        self.protocol
            .write_to(&msg, &mut TransportWriter(&mut **transport))?;
        Ok(())
    }

    /// Waits for the next control response.
    pub fn wait_for_response(&self, timeout: Duration) -> Result<ControlResponse> {
        self.state.response.wait_timeout(timeout).ok_or_else(|| {
            warn!("Timeout waiting for control response");
            Error::OperationTimeout
        })
    }

    /// Waits for the next revolution of a running scan.
    ///
    /// The first revolutions after scan start are not delivered while the motor
    /// settles.
    pub fn wait_revolution(&self, timeout: Duration) -> Result<Revolution> {
        self.ensure_connected()?;
        self.state.revolution.wait_timeout(timeout).ok_or_else(|| {
            warn!("Timeout waiting for revolution");
            Error::OperationTimeout
        })
    }

    /// Sends `cmd` and waits for the response `extract` accepts. Other responses
    /// arriving in the meantime are dropped.
    fn request<T>(
        &mut self,
        cmd: u8,
        payload: &[u8],
        timeout: Duration,
        extract: impl Fn(ControlResponse) -> Option<T>,
    ) -> Result<T> {
        self.ensure_connected()?;
        if self.state.is_scanning() {
            self.stop_scan()?;
        }
        self.state.response.reset();
        self.send_command(cmd, payload)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let response = self.state.response.wait_timeout(remaining).ok_or_else(|| {
                warn!("Timeout waiting for response to command {:02X}", cmd);
                Error::OperationTimeout
            })?;
            trace!("Response to command {:02X}: {:?}", cmd, response);
            match extract(response) {
                Some(value) => return Ok(value),
                None => warn!("Ignoring unrelated response while waiting for {:02X}", cmd),
            }
        }
    }

    /// Stops any scan, reads the device information and the stored parameters, and
    /// writes every parameter that differs from the configured ones.
    ///
    /// Connects first if needed. Returns the parameters the device ends up with; a
    /// parameter the device refused keeps its old value there.
    pub fn init(&mut self) -> Result<DeviceConfig> {
        self.connect()?;
        self.stop_scan()?;
        thread::sleep(NVILIDAR_INIT_SETTLE);

        let info = self.get_device_info()?;
        info!(
            "Lidar {} (firmware {}, hardware {}, serial number {})",
            info.product_name, info.software_version, info.hardware_version, info.serial_number
        );

        let mut current = self.get_lidar_config()?;
        match self.get_zero_offset_angle() {
            Ok(offset) => current.angle_offset = offset,
            Err(err) => warn!("Could not read the zero angle offset: {}", err),
        }
        let wanted = self.config.device;

        let mut changed = false;
        let mut failed = false;
        let mut apply = |result: Result<()>| {
            changed = true;
            if let Err(err) = result {
                warn!("Failed to set lidar parameter: {}", err);
                failed = true;
            }
        };
        if current.sampling_rate != wanted.sampling_rate {
            apply(
                self.set_sampling_rate(wanted.sampling_rate)
                    .map(|rate| current.sampling_rate = rate),
            );
        }
        if current.motor_speed != wanted.motor_speed {
            apply(
                self.set_motor_speed(wanted.motor_speed)
                    .map(|speed| current.motor_speed = speed),
            );
        }
        if current.intensity != wanted.intensity {
            apply(
                self.set_intensities(wanted.intensity)
                    .map(|()| current.intensity = wanted.intensity),
            );
        }
        if current.trailing_level != wanted.trailing_level {
            apply(
                self.set_trailing_level(wanted.trailing_level)
                    .map(|level| current.trailing_level = level),
            );
        }
        if current.angle_offset != wanted.angle_offset {
            apply(
                self.set_zero_offset_angle(wanted.angle_offset)
                    .map(|offset| current.angle_offset = offset),
            );
        }
        if changed {
            if failed {
                warn!("Some lidar parameters could not be set");
            } else {
                info!("Lidar parameters updated");
            }
        }

        info!(
            "Lidar config: sampling rate {}, speed {}.{:02} Hz, intensity {}, trailing level {}, angle offset {}",
            current.sampling_rate,
            current.motor_speed / 100,
            current.motor_speed % 100,
            if current.intensity { "on" } else { "off" },
            current.trailing_level,
            current.angle_offset
        );
        self.state.set_intensity(current.intensity);
        self.device_config = Some(current);
        Ok(current)
    }

    /// Starts the measurement stream. Does nothing if a scan is already running.
    pub fn start_scan(&mut self) -> Result<()> {
        self.ensure_connected()?;
        if self.state.is_scanning() {
            return Ok(());
        }
        self.state.revolution.reset();
        self.state.begin_scan();
        if let Err(err) = self.send_command(NVILIDAR_CMD_SCAN, &[]) {
            error!("Failed to start scan: {}", err);
            if let Err(stop_err) = self.stop_scan() {
                warn!("Failed to stop scan after a failed start: {}", stop_err);
            }
            return Err(err);
        }
        info!("Lidar is scanning");
        Ok(())
    }

    /// Stops the measurement stream and drops unread input.
    pub fn stop_scan(&mut self) -> Result<()> {
        self.ensure_connected()?;
        {
            let mut transport = lock_transport(&self.transport);
            self.state.end_scan();
            transport.flush_input()?;
        }
        self.send_command(NVILIDAR_CMD_STOP, &[])?;
        trace!("Scan stopped");
        Ok(())
    }

    pub fn is_scanning(&self) -> bool {
        self.state.is_scanning()
    }

    /// Reboots the lidar core and waits for it to come back.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_connected()?;
        if self.state.is_scanning() {
            self.stop_scan()?;
        }
        self.send_command(NVILIDAR_CMD_RESET, &[])?;
        thread::sleep(NVILIDAR_RESET_WAIT);
        info!("Lidar reset");
        Ok(())
    }

    /// Gets the device information with the configured response timeout.
    pub fn get_device_info(&mut self) -> Result<DeviceInfo> {
        self.get_device_info_with_timeout(self.config.response_timeout)
    }

    pub fn get_device_info_with_timeout(&mut self, timeout: Duration) -> Result<DeviceInfo> {
        trace!("Getting device info with timeout: {:?}", timeout);
        let raw = self.request(
            NVILIDAR_CMD_GET_DEVICE_INFO,
            &[],
            timeout,
            response_of!(DeviceInfo),
        )?;
        let info = DeviceInfo::from(raw);
        self.device_info = Some(info.clone());
        Ok(info)
    }

    /// Gets the parameters stored on the device.
    ///
    /// The zero angle offset is not part of this response; the returned value keeps
    /// the last known offset.
    pub fn get_lidar_config(&mut self) -> Result<DeviceConfig> {
        self.get_lidar_config_with_timeout(self.config.response_timeout)
    }

    pub fn get_lidar_config_with_timeout(&mut self, timeout: Duration) -> Result<DeviceConfig> {
        trace!("Getting lidar config with timeout: {:?}", timeout);
        let raw = self.request(
            NVILIDAR_CMD_GET_LIDAR_CFG,
            &[],
            timeout,
            response_of!(LidarConfig),
        )?;
        let mut cfg = DeviceConfig::from(raw);
        cfg.angle_offset = self.device_config.map_or(0, |known| known.angle_offset);
        self.state.set_intensity(cfg.intensity);
        self.device_config = Some(cfg);
        Ok(cfg)
    }

    /// Sets the sampling rate. Returns the rate the device applied.
    pub fn set_sampling_rate(&mut self, rate: u32) -> Result<u32> {
        self.set_sampling_rate_with_timeout(rate, self.config.response_timeout)
    }

    pub fn set_sampling_rate_with_timeout(&mut self, rate: u32, timeout: Duration) -> Result<u32> {
        trace!("Setting sampling rate to {}", rate);
        let mut payload = [0u8; 4];
        LittleEndian::write_u32(&mut payload, rate);
        let applied = self.request(
            NVILIDAR_CMD_SET_SAMPLING_RATE,
            &payload,
            timeout,
            response_of!(SamplingRate),
        )?;
        self.update_config(|cfg| cfg.sampling_rate = applied);
        Ok(applied)
    }

    /// Sets the target motor speed in 0.01 Hz. Returns the speed the device applied.
    pub fn set_motor_speed(&mut self, speed: u16) -> Result<u16> {
        self.set_motor_speed_with_timeout(speed, self.config.response_timeout)
    }

    pub fn set_motor_speed_with_timeout(&mut self, speed: u16, timeout: Duration) -> Result<u16> {
        trace!("Setting motor speed to {}", speed);
        let mut payload = [0u8; 2];
        LittleEndian::write_u16(&mut payload, speed);
        let applied = self.request(
            NVILIDAR_CMD_SET_AIMSPEED,
            &payload,
            timeout,
            response_of!(AimSpeed),
        )?;
        self.update_config(|cfg| cfg.motor_speed = applied);
        Ok(applied)
    }

    /// Turns the per-sample quality output on or off.
    pub fn set_intensities(&mut self, intensity: bool) -> Result<()> {
        self.set_intensities_with_timeout(intensity, self.config.response_timeout)
    }

    pub fn set_intensities_with_timeout(&mut self, intensity: bool, timeout: Duration) -> Result<()> {
        trace!("Setting intensity output to {}", intensity);
        let cmd = if intensity {
            NVILIDAR_CMD_SET_HAVE_INTENSITIES
        } else {
            NVILIDAR_CMD_SET_NO_INTENSITIES
        };
        let ack = self.request(cmd, &[], timeout, response_of!(Intensity))?;
        trace!("Intensity acknowledged with {:02X}", ack);
        self.state.set_intensity(intensity);
        self.update_config(|cfg| cfg.intensity = intensity);
        Ok(())
    }

    /// Sets the trailing filter level. Returns the level the device applied.
    pub fn set_trailing_level(&mut self, level: u8) -> Result<u8> {
        self.set_trailing_level_with_timeout(level, self.config.response_timeout)
    }

    pub fn set_trailing_level_with_timeout(&mut self, level: u8, timeout: Duration) -> Result<u8> {
        trace!("Setting trailing level to {}", level);
        let applied = self.request(
            NVILIDAR_CMD_SET_TAILING_LEVEL,
            &[level],
            timeout,
            response_of!(TailingLevel),
        )?;
        self.update_config(|cfg| cfg.trailing_level = applied);
        Ok(applied)
    }

    /// Reads the zero angle offset.
    pub fn get_zero_offset_angle(&mut self) -> Result<i16> {
        self.get_zero_offset_angle_with_timeout(self.config.response_timeout)
    }

    pub fn get_zero_offset_angle_with_timeout(&mut self, timeout: Duration) -> Result<i16> {
        trace!("Getting zero angle offset");
        let offset = self.request(
            NVILIDAR_CMD_GET_ANGLE_OFFSET,
            &[],
            timeout,
            response_of!(AngleOffset),
        )?;
        self.update_config(|cfg| cfg.angle_offset = offset);
        Ok(offset)
    }

    /// Sets the zero angle offset. Returns the offset the device applied.
    pub fn set_zero_offset_angle(&mut self, offset: i16) -> Result<i16> {
        self.set_zero_offset_angle_with_timeout(offset, self.config.response_timeout)
    }

    pub fn set_zero_offset_angle_with_timeout(
        &mut self,
        offset: i16,
        timeout: Duration,
    ) -> Result<i16> {
        trace!("Setting zero angle offset to {}", offset);
        let mut payload = [0u8; 2];
        LittleEndian::write_i16(&mut payload, offset);
        let applied = self.request(
            NVILIDAR_CMD_SET_ANGLE_OFFSET,
            &payload,
            timeout,
            response_of!(AngleOffset),
        )?;
        self.update_config(|cfg| cfg.angle_offset = applied);
        Ok(applied)
    }

    /// Writes the current parameters to device flash.
    pub fn save_config(&mut self) -> Result<()> {
        self.save_config_with_timeout(self.config.response_timeout)
    }

    pub fn save_config_with_timeout(&mut self, timeout: Duration) -> Result<()> {
        trace!("Saving lidar parameters");
        let saved = self.request(
            NVILIDAR_CMD_SAVE_LIDAR_PARA,
            &[],
            timeout,
            response_of!(SaveFlag),
        )?;
        if saved == 0 {
            error!("Lidar refused to save its parameters");
            return Err(Error::OperationFail {
                description: "device did not save the parameters".to_owned(),
            });
        }
        Ok(())
    }

    fn update_config(&mut self, update: impl FnOnce(&mut DeviceConfig)) {
        if let Some(cfg) = self.device_config.as_mut() {
            update(cfg);
        }
    }
}

impl Drop for NvilidarDevice {
    fn drop(&mut self) {
        self.disconnect();
    }
}
