use super::answers::{NvilidarResponseDeviceInfo, NvilidarResponseLidarConfig};
use super::internals::*;
use std::f32::consts::PI;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A single range sample decoded from a measurement packet.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePoint {
    /// Distance in millimeters. 0 means no return.
    pub distance: u16,
    /// Signal quality, present only while intensity output is enabled.
    pub quality: Option<u16>,
    /// Motor speed in Hz, the most recent value reported since scan start.
    pub speed: f32,
    /// Core temperature in degrees Celsius, the most recent value reported since scan start.
    pub temperature: f32,
    /// Position of the sample inside its packet.
    pub index: usize,
    /// Angle in degrees, always in `[0, 360)`.
    pub angle: f32,
    /// `true` for the sample at the zero angle, which starts a new revolution.
    pub is_zero: bool,
}

impl RangePoint {
    /// Returns the angle in radians.
    #[inline]
    pub fn angle_radians(&self) -> f32 {
        self.angle * PI / 180f32
    }

    /// Returns the distance in meters.
    #[inline]
    pub fn distance_meters(&self) -> f32 {
        (self.distance as f32) / 1000f32
    }

    /// Returns `true` if the sample carries a return. With intensity output on,
    /// the quality must be non-zero as well.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.distance != 0 && self.quality.map_or(true, |quality| quality != 0)
    }
}

/// One full turn of the mirror, from one zero angle sample to the next.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Revolution {
    /// Samples in the order they were measured. Never empty.
    pub points: Vec<RangePoint>,
    /// Timestamp of the previous revolution's end, in nanoseconds.
    pub start_stamp: u64,
    /// Estimated time of the zero angle crossing that ended this revolution, in nanoseconds.
    pub stop_stamp: u64,
}

impl Revolution {
    /// Time the revolution took, or zero for the first one.
    pub fn duration(&self) -> Duration {
        if self.start_stamp == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.stop_stamp.saturating_sub(self.start_stamp))
    }
}

/// Device identity in printable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub product_name: String,
    /// Firmware version as `V<major>.<minor>`.
    pub software_version: String,
    /// Hardware version as `V<major>.<minor>`.
    pub hardware_version: String,
    pub serial_number: String,
}

impl From<NvilidarResponseDeviceInfo> for DeviceInfo {
    fn from(info: NvilidarResponseDeviceInfo) -> DeviceInfo {
        let name_len = info
            .model_num
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(info.model_num.len());

        DeviceInfo {
            product_name: String::from_utf8_lossy(&info.model_num[..name_len]).into_owned(),
            software_version: format!("V{}.{}", info.sw_version[0], info.sw_version[1]),
            hardware_version: format!("V{}.{}", info.hw_version[0], info.hw_version[1]),
            serial_number: info.serial_num.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Parameters stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub sampling_rate: u32,
    /// Target motor speed in 0.01 Hz.
    pub motor_speed: u16,
    /// Whether every sample carries a quality word.
    pub intensity: bool,
    pub trailing_level: u8,
    /// Zero angle offset in device units.
    pub angle_offset: i16,
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            sampling_rate: NVILIDAR_DEFAULT_SAMPLING_RATE,
            motor_speed: NVILIDAR_DEFAULT_MOTOR_SPEED,
            intensity: false,
            trailing_level: NVILIDAR_DEFAULT_TRAILING_LEVEL,
            angle_offset: 0,
        }
    }
}

impl From<NvilidarResponseLidarConfig> for DeviceConfig {
    /// The angle offset is not part of the stored configuration response and is left at 0.
    fn from(cfg: NvilidarResponseLidarConfig) -> DeviceConfig {
        DeviceConfig {
            sampling_rate: cfg.sampling_rate,
            motor_speed: cfg.aim_speed,
            intensity: cfg.has_sensitive != 0,
            trailing_level: cfg.tailing_level,
            angle_offset: 0,
        }
    }
}

/// User side configuration of a lidar connection.
///
/// ```
/// use nvilidar::LidarConfig;
///
/// let config = LidarConfig {
///     port_name: "/dev/ttyACM0".to_owned(),
///     ..Default::default()
/// };
/// assert_eq!(config.baud_rate, 921600);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LidarConfig {
    pub port_name: String,
    pub baud_rate: u32,
    /// Parameters `init` makes the device agree with.
    pub device: DeviceConfig,
    /// How long to wait for each control response.
    pub response_timeout: Duration,
}

impl Default for LidarConfig {
    fn default() -> LidarConfig {
        LidarConfig {
            port_name: String::new(),
            baud_rate: NVILIDAR_DEFAULT_BAUD_RATE,
            device: DeviceConfig::default(),
            response_timeout: NVILIDAR_DEFAULT_TIMEOUT,
        }
    }
}

/// Source of revolution timestamps.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds. Must never return 0.
    fn now_ns(&self) -> u64;
}

/// Wall clock, nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(distance: u16, quality: Option<u16>) -> RangePoint {
        RangePoint {
            distance,
            quality,
            speed: 10.0,
            temperature: 25.0,
            index: 0,
            angle: 90.0,
            is_zero: false,
        }
    }

    #[test]
    fn point_units() {
        let p = point(1500, None);
        assert!((p.distance_meters() - 1.5).abs() < 1e-6);
        assert!((p.angle_radians() - PI / 2.0).abs() < 1e-6);
    }

    #[test]
    fn point_validity() {
        assert!(point(100, None).is_valid());
        assert!(!point(0, None).is_valid());
        assert!(point(100, Some(12)).is_valid());
        assert!(!point(100, Some(0)).is_valid());
    }

    #[test]
    fn device_info_formatting() {
        let info = NvilidarResponseDeviceInfo {
            model_num: *b"VP3\0\0",
            sw_version: [1, 7],
            hw_version: [2, 0],
            serial_num: [2, 0, 2, 1, 0, 6, 1, 5, 0, 0, 0, 0, 0, 1, 2, 3],
        };
        let info = DeviceInfo::from(info);
        assert_eq!(info.product_name, "VP3");
        assert_eq!(info.software_version, "V1.7");
        assert_eq!(info.hardware_version, "V2.0");
        assert_eq!(info.serial_number, "2021061500000123");
    }

    #[test]
    fn stored_config_conversion() {
        let cfg = DeviceConfig::from(NvilidarResponseLidarConfig {
            sampling_rate: 10,
            aim_speed: 1000,
            has_sensitive: 1,
            tailing_level: 6,
        });
        assert_eq!(
            cfg,
            DeviceConfig {
                intensity: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn first_revolution_has_no_duration() {
        let mut revolution = Revolution {
            points: vec![point(1, None)],
            start_stamp: 0,
            stop_stamp: 1_000,
        };
        assert_eq!(revolution.duration(), Duration::ZERO);
        revolution.start_stamp = 400;
        assert_eq!(revolution.duration(), Duration::from_nanos(600));
    }

    #[test]
    fn system_clock_is_nonzero() {
        assert!(SystemClock.now_ns() > 0);
    }
}
