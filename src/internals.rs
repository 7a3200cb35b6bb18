use std::time::Duration;

/// Default timeout for a control response.
pub const NVILIDAR_DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default baud rate of the serial link.
pub const NVILIDAR_DEFAULT_BAUD_RATE: u32 = 921600;

pub const NVILIDAR_DEFAULT_SAMPLING_RATE: u32 = 10;

/// Default target motor speed, 10.00 Hz.
pub const NVILIDAR_DEFAULT_MOTOR_SPEED: u16 = 1000;

pub const NVILIDAR_DEFAULT_TRAILING_LEVEL: u8 = 6;

/// Size of the reader thread's receive buffer.
pub const NVILIDAR_READ_BUFFER_SIZE: usize = 8192;

/// Reader thread pause between polls while not scanning.
pub const NVILIDAR_CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(3);

/// Reader thread pause after an empty read while scanning.
pub const NVILIDAR_SCAN_IDLE_INTERVAL: Duration = Duration::from_micros(500);

/// Read timeout of the serial port.
pub const NVILIDAR_PORT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Pause after opening the port before the reader starts.
pub const NVILIDAR_CONNECT_SETTLE: Duration = Duration::from_millis(100);

/// Pause after stopping the scan in `init`.
pub const NVILIDAR_INIT_SETTLE: Duration = Duration::from_millis(300);

/// Time the device needs to reboot after a reset.
pub const NVILIDAR_RESET_WAIT: Duration = Duration::from_millis(800);

/// Revolutions completed after scan start that are assembled but not delivered.
pub const NVILIDAR_STARTUP_REVOLUTIONS: u32 = 3;

/// Revolutions whose stop timestamp is the raw clock reading.
pub const NVILIDAR_TIMESTAMP_WARMUP_REVOLUTIONS: u32 = 8;

/// Samples kept while waiting for a zero angle before the backlog is dropped.
pub const NVILIDAR_MAX_PENDING_POINTS: usize = 16384;
