// Frame markers

/// First byte of a command without payload.
pub const NVILIDAR_START_BYTE_SHORT_CMD: u8 = 0xA5;

/// First byte of a command with payload, and of every control response.
pub const NVILIDAR_START_BYTE_LONG_CMD: u8 = 0xA7;

/// Last byte of a long command or control response.
pub const NVILIDAR_END_CMD: u8 = 0x29;

/// Size of the long frame header: marker, command id and 16-bit length.
pub const NVILIDAR_LONG_CMD_HEADER_SIZE: usize = 4;

/// Largest payload a long command may carry.
pub const NVILIDAR_MAX_CMD_PAYLOAD: usize = 255;

// Commands without payload and response

/// Command code to start streaming measurement packets.
pub const NVILIDAR_CMD_SCAN: u8 = 0x60;

/// Command code to stop the measurement stream.
pub const NVILIDAR_CMD_STOP: u8 = 0x65;

/// Command code to reset the lidar core. The device reboots and answers nothing.
pub const NVILIDAR_CMD_RESET: u8 = 0x80;

// Commands without payload but have response

/// Turn on per-sample quality output. Answered with the new intensity state (u8).
pub const NVILIDAR_CMD_SET_HAVE_INTENSITIES: u8 = 0x86;

/// Turn off per-sample quality output. Answered with the new intensity state (u8).
pub const NVILIDAR_CMD_SET_NO_INTENSITIES: u8 = 0x87;

/// Read the zero angle offset. Answered with an i16.
pub const NVILIDAR_CMD_GET_ANGLE_OFFSET: u8 = 0x8B;

/// Request device information (model, firmware, hardware, serial number).
pub const NVILIDAR_CMD_GET_DEVICE_INFO: u8 = 0x90;

/// Request the stored configuration parameters.
pub const NVILIDAR_CMD_GET_LIDAR_CFG: u8 = 0x91;

/// Persist the current parameters to device flash. Answered with a u8 flag.
pub const NVILIDAR_CMD_SAVE_LIDAR_PARA: u8 = 0x99;

// Commands with payload and have response

/// Set the target motor speed in 0.01 Hz (u16 payload). Echoes the applied value.
pub const NVILIDAR_CMD_SET_AIMSPEED: u8 = 0x88;

/// Set the sampling rate (u32 payload). Echoes the applied value.
pub const NVILIDAR_CMD_SET_SAMPLING_RATE: u8 = 0x89;

/// Set the trailing filter level (u8 payload). Echoes the applied value.
pub const NVILIDAR_CMD_SET_TAILING_LEVEL: u8 = 0x8A;

/// Set the zero angle offset (i16 payload). Echoes the applied value.
pub const NVILIDAR_CMD_SET_ANGLE_OFFSET: u8 = 0x8C;

// Measurement packets

/// Marker of a measurement packet, read as a little-endian word (`AA 55` on the wire).
pub const NVILIDAR_POINT_HEADER: u16 = 0x55AA;

/// Size of the measurement packet header, marker and checksum included.
pub const NVILIDAR_POINT_PACKAGE_HEAD_SIZE: usize = 12;

/// Bit that must be set in the low byte of both angle fields.
pub const NVILIDAR_RESP_MEASUREMENT_CHECKBIT: u8 = 0x01;

/// Angle units per degree.
pub const NVILIDAR_ANGULAR_RESOLUTION: u16 = 64;

/// Set in the speed word of a packet that contains the zero angle sample.
pub const NVILIDAR_ZERO_FLAG_HIGH: u16 = 0x8000;
pub const NVILIDAR_ZERO_FLAG_LOW: u16 = 0x0001;

/// Sample size without and with the quality word.
pub const NVILIDAR_SAMPLE_SIZE: usize = 2;
pub const NVILIDAR_SAMPLE_SIZE_WITH_QUALITY: usize = 4;
