use crate::base::{Error, Message, Result};
use crate::cmds::*;
use byteorder::{ByteOrder, LittleEndian};
use log::trace;

/// Size of the device information payload.
pub const NVILIDAR_RESP_DEVICE_INFO_SIZE: usize = 25;

/// Device information as sent by the lidar.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NvilidarResponseDeviceInfo {
    /// Product name, ASCII, NUL padded.
    pub model_num: [u8; 5],
    /// Firmware version, major then minor.
    pub sw_version: [u8; 2],
    /// Hardware version, major then minor.
    pub hw_version: [u8; 2],
    /// Serial number, one decimal digit per byte.
    pub serial_num: [u8; 16],
}

impl NvilidarResponseDeviceInfo {
    fn parse(data: &[u8]) -> NvilidarResponseDeviceInfo {
        let mut info = NvilidarResponseDeviceInfo {
            model_num: [0; 5],
            sw_version: [0; 2],
            hw_version: [0; 2],
            serial_num: [0; 16],
        };
        info.model_num.copy_from_slice(&data[0..5]);
        info.sw_version.copy_from_slice(&data[5..7]);
        info.hw_version.copy_from_slice(&data[7..9]);
        info.serial_num.copy_from_slice(&data[9..25]);
        info
    }
}

/// Size of the stored configuration payload.
pub const NVILIDAR_RESP_LIDAR_CFG_SIZE: usize = 8;

/// Stored configuration parameters as sent by the lidar.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NvilidarResponseLidarConfig {
    pub sampling_rate: u32,
    /// Target motor speed in 0.01 Hz.
    pub aim_speed: u16,
    /// Non-zero when samples carry a quality word.
    pub has_sensitive: u8,
    pub tailing_level: u8,
}

impl NvilidarResponseLidarConfig {
    fn parse(data: &[u8]) -> NvilidarResponseLidarConfig {
        NvilidarResponseLidarConfig {
            sampling_rate: LittleEndian::read_u32(&data[0..4]),
            aim_speed: LittleEndian::read_u16(&data[4..6]),
            has_sensitive: data[6],
            tailing_level: data[7],
        }
    }
}

/// A control response that passed framing, checksum and length validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlResponse {
    DeviceInfo(NvilidarResponseDeviceInfo),
    LidarConfig(NvilidarResponseLidarConfig),
    /// Intensity state after a set-intensity command.
    Intensity(u8),
    /// Applied target motor speed in 0.01 Hz.
    AimSpeed(u16),
    /// Applied sampling rate.
    SamplingRate(u32),
    /// Applied trailing filter level.
    TailingLevel(u8),
    /// Zero angle offset, answered by both the get and the set command.
    AngleOffset(i16),
    /// Non-zero when the parameters were written to flash.
    SaveFlag(u8),
}

/// Payload size of the response to `cmd`, for the command ids the driver knows.
pub fn response_payload_size(cmd: u8) -> Option<usize> {
    match cmd {
        NVILIDAR_CMD_GET_DEVICE_INFO => Some(NVILIDAR_RESP_DEVICE_INFO_SIZE),
        NVILIDAR_CMD_GET_LIDAR_CFG => Some(NVILIDAR_RESP_LIDAR_CFG_SIZE),
        NVILIDAR_CMD_SET_HAVE_INTENSITIES
        | NVILIDAR_CMD_SET_NO_INTENSITIES
        | NVILIDAR_CMD_SET_TAILING_LEVEL
        | NVILIDAR_CMD_SAVE_LIDAR_PARA => Some(1),
        NVILIDAR_CMD_SET_AIMSPEED
        | NVILIDAR_CMD_GET_ANGLE_OFFSET
        | NVILIDAR_CMD_SET_ANGLE_OFFSET => Some(2),
        NVILIDAR_CMD_SET_SAMPLING_RATE => Some(4),
        _ => None,
    }
}

fn check_size(msg: &Message, expected: usize) -> Result<&[u8]> {
    if msg.data.len() != expected {
        return Err(Error::ProtocolError {
            description: format!(
                "invalid data size for response {:02X}: expected {}, got {}",
                msg.cmd,
                expected,
                msg.data.len()
            ),
        });
    }
    Ok(&msg.data)
}

impl ControlResponse {
    /// Dispatches a decoded control frame by command id.
    ///
    /// Fails for unknown command ids and for payloads whose length does not match
    /// the command. Such frames are dropped by the reader without waking anyone.
    pub fn from_message(msg: &Message) -> Result<ControlResponse> {
        trace!(
            "Dispatching control response {:02X} ({} bytes)",
            msg.cmd,
            msg.data.len()
        );
        let response = match msg.cmd {
            NVILIDAR_CMD_GET_DEVICE_INFO => ControlResponse::DeviceInfo(
                NvilidarResponseDeviceInfo::parse(check_size(msg, NVILIDAR_RESP_DEVICE_INFO_SIZE)?),
            ),
            NVILIDAR_CMD_GET_LIDAR_CFG => ControlResponse::LidarConfig(
                NvilidarResponseLidarConfig::parse(check_size(msg, NVILIDAR_RESP_LIDAR_CFG_SIZE)?),
            ),
            NVILIDAR_CMD_SET_HAVE_INTENSITIES | NVILIDAR_CMD_SET_NO_INTENSITIES => {
                ControlResponse::Intensity(check_size(msg, 1)?[0])
            }
            NVILIDAR_CMD_SET_AIMSPEED => {
                ControlResponse::AimSpeed(LittleEndian::read_u16(check_size(msg, 2)?))
            }
            NVILIDAR_CMD_SET_SAMPLING_RATE => {
                ControlResponse::SamplingRate(LittleEndian::read_u32(check_size(msg, 4)?))
            }
            NVILIDAR_CMD_SET_TAILING_LEVEL => ControlResponse::TailingLevel(check_size(msg, 1)?[0]),
            NVILIDAR_CMD_GET_ANGLE_OFFSET | NVILIDAR_CMD_SET_ANGLE_OFFSET => {
                ControlResponse::AngleOffset(LittleEndian::read_i16(check_size(msg, 2)?))
            }
            NVILIDAR_CMD_SAVE_LIDAR_PARA => ControlResponse::SaveFlag(check_size(msg, 1)?[0]),
            _ => {
                return Err(Error::ProtocolError {
                    description: format!("unknown response type: {:02X}", msg.cmd),
                })
            }
        };
        Ok(response)
    }
}
