use crate::base::ProtocolDecoder;
use crate::checksum::WordChecksum;
use crate::cmds::*;
use crate::types::RangePoint;
use byteorder::{ByteOrder, LittleEndian};
use log::{trace, warn};
use std::cmp::min;

const ANGLE_90: f32 = (90 * NVILIDAR_ANGULAR_RESOLUTION) as f32;
const ANGLE_270: f32 = (270 * NVILIDAR_ANGULAR_RESOLUTION) as f32;
const ANGLE_360: f32 = (360 * NVILIDAR_ANGULAR_RESOLUTION) as f32;

/// How the angle step of a packet was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleStep {
    /// The packet holds a single sample.
    Single,
    /// Last angle is not below the first one.
    Forward,
    /// The packet straddles the zero angle: first angle above 270°, last below 90°.
    Wrapped,
    /// Last angle is below the first one outside the wrap window. The ordering is
    /// ambiguous and the step of the previous packet is reused.
    PreviousStep,
}

/// Computes the per-sample angle step in device units.
///
/// `previous` is the step of the last packet whose step could be computed.
pub fn angle_step(first: u16, last: u16, count: u8, previous: f32) -> (AngleStep, f32) {
    if count <= 1 {
        return (AngleStep::Single, 0f32);
    }
    let intervals = (count - 1) as f32;
    let (first, last) = (first as f32, last as f32);
    if last >= first {
        (AngleStep::Forward, (last - first) / intervals)
    } else if first > ANGLE_270 && last < ANGLE_90 {
        (AngleStep::Wrapped, (ANGLE_360 + last - first) / intervals)
    } else {
        (AngleStep::PreviousStep, previous)
    }
}

/// A measurement packet that passed every framing and checksum test.
#[derive(Debug, Clone, PartialEq)]
pub struct PointPacket {
    /// Index of the zero angle sample, for packets that contain one.
    pub zero_index: Option<usize>,
    /// Motor speed in 0.01 Hz carried by this packet.
    pub speed: Option<u16>,
    /// Temperature in 0.1 °C carried by this packet.
    pub temperature: Option<i16>,
    /// First sample angle in device units.
    pub first_angle: u16,
    /// Last sample angle in device units.
    pub last_angle: u16,
    /// Angle between samples in device units.
    pub angle_step: f32,
    pub step_policy: AngleStep,
    pub points: Vec<RangePoint>,
}

impl PointPacket {
    /// Angle of the `index`-th sample in degrees, in `[0, 360)`.
    pub fn angle_of(&self, index: usize) -> f32 {
        sample_angle(self.first_angle, self.angle_step, index)
    }
}

fn sample_angle(first_angle: u16, step: f32, index: usize) -> f32 {
    let angle = (first_angle as f32 + index as f32 * step) / NVILIDAR_ANGULAR_RESOLUTION as f32;
    let angle = angle.rem_euclid(360f32);
    if angle >= 360f32 {
        0f32
    } else {
        angle
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecodeStatus {
    WaitHeaderLow,
    WaitHeaderHigh,
    WaitInfoLow,
    WaitInfoHigh,
    WaitPointCount,
    WaitZeroIndex,
    WaitFirstAngleLow,
    WaitFirstAngleHigh,
    WaitLastAngleLow,
    WaitLastAngleHigh,
    WaitChecksumLow,
    WaitChecksumHigh,
    ReceiveSamples,
}

/// Byte stream decoder for measurement packets.
///
/// Besides the packet being decoded it keeps what spans packets: whether the next
/// packet's info word carries the temperature, the previous angle step, the last
/// reported speed and temperature, and error counters.
#[derive(Debug, Clone)]
pub struct PointPacketParser {
    status: DecodeStatus,
    intensity: bool,
    checksum: WordChecksum,
    low_byte: u8,

    is_zero_packet: bool,
    speed: Option<u16>,
    temperature: Option<i16>,
    point_count: u8,
    zero_index: usize,
    first_angle: u16,
    last_angle: u16,
    angle_step: f32,
    step_policy: AngleStep,
    expected_checksum: u16,
    payload_size: usize,
    payload: Vec<u8>,

    next_is_temperature: bool,
    previous_step: f32,
    last_speed: u16,
    last_temperature: i16,

    framing_errors: u64,
    checksum_errors: u64,
}

impl PointPacketParser {
    pub fn new() -> PointPacketParser {
        trace!("Creating new PointPacketParser");
        PointPacketParser {
            status: DecodeStatus::WaitHeaderLow,
            intensity: false,
            checksum: WordChecksum::with_seed(NVILIDAR_POINT_HEADER),
            low_byte: 0,
            is_zero_packet: false,
            speed: None,
            temperature: None,
            point_count: 0,
            zero_index: 0,
            first_angle: 0,
            last_angle: 0,
            angle_step: 0f32,
            step_policy: AngleStep::Single,
            expected_checksum: 0,
            payload_size: 0,
            payload: Vec::new(),
            next_is_temperature: false,
            previous_step: 0f32,
            last_speed: 0,
            last_temperature: 0,
            framing_errors: 0,
            checksum_errors: 0,
        }
    }

    /// Selects the sample layout. Takes effect from the next packet header.
    pub fn set_intensity(&mut self, intensity: bool) {
        self.intensity = intensity;
    }

    pub fn intensity(&self) -> bool {
        self.intensity
    }

    /// Packets dropped for a bad marker, point count or angle check bit.
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Packets dropped for a checksum mismatch.
    pub fn checksum_errors(&self) -> u64 {
        self.checksum_errors
    }

    fn start_wait_header(&mut self) {
        self.status = DecodeStatus::WaitHeaderLow;
        self.checksum = WordChecksum::with_seed(NVILIDAR_POINT_HEADER);
        self.low_byte = 0;
        self.is_zero_packet = false;
        self.speed = None;
        self.temperature = None;
        self.point_count = 0;
        self.zero_index = 0;
        self.first_angle = 0;
        self.last_angle = 0;
        self.angle_step = 0f32;
        self.step_policy = AngleStep::Single;
        self.expected_checksum = 0;
        self.payload_size = 0;
        self.payload.clear();
    }

    fn framing_error(&mut self, what: &str, byte: u8) {
        self.framing_errors += 1;
        trace!("Measurement packet framing error: {} ({:02X})", what, byte);
        self.start_wait_header();
    }

    #[inline]
    fn word(&self, high: u8) -> u16 {
        LittleEndian::read_u16(&[self.low_byte, high])
    }

    /// Interprets the speed/temperature word.
    ///
    /// The packet right after a zero packet carries the temperature. Any other packet
    /// with both zero flags set contains the zero angle and carries the motor speed.
    fn decode_info_word(&mut self, word: u16) {
        if self.next_is_temperature {
            self.temperature = Some(word as i16);
            self.next_is_temperature = false;
        } else if word & NVILIDAR_ZERO_FLAG_LOW != 0 && word & NVILIDAR_ZERO_FLAG_HIGH != 0 {
            self.is_zero_packet = true;
            self.speed = Some((word & 0x7FFF) >> 1);
            self.next_is_temperature = true;
        }
    }

    fn receive_samples(&mut self, buf: &[u8]) -> usize {
        let bytes_to_read = self.payload_size - self.payload.len();
        let bytes_actual_read = min(bytes_to_read, buf.len());
        self.payload.extend_from_slice(&buf[..bytes_actual_read]);
        bytes_actual_read
    }

    fn finish_packet(&mut self) -> Option<PointPacket> {
        self.checksum.push_words(&self.payload);
        if self.checksum.checksum() != self.expected_checksum {
            self.checksum_errors += 1;
            warn!(
                "Measurement packet checksum mismatch: received {:04X}, calculated {:04X}",
                self.expected_checksum,
                self.checksum.checksum()
            );
            self.start_wait_header();
            return None;
        }

        if let Some(speed) = self.speed {
            self.last_speed = speed;
        }
        if let Some(temperature) = self.temperature {
            self.last_temperature = temperature;
        }

        let zero_index = if self.is_zero_packet {
            if self.zero_index < self.point_count as usize {
                Some(self.zero_index)
            } else {
                warn!(
                    "Zero index {} outside a packet of {} samples, ignoring marker",
                    self.zero_index, self.point_count
                );
                None
            }
        } else {
            None
        };

        let sample_size = self.payload_size / self.point_count as usize;
        let speed = self.last_speed as f32 / 100f32;
        let temperature = self.last_temperature as f32 / 10f32;
        let points = self
            .payload
            .chunks_exact(sample_size)
            .enumerate()
            .map(|(index, sample)| RangePoint {
                distance: LittleEndian::read_u16(&sample[0..2]),
                quality: if sample_size == NVILIDAR_SAMPLE_SIZE_WITH_QUALITY {
                    Some(LittleEndian::read_u16(&sample[2..4]))
                } else {
                    None
                },
                speed,
                temperature,
                index,
                angle: sample_angle(self.first_angle, self.angle_step, index),
                is_zero: zero_index == Some(index),
            })
            .collect();

        let packet = PointPacket {
            zero_index,
            speed: self.speed,
            temperature: self.temperature,
            first_angle: self.first_angle,
            last_angle: self.last_angle,
            angle_step: self.angle_step,
            step_policy: self.step_policy,
            points,
        };
        trace!(
            "Decoded measurement packet: {} bytes, {} samples, first angle {}, zero index {:?}",
            NVILIDAR_POINT_PACKAGE_HEAD_SIZE + self.payload_size,
            packet.points.len(),
            packet.first_angle,
            packet.zero_index
        );
        self.start_wait_header();
        Some(packet)
    }

    fn decode_header_byte(&mut self, byte: u8) {
        match self.status {
            DecodeStatus::WaitHeaderLow => {
                if byte == NVILIDAR_POINT_HEADER as u8 {
                    self.status = DecodeStatus::WaitHeaderHigh;
                }
            }
            DecodeStatus::WaitHeaderHigh => {
                if byte == (NVILIDAR_POINT_HEADER >> 8) as u8 {
                    self.status = DecodeStatus::WaitInfoLow;
                } else {
                    self.framing_error("bad marker", byte);
                    if byte == NVILIDAR_POINT_HEADER as u8 {
                        self.status = DecodeStatus::WaitHeaderHigh;
                    }
                }
            }
            DecodeStatus::WaitInfoLow => {
                self.low_byte = byte;
                self.status = DecodeStatus::WaitInfoHigh;
            }
            DecodeStatus::WaitInfoHigh => {
                let word = self.word(byte);
                self.checksum.push_word(word);
                self.decode_info_word(word);
                self.status = DecodeStatus::WaitPointCount;
            }
            DecodeStatus::WaitPointCount => {
                if byte == 0 {
                    self.framing_error("empty packet", byte);
                } else {
                    self.point_count = byte;
                    self.status = DecodeStatus::WaitZeroIndex;
                }
            }
            DecodeStatus::WaitZeroIndex => {
                self.checksum
                    .push_word(LittleEndian::read_u16(&[self.point_count, byte]));
                self.zero_index = byte.saturating_sub(1) as usize;
                self.status = DecodeStatus::WaitFirstAngleLow;
            }
            DecodeStatus::WaitFirstAngleLow | DecodeStatus::WaitLastAngleLow => {
                if byte & NVILIDAR_RESP_MEASUREMENT_CHECKBIT == 0 {
                    self.framing_error("angle check bit", byte);
                } else {
                    self.low_byte = byte;
                    self.status = if self.status == DecodeStatus::WaitFirstAngleLow {
                        DecodeStatus::WaitFirstAngleHigh
                    } else {
                        DecodeStatus::WaitLastAngleHigh
                    };
                }
            }
            DecodeStatus::WaitFirstAngleHigh => {
                let word = self.word(byte);
                self.checksum.push_word(word);
                self.first_angle = word >> 1;
                self.status = DecodeStatus::WaitLastAngleLow;
            }
            DecodeStatus::WaitLastAngleHigh => {
                let word = self.word(byte);
                self.checksum.push_word(word);
                self.last_angle = word >> 1;

                let (policy, step) = angle_step(
                    self.first_angle,
                    self.last_angle,
                    self.point_count,
                    self.previous_step,
                );
                if policy == AngleStep::PreviousStep {
                    trace!(
                        "Angle ordering {} -> {} is ambiguous, reusing step {}",
                        self.first_angle,
                        self.last_angle,
                        step
                    );
                }
                if policy != AngleStep::Single {
                    self.previous_step = step;
                }
                self.step_policy = policy;
                self.angle_step = step;
                self.status = DecodeStatus::WaitChecksumLow;
            }
            DecodeStatus::WaitChecksumLow => {
                self.low_byte = byte;
                self.status = DecodeStatus::WaitChecksumHigh;
            }
            DecodeStatus::WaitChecksumHigh => {
                self.expected_checksum = self.word(byte);
                let sample_size = if self.intensity {
                    NVILIDAR_SAMPLE_SIZE_WITH_QUALITY
                } else {
                    NVILIDAR_SAMPLE_SIZE
                };
                self.payload_size = self.point_count as usize * sample_size;
                self.payload.reserve(self.payload_size);
                self.status = DecodeStatus::ReceiveSamples;
            }
            DecodeStatus::ReceiveSamples => {}
        }
    }
}

impl Default for PointPacketParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder for PointPacketParser {
    type Output = PointPacket;

    /// Decodes measurement packets.
    ///
    /// Malformed packets are counted and dropped. Decoding resumes at the next byte.
    fn decode(&mut self, buf: &[u8]) -> (usize, Option<PointPacket>) {
        let mut i = 0;
        while i < buf.len() {
            if self.status == DecodeStatus::ReceiveSamples {
                i += self.receive_samples(&buf[i..]);
                if self.payload.len() == self.payload_size {
                    if let Some(packet) = self.finish_packet() {
                        return (i, Some(packet));
                    }
                }
            } else {
                self.decode_header_byte(buf[i]);
                i += 1;
            }
        }
        (i, None)
    }

    /// Drops the packet in progress and everything carried between packets,
    /// except the error counters.
    fn reset_decoder(&mut self) {
        trace!("Resetting measurement decoder state");
        self.start_wait_header();
        self.next_is_temperature = false;
        self.previous_step = 0f32;
        self.last_speed = 0;
        self.last_temperature = 0;
    }
}

/// Builder of well-formed measurement packets for tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub struct TestPacket {
        pub info: u16,
        /// Raw zero index byte, 1-based.
        pub zero_index: u8,
        pub first_angle: u16,
        pub last_angle: u16,
        pub samples: Vec<(u16, Option<u16>)>,
    }

    impl TestPacket {
        /// A packet without zero angle, angles in degrees.
        pub fn plain(first: f32, last: f32, count: usize) -> TestPacket {
            TestPacket {
                info: 0,
                zero_index: 0,
                first_angle: to_units(first),
                last_angle: to_units(last),
                samples: (0..count).map(|i| (1000 + i as u16, None)).collect(),
            }
        }

        /// A packet whose sample at `zero_index` (0-based) is the zero angle.
        pub fn zero(speed: u16, zero_index: usize, first: f32, last: f32, count: usize) -> TestPacket {
            TestPacket {
                info: (speed << 1) | NVILIDAR_ZERO_FLAG_HIGH | NVILIDAR_ZERO_FLAG_LOW,
                zero_index: zero_index as u8 + 1,
                ..TestPacket::plain(first, last, count)
            }
        }

        pub fn with_quality(mut self) -> TestPacket {
            for (i, sample) in self.samples.iter_mut().enumerate() {
                sample.1 = Some(200 + i as u16);
            }
            self
        }

        pub fn encode(&self) -> Vec<u8> {
            let first = (self.first_angle << 1) | 1;
            let last = (self.last_angle << 1) | 1;
            let mut bytes = vec![0xAA, 0x55];
            bytes.extend_from_slice(&self.info.to_le_bytes());
            bytes.push(self.samples.len() as u8);
            bytes.push(self.zero_index);
            bytes.extend_from_slice(&first.to_le_bytes());
            bytes.extend_from_slice(&last.to_le_bytes());
            bytes.extend_from_slice(&[0, 0]);
            for (distance, quality) in &self.samples {
                bytes.extend_from_slice(&distance.to_le_bytes());
                if let Some(quality) = quality {
                    bytes.extend_from_slice(&quality.to_le_bytes());
                }
            }

            let mut checksum = WordChecksum::with_seed(0);
            checksum.push_words(&bytes[..10]);
            checksum.push_words(&bytes[12..]);
            bytes[10..12].copy_from_slice(&checksum.checksum().to_le_bytes());
            bytes
        }
    }

    pub fn to_units(degrees: f32) -> u16 {
        (degrees * NVILIDAR_ANGULAR_RESOLUTION as f32) as u16
    }
}
