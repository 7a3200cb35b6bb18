use crate::answers::response_payload_size;
use crate::base::{Error, Message, ProtocolDecoder, ProtocolEncoder, Result};
use crate::checksum::Checksum;
use crate::cmds::*;
use byteorder::{ByteOrder, LittleEndian};
use log::{error, trace, warn};
use std::cmp::min;
use std::collections::VecDeque;
use std::io::Write;

/// Longest payload accepted for a response whose command id has no known size.
const NVILIDAR_MAX_RESPONSE_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecodeStatus {
    WaitStartByte,
    WaitCmd,
    WaitLenLow,
    WaitLenHigh,
    ReceivePayload,
    WaitChecksum,
    WaitEndByte,
}

/// The NVILIDAR host protocol for the control channel.
///
/// Encodes commands into short or long frames and decodes long-frame control
/// responses. Measurement packets are handled by
/// [`PointPacketParser`](crate::parsers::point_packet::PointPacketParser).
#[derive(Debug, Clone, PartialEq)]
pub struct NvilidarHostProtocol {
    status: DecodeStatus,
    response_size: usize,
    checksum: Checksum,
    decoding_msg: Message,
    /// Bytes of the frame being decoded, start byte included.
    frame_bytes: Vec<u8>,
    /// Bytes of a rejected frame still to be scanned for a start byte.
    replay: VecDeque<u8>,
}

impl NvilidarHostProtocol {
    /// Creates a new `NvilidarHostProtocol` instance in its initial state.
    pub fn new() -> NvilidarHostProtocol {
        trace!("Creating new NvilidarHostProtocol");
        NvilidarHostProtocol {
            status: DecodeStatus::WaitStartByte,
            response_size: 0,
            checksum: Checksum::new(),
            decoding_msg: Message::new(0),
            frame_bytes: Vec::new(),
            replay: VecDeque::new(),
        }
    }

    fn start_wait_start_byte(&mut self) {
        self.status = DecodeStatus::WaitStartByte;
        self.response_size = 0;
        self.checksum = Checksum::new();
        self.decoding_msg.cmd = 0;
        self.decoding_msg.data.clear();
        self.frame_bytes.clear();
    }

    /// Drops the frame in progress. Everything after its start byte is scanned
    /// again, since a later frame may begin inside it.
    fn reject_frame(&mut self) {
        let pending: Vec<u8> = self.replay.drain(..).collect();
        self.replay.extend(self.frame_bytes.iter().skip(1));
        self.replay.extend(pending);
        self.start_wait_start_byte();
    }

    fn start_receive_payload(&mut self) {
        trace!(
            "Decoder state -> ReceivePayload (size: {})",
            self.response_size
        );
        self.decoding_msg.data.clear();
        self.decoding_msg.data.reserve(self.response_size);
        self.status = if self.response_size == 0 {
            DecodeStatus::WaitChecksum
        } else {
            DecodeStatus::ReceivePayload
        };
    }

    fn decode_payload(&mut self, buf: &[u8]) -> usize {
        let bytes_to_read = self.response_size - self.decoding_msg.data.len();
        let bytes_actual_read = min(bytes_to_read, buf.len());
        let chunk = &buf[..bytes_actual_read];

        self.checksum.push_slice(chunk);
        self.decoding_msg.data.extend_from_slice(chunk);
        self.frame_bytes.extend_from_slice(chunk);

        if self.decoding_msg.data.len() == self.response_size {
            self.status = DecodeStatus::WaitChecksum;
        }
        bytes_actual_read
    }

    /// Checks the announced payload length against the command's known response size.
    fn length_is_plausible(&self) -> bool {
        match response_payload_size(self.decoding_msg.cmd) {
            Some(expected) => self.response_size == expected,
            None => self.response_size <= NVILIDAR_MAX_RESPONSE_SIZE,
        }
    }

    fn decode_byte(&mut self, byte: u8) -> Option<Message> {
        if !matches!(
            self.status,
            DecodeStatus::WaitStartByte | DecodeStatus::ReceivePayload
        ) {
            self.frame_bytes.push(byte);
        }
        match self.status {
            DecodeStatus::WaitStartByte => {
                if byte == NVILIDAR_START_BYTE_LONG_CMD {
                    self.start_wait_start_byte();
                    self.frame_bytes.push(byte);
                    self.status = DecodeStatus::WaitCmd;
                }
            }
            DecodeStatus::WaitCmd => {
                self.decoding_msg.cmd = byte;
                self.status = DecodeStatus::WaitLenLow;
            }
            DecodeStatus::WaitLenLow => {
                self.response_size = byte as usize;
                self.status = DecodeStatus::WaitLenHigh;
            }
            DecodeStatus::WaitLenHigh => {
                self.response_size =
                    LittleEndian::read_u16(&[self.response_size as u8, byte]) as usize;
                if self.length_is_plausible() {
                    self.start_receive_payload();
                } else {
                    warn!(
                        "Response {:02X} announces {} bytes, resynchronizing",
                        self.decoding_msg.cmd, self.response_size
                    );
                    self.reject_frame();
                }
            }
            DecodeStatus::ReceivePayload => {
                self.decode_payload(&[byte]);
            }
            DecodeStatus::WaitChecksum => {
                if byte != self.checksum.checksum() {
                    warn!(
                        "Response {:02X} checksum mismatch: received {:02X}, calculated {:02X}",
                        self.decoding_msg.cmd,
                        byte,
                        self.checksum.checksum()
                    );
                    self.reject_frame();
                } else {
                    self.status = DecodeStatus::WaitEndByte;
                }
            }
            DecodeStatus::WaitEndByte => {
                if byte != NVILIDAR_END_CMD {
                    warn!(
                        "Response {:02X} terminator mismatch: got {:02X}",
                        self.decoding_msg.cmd, byte
                    );
                    self.reject_frame();
                } else {
                    let msg = self.decoding_msg.clone();
                    trace!(
                        "Decoded response: cmd={:02X}, data_len={}",
                        msg.cmd,
                        msg.data.len()
                    );
                    self.start_wait_start_byte();
                    return Some(msg);
                }
            }
        }
        None
    }

    fn drain_replay(&mut self) -> Option<Message> {
        while let Some(byte) = self.replay.pop_front() {
            if let Some(msg) = self.decode_byte(byte) {
                return Some(msg);
            }
        }
        None
    }

    /// Encodes `msg` into a freshly allocated frame.
    pub fn encode_to_vec(&mut self, msg: &Message) -> Result<Vec<u8>> {
        let size = self.estimate_encoded_size(msg)?;
        let mut buf = vec![0; size];
        let encoded_size = self.encode(msg, &mut buf)?;
        buf.truncate(encoded_size);
        Ok(buf)
    }
}

impl Default for NvilidarHostProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder for NvilidarHostProtocol {
    type Output = Message;

    /// Decodes control responses byte by byte.
    ///
    /// A frame with an implausible length, a bad checksum or a bad terminator is
    /// dropped and the bytes after its start byte are scanned again. Frames found
    /// that way may be returned with nothing consumed from `buf`.
    fn decode(&mut self, buf: &[u8]) -> (usize, Option<Message>) {
        if let Some(msg) = self.drain_replay() {
            return (0, Some(msg));
        }
        let mut i = 0;
        while i < buf.len() {
            if self.status == DecodeStatus::ReceivePayload {
                i += self.decode_payload(&buf[i..]);
                continue;
            }
            let msg = self.decode_byte(buf[i]);
            i += 1;
            if let Some(msg) = msg.or_else(|| self.drain_replay()) {
                return (i, Some(msg));
            }
        }
        (i, None)
    }

    fn reset_decoder(&mut self) {
        trace!("Resetting control decoder state");
        self.replay.clear();
        self.start_wait_start_byte();
    }
}

impl ProtocolEncoder for NvilidarHostProtocol {
    /// Encodes a command `Message` into the provided byte buffer.
    ///
    /// Commands without payload become the two-byte short frame. Commands with
    /// payload become a long frame with length, XOR checksum and terminator.
    fn encode(&mut self, msg: &Message, bytes: &mut [u8]) -> Result<usize> {
        let estimated_encoded_size = self.estimate_encoded_size(msg)?;
        if estimated_encoded_size > bytes.len() {
            error!(
                "Buffer too small: required {}, available {}",
                estimated_encoded_size,
                bytes.len()
            );
            return Err(Error::OperationFail {
                description: "buffer too small for command frame".to_owned(),
            });
        }

        if !msg.has_payload() {
            bytes[0] = NVILIDAR_START_BYTE_SHORT_CMD;
            bytes[1] = msg.cmd;
            return Ok(2);
        }

        let payload_len = msg.data.len();
        bytes[0] = NVILIDAR_START_BYTE_LONG_CMD;
        bytes[1] = msg.cmd;
        LittleEndian::write_u16(&mut bytes[2..4], payload_len as u16);

        let payload_start = NVILIDAR_LONG_CMD_HEADER_SIZE;
        let payload_end = payload_start + payload_len;
        bytes[payload_start..payload_end].copy_from_slice(&msg.data);

        let mut checksum = Checksum::new();
        checksum.push_slice(&msg.data);
        bytes[payload_end] = checksum.checksum();
        bytes[payload_end + 1] = NVILIDAR_END_CMD;
        trace!(
            "Encoded long command {:02X}: {} payload bytes, checksum {:02X}",
            msg.cmd,
            payload_len,
            checksum.checksum()
        );
        Ok(payload_end + 2)
    }

    fn estimate_encoded_size(&mut self, msg: &Message) -> Result<usize> {
        if msg.data.len() > NVILIDAR_MAX_CMD_PAYLOAD {
            return Err(Error::OperationFail {
                description: "payload too big".to_owned(),
            });
        }

        if msg.has_payload() {
            Ok(NVILIDAR_LONG_CMD_HEADER_SIZE + msg.data.len() + 2) // Header + Data + Checksum + End
        } else {
            Ok(2) // Start + Cmd
        }
    }

    /// Encodes a command and writes all of it to `dest`, retrying partial writes.
    fn write_to(&mut self, msg: &Message, dest: &mut impl Write) -> Result<usize> {
        let frame = self.encode_to_vec(msg)?;
        trace!("Writing {} bytes: {:02X?}", frame.len(), frame);
        match dest.write_all(&frame) {
            Ok(()) => Ok(frame.len()),
            Err(err) => {
                error!("IO error during write_all: {}", err);
                Err(err.into())
            }
        }
    }
}
