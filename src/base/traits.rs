use crate::base::error::Result;
use crate::base::message::Message;
use std::io;

/// Defines the behavior for decoding byte streams into frames.
///
/// Decoders are fed whatever the transport delivered and keep partial frames
/// between calls, so a frame may be split across any number of chunks.
pub trait ProtocolDecoder {
    /// The frame type produced by this decoder.
    type Output;

    /// Attempts to decode one frame from the provided buffer.
    ///
    /// Returns a tuple:
    /// * The number of bytes consumed from the buffer.
    /// * `Some` if a complete frame was decoded, or `None` otherwise.
    ///
    /// Malformed input is never reported as an error: the decoder drops the
    /// broken frame and resynchronizes on the next marker byte.
    ///
    /// # Arguments
    ///
    /// * `buf` - The byte slice containing the data to decode.
    fn decode(&mut self, buf: &[u8]) -> (usize, Option<Self::Output>);

    /// Resets the internal state of the decoder.
    fn reset_decoder(&mut self);
}

/// Defines the behavior for encoding `Message` objects into byte streams.
pub trait ProtocolEncoder {
    /// Encodes a `Message` into the provided byte buffer.
    ///
    /// Returns the number of bytes written to the buffer upon successful encoding.
    ///
    /// # Arguments
    ///
    /// * `msg` - The `Message` to encode.
    /// * `bytes` - The mutable byte slice to write the encoded message into.
    fn encode(&mut self, msg: &Message, bytes: &mut [u8]) -> Result<usize>;

    /// Returns the exact number of bytes `encode` will produce for `msg`.
    fn estimate_encoded_size(&mut self, msg: &Message) -> Result<usize>;

    /// Encodes a `Message` and writes it directly to a `Write` target.
    ///
    /// Returns the number of bytes written to the destination.
    fn write_to(&mut self, msg: &Message, dest: &mut impl io::Write) -> Result<usize>;
}

/// Drains `buf` through `decoder`, handing every completed frame to `on_frame`.
///
/// Keeps calling the decoder while it consumes bytes or yields frames, so frames
/// a decoder still holds internally are handed out too. Returns the number of
/// frames decoded.
pub fn decode_all<D: ProtocolDecoder>(
    decoder: &mut D,
    mut buf: &[u8],
    mut on_frame: impl FnMut(D::Output),
) -> usize {
    let mut frames = 0;
    loop {
        let (consumed, frame) = decoder.decode(buf);
        let progressed = consumed > 0 || frame.is_some();
        if let Some(frame) = frame {
            frames += 1;
            on_frame(frame);
        }
        if !progressed {
            break;
        }
        buf = &buf[consumed..];
    }
    frames
}
