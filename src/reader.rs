//! Background reception: the reader thread and the state it shares with the device.

use crate::answers::ControlResponse;
use crate::base::{decode_all, ProtocolDecoder, Signal};
use crate::internals::*;
use crate::parsers::PointPacketParser;
use crate::protocol::NvilidarHostProtocol;
use crate::revolution::RevolutionAggregator;
use crate::transport::Transport;
use crate::types::{Clock, Revolution};
use log::{debug, error, info, trace, warn};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Transport shared by the reader thread and the command sender.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Locks the shared transport. A panic on the other side does not leave the
/// port in an inconsistent state, so poisoning is ignored.
pub fn lock_transport(transport: &SharedTransport) -> MutexGuard<'_, Box<dyn Transport>> {
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the device and its reader thread.
#[derive(Debug, Default)]
pub struct DriverState {
    scanning: AtomicBool,
    scan_epoch: AtomicU64,
    intensity: AtomicBool,
    /// Completed control responses.
    pub response: Signal<ControlResponse>,
    /// Completed revolutions.
    pub revolution: Signal<Revolution>,
}

impl DriverState {
    pub fn new() -> DriverState {
        DriverState::default()
    }

    /// Switches the reader to measurement packets and restarts revolution counting.
    pub fn begin_scan(&self) {
        self.scan_epoch.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(true, Ordering::SeqCst);
    }

    /// Switches the reader back to control responses.
    pub fn end_scan(&self) {
        self.scanning.store(false, Ordering::SeqCst);
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Sets the sample layout expected in measurement packets.
    pub fn set_intensity(&self, intensity: bool) {
        self.intensity.store(intensity, Ordering::SeqCst);
    }

    pub fn intensity(&self) -> bool {
        self.intensity.load(Ordering::SeqCst)
    }

    fn scan_epoch(&self) -> u64 {
        self.scan_epoch.load(Ordering::SeqCst)
    }

    fn receive_mode(&self) -> (bool, u64) {
        (self.is_scanning(), self.scan_epoch())
    }
}

/// Routes received bytes to the control or the measurement decoder, depending on
/// whether a scan is running, and signals what they complete.
pub struct LidarReader {
    state: Arc<DriverState>,
    clock: Arc<dyn Clock>,
    protocol: NvilidarHostProtocol,
    packet_parser: PointPacketParser,
    aggregator: RevolutionAggregator,
    was_scanning: bool,
    scan_epoch: u64,
    reported_errors: (u64, u64),
}

impl LidarReader {
    pub fn new(state: Arc<DriverState>, clock: Arc<dyn Clock>) -> LidarReader {
        let scan_epoch = state.scan_epoch();
        LidarReader {
            state,
            clock,
            protocol: NvilidarHostProtocol::new(),
            packet_parser: PointPacketParser::new(),
            aggregator: RevolutionAggregator::new(),
            was_scanning: false,
            scan_epoch,
            reported_errors: (0, 0),
        }
    }

    /// Decodes control responses. Returns how many were signaled.
    ///
    /// Frames with an unknown command id or a payload of the wrong size are dropped.
    pub fn feed_control_bytes(&mut self, buf: &[u8]) -> usize {
        let state = &self.state;
        let mut signaled = 0;
        decode_all(&mut self.protocol, buf, |msg| {
            match ControlResponse::from_message(&msg) {
                Ok(response) => {
                    trace!("Control response: {:?}", response);
                    state.response.notify(response);
                    signaled += 1;
                }
                Err(err) => warn!("Dropping control response: {}", err),
            }
        });
        signaled
    }

    /// Decodes measurement packets. Returns how many revolutions were signaled.
    pub fn feed_measurement_bytes(&mut self, buf: &[u8]) -> usize {
        let state = &self.state;
        let clock = self.clock.as_ref();
        let aggregator = &mut self.aggregator;
        let mut signaled = 0;
        decode_all(&mut self.packet_parser, buf, |packet| {
            if let Some(revolution) = aggregator.push(packet, clock) {
                trace!(
                    "Revolution ready: {} points, stop stamp {}",
                    revolution.points.len(),
                    revolution.stop_stamp
                );
                state.revolution.notify(revolution);
                signaled += 1;
            }
        });
        self.report_packet_errors();
        signaled
    }

    /// Starts measurement decoding from scratch.
    pub fn reset_scan(&mut self) {
        debug!("Resetting measurement decoding for a new scan");
        self.packet_parser.reset_decoder();
        self.aggregator.reset();
    }

    /// Feeds `buf` to the decoder matching the current mode. Returns `true` while scanning.
    pub fn feed(&mut self, buf: &[u8]) -> bool {
        let mode = self.state.receive_mode();
        self.feed_in_mode(buf, mode)
    }

    fn feed_in_mode(&mut self, buf: &[u8], (scanning, epoch): (bool, u64)) -> bool {
        if epoch != self.scan_epoch {
            self.scan_epoch = epoch;
            self.reset_scan();
        }
        if scanning != self.was_scanning {
            if !scanning {
                self.protocol.reset_decoder();
            }
            self.was_scanning = scanning;
        }

        if scanning {
            self.packet_parser.set_intensity(self.state.intensity());
            self.feed_measurement_bytes(buf);
        } else {
            self.feed_control_bytes(buf);
        }
        scanning
    }

    fn report_packet_errors(&mut self) {
        let errors = (
            self.packet_parser.framing_errors(),
            self.packet_parser.checksum_errors(),
        );
        if errors != self.reported_errors {
            debug!(
                "Measurement packets dropped: {} framing errors, {} checksum errors",
                errors.0, errors.1
            );
            self.reported_errors = errors;
        }
    }

    /// Reads from `transport` until it is closed.
    ///
    /// A read error other than a timeout closes the transport.
    pub fn run(mut self, transport: SharedTransport) {
        info!("Reader thread started");
        let mut buf = vec![0u8; NVILIDAR_READ_BUFFER_SIZE];
        loop {
            // Sampled under the lock: a stop clears the scan flag and flushes the
            // input under the same lock, so scan mode chunks never hold control responses.
            let (read, mode) = {
                let mut transport = lock_transport(&transport);
                if !transport.is_open() {
                    break;
                }
                let mode = self.state.receive_mode();
                (transport.read_available(&mut buf), mode)
            };

            let received = match read {
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    0
                }
                Err(e) => {
                    error!("Serial read failed, closing transport: {}", e);
                    lock_transport(&transport).close();
                    break;
                }
            };

            if !self.feed_in_mode(&buf[..received], mode) {
                thread::sleep(NVILIDAR_CONTROL_POLL_INTERVAL);
            } else if received == 0 {
                thread::sleep(NVILIDAR_SCAN_IDLE_INTERVAL);
            }
        }
        info!("Reader thread stopped");
    }

    /// Runs the reader on its own thread.
    pub fn spawn(self, transport: SharedTransport) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("nvilidar-reader".to_owned())
            .spawn(move || self.run(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answers::NvilidarResponseDeviceInfo;
    use crate::base::Message;
    use crate::cmds::*;
    use crate::parsers::point_packet::testing::TestPacket;
    use crate::revolution::tests::{revolution_bytes, StepClock};
    use crate::transport::mock::MockTransport;
    use crate::types::SystemClock;
    use std::time::Duration;

    fn reader() -> (Arc<DriverState>, LidarReader) {
        let state = Arc::new(DriverState::new());
        let reader = LidarReader::new(state.clone(), Arc::new(StepClock::new(1_000, 1_000)));
        (state, reader)
    }

    pub fn device_info_frame() -> Vec<u8> {
        let mut data = b"VP350".to_vec();
        data.extend_from_slice(&[1, 7, 2, 0]);
        data.extend_from_slice(&[1; 16]);
        NvilidarHostProtocol::new()
            .encode_to_vec(&Message::with_data(NVILIDAR_CMD_GET_DEVICE_INFO, &data))
            .unwrap()
    }

    #[test]
    fn control_response_is_signaled() {
        let (state, mut reader) = reader();
        assert_eq!(reader.feed_control_bytes(&device_info_frame()), 1);

        match state.response.wait_timeout(Duration::from_millis(10)) {
            Some(ControlResponse::DeviceInfo(NvilidarResponseDeviceInfo { model_num, .. })) => {
                assert_eq!(&model_num, b"VP350")
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn malformed_responses_are_not_signaled() {
        let (state, mut reader) = reader();
        let mut protocol = NvilidarHostProtocol::new();
        let mut stream = protocol
            .encode_to_vec(&Message::with_data(NVILIDAR_CMD_SET_AIMSPEED, &[0xE8]))
            .unwrap();
        stream.extend(protocol.encode_to_vec(&Message::with_data(0x42, &[1])).unwrap());

        assert_eq!(reader.feed_control_bytes(&stream), 0);
        assert!(state.response.reset().is_none());
    }

    #[test]
    fn device_info_then_measurements() {
        let (state, mut reader) = reader();

        let mut stream = device_info_frame();
        let packet = TestPacket::plain(10.0, 19.0, 10).encode();
        stream.extend(&packet);
        assert!(!reader.feed(&stream));
        assert!(state.response.wait_timeout(Duration::from_millis(10)).is_some());
        assert!(state.response.reset().is_none());

        state.begin_scan();
        assert!(reader.feed(&packet));
        for _ in 0..4 {
            reader.feed(&revolution_bytes(8, 3));
        }

        let revolution = state.revolution.wait_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(revolution.points.len(), 80);
        assert!(state.revolution.reset().is_none());
    }

    #[test]
    fn new_scan_restarts_revolution_counting() {
        let (state, mut reader) = reader();
        state.begin_scan();
        for _ in 0..3 {
            reader.feed(&revolution_bytes(8, 3));
        }

        state.end_scan();
        state.begin_scan();
        reader.feed(&revolution_bytes(8, 3));
        assert!(state.revolution.reset().is_none());
    }

    #[test]
    fn quality_layout_follows_state() {
        let (state, mut reader) = reader();
        state.set_intensity(true);
        state.begin_scan();
        for _ in 0..4 {
            for p in 0..4 {
                let first = p as f32 * 90.0;
                let packet = if p == 0 {
                    TestPacket::zero(1000, 0, first, first + 81.0, 10)
                } else {
                    TestPacket::plain(first, first + 81.0, 10)
                };
                reader.feed(&packet.with_quality().encode());
            }
        }
        let revolution = state.revolution.reset().unwrap();
        assert_eq!(revolution.points.len(), 40);
        assert!(revolution.points.iter().all(|p| p.quality.is_some()));
    }

    #[test]
    fn reader_thread_stops_when_transport_closes() {
        let mock = MockTransport::new();
        let mut handle: Box<dyn Transport> = Box::new(mock.clone());
        handle.open().unwrap();
        let transport: SharedTransport = Arc::new(Mutex::new(handle));

        let state = Arc::new(DriverState::new());
        let thread = LidarReader::new(state.clone(), Arc::new(SystemClock))
            .spawn(transport.clone())
            .unwrap();

        mock.push_incoming(&device_info_frame());
        assert!(state.response.wait_timeout(Duration::from_secs(2)).is_some());

        lock_transport(&transport).close();
        thread.join().unwrap();
    }
}
