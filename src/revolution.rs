use crate::internals::*;
use crate::parsers::PointPacket;
use crate::types::{Clock, RangePoint, Revolution};
use log::{debug, trace, warn};

/// Assembles decoded measurement packets into revolutions.
///
/// Samples accumulate until a packet containing the zero angle arrives. Everything
/// before the zero sample becomes a revolution and the rest seeds the next one.
#[derive(Debug, Default)]
pub struct RevolutionAggregator {
    points: Vec<RangePoint>,
    completed: u32,
    last_stop_stamp: u64,
}

impl RevolutionAggregator {
    pub fn new() -> RevolutionAggregator {
        RevolutionAggregator::default()
    }

    /// Revolutions completed since the last reset, delivered or not.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Forgets collected samples, the revolution count and the last timestamp.
    pub fn reset(&mut self) {
        trace!("Resetting revolution aggregator");
        self.points.clear();
        self.completed = 0;
        self.last_stop_stamp = 0;
    }

    /// Adds a packet. Returns a revolution once one is complete and the motor
    /// startup revolutions are over.
    pub fn push(&mut self, packet: PointPacket, clock: &dyn Clock) -> Option<Revolution> {
        let boundary = packet.zero_index.map(|index| self.points.len() + index);
        self.points.extend(packet.points);

        let boundary = match boundary {
            Some(boundary) => boundary,
            None => {
                if self.points.len() > NVILIDAR_MAX_PENDING_POINTS {
                    warn!(
                        "No zero angle within {} samples, dropping them",
                        self.points.len()
                    );
                    self.points.clear();
                }
                return None;
            }
        };
        let stamp = clock.now_ns();
        self.completed = self.completed.saturating_add(1);

        let total = self.points.len() as u64;
        let carried_over = total - boundary as u64;
        let points: Vec<RangePoint> = self.points.drain(..boundary).collect();

        let start_stamp = self.last_stop_stamp;
        let warming_up = self.completed <= NVILIDAR_TIMESTAMP_WARMUP_REVOLUTIONS;
        let stop_stamp = if warming_up || start_stamp == 0 {
            stamp
        } else {
            // The zero sample can sit anywhere in its packet. Take off the share of
            // the elapsed time spent on samples after it.
            let elapsed = stamp.saturating_sub(start_stamp);
            stamp.saturating_sub(elapsed.saturating_mul(carried_over) / total)
        };
        self.last_stop_stamp = stop_stamp;

        trace!(
            "Revolution {} complete: {} samples, {} carried over",
            self.completed,
            points.len(),
            carried_over
        );

        if self.completed <= NVILIDAR_STARTUP_REVOLUTIONS {
            debug!("Discarding startup revolution {}", self.completed);
            return None;
        }
        if points.is_empty() {
            return None;
        }

        Some(Revolution {
            points,
            start_stamp,
            stop_stamp,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::base::decode_all;
    use crate::parsers::point_packet::testing::TestPacket;
    use crate::parsers::PointPacketParser;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock that advances by a fixed step on every reading.
    pub struct StepClock {
        now: AtomicU64,
        step: u64,
    }

    impl StepClock {
        pub fn new(start: u64, step: u64) -> StepClock {
            StepClock {
                now: AtomicU64::new(start),
                step,
            }
        }
    }

    impl Clock for StepClock {
        fn now_ns(&self) -> u64 {
            self.now.fetch_add(self.step, Ordering::SeqCst)
        }
    }

    /// One turn made of `packets` packets of 10 samples, the zero sample being
    /// sample `zero_index` of the first packet.
    pub fn revolution_bytes(packets: usize, zero_index: usize) -> Vec<u8> {
        let span = 360.0 / packets as f32;
        let mut bytes = Vec::new();
        for p in 0..packets {
            let first = p as f32 * span;
            let last = first + span * 9.0 / 10.0;
            let packet = if p == 0 {
                TestPacket::zero(1000, zero_index, first, last, 10)
            } else {
                TestPacket::plain(first, last, 10)
            };
            bytes.extend(packet.encode());
        }
        bytes
    }

    fn packets(bytes: &[u8]) -> Vec<PointPacket> {
        let mut parser = PointPacketParser::new();
        let mut packets = Vec::new();
        decode_all(&mut parser, bytes, |packet| packets.push(packet));
        packets
    }

    fn plain_packet() -> PointPacket {
        packets(&TestPacket::plain(100.0, 109.0, 10).encode()).remove(0)
    }

    fn zero_packet(zero_index: usize) -> PointPacket {
        packets(&TestPacket::zero(1000, zero_index, 0.0, 9.0, 10).encode()).remove(0)
    }

    #[test]
    fn startup_revolutions_are_not_delivered() {
        let clock = StepClock::new(1_000, 1_000);
        let mut aggregator = RevolutionAggregator::new();
        let mut delivered = Vec::new();
        for _ in 0..6 {
            aggregator.push(plain_packet(), &clock);
            if let Some(revolution) = aggregator.push(zero_packet(4), &clock) {
                delivered.push(aggregator.completed());
                assert!(!revolution.points.is_empty());
            }
        }
        assert_eq!(delivered, vec![4, 5, 6]);
    }

    #[test]
    fn split_at_zero_sample() {
        let clock = StepClock::new(1_000, 1_000);
        let mut aggregator = RevolutionAggregator::new();
        for _ in 0..3 {
            aggregator.push(zero_packet(4), &clock);
        }
        aggregator.push(plain_packet(), &clock);
        let revolution = aggregator.push(zero_packet(4), &clock).unwrap();

        // 6 carried over from the previous zero packet, a plain packet, 4 before the zero.
        assert_eq!(revolution.points.len(), 6 + 10 + 4);
        assert!(revolution.points[0].is_zero);
        assert_eq!(revolution.points.iter().filter(|p| p.is_zero).count(), 1);
    }

    #[test]
    fn one_marker_one_revolution() {
        let clock = StepClock::new(1_000, 1_000);
        let mut aggregator = RevolutionAggregator::new();
        let mut revolutions = Vec::new();
        for _ in 0..5 {
            for packet in packets(&revolution_bytes(8, 3)) {
                revolutions.extend(aggregator.push(packet, &clock));
            }
        }
        assert_eq!(aggregator.completed(), 5);
        assert_eq!(revolutions.len(), 2);
        for revolution in &revolutions {
            assert_eq!(revolution.points.len(), 80);
            assert!(revolution.points[0].is_zero);
        }
    }

    #[test]
    fn stop_stamp_is_raw_during_warmup() {
        let clock = StepClock::new(1_000, 1_000);
        let mut aggregator = RevolutionAggregator::new();
        let mut stamps = Vec::new();
        for _ in 0..8 {
            aggregator.push(plain_packet(), &clock);
            if let Some(revolution) = aggregator.push(zero_packet(5), &clock) {
                stamps.push((revolution.start_stamp, revolution.stop_stamp));
            }
        }
        assert_eq!(
            stamps,
            vec![
                (3_000, 4_000),
                (4_000, 5_000),
                (5_000, 6_000),
                (6_000, 7_000),
                (7_000, 8_000)
            ]
        );
    }

    #[test]
    fn stop_stamp_is_corrected_after_warmup() {
        let clock = StepClock::new(1_000, 1_000);
        let mut aggregator = RevolutionAggregator::new();
        let mut last = None;
        for _ in 0..9 {
            aggregator.push(plain_packet(), &clock);
            last = aggregator.push(zero_packet(5), &clock);
        }
        let revolution = last.unwrap();
        // 25 samples since the last split, 5 of them after the zero sample:
        // 9_000 - (9_000 - 8_000) * 5 / 25
        assert_eq!(revolution.start_stamp, 8_000);
        assert_eq!(revolution.stop_stamp, 8_800);
        assert_eq!(revolution.points.len(), 20);
    }

    #[test]
    fn backlog_without_zero_angle_is_dropped() {
        let clock = StepClock::new(1_000, 1_000);
        let mut aggregator = RevolutionAggregator::new();
        for _ in 0..4 {
            aggregator.push(zero_packet(4), &clock);
        }
        let plain = plain_packet();
        let pushes = NVILIDAR_MAX_PENDING_POINTS / 10 + 1;
        for _ in 0..pushes {
            assert!(aggregator.push(plain.clone(), &clock).is_none());
        }

        // 6 carried samples plus 10 per packet: the backlog overflows and is
        // dropped at the second to last push, leaving the last packet.
        let revolution = aggregator.push(zero_packet(4), &clock).unwrap();
        assert_eq!(revolution.points.len(), 10 + 4);
    }

    #[test]
    fn reset_restarts_counting() {
        let clock = StepClock::new(1_000, 1_000);
        let mut aggregator = RevolutionAggregator::new();
        for _ in 0..4 {
            aggregator.push(zero_packet(4), &clock);
        }
        // The carry-over starts with the previous zero sample, so a zero at index 0
        // of the next packet closes a 6 sample revolution.
        let revolution = aggregator.push(zero_packet(0), &clock).unwrap();
        assert_eq!(revolution.points.len(), 6);

        aggregator.reset();
        assert!(aggregator.push(zero_packet(0), &clock).is_none());
        assert_eq!(aggregator.completed(), 1);
    }
}
