pub mod point_packet;

pub use self::point_packet::{AngleStep, PointPacket, PointPacketParser};
